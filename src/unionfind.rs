use crate::Id;

/// Disjoint sets over e-class ids, with path compression and union by rank.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct UnionFind {
    parents: Vec<Id>,
    ranks: Vec<u8>,
}

impl UnionFind {
    /// Creates a fresh singleton set.
    pub fn make_set(&mut self) -> Id {
        let id = Id::from(self.parents.len());
        self.parents.push(id);
        self.ranks.push(0);
        id
    }

    /// Number of ids ever created.
    pub fn size(&self) -> usize {
        self.parents.len()
    }

    fn parent(&self, query: Id) -> Id {
        self.parents[usize::from(query)]
    }

    /// The representative of `current`'s set, without compressing.
    pub fn find(&self, mut current: Id) -> Id {
        while current != self.parent(current) {
            current = self.parent(current)
        }
        current
    }

    /// The representative of `current`'s set, pointing every id on the way
    /// straight at it.
    pub fn find_mut(&mut self, mut current: Id) -> Id {
        let canon = self.find(current);
        while current != canon {
            let next = self.parent(current);
            self.parents[usize::from(current)] = canon;
            current = next;
        }
        canon
    }

    /// Given two leader ids, unions their sets and returns the new leader.
    ///
    /// The leader of the higher ranked set wins; on a tie `root1` does.
    pub fn union(&mut self, root1: Id, root2: Id) -> Id {
        debug_assert_eq!(root1, self.find(root1));
        debug_assert_eq!(root2, self.find(root2));
        if root1 == root2 {
            return root1;
        }
        let (r1, r2) = (self.ranks[usize::from(root1)], self.ranks[usize::from(root2)]);
        let (leader, follower) = if r1 >= r2 { (root1, root2) } else { (root2, root1) };
        if r1 == r2 {
            self.ranks[usize::from(leader)] += 1;
        }
        self.parents[usize::from(follower)] = leader;
        leader
    }

    /// Returns true if `id` is its own representative.
    pub fn is_root(&self, id: Id) -> bool {
        self.parent(id) == id
    }
}
