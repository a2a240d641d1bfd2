use std::fmt::{self, Debug, Formatter};
use std::ops::Index;

use log::*;

use crate::{
    util::{concat_vecs, HashMap, IndexMap, Instant},
    ClassData, EClass, ENode, Error, Id, RecExpr, TensorType, UnionFind,
};

/** A data structure to keep track of equalities between tensor expressions.

An [`EGraph`] stores [`EClass`]es of equivalent [`ENode`]s. Nodes point at
classes, never at other nodes, so one graph compactly represents
exponentially many equivalent programs.

Most methods deal with [`Id`]s. Because classes are merged over time, many
ids can name the same class; [`find`](EGraph::find) gives the canonical one.

# Invariants and rebuilding

A hash-cons table maps every canonical node to its class, so adding a node
that is already present returns the existing class. [`union`](EGraph::union)
merges two classes but leaves the table and the congruence relation stale:
two nodes may become structurally equal without being in the same class.
[`rebuild`](EGraph::rebuild) restores both. Pattern matching requires a
rebuilt graph; the [`Runner`](crate::Runner) takes care of that.

```
use tensor_eqsat::*;
let mut egraph = EGraph::default();
let x = egraph.add(ENode::input("x"));
let y = egraph.add(ENode::input("y"));
let fx = egraph.add(ENode::new("neg", [x]));
let fy = egraph.add(ENode::new("neg", [y]));

egraph.union(x, y);
assert_ne!(egraph.find(fx), egraph.find(fy));

// congruence: x = y implies neg(x) = neg(y)
assert_eq!(egraph.rebuild(), 1);
assert_eq!(egraph.find(fx), egraph.find(fy));
assert_eq!(egraph.number_of_classes(), 2);
```
**/
#[derive(Clone, Default)]
pub struct EGraph {
    unionfind: UnionFind,
    /// Canonical node to the class it lives in. Values may be stale ids,
    /// always go through `find`.
    memo: HashMap<ENode, Id>,
    /// Indexed by id; `None` once a class has been merged away.
    classes: Vec<Option<EClass>>,
    /// Classes whose parents need to be recanonicalized.
    dirty: Vec<Id>,
}

impl EGraph {
    /// Creates an e-graph holding the given expressions, returning the class
    /// of each root in order.
    pub fn from_exprs<'a>(exprs: impl IntoIterator<Item = &'a RecExpr>) -> (Self, Vec<Id>) {
        let mut egraph = EGraph::default();
        let roots = exprs.into_iter().map(|e| egraph.add_expr(e)).collect();
        (egraph, roots)
    }

    /// Canonicalizes an eclass id.
    pub fn find(&self, id: Id) -> Id {
        self.unionfind.find(id)
    }

    /// Like [`find`](EGraph::find), with path compression.
    pub fn find_mut(&mut self, id: Id) -> Id {
        self.unionfind.find_mut(id)
    }

    /// Returns `true` if the egraph has no classes.
    pub fn is_empty(&self) -> bool {
        self.memo.is_empty()
    }

    /// Returns `true` if there are no unions waiting for a rebuild.
    pub fn is_clean(&self) -> bool {
        self.dirty.is_empty()
    }

    /// Iterates over the live eclasses in id order.
    pub fn classes(&self) -> impl Iterator<Item = &EClass> {
        self.classes.iter().flatten()
    }

    /// Number of live eclasses.
    pub fn number_of_classes(&self) -> usize {
        self.classes().count()
    }

    /// Number of enodes over all classes.
    ///
    /// Before a rebuild this may count nodes that have become duplicates.
    pub fn total_number_of_nodes(&self) -> usize {
        self.classes().map(|c| c.len()).sum()
    }

    /// Number of entries in the hash-cons table.
    pub fn total_size(&self) -> usize {
        self.memo.len()
    }

    /// Number of ids ever handed out, including merged-away ones.
    pub fn number_of_ids(&self) -> usize {
        self.unionfind.size()
    }

    /// Looks up the class of a node without adding it.
    pub fn lookup(&self, node: &ENode) -> Option<Id> {
        let node = node.clone().map_children(|id| self.find(id));
        self.memo.get(&node).map(|&id| self.find(id))
    }

    /// Looks up the class of an expression's root without adding anything.
    pub fn lookup_expr(&self, expr: &RecExpr) -> Option<Id> {
        let mut ids = Vec::with_capacity(expr.len());
        for node in expr.nodes() {
            let node = node.clone().map_children(|i| ids[usize::from(i)]);
            ids.push(self.lookup(&node)?);
        }
        ids.last().copied()
    }

    /// Adds a node without a type tag. See
    /// [`add_with_type`](EGraph::add_with_type).
    pub fn add(&mut self, node: ENode) -> Id {
        self.add_with_type(node, None)
    }

    /// Adds a node, returning the id of the class it ends up in.
    ///
    /// The children are canonicalized first. If an equal node is already in
    /// the graph its class is returned and nothing is added; otherwise the
    /// node gets a fresh singleton class.
    ///
    /// # Panics
    /// If a child does not name a class of this graph.
    pub fn add_with_type(&mut self, node: ENode, ty: Option<TensorType>) -> Id {
        let node = node.map_children(|id| {
            assert!(
                usize::from(id) < self.classes.len(),
                "child {} is not a class of this e-graph",
                id
            );
            self.unionfind.find_mut(id)
        });

        if let Some(&existing) = self.memo.get(&node) {
            let id = self.find_mut(existing);
            if ty.is_some() {
                self[id].data.merge(ClassData { ty }, id);
            }
            return id;
        }

        let id = self.unionfind.make_set();
        trace!("Adding {:?} as {}", node, id);
        debug_assert_eq!(usize::from(id), self.classes.len());

        for &child in node.children() {
            self[child].parents.push((node.clone(), id));
        }
        self.classes
            .push(Some(EClass::new(id, node.clone(), ClassData { ty })));
        self.memo.insert(node, id);
        id
    }

    /// Adds every node of an expression, with its type, returning the class
    /// of the root.
    pub fn add_expr(&mut self, expr: &RecExpr) -> Id {
        let ids = self.add_expr_ids(expr);
        *ids.last().unwrap_or_else(|| panic!("cannot add an empty expression"))
    }

    /// Like [`add_expr`](EGraph::add_expr) but returns the class of every
    /// node.
    pub fn add_expr_ids(&mut self, expr: &RecExpr) -> Vec<Id> {
        let mut ids = Vec::with_capacity(expr.len());
        for (i, node) in expr.nodes().iter().enumerate() {
            let node = node.clone().map_children(|c| ids[usize::from(c)]);
            let ty = expr.ty(Id::from(i)).cloned();
            ids.push(self.add_with_type(node, ty));
        }
        ids
    }

    /// Unions two eclasses given their ids, returning `true` if they were
    /// different.
    ///
    /// The ids need not be canonical. The graph is not rebuilt.
    pub fn union(&mut self, id1: Id, id2: Id) -> bool {
        let id1 = self.find_mut(id1);
        let id2 = self.find_mut(id2);
        if id1 == id2 {
            return false;
        }

        let leader = self.unionfind.union(id1, id2);
        let follower = if leader == id1 { id2 } else { id1 };
        trace!("Unioning {} into {}", follower, leader);

        let class2 = self.classes[usize::from(follower)]
            .take()
            .unwrap_or_else(|| panic!("e-class {} was already merged away", follower));
        let class1 = &mut self[leader];
        class1.data.merge(class2.data, leader);
        concat_vecs(&mut class1.nodes, class2.nodes);
        concat_vecs(&mut class1.parents, class2.parents);

        self.dirty.push(leader);
        self.dirty.push(follower);
        true
    }

    /// Restores the hash-cons table and congruence after some unions,
    /// returning how many further unions congruence required.
    ///
    /// Afterwards every class member has canonical children, members are
    /// sorted and deduplicated, and the table holds only canonical nodes.
    pub fn rebuild(&mut self) -> usize {
        let old_hc_size = self.memo.len();
        let old_n_eclasses = self.number_of_classes();
        let start = Instant::now();

        let mut n_unions = 0;
        while let Some(id) = self.dirty.pop() {
            n_unions += self.repair(id);
        }
        let trimmed_nodes = self.rebuild_classes();

        let elapsed = start.elapsed();
        info!(
            concat!(
                "REBUILT! in {}.{:03}s\n",
                "  Old: hc size {}, eclasses: {}\n",
                "  New: hc size {}, eclasses: {}\n",
                "  unions: {}, trimmed nodes: {}"
            ),
            elapsed.as_secs(),
            elapsed.subsec_millis(),
            old_hc_size,
            old_n_eclasses,
            self.memo.len(),
            self.number_of_classes(),
            n_unions,
            trimmed_nodes,
        );
        n_unions
    }

    /// Recanonicalizes the parents of one class, unioning the ones that
    /// turn out equal.
    fn repair(&mut self, id: Id) -> usize {
        let id = self.find_mut(id);
        let parents = std::mem::take(&mut self[id].parents);
        for (node, _) in &parents {
            self.memo.remove(node);
        }

        let mut n_unions = 0;
        let mut new_parents: IndexMap<ENode, Id> = IndexMap::default();
        for (node, class) in parents {
            let node = node.map_children(|c| self.unionfind.find_mut(c));
            if let Some(&other) = new_parents.get(&node) {
                if self.union(other, class) {
                    n_unions += 1;
                }
            }
            let class = self.find_mut(class);
            new_parents.insert(node, class);
        }

        for (node, &class) in &new_parents {
            self.memo.insert(node.clone(), class);
        }
        let root = self.find_mut(id);
        self[root].parents.extend(new_parents);
        n_unions
    }

    fn rebuild_classes(&mut self) -> usize {
        let mut trimmed = 0;
        let uf = &mut self.unionfind;
        for class in self.classes.iter_mut().flatten() {
            let old_len = class.len();
            for node in &mut class.nodes {
                node.update_children(|id| uf.find_mut(id));
            }
            class.nodes.sort_unstable();
            class.nodes.dedup();
            trimmed += old_len - class.len();
        }

        let uf = &self.unionfind;
        self.memo.retain(|node, class| {
            *class = uf.find(*class);
            node.all(|c| uf.find(c) == c)
        });
        trimmed
    }

    /// Checks the structural invariants of a rebuilt graph: canonical class
    /// ids and children, a hash-cons table that agrees with the classes,
    /// and congruence.
    pub fn check_invariants(&self) -> Result<(), Error> {
        let bail = |msg: String| Err(Error::Invariant(msg));
        if !self.is_clean() {
            return bail("the e-graph has unions waiting for a rebuild".into());
        }

        let mut seen: HashMap<&ENode, Id> = HashMap::default();
        for class in self.classes() {
            if self.find(class.id) != class.id {
                return bail(format!("e-class {} is not canonical", class.id));
            }
            for node in &class.nodes {
                if let Some(child) = node.children().iter().find(|&&c| self.find(c) != c) {
                    return bail(format!(
                        "{:?} in e-class {} has non-canonical child {}",
                        node, class.id, child
                    ));
                }
                if let Some(other) = seen.insert(node, class.id) {
                    return bail(format!(
                        "{:?} is in both e-class {} and e-class {}",
                        node, other, class.id
                    ));
                }
                match self.memo.get(node).map(|&id| self.find(id)) {
                    Some(id) if id == class.id => (),
                    found => {
                        return bail(format!(
                            "{:?} in e-class {} is hashed to {:?}",
                            node, class.id, found
                        ))
                    }
                }
            }
        }

        if seen.len() != self.memo.len() {
            return bail(format!(
                "hash-cons table has {} entries for {} nodes",
                self.memo.len(),
                seen.len()
            ));
        }
        Ok(())
    }

    /// Returns a more debug-able representation of the egraph.
    ///
    /// [`EGraph`]s implement [`Debug`], but it's not pretty. It
    /// prints a lot of stuff you probably don't care about.
    /// This method returns a wrapper that implements [`Debug`] in a
    /// slightly nicer way, just dumping enodes in each eclass.
    pub fn dump(&self) -> impl Debug + '_ {
        EGraphDump(self)
    }
}

impl Index<Id> for EGraph {
    type Output = EClass;
    fn index(&self, id: Id) -> &Self::Output {
        let id = self.find(id);
        self.classes
            .get(usize::from(id))
            .and_then(Option::as_ref)
            .unwrap_or_else(|| panic!("Invalid id {}", id))
    }
}

impl std::ops::IndexMut<Id> for EGraph {
    fn index_mut(&mut self, id: Id) -> &mut Self::Output {
        let id = self.find_mut(id);
        self.classes
            .get_mut(usize::from(id))
            .and_then(Option::as_mut)
            .unwrap_or_else(|| panic!("Invalid id {}", id))
    }
}

// manual debug impl, the hash-cons table is noise
impl Debug for EGraph {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("EGraph")
            .field("unionfind", &self.unionfind)
            .field("classes", &self.classes().collect::<Vec<_>>())
            .field("dirty", &self.dirty)
            .finish()
    }
}

struct EGraphDump<'a>(&'a EGraph);

impl Debug for EGraphDump<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for class in self.0.classes() {
            write!(f, "{}", class.id)?;
            if let Some(ty) = class.ty() {
                write!(f, ": {}", ty)?;
            }
            writeln!(f, " {:?}", class.nodes)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DType, Literal};

    #[test]
    fn simple_add() {
        crate::init_logger();
        let mut egraph = EGraph::default();

        let x = egraph.add(ENode::input("x"));
        let x2 = egraph.add(ENode::input("x"));
        let _plus = egraph.add(ENode::new("add", [x, x2]));

        assert_eq!(x, x2);
        assert_eq!(egraph.number_of_classes(), 2);

        let y = egraph.add(ENode::input("y"));
        egraph.union(x, y);
        egraph.rebuild();
        egraph.check_invariants().unwrap();
        assert_eq!(egraph.find(x), egraph.find(y));
    }

    #[test]
    fn congruence_cascades() {
        crate::init_logger();
        let e: RecExpr = "(tuple (neg (neg a)) (neg (neg b)))".parse().unwrap();
        let (mut egraph, roots) = EGraph::from_exprs([&e]);
        let before = egraph.number_of_classes();

        let a = egraph.lookup(&ENode::input("a")).unwrap();
        let b = egraph.lookup(&ENode::input("b")).unwrap();
        assert!(egraph.union(a, b));
        assert!(!egraph.union(b, a));
        assert!(!egraph.is_clean());
        assert!(egraph.check_invariants().is_err());

        // neg a = neg b, then neg neg a = neg neg b
        assert_eq!(egraph.rebuild(), 2);
        egraph.check_invariants().unwrap();
        assert_eq!(egraph.number_of_classes(), before - 3);

        let tuple = &egraph[roots[0]];
        assert_eq!(tuple.nodes.len(), 1);
        let kids = tuple.nodes[0].children();
        assert_eq!(kids[0], kids[1]);
    }

    #[test]
    fn rebuild_dedups_members() {
        let mut egraph = EGraph::default();
        let a = egraph.add(ENode::input("a"));
        let b = egraph.add(ENode::input("b"));
        let na = egraph.add(ENode::new("neg", [a]));
        let nb = egraph.add(ENode::new("neg", [b]));
        egraph.union(na, nb);
        egraph.union(a, b);
        egraph.rebuild();
        egraph.check_invariants().unwrap();

        assert_eq!(egraph[na].len(), 1);
        assert_eq!(egraph.total_size(), egraph.total_number_of_nodes());
    }

    #[test]
    fn types_stick_to_classes() {
        let t = TensorType::new(DType::F32, [2, 2]);
        let mut egraph = EGraph::default();
        let x = egraph.add(ENode::input("x"));
        assert_eq!(egraph[x].ty(), None);

        let x2 = egraph.add_with_type(ENode::input("x"), Some(t.clone()));
        assert_eq!(x, x2);
        assert_eq!(egraph[x].ty(), Some(&t));

        let c = egraph.add(ENode::constant(Literal::Int(0)));
        egraph.union(c, x);
        egraph.rebuild();
        assert_eq!(egraph[c].ty(), Some(&t));
    }

    #[test]
    fn lookup_expr_finds_nothing_new() {
        let e: RecExpr = "(add x (mul y 2))".parse().unwrap();
        let (egraph, roots) = EGraph::from_exprs([&e]);
        assert_eq!(egraph.lookup_expr(&e), Some(roots[0]));

        let other: RecExpr = "(add x (mul y 3))".parse().unwrap();
        assert_eq!(egraph.lookup_expr(&other), None);
        assert_eq!(egraph.number_of_classes(), 5);
        assert!(format!("{:?}", egraph.dump()).contains("input@x"));
    }
}
