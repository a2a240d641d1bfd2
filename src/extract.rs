use std::cmp::Ordering;

use log::*;

use crate::{
    util::{HashMap, HashSet},
    CostModel, CostOrder, CostVector, EClass, EGraph, ENode, Error, Id, RecExpr, TensorType,
    WeightedSum,
};

/** Extracts a single cheapest expression from an [`EGraph`].

The extractor computes, for every class, the cheapest member under a
[`CostModel`] and a [`CostOrder`], by relaxing costs bottom-up until
nothing improves. A class's choice only changes on a *strict* improvement,
and classes and members are visited in a fixed order, so ties always go to
the first member in the class's (sorted) member list and the result is
deterministic. A node whose cost has a non-finite factor is never chosen,
which lets a model forbid operators outright.

By default the extracted [`RecExpr`] is a tree: a class used twice is
emitted twice. [`with_sharing`](Extractor::with_sharing) emits each class
once instead.

```
use tensor_eqsat::*;
let mut egraph = EGraph::default();
let x = egraph.add(ENode::input("x"));
let zero = egraph.add(ENode::constant(0));
let sum = egraph.add(ENode::new("add", [x, zero]));
egraph.union(sum, x);
egraph.rebuild();

let extractor = Extractor::new(&egraph, NodeCount);
let (cost, best) = extractor.find_best(sum).unwrap();
assert_eq!(cost.get(Factor::Nodes), 1.0);
assert_eq!(best.to_string(), "x");
```
**/
#[derive(Debug)]
pub struct Extractor<'a, M, O = WeightedSum> {
    egraph: &'a EGraph,
    model: M,
    order: O,
    costs: HashMap<Id, (CostVector, ENode)>,
    sharing: bool,
}

impl<'a, M: CostModel> Extractor<'a, M> {
    /// Computes the best choice for every class, ordering costs by
    /// [`WeightedSum::default`].
    pub fn new(egraph: &'a EGraph, model: M) -> Self {
        Self::with_order(egraph, model, WeightedSum::default())
    }
}

impl<'a, M: CostModel, O: CostOrder> Extractor<'a, M, O> {
    /// Computes the best choice for every class under `order`.
    pub fn with_order(egraph: &'a EGraph, model: M, order: O) -> Self {
        debug_assert!(egraph.is_clean(), "extracting from an unrebuilt egraph");
        let mut extractor = Extractor {
            egraph,
            model,
            order,
            costs: HashMap::default(),
            sharing: false,
        };
        extractor.find_costs();
        extractor
    }

    /// Emit each class at most once in extracted expressions.
    pub fn with_sharing(mut self, sharing: bool) -> Self {
        self.sharing = sharing;
        self
    }

    /// The cheapest expression of `eclass` and its cost.
    ///
    /// The cost is the tree cost: shared subterms count once per use.
    pub fn find_best(&self, eclass: Id) -> Result<(CostVector, RecExpr), Error> {
        let (cost, _) = self.lookup(eclass)?;
        let mut expr = RecExpr::default();
        self.build(eclass, &mut expr, &mut HashMap::default(), &mut HashSet::default())?;
        Ok((*cost, expr))
    }

    /// Extracts several roots into one expression, returning the index of
    /// each root within it. With sharing on, a class reachable from more
    /// than one root is emitted once.
    pub fn find_best_many(&self, eclasses: &[Id]) -> Result<(RecExpr, Vec<Id>), Error> {
        let mut expr = RecExpr::default();
        let mut built = HashMap::default();
        let roots = eclasses
            .iter()
            .map(|&eclass| self.build(eclass, &mut expr, &mut built, &mut HashSet::default()))
            .collect::<Result<_, _>>()?;
        Ok((expr, roots))
    }

    /// The member chosen for `eclass`, if it has a finite cost.
    pub fn find_best_node(&self, eclass: Id) -> Option<&ENode> {
        self.costs.get(&self.egraph.find(eclass)).map(|(_, n)| n)
    }

    /// The best cost of `eclass`, if it has a finite one.
    pub fn find_best_cost(&self, eclass: Id) -> Option<CostVector> {
        self.costs.get(&self.egraph.find(eclass)).map(|(c, _)| *c)
    }

    /// What `node` would cost given the current choices for its children,
    /// `None` if some child has no finite cost.
    pub fn candidate_cost(&self, node: &ENode) -> Option<CostVector> {
        let ty = self.egraph.lookup(node).and_then(|id| self.egraph[id].ty());
        self.cost_with_type(node, ty)
    }

    fn cost_with_type(&self, node: &ENode, ty: Option<&TensorType>) -> Option<CostVector> {
        let egraph = self.egraph;
        let child_costs = node
            .children()
            .iter()
            .map(|&id| self.find_best_cost(id))
            .collect::<Option<Vec<_>>>()?;
        let child_types: Vec<_> = node.children().iter().map(|&id| egraph[id].ty()).collect();
        let cost = self.model.cost(node, ty, &child_types, &child_costs);
        Some(cost).filter(CostVector::is_finite)
    }

    fn find_costs(&mut self) {
        let mut did_something = true;
        let mut loops = 0;
        while did_something {
            did_something = false;
            for class in self.egraph.classes() {
                did_something |= self.make_pass(class);
            }
            loops += 1;
        }

        for class in self.egraph.classes() {
            if !self.costs.contains_key(&class.id) {
                debug!("Failed to compute cost for eclass {}: {:?}", class.id, class.nodes);
            }
        }
        info!("Took {} loops to find costs", loops);
    }

    fn make_pass(&mut self, class: &EClass) -> bool {
        let mut changed = false;
        for node in class.iter() {
            let new = match self.cost_with_type(node, class.ty()) {
                Some(cost) => cost,
                None => continue,
            };
            let better = match self.costs.get(&class.id) {
                Some((old, _)) => self.order.compare(&new, old) == Ordering::Less,
                None => true,
            };
            if better {
                self.costs.insert(class.id, (new, node.clone()));
                changed = true;
            }
        }
        changed
    }

    fn lookup(&self, eclass: Id) -> Result<&(CostVector, ENode), Error> {
        let id = self.egraph.find(eclass);
        self.costs.get(&id).ok_or_else(|| self.failure(self.culprit(id)))
    }

    /// Walks down from a class without a cost to the class that causes it:
    /// either one whose members all lack a cost on their own, or the first
    /// class the walk reaches twice.
    fn culprit(&self, eclass: Id) -> Id {
        let mut seen = HashSet::default();
        let mut id = eclass;
        while seen.insert(id) {
            let stuck = self.egraph[id]
                .iter()
                .flat_map(|node| node.children())
                .map(|&child| self.egraph.find(child))
                .find(|child| !self.costs.contains_key(child));
            match stuck {
                Some(child) => id = child,
                None => break,
            }
        }
        id
    }

    fn failure(&self, id: Id) -> Error {
        Error::Extraction {
            eclass: id,
            nodes: self.egraph[id].nodes.clone(),
        }
    }

    fn build(
        &self,
        eclass: Id,
        expr: &mut RecExpr,
        built: &mut HashMap<Id, Id>,
        visiting: &mut HashSet<Id>,
    ) -> Result<Id, Error> {
        let id = self.egraph.find(eclass);
        if self.sharing {
            if let Some(&done) = built.get(&id) {
                return Ok(done);
            }
        }
        if !visiting.insert(id) {
            return Err(self.failure(id));
        }

        let (_, node) = self.lookup(id)?;
        let mut children = Vec::with_capacity(node.len());
        for &child in node.children() {
            children.push(self.build(child, expr, built, visiting)?);
        }
        let mut node = node.clone();
        for (slot, child) in node.children_mut().iter_mut().zip(children) {
            *slot = child;
        }
        let new = expr.add_typed(node, self.egraph[id].ty().cloned());

        visiting.remove(&id);
        built.insert(id, new);
        Ok(new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::*;

    #[test]
    fn ties_go_to_first_member() {
        let mut egraph = EGraph::default();
        let a = egraph.add(ENode::input("a"));
        let b = egraph.add(ENode::input("b"));
        let ab = egraph.add(ENode::new("mul", [a, b]));
        let ba = egraph.add(ENode::new("mul", [b, a]));
        egraph.union(ba, ab);
        egraph.rebuild();

        let ext = Extractor::new(&egraph, NodeCount);
        let (_, best) = ext.find_best(ba).unwrap();
        assert_eq!(best.to_string(), "(mul a b)");
    }

    #[test]
    fn cycles_are_skipped() {
        let mut egraph = EGraph::default();
        let x = egraph.add(ENode::input("x"));
        let id = egraph.add(ENode::new("identity", [x]));
        egraph.union(id, x);
        egraph.rebuild();
        assert_eq!(egraph[x].len(), 2);

        let ext = Extractor::new(&egraph, NodeCount);
        assert_eq!(ext.find_best_node(x), Some(&ENode::input("x")));
        let (cost, best) = ext.find_best(id).unwrap();
        assert_eq!(cost.get(Factor::Nodes), 1.0);
        assert_eq!(best.len(), 1);
    }

    #[test]
    fn forbidden_nodes() {
        // refuses to read input "y"
        struct NoY;
        impl CostModel for NoY {
            fn node_cost(&self, node: &ENode, _: Option<&TensorType>, _: &[Option<&TensorType>]) -> CostVector {
                let nodes = if node == &ENode::input("y") { f64::INFINITY } else { 1.0 };
                CostVector::zero().with(Factor::Nodes, nodes)
            }
        }

        let mut egraph = EGraph::default();
        let x = egraph.add(ENode::input("x"));
        let y = egraph.add(ENode::input("y"));
        let ny = egraph.add(ENode::new("neg", [y]));
        let sum = egraph.add(ENode::new("add", [x, ny]));
        egraph.rebuild();

        let ext = Extractor::new(&egraph, NoY);
        assert_eq!(ext.find_best_cost(sum), None);
        match ext.find_best(sum) {
            Err(Error::Extraction { eclass, nodes }) => {
                assert_eq!(eclass, y);
                assert_eq!(nodes, vec![ENode::input("y")]);
            }
            other => panic!("expected an extraction error, got {:?}", other),
        }

        // once y is known to equal x there is a way out
        let mut egraph = egraph.clone();
        egraph.union(y, x);
        egraph.rebuild();
        let ext = Extractor::new(&egraph, NoY);
        let (cost, best) = ext.find_best(sum).unwrap();
        assert_eq!(cost.get(Factor::Nodes), 4.0);
        assert_eq!(best.to_string(), "(add x (neg x))");
    }

    #[test]
    fn failure_names_the_cycle_below_the_root() {
        struct NoA;
        impl CostModel for NoA {
            fn node_cost(&self, node: &ENode, _: Option<&TensorType>, _: &[Option<&TensorType>]) -> CostVector {
                let nodes = if node == &ENode::input("a") { f64::INFINITY } else { 1.0 };
                CostVector::zero().with(Factor::Nodes, nodes)
            }
        }

        let mut egraph = EGraph::default();
        let x = egraph.add(ENode::input("x"));
        let a = egraph.add(ENode::input("a"));
        let na = egraph.add(ENode::new("neg", [a]));
        egraph.union(na, a);
        egraph.rebuild();
        let sum = egraph.add(ENode::new("add", [x, a]));
        egraph.rebuild();

        let cyclic = egraph.find(a);
        let ext = Extractor::new(&egraph, NoA);
        match ext.find_best(sum) {
            Err(Error::Extraction { eclass, nodes }) => {
                assert_eq!(eclass, cyclic);
                assert_eq!(nodes.len(), 2);
                assert!(nodes.contains(&ENode::input("a")));
                assert!(nodes.contains(&ENode::new("neg", [cyclic])));
            }
            other => panic!("expected an extraction error, got {:?}", other),
        }
    }

    #[test]
    fn sharing() {
        let mut egraph = EGraph::default();
        let x = egraph.add(ENode::input("x"));
        let e = egraph.add(ENode::new("exp", [x]));
        let sum = egraph.add(ENode::new("add", [e, e]));
        egraph.rebuild();

        let tree = Extractor::new(&egraph, NodeCount);
        let (cost, expr) = tree.find_best(sum).unwrap();
        assert_eq!(cost.get(Factor::Nodes), 5.0);
        assert_eq!(expr.len(), 5);

        let dag = Extractor::new(&egraph, NodeCount).with_sharing(true);
        let (_, expr) = dag.find_best(sum).unwrap();
        assert_eq!(expr.len(), 3);
        assert_eq!(expr.to_string(), "(add (exp x) (exp x))");

        let (expr, roots) = dag.find_best_many(&[e, sum]).unwrap();
        assert_eq!(expr.len(), 3);
        assert_eq!(roots, vec![Id::from(1), Id::from(2)]);
    }
}
