use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use crate::{ENode, OpKind, OpRegistry, TensorType};

/// One named component of a [`CostVector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum Factor {
    /// Number of operator nodes.
    Nodes,
    /// Arithmetic operations, scaled by element counts.
    ArithOps,
    /// Bytes read from memory.
    BytesLoaded,
    /// Bytes written to memory.
    BytesStored,
}

impl Factor {
    /// Every factor, in vector order.
    pub const ALL: [Factor; 4] = [
        Factor::Nodes,
        Factor::ArithOps,
        Factor::BytesLoaded,
        Factor::BytesStored,
    ];

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            Factor::Nodes => "nodes",
            Factor::ArithOps => "ops",
            Factor::BytesLoaded => "loaded",
            Factor::BytesStored => "stored",
        }
    }
}

/// A vector of non-negative cost factors.
///
/// Vectors add componentwise. They are not ordered by themselves; a
/// [`CostOrder`] decides which of two vectors is cheaper.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct CostVector([f64; 4]);

impl CostVector {
    /// All factors zero.
    pub fn zero() -> Self {
        CostVector::default()
    }

    /// Sets one factor.
    pub fn with(mut self, factor: Factor, value: f64) -> Self {
        self.set(factor, value);
        self
    }

    /// Sets one factor in place.
    pub fn set(&mut self, factor: Factor, value: f64) {
        debug_assert!(value >= 0.0, "negative cost {} for {:?}", value, factor);
        self.0[factor.index()] = value;
    }

    /// Reads one factor.
    pub fn get(&self, factor: Factor) -> f64 {
        self.0[factor.index()]
    }

    /// Returns `true` if no factor is infinite or NaN.
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|c| c.is_finite())
    }

    /// Iterates over the factors and their values.
    pub fn iter(&self) -> impl Iterator<Item = (Factor, f64)> + '_ {
        Factor::ALL.iter().map(move |&f| (f, self.get(f)))
    }
}

impl Add for CostVector {
    type Output = CostVector;
    fn add(mut self, other: CostVector) -> CostVector {
        self += other;
        self
    }
}

impl AddAssign for CostVector {
    fn add_assign(&mut self, other: CostVector) {
        for (a, b) in self.0.iter_mut().zip(other.0) {
            *a += b;
        }
    }
}

impl Sum for CostVector {
    fn sum<I: Iterator<Item = CostVector>>(iter: I) -> Self {
        iter.fold(CostVector::zero(), Add::add)
    }
}

impl<'a> Sum<&'a CostVector> for CostVector {
    fn sum<I: Iterator<Item = &'a CostVector>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

impl Display for CostVector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, (factor, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={}", factor.name(), value)?;
        }
        Ok(())
    }
}

/// A total order on [`CostVector`]s, picked by whoever extracts.
pub trait CostOrder {
    /// Compares two costs; `Less` means `a` is cheaper.
    fn compare(&self, a: &CostVector, b: &CostVector) -> Ordering;
}

/// Orders costs by a weighted sum of their factors.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedSum {
    weights: [f64; 4],
}

impl WeightedSum {
    /// Weights every factor by zero except the given ones.
    pub fn new(weights: impl IntoIterator<Item = (Factor, f64)>) -> Self {
        let mut w = [0.0; 4];
        for (factor, weight) in weights {
            w[factor.index()] = weight;
        }
        WeightedSum { weights: w }
    }

    /// The weighted sum of `cost`.
    pub fn total(&self, cost: &CostVector) -> f64 {
        self.weights.iter().zip(cost.0).map(|(w, c)| w * c).sum()
    }
}

/// Every factor counts once.
impl Default for WeightedSum {
    fn default() -> Self {
        WeightedSum { weights: [1.0; 4] }
    }
}

impl CostOrder for WeightedSum {
    fn compare(&self, a: &CostVector, b: &CostVector) -> Ordering {
        self.total(a).total_cmp(&self.total(b))
    }
}

/// Orders costs by one factor, breaking ties with the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lexicographic {
    order: Vec<Factor>,
}

impl Lexicographic {
    /// Compares factors in the given priority.
    pub fn new(order: impl IntoIterator<Item = Factor>) -> Self {
        Lexicographic {
            order: order.into_iter().collect(),
        }
    }
}

impl Default for Lexicographic {
    fn default() -> Self {
        Lexicographic::new([
            Factor::ArithOps,
            Factor::BytesLoaded,
            Factor::BytesStored,
            Factor::Nodes,
        ])
    }
}

impl CostOrder for Lexicographic {
    fn compare(&self, a: &CostVector, b: &CostVector) -> Ordering {
        self.order
            .iter()
            .map(|&f| a.get(f).total_cmp(&b.get(f)))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

/** A static cost function for e-nodes.

A model only looks at static information: the node's operator and
parameters, its type and its operands' types. It never sees runtime values.

[`node_cost`](CostModel::node_cost) is the cost of the node alone;
[`cost`](CostModel::cost) adds in the operands' costs and by default is
their plain sum. Overriding `cost` must keep it monotone in the child
costs, or the extractor can no longer guarantee an acyclic optimum.

```
use tensor_eqsat::*;
struct OpsOnly;
impl CostModel for OpsOnly {
    fn node_cost(&self, node: &ENode, ty: Option<&TensorType>, _: &[Option<&TensorType>]) -> CostVector {
        let elems = ty.map_or(1, |t| t.num_elements()) as f64;
        let ops = if node.is_leaf() { 0.0 } else { elems };
        CostVector::zero().with(Factor::Nodes, 1.0).with(Factor::ArithOps, ops)
    }
}
```
**/
pub trait CostModel {
    /// The cost of executing `node` alone.
    fn node_cost(
        &self,
        node: &ENode,
        ty: Option<&TensorType>,
        child_types: &[Option<&TensorType>],
    ) -> CostVector;

    /// The cost of `node` including its operands.
    fn cost(
        &self,
        node: &ENode,
        ty: Option<&TensorType>,
        child_types: &[Option<&TensorType>],
        child_costs: &[CostVector],
    ) -> CostVector {
        self.node_cost(node, ty, child_types) + child_costs.iter().sum()
    }
}

/// Counts nodes; ignores types.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeCount;

impl CostModel for NodeCount {
    fn node_cost(&self, _: &ENode, _: Option<&TensorType>, _: &[Option<&TensorType>]) -> CostVector {
        CostVector::zero().with(Factor::Nodes, 1.0)
    }
}

/// Costs from an [`OpRegistry`]: the operator's own cost function if it
/// registered one, otherwise a default for its [`OpKind`].
#[derive(Debug, Clone, Copy)]
pub struct StaticCostModel<'a> {
    ops: &'a OpRegistry,
}

impl<'a> StaticCostModel<'a> {
    /// A model reading `ops`.
    pub fn new(ops: &'a OpRegistry) -> Self {
        StaticCostModel { ops }
    }
}

fn bytes(ty: Option<&TensorType>) -> f64 {
    ty.map_or(0, TensorType::size_in_bytes) as f64
}

fn elems(ty: Option<&TensorType>) -> f64 {
    ty.map_or(1, TensorType::num_elements) as f64
}

impl CostModel for StaticCostModel<'_> {
    fn node_cost(
        &self,
        node: &ENode,
        ty: Option<&TensorType>,
        child_types: &[Option<&TensorType>],
    ) -> CostVector {
        let info = self.ops.get(node.op);
        if let Some(f) = info.and_then(|i| i.cost.as_ref()) {
            return f(node, ty, child_types);
        }

        let one = CostVector::zero().with(Factor::Nodes, 1.0);
        let loaded: f64 = child_types.iter().map(|&t| bytes(t)).sum();
        match info.map_or(OpKind::Opaque, |i| i.kind) {
            // views and leaves move nothing by themselves
            OpKind::Leaf | OpKind::Reshape | OpKind::Variadic => one,
            OpKind::Reduce => one
                .with(Factor::ArithOps, child_types.iter().map(|&t| elems(t)).sum())
                .with(Factor::BytesLoaded, loaded)
                .with(Factor::BytesStored, bytes(ty)),
            OpKind::Unary | OpKind::Binary | OpKind::Opaque => one
                .with(Factor::ArithOps, elems(ty))
                .with(Factor::BytesLoaded, loaded)
                .with(Factor::BytesStored, bytes(ty)),
        }
    }
}
