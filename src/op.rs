use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use ordered_float::NotNan;
use smallvec::SmallVec;

use crate::{
    util::IndexMap, CostVector, ENode, Factor, ParseError, Symbol, TensorType,
};

/// Names of the operators a [`Session`](crate::Session) registers by default.
pub mod builtin {
    #![allow(missing_docs)]
    pub const CONST: &str = "const";
    pub const INPUT: &str = "input";

    pub const ADD: &str = "add";
    pub const SUB: &str = "sub";
    pub const MUL: &str = "mul";
    pub const DIV: &str = "div";
    pub const MAX: &str = "max";

    pub const NEG: &str = "neg";
    pub const RELU: &str = "relu";
    pub const EXP: &str = "exp";
    pub const SQRT: &str = "sqrt";
    pub const RECIP: &str = "recip";

    pub const IDENTITY: &str = "identity";
    pub const MARKER: &str = "marker";
    pub const QUANTIZE: &str = "quantize";
    pub const DEQUANTIZE: &str = "dequantize";

    pub const SUM: &str = "sum";
    pub const MEAN: &str = "mean";

    pub const RESHAPE: &str = "reshape";
    pub const TRANSPOSE: &str = "transpose";
    pub const BROADCAST: &str = "broadcast";

    pub const MATMUL: &str = "matmul";
    pub const GEMM: &str = "gemm";
    pub const GEMM_BIAS_RELU: &str = "gemm_bias_relu";

    pub const TUPLE: &str = "tuple";
    pub const GET: &str = "get";
}

/// An operator tag.
///
/// Tags are interned, so copying and comparing them is cheap. Ordering
/// follows the tag's text.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-1", serde(transparent))]
pub struct Op(Symbol);

impl Op {
    /// Makes (or looks up) the tag with this name.
    pub fn new(name: &str) -> Self {
        Op(Symbol::from(name))
    }

    /// The tag's name.
    pub fn as_str(self) -> &'static str {
        self.0.as_str()
    }
}

impl From<&str> for Op {
    fn from(name: &str) -> Self {
        Op::new(name)
    }
}

impl PartialEq<str> for Op {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for Op {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl Display for Op {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Debug for Op {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A static parameter value: a constant's value, an axis list, a target
/// shape, a quantization scale, a name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(NotNan<f64>),
    Ints(SmallVec<[i64; 4]>),
    Str(Symbol),
}

impl Literal {
    /// A float literal; `None` for NaN.
    pub fn float(f: f64) -> Option<Self> {
        NotNan::new(f).ok().map(Literal::Float)
    }

    /// An integer list literal.
    pub fn ints(values: impl IntoIterator<Item = i64>) -> Self {
        Literal::Ints(values.into_iter().collect())
    }

    /// A string literal.
    pub fn str(s: &str) -> Self {
        Literal::Str(Symbol::from(s))
    }

    /// The value as an integer, if it is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Literal::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The value as a float; integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Literal::Int(i) => Some(*i as f64),
            Literal::Float(f) => Some(f.into_inner()),
            _ => None,
        }
    }

    /// The value as an integer list.
    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            Literal::Ints(v) => Some(v),
            _ => None,
        }
    }

    /// The value as a string.
    pub fn as_str(&self) -> Option<&'static str> {
        match self {
            Literal::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Returns `true` for the literals a bare atom denotes in an expression,
    /// i.e. everything but strings.
    pub fn is_value(&self) -> bool {
        !matches!(self, Literal::Str(_))
    }

    fn needs_quote(name: &str) -> bool {
        name.starts_with('\'') || Literal::parse_value(name).is_some()
    }

    /// Parses a non-string literal: a boolean, a number or an integer list.
    pub fn parse_value(s: &str) -> Option<Self> {
        match s {
            "true" => return Some(Literal::Bool(true)),
            "false" => return Some(Literal::Bool(false)),
            _ => (),
        }
        if let Ok(i) = s.parse::<i64>() {
            return Some(Literal::Int(i));
        }
        if let Some(inner) = s.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            if inner.trim().is_empty() {
                return Some(Literal::Ints(SmallVec::new()));
            }
            return inner
                .split(',')
                .map(|x| x.trim().parse::<i64>().ok())
                .collect::<Option<SmallVec<_>>>()
                .map(Literal::Ints);
        }
        // only things that look like numbers, so `inf` stays a name
        let numeric = s.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '.');
        if numeric {
            if let Ok(f) = s.parse::<f64>() {
                return Literal::float(f);
            }
        }
        None
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Int(i) => write!(f, "{}", i),
            // Debug keeps the decimal point so the value reparses as a float
            Literal::Float(x) => write!(f, "{:?}", x.into_inner()),
            Literal::Ints(v) => {
                f.write_str("[")?;
                for (i, x) in v.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", x)?;
                }
                f.write_str("]")
            }
            // a leading quote keeps value-like names apart from values
            Literal::Str(s) if Literal::needs_quote(s.as_str()) => write!(f, "'{}", s),
            Literal::Str(s) => write!(f, "{}", s),
        }
    }
}

impl FromStr for Literal {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(name) = s.strip_prefix('\'').filter(|name| !name.is_empty()) {
            return Ok(Literal::str(name));
        }
        if let Some(lit) = Literal::parse_value(s) {
            return Ok(lit);
        }
        let is_name = !s.is_empty()
            && !s.starts_with('[')
            && s.chars().all(|c| !c.is_whitespace() && !"()@:".contains(c));
        if is_name {
            Ok(Literal::str(s))
        } else {
            Err(ParseError::Literal(s.to_owned()))
        }
    }
}

impl From<i64> for Literal {
    fn from(i: i64) -> Self {
        Literal::Int(i)
    }
}

impl From<i32> for Literal {
    fn from(i: i32) -> Self {
        Literal::Int(i.into())
    }
}

impl From<bool> for Literal {
    fn from(b: bool) -> Self {
        Literal::Bool(b)
    }
}

impl From<NotNan<f64>> for Literal {
    fn from(f: NotNan<f64>) -> Self {
        Literal::Float(f)
    }
}

/// The static parameters of a node.
pub type Params = SmallVec<[Literal; 2]>;

/// Structural category of an operator.
///
/// Generic code (default costs, arity checks) only looks at the category;
/// anything more specific is registered per tag in [`OpInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// No operands: constants and inputs.
    Leaf,
    /// One operand, elementwise.
    Unary,
    /// Two operands, elementwise with broadcasting.
    Binary,
    /// Reduces its single operand over some axes.
    Reduce,
    /// Changes only how the data is viewed.
    Reshape,
    /// Any number of operands, e.g. tuple construction.
    Variadic,
    /// Anything else; should come with its own cost function.
    Opaque,
}

impl OpKind {
    /// The operand count implied by the category, if there is one.
    pub fn default_arity(self) -> Option<usize> {
        match self {
            OpKind::Leaf => Some(0),
            OpKind::Unary | OpKind::Reduce | OpKind::Reshape => Some(1),
            OpKind::Binary => Some(2),
            OpKind::Variadic | OpKind::Opaque => None,
        }
    }
}

/// A per-operator static cost function: given the node, its output type and
/// its operands' types, the cost of executing this node alone.
pub type CostFn =
    Arc<dyn Fn(&ENode, Option<&TensorType>, &[Option<&TensorType>]) -> CostVector + Send + Sync>;

/// Everything the engine knows about one operator tag.
#[derive(Clone)]
pub struct OpInfo {
    /// The tag.
    pub op: Op,
    /// Its structural category.
    pub kind: OpKind,
    /// Required operand count, `None` if any count is fine.
    pub arity: Option<usize>,
    /// Overrides the category's default cost.
    pub cost: Option<CostFn>,
}

impl OpInfo {
    /// Describes `op` with the arity its category implies and no custom cost.
    pub fn new(op: impl Into<Op>, kind: OpKind) -> Self {
        OpInfo {
            op: op.into(),
            kind,
            arity: kind.default_arity(),
            cost: None,
        }
    }

    /// Sets the operand count.
    pub fn with_arity(self, arity: usize) -> Self {
        OpInfo {
            arity: Some(arity),
            ..self
        }
    }

    /// Sets a custom cost function.
    pub fn with_cost<F>(self, cost: F) -> Self
    where
        F: Fn(&ENode, Option<&TensorType>, &[Option<&TensorType>]) -> CostVector
            + Send
            + Sync
            + 'static,
    {
        OpInfo {
            cost: Some(Arc::new(cost)),
            ..self
        }
    }
}

impl Debug for OpInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpInfo")
            .field("op", &self.op)
            .field("kind", &self.kind)
            .field("arity", &self.arity)
            .field("cost", &self.cost.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Maps operator tags to their [`OpInfo`].
#[derive(Debug, Clone, Default)]
pub struct OpRegistry {
    ops: IndexMap<Op, OpInfo>,
}

impl OpRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every operator in [`builtin`].
    pub fn with_builtins() -> Self {
        use builtin::*;
        let mut reg = Self::new();

        for op in [CONST, INPUT] {
            reg.register(OpInfo::new(op, OpKind::Leaf));
        }
        for op in [ADD, SUB, MUL, DIV, MAX] {
            reg.register(OpInfo::new(op, OpKind::Binary));
        }
        for op in [NEG, RELU, EXP, SQRT, RECIP, QUANTIZE, DEQUANTIZE] {
            reg.register(OpInfo::new(op, OpKind::Unary));
        }
        // markers vanish before codegen, they never cost anything but a node
        for op in [IDENTITY, MARKER] {
            reg.register(
                OpInfo::new(op, OpKind::Unary)
                    .with_cost(|_, _, _| CostVector::zero().with(Factor::Nodes, 1.0)),
            );
        }
        for op in [SUM, MEAN] {
            reg.register(OpInfo::new(op, OpKind::Reduce));
        }
        for op in [RESHAPE, TRANSPOSE, BROADCAST] {
            reg.register(OpInfo::new(op, OpKind::Reshape));
        }
        for op in [MATMUL, GEMM] {
            reg.register(
                OpInfo::new(op, OpKind::Opaque)
                    .with_arity(2)
                    .with_cost(|_, ty, children| matmul_cost(ty, children, 0.0)),
            );
        }
        reg.register(
            OpInfo::new(GEMM_BIAS_RELU, OpKind::Opaque)
                .with_arity(3)
                .with_cost(|_, ty, children| matmul_cost(ty, children, 2.0)),
        );
        reg.register(OpInfo::new(TUPLE, OpKind::Variadic));
        reg.register(OpInfo::new(GET, OpKind::Opaque).with_arity(1).with_cost(
            |_, _, _| CostVector::zero().with(Factor::Nodes, 1.0),
        ));

        reg
    }

    /// Registers (or replaces) an operator, returning the old entry.
    pub fn register(&mut self, info: OpInfo) -> Option<OpInfo> {
        log::trace!("Registering operator {:?}", info);
        self.ops.insert(info.op, info)
    }

    /// Looks up an operator.
    pub fn get(&self, op: Op) -> Option<&OpInfo> {
        self.ops.get(&op)
    }

    /// The category of an operator; unregistered tags are [`OpKind::Opaque`].
    pub fn kind(&self, op: Op) -> OpKind {
        self.get(op).map_or(OpKind::Opaque, |info| info.kind)
    }

    /// Returns `true` if the node's operand count agrees with its
    /// registration. Unregistered operators accept anything.
    pub fn arity_ok(&self, node: &ENode) -> bool {
        match self.get(node.op).and_then(|info| info.arity) {
            Some(arity) => arity == node.len(),
            None => true,
        }
    }

    /// Number of registered operators.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Iterates over the registered operators in registration order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &OpInfo> {
        self.ops.values()
    }
}

/// Cost of a (batched) matrix product plus `extra_per_output` elementwise
/// operations per output element.
fn matmul_cost(
    ty: Option<&TensorType>,
    children: &[Option<&TensorType>],
    extra_per_output: f64,
) -> CostVector {
    let out_elems = ty.map_or(1, TensorType::num_elements) as f64;
    let inner = children
        .first()
        .copied()
        .flatten()
        .and_then(|a| a.shape.last().copied())
        .unwrap_or(1) as f64;
    let loaded: usize = children
        .iter()
        .map(|c| c.map_or(0, TensorType::size_in_bytes))
        .sum();
    CostVector::zero()
        .with(Factor::Nodes, 1.0)
        .with(Factor::ArithOps, out_elems * (2.0 * inner + extra_per_output))
        .with(Factor::BytesLoaded, loaded as f64)
        .with(Factor::BytesStored, ty.map_or(0, TensorType::size_in_bytes) as f64)
}
