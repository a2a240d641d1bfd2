use std::fmt::{self, Debug, Display, Formatter};
use std::ops::Index;
use std::str::FromStr;

use smallvec::SmallVec;
use symbolic_expressions::Sexp;

use crate::{builtin, util::pretty_print, Id, Literal, Op, Params, ParseError, TensorType};

/// A node of a tensor program: an operator tag, its static parameters and
/// its operands.
///
/// Inside an [`EGraph`](crate::EGraph) the children are e-class ids; inside a
/// [`RecExpr`] they index earlier nodes of the same expression.
///
/// Nodes are ordered by operator text, then parameters, then children. The
/// extractor relies on that order to break ties.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct ENode {
    /// The operator.
    pub op: Op,
    /// Static parameters, compared for equality like the tag.
    pub params: Params,
    /// Operands.
    pub children: SmallVec<[Id; 2]>,
}

impl ENode {
    /// Makes a node without parameters.
    pub fn new(op: impl Into<Op>, children: impl IntoIterator<Item = Id>) -> Self {
        ENode {
            op: op.into(),
            params: Params::new(),
            children: children.into_iter().collect(),
        }
    }

    /// Makes a node without parameters or children.
    pub fn leaf(op: impl Into<Op>) -> Self {
        Self::new(op, None)
    }

    /// A `const` leaf holding `value`.
    pub fn constant(value: impl Into<Literal>) -> Self {
        Self::leaf(builtin::CONST).with_params([value.into()])
    }

    /// An `input` leaf named `name`.
    pub fn input(name: &str) -> Self {
        Self::leaf(builtin::INPUT).with_params([Literal::str(name)])
    }

    /// Replaces the parameters.
    pub fn with_params(mut self, params: impl IntoIterator<Item = Literal>) -> Self {
        self.params = params.into_iter().collect();
        self
    }

    /// Returns true if this node has the same operator, parameters and
    /// operand count as `other`, ignoring the operands themselves.
    pub fn matches(&self, other: &Self) -> bool {
        self.op == other.op && self.params == other.params && self.len() == other.len()
    }

    /// The operands.
    pub fn children(&self) -> &[Id] {
        &self.children
    }

    /// Mutable access to the operands.
    pub fn children_mut(&mut self) -> &mut [Id] {
        &mut self.children
    }

    /// Number of operands.
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Returns true if the node has no operands.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Runs `f` on each operand.
    pub fn for_each(&self, f: impl FnMut(Id)) {
        self.children.iter().copied().for_each(f)
    }

    /// Returns true if `f` holds for every operand.
    pub fn all(&self, mut f: impl FnMut(Id) -> bool) -> bool {
        self.children.iter().all(|&id| f(id))
    }

    /// Rewrites each operand in place.
    pub fn update_children(&mut self, mut f: impl FnMut(Id) -> Id) {
        self.children.iter_mut().for_each(|id| *id = f(*id))
    }

    /// A copy of this node with each operand rewritten.
    pub fn map_children(mut self, f: impl FnMut(Id) -> Id) -> Self {
        self.update_children(f);
        self
    }

    /// The value of a `const` leaf.
    pub fn literal(&self) -> Option<&Literal> {
        match self.params.first() {
            Some(lit) if self.op == builtin::CONST && self.is_leaf() => Some(lit),
            _ => None,
        }
    }

    /// The `i`-th parameter.
    pub fn param(&self, i: usize) -> Option<&Literal> {
        self.params.get(i)
    }

    /// The short atom this leaf prints as, if it has one: the bare value of
    /// a constant or the bare name of an input. Names that would read back
    /// as something else print in full, e.g. `input@'3`.
    fn short_atom(&self) -> Option<String> {
        if !self.is_leaf() || self.params.len() != 1 {
            return None;
        }
        let p = &self.params[0];
        if self.op == builtin::CONST && p.is_value() {
            Some(p.to_string())
        } else if self.op == builtin::INPUT && !p.is_value() {
            let name = p.to_string();
            let plain = !name.starts_with('\'') && name != builtin::CONST && name != builtin::INPUT;
            Some(name).filter(|_| plain)
        } else {
            None
        }
    }
}

/// Prints the head token, `op@param@param`.
impl Display for ENode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op)?;
        for p in &self.params {
            write!(f, "@{}", p)?;
        }
        Ok(())
    }
}

impl Debug for ENode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)?;
        if !self.is_leaf() {
            f.debug_list().entries(self.children.iter()).finish()?;
        }
        Ok(())
    }
}

/// The pieces of a head token: operator, parameters and an optional type.
pub(crate) struct Head<'a> {
    pub op: &'a str,
    pub params: Params,
    pub ty: Option<TensorType>,
}

/// Splits `op@p1@p2:dtype[dims]` into its parts.
pub(crate) fn parse_head(s: &str) -> Result<Head<'_>, ParseError> {
    let (head, ty) = match s.split_once(':') {
        Some((head, ty)) => (head, Some(ty.parse::<TensorType>()?)),
        None => (s, None),
    };
    let mut parts = head.split('@');
    let op = parts.next().unwrap_or_default();
    if op.is_empty() {
        return Err(ParseError::BadHead(s.to_owned()));
    }
    let params = parts.map(str::parse).collect::<Result<_, _>>()?;
    Ok(Head { op, params, ty })
}

/// A tensor program as a flat list of nodes.
///
/// This type is an arena of [`ENode`]s whose children index earlier entries,
/// so a subterm shared several times is stored once. The last node is the
/// root.
///
/// Each node may carry a [`TensorType`].
///
/// # Text form
///
/// `(op@param@param:type child ...)`. A leaf may be written without
/// parentheses. A bare number, boolean or `[..]` list is a constant and any
/// other bare atom is a named input, so `(add x 1)` is
/// `(add input@x const@1)`.
///
/// ```
/// use tensor_eqsat::*;
/// let e: RecExpr = "(matmul a:f32[2,3] b:f32[3,4])".parse().unwrap();
/// assert_eq!(e.len(), 3);
/// assert_eq!(e.ty(0.into()).unwrap().to_string(), "f32[2,3]");
/// assert_eq!(e.to_string(), "(matmul a:f32[2,3] b:f32[3,4])");
/// ```
#[derive(Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct RecExpr {
    nodes: Vec<ENode>,
    types: Vec<Option<TensorType>>,
}

impl RecExpr {
    /// Adds an untyped node.
    /// The node's children must refer to nodes already in this expression.
    pub fn add(&mut self, node: ENode) -> Id {
        self.add_typed(node, None)
    }

    /// Adds a node with an optional type.
    pub fn add_typed(&mut self, node: ENode, ty: Option<TensorType>) -> Id {
        debug_assert!(
            node.all(|id| usize::from(id) < self.nodes.len()),
            "node {:?} has children not in this expr: {:?}",
            node,
            self
        );
        self.nodes.push(node);
        self.types.push(ty);
        Id::from(self.nodes.len() - 1)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the expression has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The id of the root, i.e. the last node.
    ///
    /// # Panics
    /// If the expression is empty.
    pub fn root(&self) -> Id {
        assert!(!self.is_empty(), "empty expression has no root");
        Id::from(self.nodes.len() - 1)
    }

    /// All nodes, children first.
    pub fn nodes(&self) -> &[ENode] {
        &self.nodes
    }

    /// The type of a node, if one was given.
    pub fn ty(&self, id: Id) -> Option<&TensorType> {
        self.types[usize::from(id)].as_ref()
    }

    /// Sets the type of a node.
    pub fn set_ty(&mut self, id: Id, ty: Option<TensorType>) {
        self.types[usize::from(id)] = ty;
    }

    fn to_sexp(&self, id: Id) -> Sexp {
        let node = &self[id];
        let mut head = node.short_atom().unwrap_or_else(|| node.to_string());
        if let Some(ty) = self.ty(id) {
            head = format!("{}:{}", head, ty);
        }
        if node.is_leaf() {
            Sexp::String(head)
        } else {
            let mut list = vec![Sexp::String(head)];
            node.for_each(|child| list.push(self.to_sexp(child)));
            Sexp::List(list)
        }
    }

    /// Pretty print with a maximum line length.
    ///
    /// ```
    /// use tensor_eqsat::*;
    /// let e: RecExpr = "(mul (add 2 2) (add x y))".parse().unwrap();
    /// assert_eq!(e.pretty(10), "
    /// (mul
    ///   (add 2 2)
    ///   (add x y))
    /// ".trim());
    /// ```
    pub fn pretty(&self, width: usize) -> String {
        let mut buf = String::new();
        if !self.is_empty() {
            let sexp = self.to_sexp(self.root());
            // writing into a String cannot fail
            let _ = pretty_print(&mut buf, &sexp, width, 1);
        }
        buf
    }
}

impl From<Vec<ENode>> for RecExpr {
    fn from(nodes: Vec<ENode>) -> Self {
        let types = vec![None; nodes.len()];
        RecExpr { nodes, types }
    }
}

impl Index<Id> for RecExpr {
    type Output = ENode;
    fn index(&self, id: Id) -> &ENode {
        &self.nodes[usize::from(id)]
    }
}

impl Display for RecExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("()")
        } else {
            f.write_str(&self.pretty(usize::MAX))
        }
    }
}

impl Debug for RecExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// Builds the node an atom stands for: a constant for a bare value, an input
/// for any other bare name, or a childless node for a full head token.
pub(crate) fn atom_node(head: Head<'_>, children: SmallVec<[Id; 2]>) -> ENode {
    if head.params.is_empty() && children.is_empty() {
        if let Some(lit) = Literal::parse_value(head.op) {
            return ENode::constant(lit);
        }
        if head.op != builtin::CONST && head.op != builtin::INPUT {
            return ENode::input(head.op);
        }
    }
    ENode {
        op: Op::new(head.op),
        params: head.params,
        children,
    }
}

pub(crate) fn parse_sexp(s: &str) -> Result<Sexp, ParseError> {
    symbolic_expressions::parser::parse_str(s.trim()).map_err(|e| ParseError::Sexp(e.to_string()))
}

impl FromStr for RecExpr {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        fn parse_sexp_into(sexp: &Sexp, expr: &mut RecExpr) -> Result<Id, ParseError> {
            match sexp {
                Sexp::Empty => Err(ParseError::Empty),
                Sexp::String(s) => {
                    let head = parse_head(s)?;
                    let ty = head.ty.clone();
                    Ok(expr.add_typed(atom_node(head, SmallVec::new()), ty))
                }
                Sexp::List(list) if list.is_empty() => Err(ParseError::Empty),
                Sexp::List(list) => match &list[0] {
                    Sexp::String(op) => {
                        let head = parse_head(op)?;
                        let children = list[1..]
                            .iter()
                            .map(|s| parse_sexp_into(s, expr))
                            .collect::<Result<SmallVec<_>, _>>()?;
                        let ty = head.ty.clone();
                        let node = ENode {
                            op: Op::new(head.op),
                            params: head.params,
                            children,
                        };
                        Ok(expr.add_typed(node, ty))
                    }
                    other => Err(ParseError::BadHead(other.to_string())),
                },
            }
        }

        let mut expr = RecExpr::default();
        parse_sexp_into(&parse_sexp(s)?, &mut expr)?;
        Ok(expr)
    }
}
