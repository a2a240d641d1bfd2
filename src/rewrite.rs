use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use thiserror::Error;

use crate::{
    pattern::{Args, LiteralMatch, ParamMatch},
    EGraph, ENode, Error, Id, Literal, Params, Pattern, RecExpr, SearchMatches, Subst,
    TensorType, Var,
};

/// A failing [`Builder`].
///
/// This is for rule bugs only: a builder that merely does not apply to a
/// match returns `Ok(None)` instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct BuildError(pub String);

impl BuildError {
    /// Makes an error with the given message.
    pub fn new(msg: impl Into<String>) -> Self {
        BuildError(msg.into())
    }
}

/// One entry of a [`Template`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateNode {
    /// An e-class that already exists.
    Class(Id),
    /// A new node whose children index earlier template entries.
    Node {
        /// The node.
        node: ENode,
        /// Its type, if the builder knows it.
        ty: Option<TensorType>,
    },
}

/// What a [`Builder`] produces: a small expression to add to the e-graph,
/// whose leaves may be existing e-classes.
///
/// Entries are added in order, children before parents, and the last entry
/// is the root that gets unioned with the matched class.
///
/// ```
/// use tensor_eqsat::*;
/// let mut egraph = EGraph::default();
/// let x = egraph.add(ENode::input("x"));
///
/// let mut t = Template::default();
/// let a = t.class(x);
/// let two = t.add(ENode::constant(2));
/// t.add(ENode::new("mul", [a, two]));
/// assert_eq!(t.len(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Template {
    nodes: Vec<TemplateNode>,
}

impl Template {
    /// A template that is just an existing class.
    pub fn of_class(id: Id) -> Self {
        let mut t = Template::default();
        t.class(id);
        t
    }

    /// A template holding a copy of `expr`, types included.
    pub fn from_expr(expr: &RecExpr) -> Self {
        let nodes = expr
            .nodes()
            .iter()
            .enumerate()
            .map(|(i, node)| TemplateNode::Node {
                node: node.clone(),
                ty: expr.ty(Id::from(i)).cloned(),
            })
            .collect();
        Template { nodes }
    }

    /// A template for a single typed constant.
    pub fn constant(value: impl Into<Literal>, ty: Option<TensorType>) -> Self {
        let mut t = Template::default();
        t.add_typed(ENode::constant(value), ty);
        t
    }

    /// Refers to an existing class, returning the entry's index.
    pub fn class(&mut self, id: Id) -> Id {
        self.push(TemplateNode::Class(id))
    }

    /// Adds an untyped node, returning the entry's index.
    pub fn add(&mut self, node: ENode) -> Id {
        self.add_typed(node, None)
    }

    /// Adds a node with a type.
    pub fn add_typed(&mut self, node: ENode, ty: Option<TensorType>) -> Id {
        self.push(TemplateNode::Node { node, ty })
    }

    fn push(&mut self, entry: TemplateNode) -> Id {
        self.nodes.push(entry);
        Id::from(self.nodes.len() - 1)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The entries, children first.
    pub fn entries(&self) -> &[TemplateNode] {
        &self.nodes
    }

    /// Adds the template to the e-graph, returning the root's class.
    pub(crate) fn add_to(&self, egraph: &mut EGraph) -> Result<Id, BuildError> {
        let mut ids: Vec<Id> = Vec::with_capacity(self.nodes.len());
        for (i, entry) in self.nodes.iter().enumerate() {
            let id = match entry {
                TemplateNode::Class(id) if usize::from(*id) < egraph.number_of_ids() => *id,
                TemplateNode::Class(id) => {
                    return Err(BuildError(format!("e-class {} does not exist", id)))
                }
                TemplateNode::Node { node, ty } => {
                    if let Some(&bad) = node.children().iter().find(|&&c| usize::from(c) >= i) {
                        return Err(BuildError(format!(
                            "template entry {} ({:?}) refers to later entry {}",
                            i, node, bad
                        )));
                    }
                    let node = node.clone().map_children(|c| ids[usize::from(c)]);
                    egraph.add_with_type(node, ty.clone())
                }
            };
            ids.push(id);
        }
        ids.last()
            .copied()
            .ok_or_else(|| BuildError::new("empty template"))
    }
}

/// The righthand side of a [`Rewrite`].
///
/// A builder looks at a match and either produces a [`Template`] equivalent
/// to the matched class, declines with `Ok(None)` (a guard rejecting the
/// match, which is ordinary control flow), or fails with a [`BuildError`],
/// which means the rule itself is broken and aborts the run.
///
/// Closures of the right shape are builders, see [`Rewrite::from_fn`]:
/// ```
/// use tensor_eqsat::*;
/// let double = Rewrite::from_fn(
///     "double",
///     "(add ?x ?x)".parse().unwrap(),
///     |_, _, subst| {
///         let mut t = Template::default();
///         let x = t.class(subst[Var::new("x")]);
///         let two = t.add(ENode::constant(2));
///         t.add(ENode::new("mul", [x, two]));
///         Ok(Some(t))
///     },
/// ).unwrap();
/// assert_eq!(double.name(), "double");
/// ```
/// and so are [`Pattern`]s, which are instantiated with the substitution.
pub trait Builder: Send + Sync {
    /// Builds the replacement for one match.
    fn build(
        &self,
        egraph: &EGraph,
        eclass: Id,
        subst: &Subst,
    ) -> Result<Option<Template>, BuildError>;

    /// The variables this builder needs from the substitution, checked
    /// against the left-hand side when the rewrite is made.
    fn vars(&self) -> Vec<Var> {
        vec![]
    }
}

impl<F> Builder for F
where
    F: Fn(&EGraph, Id, &Subst) -> Result<Option<Template>, BuildError> + Send + Sync,
{
    fn build(
        &self,
        egraph: &EGraph,
        eclass: Id,
        subst: &Subst,
    ) -> Result<Option<Template>, BuildError> {
        self(egraph, eclass, subst)
    }
}

impl Builder for Pattern {
    fn build(&self, _: &EGraph, _: Id, subst: &Subst) -> Result<Option<Template>, BuildError> {
        let mut template = Template::default();
        instantiate(self, subst, &mut template)?;
        Ok(Some(template))
    }

    fn vars(&self) -> Vec<Var> {
        Pattern::vars(self)
    }
}

fn instantiate(pat: &Pattern, subst: &Subst, t: &mut Template) -> Result<Id, BuildError> {
    let unbound = |var: &Var| BuildError(format!("{} is not bound to the right kind of value", var));
    match pat {
        Pattern::Var { var, .. } => {
            let id = subst.class(*var).ok_or_else(|| unbound(var))?;
            Ok(t.class(id))
        }
        Pattern::Literal { var: Some(var), .. } => {
            let lit = subst.literal(*var).ok_or_else(|| unbound(var))?;
            Ok(t.add(ENode::constant(lit.clone())))
        }
        Pattern::Literal {
            matcher: LiteralMatch::Exact(lit),
            var: None,
        } => Ok(t.add(ENode::constant(lit.clone()))),
        Pattern::Op { op, params, args } => {
            let params: Params = match params {
                ParamMatch::Any => Params::new(),
                ParamMatch::Exact(ps) => ps.clone(),
                ParamMatch::Bind(var) => subst.params(*var).ok_or_else(|| unbound(var))?.clone(),
                ParamMatch::Where(_) => {
                    return Err(BuildError::new("cannot build parameters from a predicate"))
                }
            };
            let children = match args {
                Args::Exact(pats) => pats
                    .iter()
                    .map(|p| instantiate(p, subst, t))
                    .collect::<Result<Vec<_>, _>>()?,
                Args::Variadic { prefix, rest } => {
                    let mut children = prefix
                        .iter()
                        .map(|p| instantiate(p, subst, t))
                        .collect::<Result<Vec<_>, _>>()?;
                    let list = subst.list(*rest).ok_or_else(|| unbound(rest))?;
                    children.extend(list.iter().map(|&id| t.class(id)));
                    children
                }
                Args::Repeat(_) => {
                    return Err(BuildError::new("cannot build a repeated operand pattern"))
                }
            };
            Ok(t.add(ENode::new(*op, children).with_params(params)))
        }
        other => Err(BuildError(format!("cannot build {}", other))),
    }
}

/// A rewrite rule: a [`Pattern`] to find and a [`Builder`] for the
/// equivalent replacement.
///
/// The [`rewrite!`](crate::rewrite!) macro is the easiest way to make one.
#[derive(Clone)]
pub struct Rewrite {
    name: String,
    pattern: Pattern,
    builder: Arc<dyn Builder>,
}

impl Rewrite {
    /// Create a new [`Rewrite`].
    ///
    /// Fails with [`Error::UnboundVar`] if the builder needs a variable the
    /// pattern never binds.
    pub fn new(
        name: impl Into<String>,
        pattern: Pattern,
        builder: impl Builder + 'static,
    ) -> Result<Self, Error> {
        let name = name.into();
        let bound = pattern.vars();
        if let Some(var) = builder.vars().into_iter().find(|v| !bound.contains(v)) {
            return Err(Error::UnboundVar { rule: name, var });
        }
        Ok(Rewrite {
            name,
            pattern,
            builder: Arc::new(builder),
        })
    }

    /// Like [`new`](Rewrite::new) with a closure builder, so the closure's
    /// argument types can be inferred.
    pub fn from_fn<F>(name: impl Into<String>, pattern: Pattern, builder: F) -> Result<Self, Error>
    where
        F: Fn(&EGraph, Id, &Subst) -> Result<Option<Template>, BuildError>
            + Send
            + Sync
            + 'static,
    {
        Self::new(name, pattern, builder)
    }

    /// Returns the name of the rewrite.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The left-hand side.
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Finds every match in a clean e-graph.
    pub fn search(&self, egraph: &EGraph) -> Vec<SearchMatches> {
        self.pattern.search(egraph)
    }

    /// Builds and adds the replacement for every match and unions it with
    /// the matched class, returning the classes that grew through a union.
    ///
    /// A builder failure aborts with [`Error::RuleFailed`]; whatever was
    /// applied before stays in the graph.
    pub fn apply(&self, egraph: &mut EGraph, matches: &[SearchMatches]) -> Result<Vec<Id>, Error> {
        let mut changed = vec![];
        for m in matches {
            for subst in &m.substs {
                let failed = |source| Error::RuleFailed {
                    rule: self.name.clone(),
                    eclass: m.eclass,
                    subst: subst.clone(),
                    source,
                };
                let template = match self.builder.build(egraph, m.eclass, subst) {
                    Ok(Some(template)) => template,
                    Ok(None) => {
                        log::trace!("{} declined e-class {} with {:?}", self.name, m.eclass, subst);
                        continue;
                    }
                    Err(e) => return Err(failed(e)),
                };
                let new = template.add_to(egraph).map_err(failed)?;
                if egraph.union(m.eclass, new) {
                    changed.push(egraph.find(m.eclass));
                }
            }
        }
        Ok(changed)
    }

    /// Searches and applies in one go. Tests only; use a
    /// [`Runner`](crate::Runner) otherwise.
    #[cfg(test)]
    pub(crate) fn run(&self, egraph: &mut EGraph) -> Result<Vec<Id>, Error> {
        let start = instant::Instant::now();

        let matches = self.search(egraph);
        log::debug!("Found rewrite {} {} times", self.name, matches.len());

        let ids = self.apply(egraph, &matches)?;
        let elapsed = start.elapsed();
        log::debug!(
            "Applied rewrite {} {} times in {}.{:03}",
            self.name,
            ids.len(),
            elapsed.as_secs(),
            elapsed.subsec_millis()
        );
        Ok(ids)
    }
}

impl Debug for Rewrite {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rewrite")
            .field("name", &self.name)
            .field("pattern", &self.pattern)
            .finish()
    }
}
