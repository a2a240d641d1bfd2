use thiserror::Error;

use crate::{BuildError, ENode, Id, Subst, Var};

/// Errors from parsing expressions, patterns, types or literals.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The text is not a well formed s-expression.
    #[error("bad s-expression: {0}")]
    Sexp(String),
    /// An empty list or empty input.
    #[error("found an empty s-expression")]
    Empty,
    /// A list whose head is not an operator.
    #[error("expected an operator in head position, found {0}")]
    BadHead(String),
    /// A malformed `dtype[dims]` type tag.
    #[error("bad type tag '{0}'")]
    Type(String),
    /// A malformed parameter literal.
    #[error("bad literal '{0}'")]
    Literal(String),
    /// A malformed pattern variable.
    #[error("bad pattern variable '{0}', variables start with '?'")]
    Var(String),
    /// A `?xs...` tail that is not the last argument.
    #[error("variadic tail '{0}' must be the last argument")]
    Variadic(String),
}

/// The error type of this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A rule's builder failed. This is a bug in the rule, so the running
    /// pass is aborted.
    #[error("rule '{rule}' failed on e-class {eclass} with {subst:?}: {source}")]
    RuleFailed {
        /// Name of the failing rule.
        rule: String,
        /// The e-class the rule matched.
        eclass: Id,
        /// The substitution handed to the builder.
        subst: Subst,
        /// What the builder reported.
        source: BuildError,
    },

    /// No finite, acyclic choice exists for an e-class.
    #[error("no acyclic finite-cost choice for e-class {eclass}, members: {nodes:?}")]
    Extraction {
        /// The offending e-class.
        eclass: Id,
        /// All of its member nodes.
        nodes: Vec<ENode>,
    },

    /// A right-hand side pattern refers to a variable the left-hand side
    /// never binds.
    #[error("rule '{rule}' uses {var} on its right-hand side but never binds it")]
    UnboundVar {
        /// Name of the rule.
        rule: String,
        /// The unbound variable.
        var: Var,
    },

    /// No rule set of that name is registered in the session.
    #[error("no rule set named '{0}'")]
    UnknownRuleSet(String),

    /// An internal e-graph invariant does not hold.
    #[error("e-graph invariant violated: {0}")]
    Invariant(String),

    /// Parsing failed.
    #[error(transparent)]
    Parse(#[from] ParseError),
}
