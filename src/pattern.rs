use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use log::*;
use smallvec::SmallVec;
use symbolic_expressions::Sexp;

use crate::{
    builtin,
    language::{parse_head, parse_sexp},
    util::IndexSet,
    Binding, EGraph, ENode, Id, Literal, Op, Params, ParseError, RecExpr, Subst, Var,
};

/// A predicate on the class a pattern variable is about to bind.
pub type ClassGuard = Arc<dyn Fn(&EGraph, Id) -> bool + Send + Sync>;
/// A predicate on a node's parameters.
pub type ParamGuard = Arc<dyn Fn(&Params) -> bool + Send + Sync>;
/// A predicate on a constant's value.
pub type LiteralGuard = Arc<dyn Fn(&Literal) -> bool + Send + Sync>;

/// A pattern that can match e-classes of an [`EGraph`].
///
/// Matching is against a class, not a single node: every member is tried,
/// and every combination of member choices in the child classes that
/// satisfies the pattern yields a [`Subst`]. All distinct substitutions are
/// returned, never just the first.
///
/// # Text form
///
/// Patterns parse from s-expressions like [`RecExpr`]s do, plus:
/// - `?x` is a variable binding a whole class,
/// - `?xs...` as the last operand binds the remaining operands as a list,
/// - `op@?p` binds the node's parameter list to `?p`,
/// - `const@?c` binds the value of a constant member to `?c`,
/// - an operator written without `@` matches any parameters.
///
/// ```
/// use tensor_eqsat::*;
/// let expr: RecExpr = "(add x (mul y 1))".parse().unwrap();
/// let (egraph, _) = EGraph::from_exprs([&expr]);
///
/// let pat: Pattern = "(mul ?a 1)".parse().unwrap();
/// let matches = pat.search(&egraph);
/// assert_eq!(matches.len(), 1);
///
/// let y = egraph.lookup(&ENode::input("y")).unwrap();
/// assert_eq!(matches[0].substs[0][Var::new("a")], y);
/// ```
#[derive(Clone)]
pub enum Pattern {
    /// Binds the matched class, if the guard allows it.
    Var {
        /// The variable to bind.
        var: Var,
        /// Extra condition on the class.
        guard: Option<ClassGuard>,
    },
    /// Matches member nodes with this operator.
    Op {
        /// The operator tag.
        op: Op,
        /// How the node's parameters must look.
        params: ParamMatch,
        /// How the node's operands must look.
        args: Args,
    },
    /// Matches a class with a `const` member whose value passes the
    /// matcher, optionally binding that value.
    Literal {
        /// The condition on the value.
        matcher: LiteralMatch,
        /// Where to bind the value.
        var: Option<Var>,
    },
    /// Matches whatever any of the alternatives match.
    Any(Vec<Pattern>),
}

/// How a [`Pattern::Op`] treats the node's parameters.
#[derive(Clone)]
pub enum ParamMatch {
    /// Anything goes.
    Any,
    /// Parameters must be exactly these.
    Exact(Params),
    /// Parameters must satisfy the predicate.
    Where(ParamGuard),
    /// Binds the parameters; a second binding of the same variable must be
    /// equal.
    Bind(Var),
}

/// How a [`Pattern::Op`] treats the node's operands.
#[derive(Clone)]
pub enum Args {
    /// Exactly one sub-pattern per operand.
    Exact(Vec<Pattern>),
    /// Some leading sub-patterns, then any number of operands bound as a
    /// list.
    Variadic {
        /// Patterns for the leading operands.
        prefix: Vec<Pattern>,
        /// Binds the remaining operands.
        rest: Var,
    },
    /// Any number of operands, each matching the pattern.
    Repeat(Box<Pattern>),
}

/// How a [`Pattern::Literal`] treats the constant's value.
#[derive(Clone)]
pub enum LiteralMatch {
    /// Any constant.
    Any,
    /// Exactly this constant.
    Exact(Literal),
    /// A constant satisfying the predicate.
    Where(LiteralGuard),
}

impl ParamMatch {
    fn search(&self, params: &Params, subst: Subst) -> Option<Subst> {
        match self {
            ParamMatch::Any => Some(subst),
            ParamMatch::Exact(ps) => (ps == params).then_some(subst),
            ParamMatch::Where(f) => f(params).then_some(subst),
            ParamMatch::Bind(var) => bind(subst, *var, Binding::Params(params.clone())),
        }
    }
}

impl LiteralMatch {
    fn matches(&self, lit: &Literal) -> bool {
        match self {
            LiteralMatch::Any => true,
            LiteralMatch::Exact(l) => l == lit,
            LiteralMatch::Where(f) => f(lit),
        }
    }
}

/// Binds `var`, or checks an existing binding agrees.
fn bind(mut subst: Subst, var: Var, binding: Binding) -> Option<Subst> {
    match subst.get(var) {
        Some(old) if *old != binding => None,
        Some(_) => Some(subst),
        None => {
            subst.insert(var, binding);
            Some(subst)
        }
    }
}

impl Pattern {
    /// A variable matching any class.
    pub fn var(name: &str) -> Self {
        Pattern::Var {
            var: Var::new(name),
            guard: None,
        }
    }

    /// A variable matching classes that pass `guard`.
    pub fn var_where<F>(name: &str, guard: F) -> Self
    where
        F: Fn(&EGraph, Id) -> bool + Send + Sync + 'static,
    {
        Pattern::Var {
            var: Var::new(name),
            guard: Some(Arc::new(guard)),
        }
    }

    /// An operator with any parameters and one sub-pattern per operand.
    pub fn op(op: impl Into<Op>, args: impl IntoIterator<Item = Pattern>) -> Self {
        Pattern::Op {
            op: op.into(),
            params: ParamMatch::Any,
            args: Args::Exact(args.into_iter().collect()),
        }
    }

    /// An operator with any parameters and any number of operands bound to
    /// `rest` after the `prefix`.
    pub fn variadic(
        op: impl Into<Op>,
        prefix: impl IntoIterator<Item = Pattern>,
        rest: &str,
    ) -> Self {
        Pattern::Op {
            op: op.into(),
            params: ParamMatch::Any,
            args: Args::Variadic {
                prefix: prefix.into_iter().collect(),
                rest: Var::new(rest),
            },
        }
    }

    /// An operator with any parameters whose operands all match `each`.
    pub fn repeat(op: impl Into<Op>, each: Pattern) -> Self {
        Pattern::Op {
            op: op.into(),
            params: ParamMatch::Any,
            args: Args::Repeat(Box::new(each)),
        }
    }

    /// Replaces the parameter matcher of an operator pattern.
    ///
    /// # Panics
    /// If `self` is not [`Pattern::Op`].
    pub fn with_params(self, matcher: ParamMatch) -> Self {
        match self {
            Pattern::Op { op, args, .. } => Pattern::Op {
                op,
                params: matcher,
                args,
            },
            other => panic!("only operator patterns have parameters: {}", other),
        }
    }

    /// Requires the operator's parameters to satisfy `guard`.
    pub fn params_where<F>(self, guard: F) -> Self
    where
        F: Fn(&Params) -> bool + Send + Sync + 'static,
    {
        self.with_params(ParamMatch::Where(Arc::new(guard)))
    }

    /// Exactly this constant.
    pub fn literal(lit: impl Into<Literal>) -> Self {
        Pattern::Literal {
            matcher: LiteralMatch::Exact(lit.into()),
            var: None,
        }
    }

    /// Any constant, binding its value to `name`.
    pub fn literal_var(name: &str) -> Self {
        Pattern::Literal {
            matcher: LiteralMatch::Any,
            var: Some(Var::new(name)),
        }
    }

    /// Any constant satisfying `guard`, binding its value to `name`.
    pub fn literal_where<F>(name: &str, guard: F) -> Self
    where
        F: Fn(&Literal) -> bool + Send + Sync + 'static,
    {
        Pattern::Literal {
            matcher: LiteralMatch::Where(Arc::new(guard)),
            var: Some(Var::new(name)),
        }
    }

    /// Whatever any of `alts` match.
    pub fn any(alts: impl IntoIterator<Item = Pattern>) -> Self {
        Pattern::Any(alts.into_iter().collect())
    }

    /// A pattern matching exactly the given expression.
    pub fn from_expr(expr: &RecExpr) -> Self {
        fn build(expr: &RecExpr, id: Id) -> Pattern {
            let node = &expr[id];
            if let Some(lit) = node.literal().filter(|l| l.is_value()) {
                return Pattern::literal(lit.clone());
            }
            Pattern::Op {
                op: node.op,
                params: ParamMatch::Exact(node.params.clone()),
                args: Args::Exact(node.children().iter().map(|&c| build(expr, c)).collect()),
            }
        }
        build(expr, expr.root())
    }

    /// Returns the variables this pattern binds, in order of first
    /// occurrence.
    pub fn vars(&self) -> Vec<Var> {
        fn go(pat: &Pattern, vars: &mut IndexSet<Var>) {
            match pat {
                Pattern::Var { var, .. } => {
                    vars.insert(*var);
                }
                Pattern::Literal { var, .. } => vars.extend(*var),
                Pattern::Any(alts) => alts.iter().for_each(|p| go(p, vars)),
                Pattern::Op { params, args, .. } => {
                    if let ParamMatch::Bind(v) = params {
                        vars.insert(*v);
                    }
                    match args {
                        Args::Exact(ps) => ps.iter().for_each(|p| go(p, vars)),
                        Args::Variadic { prefix, rest } => {
                            prefix.iter().for_each(|p| go(p, vars));
                            vars.insert(*rest);
                        }
                        Args::Repeat(p) => go(p, vars),
                    }
                }
            }
        }
        let mut vars = IndexSet::default();
        go(self, &mut vars);
        vars.into_iter().collect()
    }

    /// Searches every class of the egraph.
    ///
    /// The egraph must be clean, see [`EGraph::rebuild`].
    pub fn search(&self, egraph: &EGraph) -> Vec<SearchMatches> {
        egraph
            .classes()
            .filter_map(|class| self.search_eclass(egraph, class.id))
            .collect()
    }

    /// Searches one class, returning `None` if nothing matched.
    pub fn search_eclass(&self, egraph: &EGraph, eclass: Id) -> Option<SearchMatches> {
        let eclass = egraph.find(eclass);
        let substs = self.matches(egraph, eclass);
        if substs.is_empty() {
            None
        } else {
            Some(SearchMatches { eclass, substs })
        }
    }

    /// Every distinct substitution under which this pattern matches `eclass`.
    pub fn matches(&self, egraph: &EGraph, eclass: Id) -> Vec<Subst> {
        debug_assert!(egraph.is_clean(), "searching a dirty e-graph");
        let substs = self.search_pat(0, Subst::default(), egraph, eclass);
        let unique: IndexSet<Subst> = substs.into_iter().collect();
        unique.into_iter().collect()
    }

    fn search_pat(&self, depth: usize, subst: Subst, egraph: &EGraph, eclass: Id) -> Vec<Subst> {
        let eclass = egraph.find(eclass);
        let indent = "    ".repeat(depth);
        trace!("{}matching {} against class {}", indent, self, eclass);

        let found: Vec<Subst> = match self {
            Pattern::Var { var, guard } => {
                if guard.as_ref().map_or(true, |g| g(egraph, eclass)) {
                    bind(subst, *var, Binding::Class(eclass)).into_iter().collect()
                } else {
                    vec![]
                }
            }
            Pattern::Any(alts) => alts
                .iter()
                .flat_map(|p| p.search_pat(depth + 1, subst.clone(), egraph, eclass))
                .collect(),
            Pattern::Literal { matcher, var } => egraph[eclass]
                .iter()
                .filter_map(ENode::literal)
                .filter(|lit| matcher.matches(lit))
                .filter_map(|lit| match var {
                    Some(v) => bind(subst.clone(), *v, Binding::Literal(lit.clone())),
                    None => Some(subst.clone()),
                })
                .collect(),
            Pattern::Op { op, params, args } => {
                let mut found = vec![];
                for node in egraph[eclass].iter().filter(|n| n.op == *op) {
                    if let Some(subst) = params.search(&node.params, subst.clone()) {
                        found.extend(args.search(depth, subst, egraph, node.children()));
                    }
                }
                found
            }
        };

        trace!("{}found {} substitutions", indent, found.len());
        found
    }
}

/// Threads every substitution through the (pattern, class) pairs, left to
/// right.
fn search_all<'a>(
    pairs: impl IntoIterator<Item = (&'a Pattern, Id)>,
    depth: usize,
    subst: Subst,
    egraph: &EGraph,
) -> Vec<Subst> {
    let mut substs1 = vec![];
    let mut substs2 = vec![subst];
    for (pat, child) in pairs {
        std::mem::swap(&mut substs1, &mut substs2);
        for s in substs1.drain(..) {
            substs2.extend(pat.search_pat(depth + 1, s, egraph, child));
        }
        if substs2.is_empty() {
            break;
        }
    }
    substs2
}

impl Args {
    fn search(&self, depth: usize, subst: Subst, egraph: &EGraph, children: &[Id]) -> Vec<Subst> {
        match self {
            Args::Exact(pats) if pats.len() == children.len() => {
                search_all(pats.iter().zip(children.iter().copied()), depth, subst, egraph)
            }
            Args::Exact(_) => vec![],
            Args::Variadic { prefix, rest } if prefix.len() <= children.len() => {
                let list: SmallVec<[Id; 4]> = children[prefix.len()..]
                    .iter()
                    .map(|&c| egraph.find(c))
                    .collect();
                let pairs = prefix.iter().zip(children.iter().copied());
                search_all(pairs, depth, subst, egraph)
                    .into_iter()
                    .filter_map(|s| bind(s, *rest, Binding::List(list.clone())))
                    .collect()
            }
            Args::Variadic { .. } => vec![],
            Args::Repeat(each) => {
                let pairs = children.iter().map(|&c| (each.as_ref(), c));
                search_all(pairs, depth, subst, egraph)
            }
        }
    }
}

/// The result of searching a [`Pattern`] over one eclass.
#[derive(Debug, Clone)]
pub struct SearchMatches {
    /// The eclass id that these matches were found in.
    pub eclass: Id,
    /// The distinct substitutions for each match.
    pub substs: Vec<Subst>,
}

fn parse_pattern(sexp: &Sexp) -> Result<Pattern, ParseError> {
    match sexp {
        Sexp::Empty => Err(ParseError::Empty),
        Sexp::String(s) if s.ends_with("...") => Err(ParseError::Variadic(s.clone())),
        Sexp::String(s) if s.starts_with('?') => Ok(Pattern::Var {
            var: s.parse()?,
            guard: None,
        }),
        Sexp::String(s) => {
            let (op, params) = parse_pattern_head(s)?;
            if let ParamMatch::Any = params {
                if let Some(lit) = Literal::parse_value(op) {
                    return Ok(Pattern::literal(lit));
                }
                if op != builtin::CONST && op != builtin::INPUT {
                    return Ok(Pattern::Op {
                        op: Op::new(builtin::INPUT),
                        params: ParamMatch::Exact([Literal::str(op)].into_iter().collect()),
                        args: Args::Exact(vec![]),
                    });
                }
            }
            op_pattern(op, params, Args::Exact(vec![]))
        }
        Sexp::List(list) if list.is_empty() => Err(ParseError::Empty),
        Sexp::List(list) => match &list[0] {
            Sexp::String(s) if !s.starts_with('?') => {
                let (op, params) = parse_pattern_head(s)?;
                let mut prefix = vec![];
                for (i, arg) in list[1..].iter().enumerate() {
                    if let Sexp::String(a) = arg {
                        if let Some(rest) = a.strip_suffix("...") {
                            if i + 2 != list.len() {
                                return Err(ParseError::Variadic(a.clone()));
                            }
                            let rest = rest.parse()?;
                            return op_pattern(op, params, Args::Variadic { prefix, rest });
                        }
                    }
                    prefix.push(parse_pattern(arg)?);
                }
                op_pattern(op, params, Args::Exact(prefix))
            }
            other => Err(ParseError::BadHead(other.to_string())),
        },
    }
}

fn op_pattern(op: &str, params: ParamMatch, args: Args) -> Result<Pattern, ParseError> {
    // const@?c binds a constant's value rather than its parameter list
    if op == builtin::CONST {
        if let (ParamMatch::Bind(var), Args::Exact(a)) = (&params, &args) {
            if a.is_empty() {
                return Ok(Pattern::Literal {
                    matcher: LiteralMatch::Any,
                    var: Some(*var),
                });
            }
        }
    }
    Ok(Pattern::Op {
        op: Op::new(op),
        params,
        args,
    })
}

/// Like a head token of a [`RecExpr`], except that `op@?p` binds the
/// parameters and writing no parameters matches any.
fn parse_pattern_head(s: &str) -> Result<(&str, ParamMatch), ParseError> {
    if let Some((op, var)) = s.split_once("@?") {
        if !var.contains('@') {
            let var = format!("?{}", var).parse()?;
            return Ok((op, ParamMatch::Bind(var)));
        }
    }
    let head = parse_head(s)?;
    if head.ty.is_some() {
        return Err(ParseError::BadHead(s.to_owned()));
    }
    if head.params.is_empty() {
        Ok((head.op, ParamMatch::Any))
    } else {
        Ok((head.op, ParamMatch::Exact(head.params)))
    }
}

impl FromStr for Pattern {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_pattern(&parse_sexp(s)?)
    }
}

impl Display for Pattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Var { var, guard: None } => write!(f, "{}", var),
            Pattern::Var { var, guard: Some(_) } => write!(f, "{}:<guard>", var),
            Pattern::Literal { matcher, var } => match (matcher, var) {
                (LiteralMatch::Exact(lit), None) => write!(f, "{}", lit),
                (LiteralMatch::Any, Some(v)) => write!(f, "const@{}", v),
                (_, Some(v)) => write!(f, "const@{}:<guard>", v),
                (_, None) => write!(f, "const@<guard>"),
            },
            Pattern::Any(alts) => {
                f.write_str("(|")?;
                for alt in alts {
                    write!(f, " {}", alt)?;
                }
                f.write_str(")")
            }
            Pattern::Op { op, params, args } => {
                let mut head = op.to_string();
                match params {
                    ParamMatch::Any => (),
                    ParamMatch::Exact(ps) => {
                        let bare_input = *op == builtin::INPUT
                            && ps.len() == 1
                            && !ps[0].is_value()
                            && matches!(args, Args::Exact(a) if a.is_empty());
                        if bare_input {
                            return write!(f, "{}", ps[0]);
                        }
                        ps.iter().for_each(|p| head.push_str(&format!("@{}", p)))
                    }
                    ParamMatch::Where(_) => head.push_str("@<guard>"),
                    ParamMatch::Bind(v) => head.push_str(&format!("@{}", v)),
                }
                write!(f, "({}", head)?;
                match args {
                    Args::Exact(ps) => ps.iter().try_for_each(|p| write!(f, " {}", p))?,
                    Args::Variadic { prefix, rest } => {
                        prefix.iter().try_for_each(|p| write!(f, " {}", p))?;
                        write!(f, " {}...", rest)?;
                    }
                    Args::Repeat(p) => write!(f, " {}*", p)?,
                }
                f.write_str(")")
            }
        }
    }
}

impl Debug for Pattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn egraph_of(s: &str) -> (EGraph, Id) {
        let expr: RecExpr = s.parse().unwrap();
        let (mut egraph, roots) = EGraph::from_exprs([&expr]);
        egraph.rebuild();
        (egraph, roots[0])
    }

    #[test]
    fn simple_match() {
        crate::init_logger();
        let mut egraph = EGraph::default();

        let x = egraph.add(ENode::input("x"));
        let y = egraph.add(ENode::input("y"));
        let plus = egraph.add(ENode::new("add", [x, y]));

        let z = egraph.add(ENode::input("z"));
        let w = egraph.add(ENode::input("w"));
        let plus2 = egraph.add(ENode::new("add", [z, w]));

        egraph.union(plus, plus2);
        egraph.rebuild();

        let pat: Pattern = "(add ?a ?b)".parse().unwrap();
        let substs = pat.matches(&egraph, plus);
        assert_eq!(substs.len(), 2);

        let (a, b) = (Var::new("a"), Var::new("b"));
        let pairs: Vec<(Id, Id)> = substs.iter().map(|s| (s[a], s[b])).collect();
        assert!(pairs.contains(&(x, y)));
        assert!(pairs.contains(&(z, w)));
    }

    #[test]
    fn repeated_var_requires_same_class() {
        let (egraph, root) = egraph_of("(tuple (add x x) (add x y))");
        let pat: Pattern = "(add ?a ?a)".parse().unwrap();
        let matches = pat.search(&egraph);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].substs.len(), 1);
        assert!(pat.search_eclass(&egraph, root).is_none());
    }

    #[test]
    fn literals_and_params() {
        let (egraph, _) = egraph_of("(tuple (mul x 1) (reshape@[6] t) (reshape@[2,3] t))");

        assert_eq!("(mul ?x 1)".parse::<Pattern>().unwrap().search(&egraph).len(), 1);
        assert_eq!("(mul ?x 2)".parse::<Pattern>().unwrap().search(&egraph).len(), 0);

        let any_reshape: Pattern = "(reshape ?t)".parse().unwrap();
        assert_eq!(any_reshape.search(&egraph).len(), 2);
        let exact: Pattern = "(reshape@[6] ?t)".parse().unwrap();
        assert_eq!(exact.search(&egraph).len(), 1);

        let bound: Pattern = "(reshape@?s ?t)".parse().unwrap();
        let matches = bound.search(&egraph);
        assert_eq!(matches.len(), 2);
        let shapes: Vec<_> = matches
            .iter()
            .map(|m| m.substs[0].params(Var::new("s")).unwrap()[0].clone())
            .collect();
        assert!(shapes.contains(&Literal::ints([6])));

        let c: Pattern = "(mul ?x const@?c)".parse().unwrap();
        let m = c.search(&egraph);
        assert_eq!(m[0].substs[0].literal(Var::new("c")), Some(&Literal::Int(1)));
    }

    #[test]
    fn variadic_and_repeat() {
        let (egraph, root) = egraph_of("(tuple a b c)");
        let pat: Pattern = "(tuple ?first ?rest...)".parse().unwrap();
        let substs = pat.matches(&egraph, root);
        assert_eq!(substs.len(), 1);
        assert_eq!(substs[0].list(Var::new("rest")).unwrap().len(), 2);

        let all_inputs = Pattern::repeat(
            "tuple",
            Pattern::var_where("x", |eg, id| eg[id].iter().any(|n| n.op == "input")),
        );
        // ?x would need to be the same class for every operand
        assert!(all_inputs.matches(&egraph, root).is_empty());

        let (egraph, root) = egraph_of("(tuple a a)");
        assert_eq!(all_inputs.matches(&egraph, root).len(), 1);

        assert!(matches!(
            "(tuple ?xs... ?y)".parse::<Pattern>(),
            Err(ParseError::Variadic(_))
        ));
    }

    #[test]
    fn alternation_returns_every_binding() {
        let (egraph, root) = egraph_of("(add (neg x) (relu x))");
        let pat = Pattern::op(
            "add",
            [
                Pattern::any([
                    Pattern::op("neg", [Pattern::var("v")]),
                    Pattern::op("relu", [Pattern::var("v")]),
                ]),
                Pattern::var("other"),
            ],
        );
        let substs = pat.matches(&egraph, root);
        assert_eq!(substs.len(), 1);

        let either = Pattern::any([Pattern::var("a"), Pattern::var("b")]);
        assert_eq!(either.matches(&egraph, root).len(), 2);
    }

    #[test]
    fn from_expr_matches_itself_only() {
        let (egraph, root) = egraph_of("(add x 1)");
        let expr: RecExpr = "(add x 1)".parse().unwrap();
        let pat = Pattern::from_expr(&expr);
        assert_eq!(pat.to_string(), "(add x 1)");
        assert_eq!(pat.matches(&egraph, root).len(), 1);
        assert!(pat.vars().is_empty());

        let p: Pattern = "(add ?a (mul ?b ?a))".parse().unwrap();
        assert_eq!(p.vars(), vec![Var::new("a"), Var::new("b")]);
        assert_eq!(p.to_string(), "(add ?a (mul ?b ?a))");
    }
}
