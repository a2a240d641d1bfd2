/*! Built-in rule sets.

Each function returns a fresh [`RuleSet`]; a [`Session`](crate::Session)
registers all four under their names.

| Set          | Mode            | What it does                                   |
|--------------|-----------------|------------------------------------------------|
| `algebraic`  | fixpoint        | commutativity, identities, constant folding    |
| `markers`    | single sweep    | drops `identity`/`marker`, folds quantize pairs |
| `lowering`   | fixpoint        | `matmul` to `gemm`, transpose and reshape no-ops |
| `fusion`     | fixpoint        | `relu(add(gemm a b) c)` to `gemm_bias_relu`     |
*/

use crate::{
    builtin, rewrite, BuildError, EGraph, ENode, Id, Literal, Mode, ParamMatch, Params, Pattern,
    Rewrite, Subst, Template, TensorType, Var,
};

/// A named list of rules and the mode they run in.
#[derive(Debug, Clone)]
pub struct RuleSet {
    /// The name a session knows the set by.
    pub name: String,
    /// Whether to run the set once or to a fixpoint.
    pub mode: Mode,
    /// The rules.
    pub rules: Vec<Rewrite>,
}

impl RuleSet {
    /// Makes a rule set.
    pub fn new(name: impl Into<String>, mode: Mode, rules: Vec<Rewrite>) -> Self {
        RuleSet {
            name: name.into(),
            mode,
            rules,
        }
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` if the set has no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The rule names, in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(Rewrite::name)
    }
}

// built-in rules are fixed text, so failing to make one is a bug here
fn rule<F>(name: &str, lhs: impl Into<Lhs>, builder: F) -> Rewrite
where
    F: Fn(&EGraph, Id, &Subst) -> Result<Option<Template>, BuildError> + Send + Sync + 'static,
{
    let pattern = match lhs.into() {
        Lhs::Text(s) => s
            .parse()
            .unwrap_or_else(|e| panic!("bad pattern in rule '{}': {}", name, e)),
        Lhs::Pattern(p) => p,
    };
    Rewrite::from_fn(name, pattern, builder).unwrap_or_else(|e| panic!("{}", e))
}

enum Lhs {
    Text(&'static str),
    Pattern(Pattern),
}

impl From<&'static str> for Lhs {
    fn from(s: &'static str) -> Self {
        Lhs::Text(s)
    }
}

impl From<Pattern> for Lhs {
    fn from(p: Pattern) -> Self {
        Lhs::Pattern(p)
    }
}

fn class(subst: &Subst, name: &str) -> Result<Id, BuildError> {
    let var = Var::new(name);
    subst
        .class(var)
        .ok_or_else(|| BuildError(format!("{} is not bound to a class", var)))
}

fn literal<'a>(subst: &'a Subst, name: &str) -> Result<&'a Literal, BuildError> {
    let var = Var::new(name);
    subst
        .literal(var)
        .ok_or_else(|| BuildError(format!("{} is not bound to a constant", var)))
}

fn is_zero(lit: &Literal) -> bool {
    lit.as_f64() == Some(0.0)
}

fn is_one(lit: &Literal) -> bool {
    lit.as_f64() == Some(1.0)
}

/// Folds `op` over two constant operands. Integer pairs use `int`, which
/// declines on overflow of `i64` or of the class's integer type; anything
/// else numeric goes through `float`.
fn fold(name: &str, op: &str, int: fn(i64, i64) -> Option<i64>, float: fn(f64, f64) -> f64) -> Rewrite {
    let lhs = Pattern::op(op, [Pattern::literal_var("x"), Pattern::literal_var("y")]);
    rule(name, lhs, move |egraph, eclass, subst| {
        let (x, y) = (literal(subst, "x")?, literal(subst, "y")?);
        let range = egraph[eclass].ty().and_then(|ty| ty.dtype.int_range());
        let fits = |v: &i64| range.map_or(true, |(lo, hi)| (lo..=hi).contains(v));
        let value = match (x.as_int(), y.as_int()) {
            (Some(a), Some(b)) => int(a, b).filter(fits).map(Literal::Int),
            _ => match (x.as_f64(), y.as_f64()) {
                (Some(a), Some(b)) => Literal::float(float(a, b)),
                _ => None,
            },
        };
        Ok(value.map(|v| Template::constant(v, egraph[eclass].ty().cloned())))
    })
}

/// Commutativity, additive and multiplicative identities, constant folding
/// of `add`/`sub`/`mul`, double negation, and projection out of a tuple.
pub fn algebraic() -> RuleSet {
    let x = || Pattern::var("x");
    let rules = vec![
        rewrite!("commute-add"; "(add ?a ?b)" => "(add ?b ?a)"),
        rewrite!("commute-mul"; "(mul ?a ?b)" => "(mul ?b ?a)"),
        rewrite!("add-0"; {
            Pattern::op(builtin::ADD, [x(), Pattern::literal_where("zero", is_zero)])
        } => "?x"),
        rewrite!("mul-1"; {
            Pattern::op(builtin::MUL, [x(), Pattern::literal_where("one", is_one)])
        } => "?x"),
        fold("fold-add", builtin::ADD, i64::checked_add, |a, b| a + b),
        fold("fold-sub", builtin::SUB, i64::checked_sub, |a, b| a - b),
        fold("fold-mul", builtin::MUL, i64::checked_mul, |a, b| a * b),
        rewrite!("neg-neg"; "(neg (neg ?x))" => "?x"),
        rule("get-tuple", "(get@?i (tuple ?xs...))", |_, _, subst| {
            let index = subst
                .params(Var::new("i"))
                .and_then(|ps| ps.first())
                .and_then(Literal::as_int)
                .and_then(|i| usize::try_from(i).ok());
            let items = subst
                .list(Var::new("xs"))
                .ok_or_else(|| BuildError::new("?xs is not bound to a list"))?;
            Ok(index
                .and_then(|i| items.get(i))
                .map(|&item| Template::of_class(item)))
        }),
    ];
    RuleSet::new("algebraic", Mode::Fixpoint, rules)
}

/// Removes `identity` and `marker` nodes and cancels a `dequantize` of a
/// `quantize` with the same parameters.
pub fn markers() -> RuleSet {
    let rules = vec![
        rewrite!("drop-identity"; "(identity ?x)" => "?x"),
        rewrite!("drop-marker"; "(marker ?x)" => "?x"),
        rewrite!("fold-quantize"; "(dequantize@?p (quantize@?p ?x))" => "?x"),
    ];
    RuleSet::new("markers", Mode::Once, rules)
}

fn matmul_shapes_agree(a: Option<&TensorType>, b: Option<&TensorType>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.rank() == 2 && b.rank() == 2 && a.shape[1] == b.shape[0],
        _ => false,
    }
}

/// Lowers `matmul` of two matrices with agreeing inner dimensions to `gemm`,
/// and removes transposes of transposes and reshapes to the same shape.
pub fn lowering() -> RuleSet {
    let plain_transpose = |arg: Pattern| {
        Pattern::op(builtin::TRANSPOSE, [arg]).with_params(ParamMatch::Exact(Params::new()))
    };
    let rules = vec![
        rule("matmul-to-gemm", "(matmul ?a ?b)", |egraph, eclass, subst| {
            let (a, b) = (class(subst, "a")?, class(subst, "b")?);
            if !matmul_shapes_agree(egraph[a].ty(), egraph[b].ty()) {
                return Ok(None);
            }
            let mut t = Template::default();
            let (a, b) = (t.class(a), t.class(b));
            t.add_typed(ENode::new(builtin::GEMM, [a, b]), egraph[eclass].ty().cloned());
            Ok(Some(t))
        }),
        rewrite!("transpose-transpose";
            (plain_transpose(plain_transpose(Pattern::var("x")))) => "?x"),
        rule("reshape-noop", "(reshape ?x)", |egraph, eclass, subst| {
            let x = class(subst, "x")?;
            let same = egraph[eclass].ty().is_some() && egraph[eclass].ty() == egraph[x].ty();
            Ok(same.then(|| Template::of_class(x)))
        }),
    ];
    RuleSet::new("lowering", Mode::Fixpoint, rules)
}

/// A bias that broadcasts along the rows of `out`, or has its full shape.
fn bias_fits(bias: &TensorType, out: &TensorType) -> bool {
    bias.dtype == out.dtype
        && out.rank() == 2
        && (bias.shape == out.shape || bias.shape.as_slice() == [out.shape[1]])
}

/// Fuses a `gemm` followed by a bias add and a `relu` into `gemm_bias_relu`.
pub fn fusion() -> RuleSet {
    let rules = vec![rule(
        "fuse-gemm-bias-relu",
        "(relu (add (gemm ?a ?b) ?c))",
        |egraph, eclass, subst| {
            let (a, b, c) = (class(subst, "a")?, class(subst, "b")?, class(subst, "c")?);
            let fits = match (egraph[c].ty(), egraph[eclass].ty()) {
                (Some(bias), Some(out)) => bias_fits(bias, out),
                _ => false,
            };
            if !fits {
                return Ok(None);
            }
            let mut t = Template::default();
            let children = [t.class(a), t.class(b), t.class(c)];
            t.add_typed(
                ENode::new(builtin::GEMM_BIAS_RELU, children),
                egraph[eclass].ty().cloned(),
            );
            Ok(Some(t))
        },
    )];
    RuleSet::new("fusion", Mode::Fixpoint, rules)
}

/// All four sets, in the order a pipeline would usually run them.
pub fn all() -> Vec<RuleSet> {
    vec![markers(), algebraic(), lowering(), fusion()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::*;

    fn saturate(set: &RuleSet, expr: &str) -> (Runner, RecExpr) {
        let expr: RecExpr = expr.parse().unwrap();
        let runner = Runner::default()
            .with_mode(set.mode)
            .with_expr(&expr)
            .run(&set.rules)
            .unwrap();
        (runner, expr)
    }

    fn best(runner: &Runner) -> String {
        let ext = Extractor::new(&runner.egraph, NodeCount);
        ext.find_best(runner.roots[0]).unwrap().1.to_string()
    }

    #[test]
    fn names_are_unique() {
        for set in all() {
            let mut names: Vec<_> = set.names().collect();
            names.sort_unstable();
            names.dedup();
            assert_eq!(names.len(), set.len(), "duplicate names in {}", set.name);
        }
    }

    #[test]
    fn folds_constants() {
        let (runner, _) = saturate(&algebraic(), "(mul (sub 7 (add 1 2)) 1)");
        assert!(runner.reached_fixpoint());
        assert_eq!(best(&runner), "4");

        let (runner, _) = saturate(&algebraic(), "(add 0.5 1)");
        assert_eq!(best(&runner), "1.5");
    }

    #[test]
    fn overflow_is_not_folded() {
        let (runner, _) = saturate(&algebraic(), "(add 9223372036854775807 1)");
        assert_eq!(runner.egraph[runner.roots[0]].literal(), None);

        let (runner, _) = saturate(&algebraic(), "(add:i32[] 2147483647 1)");
        assert_eq!(runner.egraph[runner.roots[0]].literal(), None);
        assert_eq!(best(&runner), "(add:i32[] 2147483647 1)");

        let (runner, _) = saturate(&algebraic(), "(mul:u8[] 16 15)");
        assert_eq!(best(&runner), "240:u8[]");

        let (runner, _) = saturate(&algebraic(), "(sub:u8[] 1 2)");
        assert_eq!(runner.egraph[runner.roots[0]].literal(), None);
    }

    #[test]
    fn projects_tuples() {
        let (runner, _) = saturate(&algebraic(), "(get@1 (tuple a (neg (neg b)) c))");
        assert_eq!(best(&runner), "b");

        // out of range is left alone
        let (runner, _) = saturate(&algebraic(), "(get@3 (tuple a b))");
        assert_eq!(best(&runner), "(get@3 (tuple a b))");
    }

    #[test]
    fn strips_markers_in_one_sweep() {
        let (runner, _) = saturate(
            &markers(),
            "(add (identity (marker x)) (dequantize@0.5 (quantize@0.5 y)))",
        );
        assert_eq!(runner.stop_reason, Some(StopReason::SingleSweep));
        assert_eq!(best(&runner), "(add x y)");

        // different scales do not cancel
        let (runner, _) = saturate(&markers(), "(dequantize@0.5 (quantize@0.25 y))");
        assert_eq!(best(&runner), "(dequantize@0.5 (quantize@0.25 y))");
    }

    #[test]
    fn lowers_matmul() {
        let (runner, _) = saturate(
            &lowering(),
            "(matmul:f32[2,4] a:f32[2,3] (transpose:f32[3,4] (transpose:f32[4,3] b:f32[3,4])))",
        );
        let gemm = "(gemm ?a ?b)".parse::<Pattern>().unwrap();
        assert_eq!(gemm.matches(&runner.egraph, runner.roots[0]).len(), 1);
        let best = Extractor::new(&runner.egraph, NodeCount)
            .find_best(runner.roots[0])
            .unwrap()
            .1;
        assert_eq!(best.len(), 3);
    }

    #[test]
    fn reshape_to_own_shape() {
        let (runner, _) = saturate(&lowering(), "(reshape@[2,3]:f32[2,3] t:f32[2,3])");
        assert_eq!(best(&runner), "t:f32[2,3]");
        let (runner, _) = saturate(&lowering(), "(reshape@[6]:f32[6] t:f32[2,3])");
        assert_eq!(runner.egraph.number_of_classes(), 2);
    }

    #[test]
    fn fuses_bias_relu() {
        let (runner, _) = saturate(
            &fusion(),
            "(relu:f32[2,4] (add:f32[2,4] (gemm:f32[2,4] a:f32[2,3] b:f32[3,4]) c:f32[4]))",
        );
        let fused = "(gemm_bias_relu ?a ?b ?c)".parse::<Pattern>().unwrap();
        assert_eq!(fused.matches(&runner.egraph, runner.roots[0]).len(), 1);

        // a bias of the wrong width is left alone
        let (runner, _) = saturate(
            &fusion(),
            "(relu:f32[2,4] (add:f32[2,4] (gemm:f32[2,4] a:f32[2,3] b:f32[3,4]) c:f32[2]))",
        );
        assert!(fused.matches(&runner.egraph, runner.roots[0]).is_empty());
    }
}
