use indexmap::IndexMap;
use log::*;

use crate::{
    rules::{self, RuleSet},
    Budget, CostVector, EGraph, Error, Extractor, Id, OpRegistry, RecExpr, Runner,
    StaticCostModel, StopReason,
};

/** Everything one compilation needs: the operators it knows and the rule
sets it may run.

There is no global registry; passes take a `&Session`, so independent
compilations never share state.

```
use tensor_eqsat::*;
let session = Session::new();
let expr: RecExpr = "(mul (identity (add 1 2)) 1)".parse().unwrap();
let (_, best) = session.optimize(&expr, &["markers", "algebraic"]).unwrap();
assert_eq!(best.to_string(), "3");
```
**/
#[derive(Debug, Clone)]
pub struct Session {
    ops: OpRegistry,
    rule_sets: IndexMap<String, RuleSet>,
    budget: Budget,
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}

impl Session {
    /// A session with the built-in operators and the `algebraic`,
    /// `markers`, `lowering` and `fusion` rule sets.
    pub fn new() -> Self {
        let mut session = Session::empty(OpRegistry::with_builtins());
        for set in rules::all() {
            session.register_rule_set(set);
        }
        session
    }

    /// A session with the given operators and no rule sets.
    pub fn empty(ops: OpRegistry) -> Self {
        Session {
            ops,
            rule_sets: IndexMap::new(),
            budget: Budget::default(),
        }
    }

    /// Sets the budget each saturation run gets.
    pub fn with_budget(self, budget: Budget) -> Self {
        Session { budget, ..self }
    }

    /// The operator registry.
    pub fn ops(&self) -> &OpRegistry {
        &self.ops
    }

    /// The operator registry, for registering more operators.
    pub fn ops_mut(&mut self) -> &mut OpRegistry {
        &mut self.ops
    }

    /// Registers a rule set under its name, returning the one it replaces.
    pub fn register_rule_set(&mut self, set: RuleSet) -> Option<RuleSet> {
        debug!("Registering rule set {} ({} rules)", set.name, set.len());
        self.rule_sets.insert(set.name.clone(), set)
    }

    /// Looks up a rule set.
    pub fn rule_set(&self, name: &str) -> Result<&RuleSet, Error> {
        self.rule_sets
            .get(name)
            .ok_or_else(|| Error::UnknownRuleSet(name.to_owned()))
    }

    /// Iterates over the rule sets in registration order.
    pub fn rule_sets(&self) -> impl Iterator<Item = &RuleSet> {
        self.rule_sets.values()
    }

    /// Creates an e-graph holding `roots`, returning the class of each.
    ///
    /// Nodes whose operand count disagrees with their registration are
    /// still added, but logged.
    pub fn egraph(&self, roots: &[RecExpr]) -> (EGraph, Vec<Id>) {
        for expr in roots {
            for node in expr.nodes().iter().filter(|n| !self.ops.arity_ok(n)) {
                warn!("{:?} has an unexpected number of operands", node);
            }
        }
        EGraph::from_exprs(roots)
    }

    /// Runs one rule set over `egraph` in the set's mode, within this
    /// session's budget.
    pub fn saturate(&self, egraph: EGraph, rule_set: &str) -> Result<Runner, Error> {
        let set = self.rule_set(rule_set)?;
        info!("Running rule set {}", set.name);
        let runner = Runner::default()
            .with_budget(self.budget)
            .with_mode(set.mode)
            .with_egraph(egraph)
            .run(&set.rules)?;
        match &runner.stop_reason {
            Some(StopReason::Saturated) | Some(StopReason::SingleSweep) => {}
            reason => info!("Rule set {} did not reach a fixpoint: {:?}", set.name, reason),
        }
        Ok(runner)
    }

    /// Extracts the cheapest expression of `root` under the registry's
    /// static costs.
    pub fn extract(&self, egraph: &EGraph, root: Id) -> Result<(CostVector, RecExpr), Error> {
        Extractor::new(egraph, StaticCostModel::new(&self.ops)).find_best(root)
    }

    /// Extracts several roots into one expression, sharing common classes.
    pub fn extract_many(&self, egraph: &EGraph, roots: &[Id]) -> Result<(RecExpr, Vec<Id>), Error> {
        Extractor::new(egraph, StaticCostModel::new(&self.ops))
            .with_sharing(true)
            .find_best_many(roots)
    }

    /// Runs the named rule sets in order over `expr`, each in its own mode,
    /// then extracts.
    ///
    /// Fails before touching anything if a rule set is unknown.
    pub fn optimize(&self, expr: &RecExpr, rule_sets: &[&str]) -> Result<(CostVector, RecExpr), Error> {
        for name in rule_sets {
            self.rule_set(name)?;
        }

        let (mut egraph, roots) = self.egraph(std::slice::from_ref(expr));
        for name in rule_sets {
            egraph = self.saturate(egraph, name)?.egraph;
        }
        self.extract(&egraph, roots[0])
    }
}
