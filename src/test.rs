/*! Helpers for the crate's own goal tests.

These are not considered part of the public api.
*/

use indexmap::IndexMap;

use crate::{Budget, CostVector, Extractor, Mode, NodeCount, Pattern, RecExpr, Report, Runner};

/// What one finished test run looked like.
///
/// With the `reports` feature and `EQSAT_REPORT_DIR` set, [`save`](RunRecord::save)
/// writes it there as `<name>.json`.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "reports", derive(serde::Serialize))]
pub struct RunRecord {
    pub name: String,
    pub budget: Budget,
    pub mode: Mode,
    pub report: Report,
    /// New unions per rule, over all iterations.
    pub applied: IndexMap<String, usize>,
    pub cost: CostVector,
    pub best: String,
}

impl RunRecord {
    #[cfg(not(feature = "reports"))]
    pub fn save(self) {
        if std::env::var_os("EQSAT_REPORT_DIR").is_some() {
            eprintln!("EQSAT_REPORT_DIR is set, but the 'reports' feature is not enabled");
        }
    }

    #[cfg(feature = "reports")]
    pub fn save(self) {
        let dir = match std::env::var_os("EQSAT_REPORT_DIR") {
            Some(dir) => std::path::PathBuf::from(dir),
            None => return,
        };
        std::fs::create_dir_all(&dir)
            .unwrap_or_else(|err| panic!("Failed to create {:?}: {}", dir, err));
        let path = dir.join(format!("{}.json", self.name));
        let file = std::fs::File::create(&path)
            .unwrap_or_else(|err| panic!("Failed to open {:?}: {}", path, err));
        serde_json::to_writer_pretty(file, &self)
            .unwrap_or_else(|err| panic!("Failed to write {:?}: {}", path, err));
        println!("Wrote {:?}", path);
    }
}

impl<IterData: crate::IterationData> Runner<IterData> {
    /// The class of the last root, which is the start expression of a test.
    fn test_root(&self) -> crate::Id {
        let root = self.roots.last().expect("runner has no roots");
        self.egraph.find(*root)
    }

    /// Summarizes the run together with the smallest expression of its
    /// last root.
    pub fn record(&self, name: &str) -> RunRecord {
        let (cost, best) = Extractor::new(&self.egraph, NodeCount)
            .find_best(self.test_root())
            .unwrap();

        let mut applied = IndexMap::new();
        for iteration in &self.iterations {
            for (rule, n) in &iteration.applied {
                *applied.entry(rule.clone()).or_insert(0) += n;
            }
        }

        RunRecord {
            name: name.to_owned(),
            budget: *self.budget(),
            mode: self.mode(),
            report: self.report(),
            applied,
            cost,
            best: best.to_string(),
        }
    }

    /// Panics unless every goal is in the class of the last root.
    pub fn check_goals(&self, goals: &[RecExpr]) {
        let id = self.test_root();
        for (i, goal) in goals.iter().enumerate() {
            if Pattern::from_expr(goal).search_eclass(&self.egraph, id).is_none() {
                let (_, best) = Extractor::new(&self.egraph, NodeCount).find_best(id).unwrap();
                panic!(
                    "Goal {} not reached after {:?}:\n{}\nBest found:\n{}",
                    i,
                    self.stop_reason,
                    goal.pretty(40),
                    best.pretty(40),
                );
            }
        }
    }
}

/// Defines a test that runs `rules` from a start expression and checks
/// that every goal ends up in the start's class.
///
/// An optional `runner = ...` sets up the [`Runner`], and `@check` gets the
/// finished runner.
#[macro_export]
macro_rules! test_fn {
    (
        $(#[$meta:meta])*
        $name:ident, $rules:expr,
        $start:literal
        =>
        $($goal:literal),+ $(,)?
        $(@check $check_fn:expr)?
    ) => {
        $crate::test_fn! {
            $(#[$meta])*
            $name, $rules,
            runner = $crate::Runner::default(),
            $start => $( $goal ),+
            $(@check $check_fn)?
        }
    };

    (
        $(#[$meta:meta])*
        $name:ident, $rules:expr,
        runner = $runner:expr,
        $start:literal
        =>
        $($goal:literal),+ $(,)?
        $(@check $check_fn:expr)?
    ) => {
        $(#[$meta])*
        #[test]
        fn $name() {
            let _ = env_logger::builder().is_test(true).try_init();
            let start: $crate::RecExpr = $start.parse().unwrap();
            let rules = $rules;
            let runner = $runner.with_expr(&start).run(&rules).unwrap();

            let record = runner.record(stringify!($name));
            println!("{}\nbest ({}): {}", record.report, record.cost, record.best);
            record.save();

            let goals: &[$crate::RecExpr] = &[$( $goal.parse().unwrap() ),+];
            runner.check_goals(goals);

            $( ($check_fn)(runner) )?
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::*;

    #[test]
    fn records_sum_rules_over_iterations() {
        let start: RecExpr = "(add (add x 0) 0)".parse().unwrap();
        let runner = Runner::default()
            .with_expr(&start)
            .run(&rules::algebraic().rules)
            .unwrap();

        let record = runner.record("nested_zeros");
        assert_eq!(record.mode, Mode::Fixpoint);
        assert_eq!(record.budget, Budget::default());
        assert_eq!(record.best, "x");
        assert_eq!(record.report.stop_reason, Some(StopReason::Saturated));
        let per_iteration: usize = runner.iterations.iter().map(|i| i.applied.values().sum::<usize>()).sum();
        assert_eq!(record.applied.values().sum::<usize>(), per_iteration);
        runner.check_goals(&["(add x 0)".parse().unwrap(), "x".parse().unwrap()]);
    }
}
