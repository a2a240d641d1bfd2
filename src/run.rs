use std::fmt::{self, Display, Formatter};

use indexmap::{IndexMap, IndexSet};
use log::*;

use crate::{
    util::{Duration, Instant},
    EGraph, Error, Id, RecExpr, Rewrite, SearchMatches,
};

/** Runs [`Rewrite`]s over an [`EGraph`] until it saturates or a
[`Budget`] runs out.

Each iteration is one *sweep*: every rule is searched over the frozen graph
first, then all matches are applied, then the graph is rebuilt. Searching
never sees another rule's writes from the same sweep, so what can match in a
sweep does not depend on rule order.

[`Runner`] stops when

- a sweep creates no new unions
  ([`StopReason::Saturated`]),
- it is in [`Mode::Once`] and has done its one sweep
  ([`StopReason::SingleSweep`]),
- a limit of its [`Budget`] is hit, or
- a hook asks it to ([`StopReason::Other`]).

Limits are only checked between sweeps, so a run may overshoot a limit by
one sweep. Running out of budget is not an error: the graph simply holds
fewer equivalences and is still ready for extraction. A builder failure is an
error and aborts the run with [`Error::RuleFailed`].

[`Runner`] records an [`Iteration`] per sweep. You can add your own data to
these by implementing [`IterationData`].

# Example

```
use tensor_eqsat::{*, rewrite as rw};

let rules: &[Rewrite] = &[
    rw!("commute-add"; "(add ?a ?b)" => "(add ?b ?a)"),
    rw!("mul-1"; "(mul ?a 1)" => "?a"),
];

let start = "(add 0 (mul x 1))".parse().unwrap();
let runner = Runner::default()
    .with_iter_limit(10)
    .with_node_limit(10_000)
    .with_expr(&start)
    .run(rules)
    .unwrap();

assert!(runner.reached_fixpoint());
println!("{}", runner.report());
```
*/
pub struct Runner<IterData = ()> {
    /// The [`EGraph`] used.
    pub egraph: EGraph,
    /// Data accumulated over each [`Iteration`].
    pub iterations: Vec<Iteration<IterData>>,
    /// The roots of expressions added by
    /// [`with_expr`](Runner::with_expr), in insertion order.
    pub roots: Vec<Id>,
    /// Why the `Runner` stopped; `None` if it hasn't yet.
    pub stop_reason: Option<StopReason>,

    /// The hooks added by [`with_hook`](Runner::with_hook), in insertion
    /// order.
    #[allow(clippy::type_complexity)]
    pub hooks: Vec<Box<dyn FnMut(&mut Self) -> Result<(), String>>>,

    budget: Budget,
    mode: Mode,
    start_time: Option<Instant>,
    scheduler: Box<dyn RewriteScheduler>,
}

impl Default for Runner<()> {
    fn default() -> Self {
        Runner::new()
    }
}

/// Limits on a saturation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct Budget {
    /// Maximum number of sweeps. Default: 30
    pub iter_limit: usize,
    /// Maximum number of e-nodes. Default: 10,000
    pub node_limit: usize,
    /// Maximum wall-clock time. Default: 5 seconds
    pub time_limit: Duration,
}

impl Default for Budget {
    fn default() -> Self {
        Budget {
            iter_limit: 30,
            node_limit: 10_000,
            time_limit: Duration::from_secs(5),
        }
    }
}

/// How many sweeps a [`Runner`] does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum Mode {
    /// One sweep, for rule sets known to be confluent and quick.
    Once,
    /// Sweep until nothing changes or the budget runs out.
    #[default]
    Fixpoint,
}

/// Why a [`Runner`] stopped.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize))]
pub enum StopReason {
    /// A sweep learned nothing new.
    Saturated,
    /// A [`Mode::Once`] run did its sweep.
    SingleSweep,
    /// The iteration limit was hit. The data is the iteration limit.
    IterationLimit(usize),
    /// The enode limit was hit. The data is the enode limit.
    NodeLimit(usize),
    /// The time limit was hit. The data is the time limit in seconds.
    TimeLimit(f64),
    /// A hook asked to stop.
    Other(String),
}

/// Data generated by running a [`Runner`] one iteration.
///
/// If the `serde-1` feature is enabled, this implements
/// [`serde::Serialize`], which is useful if you want to output
/// this as a JSON or some other format.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize))]
#[non_exhaustive]
pub struct Iteration<IterData> {
    /// The number of enodes in the egraph at the start of this
    /// iteration.
    pub egraph_nodes: usize,
    /// The number of eclasses in the egraph at the start of this
    /// iteration.
    pub egraph_classes: usize,
    /// A map from rule name to number of new unions it made in this
    /// iteration.
    pub applied: IndexMap<String, usize>,
    /// Seconds spent running hooks.
    pub hook_time: f64,
    /// Seconds spent searching in this iteration.
    pub search_time: f64,
    /// Seconds spent applying rules in this iteration.
    pub apply_time: f64,
    /// Seconds spent [`rebuild`](EGraph::rebuild)ing the egraph in this
    /// iteration.
    pub rebuild_time: f64,
    /// Total time spent in this iteration, including data generation time.
    pub total_time: f64,
    /// The user provided annotation for this iteration
    pub data: IterData,
    /// The number of congruence unions found by the rebuild after this
    /// iteration.
    pub n_rebuilds: usize,
    /// If the runner stopped on this iterations, this is the reason
    pub stop_reason: Option<StopReason>,
}

impl<IterData> Iteration<IterData> {
    /// Unions made in this iteration, by rules and by the rebuild.
    pub fn unions(&self) -> usize {
        self.applied.values().sum::<usize>() + self.n_rebuilds
    }
}

type RunnerResult<T> = std::result::Result<T, StopReason>;

impl<IterData> Runner<IterData>
where
    IterData: IterationData,
{
    /// Create a new `Runner` with an empty e-graph and the default
    /// [`Budget`].
    pub fn new() -> Self {
        Self {
            budget: Budget::default(),
            mode: Mode::default(),

            egraph: EGraph::default(),
            roots: vec![],
            iterations: vec![],
            stop_reason: None,
            hooks: vec![],

            start_time: None,
            scheduler: Box::new(SimpleScheduler),
        }
    }

    /// Sets the iteration limit. Default: 30
    pub fn with_iter_limit(mut self, iter_limit: usize) -> Self {
        self.budget.iter_limit = iter_limit;
        self
    }

    /// Sets the egraph size limit (in enodes). Default: 10,000
    pub fn with_node_limit(mut self, node_limit: usize) -> Self {
        self.budget.node_limit = node_limit;
        self
    }

    /// Sets the runner time limit. Default: 5 seconds
    pub fn with_time_limit(mut self, time_limit: Duration) -> Self {
        self.budget.time_limit = time_limit;
        self
    }

    /// Replaces all limits at once.
    pub fn with_budget(self, budget: Budget) -> Self {
        Self { budget, ..self }
    }

    /// Sets the mode. Default: [`Mode::Fixpoint`]
    pub fn with_mode(self, mode: Mode) -> Self {
        Self { mode, ..self }
    }

    /// Add a hook to instrument or modify the behavior of a [`Runner`].
    /// Hooks run at the start of every iteration; an `Err` stops the run
    /// with [`StopReason::Other`].
    ///
    /// # Example
    /// ```
    /// # use tensor_eqsat::*;
    /// let rules: &[Rewrite] = &[
    ///     rewrite!("commute-add"; "(add ?a ?b)" => "(add ?b ?a)"),
    /// ];
    ///
    /// Runner::default()
    ///     .with_expr(&"(add 5 2)".parse().unwrap())
    ///     .with_hook(|runner| {
    ///          println!("Egraph is this big: {}", runner.egraph.total_size());
    ///          Ok(())
    ///     })
    ///     .run(rules)
    ///     .unwrap();
    /// ```
    pub fn with_hook<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&mut Self) -> Result<(), String> + 'static,
    {
        self.hooks.push(Box::new(hook));
        self
    }

    /// Change out the [`RewriteScheduler`] used by this [`Runner`].
    /// The default one is [`SimpleScheduler`].
    pub fn with_scheduler(self, scheduler: impl RewriteScheduler + 'static) -> Self {
        let scheduler = Box::new(scheduler);
        Self { scheduler, ..self }
    }

    /// Add an expression to the egraph to be run.
    ///
    /// The eclass id of this addition will be recorded in the
    /// [`roots`](Runner::roots) field, ordered by insertion order.
    pub fn with_expr(mut self, expr: &RecExpr) -> Self {
        let id = self.egraph.add_expr(expr);
        self.roots.push(id);
        self
    }

    /// Replace the [`EGraph`] of this `Runner`.
    pub fn with_egraph(self, egraph: EGraph) -> Self {
        Self { egraph, ..self }
    }

    /// The current limits.
    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    /// Whether this runner does one sweep or sweeps to a fixpoint.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Returns `true` if the run stopped because nothing changed any more,
    /// rather than on a limit or after a single sweep.
    pub fn reached_fixpoint(&self) -> bool {
        self.stop_reason == Some(StopReason::Saturated)
    }

    /// Run this `Runner` until it stops.
    /// After this, the field [`stop_reason`](Runner::stop_reason) is
    /// guaranteed to be set.
    ///
    /// Fails if a rule's builder fails; the e-graph is dropped with the
    /// runner since it may be half-applied.
    pub fn run<'a, R>(mut self, rules: R) -> Result<Self, Error>
    where
        R: IntoIterator<Item = &'a Rewrite>,
    {
        let rules: Vec<&Rewrite> = rules.into_iter().collect();
        check_rules(&rules);
        self.scheduler.start(self.mode);
        self.egraph.rebuild();
        loop {
            match self.run_one(&rules) {
                Ok(Ok(())) => {}
                Ok(Err(stop_reason)) => {
                    info!("Stopping: {:?}", stop_reason);
                    self.stop_reason = Some(stop_reason);
                    // push on a final iteration to mark the end state
                    self.iterations.push(Iteration {
                        stop_reason: self.stop_reason.clone(),
                        egraph_nodes: self.egraph.total_number_of_nodes(),
                        egraph_classes: self.egraph.number_of_classes(),
                        data: IterData::make(&self),
                        applied: Default::default(),
                        search_time: Default::default(),
                        hook_time: Default::default(),
                        apply_time: Default::default(),
                        rebuild_time: Default::default(),
                        total_time: Default::default(),
                        n_rebuilds: Default::default(),
                    });
                    break;
                }
                Err(e) => {
                    error!("Aborting: {}", e);
                    return Err(e);
                }
            }
        }

        Ok(self)
    }

    /// Summarizes the run so far.
    pub fn report(&self) -> Report {
        let sum = |f: fn(&Iteration<IterData>) -> f64| -> f64 { self.iterations.iter().map(f).sum() };
        Report {
            stop_reason: self.stop_reason.clone(),
            iterations: self.iterations.len(),
            egraph_nodes: self.egraph.total_number_of_nodes(),
            egraph_classes: self.egraph.number_of_classes(),
            memo_size: self.egraph.total_size(),
            unions: self.iterations.iter().map(Iteration::unions).sum(),
            rebuilds: self.iterations.iter().map(|i| i.n_rebuilds).sum(),
            search_time: sum(|i| i.search_time),
            apply_time: sum(|i| i.apply_time),
            rebuild_time: sum(|i| i.rebuild_time),
            total_time: sum(|i| i.total_time),
        }
    }

    /// Prints the [`report`](Runner::report).
    pub fn print_report(&self) {
        println!("{}", self.report());
    }

    fn run_one(&mut self, rules: &[&Rewrite]) -> Result<RunnerResult<()>, Error> {
        assert!(self.stop_reason.is_none());

        info!("\nIteration {}", self.iterations.len());

        self.try_start();
        if let Err(reason) = self.check_limits() {
            return Ok(Err(reason));
        }

        let hook_time = Instant::now();
        let mut hooks = std::mem::take(&mut self.hooks);
        let mut hooked = Ok(());
        for hook in &mut hooks {
            hooked = hook(self);
            if hooked.is_err() {
                break;
            }
        }
        self.hooks = hooks;
        if let Err(msg) = hooked {
            return Ok(Err(StopReason::Other(msg)));
        }
        let hook_time = hook_time.elapsed().as_secs_f64();

        let i = self.iterations.len();
        let egraph_nodes = self.egraph.total_number_of_nodes();
        let egraph_classes = self.egraph.number_of_classes();
        trace!("EGraph {:?}", self.egraph.dump());

        let start_time = Instant::now();

        // read phase: the graph is frozen until every rule has searched
        let matches: Vec<Vec<SearchMatches>> = rules
            .iter()
            .map(|rule| self.scheduler.search_rewrite(i, &self.egraph, rule))
            .collect();

        let search_time = start_time.elapsed().as_secs_f64();
        info!("Search time: {}", search_time);

        let apply_time = Instant::now();

        let mut applied = IndexMap::new();
        for (rw, ms) in rules.iter().zip(matches) {
            let total_matches: usize = ms.iter().map(|m| m.substs.len()).sum();
            if total_matches == 0 {
                continue;
            }

            debug!("Applying {} {} times", rw.name(), total_matches);

            let actually_matched = self.scheduler.apply_rewrite(i, &mut self.egraph, rw, ms)?;
            if actually_matched > 0 {
                *applied.entry(rw.name().to_owned()).or_insert(0) += actually_matched;
                debug!("Applied {} {} times", rw.name(), actually_matched);
            }
        }

        let apply_time = apply_time.elapsed().as_secs_f64();
        info!("Apply time: {}", apply_time);

        let rebuild_time = Instant::now();
        let n_rebuilds = self.egraph.rebuild();

        let rebuild_time = rebuild_time.elapsed().as_secs_f64();
        info!("Rebuild time: {}", rebuild_time);
        info!(
            "Size: n={}, e={}",
            self.egraph.total_size(),
            self.egraph.number_of_classes()
        );

        let saturated = applied.is_empty() && n_rebuilds == 0 && self.scheduler.can_stop(i);

        self.iterations.push(Iteration {
            applied,
            egraph_nodes,
            egraph_classes,
            hook_time,
            search_time,
            apply_time,
            rebuild_time,
            n_rebuilds,
            data: IterData::make(self),
            total_time: start_time.elapsed().as_secs_f64(),
            stop_reason: None,
        });

        Ok(if saturated {
            Err(StopReason::Saturated)
        } else if self.mode == Mode::Once {
            Err(StopReason::SingleSweep)
        } else {
            Ok(())
        })
    }

    fn try_start(&mut self) {
        self.start_time.get_or_insert_with(Instant::now);
    }

    fn check_limits(&self) -> RunnerResult<()> {
        let elapsed = self.start_time.map_or(Duration::ZERO, |t| t.elapsed());
        if elapsed > self.budget.time_limit {
            return Err(StopReason::TimeLimit(elapsed.as_secs_f64()));
        }

        let size = self.egraph.total_number_of_nodes();
        if size > self.budget.node_limit {
            return Err(StopReason::NodeLimit(size));
        }

        if self.iterations.len() >= self.budget.iter_limit {
            return Err(StopReason::IterationLimit(self.iterations.len()));
        }

        Ok(())
    }
}

fn check_rules(rules: &[&Rewrite]) {
    let mut name_counts = IndexMap::new();
    for rw in rules {
        *name_counts.entry(rw.name()).or_default() += 1
    }

    name_counts.retain(|_, count: &mut usize| *count > 1);
    if !name_counts.is_empty() {
        warn!("Duplicated rule names may affect rule reporting and scheduling.");
        for (name, &count) in name_counts.iter() {
            warn!("Rule '{}' appears {} times", name, count);
        }
    }
}

/// A summary of a [`Runner`]'s run, from [`Runner::report`].
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize))]
#[non_exhaustive]
pub struct Report {
    /// Why the run stopped, if it has.
    pub stop_reason: Option<StopReason>,
    /// Number of recorded iterations.
    pub iterations: usize,
    /// Final number of enodes.
    pub egraph_nodes: usize,
    /// Final number of eclasses.
    pub egraph_classes: usize,
    /// Final size of the hash-cons table.
    pub memo_size: usize,
    /// New unions over the whole run.
    pub unions: usize,
    /// Unions found by rebuilding.
    pub rebuilds: usize,
    /// Seconds spent searching.
    pub search_time: f64,
    /// Seconds spent applying.
    pub apply_time: f64,
    /// Seconds spent rebuilding.
    pub rebuild_time: f64,
    /// Seconds in total.
    pub total_time: f64,
}

impl Display for Report {
    #[rustfmt::skip]
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let Report { iterations: iters, total_time, .. } = *self;
        writeln!(f, "Runner report")?;
        writeln!(f, "=============")?;
        writeln!(f, "  Stop reason: {:?}", self.stop_reason)?;
        writeln!(f, "  Iterations: {}", iters)?;
        writeln!(f, "  Egraph size: {} nodes, {} classes, {} memo", self.egraph_nodes, self.egraph_classes, self.memo_size)?;
        writeln!(f, "  Unions: {}, of which {} from rebuilding", self.unions, self.rebuilds)?;
        writeln!(f, "  Total time: {}", total_time)?;
        writeln!(f, "    Search:  ({:.2}) {}", self.search_time / total_time, self.search_time)?;
        writeln!(f, "    Apply:   ({:.2}) {}", self.apply_time / total_time, self.apply_time)?;
        write!(f, "    Rebuild: ({:.2}) {}", self.rebuild_time / total_time, self.rebuild_time)
    }
}

/** Decides which [`Rewrite`]s search in each sweep of a [`Runner`].

The runner asks its scheduler for every rule's matches during the read
phase and hands the matches back to it during the write phase. A scheduler
that drops a rule's matches must also veto [`can_stop`](RewriteScheduler::can_stop),
or the run would report a fixpoint it never reached.
*/
#[allow(unused_variables)]
pub trait RewriteScheduler {
    /// Called once by [`Runner::run`] before the first sweep.
    fn start(&mut self, mode: Mode) {}

    /// Asked after a sweep that made no unions. Returning `false` keeps
    /// the run going.
    fn can_stop(&mut self, iteration: usize) -> bool {
        true
    }

    /// The matches of `rewrite` in sweep `iteration`. By default every
    /// match from [`Rewrite::search`].
    fn search_rewrite(
        &mut self,
        iteration: usize,
        egraph: &EGraph,
        rewrite: &Rewrite,
    ) -> Vec<SearchMatches> {
        rewrite.search(egraph)
    }

    /// Applies `matches` and returns the number of new unions. By default
    /// this is [`Rewrite::apply`].
    fn apply_rewrite(
        &mut self,
        iteration: usize,
        egraph: &mut EGraph,
        rewrite: &Rewrite,
        matches: Vec<SearchMatches>,
    ) -> Result<usize, Error> {
        Ok(rewrite.apply(egraph, &matches)?.len())
    }
}

/// Runs every rule in every sweep. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleScheduler;

impl RewriteScheduler for SimpleScheduler {}

/// Benches rules that match too often.
///
/// Every rule starts with the same match limit. When a sweep finds more
/// substitutions for a rule than its limit, those matches are dropped and
/// the rule sits out a number of sweeps; each bench doubles both the
/// rule's limit and its next bench length. A sweep without unions does not
/// end the run while some rule is benched. The benched rules come back
/// early instead.
///
/// In a [`Mode::Once`] run nothing is benched, so the single sweep still
/// runs every rule.
#[derive(Debug)]
pub struct BackoffScheduler {
    match_limit: usize,
    ban_length: usize,
    banning: bool,
    benches: IndexMap<String, Bench>,
    exempt: IndexSet<String>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Bench {
    times: u32,
    until: usize,
}

impl Bench {
    fn scaled(base: usize, times: u32) -> usize {
        base.saturating_mul(2usize.saturating_pow(times))
    }
}

impl BackoffScheduler {
    /// Substitutions a rule may produce in one sweep before its first
    /// bench. Default: 1,000
    pub fn with_initial_match_limit(self, match_limit: usize) -> Self {
        Self { match_limit, ..self }
    }

    /// Sweeps a rule sits out on its first bench. Default: 5
    pub fn with_ban_length(self, ban_length: usize) -> Self {
        Self { ban_length, ..self }
    }

    /// Never bench the rule called `name`.
    pub fn do_not_ban(mut self, name: impl Into<String>) -> Self {
        self.exempt.insert(name.into());
        self
    }
}

impl Default for BackoffScheduler {
    fn default() -> Self {
        BackoffScheduler {
            match_limit: 1_000,
            ban_length: 5,
            banning: true,
            benches: IndexMap::new(),
            exempt: IndexSet::new(),
        }
    }
}

impl RewriteScheduler for BackoffScheduler {
    fn start(&mut self, mode: Mode) {
        self.banning = mode == Mode::Fixpoint;
        self.benches.clear();
    }

    fn can_stop(&mut self, iteration: usize) -> bool {
        let next = self
            .benches
            .values()
            .map(|b| b.until)
            .filter(|&until| until > iteration)
            .min();
        let next = match next {
            Some(next) => next,
            None => return true,
        };

        // pull every bench in by the same amount, so the earliest ends now
        let skip = next - iteration;
        let mut back = vec![];
        for (name, bench) in self.benches.iter_mut().filter(|(_, b)| b.until > iteration) {
            bench.until -= skip;
            if bench.until == iteration {
                back.push(name.as_str());
            }
        }
        info!("Quiet sweep with benched rules, skipping {} sweeps to bring back {}", skip, back.join(", "));
        false
    }

    fn search_rewrite(
        &mut self,
        iteration: usize,
        egraph: &EGraph,
        rewrite: &Rewrite,
    ) -> Vec<SearchMatches> {
        let name = rewrite.name();
        if !self.banning || self.exempt.contains(name) {
            return rewrite.search(egraph);
        }

        let bench = self.benches.entry(name.to_owned()).or_default();
        if iteration < bench.until {
            debug!("{} is benched until sweep {}", name, bench.until);
            return vec![];
        }

        let matches = rewrite.search(egraph);
        let found: usize = matches.iter().map(|m| m.substs.len()).sum();
        let limit = Bench::scaled(self.match_limit, bench.times);
        if found <= limit {
            return matches;
        }

        let length = Bench::scaled(self.ban_length, bench.times);
        bench.times += 1;
        bench.until = iteration + length;
        info!(
            "Benching {} for {} sweeps: {} substitutions over a limit of {}",
            name, length, found, limit
        );
        vec![]
    }
}

/// A value computed from the [`Runner`] after each sweep and stored in
/// that sweep's [`Iteration::data`]. The default is `()`.
///
/// ```
/// use tensor_eqsat::*;
///
/// struct Cheapest(f64);
///
/// impl IterationData for Cheapest {
///     fn make(runner: &Runner<Self>) -> Self {
///         let extractor = Extractor::new(&runner.egraph, NodeCount);
///         let cost = extractor.find_best_cost(runner.roots[0]).unwrap();
///         Cheapest(cost.get(Factor::Nodes))
///     }
/// }
///
/// let rules = rules::algebraic().rules;
/// let runner = Runner::<Cheapest>::new()
///     .with_expr(&"(mul (add 1 2) 1)".parse().unwrap())
///     .run(&rules)
///     .unwrap();
/// for its in runner.iterations.windows(2) {
///     assert!(its[0].data.0 >= its[1].data.0);
/// }
/// ```
pub trait IterationData: Sized {
    /// Given the current [`Runner`], make the data to be put in this
    /// [`Iteration`].
    fn make(runner: &Runner<Self>) -> Self;
}

impl IterationData for () {
    fn make(_: &Runner<Self>) -> Self {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::*;

    fn rules() -> Vec<Rewrite> {
        vec![
            rewrite!("commute-add"; "(add ?a ?b)" => "(add ?b ?a)"),
            rewrite!("add-0"; "(add ?a 0)" => "?a"),
        ]
    }

    #[test]
    fn saturates() {
        crate::init_logger();
        let runner = Runner::default()
            .with_expr(&"(add 0 x)".parse().unwrap())
            .run(&rules())
            .unwrap();
        assert!(runner.reached_fixpoint());
        let root = runner.roots[0];
        let x = runner.egraph.lookup(&ENode::input("x")).unwrap();
        assert_eq!(runner.egraph.find(root), runner.egraph.find(x));

        // the last sweep found nothing, the final record marks the stop
        let n = runner.iterations.len();
        assert_eq!(runner.iterations[n - 2].unions(), 0);
        assert_eq!(runner.iterations[n - 1].stop_reason, Some(StopReason::Saturated));
    }

    #[test]
    fn single_sweep() {
        let runner = Runner::default()
            .with_mode(Mode::Once)
            .with_expr(&"(add 0 x)".parse().unwrap())
            .run(&rules())
            .unwrap();
        // commuting then dropping the zero takes two sweeps
        assert_eq!(runner.stop_reason, Some(StopReason::SingleSweep));
        let root = runner.egraph.find(runner.roots[0]);
        let x = runner.egraph.lookup(&ENode::input("x")).unwrap();
        assert_ne!(root, runner.egraph.find(x));
    }

    #[test]
    fn iteration_limit() {
        // associativity-free but unbounded: x -> neg(neg(x)) keeps growing
        let grow = rewrite!("grow"; "(exp ?a)" => "(exp (neg (neg ?a)))");
        let runner = Runner::default()
            .with_iter_limit(3)
            .with_expr(&"(exp x)".parse().unwrap())
            .run(&[grow])
            .unwrap();
        assert_eq!(runner.stop_reason, Some(StopReason::IterationLimit(3)));
        assert!(!runner.reached_fixpoint());
        assert_eq!(runner.iterations.len(), 4);
    }

    #[test]
    fn node_limit() {
        let grow = rewrite!("grow"; "(exp ?a)" => "(exp (neg (neg ?a)))");
        let runner = Runner::default()
            .with_node_limit(10)
            .with_expr(&"(exp x)".parse().unwrap())
            .run(&[grow])
            .unwrap();
        assert!(matches!(runner.stop_reason, Some(StopReason::NodeLimit(n)) if n > 10));
    }

    #[test]
    fn hook_stops() {
        let runner = Runner::default()
            .with_expr(&"(add 0 x)".parse().unwrap())
            .with_hook(|r| match r.iterations.len() {
                0 => Ok(()),
                _ => Err("enough".into()),
            })
            .run(&rules())
            .unwrap();
        assert_eq!(runner.stop_reason, Some(StopReason::Other("enough".into())));
    }

    #[test]
    fn builder_failure_aborts() {
        let bad = Rewrite::from_fn("bad", "(add ?a ?b)".parse().unwrap(), |_, _, _| {
            Err(BuildError::new("boom"))
        })
        .unwrap();
        let result = Runner::default()
            .with_expr(&"(add 0 x)".parse().unwrap())
            .run(&[bad]);
        match result {
            Err(Error::RuleFailed { rule, .. }) => assert_eq!(rule, "bad"),
            Err(e) => panic!("wrong error {}", e),
            Ok(_) => panic!("should have failed"),
        }
    }

    #[test]
    fn backoff_benches_only_in_fixpoint_runs() {
        let start: RecExpr = "(add 0 (add x y))".parse().unwrap();
        let scheduler = || BackoffScheduler::default().with_initial_match_limit(1);

        // two commute matches exceed the limit, so the first sweep drops them
        let runner = Runner::default()
            .with_scheduler(scheduler())
            .with_expr(&start)
            .run(&rules())
            .unwrap();
        assert!(!runner.iterations[0].applied.contains_key("commute-add"));
        assert!(runner.reached_fixpoint());
        let xy = runner.egraph.lookup_expr(&"(add x y)".parse().unwrap()).unwrap();
        assert_eq!(runner.egraph.find(runner.roots[0]), runner.egraph.find(xy));

        let runner = Runner::default()
            .with_mode(Mode::Once)
            .with_scheduler(scheduler())
            .with_expr(&start)
            .run(&rules())
            .unwrap();
        assert_eq!(runner.iterations[0].applied.get("commute-add"), Some(&2));

        let runner = Runner::default()
            .with_scheduler(scheduler().do_not_ban("commute-add"))
            .with_expr(&start)
            .run(&rules())
            .unwrap();
        assert_eq!(runner.iterations[0].applied.get("commute-add"), Some(&2));
    }

    #[test]
    fn backoff_bans_explosive_rules() {
        let runner = Runner::default()
            .with_scheduler(BackoffScheduler::default().with_initial_match_limit(1))
            .with_expr(&"(add 0 x)".parse().unwrap())
            .run(&rules())
            .unwrap();
        // commute-add is banned once, then fast-forwarded back in
        assert!(runner.reached_fixpoint());
        let x = runner.egraph.lookup(&ENode::input("x")).unwrap();
        assert_eq!(runner.egraph.find(runner.roots[0]), runner.egraph.find(x));
    }
}
