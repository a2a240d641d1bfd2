#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
/*!

`tensor-eqsat` is an equality-saturation rewrite engine for tensor programs.

A region of a tensor program goes in as a [`RecExpr`], is loaded into an
[`EGraph`], gets rewritten by a [`Runner`] applying [`Rewrite`]s until it
saturates or runs out of [`Budget`], and comes back out as the cheapest
equivalent [`RecExpr`] an [`Extractor`] can find under some [`CostModel`].
A [`Session`] bundles the operators ([`OpRegistry`]) and named rule sets
([`rules`]) one compilation uses.

Type inference, code generation and the rest of a compiler live elsewhere:
this crate treats [`TensorType`]s as opaque tags it only compares and reads
shapes from.

## Example

```
use tensor_eqsat::{*, rewrite as rw};

let rules: &[Rewrite] = &[
    rw!("mul-1"; "(mul ?x 1)" => "?x"),
    rw!("drop-marker"; "(marker ?x)" => "?x"),
];

let start: RecExpr = "(mul (marker (add a b)) 1)".parse().unwrap();
let runner = Runner::default().with_expr(&start).run(rules).unwrap();
assert!(runner.reached_fixpoint());

let extractor = Extractor::new(&runner.egraph, NodeCount);
let (cost, best) = extractor.find_best(runner.roots[0]).unwrap();
assert_eq!(best.to_string(), "(add a b)");
assert_eq!(cost.get(Factor::Nodes), 3.0);
```

## Logging

Many parts of `tensor-eqsat` dump useful logging info using the [`log`](https://docs.rs/log/) crate.
The easiest way to see this info is to use the [`env_logger`](https://docs.rs/env_logger/)
crate in your binary or test.
The simplest way to enable `env_logger` is to put the following line near the top of your `main`:
`env_logger::init();`.
Then, set the environment variable `RUST_LOG=tensor_eqsat=info`, or use `warn` or `debug` instead of info
for less or more logging.

*/

#[macro_use]
mod macros;

#[doc(hidden)]
pub mod test;

pub mod rules;

mod cost;
mod dot;
mod eclass;
mod egraph;
mod error;
mod extract;
mod language;
mod op;
mod pattern;
mod rewrite;
mod run;
mod session;
mod subst;
mod ty;
mod unionfind;
mod util;

/// A key to identify [`EClass`]es within an
/// [`EGraph`], or nodes within a [`RecExpr`].
#[derive(Clone, Copy, Default, Ord, PartialOrd, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-1", serde(transparent))]
pub struct Id(u32);

impl From<usize> for Id {
    fn from(n: usize) -> Id {
        Id(n as u32)
    }
}

impl From<Id> for usize {
    fn from(id: Id) -> usize {
        id.0 as usize
    }
}

impl std::fmt::Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) use unionfind::UnionFind;

pub use {
    cost::*,
    dot::{DumpEdge, DumpNode, Dot, GraphDump},
    eclass::{ClassData, EClass},
    egraph::EGraph,
    error::{Error, ParseError},
    extract::Extractor,
    language::{ENode, RecExpr},
    op::{builtin, CostFn, Literal, Op, OpInfo, OpKind, OpRegistry, Params},
    pattern::{
        Args, ClassGuard, LiteralGuard, LiteralMatch, ParamGuard, ParamMatch, Pattern,
        SearchMatches,
    },
    rewrite::{BuildError, Builder, Rewrite, Template, TemplateNode},
    rules::RuleSet,
    run::*,
    session::Session,
    subst::{Binding, Subst, Var},
    ty::{DType, TensorType},
    util::Symbol,
};

#[cfg(test)]
fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
