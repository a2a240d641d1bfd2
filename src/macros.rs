/** A macro to easily make [`Rewrite`](crate::Rewrite)s.

The `rewrite!` macro greatly simplifies creating simple, purely
syntactic rewrites while also allowing more complex ones.

This panics if [`Rewrite::new`](crate::Rewrite::new) fails, or if a
pattern string does not parse.

The simplest form `rewrite!(a; b => c)` creates a [`Rewrite`](crate::Rewrite)
with name `a`, left-hand side `b` and right-hand side `c`.
Both sides may be string literals, which are parsed into
[`Pattern`](crate::Pattern)s, or any other expression evaluating to a
`Pattern`.

A bidirectional form `rewrite!(a; b <=> c)` creates two rewrites,
`a` and `a-rev`, and returns them in a `Vec`.

```
use tensor_eqsat::{*, rewrite as rw};

let rules: Vec<Rewrite> = vec![
    rw!("commute-add"; "(add ?a ?b)" => "(add ?b ?a)"),
    rw!("drop-marker"; "(marker ?x)" => "?x"),
    rw!("transpose-twice"; {
        let t = Pattern::op("transpose", [Pattern::var("x")]);
        Pattern::op("transpose", [t])
    } => "?x"),
];

let both: Vec<Rewrite> = rw!("neg-sub"; "(neg (sub ?a ?b))" <=> "(sub ?b ?a)");
assert_eq!(both[1].name(), "neg-sub-rev");
```
*/
#[macro_export]
macro_rules! rewrite {
    (
        $name:expr;
        $lhs:tt => $rhs:tt
    ) => {{
        let lhs: $crate::Pattern = $crate::__rewrite!(@parse $lhs);
        let rhs: $crate::Pattern = $crate::__rewrite!(@parse $rhs);
        $crate::Rewrite::new($name.to_string(), lhs, rhs).unwrap()
    }};
    (
        $name:expr;
        $lhs:tt <=> $rhs:tt
    ) => {{
        let name = $name;
        let name2 = format!("{}-rev", name);
        vec![
            $crate::rewrite!(name; $lhs => $rhs),
            $crate::rewrite!(name2; $rhs => $lhs),
        ]
    }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! __rewrite {
    (@parse $rhs:literal) => {
        $rhs.parse::<$crate::Pattern>().unwrap()
    };
    (@parse $rhs:expr) => {
        $rhs
    };
}
