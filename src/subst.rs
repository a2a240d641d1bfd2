use std::fmt;
use std::str::FromStr;

use smallvec::SmallVec;

use crate::{Id, Literal, Params, ParseError, Symbol};

/// A variable for use in [`Pattern`]s or [`Subst`]s.
///
/// This implements [`FromStr`], and will only parse if it has a
/// leading `?`.
///
/// [`Pattern`]: crate::Pattern
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct Var(Symbol);

impl Var {
    /// The variable `?name`; a leading `?` in `name` is not doubled.
    pub fn new(name: &str) -> Self {
        if name.starts_with('?') {
            Var(name.into())
        } else {
            Var(format!("?{}", name).into())
        }
    }
}

impl FromStr for Var {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() > 1 && s.starts_with('?') && !s.contains(char::is_whitespace) {
            Ok(Var(s.into()))
        } else {
            Err(ParseError::Var(s.to_owned()))
        }
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a [`Var`] is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Binding {
    /// A single e-class.
    Class(Id),
    /// The e-classes matched by a variadic tail, in operand order.
    List(SmallVec<[Id; 4]>),
    /// A captured constant value.
    Literal(Literal),
    /// A captured parameter list.
    Params(Params),
}

/// A substitution mapping [`Var`]s to what they matched.
///
/// Entries are kept sorted by variable, so two substitutions with the same
/// bindings compare and hash equal regardless of binding order.
#[derive(Default, Clone, PartialEq, Eq, Hash)]
pub struct Subst {
    vec: SmallVec<[(Var, Binding); 3]>,
}

impl Subst {
    /// Insert something, returning the old binding if present.
    pub fn insert(&mut self, var: Var, binding: Binding) -> Option<Binding> {
        match self.vec.binary_search_by(|(v, _)| v.cmp(&var)) {
            Ok(i) => Some(std::mem::replace(&mut self.vec[i].1, binding)),
            Err(i) => {
                self.vec.insert(i, (var, binding));
                None
            }
        }
    }

    /// Retrieve a `Var`, returning `None` if not present.
    pub fn get(&self, var: Var) -> Option<&Binding> {
        self.vec
            .binary_search_by(|(v, _)| v.cmp(&var))
            .ok()
            .map(|i| &self.vec[i].1)
    }

    /// The class bound to `var`, if it is bound to one.
    pub fn class(&self, var: Var) -> Option<Id> {
        match self.get(var)? {
            Binding::Class(id) => Some(*id),
            _ => None,
        }
    }

    /// The classes bound to a variadic `var`.
    pub fn list(&self, var: Var) -> Option<&[Id]> {
        match self.get(var)? {
            Binding::List(ids) => Some(ids),
            _ => None,
        }
    }

    /// The constant bound to `var`.
    pub fn literal(&self, var: Var) -> Option<&Literal> {
        match self.get(var)? {
            Binding::Literal(lit) => Some(lit),
            _ => None,
        }
    }

    /// The parameter list bound to `var`.
    pub fn params(&self, var: Var) -> Option<&Params> {
        match self.get(var)? {
            Binding::Params(params) => Some(params),
            _ => None,
        }
    }

    /// Iterates over the bindings in variable order.
    pub fn iter(&self) -> impl Iterator<Item = (Var, &Binding)> {
        self.vec.iter().map(|(v, b)| (*v, b))
    }

    /// Number of bound variables.
    pub fn len(&self) -> usize {
        self.vec.len()
    }

    /// Returns `true` if nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.vec.is_empty()
    }
}

impl std::ops::Index<Var> for Subst {
    type Output = Id;

    fn index(&self, var: Var) -> &Self::Output {
        match self.get(var) {
            Some(Binding::Class(id)) => id,
            other => panic!("Var '{}' is not bound to a class in {:?}: {:?}", var, self, other),
        }
    }
}

impl fmt::Debug for Subst {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut map = f.debug_map();
        for (var, binding) in &self.vec {
            match binding {
                Binding::Class(id) => map.entry(var, id),
                Binding::List(ids) => map.entry(var, ids),
                Binding::Literal(lit) => map.entry(var, &format_args!("{}", lit)),
                Binding::Params(ps) => map.entry(var, ps),
            };
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_parsing() {
        assert_eq!("?x".parse::<Var>().unwrap(), Var::new("x"));
        assert_eq!(Var::new("?x"), Var::new("x"));
        assert!("x".parse::<Var>().is_err());
        assert!("?".parse::<Var>().is_err());
        assert_eq!(Var::new("y").to_string(), "?y");
    }

    #[test]
    fn order_independent() {
        let (a, b) = (Var::new("a"), Var::new("b"));
        let mut s1 = Subst::default();
        s1.insert(b, Binding::Class(1.into()));
        s1.insert(a, Binding::Literal(Literal::Int(3)));
        let mut s2 = Subst::default();
        s2.insert(a, Binding::Literal(Literal::Int(3)));
        s2.insert(b, Binding::Class(1.into()));
        assert_eq!(s1, s2);

        assert_eq!(s1[b], Id::from(1));
        assert_eq!(s1.literal(a), Some(&Literal::Int(3)));
        assert_eq!(s1.class(a), None);
        assert_eq!(format!("{:?}", s1), "{?a: 3, ?b: 1}");

        let old = s1.insert(b, Binding::Class(2.into()));
        assert_eq!(old, Some(Binding::Class(1.into())));
        assert_eq!(s1.len(), 2);
    }
}
