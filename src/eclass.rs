use std::iter::ExactSizeIterator;

use crate::{ENode, Id, Literal, TensorType};

/// The analysis payload of an [`EClass`].
///
/// Type tags are computed outside the engine, so the only thing tracked here
/// is the tag itself. On a merge the first known tag wins; two different
/// known tags mean some rule equated values of different types, which is
/// logged but otherwise tolerated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct ClassData {
    /// The type of every value in the class, if known.
    pub ty: Option<TensorType>,
}

impl ClassData {
    /// Merges `other` into `self`, returning true if `self` changed.
    pub(crate) fn merge(&mut self, other: ClassData, id: Id) -> bool {
        match (&self.ty, other.ty) {
            (None, Some(ty)) => {
                self.ty = Some(ty);
                true
            }
            (Some(mine), Some(theirs)) if *mine != theirs => {
                log::warn!(
                    "Merging e-class {} of type {} with a class of type {}",
                    id,
                    mine,
                    theirs
                );
                false
            }
            _ => false,
        }
    }
}

/// An equivalence class of [`ENode`]s.
#[non_exhaustive]
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct EClass {
    /// This eclass's id.
    pub id: Id,
    /// The equivalent enodes in this equivalence class.
    ///
    /// After a rebuild these are canonical, sorted and free of duplicates.
    pub nodes: Vec<ENode>,
    /// The analysis data associated with this eclass.
    pub data: ClassData,
    /// The nodes that use this class as an operand, with the class each
    /// of them lives in.
    pub(crate) parents: Vec<(ENode, Id)>,
}

impl EClass {
    pub(crate) fn new(id: Id, node: ENode, data: ClassData) -> Self {
        EClass {
            id,
            nodes: vec![node],
            data,
            parents: vec![],
        }
    }

    /// Returns `true` if the `eclass` is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the number of enodes in this eclass.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Iterates over the enodes in this eclass.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &ENode> {
        self.nodes.iter()
    }

    /// Iterates over the childless enodes in this eclass.
    pub fn leaves(&self) -> impl Iterator<Item = &ENode> {
        self.nodes.iter().filter(|&n| n.is_leaf())
    }

    /// The value of a `const` member, if the class has one.
    pub fn literal(&self) -> Option<&Literal> {
        self.nodes.iter().find_map(ENode::literal)
    }

    /// The class's type tag, if known.
    pub fn ty(&self) -> Option<&TensorType> {
        self.data.ty.as_ref()
    }

    /// Iterates over the (possibly stale) parent entries of this class.
    pub fn parents(&self) -> impl ExactSizeIterator<Item = &(ENode, Id)> {
        self.parents.iter()
    }
}
