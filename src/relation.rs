//! Object lookup backing the metric indexes.
//!
//! Metric trees store object ids only; the actual objects live in a
//! [`Relation`] the caller supplies. A missing id surfaces as
//! [`TreeError::NotFound`], never as an empty result.

use crate::error::{Result, TreeError};

/// Opaque identifier of an indexed object.
pub type ObjectId = u64;

/// Read access to the indexed object collection.
pub trait Relation<O> {
    /// Resolve an object by id.
    fn get(&self, id: ObjectId) -> Result<&O>;

    /// All ids in the relation, in iteration order.
    fn ids(&self) -> Vec<ObjectId>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Simple in-memory relation over (id, object) pairs.
#[derive(Clone)]
pub struct VecRelation<O> {
    entries: Vec<(ObjectId, O)>,
    index: std::collections::HashMap<ObjectId, usize>,
}

impl<O> VecRelation<O> {
    pub fn new(entries: Vec<(ObjectId, O)>) -> Self {
        let index = entries
            .iter()
            .enumerate()
            .map(|(i, (id, _))| (*id, i))
            .collect();
        VecRelation { entries, index }
    }
}

impl<O> Relation<O> for VecRelation<O> {
    fn get(&self, id: ObjectId) -> Result<&O> {
        self.index
            .get(&id)
            .map(|&i| &self.entries[i].1)
            .ok_or(TreeError::NotFound(id))
    }

    fn ids(&self) -> Vec<ObjectId> {
        self.entries.iter().map(|(id, _)| *id).collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let rel = VecRelation::new(vec![(1, "a"), (5, "b")]);
        assert_eq!(rel.len(), 2);
        assert_eq!(*rel.get(5).unwrap(), "b");
        assert_eq!(rel.ids(), vec![1, 5]);
    }

    #[test]
    fn test_missing_id_is_not_found() {
        let rel = VecRelation::new(vec![(1, "a")]);
        assert!(matches!(rel.get(9), Err(TreeError::NotFound(9))));
    }
}
