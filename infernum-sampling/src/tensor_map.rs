//! Named tensor container used to pass step inputs and outputs.

use std::collections::HashMap;

use crate::{Error, Result};

/// A mapping from tensor name to backend tensor.
///
/// Optional tensors are detected by key lookup. Required tensors are fetched
/// with [`TensorMap::require`] / [`TensorMap::take_required`], which turn a
/// missing key into [`Error::MissingTensor`].
#[derive(Debug, Clone)]
pub struct TensorMap<T> {
    tensors: HashMap<String, T>,
}

impl<T> Default for TensorMap<T> {
    fn default() -> Self {
        Self {
            tensors: HashMap::new(),
        }
    }
}

impl<T> TensorMap<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tensor, returning the previous one stored under `name`.
    pub fn insert(&mut self, name: impl Into<String>, tensor: T) -> Option<T> {
        self.tensors.insert(name.into(), tensor)
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, tensor: T) -> Self {
        self.insert(name, tensor);
        self
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&T> {
        self.tensors.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        self.tensors.get_mut(name)
    }

    /// Borrow a tensor that must be present.
    ///
    /// # Errors
    /// Returns `MissingTensor` if `name` is absent.
    pub fn require(&self, name: &str) -> Result<&T> {
        self.tensors
            .get(name)
            .ok_or_else(|| Error::MissingTensor(name.to_string()))
    }

    /// Remove and return a tensor if present.
    pub fn take(&mut self, name: &str) -> Option<T> {
        self.tensors.remove(name)
    }

    /// Remove and return a tensor that must be present.
    ///
    /// # Errors
    /// Returns `MissingTensor` if `name` is absent.
    pub fn take_required(&mut self, name: &str) -> Result<T> {
        self.take(name)
            .ok_or_else(|| Error::MissingTensor(name.to_string()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }
}

impl<T, S: Into<String>> FromIterator<(S, T)> for TensorMap<T> {
    fn from_iter<I: IntoIterator<Item = (S, T)>>(iter: I) -> Self {
        Self {
            tensors: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_missing() {
        let map: TensorMap<u32> = TensorMap::new();
        match map.require("logits") {
            Err(Error::MissingTensor(name)) => assert_eq!(name, "logits"),
            other => panic!("expected MissingTensor, got {other:?}"),
        }
    }

    #[test]
    fn test_take_and_reinsert() {
        let mut map = TensorMap::new().with("output_ids", 7_u32).with("finished", 1);
        assert_eq!(map.len(), 2);
        let ids = map.take_required("output_ids").unwrap();
        assert!(!map.contains("output_ids"));
        map.insert("output_ids", ids);
        assert_eq!(map.get("output_ids"), Some(&7));
    }

    #[test]
    fn test_from_iter() {
        let map: TensorMap<i32> = [("step", 3), ("ite", 0)].into_iter().collect();
        assert!(map.contains("step"));
        assert_eq!(*map.require("ite").unwrap(), 0);
        let mut names: Vec<_> = map.names().collect();
        names.sort_unstable();
        assert_eq!(names, vec!["ite", "step"]);
    }
}
