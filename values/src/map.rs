//! Named tensor collections passed to and returned from model sessions.

use std::collections::BTreeMap;

use crate::error::{ValueError, ValueResult};
use crate::tensor::Tensor;

/// Ordered map from graph input/output name to tensor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TensorMap {
    entries: BTreeMap<String, Tensor>,
}

impl TensorMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a tensor, returning the previous one under that name.
    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) -> Option<Tensor> {
        self.entries.insert(name.into(), tensor)
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, tensor: Tensor) -> Self {
        self.insert(name, tensor);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Tensor> {
        self.entries.remove(name)
    }

    /// Like [`get`](Self::get) but a missing name is an error.
    pub fn require(&self, name: &str) -> ValueResult<&Tensor> {
        self.entries
            .get(name)
            .ok_or_else(|| ValueError::MissingTensor { name: name.to_string() })
    }

    /// Removes and returns a tensor that must be present.
    pub fn take(&mut self, name: &str) -> ValueResult<Tensor> {
        self.entries
            .remove(name)
            .ok_or_else(|| ValueError::MissingTensor { name: name.to_string() })
    }

    /// First present tensor among `names`, in the order given.
    pub fn first_of<'a>(&self, names: &[&'a str]) -> Option<(&'a str, &Tensor)> {
        names
            .iter()
            .find_map(|&n| self.entries.get(n).map(|t| (n, t)))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Moves every entry of `other` into this map, overwriting duplicates.
    pub fn extend(&mut self, other: TensorMap) {
        self.entries.extend(other.entries);
    }
}

impl IntoIterator for TensorMap {
    type Item = (String, Tensor);
    type IntoIter = std::collections::btree_map::IntoIter<String, Tensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl FromIterator<(String, Tensor)> for TensorMap {
    fn from_iter<I: IntoIterator<Item = (String, Tensor)>>(iter: I) -> Self {
        Self { entries: iter.into_iter().collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_names_missing_tensor() {
        let map = TensorMap::new().with("logits", Tensor::zeros_f32(vec![1, 2]));
        assert!(map.require("logits").is_ok());
        assert_eq!(
            map.require("pooler_output").unwrap_err(),
            ValueError::MissingTensor { name: "pooler_output".to_string() }
        );
    }

    #[test]
    fn test_first_of_respects_priority() {
        let map = TensorMap::new()
            .with("logits", Tensor::zeros_f32(vec![1]))
            .with("token_embeddings", Tensor::zeros_f32(vec![2]));
        let (name, _) = map
            .first_of(&["last_hidden_state", "logits", "token_embeddings"])
            .expect("one present");
        assert_eq!(name, "logits");
    }
}
