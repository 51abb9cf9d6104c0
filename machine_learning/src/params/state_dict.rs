use std::{
    collections::{BTreeMap, btree_map},
    ops::Bound,
};

use ndarray::ArrayD;

/// A mapping from parameter names to tensors, the in-memory form of a checkpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDict {
    tensors: BTreeMap<String, ArrayD<f32>>,
}

impl StateDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, tensor: ArrayD<f32>) -> Option<ArrayD<f32>> {
        self.tensors.insert(key.into(), tensor)
    }

    pub fn get(&self, key: &str) -> Option<&ArrayD<f32>> {
        self.tensors.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<ArrayD<f32>> {
        self.tensors.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.tensors.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Iterates the keys in lexicographic order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, ArrayD<f32>> {
        self.tensors.iter()
    }

    /// Whether any key starts with `prefix`.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.tensors
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .next()
            .is_some_and(|(k, _)| k.starts_with(prefix))
    }

    /// Strips `prefix` from every key, only if all of them carry it.
    ///
    /// # Returns
    /// Whether the keys were rewritten.
    pub fn strip_prefix(&mut self, prefix: &str) -> bool {
        if self.is_empty() || !self.keys().all(|k| k.starts_with(prefix)) {
            return false;
        }

        let tensors = std::mem::take(&mut self.tensors);
        self.tensors = tensors
            .into_iter()
            .map(|(k, v)| (k[prefix.len()..].to_string(), v))
            .collect();

        true
    }
}

impl FromIterator<(String, ArrayD<f32>)> for StateDict {
    fn from_iter<I: IntoIterator<Item = (String, ArrayD<f32>)>>(iter: I) -> Self {
        Self {
            tensors: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for StateDict {
    type Item = (String, ArrayD<f32>);
    type IntoIter = btree_map::IntoIter<String, ArrayD<f32>>;

    fn into_iter(self) -> Self::IntoIter {
        self.tensors.into_iter()
    }
}

impl<'a> IntoIterator for &'a StateDict {
    type Item = (&'a String, &'a ArrayD<f32>);
    type IntoIter = btree_map::Iter<'a, String, ArrayD<f32>>;

    fn into_iter(self) -> Self::IntoIter {
        self.tensors.iter()
    }
}
