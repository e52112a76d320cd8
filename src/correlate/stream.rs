use crate::shots::Shot;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Occupancy labels of one detector keyed by shot id.
///
/// Only shots that carry a label take part in correlation; excluded shots are
/// simply absent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupancyStream {
    labels: BTreeMap<u64, bool>,
}

impl OccupancyStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Label every included shot; strictly above `threshold` is occupied.
    pub fn from_shots(shots: &[Shot], threshold: f64) -> Self {
        shots
            .iter()
            .filter(|s| s.include)
            .map(|s| (s.id, s.count > threshold))
            .collect()
    }

    pub fn from_labels(labels: impl IntoIterator<Item = (u64, bool)>) -> Self {
        labels.into_iter().collect()
    }

    pub fn insert(&mut self, id: u64, occupied: bool) {
        self.labels.insert(id, occupied);
    }

    /// `None` when the shot has no label in this stream.
    pub fn label(&self, id: u64) -> Option<bool> {
        self.labels.get(&id).copied()
    }

    pub fn ids(&self) -> BTreeSet<u64> {
        self.labels.keys().copied().collect()
    }

    pub fn occupied(&self) -> BTreeSet<u64> {
        self.select(true)
    }

    pub fn empty(&self) -> BTreeSet<u64> {
        self.select(false)
    }

    fn select(&self, occupied: bool) -> BTreeSet<u64> {
        self.labels
            .iter()
            .filter(|(_, &o)| o == occupied)
            .map(|(&id, _)| id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl FromIterator<(u64, bool)> for OccupancyStream {
    fn from_iter<I: IntoIterator<Item = (u64, bool)>>(iter: I) -> Self {
        Self {
            labels: iter.into_iter().collect(),
        }
    }
}
