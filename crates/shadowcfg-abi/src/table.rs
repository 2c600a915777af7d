use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::release::KernelRelease;

/// Resolved constant values by symbolic name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AbiTable(BTreeMap<String, u64>);

impl AbiTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `name`, returning the previous value if it was already present.
    pub fn insert(&mut self, name: impl Into<String>, value: u64) -> Option<u64> {
        self.0.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.0.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(name, value)| (name.as_str(), *value))
    }

    /// Whether every name in `names` has a value.
    pub fn covers<S: AsRef<str>>(&self, names: &[S]) -> bool {
        names.iter().all(|name| self.contains(name.as_ref()))
    }

    /// The entries for `names` only; names without a value are skipped.
    pub fn subset<S: AsRef<str>>(&self, names: &[S]) -> Self {
        Self(
            names
                .iter()
                .filter_map(|name| {
                    let name = name.as_ref();
                    self.get(name).map(|value| (name.to_string(), value))
                })
                .collect(),
        )
    }
}

impl FromIterator<(String, u64)> for AbiTable {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A table scoped to the kernel release it was resolved against. This is the unit persisted by
/// an [`crate::AbiStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiConstants {
    pub release: KernelRelease,
    pub constants: AbiTable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subset_and_cover() {
        let table: AbiTable = [("A".to_string(), 1), ("B".to_string(), 2)]
            .into_iter()
            .collect();
        assert!(table.covers(&["A", "B"]));
        assert!(!table.covers(&["A", "C"]));
        assert_eq!(table.subset(&["B"]).iter().collect::<Vec<_>>(), vec![("B", 2)]);
    }

    #[test]
    fn json_shape() {
        let mut constants = AbiTable::new();
        constants.insert("VFIO_GET_API_VERSION", 0x3B64);
        let entry = AbiConstants {
            release: KernelRelease::new("6.8.0").unwrap(),
            constants,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "release": "6.8.0",
                "constants": { "VFIO_GET_API_VERSION": 15204 }
            })
        );
    }
}
