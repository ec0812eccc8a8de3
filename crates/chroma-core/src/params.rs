//! ---
//! chroma_section: "01-core-functionality"
//! chroma_subsection: "module"
//! chroma_type: "source"
//! chroma_scope: "code"
//! chroma_description: "Local projection of min/max tuning parameter pairs."
//! chroma_version: "v0.0.0-prealpha"
//! chroma_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use chroma_common::{ClientConfig, ParameterPairConfig};
use chroma_msg::{ParameterSnapshot, SliderUpdate, ValidationError};
use indexmap::IndexMap;
use tracing::debug;

/// Which end of a pair a key controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Min,
    Max,
}

/// Operator-facing parameter values, kept so that `min < max` inside every pair.
#[derive(Debug, Clone)]
pub struct ParameterBoard {
    pairs: IndexMap<String, ParameterPairConfig>,
    values: BTreeMap<String, i64>,
}

impl ParameterBoard {
    /// Board spanning each pair's full range until the backend is read.
    pub fn new(pairs: IndexMap<String, ParameterPairConfig>) -> Self {
        let mut values = BTreeMap::new();
        for pair in pairs.values() {
            values.insert(pair.min_key.clone(), 0);
            values.insert(pair.max_key.clone(), pair.limit);
        }
        Self { pairs, values }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.parameters.clone())
    }

    fn locate(&self, key: &str) -> Option<(&ParameterPairConfig, Bound)> {
        self.pairs.values().find_map(|pair| {
            if pair.min_key == key {
                Some((pair, Bound::Min))
            } else if pair.max_key == key {
                Some((pair, Bound::Max))
            } else {
                None
            }
        })
    }

    /// Current value of `key`.
    pub fn value(&self, key: &str) -> Option<i64> {
        self.values.get(key).copied()
    }

    /// Upper limit of `key`.
    pub fn limit(&self, key: &str) -> Option<i64> {
        self.locate(key).map(|(pair, _)| pair.limit)
    }

    pub fn values(&self) -> &BTreeMap<String, i64> {
        &self.values
    }

    /// Pairs in declaration order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &ParameterPairConfig)> {
        self.pairs.iter().map(|(name, pair)| (name.as_str(), pair))
    }

    /// Adopt the backend's current values.
    ///
    /// Values are clamped into range and a pair whose min is not below its
    /// max gets its min lowered. Keys outside every pair are ignored.
    /// Returns the keys whose value differs from the snapshot.
    pub fn apply_snapshot(&mut self, snapshot: &ParameterSnapshot) -> Vec<String> {
        let mut corrected = Vec::new();
        for (key, value) in snapshot {
            let Some(limit) = self.limit(key) else {
                debug!(key = %key, "ignoring parameter outside configured pairs");
                continue;
            };
            let clamped = (*value).clamp(0, limit);
            if clamped != *value {
                corrected.push(key.clone());
            }
            self.values.insert(key.clone(), clamped);
        }

        for pair in self.pairs.values() {
            let min = self.values[&pair.min_key];
            let max = self.values[&pair.max_key];
            if min < max {
                continue;
            }
            let max = max.max(1);
            if max != self.values[&pair.max_key] {
                self.values.insert(pair.max_key.clone(), max);
                corrected.push(pair.max_key.clone());
            }
            if min != max - 1 {
                self.values.insert(pair.min_key.clone(), max - 1);
                corrected.push(pair.min_key.clone());
            }
        }
        corrected.sort();
        corrected.dedup();
        corrected
    }

    /// Apply an operator edit and return the update to send.
    ///
    /// Raising a min to or past its max pins it at `max - 1`; lowering a max
    /// to or below its min pins it at `min + 1`. Only the edited key changes.
    pub fn adjust(&mut self, key: &str, value: i64) -> Result<SliderUpdate, ValidationError> {
        let (pair, bound) = self
            .locate(key)
            .ok_or_else(|| ValidationError::UnknownParameter(key.to_owned()))?;
        let limit = pair.limit;
        let min = self.values[&pair.min_key];
        let max = self.values[&pair.max_key];

        let mut value = value.clamp(0, limit);
        match bound {
            Bound::Min if value >= max => value = max - 1,
            Bound::Max if value <= min => value = min + 1,
            _ => {}
        }

        self.values.insert(key.to_owned(), value);
        Ok(SliderUpdate::new(key, value))
    }

    /// Whether every pair satisfies `min < max`.
    pub fn is_consistent(&self) -> bool {
        self.pairs
            .values()
            .all(|pair| self.values[&pair.min_key] < self.values[&pair.max_key])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board() -> ParameterBoard {
        ParameterBoard::from_config(&ClientConfig::default())
    }

    fn snapshot(entries: &[(&str, i64)]) -> ParameterSnapshot {
        entries
            .iter()
            .map(|(key, value)| ((*key).to_owned(), *value))
            .collect()
    }

    #[test]
    fn initial_sync_adopts_backend_values() {
        let mut board = board();
        let corrected = board.apply_snapshot(&snapshot(&[
            ("hueMin", 5),
            ("hueMax", 40),
            ("satMin", 0),
            ("satMax", 255),
            ("valMin", 0),
            ("valMax", 255),
        ]));
        assert!(corrected.is_empty());
        assert_eq!(board.value("hueMin"), Some(5));
        assert_eq!(board.value("hueMax"), Some(40));
        assert_eq!(board.value("satMax"), Some(255));
        assert_eq!(board.value("valMin"), Some(0));
        assert!(board.is_consistent());
    }

    #[test]
    fn initial_sync_repairs_inverted_pairs() {
        let mut board = board();
        let corrected = board.apply_snapshot(&snapshot(&[
            ("hueMin", 90),
            ("hueMax", 30),
            ("satMin", 0),
            ("satMax", 0),
            ("valMax", 400),
            ("unknown", 3),
        ]));
        assert_eq!(board.value("hueMin"), Some(29));
        assert_eq!(board.value("satMin"), Some(0));
        assert_eq!(board.value("satMax"), Some(1));
        assert_eq!(board.value("valMax"), Some(255));
        assert_eq!(board.value("unknown"), None);
        assert_eq!(corrected, vec!["hueMin", "satMax", "valMax"]);
        assert!(board.is_consistent());
    }

    #[test]
    fn edits_respect_the_pair_constraint() {
        let mut board = board();
        board.apply_snapshot(&snapshot(&[("hueMin", 5), ("hueMax", 40)]));

        assert_eq!(board.adjust("hueMin", 60).unwrap(), SliderUpdate::new("hueMin", 39));
        assert_eq!(board.adjust("hueMax", 10).unwrap(), SliderUpdate::new("hueMax", 40));
        assert_eq!(board.adjust("hueMax", 500).unwrap(), SliderUpdate::new("hueMax", 179));
        assert_eq!(board.adjust("hueMin", -4).unwrap(), SliderUpdate::new("hueMin", 0));
        assert!(board.is_consistent());

        assert_eq!(
            board.adjust("gamma", 1),
            Err(ValidationError::UnknownParameter("gamma".into()))
        );
    }
}
