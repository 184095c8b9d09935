//! Append-only rejection log.
//!
//! Every scenario dropped by any stage is recorded here with a
//! human-readable reason; no filter may discard data silently. Entries are
//! 1-indexed for caller-facing reporting.

use serde::{Deserialize, Serialize};

/// Which rule family dropped a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    /// Authoring/design rules (table shape, duplicates, missing Ego).
    Design,
    /// Physical plausibility rules (speed ranges, lane geometry, map
    /// positions that do not exist).
    Physical,
    /// Behavioral rules (trigger/action consistency).
    Behavior,
}

/// One dropped scenario with its cause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub functional_id: String,
    pub logical_id: String,
    pub concrete_id: String,
    pub reason: String,
    pub category: RuleCategory,
}

/// Ordered, append-only collection of rejections, shared by every filter
/// stage of a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RejectionLog {
    entries: Vec<Rejection>,
}

impl RejectionLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, rejection: Rejection) {
        log::info!(
            "rejected {}: {} ({:?})",
            rejection.concrete_id,
            rejection.reason,
            rejection.category
        );
        self.entries.push(rejection);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry by 1-based index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Rejection> {
        index.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    /// Entries with their 1-based indices, in append order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Rejection)> {
        self.entries.iter().enumerate().map(|(i, r)| (i + 1, r))
    }

    #[must_use]
    pub fn entries(&self) -> &[Rejection] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejection(id: &str) -> Rejection {
        Rejection {
            functional_id: "F01".into(),
            logical_id: "L01".into(),
            concrete_id: id.into(),
            reason: "test".into(),
            category: RuleCategory::Physical,
        }
    }

    #[test]
    fn entries_are_one_indexed() {
        let mut log = RejectionLog::new();
        log.push(rejection("a"));
        log.push(rejection("b"));
        assert_eq!(log.get(1).unwrap().concrete_id, "a");
        assert_eq!(log.get(2).unwrap().concrete_id, "b");
        assert!(log.get(0).is_none());
        assert!(log.get(3).is_none());
    }

    #[test]
    fn iteration_preserves_append_order() {
        let mut log = RejectionLog::new();
        log.push(rejection("a"));
        log.push(rejection("b"));
        let ids: Vec<(usize, String)> = log
            .iter()
            .map(|(i, r)| (i, r.concrete_id.clone()))
            .collect();
        assert_eq!(ids, vec![(1, "a".to_string()), (2, "b".to_string())]);
    }
}
