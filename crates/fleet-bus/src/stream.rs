//! Declarative stream configuration for JetStream.

use serde::{Deserialize, Serialize};

use crate::patterns::SubjectPatterns;

/// Retention policy of a durable stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StreamRetention {
    /// Keep messages until limits are hit.
    Limits,
    /// Keep messages only while at least one interested consumer exists.
    #[default]
    Interest,
    /// Each message is delivered to one consumer, then removed.
    WorkQueue,
}

/// Stream configuration for JetStream.
///
/// Only the fields the fleet cares about are declared. Anything else is left
/// to the broker's defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub name: String,
    pub subjects: Vec<String>,
    pub retention: StreamRetention,
    /// `None` lets the broker choose.
    pub replicas: Option<usize>,
}

impl StreamConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subjects: vec![],
            retention: StreamRetention::Interest,
            replicas: None,
        }
    }

    pub fn subjects(mut self, subjects: Vec<String>) -> Self {
        self.subjects = subjects;
        self
    }

    pub fn retention(mut self, retention: StreamRetention) -> Self {
        self.retention = retention;
        self
    }

    /// Request replication sized to the cluster.
    ///
    /// Replication is only requested when more than one node is configured;
    /// a single-node broker rejects a replicated stream.
    pub fn replicas_for_nodes(mut self, node_count: usize) -> Self {
        self.replicas = (node_count > 1).then_some(node_count);
        self
    }

    /// Whether a stream that already exists with `existing` needs no update.
    ///
    /// Subject order is irrelevant. An undeclared replica count accepts
    /// whatever the broker picked.
    #[must_use]
    pub fn is_satisfied_by(&self, existing: &StreamConfig) -> bool {
        let mut wanted = self.subjects.clone();
        let mut have = existing.subjects.clone();
        wanted.sort();
        have.sort();

        self.name == existing.name
            && wanted == have
            && self.retention == existing.retention
            && self
                .replicas
                .map_or(true, |r| existing.replicas.unwrap_or(1) == r)
    }

    /// Whether any of this stream's subjects captures `subject`.
    #[must_use]
    pub fn captures(&self, subject: &str) -> bool {
        self.subjects
            .iter()
            .any(|pattern| SubjectPatterns::matches(pattern, subject))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_node_never_replicates() {
        let config = StreamConfig::new("AGENTS_STREAM").replicas_for_nodes(1);
        assert_eq!(config.replicas, None);

        let config = StreamConfig::new("AGENTS_STREAM").replicas_for_nodes(0);
        assert_eq!(config.replicas, None);

        let config = StreamConfig::new("AGENTS_STREAM").replicas_for_nodes(3);
        assert_eq!(config.replicas, Some(3));
    }

    #[test]
    fn test_satisfied_ignores_subject_order() {
        let wanted = StreamConfig::new("S")
            .subjects(vec!["agent.enable.>".into(), "agent.disable.>".into()]);
        let existing = StreamConfig::new("S")
            .subjects(vec!["agent.disable.>".into(), "agent.enable.>".into()]);

        assert!(wanted.is_satisfied_by(&existing));
    }

    #[test]
    fn test_unsatisfied_on_changed_subjects() {
        let wanted = StreamConfig::new("S").subjects(vec!["agent.enable.>".into()]);
        let existing = StreamConfig::new("S").subjects(vec!["agent.disable.>".into()]);

        assert!(!wanted.is_satisfied_by(&existing));
    }

    #[test]
    fn test_broker_default_replicas_accepted() {
        let wanted = StreamConfig::new("S");
        let existing = StreamConfig {
            replicas: Some(1),
            ..StreamConfig::new("S")
        };
        assert!(wanted.is_satisfied_by(&existing));

        let wanted = StreamConfig::new("S").replicas_for_nodes(3);
        assert!(!wanted.is_satisfied_by(&existing));
    }
}
