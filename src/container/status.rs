//! Orchestrator-facing projections of container records.

use super::record::ContainerRecord;
use super::spec::{ContainerMetadata, Mount};
use super::state::ContainerState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Detailed container status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    /// Container ID.
    pub id: String,
    /// Owning sandbox.
    pub sandbox_id: String,
    /// Name and attempt.
    pub metadata: ContainerMetadata,
    /// Image reference.
    pub image: String,
    /// Lifecycle state, reconciled with the domain.
    pub state: ContainerState,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Start time.
    pub started_at: Option<DateTime<Utc>>,
    /// Finish time.
    pub finished_at: Option<DateTime<Utc>>,
    /// Exit code once exited.
    pub exit_code: Option<i32>,
    /// Mounts.
    pub mounts: Vec<Mount>,
    /// Labels.
    pub labels: BTreeMap<String, String>,
    /// Annotations.
    pub annotations: BTreeMap<String, String>,
}

impl ContainerStatus {
    /// Project a record, reporting `state` in place of the stored one.
    pub fn from_record(record: &ContainerRecord, state: ContainerState) -> Self {
        Self {
            id: record.id.clone(),
            sandbox_id: record.sandbox_id.clone(),
            metadata: record.metadata.clone(),
            image: record.image.clone(),
            state,
            created_at: record.created_at,
            started_at: record.started_at,
            finished_at: record.finished_at,
            exit_code: record.exit_code,
            mounts: record.mounts.clone(),
            labels: record.labels.clone(),
            annotations: record.annotations.clone(),
        }
    }
}

/// Short container description returned by list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    /// Container ID.
    pub id: String,
    /// Owning sandbox.
    pub sandbox_id: String,
    /// Name and attempt.
    pub metadata: ContainerMetadata,
    /// Image reference.
    pub image: String,
    /// Stored lifecycle state.
    pub state: ContainerState,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Labels.
    pub labels: BTreeMap<String, String>,
    /// Annotations.
    pub annotations: BTreeMap<String, String>,
}

impl From<&ContainerRecord> for ContainerSummary {
    fn from(record: &ContainerRecord) -> Self {
        Self {
            id: record.id.clone(),
            sandbox_id: record.sandbox_id.clone(),
            metadata: record.metadata.clone(),
            image: record.image.clone(),
            state: record.state,
            created_at: record.created_at,
            labels: record.labels.clone(),
            annotations: record.annotations.clone(),
        }
    }
}

/// List filter. Every set field must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerFilter {
    /// Exact container ID.
    pub id: Option<String>,
    /// Owning sandbox.
    pub sandbox_id: Option<String>,
    /// Lifecycle state.
    pub state: Option<ContainerState>,
    /// Labels that must be present with these values.
    pub label_selector: BTreeMap<String, String>,
}

impl ContainerFilter {
    /// Filter on a single container.
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    /// Filter on a sandbox.
    pub fn by_sandbox(sandbox_id: impl Into<String>) -> Self {
        Self {
            sandbox_id: Some(sandbox_id.into()),
            ..Default::default()
        }
    }

    /// Filter on a state.
    pub fn by_state(state: ContainerState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    /// Require a label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.label_selector.insert(key.into(), value.into());
        self
    }

    /// Whether `record` passes the filter.
    pub fn matches(&self, record: &ContainerRecord) -> bool {
        if self.id.as_deref().is_some_and(|id| id != record.id) {
            return false;
        }
        if self
            .sandbox_id
            .as_deref()
            .is_some_and(|sb| sb != record.sandbox_id)
        {
            return false;
        }
        if self.state.is_some_and(|s| s != record.state) {
            return false;
        }
        self.label_selector
            .iter()
            .all(|(k, v)| record.labels.get(k) == Some(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ResourceSpec;
    use chrono::TimeZone;

    fn record(id: &str, sandbox: &str, state: ContainerState) -> ContainerRecord {
        ContainerRecord {
            id: id.to_string(),
            sandbox_id: sandbox.to_string(),
            metadata: ContainerMetadata {
                name: "web".to_string(),
                attempt: 1,
            },
            image: "cirros".to_string(),
            mounts: vec![],
            annotations: BTreeMap::new(),
            labels: BTreeMap::from([("app".to_string(), "demo".to_string())]),
            state,
            created_at: Utc.with_ymd_and_hms(2017, 5, 30, 20, 19, 0).unwrap(),
            started_at: None,
            finished_at: None,
            resources: ResourceSpec::default(),
            vcpus: 1,
            volumes: vec![],
            domain_name: format!("vmlet-{}", id),
            domain_uuid: id.to_string(),
            network_namespace: String::new(),
            exit_code: None,
            seq: 0,
        }
    }

    #[test]
    fn test_filter_fields() {
        let r = record("c1", "sb1", ContainerState::Running);
        assert!(ContainerFilter::default().matches(&r));
        assert!(ContainerFilter::by_id("c1").matches(&r));
        assert!(!ContainerFilter::by_id("c2").matches(&r));
        assert!(ContainerFilter::by_sandbox("sb1").matches(&r));
        assert!(!ContainerFilter::by_sandbox("sb2").matches(&r));
        assert!(ContainerFilter::by_state(ContainerState::Running).matches(&r));
        assert!(!ContainerFilter::by_state(ContainerState::Exited).matches(&r));
    }

    #[test]
    fn test_filter_label_selector() {
        let r = record("c1", "sb1", ContainerState::Created);
        assert!(ContainerFilter::default().with_label("app", "demo").matches(&r));
        assert!(!ContainerFilter::default().with_label("app", "prod").matches(&r));
        assert!(!ContainerFilter::default().with_label("tier", "demo").matches(&r));
    }

    #[test]
    fn test_status_uses_given_state() {
        let r = record("c1", "sb1", ContainerState::Running);
        let status = ContainerStatus::from_record(&r, ContainerState::Exited);
        assert_eq!(status.state, ContainerState::Exited);
        assert_eq!(status.metadata.attempt, 1);
        assert_eq!(ContainerSummary::from(&r).state, ContainerState::Running);
    }
}
