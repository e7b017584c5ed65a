use crate::{ConditionStatus, ObjectMeta};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const PODCHECKPOINT_API_VERSION: &str = "forensics.keikoproj.io/v1alpha1";

/// Request to capture the state of a running pod's container.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PodCheckpoint {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    #[serde(rename = "kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodCheckpointSpec,
    #[serde(default)]
    pub status: PodCheckpointStatus,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct PodCheckpointSpec {
    /// Name of the pod to capture.
    #[serde(default)]
    pub pod: String,
    /// Namespace of the pod to capture.
    #[serde(default)]
    pub namespace: String,
    /// Sink locator handed to the worker, e.g. `s3://bucket/path`.
    #[serde(default)]
    pub destination: String,
    /// Prefix within the sink.
    #[serde(default)]
    pub subpath: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PodCheckpointStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<PodCheckpointCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub active: i32,
    #[serde(default)]
    pub succeeded: i32,
    #[serde(default)]
    pub failed: i32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum PodCheckpointConditionType {
    Complete,
    Failed,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodCheckpointCondition {
    #[serde(rename = "type")]
    pub condition_type: PodCheckpointConditionType,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_probe_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl PodCheckpointStatus {
    /// True once a `Complete` or `Failed` condition with status `True` is present.
    pub fn is_terminal(&self) -> bool {
        self.conditions
            .iter()
            .any(|c| c.status == ConditionStatus::True)
    }

    /// Replace the condition of the same type, or append it.
    ///
    /// An existing condition with the same status keeps its transition time.
    pub fn set_condition(&mut self, mut condition: PodCheckpointCondition) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition.condition_type)
        {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
            }
            None => self.conditions.push(condition),
        }
    }
}
