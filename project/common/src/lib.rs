use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

pub mod checkpoint;
pub mod job;

pub use checkpoint::*;
pub use job::*;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub uid: Uuid,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_references: Option<Vec<OwnerReference>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    /// Store revision of the last write. Filled in by the store on read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<i64>,
}

impl Default for ObjectMeta {
    fn default() -> Self {
        Self {
            name: String::new(),
            namespace: default_namespace(),
            uid: Uuid::nil(),
            labels: HashMap::new(),
            annotations: HashMap::new(),
            owner_references: None,
            creation_timestamp: None,
            resource_version: None,
        }
    }
}

impl ObjectMeta {
    /// `<namespace>/<name>`, the key controllers are enqueued with.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// The owner reference flagged as controller, if any.
    pub fn controller_ref(&self) -> Option<&OwnerReference> {
        self.owner_references
            .as_ref()
            .and_then(|owners| owners.iter().find(|o| o.controller))
    }

    pub fn is_owned_by(&self, owner_uid: Uuid) -> bool {
        self.owner_references
            .as_ref()
            .is_some_and(|owners| owners.iter().any(|o| o.uid == owner_uid))
    }
}

fn default_namespace() -> String {
    "default".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: ResourceKind,
    pub name: String,
    pub uid: Uuid,
    #[serde(default)]
    pub controller: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_owner_deletion: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Pod,
    Job,
    PodCheckpoint,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Pod => "Pod",
            ResourceKind::Job => "Job",
            ResourceKind::PodCheckpoint => "PodCheckpoint",
        };
        f.write_str(s)
    }
}

/// Namespaced identity of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse a `<namespace>/<name>` key. A bare name lands in `default`.
    pub fn parse(key: &str) -> Option<Self> {
        match key.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Some(Self::new(ns, name))
            }
            Some(_) => None,
            None if !key.is_empty() => Some(Self::new(default_namespace(), key)),
            None => None,
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    //if pod is distributed to a node ,then this field should be filled with node-id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    #[serde(default)]
    pub host_network: bool,
    #[serde(default)]
    pub containers: Vec<ContainerSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartPolicy {
    #[default]
    Always,
    OnFailure,
    Never,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum PullPolicy {
    Always,
    #[default]
    IfNotPresent,
    Never,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub image_pull_policy: PullPolicy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_path: Option<HostPathVolumeSource>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HostPathVolumeSource {
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PodTask {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    #[serde(rename = "kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    #[serde(rename = "podIP", default, skip_serializing_if = "Option::is_none")]
    pub pod_ip: Option<String>,
    #[serde(default)]
    pub container_statuses: Vec<ContainerStatus>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    pub name: String,
    /// Runtime-qualified id, e.g. `docker://<id>`.
    #[serde(rename = "containerID", default)]
    pub container_id: String,
    #[serde(default)]
    pub ready: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct PodTemplateSpec {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaced_name_parses_keys() {
        assert_eq!(
            NamespacedName::parse("ops/req-1"),
            Some(NamespacedName::new("ops", "req-1"))
        );
        assert_eq!(
            NamespacedName::parse("req-1"),
            Some(NamespacedName::new("default", "req-1"))
        );
        assert_eq!(NamespacedName::parse(""), None);
        assert_eq!(NamespacedName::parse("ops/"), None);
        assert_eq!(NamespacedName::parse("a/b/c"), None);
    }

    #[test]
    fn pod_status_reads_container_ids() {
        let yaml = r#"
apiVersion: v1
kind: Pod
metadata:
  name: app-1
  namespace: default
spec:
  nodeName: node-7
status:
  containerStatuses:
  - name: app
    containerID: docker://abc123
"#;
        let pod: PodTask = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(pod.spec.node_name.as_deref(), Some("node-7"));
        assert_eq!(pod.status.container_statuses[0].container_id, "docker://abc123");
        assert!(pod.metadata.uid.is_nil());
    }

    #[test]
    fn controller_ref_picks_controlling_owner() {
        let uid = Uuid::new_v4();
        let meta = ObjectMeta {
            name: "x".into(),
            owner_references: Some(vec![
                OwnerReference {
                    api_version: "v1".into(),
                    kind: ResourceKind::Pod,
                    name: "other".into(),
                    uid: Uuid::new_v4(),
                    controller: false,
                    block_owner_deletion: None,
                },
                OwnerReference {
                    api_version: "forensics.keikoproj.io/v1alpha1".into(),
                    kind: ResourceKind::PodCheckpoint,
                    name: "req".into(),
                    uid,
                    controller: true,
                    block_owner_deletion: Some(true),
                },
            ]),
            ..Default::default()
        };
        assert_eq!(meta.controller_ref().map(|o| o.name.as_str()), Some("req"));
        assert!(meta.is_owned_by(uid));
    }
}
