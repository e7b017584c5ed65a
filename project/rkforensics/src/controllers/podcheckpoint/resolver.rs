use crate::api::store::{ObjectStore, ObjectStoreExt, StoreError};
use crate::error::CommandError;
use common::{NamespacedName, PodCheckpoint, PodTask};
use std::fmt;

/// The only container runtime the capture worker can talk to.
pub const SUPPORTED_RUNTIME: &str = "docker";

const RUNTIME_SEPARATOR: &str = "://";

/// Runtime-qualified container id taken from a pod's container status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRef {
    pub runtime: String,
    pub id: String,
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.runtime, RUNTIME_SEPARATOR, self.id)
    }
}

/// Parse `docker://<id>`. Any other shape fails with command error id 1.
pub fn parse_container_id(raw: &str) -> Result<ContainerRef, CommandError> {
    let mut parts = raw.split(RUNTIME_SEPARATOR);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(runtime), Some(id), None) if runtime == SUPPORTED_RUNTIME && !id.is_empty() => {
            Ok(ContainerRef {
                runtime: runtime.to_string(),
                id: id.to_string(),
            })
        }
        _ => Err(CommandError {
            id: 1,
            result: format!("Unexpected ContainerID ({raw})"),
        }),
    }
}

/// State of the pod a checkpoint points at.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// The pod does not exist and will not come back.
    Missing,
    /// The pod exists but reports no containers yet.
    NotReady,
    Ready {
        pod: Box<PodTask>,
        /// First container of the pod; the one the worker captures.
        container: ContainerRef,
    },
}

/// Where the checkpoint's pod lives. An empty namespace means the checkpoint's own.
pub fn target_name(checkpoint: &PodCheckpoint) -> NamespacedName {
    let namespace = if checkpoint.spec.namespace.is_empty() {
        checkpoint.metadata.namespace.clone()
    } else {
        checkpoint.spec.namespace.clone()
    };
    NamespacedName::new(namespace, checkpoint.spec.pod.clone())
}

/// Classify a pod that has been read from the store.
///
/// Every container id must parse, not only the first one.
pub fn classify(pod: PodTask) -> Result<Target, CommandError> {
    let containers = pod
        .status
        .container_statuses
        .iter()
        .map(|cs| parse_container_id(&cs.container_id))
        .collect::<Result<Vec<_>, _>>()?;
    match containers.into_iter().next() {
        Some(container) => Ok(Target::Ready {
            pod: Box::new(pod),
            container,
        }),
        None => Ok(Target::NotReady),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Load the pod referenced by `checkpoint` and classify it. Store errors other
/// than not-found are returned unchanged.
pub async fn resolve_target<S: ObjectStore + ?Sized>(
    store: &S,
    checkpoint: &PodCheckpoint,
) -> Result<Target, ResolveError> {
    match store.get::<PodTask>(&target_name(checkpoint)).await {
        Ok(pod) => Ok(classify(pod)?),
        Err(e) if e.is_not_found() => Ok(Target::Missing),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{ContainerStatus, ObjectMeta, PodSpec, PodStatus};

    fn pod(ids: &[&str]) -> PodTask {
        PodTask {
            api_version: "v1".to_string(),
            kind: "Pod".to_string(),
            metadata: ObjectMeta {
                name: "app-1".to_string(),
                ..Default::default()
            },
            spec: PodSpec {
                node_name: Some("node-7".to_string()),
                ..Default::default()
            },
            status: PodStatus {
                pod_ip: None,
                container_statuses: ids
                    .iter()
                    .enumerate()
                    .map(|(i, id)| ContainerStatus {
                        name: format!("c{i}"),
                        container_id: id.to_string(),
                        ready: true,
                    })
                    .collect(),
            },
        }
    }

    #[test]
    fn parses_docker_ids() {
        let c = parse_container_id("docker://abc123").unwrap();
        assert_eq!(c.runtime, "docker");
        assert_eq!(c.id, "abc123");
        assert_eq!(c.to_string(), "docker://abc123");
    }

    #[test]
    fn rejects_malformed_ids() {
        for raw in [
            "",
            "abc123",
            "containerd://abc123",
            "cri-o://abc",
            "docker://",
            "docker://a://b",
            "docker:/abc",
            "DOCKER://abc",
        ] {
            let err = parse_container_id(raw).unwrap_err();
            assert_eq!(err.id, 1, "{raw}");
            assert_eq!(err.result, format!("Unexpected ContainerID ({raw})"));
        }
    }

    #[test]
    fn classify_requires_containers() {
        assert_eq!(classify(pod(&[])).unwrap(), Target::NotReady);
    }

    #[test]
    fn classify_picks_first_container() {
        match classify(pod(&["docker://first", "docker://second"])).unwrap() {
            Target::Ready { pod, container } => {
                assert_eq!(container.id, "first");
                assert_eq!(pod.spec.node_name.as_deref(), Some("node-7"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn classify_fails_on_any_bad_container() {
        let err = classify(pod(&["docker://ok", "containerd://nope"])).unwrap_err();
        assert_eq!(err.result, "Unexpected ContainerID (containerd://nope)");
    }

    #[test]
    fn empty_namespace_falls_back_to_checkpoint_namespace() {
        let mut cp = common::PodCheckpoint {
            api_version: common::PODCHECKPOINT_API_VERSION.to_string(),
            kind: "PodCheckpoint".to_string(),
            metadata: ObjectMeta {
                name: "req".to_string(),
                namespace: "team-a".to_string(),
                ..Default::default()
            },
            spec: common::PodCheckpointSpec {
                pod: "app-1".to_string(),
                ..Default::default()
            },
            status: Default::default(),
        };
        assert_eq!(target_name(&cp), NamespacedName::new("team-a", "app-1"));
        cp.spec.namespace = "prod".to_string();
        assert_eq!(target_name(&cp), NamespacedName::new("prod", "app-1"));
    }
}
