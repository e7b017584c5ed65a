use super::resolver::ContainerRef;
use crate::protocol::config::ControllerConfig;
use common::{
    ContainerSpec, EnvVar, HostPathVolumeSource, Job, JobSpec, JobStatus, NamespacedName,
    ObjectMeta, PodCheckpoint, PodSpec, PodTask, PodTemplateSpec, RestartPolicy, Volume,
    VolumeMount,
};
use std::collections::HashMap;

pub const WORKER_CONTAINER_NAME: &str = "kube-forensics-worker";
pub const RUNTIME_SOCKET_VOLUME: &str = "dockersock";
/// Annotation on a capture job naming the checkpoint (`<namespace>/<name>`) it belongs to.
pub const OWNER_ANNOTATION: &str = "forensics.keikoproj.io/podcheckpoint";

pub const ENV_DEST_BUCKET: &str = "DEST_BUCKET";
pub const ENV_SUBPATH: &str = "SUBPATH";
pub const ENV_NAMESPACE: &str = "NAMESPACE";
pub const ENV_POD_NAME: &str = "POD_NAME";
pub const ENV_CONTAINER_ID: &str = "CONTAINER_ID";

pub fn job_name(checkpoint: &PodCheckpoint) -> String {
    format!("{}-job", checkpoint.metadata.name)
}

/// Build the capture job for `checkpoint`. The result depends only on the
/// arguments, so every pass over the same request produces the same job.
///
/// `target` is the resolved pod namespace/name and `container` the first
/// container of that pod. The owner reference is not set here.
pub fn build_capture_job(
    checkpoint: &PodCheckpoint,
    target: &NamespacedName,
    pod: &PodTask,
    container: &ContainerRef,
    cfg: &ControllerConfig,
) -> Job {
    let name = job_name(checkpoint);

    let labels = HashMap::from([("env".to_string(), "security".to_string())]);
    let annotations = HashMap::from([(OWNER_ANNOTATION.to_string(), checkpoint.metadata.key())]);
    let template_labels = HashMap::from([("job".to_string(), name.clone())]);

    let worker = ContainerSpec {
        name: WORKER_CONTAINER_NAME.to_string(),
        image: cfg.worker_image.clone(),
        image_pull_policy: cfg.image_pull_policy,
        args: Vec::new(),
        env: vec![
            EnvVar::new(ENV_DEST_BUCKET, &checkpoint.spec.destination),
            EnvVar::new(ENV_SUBPATH, &checkpoint.spec.subpath),
            EnvVar::new(ENV_NAMESPACE, &target.namespace),
            EnvVar::new(ENV_POD_NAME, &target.name),
            EnvVar::new(ENV_CONTAINER_ID, &container.id),
        ],
        volume_mounts: vec![VolumeMount {
            name: RUNTIME_SOCKET_VOLUME.to_string(),
            mount_path: cfg.runtime_socket.clone(),
            read_only: false,
        }],
    };

    Job {
        api_version: "batch/v1".to_string(),
        kind: "Job".to_string(),
        metadata: ObjectMeta {
            name: name.clone(),
            namespace: cfg.job_namespace.clone(),
            labels,
            annotations,
            ..Default::default()
        },
        spec: JobSpec {
            backoff_limit: None,
            template: PodTemplateSpec {
                metadata: ObjectMeta {
                    name: name.clone(),
                    namespace: cfg.job_namespace.clone(),
                    labels: template_labels,
                    ..Default::default()
                },
                spec: PodSpec {
                    // the worker needs the runtime socket of the node running the pod
                    node_name: pod.spec.node_name.clone(),
                    host_network: true,
                    containers: vec![worker],
                    volumes: vec![Volume {
                        name: RUNTIME_SOCKET_VOLUME.to_string(),
                        host_path: Some(HostPathVolumeSource {
                            path: cfg.runtime_socket.clone(),
                        }),
                    }],
                    service_account_name: Some(cfg.service_account.clone()),
                    restart_policy: RestartPolicy::Never,
                },
            },
        },
        status: JobStatus::default(),
    }
}
