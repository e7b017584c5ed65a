use anyhow::Context;
use common::PullPolicy;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Xline endpoints
    pub xline_config: XlineConfig,
    // capture job settings
    #[serde(default)]
    pub controller_config: ControllerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct XlineConfig {
    pub endpoints: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Settings of the checkpoint controller and of the capture jobs it creates.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    /// Max number of concurrent reconciles.
    pub workers: usize,
    /// Namespace capture jobs are created in, whatever the target pod's namespace.
    pub job_namespace: String,
    pub worker_image: String,
    pub image_pull_policy: PullPolicy,
    pub service_account: String,
    /// Host path of the container runtime control socket.
    pub runtime_socket: String,
    /// Delay before re-checking a pod that has no container statuses yet.
    pub requeue_seconds: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            job_namespace: "forensics-system".to_string(),
            worker_image: "keikoproj/kube-forensics-worker:latest".to_string(),
            image_pull_policy: PullPolicy::Always,
            service_account: "forensics-worker".to_string(),
            runtime_socket: "/var/run/docker.sock".to_string(),
            requeue_seconds: 10,
        }
    }
}

impl ControllerConfig {
    pub fn requeue_after(&self) -> Duration {
        Duration::from_secs(self.requeue_seconds)
    }
}

pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    let cfg: Config = serde_yaml::from_str(content).context("Failed to parse YAML config")?;
    if cfg.xline_config.endpoints.is_empty() {
        anyhow::bail!("xline_config.endpoints must not be empty");
    }
    if cfg.controller_config.workers == 0 {
        anyhow::bail!("controller_config.workers must be at least 1");
    }
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controller_section_defaults() {
        let cfg = parse_config(
            r#"
xline_config:
  endpoints: ["127.0.0.1:2379"]
"#,
        )
        .unwrap();
        assert_eq!(cfg.controller_config, ControllerConfig::default());
        assert_eq!(cfg.controller_config.requeue_after(), Duration::from_secs(10));
        assert!(cfg.xline_config.username.is_none());
    }

    #[test]
    fn partial_controller_section_keeps_other_defaults() {
        let cfg = parse_config(
            r#"
xline_config:
  endpoints: ["10.0.0.1:2379", "10.0.0.2:2379"]
  username: root
  password: secret
controller_config:
  job_namespace: capture
  runtime_socket: /run/containerd/containerd.sock
  image_pull_policy: IfNotPresent
"#,
        )
        .unwrap();
        let ctrl = &cfg.controller_config;
        assert_eq!(ctrl.job_namespace, "capture");
        assert_eq!(ctrl.runtime_socket, "/run/containerd/containerd.sock");
        assert_eq!(ctrl.image_pull_policy, PullPolicy::IfNotPresent);
        assert_eq!(ctrl.service_account, "forensics-worker");
        assert_eq!(cfg.xline_config.endpoints.len(), 2);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(parse_config("xline_config:\n  endpoints: []\n").is_err());
        assert!(
            parse_config(
                "xline_config:\n  endpoints: [\"a:1\"]\ncontroller_config:\n  workers: 0\n"
            )
            .is_err()
        );
        assert!(parse_config("not: [valid").is_err());
    }
}
