//! Reconciles `PodCheckpoint` requests.
//!
//! Each pass re-reads everything from the store:
//!
//! 1. load the checkpoint (gone: nothing to do) and stop if it already has a
//!    terminal condition;
//! 2. resolve the target pod: missing pods end the checkpoint with a `Failed`
//!    condition, pods without container statuses are re-checked later, and an
//!    unsupported container id fails the pass without touching the status;
//! 3. build the capture job, create it or adopt the existing one, and copy its
//!    counters into the checkpoint status.

use crate::api::scheme::Scheme;
use crate::api::store::{ObjectStore, ObjectStoreExt};
use crate::controllers::manager::{Controller, ReconcileResult};
use crate::error::ReconcileError;
use crate::protocol::config::ControllerConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Job, NamespacedName, PodCheckpoint, ResourceKind};
use log::{debug, error, info, warn};
use std::sync::Arc;

pub mod job;
pub mod resolver;
pub mod status;

use self::resolver::{ResolveError, Target};

/// Clock knows how to get the current time.
/// It can be used to fake out timing for testing.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct RealClock;

impl Clock for RealClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub struct PodCheckpointController {
    store: Arc<dyn ObjectStore>,
    scheme: Arc<Scheme>,
    config: ControllerConfig,
    clock: Arc<dyn Clock>,
}

impl PodCheckpointController {
    pub fn new(store: Arc<dyn ObjectStore>, scheme: Arc<Scheme>, config: ControllerConfig) -> Self {
        Self::with_clock(store, scheme, config, Arc::new(RealClock))
    }

    pub fn with_clock(
        store: Arc<dyn ObjectStore>,
        scheme: Arc<Scheme>,
        config: ControllerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            scheme,
            config,
            clock,
        }
    }

    /// Run one reconcile pass for the checkpoint `key` (`<namespace>/<name>`).
    pub async fn reconcile_key(&self, key: &str) -> Result<ReconcileResult, ReconcileError> {
        let name =
            NamespacedName::parse(key).ok_or_else(|| ReconcileError::InvalidKey(key.to_string()))?;

        let checkpoint = match self.store.get::<PodCheckpoint>(&name).await {
            Ok(cp) => cp,
            Err(e) if e.is_not_found() => {
                // deleted; a retry cannot bring it back
                debug!("PodCheckpoint {name} not found, skipping reconciliation");
                return Ok(ReconcileResult::done());
            }
            Err(e) => {
                error!("unable to fetch PodCheckpoint {name}: {e}");
                return Err(e.into());
            }
        };

        if checkpoint.status.is_terminal() {
            debug!("PodCheckpoint {name} already finished");
            return Ok(ReconcileResult::done());
        }

        let target_name = resolver::target_name(&checkpoint);
        let target = match resolver::resolve_target(self.store.as_ref(), &checkpoint).await {
            Ok(target) => target,
            Err(ResolveError::Command(e)) => {
                error!("PodCheckpoint {name}: {e}");
                return Err(e.into());
            }
            Err(ResolveError::Store(e)) => return Err(e.into()),
        };

        let (pod, container) = match target {
            Target::Missing => {
                info!("PodCheckpoint {name}: specified pod {target_name} not found");
                let status = status::missing_pod_status(&target_name, self.clock.now());
                status::persist_status(self.store.as_ref(), &checkpoint, status).await?;
                return Ok(ReconcileResult::done());
            }
            Target::NotReady => {
                warn!(
                    "PodCheckpoint {name}: pod {target_name} has no containers yet, requeue in {}s",
                    self.config.requeue_seconds
                );
                return Ok(ReconcileResult::requeue_after(self.config.requeue_after()));
            }
            Target::Ready { pod, container } => (pod, container),
        };

        let mut desired =
            job::build_capture_job(&checkpoint, &target_name, &pod, &container, &self.config);
        self.scheme
            .set_controller_reference(&checkpoint, &mut desired.metadata)?;

        status::sync_job(self.store.as_ref(), &checkpoint, &desired, self.clock.now()).await?;
        Ok(ReconcileResult::done())
    }

    /// Delete a checkpoint together with the capture job it owns.
    pub async fn delete(&self, name: &NamespacedName) -> Result<(), ReconcileError> {
        self.store
            .delete_cascade(ResourceKind::PodCheckpoint, name)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Controller for PodCheckpointController {
    fn name(&self) -> &'static str {
        "podcheckpoint"
    }

    fn watched_kinds(&self) -> Vec<ResourceKind> {
        vec![ResourceKind::PodCheckpoint, ResourceKind::Job]
    }

    fn keys_for(&self, kind: ResourceKind, yaml: &str) -> Vec<String> {
        match kind {
            ResourceKind::PodCheckpoint => serde_yaml::from_str::<PodCheckpoint>(yaml)
                .map(|cp| vec![cp.metadata.key()])
                .unwrap_or_default(),
            ResourceKind::Job => serde_yaml::from_str::<Job>(yaml)
                .ok()
                .and_then(|j| j.metadata.annotations.get(job::OWNER_ANNOTATION).cloned())
                .into_iter()
                .collect(),
            ResourceKind::Pod => Vec::new(),
        }
    }

    async fn reconcile(&self, key: &str) -> anyhow::Result<ReconcileResult> {
        Ok(self.reconcile_key(key).await?)
    }
}
