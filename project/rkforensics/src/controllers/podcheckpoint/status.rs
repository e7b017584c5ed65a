use crate::api::store::{ObjectStore, ObjectStoreExt, StoreError};
use crate::error::ReconcileError;
use chrono::{DateTime, Utc};
use common::{
    ConditionStatus, Job, JobConditionType, JobStatus, NamespacedName, PodCheckpoint,
    PodCheckpointCondition, PodCheckpointConditionType, PodCheckpointStatus,
};
use log::info;

pub const REASON_NOT_FOUND: &str = "NotFound";

/// Terminal status for a checkpoint whose pod does not exist.
pub fn missing_pod_status(target: &NamespacedName, now: DateTime<Utc>) -> PodCheckpointStatus {
    PodCheckpointStatus {
        conditions: vec![PodCheckpointCondition {
            condition_type: PodCheckpointConditionType::Failed,
            status: ConditionStatus::True,
            last_probe_time: Some(now),
            last_transition_time: Some(now),
            reason: REASON_NOT_FOUND.to_string(),
            message: format!(
                "The specified Pod '{}' was not found in the '{}' namespace.",
                target.name, target.namespace
            ),
        }],
        start_time: Some(now),
        completion_time: Some(now),
        ..Default::default()
    }
}

/// Mirror the job's observed state into the checkpoint status.
///
/// Counters and completion time are copied verbatim. A finished job also
/// sets the matching terminal condition, using the job's own timestamps.
pub fn apply_job_status(status: &mut PodCheckpointStatus, job: &JobStatus) {
    status.completion_time = job.completion_time;
    status.active = job.active;
    status.succeeded = job.succeeded;
    status.failed = job.failed;

    if let Some(cond) = job.terminal_condition() {
        let condition_type = match cond.condition_type {
            JobConditionType::Failed => PodCheckpointConditionType::Failed,
            _ => PodCheckpointConditionType::Complete,
        };
        status.set_condition(PodCheckpointCondition {
            condition_type,
            status: ConditionStatus::True,
            last_probe_time: cond.last_probe_time.or(job.completion_time),
            last_transition_time: cond.last_transition_time.or(job.completion_time),
            reason: cond.reason.clone(),
            message: cond.message.clone(),
        });
    } else if job.succeeded > 0 && job.completion_time.is_some() {
        status.set_condition(PodCheckpointCondition {
            condition_type: PodCheckpointConditionType::Complete,
            status: ConditionStatus::True,
            last_probe_time: job.completion_time,
            last_transition_time: job.completion_time,
            reason: "Completed".to_string(),
            message: String::new(),
        });
    }
}

/// Write `status` onto the checkpoint unless it is already there.
pub async fn persist_status<S: ObjectStore + ?Sized>(
    store: &S,
    checkpoint: &PodCheckpoint,
    status: PodCheckpointStatus,
) -> Result<(), StoreError> {
    if checkpoint.status == status {
        return Ok(());
    }
    let mut updated = checkpoint.clone();
    updated.status = status;
    store.update_status(&updated).await?;
    info!(
        "PodCheckpoint {} status: active={} succeeded={} failed={} terminal={}",
        updated.metadata.key(),
        updated.status.active,
        updated.status.succeeded,
        updated.status.failed,
        updated.status.is_terminal()
    );
    Ok(())
}

/// Create the job if absent, adopt it otherwise, and mirror its state into
/// the checkpoint status.
///
/// `started_at` is stamped as start time when this call creates the job.
pub async fn sync_job<S: ObjectStore + ?Sized>(
    store: &S,
    checkpoint: &PodCheckpoint,
    desired: &Job,
    started_at: DateTime<Utc>,
) -> Result<(), ReconcileError> {
    let name = NamespacedName::new(
        desired.metadata.namespace.clone(),
        desired.metadata.name.clone(),
    );
    let mut status = checkpoint.status.clone();

    let observed = match store.get::<Job>(&name).await {
        Ok(existing) => existing,
        Err(e) if e.is_not_found() => {
            info!("Creating Job {name} for PodCheckpoint {}", checkpoint.metadata.key());
            match store.create(desired).await {
                Ok(created) => {
                    status.start_time = Some(started_at);
                    created
                }
                // another pass created it first
                Err(StoreError::AlreadyExists { .. }) => store.get::<Job>(&name).await?,
                Err(e) => return Err(e.into()),
            }
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(owner) = observed.metadata.controller_ref()
        && owner.uid != checkpoint.metadata.uid
    {
        return Err(ReconcileError::ForeignJob {
            job: name.to_string(),
        });
    }

    apply_job_status(&mut status, &observed.status);
    persist_status(store, checkpoint, status).await?;
    Ok(())
}
