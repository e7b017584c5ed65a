use crate::api::scheme::Scheme;
use crate::api::store::{ObjectStore, StoreError, StoreResult, StoredObject};
use async_trait::async_trait;
use common::{NamespacedName, ResourceKind};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Store operations that can be made to fail with [`MemStore::fail_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Create,
    Update,
    Delete,
    List,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<(ResourceKind, NamespacedName), StoredObject>,
    revision: i64,
}

/// In-process [`ObjectStore`] with the same create/update semantics as
/// [`XlineStore`](super::xlinestore::XlineStore).
pub struct MemStore {
    scheme: Arc<Scheme>,
    inner: RwLock<Inner>,
    failures: Mutex<HashSet<(StoreOp, ResourceKind)>>,
}

impl MemStore {
    pub fn new(scheme: Arc<Scheme>) -> Self {
        Self {
            scheme,
            inner: RwLock::new(Inner::default()),
            failures: Mutex::new(HashSet::new()),
        }
    }

    /// Make the next `op` on `kind` fail with a transient error.
    pub async fn fail_next(&self, op: StoreOp, kind: ResourceKind) {
        self.failures.lock().await.insert((op, kind));
    }

    /// Number of stored objects of `kind`.
    pub async fn count(&self, kind: ResourceKind) -> usize {
        self.inner
            .read()
            .await
            .objects
            .keys()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    async fn check(&self, op: StoreOp, kind: ResourceKind) -> StoreResult<()> {
        self.scheme.type_info(kind)?;
        if self.failures.lock().await.remove(&(op, kind)) {
            return Err(StoreError::Transient(anyhow::anyhow!(
                "injected {op:?} failure for {kind}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemStore {
    fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    async fn get_raw(
        &self,
        kind: ResourceKind,
        name: &NamespacedName,
    ) -> StoreResult<StoredObject> {
        self.check(StoreOp::Get, kind).await?;
        self.inner
            .read()
            .await
            .objects
            .get(&(kind, name.clone()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind,
                name: name.clone(),
            })
    }

    async fn create_raw(
        &self,
        kind: ResourceKind,
        name: &NamespacedName,
        yaml: &str,
    ) -> StoreResult<i64> {
        self.check(StoreOp::Create, kind).await?;
        let mut inner = self.inner.write().await;
        let key = (kind, name.clone());
        if inner.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind,
                name: name.clone(),
            });
        }
        inner.revision += 1;
        let revision = inner.revision;
        inner.objects.insert(
            key,
            StoredObject {
                yaml: yaml.to_string(),
                revision,
            },
        );
        Ok(revision)
    }

    async fn update_raw(
        &self,
        kind: ResourceKind,
        name: &NamespacedName,
        yaml: &str,
        expected_revision: Option<i64>,
    ) -> StoreResult<i64> {
        self.check(StoreOp::Update, kind).await?;
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let Some(stored) = inner.objects.get_mut(&(kind, name.clone())) else {
            return Err(StoreError::NotFound {
                kind,
                name: name.clone(),
            });
        };
        if expected_revision.is_some_and(|r| r != stored.revision) {
            return Err(StoreError::Conflict {
                kind,
                name: name.clone(),
            });
        }
        inner.revision += 1;
        stored.yaml = yaml.to_string();
        stored.revision = inner.revision;
        Ok(inner.revision)
    }

    async fn delete_raw(&self, kind: ResourceKind, name: &NamespacedName) -> StoreResult<()> {
        self.check(StoreOp::Delete, kind).await?;
        match self.inner.write().await.objects.remove(&(kind, name.clone())) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound {
                kind,
                name: name.clone(),
            }),
        }
    }

    async fn list_raw(&self, kind: ResourceKind) -> StoreResult<Vec<StoredObject>> {
        self.check(StoreOp::List, kind).await?;
        Ok(self
            .inner
            .read()
            .await
            .objects
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, v)| v.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::scheme::Object;
    use crate::api::store::ObjectStoreExt;
    use common::{
        ObjectMeta, PODCHECKPOINT_API_VERSION, PodCheckpoint, PodCheckpointSpec,
        PodCheckpointStatus,
    };

    fn store() -> MemStore {
        MemStore::new(Arc::new(Scheme::with_defaults()))
    }

    fn checkpoint(name: &str) -> PodCheckpoint {
        PodCheckpoint {
            api_version: PODCHECKPOINT_API_VERSION.to_string(),
            kind: "PodCheckpoint".to_string(),
            metadata: ObjectMeta {
                name: name.to_string(),
                ..Default::default()
            },
            spec: PodCheckpointSpec {
                pod: "app-1".to_string(),
                ..Default::default()
            },
            status: PodCheckpointStatus::default(),
        }
    }

    #[tokio::test]
    async fn create_is_fail_if_exists() {
        let store = store();
        let created = store.create(&checkpoint("req")).await.unwrap();
        assert!(!created.metadata.uid.is_nil());
        assert!(created.metadata.creation_timestamp.is_some());

        let err = store.create(&checkpoint("req")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
        assert_eq!(store.count(ResourceKind::PodCheckpoint).await, 1);
    }

    #[tokio::test]
    async fn stale_update_conflicts() {
        let store = store();
        let created = store.create(&checkpoint("req")).await.unwrap();

        let mut first = created.clone();
        first.spec.subpath = "a".to_string();
        store.update(&first).await.unwrap();

        let mut stale = created;
        stale.spec.subpath = "b".to_string();
        let err = store.update(&stale).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn update_status_leaves_spec_alone() {
        let store = store();
        let created = store.create(&checkpoint("req")).await.unwrap();

        let mut local = created.clone();
        local.spec.pod = "ignored".to_string();
        local.status.active = 1;
        let written = store.update_status(&local).await.unwrap();
        assert_eq!(written.spec.pod, "app-1");
        assert_eq!(written.status.active, 1);

        let read: PodCheckpoint = store.get(&created.namespaced_name()).await.unwrap();
        assert_eq!(read, written);
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let store = store();
        store.fail_next(StoreOp::Get, ResourceKind::Pod).await;
        let name = NamespacedName::new("default", "p");
        let err = store.get_raw(ResourceKind::Pod, &name).await.unwrap_err();
        assert!(matches!(err, StoreError::Transient(_)));
        let err = store.get_raw(ResourceKind::Pod, &name).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
