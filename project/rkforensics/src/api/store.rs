use crate::api::scheme::{Object, Scheme, SchemeError};
use async_trait::async_trait;
use chrono::Utc;
use common::{NamespacedName, ObjectMeta, ResourceKind};
use log::{debug, info};
use uuid::Uuid;

/// Outcome of a store call, classified so callers can branch on the kind
/// instead of inspecting error values.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {name} not found")]
    NotFound {
        kind: ResourceKind,
        name: NamespacedName,
    },
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        kind: ResourceKind,
        name: NamespacedName,
    },
    #[error("{kind} {name} was modified concurrently")]
    Conflict {
        kind: ResourceKind,
        name: NamespacedName,
    },
    #[error(transparent)]
    Scheme(#[from] SchemeError),
    #[error("failed to decode stored object: {0}")]
    Codec(#[from] serde_yaml::Error),
    #[error(transparent)]
    Transient(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Raw YAML value of an object together with the revision it was written at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub yaml: String,
    pub revision: i64,
}

/// Get/create/update/delete of YAML documents keyed by kind and namespaced name.
///
/// `create` fails with [`StoreError::AlreadyExists`] when the key is taken, and
/// `update` with an expected revision fails with [`StoreError::Conflict`] when
/// the object has moved on. These two checks are the only concurrency control
/// controllers rely on.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn scheme(&self) -> &Scheme;

    async fn get_raw(&self, kind: ResourceKind, name: &NamespacedName)
    -> StoreResult<StoredObject>;

    /// Returns the revision of the new object.
    async fn create_raw(
        &self,
        kind: ResourceKind,
        name: &NamespacedName,
        yaml: &str,
    ) -> StoreResult<i64>;

    /// Overwrite an existing object. With `expected_revision` set the write only
    /// happens if the stored revision still matches.
    async fn update_raw(
        &self,
        kind: ResourceKind,
        name: &NamespacedName,
        yaml: &str,
        expected_revision: Option<i64>,
    ) -> StoreResult<i64>;

    async fn delete_raw(&self, kind: ResourceKind, name: &NamespacedName) -> StoreResult<()>;

    async fn list_raw(&self, kind: ResourceKind) -> StoreResult<Vec<StoredObject>>;
}

fn decode<T: Object>(stored: StoredObject) -> StoreResult<T> {
    let mut obj: T = serde_yaml::from_str(&stored.yaml)?;
    obj.metadata_mut().resource_version = Some(stored.revision);
    Ok(obj)
}

fn encode<T: Object>(obj: &T) -> StoreResult<String> {
    // the revision lives in the store, never in the document
    let mut obj = obj.clone();
    obj.metadata_mut().resource_version = None;
    Ok(serde_yaml::to_string(&obj)?)
}

pub fn meta_from_yaml(yaml: &str) -> StoreResult<ObjectMeta> {
    let value: serde_yaml::Value = serde_yaml::from_str(yaml)?;
    Ok(serde_yaml::from_value(value["metadata"].clone())?)
}

/// Typed access on top of [`ObjectStore`].
#[async_trait]
pub trait ObjectStoreExt: ObjectStore {
    async fn get<T: Object>(&self, name: &NamespacedName) -> StoreResult<T> {
        let stored = self.get_raw(T::KIND, name).await?;
        decode(stored)
    }

    /// Create `obj`, assigning a uid and creation timestamp when missing.
    /// Returns the object as stored.
    async fn create<T: Object>(&self, obj: &T) -> StoreResult<T> {
        let mut obj = obj.clone();
        let meta = obj.metadata_mut();
        if meta.uid.is_nil() {
            meta.uid = Uuid::new_v4();
        }
        if meta.creation_timestamp.is_none() {
            meta.creation_timestamp = Some(Utc::now());
        }
        let name = obj.namespaced_name();
        let revision = self.create_raw(T::KIND, &name, &encode(&obj)?).await?;
        obj.metadata_mut().resource_version = Some(revision);
        Ok(obj)
    }

    /// Replace the whole object, guarded by its `resource_version` if set.
    async fn update<T: Object>(&self, obj: &T) -> StoreResult<T> {
        let name = obj.namespaced_name();
        let expected = obj.metadata().resource_version;
        let revision = self
            .update_raw(T::KIND, &name, &encode(obj)?, expected)
            .await?;
        let mut obj = obj.clone();
        obj.metadata_mut().resource_version = Some(revision);
        Ok(obj)
    }

    /// Write only the `status` field of `obj` over the stored object.
    ///
    /// Fails with [`StoreError::Conflict`] if the stored object changed since
    /// `obj` was read.
    async fn update_status<T: Object>(&self, obj: &T) -> StoreResult<T> {
        let name = obj.namespaced_name();
        let current = self.get_raw(T::KIND, &name).await?;
        if let Some(expected) = obj.metadata().resource_version
            && expected != current.revision
        {
            return Err(StoreError::Conflict {
                kind: T::KIND,
                name,
            });
        }

        let mut value: serde_yaml::Value = serde_yaml::from_str(&current.yaml)?;
        let status = serde_yaml::to_value(obj)?
            .get("status")
            .cloned()
            .unwrap_or(serde_yaml::Value::Null);
        let map = value.as_mapping_mut().ok_or_else(|| {
            anyhow::anyhow!("stored {} {} is not a mapping", T::KIND, name)
        })?;
        map.insert(serde_yaml::Value::String("status".to_string()), status);

        let yaml = serde_yaml::to_string(&value)?;
        let revision = self
            .update_raw(T::KIND, &name, &yaml, Some(current.revision))
            .await?;
        decode(StoredObject { yaml, revision })
    }

    /// Delete an object and, recursively, every object that names it as owner.
    async fn delete_cascade(&self, kind: ResourceKind, name: &NamespacedName) -> StoreResult<()> {
        let stored = match self.get_raw(kind, name).await {
            Ok(stored) => stored,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        let meta = meta_from_yaml(&stored.yaml)?;
        match self.delete_raw(kind, name).await {
            Ok(()) => info!("deleted {kind} {name}"),
            // raced with another delete; dependents still need collecting
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        if meta.uid.is_nil() {
            return Ok(());
        }

        let kinds: Vec<ResourceKind> = self.scheme().kinds().collect();
        for dependent_kind in kinds {
            for dependent in self.list_raw(dependent_kind).await? {
                let dep_meta = meta_from_yaml(&dependent.yaml)?;
                if dep_meta.is_owned_by(meta.uid) {
                    debug!(
                        "cascading delete of {kind} {name} to {dependent_kind} {}",
                        dep_meta.key()
                    );
                    let dep_name = NamespacedName::new(dep_meta.namespace, dep_meta.name);
                    self.delete_cascade(dependent_kind, &dep_name).await?;
                }
            }
        }
        Ok(())
    }
}

impl<S: ObjectStore + ?Sized> ObjectStoreExt for S {}
