use common::{
    Job, NamespacedName, ObjectMeta, OwnerReference, PODCHECKPOINT_API_VERSION, PodCheckpoint,
    PodTask, ResourceKind,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

/// A typed object that can be kept in an [`ObjectStore`](super::store::ObjectStore).
pub trait Object: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: ResourceKind;

    fn metadata(&self) -> &ObjectMeta;
    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    fn namespaced_name(&self) -> NamespacedName {
        let meta = self.metadata();
        NamespacedName::new(meta.namespace.clone(), meta.name.clone())
    }
}

macro_rules! impl_object {
    ($ty:ty, $kind:expr) => {
        impl Object for $ty {
            const KIND: ResourceKind = $kind;

            fn metadata(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn metadata_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }
        }
    };
}

impl_object!(PodTask, ResourceKind::Pod);
impl_object!(Job, ResourceKind::Job);
impl_object!(PodCheckpoint, ResourceKind::PodCheckpoint);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    pub api_version: String,
    pub kind: String,
    /// Lowercase plural used in storage keys, e.g. `jobs`.
    pub plural: String,
}

impl TypeInfo {
    pub fn new(api_version: &str, kind: &str, plural: &str) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            plural: plural.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchemeError {
    #[error("kind {0} is not registered in the scheme")]
    Unregistered(ResourceKind),
    #[error("owner {owner} has no uid; it must be read back from the store first")]
    OwnerWithoutUid { owner: String },
    #[error("{dependent} is already controlled by {kind} {name}")]
    AlreadyOwned {
        dependent: String,
        kind: ResourceKind,
        name: String,
    },
}

/// Registry of the kinds this process knows how to store and reference.
///
/// Built once at startup and handed to the store and the controllers.
#[derive(Debug, Clone, Default)]
pub struct Scheme {
    types: BTreeMap<ResourceKind, TypeInfo>,
}

impl Scheme {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scheme with pods, jobs and pod checkpoints registered.
    pub fn with_defaults() -> Self {
        let mut scheme = Self::new();
        scheme.register(ResourceKind::Pod, TypeInfo::new("v1", "Pod", "pods"));
        scheme.register(ResourceKind::Job, TypeInfo::new("batch/v1", "Job", "jobs"));
        scheme.register(
            ResourceKind::PodCheckpoint,
            TypeInfo::new(PODCHECKPOINT_API_VERSION, "PodCheckpoint", "podcheckpoints"),
        );
        scheme
    }

    pub fn register(&mut self, kind: ResourceKind, info: TypeInfo) {
        self.types.insert(kind, info);
    }

    pub fn type_info(&self, kind: ResourceKind) -> Result<&TypeInfo, SchemeError> {
        self.types.get(&kind).ok_or(SchemeError::Unregistered(kind))
    }

    pub fn kinds(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        self.types.keys().copied()
    }

    /// Storage prefix for a kind, e.g. `/registry/jobs/`.
    pub fn prefix(&self, kind: ResourceKind) -> Result<String, SchemeError> {
        Ok(format!("/registry/{}/", self.type_info(kind)?.plural))
    }

    /// Storage key for an object, e.g. `/registry/jobs/forensics-system/req-job`.
    pub fn key(&self, kind: ResourceKind, name: &NamespacedName) -> Result<String, SchemeError> {
        Ok(format!(
            "{}{}/{}",
            self.prefix(kind)?,
            name.namespace,
            name.name
        ))
    }

    /// Record `owner` as the managing controller of `dependent`.
    ///
    /// Deleting the owner through the store cascades to the dependent.
    pub fn set_controller_reference<T: Object>(
        &self,
        owner: &T,
        dependent: &mut ObjectMeta,
    ) -> Result<(), SchemeError> {
        let info = self.type_info(T::KIND)?;
        let owner_meta = owner.metadata();
        if owner_meta.uid.is_nil() {
            return Err(SchemeError::OwnerWithoutUid {
                owner: owner_meta.key(),
            });
        }

        if let Some(existing) = dependent.controller_ref()
            && existing.uid != owner_meta.uid
        {
            return Err(SchemeError::AlreadyOwned {
                dependent: dependent.key(),
                kind: existing.kind,
                name: existing.name.clone(),
            });
        }

        let reference = OwnerReference {
            api_version: info.api_version.clone(),
            kind: T::KIND,
            name: owner_meta.name.clone(),
            uid: owner_meta.uid,
            controller: true,
            block_owner_deletion: Some(true),
        };
        let owners = dependent.owner_references.get_or_insert_with(Vec::new);
        owners.retain(|o| o.uid != owner_meta.uid);
        owners.push(reference);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{PodCheckpointSpec, PodCheckpointStatus};
    use uuid::Uuid;

    fn checkpoint(uid: Uuid) -> PodCheckpoint {
        PodCheckpoint {
            api_version: PODCHECKPOINT_API_VERSION.to_string(),
            kind: "PodCheckpoint".to_string(),
            metadata: ObjectMeta {
                name: "req".to_string(),
                namespace: "team-a".to_string(),
                uid,
                ..Default::default()
            },
            spec: PodCheckpointSpec::default(),
            status: PodCheckpointStatus::default(),
        }
    }

    #[test]
    fn keys_are_prefixed_by_plural() {
        let scheme = Scheme::with_defaults();
        let name = NamespacedName::new("forensics-system", "req-job");
        let key = scheme.key(ResourceKind::Job, &name).unwrap();
        assert_eq!(key, "/registry/jobs/forensics-system/req-job");
        assert!(key.starts_with(&scheme.prefix(ResourceKind::Job).unwrap()));
        assert!(!key.starts_with(&scheme.prefix(ResourceKind::Pod).unwrap()));
    }

    #[test]
    fn unregistered_kind_is_rejected() {
        let scheme = Scheme::new();
        assert_eq!(
            scheme.prefix(ResourceKind::Job),
            Err(SchemeError::Unregistered(ResourceKind::Job))
        );
    }

    #[test]
    fn controller_reference_is_set_once() {
        let scheme = Scheme::with_defaults();
        let owner = checkpoint(Uuid::new_v4());
        let mut meta = ObjectMeta {
            name: "req-job".to_string(),
            ..Default::default()
        };

        scheme.set_controller_reference(&owner, &mut meta).unwrap();
        // idempotent for the same owner
        scheme.set_controller_reference(&owner, &mut meta).unwrap();
        let owners = meta.owner_references.as_ref().unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].api_version, PODCHECKPOINT_API_VERSION);
        assert_eq!(owners[0].kind, ResourceKind::PodCheckpoint);
        assert!(owners[0].controller);

        let intruder = checkpoint(Uuid::new_v4());
        assert!(matches!(
            scheme.set_controller_reference(&intruder, &mut meta),
            Err(SchemeError::AlreadyOwned { .. })
        ));
    }

    #[test]
    fn owner_must_have_uid() {
        let scheme = Scheme::with_defaults();
        let owner = checkpoint(Uuid::nil());
        let mut meta = ObjectMeta::default();
        assert!(matches!(
            scheme.set_controller_reference(&owner, &mut meta),
            Err(SchemeError::OwnerWithoutUid { .. })
        ));
    }
}
