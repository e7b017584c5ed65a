use crate::api::scheme::Scheme;
use crate::api::store::{ObjectStore, StoreError, StoreResult, StoredObject};
use crate::protocol::config::XlineConfig;
use anyhow::Result;
use async_trait::async_trait;
use common::{NamespacedName, ResourceKind};
use etcd_client::{
    Client, Compare, CompareOp, ConnectOptions, GetOptions, Txn, TxnOp, TxnOpResponse,
    WatchOptions, WatchStream, Watcher,
};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Connection settings for [`XlineStore`].
#[derive(Clone, Default)]
pub struct XlineOptions {
    pub endpoints: Vec<String>,
    pub config: Option<ConnectOptions>,
}

impl XlineOptions {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            config: None,
        }
    }

    pub fn from_config(cfg: &XlineConfig) -> Self {
        let mut option = Self::new(cfg.endpoints.clone());
        if let (Some(user), Some(password)) = (&cfg.username, &cfg.password) {
            option.config = Some(ConnectOptions::new().with_user(user, password));
        }
        option
    }
}

/// XlineStore keeps objects in an etcd-compatible KV store.
/// Keys are `/registry/<plural>/<namespace>/<name>`, values are YAML documents.
#[derive(Clone)]
pub struct XlineStore {
    client: Arc<RwLock<Client>>,
    scheme: Arc<Scheme>,
}

impl XlineStore {
    /// Create a new XlineStore instance by connecting to the given endpoints.
    pub async fn new(option: XlineOptions, scheme: Arc<Scheme>) -> Result<Self> {
        let client = Client::connect(option.endpoints, option.config).await?;
        Ok(Self {
            client: Arc::new(RwLock::new(client)),
            scheme,
        })
    }

    /// Take a snapshot of all objects of a kind and return them with the current revision.
    pub async fn snapshot_with_rev(
        &self,
        kind: ResourceKind,
    ) -> Result<(Vec<(String, String)>, i64)> {
        let prefix = self.scheme.prefix(kind)?;
        let mut client = self.client.write().await;
        let resp = client
            .get(prefix.clone(), Some(GetOptions::new().with_prefix()))
            .await?;
        let rev = resp.header().map(|h| h.revision()).unwrap_or(0);
        let items = resp
            .kvs()
            .iter()
            .map(|kv| {
                (
                    String::from_utf8_lossy(kv.key()).to_string(),
                    String::from_utf8_lossy(kv.value()).to_string(),
                )
            })
            .collect();
        Ok((items, rev))
    }

    /// Watch all objects of a kind, starting after `start_rev`.
    pub async fn watch(&self, kind: ResourceKind, start_rev: i64) -> Result<(Watcher, WatchStream)> {
        let prefix = self.scheme.prefix(kind)?;
        let opts = WatchOptions::new()
            .with_prefix()
            .with_prev_key()
            .with_start_revision(start_rev + 1);
        let mut client = self.client.write().await;
        let (watcher, stream) = client.watch(prefix, Some(opts)).await?;
        Ok((watcher, stream))
    }

    fn header_revision(header: Option<&etcd_client::ResponseHeader>) -> i64 {
        header.map(|h| h.revision()).unwrap_or(0)
    }
}

#[async_trait]
impl ObjectStore for XlineStore {
    fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    async fn get_raw(
        &self,
        kind: ResourceKind,
        name: &NamespacedName,
    ) -> StoreResult<StoredObject> {
        let key = self.scheme.key(kind, name)?;
        let mut client = self.client.write().await;
        let resp = client.get(key, None).await.map_err(anyhow::Error::from)?;
        resp.kvs()
            .first()
            .map(|kv| StoredObject {
                yaml: String::from_utf8_lossy(kv.value()).to_string(),
                revision: kv.mod_revision(),
            })
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
        let key = self.scheme.key(kind, name)?;
        // create_revision == 0 means the key does not exist
        let txn = Txn::new()
            .when(vec![Compare::create_revision(
                key.clone(),
                CompareOp::Equal,
                0,
            )])
            .and_then(vec![TxnOp::put(key, yaml, None)]);
        let mut client = self.client.write().await;
        let resp = client.txn(txn).await.map_err(anyhow::Error::from)?;
        if !resp.succeeded() {
            return Err(StoreError::AlreadyExists {
                kind,
                name: name.clone(),
            });
        }
        Ok(Self::header_revision(resp.header()))
    }

    async fn update_raw(
        &self,
        kind: ResourceKind,
        name: &NamespacedName,
        yaml: &str,
        expected_revision: Option<i64>,
    ) -> StoreResult<i64> {
        let key = self.scheme.key(kind, name)?;
        let cmp = match expected_revision {
            Some(rev) => Compare::mod_revision(key.clone(), CompareOp::Equal, rev),
            None => Compare::create_revision(key.clone(), CompareOp::Greater, 0),
        };
        let txn = Txn::new()
            .when(vec![cmp])
            .and_then(vec![TxnOp::put(key.clone(), yaml, None)])
            .or_else(vec![TxnOp::get(key, None)]);
        let mut client = self.client.write().await;
        let resp = client.txn(txn).await.map_err(anyhow::Error::from)?;
        if resp.succeeded() {
            return Ok(Self::header_revision(resp.header()));
        }

        // tell a vanished key apart from a stale revision
        let exists = resp.op_responses().iter().any(|op| match op {
            TxnOpResponse::Get(get) => !get.kvs().is_empty(),
            _ => false,
        });
        if exists {
            Err(StoreError::Conflict {
                kind,
                name: name.clone(),
            })
        } else {
            Err(StoreError::NotFound {
                kind,
                name: name.clone(),
            })
        }
    }

    async fn delete_raw(&self, kind: ResourceKind, name: &NamespacedName) -> StoreResult<()> {
        let key = self.scheme.key(kind, name)?;
        let mut client = self.client.write().await;
        let resp = client.delete(key, None).await.map_err(anyhow::Error::from)?;
        if resp.deleted() == 0 {
            return Err(StoreError::NotFound {
                kind,
                name: name.clone(),
            });
        }
        Ok(())
    }

    async fn list_raw(&self, kind: ResourceKind) -> StoreResult<Vec<StoredObject>> {
        let prefix = self.scheme.prefix(kind)?;
        let mut client = self.client.write().await;
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(anyhow::Error::from)?;
        Ok(resp
            .kvs()
            .iter()
            .map(|kv| StoredObject {
                yaml: String::from_utf8_lossy(kv.value()).to_string(),
                revision: kv.mod_revision(),
            })
            .collect())
    }
}
