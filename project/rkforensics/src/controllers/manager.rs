use crate::api::xlinestore::XlineStore;
use anyhow::Result;
use async_trait::async_trait;
use common::ResourceKind;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc, watch};
use tokio::time::sleep;

/// What a successful reconcile asks of the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileResult {
    /// Reconcile the same key again after this delay.
    pub requeue_after: Option<Duration>,
}

impl ReconcileResult {
    pub fn done() -> Self {
        Self::default()
    }

    pub fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue_after: Some(delay),
        }
    }
}

/// Controller trait defines the contract for controllers managed by ControllerManager.
#[async_trait]
pub trait Controller: Send + Sync + 'static {
    // Name used for identifying the controller.
    fn name(&self) -> &'static str;

    // Kinds whose changes should trigger a reconcile.
    fn watched_kinds(&self) -> Vec<ResourceKind>;

    // Map a changed object of `kind` (YAML) to the keys this controller reconciles.
    fn keys_for(&self, kind: ResourceKind, yaml: &str) -> Vec<String>;

    // Reconcile the resource identified by key, e.g. `namespace/name`.
    async fn reconcile(&self, key: &str) -> Result<ReconcileResult>;
}

/// Keys of one controller, split the way a client-go workqueue splits them.
#[derive(Default)]
struct WorkState {
    // waiting for a pass, either in the channel or parked behind a running pass
    dirty: HashSet<String>,
    // currently being reconciled
    processing: HashSet<String>,
}

/// Simple ControllerManager: registers controllers, provides enqueue, and starts watch.
pub struct ControllerManager {
    controllers: RwLock<HashMap<String, Arc<dyn Controller>>>,
    // a work queue per controller.
    queues: RwLock<HashMap<String, mpsc::Sender<String>>>,
    // dirty/processing keys per controller, so the same key never runs twice at once
    // and a change seen during a pass still gets its own pass.
    work: RwLock<HashMap<String, WorkState>>,
    // use for stopping the manager.
    stop_tx: watch::Sender<bool>,
}

impl ControllerManager {
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            controllers: RwLock::new(HashMap::new()),
            queues: RwLock::new(HashMap::new()),
            work: RwLock::new(HashMap::new()),
            stop_tx,
        }
    }

    // Register a controller and spawn a dispatcher task that consumes its work queue.
    pub async fn register(
        self: Arc<Self>,
        controller: Arc<dyn Controller>,
        workers: usize, // max number of concurrent reconcile workers
    ) -> Result<()> {
        let name = controller.name().to_string();
        let (tx, mut rx) = mpsc::channel::<String>(1000);

        self.controllers
            .write()
            .await
            .insert(name.clone(), controller.clone());
        self.queues.write().await.insert(name.clone(), tx);
        self.work
            .write()
            .await
            .insert(name.clone(), WorkState::default());

        // use semaphore to limit the number of concurrent reconcile workers
        let semaphore = Arc::new(tokio::sync::Semaphore::new(workers.max(1)));
        let mut stop_sub = self.stop_tx.subscribe();
        let manager = self.clone();

        tokio::spawn(async move {
            loop {
                let key = tokio::select! {
                    _ = stop_sub.changed() => break,
                    opt = rx.recv() => match opt {
                        Some(key) => key,
                        None => break,
                    },
                };
                // all workers may be busy; keep listening for stop while waiting
                let permit = tokio::select! {
                    _ = stop_sub.changed() => break,
                    permit = semaphore.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };
                manager.start_processing(&name, &key).await;

                let controller = controller.clone();
                let name = name.clone();
                let manager = manager.clone();

                tokio::spawn(async move {
                    let outcome = retry_with_backoff(|| controller.reconcile(&key)).await;
                    drop(permit);
                    manager.finish_processing(&name, &key).await;

                    match outcome {
                        Ok(ReconcileResult { requeue_after: Some(delay) }) => {
                            log::debug!("controller {name} requeue {key} after {delay:?}");
                            let mut stop = manager.stop_tx.subscribe();
                            tokio::select! {
                                _ = stop.changed() => {}
                                _ = sleep(delay) => manager.enqueue(&name, key).await,
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            log::error!("controller {name} reconcile {key} failed: {e:?}");
                        }
                    }
                });
            }
        });

        Ok(())
    }

    // Enqueue a key for a controller. A key that is already queued is not queued
    // twice; a key that is being reconciled is marked dirty and queued again once
    // its pass ends.
    pub async fn enqueue(&self, controller_name: &str, key: String) {
        let mut work = self.work.write().await;
        let Some(state) = work.get_mut(controller_name) else {
            return;
        };
        if !state.dirty.insert(key.clone()) {
            return;
        }
        if state.processing.contains(&key) {
            log::debug!("controller {controller_name}: {key} changed during its pass, queued again");
            return;
        }
        self.push(controller_name, key, state).await;
    }

    async fn start_processing(&self, controller_name: &str, key: &str) {
        if let Some(state) = self.work.write().await.get_mut(controller_name) {
            state.dirty.remove(key);
            state.processing.insert(key.to_string());
        }
    }

    async fn finish_processing(&self, controller_name: &str, key: &str) {
        let mut work = self.work.write().await;
        let Some(state) = work.get_mut(controller_name) else {
            return;
        };
        state.processing.remove(key);
        if state.dirty.contains(key) {
            self.push(controller_name, key.to_string(), state).await;
        }
    }

    // Send a dirty key to the controller's channel. Caller holds the work lock.
    async fn push(&self, controller_name: &str, key: String, state: &mut WorkState) {
        let queues = self.queues.read().await;
        match queues.get(controller_name) {
            Some(tx) if tx.try_send(key.clone()).is_ok() => {}
            _ => {
                log::warn!("work queue of {controller_name} is full or closed, dropping {key}");
                state.dirty.remove(&key);
            }
        }
    }

    // Route a changed object to every controller watching its kind.
    pub async fn dispatch(&self, kind: ResourceKind, yaml: &str) {
        let targets: Vec<(String, Vec<String>)> = self
            .controllers
            .read()
            .await
            .iter()
            .filter(|(_, c)| c.watched_kinds().contains(&kind))
            .map(|(name, c)| (name.clone(), c.keys_for(kind, yaml)))
            .collect();
        for (name, keys) in targets {
            for key in keys {
                self.enqueue(&name, key).await;
            }
        }
    }

    // Start one informer per watched kind. Each informer lists, then watches from
    // the listed revision, and reconnects with backoff when the stream ends.
    pub async fn start_watch(self: Arc<Self>, store: Arc<XlineStore>) -> Result<()> {
        let kinds: BTreeSet<ResourceKind> = self
            .controllers
            .read()
            .await
            .values()
            .flat_map(|c| c.watched_kinds())
            .collect();

        for kind in kinds {
            let mgr = self.clone();
            let store = store.clone();
            let mut stop_sub = self.stop_tx.subscribe();
            tokio::spawn(async move {
                tokio::select! {
                    _ = stop_sub.changed() => {}
                    _ = mgr.run_informer(kind, store) => {}
                }
            });
        }
        Ok(())
    }

    async fn run_informer(&self, kind: ResourceKind, store: Arc<XlineStore>) {
        let mut backoff_ms = 100u64;
        loop {
            match store.snapshot_with_rev(kind).await {
                Ok((items, rev)) => {
                    for (_key, yaml) in items {
                        self.dispatch(kind, &yaml).await;
                    }

                    match store.watch(kind, rev).await {
                        Ok((_watcher, mut stream)) => {
                            backoff_ms = 100;
                            loop {
                                match stream.message().await {
                                    Ok(Some(resp)) => {
                                        for ev in resp.events() {
                                            // deletes carry an empty value; fall back to prev_kv
                                            let curr = ev
                                                .kv()
                                                .map(|kv| String::from_utf8_lossy(kv.value()).to_string())
                                                .filter(|v| !v.trim().is_empty());
                                            let yaml = curr.or_else(|| {
                                                ev.prev_kv().map(|kv| {
                                                    String::from_utf8_lossy(kv.value()).to_string()
                                                })
                                            });
                                            if let Some(yaml) = yaml {
                                                self.dispatch(kind, &yaml).await;
                                            }
                                        }
                                    }
                                    Ok(None) => {
                                        log::info!("{kind} watch stream closed, will reconnect");
                                        break;
                                    }
                                    Err(e) => {
                                        log::error!("{kind} watch error: {e:?}, will reconnect");
                                        break;
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            log::error!("failed to start {kind} watch: {e:?}");
                        }
                    }
                }
                Err(e) => {
                    log::error!("failed to snapshot {kind}: {e:?}");
                }
            }

            // backoff before retry
            sleep(Duration::from_millis(backoff_ms)).await;
            backoff_ms = (backoff_ms * 2).min(30_000);
        }
    }

    pub async fn shutdown(&self) {
        let _ = self.stop_tx.send(true);
        sleep(Duration::from_millis(200)).await;
    }
}

impl Default for ControllerManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn retry_with_backoff<F, Fut>(mut f: F) -> Result<ReconcileResult>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<ReconcileResult>>,
{
    let mut attempts = 0u32;
    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                attempts += 1;
                if attempts >= 5 {
                    return Err(e);
                }
                let backoff = 2u64.pow(attempts.min(6)) * 100;
                log::warn!("reconcile attempt {attempts} failed: {e}, retrying in {backoff}ms");
                sleep(Duration::from_millis(backoff)).await;
            }
        }
    }
}
