use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::Result;
use crate::config::Config;
use crate::tree::DeviceTree;
use crate::types::{Credentials, DeviceId, DeviceTreeSnapshot, Temperature};

struct Inner {
    config: Config,
    tree: Option<Arc<DeviceTree>>,
}

/// Shared adapter state. Readers get cheap clones; every write goes through
/// the one write lock, and config writes are persisted before it is released.
pub struct Store {
    inner: RwLock<Inner>,
}

impl Store {
    pub fn new(config: Config) -> Self {
        Self {
            inner: RwLock::new(Inner { config, tree: None }),
        }
    }

    /// The last committed tree, `None` until the first successful fetch.
    pub async fn tree(&self) -> Option<Arc<DeviceTree>> {
        self.inner.read().await.tree.clone()
    }

    /// The last committed tree, only if it holds at least one user.
    pub async fn routable_tree(&self) -> Option<Arc<DeviceTree>> {
        self.tree()
            .await
            .filter(|tree| !tree.snapshot().users.is_empty())
    }

    pub async fn commit(&self, snapshot: DeviceTreeSnapshot) -> Arc<DeviceTree> {
        let tree = Arc::new(DeviceTree::new(snapshot));
        self.inner.write().await.tree = Some(tree.clone());
        debug!(devices = tree.len(), "committed device tree");
        tree
    }

    /// Write a confirmed setpoint into the cached tree. Readers holding the
    /// previous `Arc` keep their view.
    pub async fn update_target_temperature(&self, id: DeviceId, temp: Temperature) -> bool {
        let mut inner = self.inner.write().await;
        match inner.tree.as_mut() {
            Some(tree) => Arc::make_mut(tree).set_target_temperature(id, temp),
            None => false,
        }
    }

    pub async fn config(&self) -> Config {
        self.inner.read().await.config.clone()
    }

    pub async fn credentials(&self) -> Credentials {
        self.inner.read().await.config.credentials.clone()
    }

    /// Mutate the config and persist it.
    pub async fn update_config<T>(&self, f: impl FnOnce(&mut Config) -> T) -> Result<T> {
        let mut inner = self.inner.write().await;
        let out = f(&mut inner.config);
        inner.config.save()?;
        Ok(out)
    }

    /// Reset config to defaults, drop the cached tree, persist.
    pub async fn reset_to_defaults(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.config.reset_to_defaults()?;
        inner.tree = None;
        inner.config.save()
    }
}
