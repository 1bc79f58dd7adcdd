use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior, interval, interval_at};
use tracing::{debug, error, info, warn};

use crate::auth::TokenManager;
use crate::diff::diff;
use crate::lifecycle::Lifecycle;
use crate::protocol::Address;
use crate::reports;
use crate::store::Store;
use crate::transport::Publisher;
use crate::tree::DeviceTree;
use crate::types::{DeviceId, Temperature};
use crate::vendor::VendorClient;
use crate::{Error, Result};

/// Keeps the hub in step with the cloud: periodic fetch, diff, publish.
pub struct Supervisor {
    store: Arc<Store>,
    tokens: Arc<TokenManager>,
    vendor: Arc<dyn VendorClient>,
    publisher: Arc<Publisher>,
    lifecycle: Arc<Lifecycle>,
    refresh_lock: Mutex<()>,
}

fn period(minutes: u64) -> Duration {
    Duration::from_secs(minutes.saturating_mul(60))
}

impl Supervisor {
    pub fn new(
        store: Arc<Store>,
        tokens: Arc<TokenManager>,
        vendor: Arc<dyn VendorClient>,
        publisher: Arc<Publisher>,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        Self {
            store,
            tokens,
            vendor,
            publisher,
            lifecycle,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Poll whenever the app is running. Returns once the app terminates.
    pub async fn run(&self) {
        while self.lifecycle.wait_for_running().await {
            self.poll_while_running().await;
            debug!(state = ?self.lifecycle.app_state(), "poll loop stopped");
        }
        info!("poll supervisor terminated");
    }

    async fn poll_while_running(&self) {
        let mut minutes = match self.store.config().await.poll_interval_minutes() {
            Ok(m) => m,
            Err(e) => {
                error!(error = %e, "invalid poll interval, polling disabled");
                self.lifecycle.set_error(e.to_string());
                return;
            }
        };
        info!(minutes, "poll loop started");

        let mut states = self.lifecycle.subscribe();
        let mut ticker = interval(period(minutes));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                changed = states.changed() => {
                    if changed.is_err() || !self.lifecycle.is_running() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if !self.lifecycle.is_running() {
                        break;
                    }
                    self.tick().await;

                    if let Ok(current) = self.store.config().await.poll_interval_minutes()
                        && current != minutes
                    {
                        info!(from = minutes, to = current, "poll interval changed");
                        minutes = current;
                        ticker = interval_at(Instant::now() + period(minutes), period(minutes));
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    }
                }
            }
        }
    }

    /// One poll. Failures are logged and recorded, never returned.
    pub async fn tick(&self) {
        match self.refresh(false).await {
            Ok(tree) => debug!(devices = tree.len(), "poll complete"),
            Err(Error::NotConfigured) => debug!("no account configured, skipping poll"),
            Err(Error::Fetch(msg)) => {
                warn!(error = %msg, "fetching device tree failed, recovering tokens");
                self.publisher.log_fetch_error(&msg);
                self.lifecycle.record_error(format!("fetch error: {msg}"));
                match self.tokens.recover().await {
                    Ok(_) => info!("tokens recovered, next poll retries the fetch"),
                    Err(e) => {
                        error!(error = %e, "token recovery failed");
                        self.lifecycle.record_error(e.to_string());
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "poll failed");
                self.lifecycle.record_error(e.to_string());
            }
        }
    }

    /// Fetch the tree, publish what changed and commit it. With
    /// `include_things` every device is re-announced first.
    pub async fn refresh(&self, include_things: bool) -> Result<Arc<DeviceTree>> {
        let _guard = self.refresh_lock.lock().await;

        let user_id = self
            .store
            .credentials()
            .await
            .user_id
            .ok_or(Error::NotConfigured)?;
        let token = self.tokens.ensure_authenticated().await?;
        let snapshot = self.vendor.fetch_tree(&token, user_id).await?;
        if let Ok(body) = serde_json::to_value(&snapshot) {
            self.publisher.log_tree(&body);
        }

        let previous = self.store.tree().await;
        let events = diff(previous.as_deref().map(DeviceTree::snapshot), &snapshot);
        debug!(changes = events.len(), "diffed device tree");

        if include_things {
            let adapter = Address::adapter_event();
            for (_, _, device) in snapshot.devices() {
                let msg = reports::inclusion_report(device)?;
                if let Err(e) = self.publisher.publish(&adapter, msg).await {
                    warn!(device = %device.id, error = %e, "publishing inclusion report failed");
                }
            }
        }

        for event in &events {
            let (address, msg) = reports::change_report(event);
            if let Err(e) = self.publisher.publish(&address, msg).await {
                warn!(device = %event.device_id(), error = %e, "publishing change failed");
            }
        }

        let tree = self.store.commit(snapshot).await;
        self.store.update_config(|_| ()).await?;
        Ok(tree)
    }

    /// Write a confirmed setpoint into the cached tree. Waits for any
    /// refresh in flight so its commit cannot overwrite the new value.
    pub async fn apply_setpoint(&self, id: DeviceId, temp: Temperature) -> bool {
        let _guard = self.refresh_lock.lock().await;
        self.store.update_target_temperature(id, temp).await
    }

    /// Announce every known device as excluded.
    pub async fn exclude_all(&self) {
        let _guard = self.refresh_lock.lock().await;
        self.exclude_current().await;
    }

    /// Forget the account: clear credentials, restore the default config and
    /// drop the cached tree, optionally excluding every device first. Holds
    /// the refresh lock, so a poll in flight finishes before the reset and
    /// later ones find nothing configured.
    pub async fn reset(&self, exclude: bool) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;
        if exclude {
            self.exclude_current().await;
        }
        let invalidated = self.tokens.invalidate().await;
        let reset = self.store.reset_to_defaults().await;
        self.lifecycle.set_not_configured();
        invalidated.and(reset)
    }

    async fn exclude_current(&self) {
        let Some(tree) = self.store.tree().await else {
            warn!("no device tree, nothing to exclude");
            return;
        };
        let adapter = Address::adapter_event();
        for device in tree.devices() {
            info!(device = %device.id, "excluding device");
            let sent = match reports::exclusion_for(device.id) {
                Ok(msg) => self.publisher.publish(&adapter, msg).await,
                Err(e) => Err(e),
            };
            if let Err(e) = sent {
                warn!(device = %device.id, error = %e, "exclusion report failed");
            }
        }
    }
}
