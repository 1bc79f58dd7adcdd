use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::auth::TokenManager;
use crate::config::Config;
use crate::lifecycle::Lifecycle;
use crate::logger::MessageLogMode;
use crate::logging::LogHandle;
use crate::poll::Supervisor;
use crate::protocol::{InboundMessage, command_subscriptions};
use crate::router::Router;
use crate::store::Store;
use crate::transport::{Publisher, Transport};
use crate::vendor::VendorClient;
use crate::{Error, Result};

pub struct AdapterBuilder {
    config: Option<Config>,
    vendor: Option<Arc<dyn VendorClient>>,
    transport: Option<Arc<dyn Transport>>,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
    log_handle: Option<LogHandle>,
}

impl AdapterBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            vendor: None,
            transport: None,
            log_mode: None,
            log_path: None,
            log_handle: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn vendor(mut self, vendor: Arc<dyn VendorClient>) -> Self {
        self.vendor = Some(vendor);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    /// Lets `cmd.log.set_level` change the installed subscriber's filter.
    pub fn log_handle(mut self, handle: LogHandle) -> Self {
        self.log_handle = Some(handle);
        self
    }

    pub fn build(self) -> Result<Adapter> {
        let config = self
            .config
            .ok_or_else(|| Error::validation("adapter needs a config"))?;
        let vendor = self
            .vendor
            .ok_or_else(|| Error::validation("adapter needs a vendor client"))?;
        let transport = self
            .transport
            .ok_or_else(|| Error::validation("adapter needs a transport"))?;

        let mut publisher = Publisher::new(transport);
        if let (Some(mode), Some(path)) = (self.log_mode, self.log_path) {
            publisher = publisher.with_message_log(mode, &path)?;
        }
        let publisher = Arc::new(publisher);

        let configured = config.credentials.is_configured();
        let store = Arc::new(Store::new(config));
        let lifecycle = Arc::new(Lifecycle::new());
        let tokens = Arc::new(TokenManager::new(vendor.clone(), store.clone()));
        let supervisor = Arc::new(Supervisor::new(
            store.clone(),
            tokens.clone(),
            vendor.clone(),
            publisher.clone(),
            lifecycle.clone(),
        ));
        let router = Arc::new(Router::new(
            store.clone(),
            tokens.clone(),
            vendor,
            publisher,
            lifecycle.clone(),
            supervisor.clone(),
            self.log_handle,
        ));

        if configured {
            lifecycle.set_running();
        } else {
            lifecycle.set_not_configured();
        }

        Ok(Adapter {
            store,
            lifecycle,
            tokens,
            supervisor,
            router,
        })
    }
}

impl Default for AdapterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The wired-up adapter: command router and poll supervisor over one store.
pub struct Adapter {
    store: Arc<Store>,
    lifecycle: Arc<Lifecycle>,
    tokens: Arc<TokenManager>,
    supervisor: Arc<Supervisor>,
    router: Arc<Router>,
}

/// Background tasks spawned by [`Adapter::start`].
pub struct AdapterTasks {
    pub router: JoinHandle<()>,
    pub supervisor: JoinHandle<()>,
}

impl AdapterTasks {
    pub async fn join(self) {
        let _ = tokio::join!(self.router, self.supervisor);
    }
}

impl Adapter {
    pub fn builder() -> AdapterBuilder {
        AdapterBuilder::new()
    }

    /// Topics the transport must subscribe to and feed into `start`.
    pub fn subscriptions() -> [String; 2] {
        command_subscriptions()
    }

    /// Spawn the router over `inbound` and the poll supervisor.
    pub fn start(&self, inbound: mpsc::Receiver<InboundMessage>) -> AdapterTasks {
        info!(state = ?self.lifecycle.app_state(), "starting adapter");
        let router = self.router.clone();
        let supervisor = self.supervisor.clone();
        AdapterTasks {
            router: tokio::spawn(async move { router.run(inbound).await }),
            supervisor: tokio::spawn(async move { supervisor.run().await }),
        }
    }

    /// Stop both tasks after their current unit of work.
    pub fn shutdown(&self) {
        self.lifecycle.set_terminated();
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }
}
