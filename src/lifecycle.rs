use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppState {
    Starting,
    Running,
    NotConfigured,
    Error,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfigState {
    NotConfigured,
    InProgress,
    Configured,
    PartiallyConfigured,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthState {
    NotAuthenticated,
    InProgress,
    Authenticated,
    NotRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    NotRequired,
}

/// Everything the hub can see about the adapter's health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppStates {
    pub app: AppState,
    pub config: ConfigState,
    pub auth: AuthState,
    pub connection: ConnectionState,
    pub last_error: String,
}

impl AppStates {
    fn starting() -> Self {
        Self {
            app: AppState::Starting,
            config: ConfigState::NotConfigured,
            auth: AuthState::NotAuthenticated,
            connection: ConnectionState::Disconnected,
            last_error: String::new(),
        }
    }
}

/// Lifecycle state holder. Every transition updates all fields in a single
/// `send_modify`, so observers never see a half-applied transition.
#[derive(Debug)]
pub struct Lifecycle {
    tx: watch::Sender<AppStates>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(AppStates::starting());
        Self { tx }
    }

    pub fn states(&self) -> AppStates {
        self.tx.borrow().clone()
    }

    pub fn app_state(&self) -> AppState {
        self.tx.borrow().app
    }

    pub fn is_running(&self) -> bool {
        self.app_state() == AppState::Running
    }

    pub fn subscribe(&self) -> watch::Receiver<AppStates> {
        self.tx.subscribe()
    }

    /// Authenticated and polling.
    pub fn set_running(&self) {
        self.transition(|s| {
            s.app = AppState::Running;
            s.config = ConfigState::Configured;
            s.auth = AuthState::Authenticated;
            s.connection = ConnectionState::Connected;
            s.last_error.clear();
        });
    }

    /// Credentials are being exchanged.
    pub fn set_configuring(&self) {
        self.transition(|s| {
            s.config = ConfigState::InProgress;
            s.auth = AuthState::InProgress;
            s.connection = ConnectionState::Connecting;
        });
    }

    pub fn set_not_configured(&self) {
        self.transition(|s| {
            s.app = AppState::NotConfigured;
            s.config = ConfigState::NotConfigured;
            s.auth = AuthState::NotAuthenticated;
            s.connection = ConnectionState::Disconnected;
        });
    }

    pub fn set_error(&self, error: impl Into<String>) {
        let error = error.into();
        self.transition(|s| {
            s.app = AppState::Error;
            s.last_error = error;
        });
    }

    /// Record a non-fatal failure without changing state.
    pub fn record_error(&self, error: impl Into<String>) {
        let error = error.into();
        self.tx.send_modify(|s| s.last_error = error);
    }

    pub fn set_terminated(&self) {
        self.transition(|s| s.app = AppState::Terminated);
    }

    fn transition(&self, f: impl FnOnce(&mut AppStates)) {
        self.tx.send_modify(|s| {
            f(s);
            info!(app = ?s.app, config = ?s.config, auth = ?s.auth, connection = ?s.connection, "lifecycle transition");
        });
    }

    /// Resolve once the app is `Running` (true) or `Terminated` (false).
    pub async fn wait_for_running(&self) -> bool {
        let mut rx = self.tx.subscribe();
        match rx
            .wait_for(|s| matches!(s.app, AppState::Running | AppState::Terminated))
            .await
        {
            Ok(states) => states.app == AppState::Running,
            Err(_) => false,
        }
    }
}
