#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use glamox_adapter::*;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio::sync::mpsc::UnboundedReceiver;

/// Holds one fetch open until released.
#[derive(Default)]
pub struct FetchGate {
    pub entered: Notify,
    pub release: Notify,
}

/// In-memory vendor. Serves whatever tree is set and records what it is asked.
#[derive(Default)]
pub struct FakeVendor {
    pub gate: Mutex<Option<Arc<FetchGate>>>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub tree: Mutex<DeviceTreeSnapshot>,
    pub calls: Mutex<Vec<&'static str>>,
    pub setpoints: Mutex<Vec<(RoomRef, Temperature)>>,
    pub fetches: AtomicUsize,
    pub fail_fetch: AtomicBool,
    pub fail_set: AtomicBool,
    pub fail_auth: AtomicBool,
}

impl FakeVendor {
    pub fn with_tree(tree: DeviceTreeSnapshot) -> Arc<Self> {
        let vendor = Self::default();
        *vendor.tree.lock().unwrap() = tree;
        Arc::new(vendor)
    }

    pub fn set_tree(&self, tree: DeviceTreeSnapshot) {
        *self.tree.lock().unwrap() = tree;
    }

    pub fn update_tree(&self, f: impl FnOnce(&mut DeviceTreeSnapshot)) {
        f(&mut self.tree.lock().unwrap());
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    /// The next fetch blocks after it starts until the gate is released.
    pub fn hold_next_fetch(&self) -> Arc<FetchGate> {
        let gate = Arc::new(FetchGate::default());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    fn auth_result<T>(&self, value: T) -> Result<T> {
        if self.fail_auth.load(Ordering::SeqCst) {
            Err(Error::Auth(AuthFailure::Vendor("rejected".into())))
        } else {
            Ok(value)
        }
    }
}

fn pair(tag: &str) -> TokenPair {
    TokenPair {
        access_token: format!("access-{tag}"),
        refresh_token: format!("refresh-{tag}"),
    }
}

#[async_trait]
impl VendorClient for FakeVendor {
    async fn login(&self, _username: &str, _password: &str) -> Result<TokenPair> {
        self.record("login");
        self.auth_result(pair("login"))
    }

    async fn get_user_id(&self, _access_token: &str) -> Result<u64> {
        self.record("user");
        self.auth_result(7)
    }

    async fn get_authorization_code(&self) -> Result<String> {
        self.record("code");
        self.auth_result("code-1".to_string())
    }

    async fn exchange_code(&self, _code: &str) -> Result<TokenPair> {
        self.record("exchange");
        self.auth_result(pair("exchanged"))
    }

    async fn refresh_token(&self, _refresh_token: &str) -> Result<TokenPair> {
        self.record("refresh");
        self.auth_result(pair("refreshed"))
    }

    async fn fetch_tree(&self, _access_token: &str, _user_id: u64) -> Result<DeviceTreeSnapshot> {
        self.record("fetch");
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Error::Fetch("bad HTTP status 401".into()));
        }
        Ok(self.tree.lock().unwrap().clone())
    }

    async fn set_target_temperature(
        &self,
        _access_token: &str,
        room: RoomRef,
        temp: Temperature,
    ) -> Result<()> {
        self.record("set");
        if self.fail_set.load(Ordering::SeqCst) {
            return Err(Error::Set("bad HTTP status 500".into()));
        }
        self.setpoints.lock().unwrap().push((room, temp));
        Ok(())
    }
}

pub fn device(id: u64, name: &str, energy: i64) -> Device {
    Device {
        id: DeviceId(id),
        name: name.to_string(),
        online: true,
        power_usage: PowerUsage {
            energy,
            ..Default::default()
        },
    }
}

/// One user, one home; a living room with two heaters and a bathroom with one.
pub fn heater_tree() -> DeviceTreeSnapshot {
    DeviceTreeSnapshot {
        users: vec![User {
            id: 7,
            status: "active".into(),
            homes: vec![Home {
                id: 100,
                name: "Cabin".into(),
                rooms: vec![
                    Room {
                        id: 200,
                        name: "Living room".into(),
                        heating_enabled: true,
                        temperature: 2150,
                        target_temperature: 2200,
                        devices: vec![device(40, "Window heater", 12345), device(41, "Wall heater", 500)],
                    },
                    Room {
                        id: 201,
                        name: "Bath".into(),
                        heating_enabled: true,
                        temperature: 2300,
                        target_temperature: 2400,
                        devices: vec![device(42, "Bath heater", 0)],
                    },
                ],
            }],
        }],
    }
}

pub struct Harness {
    pub adapter: Adapter,
    pub vendor: Arc<FakeVendor>,
    pub outbound: UnboundedReceiver<Outbound>,
    pub dir: TempDir,
}

impl Harness {
    /// Adapter with stored credentials for user 7.
    pub fn configured() -> Self {
        Self::build(|c| {
            c.credentials.user_id = Some(7);
            c.credentials.access_token = "stored-access".into();
            c.credentials.refresh_token = "stored-refresh".into();
        })
    }

    pub fn unconfigured() -> Self {
        Self::build(|_| {})
    }

    pub fn build(setup: impl FnOnce(&mut Config)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = Config::new(dir.path());
        setup(&mut config);
        config.save().unwrap();

        let vendor = FakeVendor::with_tree(heater_tree());
        let (transport, outbound) = ChannelTransport::new();
        let adapter = Adapter::builder()
            .config(config)
            .vendor(vendor.clone())
            .transport(Arc::new(transport))
            .build()
            .unwrap();
        Self {
            adapter,
            vendor,
            outbound,
            dir,
        }
    }

    /// Fetch once so commands have a tree to resolve against, and discard
    /// the resulting reports.
    pub async fn synced() -> Self {
        let mut h = Self::configured();
        h.adapter.supervisor().refresh(false).await.unwrap();
        h.drain();
        h
    }

    pub async fn send(&self, msg: InboundMessage) {
        self.adapter.router().handle(msg).await;
    }

    pub fn drain(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(msg) = self.outbound.try_recv() {
            out.push(msg);
        }
        out
    }

    pub fn config_on_disk(&self) -> Config {
        Config::load(self.dir.path()).unwrap()
    }
}

pub fn device_cmd(service: &str, address: &str, payload: FimpMessage) -> InboundMessage {
    InboundMessage::new(
        &format!("pt:j1/mt:cmd/rt:dev/rn:glamox/ad:1/sv:{service}/ad:{address}"),
        payload,
    )
    .unwrap()
}

pub fn adapter_cmd(payload: FimpMessage) -> InboundMessage {
    InboundMessage::new("pt:j1/mt:cmd/rt:ad/rn:glamox/ad:1", payload).unwrap()
}

pub fn of_type<'a>(out: &'a [Outbound], msg_type: &str) -> Vec<&'a Outbound> {
    out.iter().filter(|o| o.payload.msg_type == msg_type).collect()
}
