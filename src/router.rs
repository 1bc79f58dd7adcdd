use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::auth::TokenManager;
use crate::error::AuthFailure;
use crate::lifecycle::{AppState, AppStates, Lifecycle};
use crate::logging::LogHandle;
use crate::poll::Supervisor;
use crate::protocol::{
    Address, FimpMessage, InboundMessage, SERVICE_METER_ELEC, SERVICE_NAME, SERVICE_SENSOR_TEMP,
    SERVICE_THERMOSTAT,
};
use crate::reports::{self, SETPOINT_TYPE_HEAT};
use crate::store::Store;
use crate::transport::Publisher;
use crate::tree::DeviceTree;
use crate::types::{MIN_SETPOINT_C, Temperature};
use crate::vendor::{RoomRef, VendorClient};
use crate::{Error, Result};

#[derive(Deserialize)]
struct SetTokens {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: String,
}

/// What `cmd.config.get_extended_report` exposes. Secrets stay out.
#[derive(Serialize)]
struct ExtendedReport {
    poll_time_min: String,
    log_level: String,
    log_format: String,
    mqtt_server_uri: String,
    mqtt_client_id_prefix: String,
    user: Option<u64>,
    configured: bool,
}

#[derive(Serialize)]
struct ConfigReport {
    op_status: &'static str,
    app_state: AppStates,
}

/// Dispatches inbound commands by service, then by message type.
pub struct Router {
    store: Arc<Store>,
    tokens: Arc<TokenManager>,
    vendor: Arc<dyn VendorClient>,
    publisher: Arc<Publisher>,
    lifecycle: Arc<Lifecycle>,
    supervisor: Arc<Supervisor>,
    log_handle: Option<LogHandle>,
}

impl Router {
    pub fn new(
        store: Arc<Store>,
        tokens: Arc<TokenManager>,
        vendor: Arc<dyn VendorClient>,
        publisher: Arc<Publisher>,
        lifecycle: Arc<Lifecycle>,
        supervisor: Arc<Supervisor>,
        log_handle: Option<LogHandle>,
    ) -> Self {
        Self {
            store,
            tokens,
            vendor,
            publisher,
            lifecycle,
            supervisor,
            log_handle,
        }
    }

    /// Handle messages one at a time until the channel closes or the app
    /// terminates.
    pub async fn run(&self, mut inbound: mpsc::Receiver<InboundMessage>) {
        let mut states = self.lifecycle.subscribe();
        loop {
            tokio::select! {
                biased;
                changed = states.changed() => {
                    if changed.is_err() || self.lifecycle.app_state() == AppState::Terminated {
                        break;
                    }
                }
                msg = inbound.recv() => match msg {
                    Some(msg) => self.handle(msg).await,
                    None => break,
                },
            }
        }
        info!("command router stopped");
    }

    pub async fn handle(&self, msg: InboundMessage) {
        let topic = msg.address.to_topic();
        self.publisher.log_inbound(&topic, &msg.payload);
        debug!(%topic, msg_type = %msg.payload.msg_type, "inbound command");

        let result = match msg.payload.serv.as_str() {
            SERVICE_NAME => self.handle_adapter(&msg).await,
            SERVICE_THERMOSTAT => self.handle_thermostat(&msg).await,
            SERVICE_SENSOR_TEMP => self.handle_sensor(&msg).await,
            SERVICE_METER_ELEC => self.handle_meter(&msg).await,
            other => {
                debug!(service = other, "ignoring unknown service");
                Ok(())
            }
        };

        match result {
            Ok(()) => {}
            Err(e @ (Error::AddressNotFound(_) | Error::Validation(_))) => {
                warn!(%topic, msg_type = %msg.payload.msg_type, error = %e, "command dropped");
            }
            Err(e) => {
                error!(%topic, msg_type = %msg.payload.msg_type, error = %e, "command failed");
            }
        }
    }

    async fn handle_adapter(&self, msg: &InboundMessage) -> Result<()> {
        let req = &msg.payload;
        match req.msg_type.as_str() {
            "cmd.auth.set_tokens" => self.set_tokens(req).await,
            "cmd.auth.login" => self.login(req).await,
            "cmd.auth.logout" => self.logout(req).await,
            "cmd.system.sync" => self.sync(req).await,
            "cmd.system.reconnect" => self.reconnect(req).await,
            "cmd.config.extended_set" => self.extended_set(req).await,
            "cmd.config.get_extended_report" => self.extended_report(req).await,
            "cmd.app.get_state" => self.app_state(req).await,
            "cmd.app.factory_reset" => self.factory_reset(req).await,
            "cmd.app.uninstall" => self.uninstall().await,
            "cmd.log.set_level" => self.set_log_level(req).await,
            "cmd.thing.get_inclusion_report" => self.inclusion_report(req).await,
            "cmd.thing.delete" => self.delete_thing(req).await,
            other => {
                debug!(msg_type = other, "unsupported adapter command");
                Ok(())
            }
        }
    }

    async fn reply_adapter(&self, req: &FimpMessage, msg: FimpMessage) -> Result<()> {
        self.publisher
            .reply(req, msg, &Address::adapter_event())
            .await
    }

    async fn set_tokens(&self, req: &FimpMessage) -> Result<()> {
        let tokens: SetTokens = req.object_value()?;
        if tokens.access_token.is_empty() || tokens.refresh_token.is_empty() {
            let e = Error::Auth(AuthFailure::EmptyTokens);
            warn!(error = %e, "rejecting set_tokens");
            return self
                .reply_adapter(req, reports::auth_status("ERROR", Some(&e.to_string()))?)
                .await;
        }

        self.lifecycle.set_configuring();
        let outcome = self
            .tokens
            .authorize(&tokens.access_token, &tokens.refresh_token)
            .await;
        self.finish_authentication(req, outcome).await
    }

    async fn login(&self, req: &FimpMessage) -> Result<()> {
        let map = req.str_map_value()?;
        let (Some(username), Some(password)) = (map.get("username"), map.get("password")) else {
            return Err(Error::validation("login needs username and password"));
        };
        self.lifecycle.set_configuring();
        let outcome = self.tokens.login(username, password).await;
        self.finish_authentication(req, outcome).await
    }

    async fn finish_authentication(&self, req: &FimpMessage, outcome: Result<u64>) -> Result<()> {
        match outcome {
            Err(e) => {
                error!(error = %e, "authentication failed");
                self.lifecycle.set_not_configured();
                self.lifecycle.record_error(e.to_string());
                self.reply_adapter(req, reports::auth_status("ERROR", Some(&e.to_string()))?)
                    .await
            }
            Ok(user) => {
                info!(user, "authenticated, announcing devices");
                self.lifecycle.set_running();
                self.reply_adapter(req, reports::auth_status("AUTHENTICATED", None)?)
                    .await?;
                if let Err(e) = self.supervisor.refresh(true).await {
                    warn!(error = %e, "initial sync failed");
                    self.lifecycle.record_error(e.to_string());
                }
                Ok(())
            }
        }
    }

    async fn logout(&self, req: &FimpMessage) -> Result<()> {
        if let Err(e) = self.supervisor.reset(true).await {
            error!(error = %e, "clearing account state failed");
        }
        info!("logged out");
        self.reply_adapter(req, reports::pd7_success()).await
    }

    async fn sync(&self, req: &FimpMessage) -> Result<()> {
        let report = match self.supervisor.refresh(true).await {
            Ok(tree) => {
                info!(devices = tree.len(), "all devices synced");
                reports::config_action_report(&req.msg_type, "reload", None)
            }
            Err(e) => {
                error!(error = %e, "sync failed");
                self.lifecycle.record_error(e.to_string());
                reports::config_action_report(&req.msg_type, "reload", Some(&e.to_string()))
            }
        };
        self.reply_adapter(req, report).await
    }

    async fn reconnect(&self, req: &FimpMessage) -> Result<()> {
        if self.store.credentials().await.is_configured() {
            self.lifecycle.set_running();
        } else {
            debug!("reconnect requested without credentials");
        }
        self.reply_adapter(req, reports::config_action_report(&req.msg_type, "config", None))
            .await
    }

    async fn extended_set(&self, req: &FimpMessage) -> Result<()> {
        let Value::Object(fields) = &req.val else {
            return Err(Error::validation("extended_set needs an object"));
        };
        let poll_time = match fields.get("poll_time_min") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        if let Some(value) = poll_time {
            let applied = self
                .store
                .update_config(|c| c.set_poll_time_min(&value))
                .await?;
            if applied {
                info!(poll_time_min = %value, "poll interval updated");
                if self.lifecycle.app_state() == AppState::Error
                    && self.store.credentials().await.is_configured()
                {
                    self.lifecycle.set_running();
                }
            }
        }

        let report = ConfigReport {
            op_status: "ok",
            app_state: self.lifecycle.states(),
        };
        let msg = FimpMessage::object("evt.app.config_report", SERVICE_NAME, &report)?;
        self.reply_adapter(req, msg).await
    }

    async fn extended_report(&self, req: &FimpMessage) -> Result<()> {
        let config = self.store.config().await;
        let report = ExtendedReport {
            poll_time_min: config.poll_time_min,
            log_level: config.log_level,
            log_format: config.log_format,
            mqtt_server_uri: config.mqtt_server_uri,
            mqtt_client_id_prefix: config.mqtt_client_id_prefix,
            user: config.credentials.user_id,
            configured: config.credentials.is_configured(),
        };
        let msg = FimpMessage::object("evt.config.extended_report", SERVICE_NAME, &report)?;
        self.reply_adapter(req, msg).await
    }

    async fn app_state(&self, req: &FimpMessage) -> Result<()> {
        let msg = FimpMessage::object(
            "evt.app.manifest_report",
            SERVICE_NAME,
            &self.lifecycle.states(),
        )?;
        self.reply_adapter(req, msg).await
    }

    async fn factory_reset(&self, req: &FimpMessage) -> Result<()> {
        self.supervisor.reset(false).await?;
        info!("factory reset");
        self.reply_adapter(req, reports::config_action_report(&req.msg_type, "config", None))
            .await
    }

    async fn uninstall(&self) -> Result<()> {
        self.supervisor.exclude_all().await;
        Ok(())
    }

    async fn set_log_level(&self, req: &FimpMessage) -> Result<()> {
        let level = req.string_value()?;
        let Some(handle) = &self.log_handle else {
            warn!("no log handle installed, ignoring level change");
            return Ok(());
        };
        handle
            .set_level(&level)
            .map_err(|e| Error::validation(e.to_string()))?;
        self.store
            .update_config(|c| c.log_level = level.clone())
            .await?;
        info!(%level, "log level updated");
        Ok(())
    }

    async fn inclusion_report(&self, req: &FimpMessage) -> Result<()> {
        let address = req.string_value()?;
        let tree = self.routable_tree(&address).await?;
        let msg = reports::inclusion_report(tree.resolve(&address)?.device)?;
        self.reply_adapter(req, msg).await
    }

    async fn delete_thing(&self, req: &FimpMessage) -> Result<()> {
        let map = req.str_map_value()?;
        let address = map
            .get("address")
            .ok_or_else(|| Error::validation("thing.delete without address"))?;
        self.reply_adapter(req, reports::exclusion_report(address)?)
            .await?;
        info!(device = %address, "device removed from network");
        Ok(())
    }

    async fn routable_tree(&self, address: &str) -> Result<Arc<DeviceTree>> {
        self.store
            .routable_tree()
            .await
            .ok_or_else(|| Error::AddressNotFound(address.to_string()))
    }

    async fn handle_thermostat(&self, msg: &InboundMessage) -> Result<()> {
        let req = &msg.payload;
        let address = service_address(msg)?;
        match req.msg_type.as_str() {
            "cmd.setpoint.set" => self.set_setpoint(req, address).await,
            "cmd.setpoint.get_report" => {
                let tree = self.routable_tree(address).await?;
                let temp = tree.resolve(address)?.room.setpoint();
                self.reply_device(req, SERVICE_THERMOSTAT, address, reports::setpoint_report(temp))
                    .await
            }
            "cmd.mode.set" => {
                let mode = req.string_value()?;
                if mode != SETPOINT_TYPE_HEAT {
                    return Err(Error::validation(format!("unsupported mode {mode:?}")));
                }
                self.routable_tree(address).await?.resolve(address)?;
                self.reply_device(req, SERVICE_THERMOSTAT, address, reports::mode_report(&mode))
                    .await
            }
            "cmd.mode.get_report" => {
                self.routable_tree(address).await?.resolve(address)?;
                let msg = reports::mode_report(SETPOINT_TYPE_HEAT);
                self.reply_device(req, SERVICE_THERMOSTAT, address, msg).await
            }
            other => {
                debug!(msg_type = other, "unsupported thermostat command");
                Ok(())
            }
        }
    }

    async fn set_setpoint(&self, req: &FimpMessage, address: &str) -> Result<()> {
        let map = req.str_map_value()?;
        if let Some(kind) = map.get("type")
            && kind != SETPOINT_TYPE_HEAT
        {
            return Err(Error::validation(format!("unsupported setpoint type {kind:?}")));
        }
        let raw = map
            .get("temp")
            .ok_or_else(|| Error::validation("setpoint without temp"))?;
        let celsius: f64 = raw
            .trim()
            .parse()
            .ok()
            .filter(|c: &f64| c.is_finite())
            .ok_or_else(|| Error::validation(format!("setpoint {raw:?} is not a number")))?;
        if celsius < MIN_SETPOINT_C {
            return Err(Error::validation(format!(
                "setpoint {celsius} is below {MIN_SETPOINT_C}"
            )));
        }
        let temp = Temperature::from_celsius(celsius).clamp_setpoint();

        let tree = self.routable_tree(address).await?;
        let located = tree.resolve(address)?;
        let device_id = located.device.id;
        let room = RoomRef {
            user_id: located.user.id,
            home_id: located.home.id,
            room_id: located.room.id,
        };

        let token = self.tokens.ensure_authenticated().await?;
        self.vendor.set_target_temperature(&token, room, temp).await?;
        self.supervisor.apply_setpoint(device_id, temp).await;
        info!(device = %device_id, %temp, "setpoint applied");

        self.reply_device(req, SERVICE_THERMOSTAT, address, reports::setpoint_report(temp))
            .await
    }

    async fn handle_sensor(&self, msg: &InboundMessage) -> Result<()> {
        let req = &msg.payload;
        let address = service_address(msg)?;
        if req.msg_type != "cmd.sensor.get_report" {
            debug!(msg_type = %req.msg_type, "unsupported sensor command");
            return Ok(());
        }
        let tree = self.routable_tree(address).await?;
        let temp = tree.resolve(address)?.room.temperature();
        self.reply_device(req, SERVICE_SENSOR_TEMP, address, reports::sensor_report(temp))
            .await
    }

    async fn handle_meter(&self, msg: &InboundMessage) -> Result<()> {
        let req = &msg.payload;
        let address = service_address(msg)?;
        if req.msg_type != "cmd.meter.get_report" {
            debug!(msg_type = %req.msg_type, "unsupported meter command");
            return Ok(());
        }
        let tree = self.routable_tree(address).await?;
        let energy = tree.resolve(address)?.device.energy();
        self.reply_device(req, SERVICE_METER_ELEC, address, reports::meter_report(energy))
            .await
    }

    async fn reply_device(
        &self,
        req: &FimpMessage,
        service: &str,
        address: &str,
        msg: FimpMessage,
    ) -> Result<()> {
        self.publisher
            .reply(req, msg, &Address::device_event(service, address))
            .await
    }
}

fn service_address(msg: &InboundMessage) -> Result<&str> {
    msg.address
        .service_address
        .as_deref()
        .ok_or_else(|| Error::validation(format!("no device address in {}", msg.address)))
}
