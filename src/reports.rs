//! Outbound FIMP messages built from the device model.

use serde::Serialize;
use serde_json::json;

use crate::Result;
use crate::inclusion::{ExclusionReport, InclusionReport};
use crate::protocol::{
    Address, FimpMessage, Props, SERVICE_METER_ELEC, SERVICE_NAME, SERVICE_SENSOR_TEMP,
    SERVICE_THERMOSTAT,
};
use crate::types::{ChangeEvent, Device, DeviceId, Energy, Temperature};

pub const SETPOINT_TYPE_HEAT: &str = "heat";

pub fn sensor_report(temp: Temperature) -> FimpMessage {
    FimpMessage::float("evt.sensor.report", SERVICE_SENSOR_TEMP, temp.to_protocol_value())
        .with_unit("C")
}

pub fn setpoint_report(temp: Temperature) -> FimpMessage {
    FimpMessage::str_map(
        "evt.setpoint.report",
        SERVICE_THERMOSTAT,
        Props::from([
            ("type".to_string(), SETPOINT_TYPE_HEAT.to_string()),
            ("temp".to_string(), temp.to_protocol_string()),
            ("unit".to_string(), "C".to_string()),
        ]),
    )
}

pub fn mode_report(mode: &str) -> FimpMessage {
    FimpMessage::string("evt.mode.report", SERVICE_THERMOSTAT, mode)
}

pub fn meter_report(energy: Energy) -> FimpMessage {
    FimpMessage::float("evt.meter.report", SERVICE_METER_ELEC, energy.to_protocol_value())
        .with_unit("kWh")
}

/// The event topic and message for one detected change.
pub fn change_report(event: &ChangeEvent) -> (Address, FimpMessage) {
    let address = event.device_id().to_string();
    match event {
        ChangeEvent::TemperatureChanged { temp, .. } => (
            Address::device_event(SERVICE_SENSOR_TEMP, &address),
            sensor_report(*temp),
        ),
        ChangeEvent::SetpointChanged { temp, .. } => (
            Address::device_event(SERVICE_THERMOSTAT, &address),
            setpoint_report(*temp),
        ),
        ChangeEvent::EnergyChanged { energy, .. } => (
            Address::device_event(SERVICE_METER_ELEC, &address),
            meter_report(*energy),
        ),
    }
}

pub fn inclusion_report(device: &Device) -> Result<FimpMessage> {
    let report = InclusionReport::for_heater(&device.id.to_string(), &device.name);
    FimpMessage::object("evt.thing.inclusion_report", SERVICE_NAME, &report)
}

pub fn exclusion_report(address: &str) -> Result<FimpMessage> {
    FimpMessage::object(
        "evt.thing.exclusion_report",
        SERVICE_NAME,
        &ExclusionReport {
            address: address.to_string(),
        },
    )
}

pub fn exclusion_for(id: DeviceId) -> Result<FimpMessage> {
    exclusion_report(&id.to_string())
}

#[derive(Debug, Serialize)]
pub struct AuthStatus {
    pub status: &'static str,
    pub error_text: String,
    pub error_code: String,
}

pub fn auth_status(status: &'static str, error: Option<&str>) -> Result<FimpMessage> {
    let body = AuthStatus {
        status,
        error_text: error.unwrap_or_default().to_string(),
        error_code: if error.is_some() { "ERROR".into() } else { String::new() },
    };
    FimpMessage::object("evt.auth.status_report", SERVICE_NAME, &body)
}

/// `evt.app.config_action_report`; a `None` error means success.
pub fn config_action_report(op: &str, next: &str, error: Option<&str>) -> FimpMessage {
    let body = json!({
        "op": op,
        "op_status": if error.is_some() { "error" } else { "ok" },
        "next": next,
        "error_code": "",
        "error_text": error.unwrap_or_default(),
    });
    FimpMessage::new("evt.app.config_action_report", SERVICE_NAME, "object", body)
}

/// Acknowledgement the hub's logout flow waits for.
pub fn pd7_success() -> FimpMessage {
    FimpMessage::new(
        "evt.pd7.response",
        "vinculum",
        "object",
        json!({ "errors": null, "success": true }),
    )
}
