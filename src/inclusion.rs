use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Value, json};

use crate::protocol::{
    ADAPTER_ADDRESS, SERVICE_METER_ELEC, SERVICE_NAME, SERVICE_SENSOR_TEMP, SERVICE_THERMOSTAT,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Interface {
    #[serde(rename = "intf_t")]
    pub direction: &'static str,
    #[serde(rename = "msg_t")]
    pub msg_type: &'static str,
    #[serde(rename = "val_t")]
    pub value_type: &'static str,
    #[serde(rename = "ver")]
    pub version: &'static str,
}

const fn input(msg_type: &'static str, value_type: &'static str) -> Interface {
    Interface {
        direction: "in",
        msg_type,
        value_type,
        version: "1",
    }
}

const fn output(msg_type: &'static str, value_type: &'static str) -> Interface {
    Interface {
        direction: "out",
        msg_type,
        value_type,
        version: "1",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Service {
    pub name: String,
    pub alias: String,
    pub address: String,
    pub enabled: bool,
    pub groups: Vec<String>,
    pub props: BTreeMap<String, Value>,
    pub interfaces: Vec<Interface>,
}

impl Service {
    fn new(name: &str, alias: &str, device_address: &str) -> Self {
        Self {
            name: name.to_string(),
            alias: alias.to_string(),
            address: format!("/rt:dev/rn:{SERVICE_NAME}/ad:{ADAPTER_ADDRESS}/sv:{name}/ad:{device_address}"),
            enabled: true,
            groups: vec!["ch_0".to_string()],
            props: BTreeMap::new(),
            interfaces: Vec::new(),
        }
    }
}

/// `evt.thing.inclusion_report` payload announcing one heater to the hub.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InclusionReport {
    pub address: String,
    #[serde(rename = "type")]
    pub thing_type: String,
    pub product_hash: String,
    #[serde(rename = "comm_tech")]
    pub comm_technology: String,
    pub product_name: String,
    pub manufacturer_id: String,
    pub device_id: String,
    #[serde(rename = "hw_ver")]
    pub hw_version: String,
    #[serde(rename = "sw_ver")]
    pub sw_version: String,
    pub power_source: String,
    #[serde(rename = "wakeup_interval")]
    pub wake_up_interval: String,
    pub groups: Vec<String>,
    pub services: Vec<Service>,
}

impl InclusionReport {
    pub fn for_heater(address: &str, name: &str) -> Self {
        let mut thermostat = Service::new(SERVICE_THERMOSTAT, "thermostat", address);
        thermostat.props.insert("sup_modes".into(), json!(["heat"]));
        thermostat.props.insert("sup_setpoints".into(), json!(["heat"]));
        thermostat.interfaces = vec![
            input("cmd.setpoint.set", "str_map"),
            output("evt.setpoint.report", "str_map"),
            input("cmd.setpoint.get_report", "null"),
            input("cmd.mode.set", "string"),
            input("cmd.mode.get_report", "null"),
            output("evt.mode.report", "string"),
        ];

        let mut sensor = Service::new(SERVICE_SENSOR_TEMP, "Temperature sensor", address);
        sensor.props.insert("sup_units".into(), json!(["C"]));
        sensor.interfaces = vec![
            input("cmd.sensor.get_report", "null"),
            output("evt.sensor.report", "float"),
        ];

        let mut meter = Service::new(SERVICE_METER_ELEC, "Meter Elec", address);
        meter.props.insert("sup_units".into(), json!(["kWh"]));
        meter.interfaces = vec![
            input("cmd.meter.get_report", "null"),
            output("evt.meter.report", "float"),
        ];

        Self {
            address: address.to_string(),
            thing_type: String::new(),
            product_hash: SERVICE_NAME.to_string(),
            comm_technology: "wifi".to_string(),
            product_name: name.to_string(),
            manufacturer_id: SERVICE_NAME.to_string(),
            device_id: address.to_string(),
            hw_version: "1".to_string(),
            sw_version: "1".to_string(),
            power_source: "ac".to_string(),
            wake_up_interval: "-1".to_string(),
            groups: vec!["ch_0".to_string()],
            services: vec![thermostat, sensor, meter],
        }
    }
}

/// `evt.thing.exclusion_report` payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExclusionReport {
    pub address: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heater_report_lists_three_services() {
        let report = InclusionReport::for_heater("40", "Living room heater");
        let names: Vec<&str> = report.services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["thermostat", "sensor_temp", "meter_elec"]);
        assert_eq!(
            report.services[0].address,
            "/rt:dev/rn:glamox/ad:1/sv:thermostat/ad:40"
        );
    }

    #[test]
    fn wire_field_names() {
        let wire = serde_json::to_value(InclusionReport::for_heater("40", "Heater")).unwrap();
        assert_eq!(wire["address"], "40");
        assert_eq!(wire["product_name"], "Heater");
        assert_eq!(wire["comm_tech"], "wifi");
        assert_eq!(wire["services"][1]["interfaces"][1]["msg_t"], "evt.sensor.report");
        assert_eq!(wire["services"][1]["interfaces"][1]["intf_t"], "out");
        assert_eq!(wire["services"][2]["props"]["sup_units"][0], "kWh");
    }
}
