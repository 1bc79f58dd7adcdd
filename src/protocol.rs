use std::collections::BTreeMap;
use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{Error, Result};

pub const SERVICE_NAME: &str = "glamox";
pub const ADAPTER_ADDRESS: &str = "1";

pub const SERVICE_THERMOSTAT: &str = "thermostat";
pub const SERVICE_SENSOR_TEMP: &str = "sensor_temp";
pub const SERVICE_METER_ELEC: &str = "meter_elec";

pub type Props = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Cmd,
    Evt,
}

impl MsgType {
    fn as_str(&self) -> &'static str {
        match self {
            MsgType::Cmd => "cmd",
            MsgType::Evt => "evt",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Device,
    Adapter,
}

impl ResourceType {
    fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Device => "dev",
            ResourceType::Adapter => "ad",
        }
    }
}

/// A FIMP topic, e.g. `pt:j1/mt:evt/rt:dev/rn:glamox/ad:1/sv:thermostat/ad:40`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub msg_type: MsgType,
    pub resource_type: ResourceType,
    pub resource_name: String,
    pub resource_address: String,
    pub service_name: Option<String>,
    pub service_address: Option<String>,
}

impl Address {
    /// Default event address of the adapter itself.
    pub fn adapter_event() -> Self {
        Self {
            msg_type: MsgType::Evt,
            resource_type: ResourceType::Adapter,
            resource_name: SERVICE_NAME.to_string(),
            resource_address: ADAPTER_ADDRESS.to_string(),
            service_name: None,
            service_address: None,
        }
    }

    /// Event address of one device service.
    pub fn device_event(service: &str, device_address: &str) -> Self {
        Self {
            msg_type: MsgType::Evt,
            resource_type: ResourceType::Device,
            resource_name: SERVICE_NAME.to_string(),
            resource_address: ADAPTER_ADDRESS.to_string(),
            service_name: Some(service.to_string()),
            service_address: Some(device_address.to_string()),
        }
    }

    pub fn to_topic(&self) -> String {
        let mut topic = format!(
            "pt:j1/mt:{}/rt:{}/rn:{}/ad:{}",
            self.msg_type.as_str(),
            self.resource_type.as_str(),
            self.resource_name,
            self.resource_address
        );
        if let Some(service) = &self.service_name {
            topic.push_str(&format!("/sv:{service}"));
            if let Some(addr) = &self.service_address {
                topic.push_str(&format!("/ad:{addr}"));
            }
        }
        topic
    }

    pub fn from_topic(topic: &str) -> Result<Self> {
        let invalid = || Error::validation(format!("malformed topic: {topic}"));
        let mut parts = topic.trim_matches('/').split('/');

        if parts.next() != Some("pt:j1") {
            return Err(invalid());
        }
        let msg_type = match parts.next().and_then(|p| p.strip_prefix("mt:")) {
            Some("cmd") => MsgType::Cmd,
            Some("evt") => MsgType::Evt,
            _ => return Err(invalid()),
        };
        let resource_type = match parts.next().and_then(|p| p.strip_prefix("rt:")) {
            Some("dev") => ResourceType::Device,
            Some("ad") => ResourceType::Adapter,
            _ => return Err(invalid()),
        };
        let resource_name = parts
            .next()
            .and_then(|p| p.strip_prefix("rn:"))
            .ok_or_else(invalid)?
            .to_string();
        let resource_address = parts
            .next()
            .and_then(|p| p.strip_prefix("ad:"))
            .ok_or_else(invalid)?
            .to_string();
        let service_name = parts
            .next()
            .map(|p| p.strip_prefix("sv:").ok_or_else(invalid))
            .transpose()?
            .map(str::to_string);
        let service_address = parts
            .next()
            .map(|p| p.strip_prefix("ad:").ok_or_else(invalid))
            .transpose()?
            .map(str::to_string);

        Ok(Self {
            msg_type,
            resource_type,
            resource_name,
            resource_address,
            service_name,
            service_address,
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_topic())
    }
}

/// Topics the transport has to subscribe to for the router to see commands.
pub fn command_subscriptions() -> [String; 2] {
    [
        format!("pt:j1/mt:cmd/rt:dev/rn:{SERVICE_NAME}/ad:{ADAPTER_ADDRESS}/#"),
        format!("pt:j1/mt:cmd/rt:ad/rn:{SERVICE_NAME}/ad:{ADAPTER_ADDRESS}"),
    ]
}

/// FIMP message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FimpMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub serv: String,
    pub val_t: String,
    #[serde(default)]
    pub val: Value,
    #[serde(default)]
    pub props: Option<Props>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub ctime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resp_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
}

impl FimpMessage {
    pub fn new(msg_type: &str, service: &str, val_t: &str, val: Value) -> Self {
        Self {
            msg_type: msg_type.to_string(),
            serv: service.to_string(),
            val_t: val_t.to_string(),
            val,
            props: None,
            tags: None,
            uid: Uuid::new_v4().to_string(),
            ctime: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, false),
            corid: None,
            resp_to: None,
            src: None,
        }
    }

    pub fn null(msg_type: &str, service: &str) -> Self {
        Self::new(msg_type, service, "null", Value::Null)
    }

    pub fn string(msg_type: &str, service: &str, value: &str) -> Self {
        Self::new(msg_type, service, "string", json!(value))
    }

    pub fn float(msg_type: &str, service: &str, value: f64) -> Self {
        Self::new(msg_type, service, "float", json!(value))
    }

    pub fn str_map(msg_type: &str, service: &str, value: Props) -> Self {
        Self::new(msg_type, service, "str_map", json!(value))
    }

    pub fn object<T: Serialize>(msg_type: &str, service: &str, value: &T) -> Result<Self> {
        Ok(Self::new(msg_type, service, "object", serde_json::to_value(value)?))
    }

    pub fn with_props(mut self, props: Props) -> Self {
        self.props = Some(props);
        self
    }

    pub fn with_unit(self, unit: &str) -> Self {
        self.with_props(Props::from([("unit".to_string(), unit.to_string())]))
    }

    /// Correlate this message with the request it answers.
    pub fn in_reply_to(mut self, request: &FimpMessage) -> Self {
        self.corid = Some(request.uid.clone());
        self
    }

    /// The topic a requester asked answers to go to, if any.
    pub fn response_topic(&self) -> Option<&str> {
        self.resp_to.as_deref().filter(|t| !t.is_empty())
    }

    pub fn string_value(&self) -> Result<String> {
        self.val
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::validation(format!("{}: expected string value", self.msg_type)))
    }

    pub fn str_map_value(&self) -> Result<Props> {
        serde_json::from_value(self.val.clone())
            .map_err(|e| Error::validation(format!("{}: expected str_map value: {e}", self.msg_type)))
    }

    pub fn object_value<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.val.clone())
            .map_err(|e| Error::validation(format!("{}: expected object value: {e}", self.msg_type)))
    }
}

/// A message received from the broker.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub address: Address,
    pub payload: FimpMessage,
}

impl InboundMessage {
    pub fn new(topic: &str, payload: FimpMessage) -> Result<Self> {
        Ok(Self {
            address: Address::from_topic(topic)?,
            payload,
        })
    }

    pub fn parse(topic: &str, body: &[u8]) -> Result<Self> {
        let payload: FimpMessage = serde_json::from_slice(body)
            .map_err(|e| Error::validation(format!("undecodable payload on {topic}: {e}")))?;
        Self::new(topic, payload)
    }
}
