use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Highest setpoint the heaters accept, in Celsius.
pub const MAX_SETPOINT_C: f64 = 35.0;

/// Lowest setpoint accepted from the hub, in Celsius.
pub const MIN_SETPOINT_C: f64 = 0.0;

/// Temperature stored as Celsius internally.
/// The vendor transfers integers in hundredths of a degree; the hub gets
/// two-decimal Celsius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Temperature(f64);

impl Temperature {
    pub fn from_celsius(c: f64) -> Self {
        Self(c)
    }

    pub fn from_hundredths(h: i64) -> Self {
        Self(h as f64 / 100.0)
    }

    pub fn celsius(&self) -> f64 {
        self.0
    }

    pub fn hundredths(&self) -> i64 {
        (self.0 * 100.0).round() as i64
    }

    /// Clamp to [`MAX_SETPOINT_C`].
    pub fn clamp_setpoint(self) -> Self {
        if self.0 >= MAX_SETPOINT_C {
            Self(MAX_SETPOINT_C)
        } else {
            self
        }
    }

    /// Two-decimal representation used on the wire and for change detection.
    pub fn to_protocol_string(&self) -> String {
        format!("{:.2}", self.0)
    }

    pub fn to_protocol_value(&self) -> f64 {
        (self.0 * 100.0).round() / 100.0
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}\u{00b0}C", self.0)
    }
}

/// Cumulative energy in watt-hours, reported to the hub as kWh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Energy(i64);

impl Energy {
    pub fn from_watt_hours(wh: i64) -> Self {
        Self(wh)
    }

    pub fn watt_hours(&self) -> i64 {
        self.0
    }

    pub fn kwh(&self) -> f64 {
        self.0 as f64 / 1000.0
    }

    pub fn to_protocol_string(&self) -> String {
        format!("{:.3}", self.kwh())
    }

    pub fn to_protocol_value(&self) -> f64 {
        (self.kwh() * 1000.0).round() / 1000.0
    }
}

impl fmt::Display for Energy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3} kWh", self.kwh())
    }
}

/// Vendor device id. Also used as the FIMP service address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeviceId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(DeviceId)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceTreeSnapshot {
    pub users: Vec<User>,
}

impl DeviceTreeSnapshot {
    /// Every device with its home and room, in home → room → device order.
    pub fn devices(&self) -> impl Iterator<Item = (&Home, &Room, &Device)> {
        self.users
            .iter()
            .flat_map(|user| user.homes.iter())
            .flat_map(|home| home.rooms.iter().map(move |room| (home, room)))
            .flat_map(|(home, room)| room.devices.iter().map(move |device| (home, room, device)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: u64,
    pub status: String,
    pub homes: Vec<Home>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Home {
    pub id: u64,
    pub name: String,
    pub rooms: Vec<Room>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Room {
    pub id: u64,
    pub name: String,
    pub heating_enabled: bool,
    /// Hundredths of a degree Celsius.
    pub temperature: i64,
    /// Hundredths of a degree Celsius.
    pub target_temperature: i64,
    pub devices: Vec<Device>,
}

impl Room {
    pub fn temperature(&self) -> Temperature {
        Temperature::from_hundredths(self.temperature)
    }

    pub fn setpoint(&self) -> Temperature {
        Temperature::from_hundredths(self.target_temperature)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub online: bool,
    pub power_usage: PowerUsage,
}

impl Device {
    pub fn energy(&self) -> Energy {
        Energy::from_watt_hours(self.power_usage.energy)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PowerUsage {
    pub time_from: i64,
    pub time_to: i64,
    /// Watt-hours accumulated over the window.
    pub energy: i64,
}

/// Tokens and identity for one installation.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
    pub code: String,
    #[serde(rename = "user")]
    pub user_id: Option<u64>,
}

impl Credentials {
    pub fn is_configured(&self) -> bool {
        self.user_id.is_some()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redact(s: &str) -> &'static str {
            if s.is_empty() { "<empty>" } else { "<redacted>" }
        }
        f.debug_struct("Credentials")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("code", &redact(&self.code))
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Token pair returned by the vendor's token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Events emitted by the differ when a facet changes.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    TemperatureChanged { device_id: DeviceId, temp: Temperature },
    SetpointChanged { device_id: DeviceId, temp: Temperature },
    EnergyChanged { device_id: DeviceId, energy: Energy },
}

impl ChangeEvent {
    pub fn device_id(&self) -> DeviceId {
        match self {
            ChangeEvent::TemperatureChanged { device_id, .. }
            | ChangeEvent::SetpointChanged { device_id, .. }
            | ChangeEvent::EnergyChanged { device_id, .. } => *device_id,
        }
    }
}
