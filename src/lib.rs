mod adapter;
mod auth;
mod config;
mod diff;
mod error;
mod inclusion;
mod lifecycle;
mod logger;
pub mod logging;
mod poll;
mod protocol;
mod reports;
mod router;
mod store;
mod transport;
mod tree;
mod types;
mod vendor;

pub use adapter::{Adapter, AdapterBuilder, AdapterTasks};
pub use auth::TokenManager;
pub use config::{Config, MAX_POLL_TIME_MIN, parse_poll_interval};
pub use diff::diff;
pub use error::{AuthFailure, Error, Result};
pub use inclusion::{ExclusionReport, InclusionReport, Interface, Service};
pub use lifecycle::{AppState, AppStates, AuthState, ConfigState, ConnectionState, Lifecycle};
pub use logger::MessageLogMode;
pub use poll::Supervisor;
pub use protocol::{
    ADAPTER_ADDRESS, Address, FimpMessage, InboundMessage, MsgType, Props, ResourceType,
    SERVICE_METER_ELEC, SERVICE_NAME, SERVICE_SENSOR_TEMP, SERVICE_THERMOSTAT,
};
pub use router::Router;
pub use store::Store;
pub use transport::{ChannelTransport, Outbound, Publisher, Transport};
pub use tree::{DeviceTree, Located};
pub use types::*;
pub use vendor::{HttpVendorClient, HttpVendorClientBuilder, RoomRef, VendorClient, VendorProfile};
