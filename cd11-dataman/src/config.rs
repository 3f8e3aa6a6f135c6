//! Data manager and per-station configuration.
//!
//! Station configuration is read-only to the receiver and is usually loaded from JSON:
//!
//! ```json
//! {
//!   "connman_port": 8041,
//!   "data_consumer_address": "10.0.0.5",
//!   "gap_state_dir": "/var/lib/dataman/gaps",
//!   "stations": [
//!     { "name": "LBTB", "port": 8100, "channels": { "LBTB.BHZ.00": "LBTB.LBTB.BHZ" } }
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{DataManError, Result};

/// How the connection manager is named in configuration errors.
pub const CONNMAN_NAME: &str = "connman";

fn default_bind_address() -> String {
    "0.0.0.0".to_owned()
}

fn default_creator() -> String {
    "DATAMAN".to_owned()
}

fn default_heartbeat_secs() -> u64 {
    120
}

fn default_acknack_secs() -> u64 {
    55
}

fn default_gap_persist_secs() -> u64 {
    300
}

fn default_consumer_address() -> Ipv4Addr {
    Ipv4Addr::LOCALHOST
}

fn default_responder_type() -> String {
    "IDC".to_owned()
}

fn default_true() -> bool {
    true
}

fn default_station_type() -> String {
    "IMS".to_owned()
}

fn default_service_type() -> String {
    "TCP".to_owned()
}

fn default_destination() -> String {
    "0".to_owned()
}

/// Protocol version a station speaks.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: i16,
    pub minor: i16,
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self { major: 1, minor: 1 }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct StationConfig {
    pub name: String,
    /// Port the data manager listens on for this station.
    pub port: u16,
    /// Stations that are not acquired get no listener.
    #[serde(default = "default_true")]
    pub acquired: bool,
    #[serde(default = "default_station_type")]
    pub station_type: String,
    #[serde(default = "default_service_type")]
    pub service_type: String,
    #[serde(default)]
    pub protocol: ProtocolVersion,
    /// Destination written in outbound frame headers.
    #[serde(default = "default_destination")]
    pub frame_destination: String,
    /// `SITE.CHAN.LOC` from the channel string to the configured channel name.
    #[serde(default)]
    pub channels: HashMap<String, String>,
}

impl StationConfig {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
            acquired: true,
            station_type: default_station_type(),
            service_type: default_service_type(),
            protocol: ProtocolVersion::default(),
            frame_destination: default_destination(),
            channels: HashMap::new(),
        }
    }

    pub fn with_channel(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.channels.insert(id.into(), name.into());
        self
    }

    pub fn channel_name(&self, id: &str) -> Option<&str> {
        self.channels.get(id).map(String::as_str)
    }
}

/// Configuration for [`DataManager`](crate::DataManager).
#[derive(Clone, Debug, Deserialize)]
pub struct DataManConfig {
    /// Interface the station listeners bind to. Default: `"0.0.0.0"`.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Creator written in outbound frame headers. Default: `"DATAMAN"`.
    #[serde(default = "default_creator")]
    pub frame_creator: String,
    /// A station silent for this long is sent an ALERT and disconnected. Default: 120.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Interval between outbound ACKNACK frames. Default: 55.
    #[serde(default = "default_acknack_secs")]
    pub acknack_interval_secs: u64,
    /// Directory holding one gap state file per station. Default: none, gap state is
    /// kept in memory only.
    #[serde(default)]
    pub gap_state_dir: Option<PathBuf>,
    /// Interval between gap state writes while a station is connected. Default: 300.
    #[serde(default = "default_gap_persist_secs")]
    pub gap_persist_secs: u64,
    /// Port for the connection manager listener. Default: none, no connection manager.
    #[serde(default)]
    pub connman_port: Option<u16>,
    /// Address stations are redirected to in connection responses. Default: `127.0.0.1`.
    #[serde(default = "default_consumer_address")]
    pub data_consumer_address: Ipv4Addr,
    /// Responder type written in connection responses. Default: `"IDC"`.
    #[serde(default = "default_responder_type")]
    pub responder_type: String,
    /// Stations whose connection requests are not answered.
    #[serde(default)]
    pub ignored_stations: Vec<String>,
    #[serde(default)]
    pub stations: Vec<StationConfig>,
}

impl Default for DataManConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            frame_creator: default_creator(),
            heartbeat_secs: default_heartbeat_secs(),
            acknack_interval_secs: default_acknack_secs(),
            gap_state_dir: None,
            gap_persist_secs: default_gap_persist_secs(),
            connman_port: None,
            data_consumer_address: default_consumer_address(),
            responder_type: default_responder_type(),
            ignored_stations: Vec::new(),
            stations: Vec::new(),
        }
    }
}

impl DataManConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject two acquired stations, or a station and the connection manager, sharing a
    /// port. Port 0 asks the OS for a free port and never clashes.
    pub fn validate(&self) -> Result<()> {
        let mut ports: HashMap<u16, &str> = HashMap::new();
        if let Some(port) = self.connman_port.filter(|&p| p != 0) {
            ports.insert(port, CONNMAN_NAME);
        }
        for station in self.acquired().filter(|s| s.port != 0) {
            if let Some(first) = ports.insert(station.port, &station.name) {
                return Err(DataManError::DuplicatePort {
                    port: station.port,
                    first: first.to_owned(),
                    second: station.name.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn acquired(&self) -> impl Iterator<Item = &StationConfig> {
        self.stations.iter().filter(|s| s.acquired)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn acknack_interval(&self) -> Duration {
        Duration::from_secs(self.acknack_interval_secs)
    }

    pub fn gap_persist_interval(&self) -> Duration {
        Duration::from_secs(self.gap_persist_secs)
    }
}
