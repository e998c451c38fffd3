use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::LightError;

// =============================================================================
// Device identity
// =============================================================================

/// The two lighting families this server drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceFamily {
    /// Bridge-mediated group of RGB lights (Philips Hue)
    Hue,
    /// Standalone multi-zone light panel (Nanoleaf)
    Nanoleaf,
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceFamily::Hue => f.write_str("hue"),
            DeviceFamily::Nanoleaf => f.write_str("nanoleaf"),
        }
    }
}

/// Validated IP literal of a device on the local network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddress(IpAddr);

impl DeviceAddress {
    pub fn parse(raw: &str) -> Result<Self, LightError> {
        raw.trim()
            .parse::<IpAddr>()
            .map(DeviceAddress)
            .map_err(|_| LightError::InvalidAddress(raw.to_string()))
    }

    pub fn ip(&self) -> IpAddr {
        self.0
    }

    /// `http://host:port` with IPv6 hosts bracketed
    pub fn http_base(&self, port: u16) -> String {
        format!("http://{}", SocketAddr::new(self.0, port))
    }
}

impl From<IpAddr> for DeviceAddress {
    fn from(ip: IpAddr) -> Self {
        DeviceAddress(ip)
    }
}

impl FromStr for DeviceAddress {
    type Err = LightError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceAddress::parse(s)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for DeviceAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

// =============================================================================
// DeviceSession - per-family connection capability
// =============================================================================

/// Live snapshot of a device, re-read before every command decision
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceState {
    pub is_any_on: bool,
    /// Default targets when a command names none
    pub members: BTreeSet<String>,
    /// Every id the device accepts commands for, members or not
    pub addressable: BTreeSet<String>,
}

/// Connection held for one device family.
///
/// `connect` succeeding only proves the transport works. Authorization (a
/// physical button press on the device) surfaces later as
/// `LightError::DeviceAuthError` from `current_state` or `apply_state`.
#[async_trait]
pub trait DeviceSession: Send + Sync {
    /// Family-native command produced by the color model
    type Command: fmt::Debug + Send + Sync;

    fn family(&self) -> DeviceFamily;

    async fn is_connected(&self) -> bool;

    /// Address of the last successful `connect`
    async fn address(&self) -> Option<DeviceAddress>;

    /// Replace the held connection with one to `address`
    async fn connect(&self, address: DeviceAddress) -> Result<(), LightError>;

    async fn current_state(&self) -> Result<DeviceState, LightError>;

    /// Send `command` to exactly `ids`. Families that are not individually
    /// addressable ignore `ids` and target the single unit.
    async fn apply_state(
        &self,
        ids: &BTreeSet<String>,
        command: &Self::Command,
    ) -> Result<(), LightError>;

    /// Full device status, used for post-command logging
    async fn read_back(&self) -> Result<serde_json::Value, LightError>;
}
