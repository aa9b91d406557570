//! Identifiers and small value types shared across xcvrd.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::module_sm::ModuleState;
use crate::port_sm::PortState;

/// Stable identity of a physical module slot (0-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransceiverId(pub u32);

impl fmt::Display for TransceiverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<TransceiverId> for usize {
    fn from(id: TransceiverId) -> usize {
        id.0 as usize
    }
}

/// Logical switch port identity, as known by the link-state source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortId(pub u32);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tri-state module presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModulePresence {
    Present,
    NotPresent,
    Unknown,
}

impl From<bool> for ModulePresence {
    fn from(present: bool) -> Self {
        if present {
            ModulePresence::Present
        } else {
            ModulePresence::NotPresent
        }
    }
}

/// Register protocol dialect spoken by a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ManagementInterfaceType {
    Cmis,
    Sff8636,
    Sff8472,
    Unknown,
}

impl ManagementInterfaceType {
    /// Returns the interface name for logs and state dumps.
    pub fn as_str(&self) -> &'static str {
        match self {
            ManagementInterfaceType::Cmis => "CMIS",
            ManagementInterfaceType::Sff8636 => "SFF8636",
            ManagementInterfaceType::Sff8472 => "SFF8472",
            ManagementInterfaceType::Unknown => "UNKNOWN",
        }
    }

    /// Returns true for interfaces xcvrd can drive.
    pub fn is_known(&self) -> bool {
        !matches!(self, ManagementInterfaceType::Unknown)
    }
}

impl fmt::Display for ManagementInterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Port speed a module can be customized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortSpeed {
    #[serde(rename = "10G")]
    Gbps10,
    #[serde(rename = "25G")]
    Gbps25,
    #[serde(rename = "40G")]
    Gbps40,
    #[serde(rename = "50G")]
    Gbps50,
    #[serde(rename = "100G")]
    Gbps100,
    #[serde(rename = "200G")]
    Gbps200,
    #[serde(rename = "400G")]
    Gbps400,
}

impl PortSpeed {
    /// Returns the speed in Mb/s.
    pub fn mbps(&self) -> u32 {
        match self {
            PortSpeed::Gbps10 => 10_000,
            PortSpeed::Gbps25 => 25_000,
            PortSpeed::Gbps40 => 40_000,
            PortSpeed::Gbps50 => 50_000,
            PortSpeed::Gbps100 => 100_000,
            PortSpeed::Gbps200 => 200_000,
            PortSpeed::Gbps400 => 400_000,
        }
    }
}

/// Address of a register window: page select plus byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegisterAddr {
    pub page: u8,
    pub offset: u8,
}

impl RegisterAddr {
    /// Address in the lower (un-paged) memory.
    pub const fn lower(offset: u8) -> Self {
        Self { page: 0, offset }
    }

    /// Address in an upper page.
    pub const fn paged(page: u8, offset: u8) -> Self {
        Self { page, offset }
    }
}

impl fmt::Display for RegisterAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page {:#04x} offset {}", self.page, self.offset)
    }
}

/// Port status as synced from the link-state source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStatus {
    /// Module serving the port, if mapped
    pub transceiver: Option<TransceiverId>,
    /// Operational link state
    pub up: bool,
    /// Administrative state
    pub enabled: bool,
}

impl PortStatus {
    /// Creates an enabled port status for a module.
    pub fn new(transceiver: TransceiverId, up: bool) -> Self {
        Self {
            transceiver: Some(transceiver),
            up,
            enabled: true,
        }
    }
}

/// Externally visible snapshot of one module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransceiverInfo {
    pub id: TransceiverId,
    pub presence: ModulePresence,
    pub interface: ManagementInterfaceType,
    pub state: ModuleState,
    pub port_states: Vec<PortState>,
    /// Module case temperature in degrees Celsius
    pub temperature_c: Option<f64>,
    /// Supply voltage in volts
    pub vcc_v: Option<f64>,
    pub vendor: Option<String>,
    pub last_refresh: Option<DateTime<Utc>>,
    pub checksum_valid: bool,
}

impl TransceiverInfo {
    /// Info for a slot with no module instance. `presence` is the slot's
    /// last probe result.
    pub fn without_instance(id: TransceiverId, presence: ModulePresence) -> Self {
        Self {
            id,
            presence,
            interface: ManagementInterfaceType::Unknown,
            state: ModuleState::NotPresent,
            port_states: Vec::new(),
            temperature_c: None,
            vcc_v: None,
            vendor: None,
            last_refresh: None,
            checksum_valid: false,
        }
    }
}

/// Result of a register read for one module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadResponse {
    pub data: Vec<u8>,
    pub valid: bool,
}

impl ReadResponse {
    /// Marker for a module that could not be read.
    pub fn invalid() -> Self {
        Self::default()
    }
}

/// Result of a register write for one module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResponse {
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transceiver_id_as_slot() {
        assert_eq!(usize::from(TransceiverId(7)), 7);
        assert_eq!(TransceiverId(3).to_string(), "3");
    }

    #[test]
    fn test_interface_names() {
        assert_eq!(ManagementInterfaceType::Cmis.to_string(), "CMIS");
        assert!(ManagementInterfaceType::Sff8472.is_known());
        assert!(!ManagementInterfaceType::Unknown.is_known());
    }

    #[test]
    fn test_presence_from_bool() {
        assert_eq!(ModulePresence::from(true), ModulePresence::Present);
        assert_eq!(ModulePresence::from(false), ModulePresence::NotPresent);
    }

    #[test]
    fn test_instanceless_info_serializes() {
        let info = TransceiverInfo::without_instance(TransceiverId(4), ModulePresence::Present);
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["id"], 4);
        assert_eq!(json["presence"], "Present");
        assert_eq!(json["interface"], "Unknown");
        assert_eq!(json["state"], "NotPresent");
        assert_eq!(json["port_states"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_port_speed_serde() {
        let speed: PortSpeed = serde_json::from_str("\"100G\"").unwrap();
        assert_eq!(speed, PortSpeed::Gbps100);
        assert_eq!(speed.mbps(), 100_000);
    }
}
