//! Configuration file support for xcvrd
//!
//! Loads and validates xcvrd configuration from TOML files.
//! Default location: /etc/sonic/xcvrd.conf

use crate::bus::StaticTopology;
use crate::error::{Result, XcvrError};
use crate::manager::ManagerConfig;
use crate::types::{PortId, TransceiverId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sonic/xcvrd.conf";

/// Manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerSection {
    /// Number of module slots in the chassis
    #[serde(default = "default_num_modules")]
    pub num_modules: usize,

    /// Refresh period in seconds
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Ports per module when the topology does not say
    #[serde(default = "default_ports_per_module")]
    pub ports_per_module: usize,
}

/// Timeouts and policy windows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSection {
    /// Bus health check bound in milliseconds
    #[serde(default = "default_bus_verify_timeout")]
    pub bus_verify_timeout_ms: u64,

    /// Per-module probe bound in milliseconds
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    /// Per-module refresh bound in milliseconds
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_ms: u64,

    /// Time a discovered module waits for port status in seconds
    #[serde(default = "default_agent_sync_timeout")]
    pub agent_sync_timeout_secs: u64,

    /// Time a module needs after reset in seconds
    #[serde(default = "default_post_reset_settle")]
    pub post_reset_settle_secs: u64,

    /// Remediation pause on warm start in seconds
    #[serde(default = "default_remediation_pause")]
    pub remediation_pause_secs: u64,
}

/// Static port to module mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortEntry {
    /// Logical port id
    pub id: u32,

    /// Port name, e.g. Ethernet0
    pub name: String,

    /// Module slot serving the port
    pub transceiver: u32,
}

/// Complete xcvrd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XcvrdConfig {
    /// Manager configuration
    #[serde(default)]
    pub manager: ManagerSection,

    /// Timeouts
    #[serde(default)]
    pub timeouts: TimeoutSection,

    /// Port topology
    #[serde(default)]
    pub ports: Vec<PortEntry>,
}

// Default functions
fn default_num_modules() -> usize {
    32
}

fn default_refresh_interval() -> u64 {
    10
}

fn default_ports_per_module() -> usize {
    4
}

fn default_bus_verify_timeout() -> u64 {
    2000
}

fn default_probe_timeout() -> u64 {
    1000
}

fn default_refresh_timeout() -> u64 {
    5000
}

fn default_agent_sync_timeout() -> u64 {
    120
}

fn default_post_reset_settle() -> u64 {
    2
}

fn default_remediation_pause() -> u64 {
    600
}

// Default implementations
impl Default for ManagerSection {
    fn default() -> Self {
        Self {
            num_modules: default_num_modules(),
            refresh_interval_secs: default_refresh_interval(),
            ports_per_module: default_ports_per_module(),
        }
    }
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            bus_verify_timeout_ms: default_bus_verify_timeout(),
            probe_timeout_ms: default_probe_timeout(),
            refresh_timeout_ms: default_refresh_timeout(),
            agent_sync_timeout_secs: default_agent_sync_timeout(),
            post_reset_settle_secs: default_post_reset_settle(),
            remediation_pause_secs: default_remediation_pause(),
        }
    }
}

impl XcvrdConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => {
                let config = toml::from_str(&content).map_err(|e| {
                    XcvrError::Configuration(format!(
                        "Failed to parse config file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(XcvrError::Io(e)),
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            XcvrError::Configuration(format!("Failed to serialize config: {}", e))
        })?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.manager.refresh_interval_secs)
    }

    pub fn bus_verify_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.bus_verify_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.probe_timeout_ms)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.refresh_timeout_ms)
    }

    pub fn agent_sync_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.agent_sync_timeout_secs)
    }

    pub fn post_reset_settle(&self) -> Duration {
        Duration::from_secs(self.timeouts.post_reset_settle_secs)
    }

    pub fn remediation_pause(&self) -> Duration {
        Duration::from_secs(self.timeouts.remediation_pause_secs)
    }

    /// Manager policy derived from this configuration
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            num_modules: self.manager.num_modules,
            ports_per_module: self.manager.ports_per_module,
            bus_verify_timeout: self.bus_verify_timeout(),
            probe_timeout: self.probe_timeout(),
            refresh_timeout: self.refresh_timeout(),
            agent_sync_timeout: self.agent_sync_timeout(),
            post_reset_settle: self.post_reset_settle(),
            remediation_pause: self.remediation_pause(),
        }
    }

    /// Port topology from the `[[ports]]` entries
    pub fn topology(&self) -> StaticTopology {
        self.ports.iter().fold(StaticTopology::new(), |topo, p| {
            topo.with_port(PortId(p.id), p.name.clone(), TransceiverId(p.transceiver))
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.manager.num_modules == 0 {
            return Err(XcvrError::Configuration(
                "num_modules must be > 0".to_string(),
            ));
        }

        if self.manager.refresh_interval_secs == 0 {
            return Err(XcvrError::Configuration(
                "refresh_interval_secs must be > 0".to_string(),
            ));
        }

        let t = &self.timeouts;
        for (name, value) in [
            ("bus_verify_timeout_ms", t.bus_verify_timeout_ms),
            ("probe_timeout_ms", t.probe_timeout_ms),
            ("refresh_timeout_ms", t.refresh_timeout_ms),
            ("agent_sync_timeout_secs", t.agent_sync_timeout_secs),
            ("post_reset_settle_secs", t.post_reset_settle_secs),
        ] {
            if value == 0 {
                return Err(XcvrError::Configuration(format!("{name} must be > 0")));
            }
        }

        if let Some(port) = self
            .ports
            .iter()
            .find(|p| p.transceiver as usize >= self.manager.num_modules)
        {
            return Err(XcvrError::Configuration(format!(
                "port {} maps to transceiver {} outside 0..{}",
                port.name, port.transceiver, self.manager.num_modules
            )));
        }

        Ok(())
    }
}
