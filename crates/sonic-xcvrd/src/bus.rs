//! Capabilities xcvrd consumes from the platform.
//!
//! - [`TransceiverBus`]: the shared low-speed management bus
//! - [`ProtocolDecoder`]: register bytes to semantic telemetry
//! - [`PortTopology`]: which switch ports a module slot serves

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::{BusError, Result};
use crate::telemetry::{DecodedTelemetry, RawTelemetry};
use crate::types::{ManagementInterfaceType, PortId, RegisterAddr, TransceiverId};

/// Shared low-speed bus (I2C/MDIO) to the module slots.
///
/// Every call is a suspension point and may fail for one module without
/// affecting the others. Only `verify_bus_healthy` speaks for the bus as a
/// whole.
#[async_trait]
pub trait TransceiverBus: Send + Sync {
    /// Returns whether a module is plugged into slot `id`.
    async fn detect_presence(&self, id: TransceiverId) -> std::result::Result<bool, BusError>;

    /// Reads `len` bytes starting at `addr`.
    async fn read_register(
        &self,
        id: TransceiverId,
        addr: RegisterAddr,
        len: usize,
    ) -> std::result::Result<Vec<u8>, BusError>;

    /// Writes `data` starting at `addr`.
    async fn write_register(
        &self,
        id: TransceiverId,
        addr: RegisterAddr,
        data: &[u8],
    ) -> std::result::Result<(), BusError>;

    /// Returns false if the bus itself cannot be used this cycle.
    async fn verify_bus_healthy(&self) -> std::result::Result<bool, BusError>;

    /// Pulses the module's reset line.
    async fn hard_reset(&self, id: TransceiverId) -> std::result::Result<(), BusError>;
}

/// Turns raw register bytes into semantic telemetry.
pub trait ProtocolDecoder: Send + Sync {
    /// Maps the SFF-8024 identifier byte to a management interface.
    fn interface_type(&self, identifier: u8) -> ManagementInterfaceType;

    /// Decodes one refresh worth of registers.
    fn decode(
        &self,
        interface: ManagementInterfaceType,
        raw: &RawTelemetry,
    ) -> Result<DecodedTelemetry>;
}

/// Static chassis mapping between switch ports and module slots.
#[cfg_attr(test, mockall::automock)]
pub trait PortTopology: Send + Sync {
    /// Ports served by a module, in lane order. Empty if unmapped.
    fn ports_for_module(&self, id: TransceiverId) -> Vec<PortId>;

    /// Module serving a port.
    fn module_for_port(&self, port: PortId) -> Option<TransceiverId>;
}

/// Port entry of a [`StaticTopology`].
#[derive(Debug, Clone, PartialEq, Eq)]
struct PortMapping {
    name: String,
    transceiver: TransceiverId,
}

/// Topology built from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticTopology {
    ports: BTreeMap<PortId, PortMapping>,
}

impl StaticTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or remaps) a port.
    pub fn with_port(
        mut self,
        port: PortId,
        name: impl Into<String>,
        transceiver: TransceiverId,
    ) -> Self {
        self.ports.insert(
            port,
            PortMapping {
                name: name.into(),
                transceiver,
            },
        );
        self
    }

    pub fn port_name(&self, port: PortId) -> Option<&str> {
        self.ports.get(&port).map(|m| m.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

impl PortTopology for StaticTopology {
    fn ports_for_module(&self, id: TransceiverId) -> Vec<PortId> {
        self.ports
            .iter()
            .filter(|(_, m)| m.transceiver == id)
            .map(|(port, _)| *port)
            .collect()
    }

    fn module_for_port(&self, port: PortId) -> Option<TransceiverId> {
        self.ports.get(&port).map(|m| m.transceiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_static_topology_lane_order() {
        let topo = StaticTopology::new()
            .with_port(PortId(9), "Ethernet9", TransceiverId(1))
            .with_port(PortId(8), "Ethernet8", TransceiverId(1))
            .with_port(PortId(0), "Ethernet0", TransceiverId(0));

        assert_eq!(topo.ports_for_module(TransceiverId(1)), vec![PortId(8), PortId(9)]);
        assert_eq!(topo.module_for_port(PortId(0)), Some(TransceiverId(0)));
        assert_eq!(topo.module_for_port(PortId(5)), None);
        assert_eq!(topo.port_name(PortId(9)), Some("Ethernet9"));
        assert!(topo.ports_for_module(TransceiverId(7)).is_empty());
    }

    #[test]
    fn test_remap_port() {
        let topo = StaticTopology::new()
            .with_port(PortId(1), "Ethernet1", TransceiverId(0))
            .with_port(PortId(1), "Ethernet1", TransceiverId(2));
        assert_eq!(topo.len(), 1);
        assert_eq!(topo.module_for_port(PortId(1)), Some(TransceiverId(2)));
    }
}
