//! Transceiver Lifecycle Daemon
//!
//! Tracks pluggable optical modules across the chassis: detects insertion and
//! removal over the shared low-speed bus, reads module identity, follows
//! per-port link activity, decides when a module may be hard-reset or
//! upgraded, and serves a per-module state snapshot to callers.
//!
//! The [`TransceiverManager`] is the single entry point. It owns one
//! [`TransceiverModule`] per occupied slot, each driving a
//! [`ModuleStateMachine`] composed with one [`PortStateMachine`] per port.
//! Hardware work fans out across modules with a bounded wait per module, so
//! one stuck device never stalls the rest.

pub mod bus;
pub mod config;
pub mod decoder;
pub mod error;
pub mod manager;
pub mod module;
pub mod module_sm;
pub mod port_sm;
pub mod remediation;
pub mod sim;
pub mod telemetry;
pub mod types;
pub mod variant;

pub use bus::{PortTopology, ProtocolDecoder, StaticTopology, TransceiverBus};
pub use config::{PortEntry, XcvrdConfig, DEFAULT_CONFIG_PATH};
pub use decoder::StandardDecoder;
pub use error::*;
pub use manager::{ManagerConfig, ManagerStats, TransceiverManager};
pub use module::TransceiverModule;
pub use module_sm::{ModuleEvent, ModuleState, ModuleStateMachine, Transition};
pub use port_sm::{PortEvent, PortState, PortStateMachine};
pub use remediation::{RemediationGuard, ResetCandidate, ResetDecision, SkipReason};
pub use sim::{SimModule, SimulatedBus};
pub use telemetry::{
    DecodedTelemetry, MediaLaneSignals, ModuleStatus, RawRegion, RawTelemetry, SignalFlags,
};
pub use types::*;
pub use variant::{ChecksumRange, CmisVariant, ModuleVariant, Sff8472Variant, Sff8636Variant};
