//! Error types for xcvrd.
//!
//! Two layers:
//! - [`BusError`] is what the low-speed bus capability reports.
//! - [`XcvrError`] is the daemon taxonomy. Only [`XcvrError::BusFatal`] is
//!   allowed to fail a whole refresh cycle; everything else is confined to
//!   the module it happened on.

use crate::types::TransceiverId;
use thiserror::Error;

/// Errors reported by the bus capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// A read or write transaction on one module failed
    #[error("Bus I/O error on transceiver {id}: {message}")]
    Io { id: TransceiverId, message: String },

    /// The addressed module is not plugged in
    #[error("Transceiver {0} not present")]
    NotPresent(TransceiverId),

    /// The shared bus itself is unusable
    #[error("Bus unhealthy: {0}")]
    Unhealthy(String),

    /// A transaction did not complete in time
    #[error("Bus transaction on transceiver {0} timed out")]
    Timeout(TransceiverId),
}

impl BusError {
    /// Creates an I/O error for a module.
    pub fn io(id: TransceiverId, message: impl Into<String>) -> Self {
        BusError::Io {
            id,
            message: message.into(),
        }
    }
}

/// Transceiver daemon errors
#[derive(Error, Debug)]
pub enum XcvrError {
    /// The shared bus is unusable; not attributable to one module
    #[error("Bus fatal: {0}")]
    BusFatal(String),

    /// One module's probe, read, write or refresh failed
    #[error("Transceiver {id}: {source}")]
    ModuleIo {
        id: TransceiverId,
        #[source]
        source: BusError,
    },

    /// Request referenced an id outside of the chassis universe
    #[error("Invalid transceiver id: {0}")]
    InvalidIdentifier(TransceiverId),

    /// Module answered but its identifier is not a known interface
    #[error("Transceiver {0}: unknown management interface")]
    UnknownManagementInterface(TransceiverId),

    /// Raw register contents could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl XcvrError {
    /// Wraps a bus error that happened on one module.
    pub fn module_io(id: TransceiverId, source: BusError) -> Self {
        match source {
            BusError::Unhealthy(msg) => XcvrError::BusFatal(msg),
            source => XcvrError::ModuleIo { id, source },
        }
    }

    /// Returns true if the error must be confined to a single module.
    pub fn is_module_local(&self) -> bool {
        !matches!(
            self,
            XcvrError::BusFatal(_) | XcvrError::Configuration(_) | XcvrError::Io(_)
        )
    }
}

/// Result type for xcvrd operations
pub type Result<T> = std::result::Result<T, XcvrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = XcvrError::module_io(TransceiverId(3), BusError::io(TransceiverId(3), "nack"));
        assert_eq!(
            err.to_string(),
            "Transceiver 3: Bus I/O error on transceiver 3: nack"
        );
    }

    #[test]
    fn test_unhealthy_bus_is_fatal() {
        let err = XcvrError::module_io(TransceiverId(0), BusError::Unhealthy("no mux".into()));
        assert!(matches!(err, XcvrError::BusFatal(_)));
        assert!(!err.is_module_local());
    }

    #[test]
    fn test_module_local_classification() {
        assert!(XcvrError::InvalidIdentifier(TransceiverId(99)).is_module_local());
        assert!(XcvrError::UnknownManagementInterface(TransceiverId(1)).is_module_local());
        assert!(!XcvrError::Configuration("bad".into()).is_module_local());
    }
}
