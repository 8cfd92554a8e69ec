//! Shared error taxonomy for the deception server.
//!
//! Every fallible operation in the emulators and the record store returns
//! `UmbraError`, never a raw `std::io::Error` or `sqlx::Error`. Handler code
//! is written against this vocabulary so the containment policy ("no
//! handler error may crash the accept loop") can be enforced by matching on
//! four known kinds instead of an open set of library errors.

use thiserror::Error;

/// The four error kinds that bubble through the core.
#[derive(Debug, Error)]
pub enum UmbraError {
    /// Read/write errors, resets, timeouts. Logged at debug/info; the
    /// connection is closed; nothing propagates further.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Malformed line or unexpected command sequence. The peer receives a
    /// protocol-appropriate error response; the connection may continue.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The record store could not complete an operation. Logged at error;
    /// the handler keeps serving the peer without the missed record.
    #[error("record store unavailable: {0}")]
    StoreUnavailable(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Bind failure or host-key failure at startup. Surfaced to the driver;
    /// the offending emulator refuses to start.
    #[error("fatal startup error: {0}")]
    Fatal(String),
}

impl UmbraError {
    pub fn transient(msg: impl Into<String>) -> Self {
        UmbraError::TransientNetwork(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        UmbraError::ProtocolViolation(msg.into())
    }

    pub fn store_unavailable(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        UmbraError::StoreUnavailable(Box::new(err))
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        UmbraError::Fatal(msg.into())
    }

    /// Whether this error kind permits the connection to continue serving
    /// the peer (store and protocol-violation errors do; network and fatal
    /// errors do not).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            UmbraError::StoreUnavailable(_) | UmbraError::ProtocolViolation(_)
        )
    }
}

impl From<std::io::Error> for UmbraError {
    fn from(err: std::io::Error) -> Self {
        UmbraError::TransientNetwork(err.to_string())
    }
}

impl From<sqlx::Error> for UmbraError {
    fn from(err: sqlx::Error) -> Self {
        UmbraError::StoreUnavailable(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_network_is_not_recoverable() {
        let err = UmbraError::transient("connection reset");
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn store_unavailable_is_recoverable() {
        let err = UmbraError::store_unavailable(sqlx::Error::PoolClosed);
        assert!(err.is_recoverable());
    }

    #[test]
    fn protocol_violation_is_recoverable() {
        let err = UmbraError::protocol("unexpected command sequence");
        assert!(err.is_recoverable());
    }

    #[test]
    fn fatal_is_not_recoverable() {
        let err = UmbraError::fatal("bind failed");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn io_error_converts_to_transient() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: UmbraError = io_err.into();
        assert!(matches!(err, UmbraError::TransientNetwork(_)));
    }
}
