//! Common lifecycle contract implemented by the three protocol emulators.

use async_trait::async_trait;

use crate::error::UmbraError;

/// A snapshot of an emulator's run state, used for startup/shutdown
/// logging and health reporting.
#[derive(Debug, Clone)]
pub struct Health {
    pub service: &'static str,
    pub running: bool,
    pub host: String,
    pub port: u16,
}

/// Start / stop / health, implemented identically in shape by the SSH,
/// HTTP, and FTP emulators so `umbra-server` can drive all three the same
/// way instead of three bespoke wiring paths.
#[async_trait]
pub trait Emulator: Send + Sync {
    /// Binds the listening socket and spawns the accept loop. Returns
    /// `UmbraError::Fatal` on bind failure or other startup failure that
    /// should prevent the process from proceeding.
    async fn start(&self) -> Result<(), UmbraError>;

    /// Cancels the accept loop first, then waits for in-flight handlers to
    /// finalize their sessions, honoring the configured shutdown grace.
    async fn stop(&self) -> Result<(), UmbraError>;

    fn health(&self) -> Health;
}
