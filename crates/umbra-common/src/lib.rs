//! Shared data model, error taxonomy, configuration, and record store
//! contract for the deception server's three protocol emulators.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod store;

pub use error::UmbraError;
pub use lifecycle::{Emulator, Health};
pub use model::{Attack, Credential, NewAttack, Service, Session, SessionCommand};
pub use store::{InMemoryStore, PgRecordStore, RecordStore};
