//! The `RecordStore` contract: durable append of `Attack`, `Credential`,
//! and `Session` records, safe under any number of concurrent callers.

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgRecordStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::UmbraError;
use crate::model::{NewAttack, Session};

/// Durable, concurrency-safe persistence for the three honeypot entities.
///
/// Implementations serialize writes at the record level: any number of
/// concurrent handlers may call any operation, and appends to the same
/// `Session.commands` are linearizable without the caller taking any lock.
/// No operation may block a handler longer than a single write transaction.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Assigns an id and timestamp if absent, then persists the attack.
    async fn insert_attack(&self, attack: NewAttack) -> Result<Uuid, UmbraError>;

    /// Persists a credential attempt tied to `attack_id`. Implementations
    /// surface an unknown `attack_id` as `UmbraError::StoreUnavailable`,
    /// since from the handler's point of view both are "the write did not
    /// happen" and are handled identically (logged and dropped).
    async fn insert_credential(
        &self,
        attack_id: Uuid,
        username: String,
        password: String,
        success: bool,
    ) -> Result<Uuid, UmbraError>;

    /// Opens a session with `start_time = now` and an empty command log.
    async fn open_session(&self, attack_id: Uuid) -> Result<Uuid, UmbraError>;

    /// Appends one command to the session's ordered command log. A no-op
    /// (the command is dropped) once the session has been closed.
    async fn append_command(&self, session_id: Uuid, cmd: String) -> Result<(), UmbraError>;

    /// Seals the session. Idempotent: the first `end_time` wins, later
    /// calls are a no-op.
    async fn close_session(&self, session_id: Uuid, end_time: DateTime<Utc>) -> Result<(), UmbraError>;

    /// Reads back a session with its commands in order. Used by tests and
    /// by handlers that need to confirm session state; not part of the
    /// minimal four-operation contract but required to make round-trips
    /// observable.
    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>, UmbraError>;
}
