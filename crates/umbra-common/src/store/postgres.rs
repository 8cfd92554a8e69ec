//! PostgreSQL-backed `RecordStore`.
//!
//! Every operation maps `sqlx::Error` to `UmbraError::StoreUnavailable`
//! through the `From` impl in `error.rs`, so callers never match on
//! `sqlx::Error` directly. `append_command` and `close_session` run inside
//! a transaction to keep the read-modify-write on `end_time`/`ordinal`
//! linearizable without the caller holding anything.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::UmbraError;
use crate::model::{NewAttack, Session, SessionCommand};

use super::RecordStore;

pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub async fn connect(database_url: &str, pool_size: u32) -> Result<Self, UmbraError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(pool_size)
            .connect(database_url)
            .await
            .map_err(|e| UmbraError::fatal(format!("failed to connect to record store: {e}")))?;
        Ok(Self { pool })
    }

    /// Applies the in-tree migrations. Schema migration tooling as a
    /// standalone component is out of scope; this just gets a freshly
    /// provisioned database into a usable shape.
    pub async fn migrate(&self) -> Result<(), UmbraError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| UmbraError::fatal(format!("migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn insert_attack(&self, attack: NewAttack) -> Result<Uuid, UmbraError> {
        let id = Uuid::new_v4();
        let timestamp = Utc::now();
        sqlx::query(
            "INSERT INTO attacks (id, timestamp, ip, service, threat_type, confidence, country, asn, payload)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(id)
        .bind(timestamp)
        .bind(&attack.ip)
        .bind(attack.service.to_string())
        .bind(&attack.threat_type)
        .bind(attack.confidence)
        .bind(&attack.country)
        .bind(attack.asn)
        .bind(&attack.payload)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn insert_credential(
        &self,
        attack_id: Uuid,
        username: String,
        password: String,
        success: bool,
    ) -> Result<Uuid, UmbraError> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO credentials (id, attack_id, username, password, success)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(attack_id)
        .bind(&username)
        .bind(&password)
        .bind(success)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn open_session(&self, attack_id: Uuid) -> Result<Uuid, UmbraError> {
        let id = Uuid::new_v4();
        let start_time = Utc::now();
        sqlx::query(
            "INSERT INTO sessions (id, attack_id, start_time, end_time) VALUES ($1, $2, $3, NULL)",
        )
        .bind(id)
        .bind(attack_id)
        .bind(start_time)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn append_command(&self, session_id: Uuid, cmd: String) -> Result<(), UmbraError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT end_time FROM sessions WHERE id = $1 FOR UPDATE")
            .bind(session_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            // Unknown session: nothing to append to. The caller already
            // treats append failures as log-and-drop, so this is silent.
            return Ok(());
        };

        let end_time: Option<DateTime<Utc>> = row.try_get("end_time")?;
        if end_time.is_some() {
            // Session already closed; appends after close are dropped.
            return Ok(());
        }

        let next_ordinal: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(ordinal), -1) + 1 FROM session_commands WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO session_commands (id, session_id, ordinal, cmd, ts) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(Uuid::new_v4())
        .bind(session_id)
        .bind(next_ordinal)
        .bind(&cmd)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn close_session(&self, session_id: Uuid, end_time: DateTime<Utc>) -> Result<(), UmbraError> {
        // COALESCE keeps whichever end_time was written first.
        sqlx::query("UPDATE sessions SET end_time = COALESCE(end_time, $2) WHERE id = $1")
            .bind(session_id)
            .bind(end_time)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>, UmbraError> {
        let row = sqlx::query("SELECT id, attack_id, start_time, end_time FROM sessions WHERE id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let command_rows = sqlx::query(
            "SELECT cmd, ts FROM session_commands WHERE session_id = $1 ORDER BY ordinal ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        let commands = command_rows
            .into_iter()
            .map(|r| SessionCommand {
                cmd: r.get("cmd"),
                timestamp: r.get("ts"),
            })
            .collect();

        Ok(Some(Session {
            id: row.get("id"),
            attack_id: row.get("attack_id"),
            start_time: row.get("start_time"),
            end_time: row.get("end_time"),
            commands,
        }))
    }
}
