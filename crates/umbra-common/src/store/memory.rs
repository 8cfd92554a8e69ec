//! In-memory `RecordStore`, used by unit tests so protocol state machines
//! are testable without a live Postgres instance.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::UmbraError;
use crate::model::{Attack, Credential, NewAttack, Session, SessionCommand};

use super::RecordStore;

#[derive(Default)]
struct Tables {
    attacks: HashMap<Uuid, Attack>,
    credentials: HashMap<Uuid, Credential>,
    sessions: HashMap<Uuid, Session>,
}

/// A `RecordStore` backed by a single `Mutex<Tables>`. Not meant for
/// production use (no durability, no sharding); it exists purely for test
/// fixtures and exercises the same linearizability guarantees the
/// Postgres-backed store provides.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every attack recorded so far, for test assertions.
    pub async fn attacks_snapshot(&self) -> Vec<Attack> {
        self.tables.lock().await.attacks.values().cloned().collect()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn insert_attack(&self, attack: NewAttack) -> Result<Uuid, UmbraError> {
        let id = Uuid::new_v4();
        let record = Attack {
            id,
            timestamp: Utc::now(),
            ip: attack.ip,
            service: attack.service,
            threat_type: attack.threat_type,
            confidence: attack.confidence,
            country: attack.country,
            asn: attack.asn,
            payload: attack.payload,
        };
        self.tables.lock().await.attacks.insert(id, record);
        Ok(id)
    }

    async fn insert_credential(
        &self,
        attack_id: Uuid,
        username: String,
        password: String,
        success: bool,
    ) -> Result<Uuid, UmbraError> {
        let mut tables = self.tables.lock().await;
        if !tables.attacks.contains_key(&attack_id) {
            return Err(UmbraError::store_unavailable(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "attack_id not found",
            )));
        }
        let id = Uuid::new_v4();
        tables.credentials.insert(
            id,
            Credential {
                id,
                attack_id,
                username,
                password,
                success,
            },
        );
        Ok(id)
    }

    async fn open_session(&self, attack_id: Uuid) -> Result<Uuid, UmbraError> {
        let id = Uuid::new_v4();
        let session = Session {
            id,
            attack_id,
            start_time: Utc::now(),
            end_time: None,
            commands: Vec::new(),
        };
        self.tables.lock().await.sessions.insert(id, session);
        Ok(id)
    }

    async fn append_command(&self, session_id: Uuid, cmd: String) -> Result<(), UmbraError> {
        let mut tables = self.tables.lock().await;
        if let Some(session) = tables.sessions.get_mut(&session_id) {
            if session.end_time.is_none() {
                session.commands.push(SessionCommand {
                    cmd,
                    timestamp: Utc::now(),
                });
            }
        }
        Ok(())
    }

    async fn close_session(&self, session_id: Uuid, end_time: DateTime<Utc>) -> Result<(), UmbraError> {
        let mut tables = self.tables.lock().await;
        if let Some(session) = tables.sessions.get_mut(&session_id) {
            if session.end_time.is_none() {
                session.end_time = Some(end_time);
            }
        }
        Ok(())
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>, UmbraError> {
        Ok(self.tables.lock().await.sessions.get(&session_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Service;

    #[tokio::test]
    async fn credential_requires_existing_attack() {
        let store = InMemoryStore::new();
        let result = store
            .insert_credential(Uuid::new_v4(), "root".into(), "toor".into(), true)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn session_round_trip_preserves_command_order() {
        let store = InMemoryStore::new();
        let attack_id = store
            .insert_attack(NewAttack::new("10.0.0.1", Service::Ssh, serde_json::json!({})))
            .await
            .unwrap();
        let session_id = store.open_session(attack_id).await.unwrap();

        store.append_command(session_id, "whoami".into()).await.unwrap();
        store.append_command(session_id, "exit".into()).await.unwrap();
        store.close_session(session_id, Utc::now()).await.unwrap();

        let session = store.get_session(session_id).await.unwrap().unwrap();
        assert_eq!(session.commands.len(), 2);
        assert_eq!(session.commands[0].cmd, "whoami");
        assert_eq!(session.commands[1].cmd, "exit");
        assert!(session.end_time.is_some());
    }

    #[tokio::test]
    async fn append_after_close_is_dropped() {
        let store = InMemoryStore::new();
        let attack_id = store
            .insert_attack(NewAttack::new("10.0.0.1", Service::Ssh, serde_json::json!({})))
            .await
            .unwrap();
        let session_id = store.open_session(attack_id).await.unwrap();
        store.close_session(session_id, Utc::now()).await.unwrap();
        store.append_command(session_id, "late command".into()).await.unwrap();

        let session = store.get_session(session_id).await.unwrap().unwrap();
        assert!(session.commands.is_empty());
    }

    #[tokio::test]
    async fn second_close_session_is_noop_first_end_time_wins() {
        let store = InMemoryStore::new();
        let attack_id = store
            .insert_attack(NewAttack::new("10.0.0.1", Service::Ssh, serde_json::json!({})))
            .await
            .unwrap();
        let session_id = store.open_session(attack_id).await.unwrap();

        let first = Utc::now();
        store.close_session(session_id, first).await.unwrap();
        let later = first + chrono::Duration::seconds(60);
        store.close_session(session_id, later).await.unwrap();

        let session = store.get_session(session_id).await.unwrap().unwrap();
        assert_eq!(session.end_time.unwrap(), first);
    }
}
