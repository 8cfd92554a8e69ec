//! Shared data model: `Attack`, `Credential`, and `Session` records.
//!
//! These are the three entities every emulator persists to the record
//! store, with a protocol-specific `payload` carried as a JSON object. An
//! `Attack` owns its `Credential` and `Session` rows; deletion cascades at
//! the storage layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The three protocols the emulators impersonate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Ssh,
    Http,
    Ftp,
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Service::Ssh => "ssh",
            Service::Http => "http",
            Service::Ftp => "ftp",
        };
        write!(f, "{s}")
    }
}

/// One record per meaningful attacker interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attack {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub ip: String,
    pub service: Service,
    pub threat_type: Option<String>,
    pub confidence: Option<f32>,
    pub country: Option<String>,
    pub asn: Option<i64>,
    pub payload: serde_json::Value,
}

/// The subset of `Attack` fields a caller supplies; `id` and `timestamp`
/// are assigned by the store if absent.
#[derive(Debug, Clone)]
pub struct NewAttack {
    pub ip: String,
    pub service: Service,
    pub threat_type: Option<String>,
    pub confidence: Option<f32>,
    pub country: Option<String>,
    pub asn: Option<i64>,
    pub payload: serde_json::Value,
}

impl NewAttack {
    pub fn new(ip: impl Into<String>, service: Service, payload: serde_json::Value) -> Self {
        Self {
            ip: ip.into(),
            service,
            threat_type: None,
            confidence: None,
            country: None,
            asn: None,
            payload,
        }
    }

    pub fn with_threat_type(mut self, threat_type: impl Into<String>) -> Self {
        self.threat_type = Some(threat_type.into());
        self
    }
}

/// One record per username/password attempt. Stored verbatim, unhashed:
/// capture fidelity is the point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: Uuid,
    pub attack_id: Uuid,
    pub username: String,
    pub password: String,
    pub success: bool,
}

/// One record per command issued within a `Session`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCommand {
    pub cmd: String,
    pub timestamp: DateTime<Utc>,
}

/// One record per shell/control-channel lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub attack_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub commands: Vec<SessionCommand>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_display_matches_wire_labels() {
        assert_eq!(Service::Ssh.to_string(), "ssh");
        assert_eq!(Service::Http.to_string(), "http");
        assert_eq!(Service::Ftp.to_string(), "ftp");
    }

    #[test]
    fn new_attack_builder_sets_threat_type() {
        let attack = NewAttack::new("203.0.113.4", Service::Http, serde_json::json!({}))
            .with_threat_type("sql_injection");
        assert_eq!(attack.threat_type.as_deref(), Some("sql_injection"));
        assert!(attack.confidence.is_none());
    }
}
