//! Per-connection SSH handler: password capture and the fake shell state
//! machine described by the deception contract's command mode.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, ChannelMsg, CryptoVec};
use uuid::Uuid;

use umbra_common::model::{NewAttack, Service};
use umbra_common::RecordStore;

use crate::commands;

const MOTD: &str = "\r\n\
Welcome to Ubuntu 20.04.3 LTS (GNU/Linux 5.4.0-89-generic x86_64)\r\n\
\r\n\
 * Documentation:  https://help.ubuntu.com\r\n\
 * Management:     https://landscape.canonical.com\r\n\
 * Support:        https://ubuntu.com/advantage\r\n\
\r\n\
Last login: Mon Dec  2 14:23:45 2024 from 192.168.1.1\r\n";

const PROMPT: &str = "root@honeypot:~# ";

fn write(session: &mut Session, channel: ChannelId, data: impl AsRef<[u8]>) {
    session.data(channel, CryptoVec::from_slice(data.as_ref()));
}

/// One connection's worth of state. A fresh `SshHandler` is created per
/// accepted connection by `SshServer::new_client`.
pub struct SshHandler {
    pub(crate) store: Arc<dyn RecordStore>,
    pub(crate) peer: Option<SocketAddr>,
    pub(crate) attack_id: Option<Uuid>,
    pub(crate) session_id: Option<Uuid>,
    pub(crate) current_cmd: String,
}

impl SshHandler {
    fn client_ip(&self) -> String {
        self.peer.map(|a| a.ip().to_string()).unwrap_or_else(|| "unknown".to_string())
    }
}

#[async_trait]
impl Handler for SshHandler {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        let ip = self.client_ip();
        tracing::warn!(client_ip = %ip, username = user, "ssh_credential_captured");

        let payload = serde_json::json!({
            "username": user,
            "password_length": password.len(),
        });
        let new_attack = NewAttack::new(ip.clone(), Service::Ssh, payload)
            .with_threat_type("credential_attack");

        match self.store.insert_attack(new_attack).await {
            Ok(attack_id) => {
                self.attack_id = Some(attack_id);
                if let Err(err) = self
                    .store
                    .insert_credential(attack_id, user.to_string(), password.to_string(), true)
                    .await
                {
                    tracing::warn!(?err, "ssh_credential_record_failed");
                }
            }
            Err(err) => {
                tracing::warn!(?err, "ssh_attack_record_failed");
            }
        }

        // Always let the attacker in; the deception relies on it.
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        if let Some(attack_id) = self.attack_id {
            match self.store.open_session(attack_id).await {
                Ok(session_id) => {
                    self.session_id = Some(session_id);
                    let store = self.store.clone();
                    tokio::spawn(async move {
                        wait_for_close_and_seal(channel, store, session_id).await;
                    });
                }
                Err(err) => {
                    tracing::warn!(?err, "ssh_session_create_failed");
                }
            }
        }
        Ok(true)
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut Session) -> Result<(), Self::Error> {
        write(session, channel, MOTD);
        write(session, channel, PROMPT);
        Ok(())
    }

    async fn data(&mut self, channel: ChannelId, data: &[u8], session: &mut Session) -> Result<(), Self::Error> {
        if data.first() == Some(&4) {
            write(session, channel, "\r\nlogout\r\nConnection to host closed.\r\n");
            self.seal_session().await;
            return Err(russh::Error::Disconnect);
        }

        if data.first() == Some(&127) || data.first() == Some(&8) {
            if !self.current_cmd.is_empty() {
                self.current_cmd.pop();
                write(session, channel, [8u8, 32u8, 8u8]);
            }
            return Ok(());
        }

        if data == [3] {
            self.current_cmd.clear();
            write(session, channel, "^C\r\n");
            write(session, channel, PROMPT);
            return Ok(());
        }

        let Ok(chunk) = std::str::from_utf8(data) else {
            return Ok(());
        };

        if chunk == "\r" || chunk == "\n" {
            let cmd = self.current_cmd.trim().to_string();
            write(session, channel, "\r\n");

            if !cmd.is_empty() {
                if let Some(session_id) = self.session_id {
                    if let Err(err) = self.store.append_command(session_id, cmd.clone()).await {
                        tracing::debug!(?err, "ssh_command_record_failed");
                    }
                }

                if commands::is_exit(&cmd) {
                    write(session, channel, "logout\r\n");
                    self.seal_session().await;
                    return Err(russh::Error::Disconnect);
                }

                let response = commands::respond(&cmd);
                if !response.is_empty() {
                    write(session, channel, response);
                    write(session, channel, "\r\n");
                }
            }

            self.current_cmd.clear();
            write(session, channel, PROMPT);
        } else {
            self.current_cmd.push_str(chunk);
            write(session, channel, chunk);
        }

        Ok(())
    }
}

impl SshHandler {
    async fn seal_session(&self) {
        if let Some(session_id) = self.session_id {
            if let Err(err) = self.store.close_session(session_id, Utc::now()).await {
                tracing::debug!(?err, "ssh_session_close_failed");
            }
        }
    }
}

/// Waits for the channel to close (the attacker exits without sending an
/// explicit `exit`/logout line, e.g. closing the TCP connection directly)
/// and seals the session's `end_time` exactly once either way.
async fn wait_for_close_and_seal(mut channel: Channel<Msg>, store: Arc<dyn RecordStore>, session_id: Uuid) {
    while let Some(msg) = channel.wait().await {
        if matches!(msg, ChannelMsg::Close | ChannelMsg::Failure) {
            break;
        }
    }
    if let Err(err) = store.close_session(session_id, Utc::now()).await {
        tracing::debug!(?err, "ssh_session_close_failed");
    }
}
