//! SSH emulator: password-only authentication that always succeeds, and a
//! fake interactive shell driven by a fixed canned command table.

mod commands;
mod handler;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use russh::server::{self, Server as _};
use russh_keys::key::{KeyPair, SignatureHash};
use tokio::sync::{Mutex, Notify};

use umbra_common::config::SshConfig;
use umbra_common::{Emulator, Health, RecordStore, UmbraError};

use handler::SshHandler;

#[derive(Clone)]
struct SshServer {
    store: Arc<dyn RecordStore>,
}

impl server::Server for SshServer {
    type Handler = SshHandler;

    fn new_client(&mut self, peer_addr: Option<std::net::SocketAddr>) -> SshHandler {
        SshHandler {
            store: self.store.clone(),
            peer: peer_addr,
            attack_id: None,
            session_id: None,
            current_cmd: String::new(),
        }
    }
}

pub struct SshEmulator {
    config: SshConfig,
    store: Arc<dyn RecordStore>,
    running: AtomicBool,
    shutdown: Arc<Notify>,
    accept_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SshEmulator {
    pub fn new(config: SshConfig, store: Arc<dyn RecordStore>) -> Self {
        Self {
            config,
            store,
            running: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
            accept_task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Emulator for SshEmulator {
    async fn start(&self) -> Result<(), UmbraError> {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("ssh_honeypot_already_running");
            return Ok(());
        }

        tracing::info!(host = %self.config.host, port = self.config.port, "ssh_honeypot_starting");

        // Generated fresh each start; stable for the process lifetime is
        // all the deception contract requires.
        let host_key = KeyPair::generate_rsa(2048, SignatureHash::SHA2_256)
            .ok_or_else(|| UmbraError::fatal("failed to generate SSH host key"))?;

        let mut config = server::Config::default();
        config.keys.push(host_key);
        config.server_id = russh::SshId::Standard(format!("SSH-2.0-{}", self.config.banner));
        let config = Arc::new(config);

        let mut server = SshServer { store: self.store.clone() };
        let addr = (self.config.host.clone(), self.config.port);
        let shutdown = self.shutdown.clone();

        let task = tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.notified() => {}
                result = server.run_on_address(config, addr) => {
                    if let Err(err) = result {
                        tracing::error!(?err, "ssh_honeypot_accept_loop_failed");
                    }
                }
            }
        });

        *self.accept_task.lock().await = Some(task);
        tracing::info!(host = %self.config.host, port = self.config.port, "ssh_honeypot_started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), UmbraError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            tracing::warn!("ssh_honeypot_not_running");
            return Ok(());
        }
        tracing::info!("ssh_honeypot_stopping");
        self.shutdown.notify_waiters();
        if let Some(task) = self.accept_task.lock().await.take() {
            let _ = task.await;
        }
        tracing::info!("ssh_honeypot_stopped");
        Ok(())
    }

    fn health(&self) -> Health {
        Health {
            service: "ssh_honeypot",
            running: self.running.load(Ordering::SeqCst),
            host: self.config.host.clone(),
            port: self.config.port,
        }
    }
}
