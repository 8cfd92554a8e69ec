//! FTP emulator: a control-channel state machine with a fake filesystem
//! and passive-mode data transfers, sufficient to log LIST/RETR/STOR
//! attempts against a plausible vsFTPd-flavored server.

mod filesystem;
mod handler;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};

use umbra_common::config::FtpConfig;
use umbra_common::{Emulator, Health, RecordStore, UmbraError};

use handler::{FtpHandler, FtpHandlerConfig};

pub struct FtpEmulator {
    config: FtpConfig,
    store: Arc<dyn RecordStore>,
    running: AtomicBool,
    shutdown: Arc<Notify>,
    accept_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl FtpEmulator {
    pub fn new(config: FtpConfig, store: Arc<dyn RecordStore>) -> Self {
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
impl Emulator for FtpEmulator {
    async fn start(&self) -> Result<(), UmbraError> {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("ftp_honeypot_already_running");
            return Ok(());
        }

        tracing::info!(host = %self.config.host, port = self.config.port, "ftp_honeypot_starting");

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| UmbraError::fatal(format!("failed to bind FTP listener on {addr}: {e}")))?;

        let store = self.store.clone();
        let anonymous_allowed = self.config.anonymous_allowed;
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let advertise_host = self.config.host.clone();
        let shutdown = self.shutdown.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, peer)) = accepted else {
                            continue;
                        };
                        let store = store.clone();
                        let handler_config = FtpHandlerConfig {
                            anonymous_allowed,
                            timeout,
                            advertise_host: advertise_host.clone(),
                        };
                        tokio::spawn(async move {
                            let handler = FtpHandler::new(store, handler_config, peer.ip().to_string());
                            handler.run(stream).await;
                        });
                    }
                }
            }
        });

        *self.accept_task.lock().await = Some(task);
        tracing::info!(host = %self.config.host, port = self.config.port, "ftp_honeypot_started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), UmbraError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            tracing::warn!("ftp_honeypot_not_running");
            return Ok(());
        }
        tracing::info!("ftp_honeypot_stopping");
        self.shutdown.notify_waiters();
        if let Some(task) = self.accept_task.lock().await.take() {
            let _ = task.await;
        }
        tracing::info!("ftp_honeypot_stopped");
        Ok(())
    }

    fn health(&self) -> Health {
        Health {
            service: "ftp_honeypot",
            running: self.running.load(Ordering::SeqCst),
            host: self.config.host.clone(),
            port: self.config.port,
        }
    }
}
