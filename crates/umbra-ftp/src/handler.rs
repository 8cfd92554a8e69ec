//! Per-connection FTP control-channel state machine.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use umbra_common::{NewAttack, RecordStore, Service, UmbraError};

use crate::filesystem;

struct PassiveChannel {
    data: Arc<Mutex<Option<TcpStream>>>,
    accept_task: JoinHandle<()>,
}

impl Drop for PassiveChannel {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

pub struct FtpHandlerConfig {
    pub anonymous_allowed: bool,
    pub timeout: Duration,
    /// The address advertised in PASV replies. `0.0.0.0` is rewritten to
    /// `127.0.0.1`, matching the reference implementation.
    pub advertise_host: String,
}

pub struct FtpHandler {
    store: Arc<dyn RecordStore>,
    config: FtpHandlerConfig,
    client_ip: String,
    username: Option<String>,
    password: Option<String>,
    authenticated: bool,
    current_dir: String,
    rename_from: Option<String>,
    passive: Option<PassiveChannel>,
    attack_id: Option<Uuid>,
    session_id: Option<Uuid>,
    /// Commands issued before a session exists (typically `USER`/`PASS`),
    /// flushed to the store the moment `record_attack` opens one.
    pending_commands: Vec<String>,
}

impl FtpHandler {
    pub fn new(store: Arc<dyn RecordStore>, config: FtpHandlerConfig, client_ip: String) -> Self {
        Self {
            store,
            config,
            client_ip,
            username: None,
            password: None,
            authenticated: false,
            current_dir: "/".to_string(),
            rename_from: None,
            passive: None,
            attack_id: None,
            session_id: None,
            pending_commands: Vec::new(),
        }
    }

    pub async fn run(mut self, stream: TcpStream) {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        if send(&mut write_half, 220, "Welcome to FTP server (vsFTPd 3.0.3)")
            .await
            .is_err()
        {
            return;
        }

        tracing::info!(client_ip = %self.client_ip, "ftp_connection_established");

        loop {
            let line = match tokio::time::timeout(self.config.timeout, lines.next_line()).await {
                Ok(Ok(Some(line))) => line,
                Ok(Ok(None)) => break,
                Ok(Err(_)) => break,
                Err(_) => {
                    let _ = send(&mut write_half, 421, "Timeout.").await;
                    break;
                }
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if self.process_command(line, &mut write_half).await.is_err() {
                break;
            }

            if line.eq_ignore_ascii_case("quit") {
                break;
            }
        }

        self.close_session().await;
        tracing::info!(client_ip = %self.client_ip, "ftp_connection_closed");
    }

    async fn process_command<W: AsyncWriteExt + Unpin>(
        &mut self,
        line: &str,
        out: &mut W,
    ) -> Result<(), UmbraError> {
        let mut parts = line.splitn(2, ' ');
        let cmd = parts.next().unwrap_or("").to_uppercase();
        let arg = parts.next().unwrap_or("").to_string();

        self.record_command(&cmd, &arg).await;

        match cmd.as_str() {
            "USER" => self.cmd_user(&arg, out).await,
            "PASS" => self.cmd_pass(&arg, out).await,
            "SYST" => send(out, 215, "UNIX Type: L8").await,
            "FEAT" => {
                send_multiline(out, 211, &["Features:", " UTF8", " PASV", " SIZE", " MDTM", "End"]).await
            }
            "PWD" => self.cmd_pwd(out).await,
            "CWD" => self.cmd_cwd(&arg, out).await,
            "CDUP" => self.cmd_cwd("..", out).await,
            "TYPE" => self.cmd_type(&arg, out).await,
            "PASV" => self.cmd_pasv(out).await,
            "LIST" => self.cmd_list(&arg, out).await,
            "NLST" => self.cmd_nlst(&arg, out).await,
            "RETR" => self.cmd_retr(&arg, out).await,
            "STOR" => self.cmd_stor(&arg, out).await,
            "DELE" => self.cmd_dele(&arg, out).await,
            "MKD" => self.cmd_mkd(&arg, out).await,
            "RMD" => self.cmd_rmd(&arg, out).await,
            "RNFR" => self.cmd_rnfr(&arg, out).await,
            "RNTO" => self.cmd_rnto(&arg, out).await,
            "SIZE" => self.cmd_size(&arg, out).await,
            "NOOP" => send(out, 200, "NOOP ok.").await,
            "OPTS" => {
                if arg.to_uppercase().starts_with("UTF8") {
                    send(out, 200, "UTF8 set to on").await
                } else {
                    send(out, 501, "Option not understood").await
                }
            }
            "PORT" => self.cmd_port(out).await,
            "QUIT" => send(out, 221, "Goodbye.").await,
            _ => send(out, 502, "Command not implemented.").await,
        }
    }

    async fn cmd_port<W: AsyncWriteExt + Unpin>(&mut self, out: &mut W) -> Result<(), UmbraError> {
        if !self.authenticated {
            return send(out, 530, "Please login first.").await;
        }
        send(out, 200, "PORT command successful. Use PASV instead.").await
    }

    async fn record_command(&mut self, cmd: &str, arg: &str) {
        let logged_arg = if cmd == "PASS" { "***" } else { arg };
        let formatted = format!("{cmd} {logged_arg}").trim().to_string();

        if let Some(session_id) = self.session_id {
            let _ = self.store.append_command(session_id, formatted).await;
        } else {
            // No session yet (e.g. the USER/PASS pair that triggers one).
            // Buffered and flushed by `record_attack` once it opens one.
            self.pending_commands.push(formatted);
        }
    }

    async fn flush_pending_commands(&mut self) {
        let Some(session_id) = self.session_id else {
            return;
        };
        for cmd in self.pending_commands.drain(..) {
            let _ = self.store.append_command(session_id, cmd).await;
        }
    }

    async fn cmd_user<W: AsyncWriteExt + Unpin>(&mut self, username: &str, out: &mut W) -> Result<(), UmbraError> {
        self.username = Some(username.to_string());
        self.authenticated = false;

        if username.eq_ignore_ascii_case("anonymous") && self.config.anonymous_allowed {
            self.authenticated = true;
            self.record_attack(false).await;
            send(out, 230, "Anonymous login ok, proceed.").await
        } else {
            send(out, 331, "Please specify the password.").await
        }
    }

    async fn cmd_pass<W: AsyncWriteExt + Unpin>(&mut self, password: &str, out: &mut W) -> Result<(), UmbraError> {
        self.password = Some(password.to_string());

        let Some(username) = self.username.clone() else {
            return send(out, 503, "Login with USER first.").await;
        };

        if self.attack_id.is_none() {
            self.record_attack(false).await;
        }
        if let Some(attack_id) = self.attack_id {
            if let Ok(cred_id) = self
                .store
                .insert_credential(attack_id, username.clone(), password.to_string(), true)
                .await
            {
                let _ = cred_id;
            }
        }

        self.authenticated = true;
        tracing::warn!(client_ip = %self.client_ip, username = %username, "ftp_credential_captured");
        send(out, 230, "Login successful.").await
    }

    async fn cmd_pwd<W: AsyncWriteExt + Unpin>(&mut self, out: &mut W) -> Result<(), UmbraError> {
        if !self.authenticated {
            return send(out, 530, "Please login first.").await;
        }
        send(out, 257, &format!("\"{}\" is the current directory", self.current_dir)).await
    }

    async fn cmd_cwd<W: AsyncWriteExt + Unpin>(&mut self, path: &str, out: &mut W) -> Result<(), UmbraError> {
        if !self.authenticated {
            return send(out, 530, "Please login first.").await;
        }
        let resolved = filesystem::resolve_path(&self.current_dir, path);
        if filesystem::is_known_directory(&resolved) {
            self.current_dir = resolved;
            send(out, 250, "Directory successfully changed.").await
        } else {
            send(out, 550, "Failed to change directory.").await
        }
    }

    async fn cmd_type<W: AsyncWriteExt + Unpin>(&mut self, type_code: &str, out: &mut W) -> Result<(), UmbraError> {
        let upper = type_code.to_uppercase();
        if upper == "A" || upper == "I" {
            send(out, 200, &format!("Switching to {upper} mode.")).await
        } else {
            send(out, 504, "Type not implemented.").await
        }
    }

    async fn cmd_size<W: AsyncWriteExt + Unpin>(&mut self, path: &str, out: &mut W) -> Result<(), UmbraError> {
        if !self.authenticated {
            return send(out, 530, "Please login first.").await;
        }
        let resolved = filesystem::resolve_path(&self.current_dir, path);
        let (dir, filename) = split_path(&resolved);
        match filesystem::file_size(&dir, &filename) {
            Some(size) => send(out, 213, &size.to_string()).await,
            None => send(out, 550, "Could not get file size.").await,
        }
    }

    async fn cmd_pasv<W: AsyncWriteExt + Unpin>(&mut self, out: &mut W) -> Result<(), UmbraError> {
        if !self.authenticated {
            return send(out, 530, "Please login first.").await;
        }

        let listener = match TcpListener::bind("0.0.0.0:0").await {
            Ok(l) => l,
            Err(_) => return send(out, 425, "Cannot enter passive mode.").await,
        };
        let port = listener.local_addr().map(|a| a.port()).unwrap_or(0);

        let data = Arc::new(Mutex::new(None));
        let data_clone = data.clone();
        let accept_task = tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                *data_clone.lock().await = Some(stream);
            }
        });

        // a new PASV replaces any listener still pending from a previous one
        self.passive = Some(PassiveChannel { data, accept_task });

        let host = if self.config.advertise_host == "0.0.0.0" {
            "127.0.0.1".to_string()
        } else {
            self.config.advertise_host.clone()
        };
        let ip_parts = host.replace('.', ",");
        let p1 = port / 256;
        let p2 = port % 256;
        send(out, 227, &format!("Entering Passive Mode ({ip_parts},{p1},{p2}).")).await
    }

    async fn take_data_stream(&mut self, wait: bool) -> Option<TcpStream> {
        let passive = self.passive.as_ref()?;
        let taken = passive.data.lock().await.take();
        if let Some(stream) = taken {
            self.passive = None;
            return Some(stream);
        }
        if wait {
            tokio::time::sleep(Duration::from_millis(500)).await;
            if let Some(passive) = self.passive.as_ref() {
                let taken = passive.data.lock().await.take();
                if let Some(stream) = taken {
                    self.passive = None;
                    return Some(stream);
                }
            }
        }
        None
    }

    async fn cmd_list<W: AsyncWriteExt + Unpin>(&mut self, path: &str, out: &mut W) -> Result<(), UmbraError> {
        if !self.authenticated {
            return send(out, 530, "Please login first.").await;
        }
        let Some(mut data) = self.take_data_stream(true).await else {
            return send(out, 425, "Use PASV or PORT first.").await;
        };

        send(out, 150, "Here comes the directory listing.").await?;
        let target_dir = if path.is_empty() {
            self.current_dir.clone()
        } else {
            filesystem::resolve_path(&self.current_dir, path)
        };
        for line in filesystem::generate_listing(&target_dir) {
            let _ = data.write_all(format!("{line}\r\n").as_bytes()).await;
        }
        let _ = data.shutdown().await;
        send(out, 226, "Directory send OK.").await
    }

    async fn cmd_nlst<W: AsyncWriteExt + Unpin>(&mut self, path: &str, out: &mut W) -> Result<(), UmbraError> {
        if !self.authenticated {
            return send(out, 530, "Please login first.").await;
        }
        let Some(mut data) = self.take_data_stream(true).await else {
            return send(out, 425, "Use PASV or PORT first.").await;
        };

        send(out, 150, "Here comes the directory listing.").await?;
        let target_dir = if path.is_empty() {
            self.current_dir.clone()
        } else {
            filesystem::resolve_path(&self.current_dir, path)
        };
        if let Some(entries) = filesystem::listing_for(&target_dir) {
            for entry in entries {
                if entry.name != "." && entry.name != ".." {
                    let _ = data.write_all(format!("{}\r\n", entry.name).as_bytes()).await;
                }
            }
        }
        let _ = data.shutdown().await;
        send(out, 226, "Directory send OK.").await
    }

    async fn cmd_retr<W: AsyncWriteExt + Unpin>(&mut self, path: &str, out: &mut W) -> Result<(), UmbraError> {
        if !self.authenticated {
            return send(out, 530, "Please login first.").await;
        }
        tracing::warn!(client_ip = %self.client_ip, path, "ftp_download_attempt");

        let Some(mut data) = self.take_data_stream(true).await else {
            return send(out, 425, "Use PASV or PORT first.").await;
        };

        send(out, 150, "Opening BINARY mode data connection.").await?;
        let content = filesystem::fake_file_content(path);
        let _ = data.write_all(content.as_bytes()).await;
        let _ = data.shutdown().await;
        send(out, 226, "Transfer complete.").await
    }

    async fn cmd_stor<W: AsyncWriteExt + Unpin>(&mut self, path: &str, out: &mut W) -> Result<(), UmbraError> {
        if !self.authenticated {
            return send(out, 530, "Please login first.").await;
        }
        tracing::warn!(client_ip = %self.client_ip, path, "ftp_upload_attempt");

        let Some(data) = self.take_data_stream(true).await else {
            return send(out, 425, "Use PASV or PORT first.").await;
        };

        send(out, 150, "Ok to send data.").await?;
        // Intentionally does not read from the data connection before
        // closing it; preserved from the reference implementation.
        drop(data);
        send(out, 226, "Transfer complete.").await
    }

    async fn cmd_dele<W: AsyncWriteExt + Unpin>(&mut self, path: &str, out: &mut W) -> Result<(), UmbraError> {
        if !self.authenticated {
            return send(out, 530, "Please login first.").await;
        }
        tracing::warn!(client_ip = %self.client_ip, path, "ftp_delete_attempt");
        send(out, 550, "Delete operation failed.").await
    }

    async fn cmd_mkd<W: AsyncWriteExt + Unpin>(&mut self, path: &str, out: &mut W) -> Result<(), UmbraError> {
        if !self.authenticated {
            return send(out, 530, "Please login first.").await;
        }
        tracing::warn!(client_ip = %self.client_ip, path, "ftp_mkdir_attempt");
        send(out, 257, &format!("\"{path}\" created")).await
    }

    async fn cmd_rmd<W: AsyncWriteExt + Unpin>(&mut self, path: &str, out: &mut W) -> Result<(), UmbraError> {
        if !self.authenticated {
            return send(out, 530, "Please login first.").await;
        }
        tracing::warn!(client_ip = %self.client_ip, path, "ftp_rmdir_attempt");
        send(out, 550, "Remove directory failed.").await
    }

    async fn cmd_rnfr<W: AsyncWriteExt + Unpin>(&mut self, path: &str, out: &mut W) -> Result<(), UmbraError> {
        if !self.authenticated {
            return send(out, 530, "Please login first.").await;
        }
        self.rename_from = Some(path.to_string());
        send(out, 350, "Ready for destination name").await
    }

    async fn cmd_rnto<W: AsyncWriteExt + Unpin>(&mut self, path: &str, out: &mut W) -> Result<(), UmbraError> {
        if !self.authenticated {
            return send(out, 530, "Please login first.").await;
        }
        tracing::warn!(
            client_ip = %self.client_ip,
            from = ?self.rename_from,
            to = path,
            "ftp_rename_attempt"
        );
        self.rename_from = None;
        send(out, 550, "Rename failed.").await
    }

    async fn record_attack(&mut self, _anonymous: bool) {
        let username = self.username.clone().unwrap_or_default();
        let anonymous = username.eq_ignore_ascii_case("anonymous");
        let payload = serde_json::json!({ "username": username, "anonymous": anonymous });
        let new_attack = NewAttack::new(self.client_ip.clone(), Service::Ftp, payload)
            .with_threat_type("credential_attack");

        match self.store.insert_attack(new_attack).await {
            Ok(attack_id) => {
                self.attack_id = Some(attack_id);
                if let Ok(session_id) = self.store.open_session(attack_id).await {
                    self.session_id = Some(session_id);
                    self.flush_pending_commands().await;
                }
            }
            Err(e) => tracing::error!(error = %e, "ftp_attack_record_failed"),
        }
    }

    async fn close_session(&mut self) {
        if let Some(session_id) = self.session_id {
            let _ = self.store.close_session(session_id, Utc::now()).await;
        }
    }
}

fn split_path(full_path: &str) -> (String, String) {
    match full_path.rsplit_once('/') {
        Some(("", name)) => ("/".to_string(), name.to_string()),
        Some((dir, name)) => (dir.to_string(), name.to_string()),
        None => ("/".to_string(), full_path.to_string()),
    }
}

async fn send<W: AsyncWriteExt + Unpin>(out: &mut W, code: u16, message: &str) -> Result<(), UmbraError> {
    let line = format!("{code} {message}\r\n");
    out.write_all(line.as_bytes()).await?;
    Ok(())
}

async fn send_multiline<W: AsyncWriteExt + Unpin>(
    out: &mut W,
    code: u16,
    lines: &[&str],
) -> Result<(), UmbraError> {
    for (i, line) in lines.iter().enumerate() {
        let prefix = if i == lines.len() - 1 { format!("{code} ") } else { format!("{code}-") };
        out.write_all(format!("{prefix}{line}\r\n").as_bytes()).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use umbra_common::InMemoryStore;

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let accept = listener.accept();
        let (connected, accepted) = tokio::join!(connect, accept);
        let (accepted, _) = accepted.unwrap();
        (connected.unwrap(), accepted)
    }

    fn new_handler() -> FtpHandler {
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryStore::new());
        let config = FtpHandlerConfig {
            anonymous_allowed: true,
            timeout: Duration::from_secs(30),
            advertise_host: "127.0.0.1".to_string(),
        };
        FtpHandler::new(store, config, "203.0.113.9".to_string())
    }

    async fn read_response(sock: &mut TcpStream) -> String {
        let mut buf = vec![0u8; 512];
        let n = sock.read(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf[..n]).to_string()
    }

    #[tokio::test]
    async fn pass_before_user_is_rejected() {
        let mut handler = new_handler();
        let (mut server_side, mut client_side) = loopback_pair().await;
        handler.process_command("PASS hunter2", &mut server_side).await.unwrap();
        let resp = read_response(&mut client_side).await;
        assert!(resp.starts_with("503"));
    }

    #[tokio::test]
    async fn list_without_pasv_returns_425() {
        let mut handler = new_handler();
        let (mut server_side, mut client_side) = loopback_pair().await;
        handler.process_command("USER anonymous", &mut server_side).await.unwrap();
        read_response(&mut client_side).await;
        handler.process_command("LIST", &mut server_side).await.unwrap();
        let resp = read_response(&mut client_side).await;
        assert!(resp.starts_with("425"));
    }

    #[tokio::test]
    async fn anonymous_login_then_pwd_reports_root() {
        let mut handler = new_handler();
        let (mut server_side, mut client_side) = loopback_pair().await;
        handler.process_command("USER anonymous", &mut server_side).await.unwrap();
        read_response(&mut client_side).await;
        handler.process_command("PWD", &mut server_side).await.unwrap();
        let resp = read_response(&mut client_side).await;
        assert!(resp.contains("\"/\""));
    }

    #[tokio::test]
    async fn cwd_to_unknown_directory_fails() {
        let mut handler = new_handler();
        let (mut server_side, mut client_side) = loopback_pair().await;
        handler.process_command("USER anonymous", &mut server_side).await.unwrap();
        read_response(&mut client_side).await;
        handler.process_command("CWD /nope", &mut server_side).await.unwrap();
        let resp = read_response(&mut client_side).await;
        assert!(resp.starts_with("550"));
    }

    #[tokio::test]
    async fn cwd_to_backup_succeeds() {
        let mut handler = new_handler();
        let (mut server_side, mut client_side) = loopback_pair().await;
        handler.process_command("USER anonymous", &mut server_side).await.unwrap();
        read_response(&mut client_side).await;
        handler.process_command("CWD /backup", &mut server_side).await.unwrap();
        let resp = read_response(&mut client_side).await;
        assert!(resp.starts_with("250"));
        assert_eq!(handler.current_dir, "/backup");
    }

    #[tokio::test]
    async fn credential_capture_always_succeeds() {
        let mut handler = new_handler();
        let (mut server_side, mut client_side) = loopback_pair().await;
        handler.process_command("USER root", &mut server_side).await.unwrap();
        read_response(&mut client_side).await;
        handler.process_command("PASS hunter2", &mut server_side).await.unwrap();
        let resp = read_response(&mut client_side).await;
        assert!(resp.starts_with("230"));
        assert!(handler.authenticated);
    }

    #[tokio::test]
    async fn password_login_logs_user_and_pass_in_session() {
        let mut handler = new_handler();
        let (mut server_side, mut client_side) = loopback_pair().await;
        handler.process_command("USER root", &mut server_side).await.unwrap();
        read_response(&mut client_side).await;
        handler.process_command("PASS hunter2", &mut server_side).await.unwrap();
        read_response(&mut client_side).await;

        let session_id = handler.session_id.expect("session should be open after PASS");
        let session = handler.store.get_session(session_id).await.unwrap().unwrap();
        assert_eq!(session.commands.len(), 2);
        assert_eq!(session.commands[0].cmd, "USER root");
        assert_eq!(session.commands[1].cmd, "PASS ***");
    }

    #[tokio::test]
    async fn anonymous_login_logs_user_command_in_session() {
        let mut handler = new_handler();
        let (mut server_side, mut client_side) = loopback_pair().await;
        handler.process_command("USER anonymous", &mut server_side).await.unwrap();
        read_response(&mut client_side).await;

        let session_id = handler.session_id.expect("session should be open after anonymous USER");
        let session = handler.store.get_session(session_id).await.unwrap().unwrap();
        assert_eq!(session.commands.len(), 1);
        assert_eq!(session.commands[0].cmd, "USER anonymous");
    }
}
