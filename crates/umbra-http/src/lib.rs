//! HTTP emulator: a fake CMS front end that logs every request through a
//! single classification-and-persistence pipeline before dispatching.

mod middleware;
mod routes;
mod templates;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::{Mutex, Notify};

use umbra_common::config::HttpConfig;
use umbra_common::{Emulator, Health, RecordStore, UmbraError};
use umbra_pattern_matcher::PatternMatcher;

pub struct AppState {
    store: Arc<dyn RecordStore>,
    matcher: PatternMatcher,
    fake_cms: String,
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(routes::home))
        .route("/index.php", get(routes::home))
        .route("/index.html", get(routes::home))
        .route("/wp-login.php", get(routes::wp_login_get).post(routes::wp_login_post))
        .route("/wp-admin", get(routes::wp_admin_redirect))
        .route("/wp-admin/", get(routes::wp_admin_redirect))
        .route("/xmlrpc.php", post(routes::xmlrpc))
        .route("/robots.txt", get(routes::robots))
        .route("/.env", get(routes::env_probe))
        .route("/config.php", get(routes::config_probe))
        .fallback(routes::catchall)
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::log_and_record))
        .with_state(state)
}

pub struct HttpEmulator {
    config: HttpConfig,
    store: Arc<dyn RecordStore>,
    running: AtomicBool,
    shutdown: Arc<Notify>,
    accept_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl HttpEmulator {
    pub fn new(config: HttpConfig, store: Arc<dyn RecordStore>) -> Self {
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
impl Emulator for HttpEmulator {
    async fn start(&self) -> Result<(), UmbraError> {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("http_honeypot_already_running");
            return Ok(());
        }

        tracing::info!(host = %self.config.host, port = self.config.port, fake_cms = %self.config.fake_cms, "http_honeypot_starting");

        let state = Arc::new(AppState {
            store: self.store.clone(),
            matcher: PatternMatcher::new(),
            fake_cms: self.config.fake_cms.clone(),
        });
        let app = build_router(state).into_make_service_with_connect_info::<SocketAddr>();

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| UmbraError::fatal(format!("failed to bind HTTP listener on {addr}: {e}")))?;

        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                shutdown.notified().await;
            });
            if let Err(err) = server.await {
                tracing::error!(?err, "http_honeypot_accept_loop_failed");
            }
        });

        *self.accept_task.lock().await = Some(task);
        tracing::info!(host = %self.config.host, port = self.config.port, "http_honeypot_started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), UmbraError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            tracing::warn!("http_honeypot_not_running");
            return Ok(());
        }
        tracing::info!("http_honeypot_stopping");
        self.shutdown.notify_waiters();
        if let Some(task) = self.accept_task.lock().await.take() {
            let _ = task.await;
        }
        tracing::info!("http_honeypot_stopped");
        Ok(())
    }

    fn health(&self) -> Health {
        Health {
            service: "http_honeypot",
            running: self.running.load(Ordering::SeqCst),
            host: self.config.host.clone(),
            port: self.config.port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;
    use umbra_common::InMemoryStore;

    fn test_state() -> Arc<AppState> {
        test_state_with_store().0
    }

    fn test_state_with_store() -> (Arc<AppState>, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::default());
        let state = Arc::new(AppState {
            store: store.clone(),
            matcher: PatternMatcher::new(),
            fake_cms: "WordPress 5.8".to_string(),
        });
        (state, store)
    }

    fn test_app() -> Router {
        build_router(test_state())
    }

    async fn send(app: Router, req: Request<Body>) -> axum::response::Response {
        app.oneshot(req).await.unwrap()
    }

    fn get_req(path: &str) -> Request<Body> {
        let mut req = Request::builder().uri(path).body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(axum::extract::ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4242))));
        req
    }

    #[tokio::test]
    async fn home_page_serves_configured_cms_and_identity_headers() {
        let response = send(test_app(), get_req("/")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("Server").unwrap(), "Apache/2.4.41 (Ubuntu)");
    }

    #[tokio::test]
    async fn unknown_path_returns_404() {
        let response = send(test_app(), get_req("/this-does-not-exist")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn wp_admin_redirects_to_login() {
        let response = send(test_app(), get_req("/wp-admin")).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers().get("location").unwrap().to_str().unwrap();
        assert_eq!(location, "/wp-login.php?redirect_to=/wp-admin/");
    }

    #[tokio::test]
    async fn wp_login_post_records_credential_attempt() {
        let state = test_state();
        let app = build_router(state.clone());
        let mut request = Request::builder()
            .method("POST")
            .uri("/wp-login.php")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from("log=admin&pwd=hunter2"))
            .unwrap();
        request
            .extensions_mut()
            .insert(axum::extract::ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4242))));
        let response = send(app, request).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn oversized_post_body_is_truncated_not_dropped() {
        let (state, store) = test_state_with_store();
        let app = build_router(state);
        let mut body = "' OR '1'='1 -- ".to_string();
        body.push_str(&"a".repeat(2 * 1024 * 1024));
        let mut request = Request::builder()
            .method("POST")
            .uri("/comment")
            .header("content-type", "text/plain")
            .body(Body::from(body))
            .unwrap();
        request
            .extensions_mut()
            .insert(axum::extract::ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4242))));
        let response = send(app, request).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let attacks = store.attacks_snapshot().await;
        assert_eq!(attacks.len(), 1);
        assert_eq!(attacks[0].threat_type.as_deref(), Some("sql_injection"));
        let body_field = attacks[0].payload.get("body").and_then(|v| v.as_str());
        assert!(body_field.is_some_and(|b| b.starts_with("' OR '1'='1")));
    }

    #[tokio::test]
    async fn env_probe_returns_plaintext_secrets() {
        let response = send(test_app(), get_req("/.env")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("content-type").unwrap(), "text/plain");
    }
}
