//! Route handlers for the fake CMS surface. Each returns an HTML or
//! plaintext body; the identity headers are applied uniformly by the
//! logging middleware, not here.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Extension, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use serde::Deserialize;

use umbra_common::model::{NewAttack, Service};

use crate::middleware::ClientIp;
use crate::templates;
use crate::AppState;

pub async fn home(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Html(templates::home_page(&state.fake_cms))
}

pub async fn wp_login_get() -> impl IntoResponse {
    Html(templates::wp_login_page(false))
}

#[derive(Debug, Deserialize, Default)]
pub struct LoginForm {
    #[serde(default)]
    log: String,
    #[serde(default)]
    pwd: String,
}

pub async fn wp_login_post(
    State(state): State<Arc<AppState>>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    body: Bytes,
) -> impl IntoResponse {
    let LoginForm { log: username, pwd: password } =
        serde_urlencoded::from_bytes(&body).unwrap_or_default();

    if !username.is_empty() || !password.is_empty() {
        let payload = serde_json::json!({
            "type": "login_attempt",
            "username": username,
        });
        let new_attack =
            NewAttack::new(ip.clone(), Service::Http, payload).with_threat_type("credential_attack");

        match state.store.insert_attack(new_attack).await {
            Ok(attack_id) => {
                if let Err(err) = state
                    .store
                    .insert_credential(attack_id, username.clone(), password, false)
                    .await
                {
                    tracing::warn!(?err, "http_credential_record_failed");
                }
                tracing::warn!(client_ip = %ip, %username, "http_credential_captured");
            }
            Err(err) => tracing::warn!(?err, "http_credential_attack_record_failed"),
        }
    }

    Html(templates::wp_login_page(true))
}

pub async fn wp_admin_redirect() -> impl IntoResponse {
    (StatusCode::FOUND, [(header::LOCATION, "/wp-login.php?redirect_to=/wp-admin/")])
}

pub async fn xmlrpc() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/xml")], templates::xmlrpc_fault_body())
}

pub async fn robots() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain")], templates::robots_txt())
}

pub async fn env_probe(Extension(ClientIp(ip)): Extension<ClientIp>) -> impl IntoResponse {
    tracing::warn!(client_ip = %ip, path = "/.env", "http_sensitive_file_accessed");
    ([(header::CONTENT_TYPE, "text/plain")], templates::env_probe_body())
}

pub async fn config_probe(Extension(ClientIp(ip)): Extension<ClientIp>) -> impl IntoResponse {
    tracing::warn!(client_ip = %ip, path = "/config.php", "http_sensitive_file_accessed");
    ([(header::CONTENT_TYPE, "text/plain")], templates::config_probe_body())
}

pub async fn catchall() -> Response {
    (StatusCode::NOT_FOUND, Html(templates::page_404())).into_response()
}
