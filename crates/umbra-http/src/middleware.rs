//! The single logging middleware every request passes through: resolve the
//! client IP, buffer POST bodies, classify, persist, then dispatch.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http_body_util::BodyExt;

use umbra_common::model::{NewAttack, Service};

use crate::AppState;

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// The IP address resolved for this request, stashed for route handlers
/// that need it (e.g. to tie a credential submission back to its source).
#[derive(Clone)]
pub struct ClientIp(pub String);

fn resolve_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }
    peer.ip().to_string()
}

/// Drains `body` to completion, keeping only the first `limit` bytes.
///
/// A body over the limit is still fully consumed (so the connection is not
/// left half-read) but only its prefix is retained, since that prefix is
/// all the classifier and payload logging ever look at.
async fn read_body_prefix(mut body: Body, limit: usize) -> Bytes {
    let mut collected = Vec::with_capacity(limit.min(8192));
    loop {
        match body.frame().await {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    if collected.len() < limit {
                        let take = (limit - collected.len()).min(data.len());
                        collected.extend_from_slice(&data[..take]);
                    }
                }
            }
            Some(Err(err)) => {
                tracing::debug!(?err, "http_body_read_failed");
                break;
            }
            None => break,
        }
    }
    Bytes::from(collected)
}

pub async fn log_and_record(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let ip = resolve_ip(request.headers(), peer);
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let query = request.uri().query().unwrap_or("").to_string();
    let user_agent = request
        .headers()
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let body_text = if request.method() == axum::http::Method::POST {
        let (parts, body) = request.into_parts();
        let bytes = read_body_prefix(body, MAX_BODY_BYTES).await;
        let text = String::from_utf8_lossy(&bytes).to_string();
        request = Request::from_parts(parts, Body::from(bytes));
        Some(text)
    } else {
        None
    };

    let summary = umbra_pattern_matcher::RequestSummary {
        method: &method,
        path: &path,
        query: &query,
        user_agent: &user_agent,
        body: body_text.as_deref(),
    };
    let threat_type = state.matcher.classify(&summary);

    let truncated_body: Option<String> = body_text.as_ref().map(|b| b.chars().take(1000).collect());
    let headers_json: serde_json::Map<String, serde_json::Value> = request
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_str().unwrap_or("").to_string())))
        .collect();

    let payload = serde_json::json!({
        "method": method,
        "path": path,
        "query": query,
        "headers": headers_json,
        "body": truncated_body,
        "user_agent": user_agent,
    });

    let new_attack = NewAttack::new(ip.clone(), Service::Http, payload).with_threat_type(threat_type.to_string());
    if let Err(err) = state.store.insert_attack(new_attack).await {
        tracing::warn!(?err, "http_attack_record_failed");
    }
    tracing::info!(client_ip = %ip, %method, %path, threat_type = %threat_type, "http_request_received");

    request.extensions_mut().insert(ClientIp(ip));

    let response = next.run(request).await.into_response();
    with_identity_headers(response)
}

/// Stamps the WordPress-impersonation headers onto every response,
/// regardless of which route produced it.
pub fn with_identity_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert("Server", "Apache/2.4.41 (Ubuntu)".parse().unwrap());
    headers.insert("X-Powered-By", "PHP/7.4.3".parse().unwrap());
    headers.insert("X-Pingback", "/xmlrpc.php".parse().unwrap());
    headers.insert("Link", "</>; rel=\"https://api.w.org/\"".parse().unwrap());
    response
}
