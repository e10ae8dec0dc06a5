// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake backend for integration tests: cookie-based session endpoints and a
//! chat WebSocket, served by axum on an ephemeral port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{AppendHeaders, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;

use forestfull_client::navigator::{Navigator, Notice};

/// `{"sub":"alice"}`, base64url without padding.
pub const ALICE_PAYLOAD: &str = "eyJzdWIiOiJhbGljZSJ9";

pub struct Backend {
    generation: AtomicUsize,
    refresh_accepts: AtomicBool,
    refresh_delay_ms: AtomicUsize,
    pub refresh_hits: AtomicUsize,
    pub ws_upgrades: AtomicUsize,
    pub ws_cookies: Mutex<Vec<String>>,
}

impl Backend {
    fn new() -> Self {
        Self {
            generation: AtomicUsize::new(1),
            refresh_accepts: AtomicBool::new(true),
            refresh_delay_ms: AtomicUsize::new(0),
            refresh_hits: AtomicUsize::new(0),
            ws_upgrades: AtomicUsize::new(0),
            ws_cookies: Mutex::new(Vec::new()),
        }
    }

    fn access_token(&self) -> String {
        format!("header.{ALICE_PAYLOAD}.gen{}", self.generation.load(Ordering::SeqCst))
    }

    /// Invalidate the access token currently held by clients.
    pub fn expire(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn reject_refresh(&self) {
        self.refresh_accepts.store(false, Ordering::SeqCst);
    }

    pub fn slow_refresh(&self, delay: Duration) {
        self.refresh_delay_ms.store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn refresh_hits(&self) -> usize {
        self.refresh_hits.load(Ordering::SeqCst)
    }

    pub fn ws_upgrades(&self) -> usize {
        self.ws_upgrades.load(Ordering::SeqCst)
    }

    fn session_cookies(&self) -> AppendHeaders<[(axum::http::HeaderName, String); 3]> {
        AppendHeaders([
            (SET_COOKIE, format!("JWT={}; Path=/; HttpOnly", self.access_token())),
            (SET_COOKIE, format!("JWT_PAYLOAD={ALICE_PAYLOAD}; Path=/")),
            (SET_COOKIE, "REFRESH=refresh-token; Path=/; HttpOnly".to_owned()),
        ])
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        cookie(headers, "JWT").is_some_and(|jwt| jwt == self.access_token())
    }
}

/// Spawn the backend on `127.0.0.1:0`.
pub async fn spawn_backend() -> anyhow::Result<(SocketAddr, Arc<Backend>)> {
    let backend = Arc::new(Backend::new());
    let app = Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/logout", post(logout))
        .route("/api/items", get(items))
        .route("/api/echo", post(echo))
        .route("/api/upload", post(upload))
        .route("/ws/chat", get(chat))
        .with_state(Arc::clone(&backend));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((addr, backend))
}

fn cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k.trim() == name).then(|| v.trim().to_owned())
    })
}

async fn login(State(b): State<Arc<Backend>>, Json(creds): Json<serde_json::Value>) -> Response {
    match (creds["username"].as_str(), creds["password"].as_str()) {
        (Some("alice"), Some("secret")) => {
            (b.session_cookies(), Json(serde_json::json!({"message": "Login successful"})))
                .into_response()
        }
        (Some("alice"), _) => StatusCode::UNAUTHORIZED.into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn refresh(State(b): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    b.refresh_hits.fetch_add(1, Ordering::SeqCst);
    let delay = b.refresh_delay_ms.load(Ordering::SeqCst) as u64;
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    let has_refresh = cookie(&headers, "REFRESH").is_some_and(|r| r == "refresh-token");
    if !has_refresh || !b.refresh_accepts.load(Ordering::SeqCst) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    (b.session_cookies(), StatusCode::OK).into_response()
}

async fn logout() -> Response {
    let expired = |name: &str| (SET_COOKIE, format!("{name}=; Max-Age=0; Path=/"));
    (AppendHeaders([expired("JWT"), expired("JWT_PAYLOAD"), expired("REFRESH")]), StatusCode::OK)
        .into_response()
}

async fn items(State(b): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    if !b.authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({"error": "token expired"})))
            .into_response();
    }
    Json(serde_json::json!({"id": 1})).into_response()
}

async fn echo(headers: HeaderMap, body: String) -> Json<serde_json::Value> {
    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or("");
    Json(serde_json::json!({"content_type": content_type, "body": body}))
}

/// Protected multipart sink: reports the content type and, for each part,
/// its name, file name and content type, in order.
async fn upload(State(b): State<Arc<Backend>>, headers: HeaderMap, body: axum::body::Bytes) -> Response {
    if !b.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or("");
    let text = String::from_utf8_lossy(&body);
    let parts: Vec<serde_json::Value> = text
        .split("\r\n\r\n")
        .filter_map(|block| {
            let disposition =
                block.lines().rev().find(|l| l.to_ascii_lowercase().starts_with("content-disposition"))?;
            let part_type = block
                .lines()
                .rev()
                .take_while(|l| !l.to_ascii_lowercase().starts_with("content-disposition"))
                .find_map(|l| l.strip_prefix("Content-Type: ").or_else(|| l.strip_prefix("content-type: ")));
            Some(serde_json::json!({
                "name": quoted_param(disposition, "name"),
                "filename": quoted_param(disposition, "filename"),
                "content_type": part_type,
            }))
        })
        .collect();
    Json(serde_json::json!({"content_type": content_type, "parts": parts})).into_response()
}

fn quoted_param(header: &str, key: &str) -> Option<String> {
    header.split(';').find_map(|param| {
        let (k, v) = param.trim().split_once('=')?;
        (k == key).then(|| v.trim_matches('"').to_owned())
    })
}

async fn chat(State(b): State<Arc<Backend>>, headers: HeaderMap, ws: WebSocketUpgrade) -> Response {
    let raw = headers.get(COOKIE).and_then(|v| v.to_str().ok()).unwrap_or("").to_owned();
    b.ws_cookies.lock().push(raw);
    if !b.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    b.ws_upgrades.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(chat_socket)
}

/// Echo text frames; `bye` makes the backend close the socket.
async fn chat_socket(mut socket: WebSocket) {
    while let Some(Ok(msg)) = socket.recv().await {
        let Message::Text(text) = msg else { continue };
        if text.as_str() == "bye" {
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
        let reply = format!("echo: {}", text.as_str());
        if socket.send(Message::Text(reply.into())).await.is_err() {
            return;
        }
    }
}

/// Navigator that records what it was asked to do.
#[derive(Default)]
pub struct RecordingNavigator {
    pub notices: Mutex<Vec<Notice>>,
    pub redirects: Mutex<Vec<String>>,
}

impl Navigator for RecordingNavigator {
    fn notify(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }

    fn redirect_to_login(&self, location: &str) {
        self.redirects.lock().push(location.to_owned());
    }
}

/// Poll `cond` until it holds or five seconds pass.
pub async fn wait_until(cond: impl Fn() -> bool) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "condition never held");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}
