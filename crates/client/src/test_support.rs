// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: a scripted backend, a recording navigator,
//! and a gate for holding the refresh call open.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::config::ClientConfig;
use crate::credential::{CookieNames, CookieStorage, CredentialStore, MemoryCookies};
use crate::error::ClientError;
use crate::navigator::{Navigator, Notice};
use crate::pipeline::AuthClient;
use crate::refresh::RefreshCoordinator;
use crate::transport::{Fetch, PendingRequest, RawResponse, RequestBody};

pub const BASE_URL: &str = "http://backend.test";

/// Holds an async step open until released. Releasing before anyone waits
/// stores the permit.
#[derive(Clone, Default)]
pub struct Gate {
    notify: Arc<Notify>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        self.notify.notify_one();
    }

    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}

/// Poll `cond` until it holds, yielding to other tasks in between.
pub async fn wait_until(cond: impl Fn() -> bool) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "condition never held");
        tokio::task::yield_now().await;
    }
    Ok(())
}

/// In-memory backend that mimics the session rules of the real one.
///
/// Protected paths answer 401 until a refresh (or login) succeeds, then the
/// configured status (200 by default) and body. Every call is logged as
/// `"METHOD /path"`.
pub struct ScriptedFetch {
    log: Mutex<Vec<String>>,
    session_valid: AtomicBool,
    refresh_accepts: AtomicBool,
    refresh_calls: AtomicUsize,
    refresh_gate: Mutex<Option<Gate>>,
    bodies: Mutex<HashMap<String, String>>,
    statuses: Mutex<HashMap<String, u16>>,
    always_unauthorized: Mutex<HashSet<String>>,
    unreachable: Mutex<HashSet<String>>,
    captured: Mutex<Vec<PendingRequest>>,
}

impl Default for ScriptedFetch {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedFetch {
    pub fn new() -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            session_valid: AtomicBool::new(false),
            refresh_accepts: AtomicBool::new(true),
            refresh_calls: AtomicUsize::new(0),
            refresh_gate: Mutex::new(None),
            bodies: Mutex::new(HashMap::new()),
            statuses: Mutex::new(HashMap::new()),
            always_unauthorized: Mutex::new(HashSet::new()),
            unreachable: Mutex::new(HashSet::new()),
            captured: Mutex::new(Vec::new()),
        }
    }

    pub fn with_valid_session(self) -> Self {
        self.session_valid.store(true, Ordering::SeqCst);
        self
    }

    pub fn rejecting_refresh(self) -> Self {
        self.refresh_accepts.store(false, Ordering::SeqCst);
        self
    }

    pub fn gated_refresh(self, gate: Gate) -> Self {
        *self.refresh_gate.lock() = Some(gate);
        self
    }

    pub fn with_body(self, path: &str, body: &str) -> Self {
        self.bodies.lock().insert(path.to_owned(), body.to_owned());
        self
    }

    /// Answer `path` with `status` once the session is valid.
    pub fn with_status(self, path: &str, status: u16) -> Self {
        self.statuses.lock().insert(path.to_owned(), status);
        self
    }

    pub fn always_unauthorized(self, path: &str) -> Self {
        self.always_unauthorized.lock().insert(path.to_owned());
        self
    }

    pub fn unreachable(self, path: &str) -> Self {
        self.unreachable.lock().insert(path.to_owned());
        self
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn calls_to(&self, entry: &str) -> usize {
        self.log.lock().iter().filter(|e| e.as_str() == entry).count()
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Every request received, in arrival order.
    pub fn captured(&self) -> Vec<PendingRequest> {
        self.captured.lock().clone()
    }

    async fn respond(&self, request: PendingRequest) -> Result<RawResponse, ClientError> {
        let path = path_of(request.url()).to_owned();
        self.log.lock().push(format!("{} {path}", request.method()));
        self.captured.lock().push(request.clone());

        if self.unreachable.lock().contains(&path) {
            return Err(ClientError::transport(format!("connection refused: {path}")));
        }

        match path.as_str() {
            "/api/auth/refresh" => {
                self.refresh_calls.fetch_add(1, Ordering::SeqCst);
                let gate = self.refresh_gate.lock().clone();
                if let Some(gate) = gate {
                    gate.wait().await;
                }
                if self.refresh_accepts.load(Ordering::SeqCst) {
                    self.session_valid.store(true, Ordering::SeqCst);
                    Ok(RawResponse::new(200, ""))
                } else {
                    Ok(RawResponse::new(401, r#"{"error":"refresh token expired"}"#))
                }
            }
            "/api/auth/login" => Ok(self.login(request.body())),
            "/api/auth/logout" => {
                self.session_valid.store(false, Ordering::SeqCst);
                Ok(RawResponse::new(200, r#"{"message":"Logout successful"}"#))
            }
            _ => {
                let valid = self.session_valid.load(Ordering::SeqCst)
                    && !self.always_unauthorized.lock().contains(&path);
                if !valid {
                    return Ok(RawResponse::new(401, r#"{"error":"token expired"}"#));
                }
                let status = self.statuses.lock().get(&path).copied().unwrap_or(200);
                let body = self.bodies.lock().get(&path).cloned().unwrap_or_default();
                Ok(RawResponse::new(status, body))
            }
        }
    }

    fn login(&self, body: &RequestBody) -> RawResponse {
        let RequestBody::Json(bytes) = body else {
            return RawResponse::new(400, "");
        };
        let creds: serde_json::Value = serde_json::from_slice(bytes).unwrap_or_default();
        match (creds["username"].as_str(), creds["password"].as_str()) {
            (Some("alice"), Some("secret")) => {
                self.session_valid.store(true, Ordering::SeqCst);
                RawResponse::new(200, r#"{"message":"Login successful"}"#)
            }
            (Some("alice"), _) => RawResponse::new(401, r#"{"error":"Invalid password"}"#),
            (Some(_), _) => RawResponse::new(404, r#"{"error":"User not found"}"#),
            _ => RawResponse::new(400, ""),
        }
    }
}

/// Shares one [`ScriptedFetch`] between the client under test and the test.
impl Fetch for Arc<ScriptedFetch> {
    fn fetch(
        &self,
        request: &PendingRequest,
    ) -> impl Future<Output = Result<RawResponse, ClientError>> + Send {
        self.as_ref().respond(request.clone())
    }
}

fn path_of(url: &str) -> &str {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    match rest.find('/') {
        Some(i) => &rest[i..],
        None => "/",
    }
}

/// Side effect recorded by [`RecordingNavigator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavEvent {
    Notice(Notice),
    Redirect(String),
}

#[derive(Default)]
pub struct RecordingNavigator {
    events: Mutex<Vec<NavEvent>>,
}

impl RecordingNavigator {
    pub fn events(&self) -> Vec<NavEvent> {
        self.events.lock().clone()
    }

    pub fn redirects(&self) -> usize {
        self.events.lock().iter().filter(|e| matches!(e, NavEvent::Redirect(_))).count()
    }
}

impl Navigator for RecordingNavigator {
    fn notify(&self, notice: Notice) {
        self.events.lock().push(NavEvent::Notice(notice));
    }

    fn redirect_to_login(&self, location: &str) {
        self.events.lock().push(NavEvent::Redirect(location.to_owned()));
    }
}

/// A client wired to a scripted backend, with handles to every collaborator.
pub struct Harness {
    pub backend: Arc<ScriptedFetch>,
    pub cookies: Arc<MemoryCookies>,
    pub navigator: Arc<RecordingNavigator>,
    pub coordinator: Arc<RefreshCoordinator>,
    pub client: AuthClient<Arc<ScriptedFetch>>,
}

impl Harness {
    pub fn new(backend: ScriptedFetch) -> Self {
        let backend = Arc::new(backend);
        let cookies = Arc::new(MemoryCookies::new());
        cookies.set_cookie("JWT=header.eyJzdWIiOiJhbGljZSJ9.sig; Path=/");
        cookies.set_cookie("JWT_PAYLOAD=eyJzdWIiOiJhbGljZSJ9; Path=/");
        cookies.set_cookie("REFRESH=refresh-token; Path=/");
        let navigator = Arc::new(RecordingNavigator::default());
        let coordinator = Arc::new(RefreshCoordinator::new());
        let client = AuthClient::new(
            ClientConfig::with_base_url(BASE_URL),
            Arc::clone(&backend),
            CredentialStore::new(cookies.clone(), CookieNames::default()),
            Arc::clone(&coordinator),
            navigator.clone(),
        );
        Self { backend, cookies, navigator, coordinator, client }
    }
}
