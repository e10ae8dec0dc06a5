// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated requests with automatic recovery from an expired session.
//!
//! A 401 hands the request to the [`RefreshCoordinator`]. If the session is
//! renewed the captured request is replayed exactly once; otherwise the
//! session credentials are cleared, the user is sent to the login entry
//! point, and the original 401 is returned.

use std::sync::Arc;

use reqwest::Method;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

use crate::channel::ChannelSession;
use crate::config::ClientConfig;
use crate::credential::{Claims, CookieNames, CredentialStore, JarCookies};
use crate::error::ClientError;
use crate::navigator::{Navigator, Notice};
use crate::refresh::{RefreshCoordinator, RefreshOutcome};
use crate::transport::{Fetch, FileForm, PendingRequest, RawResponse, ReqwestFetch, TransportClient};

/// Result of a login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Success,
    /// 404: no such account.
    UnknownUser,
    /// 401: the account exists but the password is wrong.
    InvalidPassword,
    Rejected(u16),
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// Client for a cookie-authenticated backend.
///
/// Cheap to clone; clones share the transport, credentials, and the refresh
/// coordinator.
pub struct AuthClient<F> {
    config: Arc<ClientConfig>,
    transport: TransportClient<F>,
    credentials: CredentialStore,
    coordinator: Arc<RefreshCoordinator>,
    navigator: Arc<dyn Navigator>,
}

impl<F> Clone for AuthClient<F> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            transport: self.transport.clone(),
            credentials: self.credentials.clone(),
            coordinator: Arc::clone(&self.coordinator),
            navigator: Arc::clone(&self.navigator),
        }
    }
}

impl AuthClient<ReqwestFetch> {
    /// Build a client whose credential store reads the HTTP client's own
    /// cookie jar.
    pub fn from_config(
        config: ClientConfig,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, ClientError> {
        let origin: reqwest::Url = config
            .base_url
            .parse()
            .map_err(|e| ClientError::transport(format!("invalid base url {}: {e}", config.base_url)))?;
        let jar = Arc::new(reqwest::cookie::Jar::default());
        let fetch = ReqwestFetch::new(Arc::clone(&jar), config.request_timeout())?;
        let credentials =
            CredentialStore::new(Arc::new(JarCookies::new(jar, origin)), CookieNames::from_config(&config));
        Ok(Self::new(config, fetch, credentials, Arc::new(RefreshCoordinator::new()), navigator))
    }
}

impl<F: Fetch> AuthClient<F> {
    pub fn new(
        config: ClientConfig,
        fetch: F,
        credentials: CredentialStore,
        coordinator: Arc<RefreshCoordinator>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            transport: TransportClient::new(fetch),
            credentials,
            coordinator,
            navigator,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn transport(&self) -> &TransportClient<F> {
        &self.transport
    }

    /// Claims of the current session, if the payload cookie is present.
    pub fn claims(&self) -> Option<Claims> {
        self.credentials.claims()
    }

    /// A messaging channel session authenticated with this client's cookies.
    pub fn channel(&self) -> ChannelSession {
        ChannelSession::new(self.config.channel_url(), Some(self.credentials.clone()))
    }

    /// Issue a request, recovering once from an expired session.
    ///
    /// Any status other than 401 is returned untouched. A transport failure
    /// is surfaced through the navigator and returned as an error.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        headers: &[(&str, &str)],
    ) -> Result<RawResponse, ClientError> {
        let request = PendingRequest::new(method, self.config.endpoint(url), body, headers)?;
        self.execute(request).await
    }

    pub async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<RawResponse, ClientError> {
        self.request(Method::GET, url, None, headers).await
    }

    /// `POST`; a missing body is sent as `{}`.
    pub async fn post(
        &self,
        url: &str,
        body: Option<&Value>,
        headers: &[(&str, &str)],
    ) -> Result<RawResponse, ClientError> {
        let empty = Value::Object(Map::new());
        self.request(Method::POST, url, Some(body.unwrap_or(&empty)), headers).await
    }

    /// `PUT`; a missing body is sent as `{}`.
    pub async fn put(
        &self,
        url: &str,
        body: Option<&Value>,
        headers: &[(&str, &str)],
    ) -> Result<RawResponse, ClientError> {
        let empty = Value::Object(Map::new());
        self.request(Method::PUT, url, Some(body.unwrap_or(&empty)), headers).await
    }

    pub async fn delete(
        &self,
        url: &str,
        body: Option<&Value>,
        headers: &[(&str, &str)],
    ) -> Result<RawResponse, ClientError> {
        self.request(Method::DELETE, url, body, headers).await
    }

    /// Multipart `POST`. The fetch layer sets the content-type boundary.
    pub async fn upload(&self, url: &str, form: FileForm) -> Result<RawResponse, ClientError> {
        self.execute(PendingRequest::upload(self.config.endpoint(url), form)).await
    }

    /// Run a captured request through the recovery pipeline.
    pub async fn execute(&self, request: PendingRequest) -> Result<RawResponse, ClientError> {
        let span = tracing::debug_span!(
            "request",
            request_id = %Uuid::new_v4(),
            method = %request.method(),
            url = %request.url(),
        );
        self.execute_inner(&request).instrument(span).await
    }

    async fn execute_inner(&self, request: &PendingRequest) -> Result<RawResponse, ClientError> {
        let first = self.send_or_notify(request).await?;
        if !first.is_unauthorized() {
            return Ok(first);
        }

        debug!("access token rejected");
        match self.coordinator.refresh_or_wait(|| self.refresh_tokens()).await {
            RefreshOutcome::Retry => {
                let retried = self.send_or_notify(request).await?;
                if retried.is_unauthorized() {
                    warn!("request rejected again after a successful refresh");
                }
                Ok(retried)
            }
            RefreshOutcome::Failed => {
                self.end_session();
                Ok(first)
            }
        }
    }

    async fn send_or_notify(&self, request: &PendingRequest) -> Result<RawResponse, ClientError> {
        self.transport.send(request).await.inspect_err(|e| {
            self.navigator.notify(Notice::TransportFailure(e.message().to_owned()));
        })
    }

    /// One refresh call. Any 2xx is success; everything else, including a
    /// transport failure, is not.
    async fn refresh_tokens(&self) -> bool {
        let request =
            PendingRequest::bare(Method::POST, self.config.endpoint(&self.config.refresh_path));
        match self.transport.send(&request).await {
            Ok(resp) if resp.is_success() => {
                debug!("token refresh accepted");
                true
            }
            Ok(resp) => {
                warn!(status = resp.status, "token refresh rejected");
                false
            }
            Err(e) => {
                warn!(err = %e, "token refresh request failed");
                false
            }
        }
    }

    fn end_session(&self) {
        warn!(location = %self.config.login_redirect, "session ended, redirecting to login");
        self.credentials.clear_session();
        self.navigator.notify(Notice::SessionExpired);
        self.navigator.redirect_to_login(&self.config.login_redirect);
    }

    /// `POST` credentials to the login endpoint. No 401 recovery: a 401
    /// here means a wrong password.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome, ClientError> {
        let body = serde_json::to_value(LoginRequest { username, password })
            .map_err(|e| ClientError::transport(format!("body serialization: {e}")))?;
        let request = PendingRequest::new(
            Method::POST,
            self.config.endpoint(&self.config.login_path),
            Some(&body),
            &[],
        )?;
        let resp = self.send_or_notify(&request).await?;
        let outcome = match resp.status {
            s if (200..300).contains(&s) => LoginOutcome::Success,
            404 => LoginOutcome::UnknownUser,
            401 => LoginOutcome::InvalidPassword,
            s => LoginOutcome::Rejected(s),
        };
        if outcome == LoginOutcome::Success {
            self.coordinator.reset();
            debug!(username, "logged in");
        } else {
            debug!(username, ?outcome, "login refused");
        }
        Ok(outcome)
    }

    /// End the session server-side, then locally. Local cleanup and
    /// navigation happen even if the backend cannot be reached.
    pub async fn logout(&self) {
        let request =
            PendingRequest::bare(Method::POST, self.config.endpoint(&self.config.logout_path));
        match self.transport.send(&request).await {
            Ok(resp) if !resp.is_success() => warn!(status = resp.status, "logout rejected"),
            Ok(_) => {}
            Err(e) => warn!(err = %e, "logout request failed"),
        }
        self.credentials.clear_session();
        self.coordinator.sign_out();
        self.navigator.notify(Notice::LoggedOut);
        self.navigator.redirect_to_login(&self.config.login_redirect);
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
