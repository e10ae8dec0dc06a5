// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Configuration for the authenticated client.
#[derive(Debug, Clone, clap::Args)]
pub struct ClientConfig {
    /// Backend origin all relative paths are resolved against.
    #[arg(long, default_value = "http://127.0.0.1:8080", env = "FORESTFULL_BASE_URL")]
    pub base_url: String,

    /// Token refresh endpoint.
    #[arg(long, default_value = "/api/auth/refresh", env = "FORESTFULL_REFRESH_PATH")]
    pub refresh_path: String,

    /// Login endpoint.
    #[arg(long, default_value = "/api/auth/login", env = "FORESTFULL_LOGIN_PATH")]
    pub login_path: String,

    /// Logout endpoint.
    #[arg(long, default_value = "/api/auth/logout", env = "FORESTFULL_LOGOUT_PATH")]
    pub logout_path: String,

    /// Login entry point the navigator is sent to when the session ends.
    #[arg(long, default_value = "/", env = "FORESTFULL_LOGIN_REDIRECT")]
    pub login_redirect: String,

    /// Messaging channel handshake path.
    #[arg(long, default_value = "/ws/chat", env = "FORESTFULL_CHANNEL_PATH")]
    pub channel_path: String,

    /// Access token cookie name.
    #[arg(long, default_value = "JWT", env = "FORESTFULL_ACCESS_COOKIE")]
    pub access_cookie: String,

    /// Decoded access token payload cookie name.
    #[arg(long, default_value = "JWT_PAYLOAD", env = "FORESTFULL_PAYLOAD_COOKIE")]
    pub payload_cookie: String,

    /// Refresh token cookie name.
    #[arg(long, default_value = "REFRESH", env = "FORESTFULL_REFRESH_COOKIE")]
    pub refresh_cookie: String,

    /// Per-request timeout in milliseconds. Unset means no timeout.
    #[arg(long, env = "FORESTFULL_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::with_base_url("http://127.0.0.1:8080")
    }
}

impl ClientConfig {
    /// Default configuration pointed at `base_url`.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            refresh_path: "/api/auth/refresh".to_owned(),
            login_path: "/api/auth/login".to_owned(),
            logout_path: "/api/auth/logout".to_owned(),
            login_redirect: "/".to_owned(),
            channel_path: "/ws/chat".to_owned(),
            access_cookie: "JWT".to_owned(),
            payload_cookie: "JWT_PAYLOAD".to_owned(),
            refresh_cookie: "REFRESH".to_owned(),
            request_timeout_ms: None,
        }
    }

    pub fn request_timeout(&self) -> Option<std::time::Duration> {
        self.request_timeout_ms.map(std::time::Duration::from_millis)
    }

    /// Resolve `path` against `base_url`. Absolute URLs pass through.
    pub fn endpoint(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_owned();
        }
        let base = self.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    /// Messaging channel URL: `base_url` with its scheme swapped to ws(s).
    pub fn channel_url(&self) -> String {
        let http = self.endpoint(&self.channel_path);
        if http.starts_with("https://") {
            http.replacen("https://", "wss://", 1)
        } else {
            http.replacen("http://", "ws://", 1)
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
