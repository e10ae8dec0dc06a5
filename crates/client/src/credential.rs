// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session credentials held in cookie storage.
//!
//! The backend issues three cookies: the access token, its decoded payload
//! segment (readable by the client), and the refresh token. This module only
//! reads and deletes them; minting and renewal happen server-side.

use std::sync::Arc;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use parking_lot::Mutex;
use reqwest::cookie::CookieStore as _;
use serde_json::{Map, Value};

use crate::config::ClientConfig;

/// Decoded token claims.
pub type Claims = Map<String, Value>;

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Ambient cookie storage: the `name=value; ...` string plus a writer that
/// accepts `Set-Cookie` style directives.
pub trait CookieStorage: Send + Sync {
    fn cookie_string(&self) -> String;
    fn set_cookie(&self, directive: &str);
}

/// In-process cookie storage.
///
/// Honours `Max-Age=0` / negative max-age as deletion; every other attribute
/// is accepted and ignored.
#[derive(Debug, Default)]
pub struct MemoryCookies {
    entries: Mutex<Vec<(String, String)>>,
}

impl MemoryCookies {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CookieStorage for MemoryCookies {
    fn cookie_string(&self) -> String {
        self.entries
            .lock()
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn set_cookie(&self, directive: &str) {
        let mut parts = directive.split(';');
        let Some((name, value)) = parts.next().and_then(|p| p.split_once('=')) else {
            return;
        };
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        let expired = parts.any(|attr| {
            attr.split_once('=').is_some_and(|(k, v)| {
                k.trim().eq_ignore_ascii_case("max-age")
                    && v.trim().parse::<i64>().is_ok_and(|age| age <= 0)
            })
        });

        let mut entries = self.entries.lock();
        entries.retain(|(n, _)| n != name);
        if !expired {
            entries.push((name.to_owned(), value.trim().to_owned()));
        }
    }
}

/// Cookie storage backed by the HTTP client's cookie jar, scoped to one origin.
///
/// Cookies the backend sets on responses become visible here. Deletions
/// written here apply to the next request the client sends.
pub struct JarCookies {
    jar: Arc<reqwest::cookie::Jar>,
    origin: reqwest::Url,
}

impl JarCookies {
    pub fn new(jar: Arc<reqwest::cookie::Jar>, origin: reqwest::Url) -> Self {
        Self { jar, origin }
    }
}

impl CookieStorage for JarCookies {
    fn cookie_string(&self) -> String {
        self.jar
            .cookies(&self.origin)
            .and_then(|v| v.to_str().ok().map(str::to_owned))
            .unwrap_or_default()
    }

    fn set_cookie(&self, directive: &str) {
        self.jar.add_cookie_str(directive, &self.origin);
    }
}

/// A credential read from cookie storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub value: String,
    pub payload: Option<Claims>,
}

/// Cookie names for the three session credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieNames {
    pub access: String,
    pub payload: String,
    pub refresh: String,
}

impl Default for CookieNames {
    fn default() -> Self {
        Self {
            access: "JWT".to_owned(),
            payload: "JWT_PAYLOAD".to_owned(),
            refresh: "REFRESH".to_owned(),
        }
    }
}

impl CookieNames {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            access: config.access_cookie.clone(),
            payload: config.payload_cookie.clone(),
            refresh: config.refresh_cookie.clone(),
        }
    }
}

/// Reads, decodes, and deletes session credentials.
#[derive(Clone)]
pub struct CredentialStore {
    storage: Arc<dyn CookieStorage>,
    names: CookieNames,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn CookieStorage>, names: CookieNames) -> Self {
        Self { storage, names }
    }

    pub fn names(&self) -> &CookieNames {
        &self.names
    }

    /// The raw ambient cookie string.
    pub fn cookie_string(&self) -> String {
        self.storage.cookie_string()
    }

    /// Read the named cookie. Missing or empty entries yield `None`.
    pub fn read(&self, name: &str) -> Option<Token> {
        let value = find_cookie(&self.storage.cookie_string(), name)?;
        if !is_cookie_value(&value) {
            tracing::debug!(cookie = %name, "cookie value is not a valid cookie-octet string");
            return None;
        }
        let payload = if value.contains('.') || name == self.names.payload {
            decode_payload(&value)
        } else {
            None
        };
        Some(Token { value, payload })
    }

    pub fn access_token(&self) -> Option<Token> {
        self.read(&self.names.access)
    }

    pub fn refresh_token(&self) -> Option<Token> {
        self.read(&self.names.refresh)
    }

    /// Claims of the current session, taken from the payload cookie.
    pub fn claims(&self) -> Option<Claims> {
        self.read(&self.names.payload).and_then(|t| t.payload)
    }

    /// Encode `claims` into the payload cookie.
    pub fn write_payload(&self, claims: &Claims) -> anyhow::Result<()> {
        let json = serde_json::to_vec(claims)?;
        let encoded = URL_SAFE_LENIENT.encode(json);
        self.storage.set_cookie(&format!("{}={encoded}; Path=/", self.names.payload));
        Ok(())
    }

    /// Delete the access token, its payload cookie, and the refresh token.
    pub fn clear_session(&self) {
        for name in [&self.names.access, &self.names.payload, &self.names.refresh] {
            self.storage.set_cookie(&deletion_directive(name));
        }
        tracing::debug!("session cookies cleared");
    }
}

/// Directive that expires `name` immediately across the whole site.
pub fn deletion_directive(name: &str) -> String {
    format!("{name}=; Max-Age=0; Path=/; SameSite=None; Secure")
}

/// Decode a token payload.
///
/// Accepts a full `header.payload.signature` token or the bare payload
/// segment, in base64url or standard alphabet, padded or not. Failures are
/// logged and yield `None`.
pub fn decode_payload(token: &str) -> Option<Claims> {
    let segment = match token.split('.').collect::<Vec<_>>().as_slice() {
        [_, payload, _] => *payload,
        _ => token,
    };

    let bytes = match URL_SAFE_LENIENT.decode(segment).or_else(|_| STANDARD_LENIENT.decode(segment))
    {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(err = %e, "token payload is not valid base64");
            return None;
        }
    };

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(claims)) => Some(claims),
        Ok(_) => {
            tracing::warn!("token payload is not a JSON object");
            None
        }
        Err(e) => {
            tracing::warn!(err = %e, "token payload is not valid JSON");
            None
        }
    }
}

fn find_cookie(cookies: &str, name: &str) -> Option<String> {
    cookies.split(';').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k.trim() == name && !v.trim().is_empty()).then(|| v.trim().to_owned())
    })
}

// RFC 6265 cookie-octet, allowing an optional surrounding DQUOTE pair.
fn is_cookie_value(value: &str) -> bool {
    let inner = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')).unwrap_or(value);
    inner.bytes().all(|b| {
        b == 0x21 || (0x23..=0x2B).contains(&b) || (0x2D..=0x3A).contains(&b)
            || (0x3C..=0x5B).contains(&b) || (0x5D..=0x7E).contains(&b)
    })
}

#[cfg(test)]
#[path = "credential_tests.rs"]
mod tests;
