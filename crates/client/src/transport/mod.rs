// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single HTTP exchanges over a caller-supplied fetch capability.
//!
//! Nothing here inspects status codes or retries. Recovery from an expired
//! session lives in [`crate::pipeline`].

pub mod http;

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;

use crate::error::ClientError;

pub use http::ReqwestFetch;

/// One multipart field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub name: String,
    pub file_name: Option<String>,
    pub mime: Option<String>,
    pub data: Bytes,
}

/// A multipart body kept as parts so it can be sent more than once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileForm {
    parts: Vec<FilePart>,
}

impl FileForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let value: String = value.into();
        self.parts.push(FilePart {
            name: name.into(),
            file_name: None,
            mime: None,
            data: Bytes::from(value),
        });
        self
    }

    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime: Option<&str>,
        data: impl Into<Bytes>,
    ) -> Self {
        self.parts.push(FilePart {
            name: name.into(),
            file_name: Some(file_name.into()),
            mime: mime.map(str::to_owned),
            data: data.into(),
        });
        self
    }

    pub fn parts(&self) -> &[FilePart] {
        &self.parts
    }
}

/// Body of a [`PendingRequest`], serialized at capture time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Empty,
    /// JSON text, already encoded.
    Json(Bytes),
    /// Multipart parts. No content-type header is set; the fetch layer
    /// supplies one with the boundary.
    Multipart(FileForm),
}

/// Immutable snapshot of a request taken at first-attempt time.
///
/// A retry after a token refresh replays exactly these bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
    body: RequestBody,
}

impl PendingRequest {
    /// Capture a request, serializing `body` as JSON once.
    ///
    /// A present body sets `Content-Type: application/json`, replacing any
    /// content-type the caller passed.
    pub fn new(
        method: Method,
        url: impl Into<String>,
        body: Option<&serde_json::Value>,
        headers: &[(&str, &str)],
    ) -> Result<Self, ClientError> {
        let mut headers: Vec<(String, String)> =
            headers.iter().map(|&(k, v)| (k.to_owned(), v.to_owned())).collect();

        let body = match body {
            Some(value) => {
                let encoded = serde_json::to_vec(value)
                    .map_err(|e| ClientError::transport(format!("body serialization: {e}")))?;
                headers.retain(|(k, _)| !k.eq_ignore_ascii_case(CONTENT_TYPE.as_str()));
                headers.push((CONTENT_TYPE.as_str().to_owned(), "application/json".to_owned()));
                RequestBody::Json(Bytes::from(encoded))
            }
            None => RequestBody::Empty,
        };

        Ok(Self { method, url: url.into(), headers, body })
    }

    /// A request with no body and no extra headers.
    pub fn bare(method: Method, url: impl Into<String>) -> Self {
        Self { method, url: url.into(), headers: Vec::new(), body: RequestBody::Empty }
    }

    /// Capture a multipart upload (always `POST`).
    pub fn upload(url: impl Into<String>, form: FileForm) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Multipart(form),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }
}

/// Status, headers and raw body of a completed exchange.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self { status, headers: HeaderMap::new(), body: body.into() }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// The transport capability: perform one HTTP exchange.
///
/// Implementations attach ambient session credentials (cookies) themselves.
/// An `Err` means no response was obtained at all.
pub trait Fetch: Send + Sync + 'static {
    fn fetch(
        &self,
        request: &PendingRequest,
    ) -> impl Future<Output = Result<RawResponse, ClientError>> + Send;
}

/// Sends captured requests through a [`Fetch`] capability.
pub struct TransportClient<F> {
    fetch: Arc<F>,
}

impl<F> Clone for TransportClient<F> {
    fn clone(&self) -> Self {
        Self { fetch: Arc::clone(&self.fetch) }
    }
}

impl<F: Fetch> TransportClient<F> {
    pub fn new(fetch: F) -> Self {
        Self { fetch: Arc::new(fetch) }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetch
    }

    /// Perform one exchange. Never retries.
    pub async fn send(&self, request: &PendingRequest) -> Result<RawResponse, ClientError> {
        match self.fetch.fetch(request).await {
            Ok(resp) => {
                tracing::debug!(
                    method = %request.method(),
                    url = %request.url(),
                    status = resp.status,
                    "exchange complete"
                );
                Ok(resp)
            }
            Err(e) => {
                tracing::error!(method = %request.method(), url = %request.url(), err = %e, "exchange failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
