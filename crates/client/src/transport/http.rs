// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! [`Fetch`] over a `reqwest` client that shares a cookie jar with the
//! credential store.

use std::future::Future;
use std::sync::{Arc, Once};
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::multipart;

use crate::error::ClientError;
use crate::transport::{Fetch, FileForm, PendingRequest, RawResponse, RequestBody};

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// reqwest-backed fetch. Cookies set by the backend land in the shared jar
/// and are attached to every later request.
#[derive(Clone)]
pub struct ReqwestFetch {
    client: reqwest::Client,
}

impl ReqwestFetch {
    pub fn new(jar: Arc<Jar>, timeout: Option<Duration>) -> Result<Self, ClientError> {
        ensure_crypto();
        let mut builder = reqwest::Client::builder().cookie_provider(jar);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self { client: builder.build()? })
    }

    fn build(&self, request: &PendingRequest) -> Result<reqwest::RequestBuilder, ClientError> {
        let mut req = self.client.request(request.method().clone(), request.url());
        for (name, value) in request.headers() {
            req = req.header(name.as_str(), value.as_str());
        }
        req = match request.body() {
            RequestBody::Empty => req,
            RequestBody::Json(bytes) => req.body(bytes.clone()),
            RequestBody::Multipart(form) => req.multipart(multipart_form(form)?),
        };
        Ok(req)
    }
}

fn multipart_form(form: &FileForm) -> Result<multipart::Form, ClientError> {
    let mut out = multipart::Form::new();
    for part in form.parts() {
        let mut p = multipart::Part::bytes(part.data.to_vec());
        if let Some(ref file_name) = part.file_name {
            p = p.file_name(file_name.clone());
        }
        if let Some(ref mime) = part.mime {
            p = p.mime_str(mime)?;
        }
        out = out.part(part.name.clone(), p);
    }
    Ok(out)
}

impl Fetch for ReqwestFetch {
    fn fetch(
        &self,
        request: &PendingRequest,
    ) -> impl Future<Output = Result<RawResponse, ClientError>> + Send {
        let built = self.build(request);
        async move {
            let resp = built?.send().await?;
            let status = resp.status().as_u16();
            let headers = resp.headers().clone();
            let body = resp.bytes().await?;
            Ok(RawResponse { status, headers, body })
        }
    }
}
