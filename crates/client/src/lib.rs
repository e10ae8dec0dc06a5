// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Forestfull: cookie-authenticated HTTP client with single-flight token
//! refresh, plus the lifecycle of the backend's messaging channel.

pub mod channel;
pub mod config;
pub mod credential;
pub mod error;
pub mod navigator;
pub mod pipeline;
pub mod refresh;
pub mod transport;

#[cfg(test)]
pub mod test_support;

pub use channel::ChannelSession;
pub use config::ClientConfig;
pub use credential::{Claims, CookieNames, CookieStorage, CredentialStore, JarCookies, MemoryCookies, Token};
pub use error::ClientError;
pub use navigator::{LogNavigator, Navigator, Notice};
pub use pipeline::{AuthClient, LoginOutcome};
pub use refresh::{RefreshCoordinator, RefreshOutcome};
pub use transport::{Fetch, FileForm, PendingRequest, RawResponse, ReqwestFetch, TransportClient};
