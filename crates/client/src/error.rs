// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Errors surfaced to callers of the client.
///
/// An expired session is not an error: it arrives as a 401 response and is
/// either recovered by the refresh coordinator or passed back unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The HTTP exchange never produced a response (unreachable, aborted,
    /// malformed URL, unserializable body).
    Transport { message: String },
    /// The messaging channel handshake or socket I/O failed.
    Channel { message: String },
}

impl ClientError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    pub fn channel(message: impl Into<String>) -> Self {
        Self::Channel { message: message.into() }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "TRANSPORT_FAILURE",
            Self::Channel { .. } => "CHANNEL_FAILURE",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transport { message } | Self::Channel { message } => message,
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.as_str(), self.message())
    }
}

impl std::error::Error for ClientError {}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        Self::transport(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::channel(e.to_string())
    }
}
