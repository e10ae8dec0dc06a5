// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User-facing side effects the client triggers but does not render.

use std::fmt;

/// Something the user should be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The session could not be renewed; the user must log in again.
    SessionExpired,
    /// A request never reached the backend.
    TransportFailure(String),
    /// The user logged out.
    LoggedOut,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionExpired => f.write_str("session expired, please log in again"),
            Self::TransportFailure(msg) => write!(f, "request failed: {msg}"),
            Self::LoggedOut => f.write_str("logged out"),
        }
    }
}

/// Notification and navigation capability supplied by the embedding page.
///
/// Both calls must tolerate repetition: every request that observes the end
/// of a session triggers them.
pub trait Navigator: Send + Sync {
    /// Surface a notice (modal, toast, ...).
    fn notify(&self, notice: Notice);

    /// Navigate to the login entry point.
    fn redirect_to_login(&self, location: &str);
}

/// Navigator that only logs. Used by the command-line tool.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn notify(&self, notice: Notice) {
        tracing::warn!(%notice, "notice");
    }

    fn redirect_to_login(&self, location: &str) {
        tracing::warn!(location, "login required");
    }
}
