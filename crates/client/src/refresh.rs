// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight token refresh.
//!
//! The first caller to observe an expired session becomes the leader and
//! issues the refresh call. Every caller arriving while that call is in
//! flight becomes a follower: it parks on a oneshot and is released, in
//! registration order, with the leader's outcome.
//!
//! ```text
//! Idle ──leader enters──▶ Refreshing{waiters} ──ok──▶ Idle
//!                                             └─fail─▶ SignedOut ──reset()──▶ Idle
//! ```
//!
//! `SignedOut` is terminal: callers resolve to [`RefreshOutcome::Failed`]
//! without a refresh call until a new session is established.
//!
//! Each entry into `Refreshing` carries an epoch. A leader only settles the
//! state it created; a leader left over from a session that was signed out
//! and reset resolves to `Failed` without touching the new session.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Result of a coordinated refresh, delivered to the leader and every follower.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Fresh credentials are in place; replay the original request once.
    Retry,
    /// The session cannot be renewed.
    Failed,
}

enum RefreshState {
    Idle,
    Refreshing { epoch: u64, waiters: Vec<oneshot::Sender<RefreshOutcome>> },
    SignedOut,
}

enum Role {
    Leader(u64),
    Follower(oneshot::Receiver<RefreshOutcome>),
    Terminal,
}

/// Owns the refresh protocol for one session.
///
/// Share it between clients with an `Arc`; independent instances never
/// interact.
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
    epochs: AtomicU64,
}

impl Default for RefreshCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self { state: Mutex::new(RefreshState::Idle), epochs: AtomicU64::new(0) }
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.state.lock(), RefreshState::Refreshing { .. })
    }

    pub fn is_signed_out(&self) -> bool {
        matches!(*self.state.lock(), RefreshState::SignedOut)
    }

    /// Number of followers parked on the in-flight refresh.
    pub fn waiter_count(&self) -> usize {
        match &*self.state.lock() {
            RefreshState::Refreshing { waiters, .. } => waiters.len(),
            _ => 0,
        }
    }

    /// Leave the terminal state after a new session has been established.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        if matches!(*state, RefreshState::SignedOut) {
            *state = RefreshState::Idle;
            debug!("refresh coordinator reset");
        }
    }

    /// Enter the terminal state. Parked followers resolve to `Failed`; an
    /// in-flight leader resolves to `Failed` when its call returns, even if
    /// the session has been reset by then.
    pub fn sign_out(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), RefreshState::SignedOut);
        if let RefreshState::Refreshing { waiters, .. } = previous {
            release(waiters, RefreshOutcome::Failed);
        }
    }

    /// Refresh the session, or wait for the refresh already in flight.
    ///
    /// `refresh` is invoked only if this caller becomes the leader; it
    /// returns whether the backend accepted the refresh.
    pub async fn refresh_or_wait<R, Fut>(&self, refresh: R) -> RefreshOutcome
    where
        R: FnOnce() -> Fut,
        Fut: Future<Output = bool>,
    {
        loop {
            match self.enter() {
                Role::Terminal => return RefreshOutcome::Failed,
                Role::Leader(epoch) => return self.lead(epoch, refresh).await,
                Role::Follower(rx) => match rx.await {
                    Ok(outcome) => return outcome,
                    // Leader went away without resolving; contend again.
                    Err(_) => debug!("refresh leader abandoned, re-entering"),
                },
            }
        }
    }

    /// Check-and-set in one critical section: at most one caller sees `Idle`.
    fn enter(&self) -> Role {
        let mut state = self.state.lock();
        match &mut *state {
            RefreshState::SignedOut => Role::Terminal,
            RefreshState::Refreshing { waiters, .. } => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                debug!(position = waiters.len(), "refresh in flight, waiting");
                Role::Follower(rx)
            }
            RefreshState::Idle => {
                let epoch = self.epochs.fetch_add(1, Ordering::Relaxed);
                *state = RefreshState::Refreshing { epoch, waiters: Vec::new() };
                debug!(epoch, "refresh leader elected");
                Role::Leader(epoch)
            }
        }
    }

    async fn lead<R, Fut>(&self, epoch: u64, refresh: R) -> RefreshOutcome
    where
        R: FnOnce() -> Fut,
        Fut: Future<Output = bool>,
    {
        let guard = LeaderGuard { coordinator: self, epoch, resolved: false };
        let accepted = refresh().await;
        let outcome = if accepted { RefreshOutcome::Retry } else { RefreshOutcome::Failed };
        guard.resolve(outcome)
    }
}

/// Resolves the shared state when the leader finishes, or releases the
/// followers without an outcome if the leader is dropped mid-refresh.
struct LeaderGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    epoch: u64,
    resolved: bool,
}

impl LeaderGuard<'_> {
    fn owns(&self, state: &RefreshState) -> bool {
        matches!(state, RefreshState::Refreshing { epoch, .. } if *epoch == self.epoch)
    }

    fn resolve(mut self, outcome: RefreshOutcome) -> RefreshOutcome {
        self.resolved = true;
        let next = match outcome {
            RefreshOutcome::Retry => RefreshState::Idle,
            RefreshOutcome::Failed => RefreshState::SignedOut,
        };
        let previous = {
            let mut state = self.coordinator.state.lock();
            if !self.owns(&state) {
                // Signed out while the call was in flight; the state, if
                // refreshing again, belongs to a newer leader.
                debug!(epoch = self.epoch, "stale refresh resolved, ignoring outcome");
                return RefreshOutcome::Failed;
            }
            std::mem::replace(&mut *state, next)
        };
        if let RefreshState::Refreshing { waiters, .. } = previous {
            debug!(?outcome, followers = waiters.len(), "refresh resolved");
            release(waiters, outcome);
        }
        if outcome == RefreshOutcome::Failed {
            warn!("token refresh rejected, session ended");
        }
        outcome
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        let mut state = self.coordinator.state.lock();
        if !self.owns(&state) {
            return;
        }
        // Dropping the senders wakes followers with a receive error.
        let abandoned = std::mem::replace(&mut *state, RefreshState::Idle);
        drop(state);
        warn!("refresh leader dropped before resolving");
        drop(abandoned);
    }
}

/// Wake followers in registration order.
fn release(waiters: Vec<oneshot::Sender<RefreshOutcome>>, outcome: RefreshOutcome) {
    for tx in waiters {
        // A follower whose future was dropped no longer listens.
        let _ = tx.send(outcome);
    }
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
