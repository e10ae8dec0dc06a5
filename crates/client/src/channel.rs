// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistent messaging channel with idempotent connect.
//!
//! At most one socket exists per session. A `connect` issued while the
//! handshake is in flight waits for that handshake instead of opening a
//! second socket. Nothing here reconnects on its own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::credential::CredentialStore;
use crate::error::ClientError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Waiter = oneshot::Sender<Result<(), ClientError>>;

enum ChannelState {
    Disconnected,
    Connecting { waiters: Vec<Waiter> },
    Connected(Link),
}

/// Handles to the pump task of a live socket.
struct Link {
    outbound: mpsc::UnboundedSender<Message>,
    inbound: broadcast::Sender<String>,
    cancel: CancellationToken,
    epoch: u64,
}

enum Role {
    Ready,
    Wait(oneshot::Receiver<Result<(), ClientError>>),
    Open,
}

struct Inner {
    url: String,
    credentials: Option<CredentialStore>,
    state: Mutex<ChannelState>,
    epochs: AtomicU64,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let ChannelState::Connected(link) = &*self.state.get_mut() {
            link.cancel.cancel();
        }
    }
}

/// Connect/disconnect lifecycle of the messaging channel.
///
/// Clones share the same socket.
#[derive(Clone)]
pub struct ChannelSession {
    inner: Arc<Inner>,
}

impl ChannelSession {
    /// `credentials`, when present, supply the `Cookie` header of the
    /// handshake request.
    pub fn new(url: impl Into<String>, credentials: Option<CredentialStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                credentials,
                state: Mutex::new(ChannelState::Disconnected),
                epochs: AtomicU64::new(0),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.inner.state.lock(), ChannelState::Connected(_))
    }

    /// Connect, then run `on_ready`.
    ///
    /// Already connected: `on_ready` runs immediately. Handshake in flight:
    /// waits for it. `on_ready` does not run if the handshake fails.
    pub async fn connect<R: FnOnce()>(&self, on_ready: R) -> Result<(), ClientError> {
        loop {
            match self.enter() {
                Role::Ready => break,
                Role::Open => {
                    let guard = HandshakeGuard { inner: &self.inner, resolved: false };
                    let result = match self.handshake().await {
                        Ok(socket) => guard.finish(socket),
                        Err(e) => guard.fail(e),
                    };
                    result?;
                    break;
                }
                Role::Wait(rx) => match rx.await {
                    Ok(result) => {
                        result?;
                        break;
                    }
                    Err(_) => debug!("channel handshake abandoned, re-entering"),
                },
            }
        }
        on_ready();
        Ok(())
    }

    fn enter(&self) -> Role {
        let mut state = self.inner.state.lock();
        match &mut *state {
            ChannelState::Connected(_) => Role::Ready,
            ChannelState::Connecting { waiters } => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Role::Wait(rx)
            }
            ChannelState::Disconnected => {
                *state = ChannelState::Connecting { waiters: Vec::new() };
                Role::Open
            }
        }
    }

    async fn handshake(&self) -> Result<Socket, ClientError> {
        let mut request = self.inner.url.as_str().into_client_request()?;
        if let Some(ref credentials) = self.inner.credentials {
            let cookies = credentials.cookie_string();
            if !cookies.is_empty() {
                let value = HeaderValue::from_str(&cookies)
                    .map_err(|e| ClientError::channel(format!("invalid cookie header: {e}")))?;
                request.headers_mut().insert(COOKIE, value);
            }
        }
        let (socket, _) = tokio_tungstenite::connect_async(request).await?;
        debug!(url = %self.inner.url, "channel connected");
        Ok(socket)
    }

    /// Close the socket. No-op when not connected; a handshake in flight is
    /// abandoned and its callers get an error.
    pub fn disconnect(&self) {
        let previous = std::mem::replace(&mut *self.inner.state.lock(), ChannelState::Disconnected);
        match previous {
            ChannelState::Connected(link) => {
                link.cancel.cancel();
                debug!(url = %self.inner.url, "channel disconnected");
            }
            ChannelState::Connecting { waiters } => {
                release(waiters, Err(ClientError::channel("disconnected during handshake")));
            }
            ChannelState::Disconnected => {}
        }
    }

    /// Queue a text frame on the live socket.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), ClientError> {
        match &*self.inner.state.lock() {
            ChannelState::Connected(link) => link
                .outbound
                .send(Message::text(text.into()))
                .map_err(|_| ClientError::channel("channel closed")),
            _ => Err(ClientError::channel("not connected")),
        }
    }

    /// Receive text frames from the live socket. `None` when not connected.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<String>> {
        match &*self.inner.state.lock() {
            ChannelState::Connected(link) => Some(link.inbound.subscribe()),
            _ => None,
        }
    }
}

/// Settles a handshake. Dropped unresolved (the leader's future was
/// cancelled), it returns the session to `Disconnected` and drops the
/// waiters so they contend again.
struct HandshakeGuard<'a> {
    inner: &'a Arc<Inner>,
    resolved: bool,
}

impl HandshakeGuard<'_> {
    fn finish(mut self, socket: Socket) -> Result<(), ClientError> {
        self.resolved = true;
        let epoch = self.inner.epochs.fetch_add(1, Ordering::Relaxed);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound, _) = broadcast::channel(256);
        let cancel = CancellationToken::new();
        let link = Link { outbound, inbound: inbound.clone(), cancel: cancel.clone(), epoch };

        let waiters = {
            let mut state = self.inner.state.lock();
            if !matches!(*state, ChannelState::Connecting { .. }) {
                // Disconnected while the handshake was in flight.
                return Err(ClientError::channel("disconnected during handshake"));
            }
            match std::mem::replace(&mut *state, ChannelState::Connected(link)) {
                ChannelState::Connecting { waiters } => waiters,
                _ => Vec::new(),
            }
        };

        tokio::spawn(pump(socket, outbound_rx, inbound, cancel, Arc::downgrade(self.inner), epoch));
        release(waiters, Ok(()));
        Ok(())
    }

    fn fail(mut self, err: ClientError) -> Result<(), ClientError> {
        self.resolved = true;
        warn!(url = %self.inner.url, err = %err, "channel handshake failed");
        let previous = {
            let mut state = self.inner.state.lock();
            if !matches!(*state, ChannelState::Connecting { .. }) {
                return Err(err);
            }
            std::mem::replace(&mut *state, ChannelState::Disconnected)
        };
        if let ChannelState::Connecting { waiters } = previous {
            release(waiters, Err(err.clone()));
        }
        Err(err)
    }
}

impl Drop for HandshakeGuard<'_> {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        let mut state = self.inner.state.lock();
        if matches!(*state, ChannelState::Connecting { .. }) {
            let abandoned = std::mem::replace(&mut *state, ChannelState::Disconnected);
            drop(state);
            drop(abandoned);
        }
    }
}

fn release(waiters: Vec<Waiter>, result: Result<(), ClientError>) {
    for tx in waiters {
        let _ = tx.send(result.clone());
    }
}

/// Move frames between the socket and the session until either side ends.
async fn pump(
    socket: Socket,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    inbound: broadcast::Sender<String>,
    cancel: CancellationToken,
    session: Weak<Inner>,
    epoch: u64,
) {
    let (mut write, mut read) = socket.split();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return;
            }
            msg = outbound.recv() => {
                let Some(msg) = msg else { break };
                if let Err(e) = write.send(msg).await {
                    debug!(err = %e, "channel write failed");
                    break;
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        // No subscribers is fine.
                        let _ = inbound.send(text.as_str().to_owned());
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("channel closed by backend");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(err = %e, "channel read failed");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
    mark_closed(&session, epoch);
}

fn mark_closed(session: &Weak<Inner>, epoch: u64) {
    let Some(inner) = session.upgrade() else { return };
    let mut state = inner.state.lock();
    if matches!(&*state, ChannelState::Connected(link) if link.epoch == epoch) {
        *state = ChannelState::Disconnected;
    }
}
