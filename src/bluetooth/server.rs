// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! RFCOMM server socket lifecycle.

use parking_lot::Mutex;
use std::io;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::address::PeerAddress;
use super::events::SinkSlot;
use super::platform::{RfcommListener, RfcommPlatform, RfcommSocket};
use super::session::Session;
use super::{LISTEN_BACKLOG, MAX_CHANNEL, MIN_CHANNEL};
use crate::error::LinkError;

/// Lifecycle stage of a [`SocketServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Bound,
    Listening,
    Closed,
}

enum Stage<P: RfcommPlatform> {
    Created(P::Socket),
    Bound(P::Socket, u8),
    Listening(Arc<<P::Socket as RfcommSocket>::Listener>, u8),
    Closed,
}

impl<P: RfcommPlatform> Stage<P> {
    fn state(&self) -> ServerState {
        match self {
            Stage::Created(_) => ServerState::Created,
            Stage::Bound(..) => ServerState::Bound,
            Stage::Listening(..) => ServerState::Listening,
            Stage::Closed => ServerState::Closed,
        }
    }
}

fn out_of_order(expected: &str, actual: ServerState) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("server must be {} but is {:?}", expected, actual),
    )
}

/// Owns the listening socket and hands out one [`Session`] at a time.
pub struct SocketServer<P: RfcommPlatform> {
    stage: Mutex<Stage<P>>,
    closed: CancellationToken,
    current: Mutex<Weak<Session>>,
    sink: SinkSlot,
}

impl<P: RfcommPlatform> SocketServer<P> {
    /// Open a new RFCOMM stream socket.
    pub fn create(platform: &P, sink: SinkSlot) -> Result<Self, LinkError> {
        let socket = platform.create().map_err(|e| {
            error!("Socket creation failed: {}", e);
            LinkError::SocketCreateFailed(e)
        })?;
        info!("RFCOMM socket created");

        Ok(Self {
            stage: Mutex::new(Stage::Created(socket)),
            closed: CancellationToken::new(),
            current: Mutex::new(Weak::new()),
            sink,
        })
    }

    pub fn state(&self) -> ServerState {
        self.stage.lock().state()
    }

    /// Channel the server is bound to, once bound.
    pub fn channel(&self) -> Option<u8> {
        match &*self.stage.lock() {
            Stage::Bound(_, channel) | Stage::Listening(_, channel) => Some(*channel),
            _ => None,
        }
    }

    /// Bind to the wildcard local address on `channel` (1-30).
    pub fn bind(&self, channel: u8) -> Result<(), LinkError> {
        let bind_err = |source: io::Error| LinkError::BindFailed { channel, source };

        if !(MIN_CHANNEL..=MAX_CHANNEL).contains(&channel) {
            return Err(bind_err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("channel must be {}-{}", MIN_CHANNEL, MAX_CHANNEL),
            )));
        }

        let mut stage = self.stage.lock();
        match std::mem::replace(&mut *stage, Stage::Closed) {
            Stage::Created(mut socket) => {
                if let Err(e) = socket.bind(channel) {
                    error!("Bind to channel {} failed: {}", channel, e);
                    *stage = Stage::Created(socket);
                    return Err(bind_err(e));
                }
                *stage = Stage::Bound(socket, channel);
                info!("RFCOMM socket bound to channel {}", channel);
                Ok(())
            }
            other => {
                let actual = other.state();
                *stage = other;
                Err(bind_err(out_of_order("created", actual)))
            }
        }
    }

    /// Enter the listening state with a backlog of one.
    pub fn listen(&self) -> Result<(), LinkError> {
        let mut stage = self.stage.lock();
        match std::mem::replace(&mut *stage, Stage::Closed) {
            Stage::Bound(socket, channel) => {
                let listener = socket.listen(LISTEN_BACKLOG).map_err(|e| {
                    error!("Listen failed: {}", e);
                    LinkError::ListenFailed(e)
                })?;
                *stage = Stage::Listening(Arc::new(listener), channel);
                info!("RFCOMM server listening on channel {}", channel);
                Ok(())
            }
            other => {
                let actual = other.state();
                *stage = other;
                Err(LinkError::ListenFailed(out_of_order("bound", actual)))
            }
        }
    }

    /// Wait for a peer and return its session.
    ///
    /// A session this server produced earlier that is still connected is
    /// closed first. Fires `on_connected` once on success.
    pub async fn accept(&self) -> Result<(Arc<Session>, PeerAddress), LinkError> {
        let listener = match &*self.stage.lock() {
            Stage::Listening(listener, _) => listener.clone(),
            other => {
                return Err(LinkError::AcceptFailed(out_of_order(
                    "listening",
                    other.state(),
                )))
            }
        };

        let previous = self.current.lock().upgrade();
        if let Some(previous) = previous {
            if previous.is_connected() {
                info!("Closing previous session with {}", previous.peer());
                previous.close().await;
            }
        }

        info!("Waiting for connections...");
        let accepted = tokio::select! {
            biased;
            _ = self.closed.cancelled() => {
                return Err(LinkError::AcceptFailed(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "server closed",
                )));
            }
            accepted = listener.accept() => accepted,
        };
        let (link, peer) = accepted.map_err(|e| {
            error!("Accept error: {}", e);
            LinkError::AcceptFailed(e)
        })?;

        let session = Arc::new(Session::new(link, peer, self.sink.clone()));
        *self.current.lock() = Arc::downgrade(&session);

        let address = peer.to_string();
        info!("Connection from: {}", address);
        self.sink.notify_connected(&address);

        Ok((session, peer))
    }

    /// Release the listening socket. Idempotent; wakes a pending accept.
    pub fn close(&self) {
        let previous = std::mem::replace(&mut *self.stage.lock(), Stage::Closed);
        self.closed.cancel();
        if previous.state() != ServerState::Closed {
            info!("RFCOMM server closed");
        }
    }
}

impl<P: RfcommPlatform> Drop for SocketServer<P> {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}
