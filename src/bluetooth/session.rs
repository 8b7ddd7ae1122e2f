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

//! A connected peer and its exactly-once disconnect path.

use parking_lot::Mutex as SyncMutex;
use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::address::PeerAddress;
use super::events::SinkSlot;
use super::platform::{Link, LinkReader, LinkWriter, ReadyProbe};
use crate::error::LinkError;

/// Liveness of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connected = 0,
    Disconnecting = 1,
    Disconnected = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Connected,
            1 => SessionState::Disconnecting,
            _ => SessionState::Disconnected,
        }
    }
}

/// Atomic Connected -> Disconnecting -> Disconnected transition.
///
/// Exactly one caller wins [`begin`](DisconnectGuard::begin); only that
/// caller may release resources and notify.
#[derive(Debug)]
pub struct DisconnectGuard {
    state: AtomicU8,
}

impl DisconnectGuard {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(SessionState::Connected as u8),
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn begin(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Connected as u8,
                SessionState::Disconnecting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn finish(&self) {
        self.state
            .store(SessionState::Disconnected as u8, Ordering::Release);
    }
}

/// One connected peer.
///
/// Shared as `Arc<Session>` between the host and an optional
/// [`ReceiveWorker`](super::ReceiveWorker). Reads and writes lock separate
/// halves, so a send never waits on a pending receive.
pub struct Session {
    peer: PeerAddress,
    guard: DisconnectGuard,
    closed: CancellationToken,
    reader: Mutex<Option<LinkReader>>,
    writer: Mutex<Option<LinkWriter>>,
    probe: SyncMutex<Option<Box<dyn ReadyProbe>>>,
    sink: SinkSlot,
}

impl Session {
    pub(crate) fn new(link: Link, peer: PeerAddress, sink: SinkSlot) -> Self {
        Self {
            peer,
            guard: DisconnectGuard::new(),
            closed: CancellationToken::new(),
            reader: Mutex::new(Some(link.reader)),
            writer: Mutex::new(Some(link.writer)),
            probe: SyncMutex::new(Some(link.probe)),
            sink,
        }
    }

    /// Address of the connected peer.
    pub fn peer(&self) -> PeerAddress {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        self.guard.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Write all of `data`, returning the number of bytes written.
    ///
    /// Any failure tears the session down through the disconnect path.
    pub async fn send(&self, data: &[u8]) -> Result<usize, LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        if data.is_empty() {
            return Ok(0);
        }

        let result = {
            let mut writer = tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Err(LinkError::NotConnected),
                writer = self.writer.lock() => writer,
            };
            let Some(writer) = writer.as_mut() else {
                return Err(LinkError::NotConnected);
            };
            tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Err(LinkError::NotConnected),
                result = write_flush(writer, data) => result,
            }
        };

        match result {
            Ok(()) => {
                debug!(peer = %self.peer, "Sent {} bytes", data.len());
                Ok(data.len())
            }
            Err(e) => {
                warn!(peer = %self.peer, "Write error: {}", e);
                self.handle_disconnect().await;
                Err(LinkError::WriteFailed(e))
            }
        }
    }

    /// Read up to `buf.len()` bytes, returning how many were read.
    ///
    /// End-of-stream and I/O errors tear the session down through the
    /// disconnect path. Fails fast with [`LinkError::NotConnected`] without
    /// touching the socket once disconnected.
    pub async fn receive(&self, buf: &mut [u8]) -> Result<usize, LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let result = {
            let mut reader = tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Err(LinkError::NotConnected),
                reader = self.reader.lock() => reader,
            };
            let Some(reader) = reader.as_mut() else {
                return Err(LinkError::NotConnected);
            };
            tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Err(LinkError::NotConnected),
                result = reader.read(buf) => result,
            }
        };

        match result {
            Ok(0) => {
                info!(peer = %self.peer, "Connection closed by remote");
                self.handle_disconnect().await;
                Err(LinkError::ReadFailed(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed the connection",
                )))
            }
            Ok(n) => {
                debug!(peer = %self.peer, "Received {} bytes", n);
                Ok(n)
            }
            Err(e) => {
                warn!(peer = %self.peer, "Read error: {}", e);
                self.handle_disconnect().await;
                Err(LinkError::ReadFailed(e))
            }
        }
    }

    /// Bytes that can be read without blocking.
    ///
    /// A hint only: 0 when disconnected or when the query fails.
    pub fn available(&self) -> usize {
        if !self.is_connected() {
            return 0;
        }
        let probe = self.probe.lock();
        match probe.as_ref().map(|p| p.bytes_ready()) {
            Some(Ok(n)) => n,
            Some(Err(e)) => {
                debug!(peer = %self.peer, "Bytes-ready query failed: {}", e);
                0
            }
            None => 0,
        }
    }

    /// Shut down the write half and drop both halves, which closes the
    /// socket once the last one is gone.
    ///
    /// Idempotent; only the first call has an effect.
    pub async fn close(&self) {
        self.handle_disconnect().await;
    }

    /// Tear the session down if it is still connected.
    ///
    /// Returns true for the single caller that performed the teardown and
    /// fired `on_disconnected`; every other caller returns false at once.
    pub async fn handle_disconnect(&self) -> bool {
        if !self.guard.begin() {
            return false;
        }

        // Wake any reader or writer parked on the socket so the halves can
        // be taken.
        self.closed.cancel();
        self.probe.lock().take();

        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!(peer = %self.peer, "Shutdown error: {}", e);
            }
        }
        self.reader.lock().await.take();

        self.guard.finish();
        info!(peer = %self.peer, "Session disconnected");
        self.sink.notify_disconnected();
        true
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.peer)
            .field("state", &self.state())
            .finish()
    }
}

async fn write_flush(writer: &mut LinkWriter, data: &[u8]) -> io::Result<()> {
    writer.write_all(data).await?;
    writer.flush().await
}
