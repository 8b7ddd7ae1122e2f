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

//! Host-facing link API.
//!
//! Mirrors the call surface a host application binds to: integer status
//! codes for server startup, negative sentinels for failed transfers and a
//! replaceable listener.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::events::{EventSink, SinkSlot};
use super::platform::RfcommPlatform;
use super::server::SocketServer;
use super::session::Session;
use super::stream::SessionStream;
use super::worker::ReceiveWorker;
use crate::config::ReceiveConfig;
use crate::error::{LinkError, STATUS_OK};

/// Sentinel returned by [`BluetoothHost::read`] and [`BluetoothHost::send`]
/// on failure.
pub const IO_FAILED: isize = -1;

/// Link settings for a [`BluetoothHost`].
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub channel: u8,
    pub receive: ReceiveConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            channel: super::DEFAULT_CHANNEL,
            receive: ReceiveConfig::default(),
        }
    }
}

/// Single-peer link owned by the host application.
pub struct BluetoothHost<P: RfcommPlatform> {
    platform: P,
    config: HostConfig,
    sink: SinkSlot,
    server: Option<SocketServer<P>>,
    session: Option<Arc<Session>>,
    worker: ReceiveWorker,
}

impl<P: RfcommPlatform> BluetoothHost<P> {
    pub fn new(platform: P, config: HostConfig) -> Self {
        let worker = ReceiveWorker::new(config.receive.clone());
        Self {
            platform,
            config,
            sink: SinkSlot::new(),
            server: None,
            session: None,
            worker,
        }
    }

    /// Register the listener for connect and disconnect notifications.
    ///
    /// Replaces any previous listener, including for the live session.
    pub fn set_listener(&self, sink: Arc<dyn EventSink>) {
        self.sink.set(sink);
    }

    /// Create, bind, listen and accept one peer.
    ///
    /// Returns 0 on success, or -1/-2/-3/-4 for a create, bind, listen or
    /// accept failure. Any previous server and session are torn down first.
    pub async fn create_server(&mut self) -> i32 {
        self.close().await;

        match self.start_server().await {
            Ok(()) => STATUS_OK,
            Err(e) => {
                error!("Server startup failed: {}", e);
                e.status_code()
            }
        }
    }

    async fn start_server(&mut self) -> Result<(), LinkError> {
        let server = SocketServer::create(&self.platform, self.sink.clone())?;
        server.bind(self.config.channel)?;
        server.listen()?;

        let server = self.server.insert(server);
        let (session, _peer) = server.accept().await?;
        self.session = Some(session);
        Ok(())
    }

    /// Start the background receive worker on the current session.
    ///
    /// Returns the chunk receiver, or `None` when there is no connected
    /// session or the worker is already running.
    pub fn start_receiving(&mut self) -> Option<mpsc::Receiver<Vec<u8>>> {
        let session = self.session.as_ref().filter(|s| s.is_connected())?.clone();
        if self.worker.is_running() {
            warn!("start_receiving called while the worker is running");
            return None;
        }

        let (tx, rx) = mpsc::channel(self.config.receive.queue_depth);
        match self.worker.start(session, tx) {
            Ok(()) => Some(rx),
            Err(e) => {
                warn!("Failed to start receive worker: {}", e);
                None
            }
        }
    }

    /// Read into `buf`; returns the byte count or [`IO_FAILED`].
    pub async fn read(&self, buf: &mut [u8]) -> isize {
        let Some(session) = &self.session else {
            return IO_FAILED;
        };
        match session.receive(buf).await {
            Ok(n) => n as isize,
            Err(_) => IO_FAILED,
        }
    }

    /// Send all of `data`; returns the byte count or [`IO_FAILED`].
    pub async fn send(&self, data: &[u8]) -> isize {
        let Some(session) = &self.session else {
            return IO_FAILED;
        };
        match session.send(data).await {
            Ok(n) => n as isize,
            Err(_) => IO_FAILED,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_connected())
    }

    /// Buffered byte count hint; 0 when nothing is connected.
    pub fn available(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.available())
    }

    /// The live session, for callers that want the typed API.
    pub fn session(&self) -> Option<Arc<Session>> {
        self.session.clone()
    }

    /// Byte-stream view of the current session.
    pub fn stream(&self) -> Option<SessionStream> {
        self.session.as_ref().map(Session::stream)
    }

    /// Stop the worker, close the session and release the server.
    ///
    /// Safe to call any number of times.
    pub async fn close(&mut self) {
        self.worker.stop().await;
        if let Some(session) = self.session.take() {
            session.close().await;
        }
        if let Some(server) = self.server.take() {
            server.close();
        }
    }
}

/// Combined accept-read-close flow.
///
/// Waits for one peer on `channel`, performs a single read into `buf` and
/// releases everything. Returns the number of bytes read, 0 when the peer
/// disconnected before sending anything.
pub async fn serve_once<P: RfcommPlatform>(
    platform: &P,
    channel: u8,
    buf: &mut [u8],
) -> Result<usize, LinkError> {
    let server = SocketServer::create(platform, SinkSlot::new())?;
    server.bind(channel)?;
    server.listen()?;
    let (session, peer) = server.accept().await?;

    let read = match session.receive(buf).await {
        Ok(n) => n,
        Err(e) => {
            info!("Single-shot read from {} ended: {}", peer, e);
            0
        }
    };

    session.close().await;
    server.close();
    Ok(read)
}
