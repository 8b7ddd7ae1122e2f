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

//! Platform socket provider.
//!
//! The server and session talk to the Bluetooth stack only through these
//! traits, so the same lifecycle runs over BlueZ in production and over an
//! in-memory pipe in tests.

use std::future::Future;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

use super::address::PeerAddress;

/// Boxed read half of a connected link.
pub type LinkReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed write half of a connected link.
pub type LinkWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Non-blocking query of bytes buffered on a connected socket.
pub trait ReadyProbe: Send + Sync {
    /// Number of bytes that can be read without blocking.
    fn bytes_ready(&self) -> io::Result<usize>;
}

/// A connected peer stream, split for concurrent send and receive.
pub struct Link {
    pub reader: LinkReader,
    pub writer: LinkWriter,
    pub probe: Box<dyn ReadyProbe>,
}

impl Link {
    /// Split a bidirectional stream into a link.
    pub fn from_stream<S>(stream: S, probe: Box<dyn ReadyProbe>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            probe,
        }
    }
}

/// Factory for RFCOMM sockets.
pub trait RfcommPlatform: Send + Sync + 'static {
    /// The unbound socket type produced by [`create`](RfcommPlatform::create).
    type Socket: RfcommSocket;

    /// Open a new RFCOMM stream socket.
    fn create(&self) -> io::Result<Self::Socket>;
}

/// A created but not yet listening RFCOMM socket.
pub trait RfcommSocket: Send + 'static {
    /// The listener produced by [`listen`](RfcommSocket::listen).
    type Listener: RfcommListener;

    /// Bind to the wildcard local address on `channel`.
    fn bind(&mut self, channel: u8) -> io::Result<()>;

    /// Enter the listening state.
    fn listen(self, backlog: u32) -> io::Result<Self::Listener>;
}

/// A listening RFCOMM socket.
pub trait RfcommListener: Send + Sync + 'static {
    /// Wait for the next peer.
    fn accept(&self) -> impl Future<Output = io::Result<(Link, PeerAddress)>> + Send + '_;
}
