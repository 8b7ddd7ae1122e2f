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

//! In-process RFCOMM platform over `tokio::io::duplex`.
//!
//! Channels are a per-platform namespace, so independent platforms can run
//! side by side in the same process.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tracing::debug;

use super::address::PeerAddress;
use super::platform::{Link, ReadyProbe, RfcommListener, RfcommPlatform, RfcommSocket};
use super::{MAX_CHANNEL, MIN_CHANNEL};

/// Pipe capacity per direction.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Lifecycle stage at which the platform should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Create,
    Bind,
    Listen,
    Accept,
}

struct Pending {
    link: Link,
    peer: PeerAddress,
}

#[derive(Default)]
struct Registry {
    listeners: Mutex<HashMap<u8, mpsc::Sender<Pending>>>,
    fail_at: Mutex<Option<FailAt>>,
    ready_hint: Arc<Mutex<Option<usize>>>,
}

impl Registry {
    fn should_fail(&self, stage: FailAt) -> bool {
        *self.fail_at.lock() == Some(stage)
    }
}

/// In-memory RFCOMM platform.
#[derive(Clone, Default)]
pub struct MemoryPlatform {
    registry: Arc<Registry>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation at `stage` fail.
    pub fn fail_at(&self, stage: FailAt) {
        *self.registry.fail_at.lock() = Some(stage);
    }

    /// Stop injecting failures.
    pub fn clear_failure(&self) {
        *self.registry.fail_at.lock() = None;
    }

    /// Value reported by the bytes-ready probe; `None` makes the query fail.
    pub fn set_ready_hint(&self, hint: Option<usize>) {
        *self.registry.ready_hint.lock() = hint;
    }

    /// Whether a listener is accepting on `channel`.
    pub fn is_listening(&self, channel: u8) -> bool {
        self.registry.listeners.lock().contains_key(&channel)
    }

    /// Connect a client to `channel`, returning the client end of the pipe.
    pub async fn connect(&self, channel: u8, peer: PeerAddress) -> io::Result<DuplexStream> {
        let tx = self
            .registry
            .listeners
            .lock()
            .get(&channel)
            .cloned()
            .ok_or_else(|| io::Error::from(io::ErrorKind::ConnectionRefused))?;

        let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
        let probe = Box::new(HintProbe {
            hint: self.registry.ready_hint.clone(),
        });
        tx.send(Pending {
            link: Link::from_stream(server, probe),
            peer,
        })
        .await
        .map_err(|_| io::Error::from(io::ErrorKind::ConnectionRefused))?;

        debug!("Memory client {} connected to channel {}", peer, channel);
        Ok(client)
    }
}

impl RfcommPlatform for MemoryPlatform {
    type Socket = MemorySocket;

    fn create(&self) -> io::Result<MemorySocket> {
        if self.registry.should_fail(FailAt::Create) {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "address family not supported",
            ));
        }
        Ok(MemorySocket {
            registry: self.registry.clone(),
            channel: None,
        })
    }
}

/// Memory socket before listening.
pub struct MemorySocket {
    registry: Arc<Registry>,
    channel: Option<u8>,
}

impl RfcommSocket for MemorySocket {
    type Listener = MemoryListener;

    fn bind(&mut self, channel: u8) -> io::Result<()> {
        if self.registry.should_fail(FailAt::Bind) {
            return Err(io::Error::from(io::ErrorKind::AddrNotAvailable));
        }
        if !(MIN_CHANNEL..=MAX_CHANNEL).contains(&channel) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("channel {} out of range", channel),
            ));
        }
        if self.registry.listeners.lock().contains_key(&channel) {
            return Err(io::Error::from(io::ErrorKind::AddrInUse));
        }
        self.channel = Some(channel);
        Ok(())
    }

    fn listen(self, backlog: u32) -> io::Result<MemoryListener> {
        if self.registry.should_fail(FailAt::Listen) {
            return Err(io::Error::from(io::ErrorKind::InvalidInput));
        }
        let channel = self
            .channel
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "socket is not bound"))?;

        let (tx, rx) = mpsc::channel(backlog.max(1) as usize);
        {
            let mut listeners = self.registry.listeners.lock();
            if listeners.contains_key(&channel) {
                return Err(io::Error::from(io::ErrorKind::AddrInUse));
            }
            listeners.insert(channel, tx);
        }

        Ok(MemoryListener {
            registry: self.registry,
            channel,
            rx: tokio::sync::Mutex::new(rx),
        })
    }
}

/// Memory socket in the listening state.
pub struct MemoryListener {
    registry: Arc<Registry>,
    channel: u8,
    rx: tokio::sync::Mutex<mpsc::Receiver<Pending>>,
}

impl RfcommListener for MemoryListener {
    async fn accept(&self) -> io::Result<(Link, PeerAddress)> {
        if self.registry.should_fail(FailAt::Accept) {
            return Err(io::Error::from(io::ErrorKind::ConnectionAborted));
        }
        let pending = self
            .rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| io::Error::from(io::ErrorKind::ConnectionAborted))?;
        Ok((pending.link, pending.peer))
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.registry.listeners.lock().remove(&self.channel);
    }
}

struct HintProbe {
    hint: Arc<Mutex<Option<usize>>>,
}

impl ReadyProbe for HintProbe {
    fn bytes_ready(&self) -> io::Result<usize> {
        (*self.hint.lock()).ok_or_else(|| io::Error::from(io::ErrorKind::Unsupported))
    }
}
