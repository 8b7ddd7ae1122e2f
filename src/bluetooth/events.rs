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

//! Connection notifications delivered to the host.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Callback capability supplied by the host.
///
/// Notifications are invoked from whichever task observed the transition,
/// so implementations must return quickly.
pub trait EventSink: Send + Sync {
    /// A peer connected; `address` is the formatted peer address.
    fn on_connected(&self, address: &str);

    /// The active peer went away.
    fn on_disconnected(&self);
}

/// Replaceable, shared reference to the current [`EventSink`].
///
/// Clones share the same slot, so a server and all of its sessions see a
/// re-registration immediately. The last registration wins; notifications
/// already in flight may still reach the previous sink.
#[derive(Clone, Default)]
pub struct SinkSlot {
    inner: Arc<RwLock<Option<Arc<dyn EventSink>>>>,
}

impl SinkSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the registered sink.
    pub fn set(&self, sink: Arc<dyn EventSink>) {
        *self.inner.write() = Some(sink);
    }

    /// Whether a sink is registered.
    pub fn is_set(&self) -> bool {
        self.inner.read().is_some()
    }

    fn current(&self) -> Option<Arc<dyn EventSink>> {
        self.inner.read().clone()
    }

    pub(crate) fn notify_connected(&self, address: &str) {
        match self.current() {
            Some(sink) => sink.on_connected(address),
            None => debug!("No listener registered for connect of {}", address),
        }
    }

    pub(crate) fn notify_disconnected(&self) {
        match self.current() {
            Some(sink) => sink.on_disconnected(),
            None => debug!("No listener registered for disconnect"),
        }
    }
}

impl std::fmt::Debug for SinkSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkSlot")
            .field("registered", &self.is_set())
            .finish()
    }
}

/// Events emitted by a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Connection established.
    Connected { address: String },
    /// Connection closed.
    Disconnected,
}

/// Sink that forwards notifications into an mpsc channel.
pub struct ChannelSink {
    event_tx: mpsc::Sender<ConnectionEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver that drains it.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let (event_tx, event_rx) = mpsc::channel(capacity);
        (Self { event_tx }, event_rx)
    }

    fn emit(&self, event: ConnectionEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Dropping connection event: {}", e);
        }
    }
}

impl EventSink for ChannelSink {
    fn on_connected(&self, address: &str) {
        self.emit(ConnectionEvent::Connected {
            address: address.to_string(),
        });
    }

    fn on_disconnected(&self) {
        self.emit(ConnectionEvent::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_forwards_events() {
        let (sink, mut rx) = ChannelSink::new(4);
        let slot = SinkSlot::new();
        slot.set(Arc::new(sink));

        slot.notify_connected("BC:9A:78:56:34:12");
        slot.notify_disconnected();

        assert_eq!(
            rx.recv().await,
            Some(ConnectionEvent::Connected {
                address: "BC:9A:78:56:34:12".to_string()
            })
        );
        assert_eq!(rx.recv().await, Some(ConnectionEvent::Disconnected));
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let (first, mut first_rx) = ChannelSink::new(4);
        let (second, mut second_rx) = ChannelSink::new(4);
        let slot = SinkSlot::new();
        let shared = slot.clone();

        slot.set(Arc::new(first));
        shared.set(Arc::new(second));
        slot.notify_disconnected();

        assert_eq!(second_rx.recv().await, Some(ConnectionEvent::Disconnected));
        assert!(first_rx.try_recv().is_err());
    }

    #[test]
    fn test_empty_slot_is_silent() {
        let slot = SinkSlot::new();
        assert!(!slot.is_set());
        slot.notify_connected("00:00:00:00:00:00");
        slot.notify_disconnected();
    }
}
