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

//! Bluetooth communication module.
//!
//! Single-peer RFCOMM server: socket lifecycle, connected sessions with an
//! exactly-once disconnect path, and an optional background receive worker.

mod address;
mod bluez;
mod events;
mod host;
pub mod memory;
mod platform;
mod server;
mod session;
mod stream;
mod worker;

pub use address::{ParseAddressError, PeerAddress};
pub use bluez::{prepare_adapter, AdapterGuard, BluezPlatform};
pub use events::{ChannelSink, ConnectionEvent, EventSink, SinkSlot};
pub use host::{serve_once, BluetoothHost, HostConfig, IO_FAILED};
pub use platform::{
    Link, LinkReader, LinkWriter, ReadyProbe, RfcommListener, RfcommPlatform, RfcommSocket,
};
pub use server::{ServerState, SocketServer};
pub use session::{DisconnectGuard, Session, SessionState};
pub use stream::SessionStream;
pub use worker::{ReceiveWorker, WorkerState};

/// Lowest valid RFCOMM channel.
pub const MIN_CHANNEL: u8 = 1;

/// Highest valid RFCOMM channel.
pub const MAX_CHANNEL: u8 = 30;

/// RFCOMM channel used when none is configured.
pub const DEFAULT_CHANNEL: u8 = 1;

/// Only one peer is served at a time.
pub const LISTEN_BACKLOG: u32 = 1;

/// Largest single transfer the peer application negotiates.
pub const MAX_TRANSFER_SIZE: usize = 517;
