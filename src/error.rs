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

//! Error types for the link layer and the pairing agent.

use std::io;
use thiserror::Error;

/// Status code reported to the host for a successful server start.
pub const STATUS_OK: i32 = 0;

/// Errors produced by the server, session and pairing agent.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The RFCOMM socket could not be opened.
    #[error("failed to create RFCOMM socket: {0}")]
    SocketCreateFailed(#[source] io::Error),

    /// The socket could not be bound to the requested channel.
    #[error("failed to bind RFCOMM channel {channel}: {source}")]
    BindFailed {
        channel: u8,
        #[source]
        source: io::Error,
    },

    /// The bound socket could not enter the listening state.
    #[error("failed to listen on RFCOMM socket: {0}")]
    ListenFailed(#[source] io::Error),

    /// Waiting for a peer failed or the server was closed.
    #[error("failed to accept RFCOMM connection: {0}")]
    AcceptFailed(#[source] io::Error),

    /// The session is already disconnected.
    #[error("session is not connected")]
    NotConnected,

    /// A read returned end-of-stream or an I/O error.
    #[error("read failed: {0}")]
    ReadFailed(#[source] io::Error),

    /// A write returned zero bytes or an I/O error.
    #[error("write failed: {0}")]
    WriteFailed(#[source] io::Error),

    /// The system bus is unreachable.
    #[error("failed to connect to the system bus: {0}")]
    BusConnectionFailed(String),

    /// BlueZ refused one of the agent registration calls.
    #[error("agent registration failed during {step}: {message}")]
    AgentRegistrationFailed { step: &'static str, message: String },
}

impl LinkError {
    /// Numeric status handed back across the host boundary.
    ///
    /// Server startup stages map to -1..-4; every per-call failure collapses
    /// to -1 because the host only tests for a negative result there.
    pub fn status_code(&self) -> i32 {
        match self {
            LinkError::SocketCreateFailed(_) => -1,
            LinkError::BindFailed { .. } => -2,
            LinkError::ListenFailed(_) => -3,
            LinkError::AcceptFailed(_) => -4,
            _ => -1,
        }
    }
}
