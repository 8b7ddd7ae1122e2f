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

//! BlueZ-backed RFCOMM platform.

use anyhow::Result;
use bluer::rfcomm::{Listener, Socket, SocketAddr, Stream};
use bluer::{Adapter, Address, Session};
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use tracing::{debug, info};

use super::address::PeerAddress;
use super::platform::{Link, ReadyProbe, RfcommListener, RfcommPlatform, RfcommSocket};
use crate::config::BluetoothConfig;

/// RFCOMM sockets provided by the kernel Bluetooth stack.
#[derive(Debug, Clone, Copy, Default)]
pub struct BluezPlatform;

impl BluezPlatform {
    pub fn new() -> Self {
        Self
    }
}

impl RfcommPlatform for BluezPlatform {
    type Socket = BluezSocket;

    fn create(&self) -> io::Result<BluezSocket> {
        let socket = Socket::new()?;
        Ok(BluezSocket { socket })
    }
}

/// Unbound or bound kernel RFCOMM socket.
pub struct BluezSocket {
    socket: Socket,
}

impl RfcommSocket for BluezSocket {
    type Listener = BluezListener;

    fn bind(&mut self, channel: u8) -> io::Result<()> {
        self.socket.bind(SocketAddr::new(Address::any(), channel))
    }

    fn listen(self, backlog: u32) -> io::Result<BluezListener> {
        let listener = self.socket.listen(backlog)?;
        Ok(BluezListener { listener })
    }
}

/// Listening kernel RFCOMM socket.
pub struct BluezListener {
    listener: Listener,
}

impl RfcommListener for BluezListener {
    async fn accept(&self) -> io::Result<(Link, PeerAddress)> {
        let (stream, remote) = self.listener.accept().await?;
        debug!("Accepted RFCOMM stream from {} on channel {}", remote.addr, remote.channel);
        Ok((stream_link(stream), PeerAddress::from(remote.addr)))
    }
}

fn stream_link(stream: Stream) -> Link {
    let probe = Box::new(FdProbe {
        fd: stream.as_raw_fd(),
    });
    Link::from_stream(stream, probe)
}

/// `FIONREAD` query on a socket descriptor.
///
/// The descriptor stays owned by the stream; the session drops the probe
/// before it releases the stream halves.
struct FdProbe {
    fd: RawFd,
}

impl ReadyProbe for FdProbe {
    fn bytes_ready(&self) -> io::Result<usize> {
        let mut pending: libc::c_int = 0;
        // SAFETY: `fd` is a live socket for as long as the probe exists and
        // FIONREAD writes a single c_int.
        let rc = unsafe { libc::ioctl(self.fd, libc::FIONREAD, &mut pending) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(pending.max(0) as usize)
    }
}

/// Powered adapter kept alive for the lifetime of the daemon.
pub struct AdapterGuard {
    _session: Session,
    adapter: Adapter,
}

impl AdapterGuard {
    /// Local adapter address.
    pub async fn address(&self) -> Result<Address> {
        Ok(self.adapter.address().await?)
    }
}

/// Power on the default adapter and make it reachable for pairing.
pub async fn prepare_adapter(config: &BluetoothConfig) -> Result<AdapterGuard> {
    info!("Initializing Bluetooth adapter...");

    let session = Session::new().await?;
    info!("BlueZ session created");

    let adapter = session.default_adapter().await?;
    info!("Using Bluetooth adapter: {}", adapter.name());

    if !adapter.is_powered().await? {
        info!("Powering on Bluetooth adapter...");
        adapter.set_powered(true).await?;
    }

    if !config.device_name.is_empty() {
        adapter.set_alias(config.device_name.clone()).await?;
        info!("Bluetooth name set to: {}", config.device_name);
    }

    adapter.set_discoverable(config.discoverable).await?;
    adapter.set_pairable(config.pairable).await?;
    info!(
        discoverable = config.discoverable,
        pairable = config.pairable,
        "Adapter {} ready",
        adapter.address().await?
    );

    Ok(AdapterGuard {
        _session: session,
        adapter,
    })
}
