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

//! Background receive loop for a session.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::session::Session;
use crate::config::ReceiveConfig;
use crate::error::LinkError;

/// Lifecycle of a [`ReceiveWorker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => WorkerState::Running,
            2 => WorkerState::Stopping,
            _ => WorkerState::Idle,
        }
    }
}

struct WorkerTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Drains a session in a background task and forwards each chunk.
///
/// The worker and foreground `receive` calls compete for the same stream;
/// use one or the other for a given session.
pub struct ReceiveWorker {
    config: ReceiveConfig,
    state: Arc<AtomicU8>,
    task: Option<WorkerTask>,
}

impl ReceiveWorker {
    pub fn new(config: ReceiveConfig) -> Self {
        Self {
            config,
            state: Arc::new(AtomicU8::new(WorkerState::Idle as u8)),
            task: None,
        }
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }

    /// Start draining `session` into `chunk_tx`.
    ///
    /// A no-op while already running. Fails with
    /// [`LinkError::NotConnected`] if the session is gone.
    pub fn start(
        &mut self,
        session: Arc<Session>,
        chunk_tx: mpsc::Sender<Vec<u8>>,
    ) -> Result<(), LinkError> {
        if self.is_running() {
            warn!("Receive worker already running");
            return Ok(());
        }
        if !session.is_connected() {
            return Err(LinkError::NotConnected);
        }

        // A previous loop that exited on its own leaves a finished handle.
        self.task.take();

        let cancel = CancellationToken::new();
        self.state
            .store(WorkerState::Running as u8, Ordering::Release);
        let handle = tokio::spawn(receive_loop(
            session,
            chunk_tx,
            self.config.clone(),
            cancel.clone(),
            self.state.clone(),
        ));
        self.task = Some(WorkerTask { cancel, handle });
        info!("Receive worker started");
        Ok(())
    }

    /// Signal the loop to exit and wait until it has.
    ///
    /// Safe when the loop already exited on its own.
    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        if !task.handle.is_finished() {
            self.state
                .store(WorkerState::Stopping as u8, Ordering::Release);
        }
        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            warn!("Receive worker ended abnormally: {}", e);
        }
        self.state.store(WorkerState::Idle as u8, Ordering::Release);
        debug!("Receive worker stopped");
    }
}

impl Drop for ReceiveWorker {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel.cancel();
        }
    }
}

async fn receive_loop(
    session: Arc<Session>,
    chunk_tx: mpsc::Sender<Vec<u8>>,
    config: ReceiveConfig,
    cancel: CancellationToken,
    state: Arc<AtomicU8>,
) {
    let mut buf = vec![0u8; config.chunk_size];
    let yield_interval = Duration::from_millis(config.yield_interval_ms);
    let mut chunks: u64 = 0;

    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = session.receive(&mut buf) => result,
        };

        match result {
            Ok(n) => {
                let delivered = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = chunk_tx.send(buf[..n].to_vec()) => sent.is_ok(),
                };
                if !delivered {
                    debug!("Chunk receiver dropped, stopping receive worker");
                    break;
                }

                chunks += 1;
                if config.yield_every > 0 && chunks % config.yield_every as u64 == 0 {
                    tokio::time::sleep(yield_interval).await;
                }
            }
            Err(e) => {
                debug!("Receive worker read ended: {}", e);
                session.handle_disconnect().await;
                break;
            }
        }
    }

    state.store(WorkerState::Idle as u8, Ordering::Release);
    info!("Receive worker exited after {} chunks", chunks);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::address::PeerAddress;
    use crate::bluetooth::events::{EventSink, SinkSlot};
    use crate::bluetooth::platform::{Link, ReadyProbe};
    use std::io;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::{AsyncWriteExt, DuplexStream};

    struct NoProbe;

    impl ReadyProbe for NoProbe {
        fn bytes_ready(&self) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::Unsupported))
        }
    }

    #[derive(Default)]
    struct CountingSink {
        disconnects: AtomicUsize,
    }

    impl EventSink for CountingSink {
        fn on_connected(&self, _address: &str) {}

        fn on_disconnected(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn session_pair() -> (Arc<Session>, DuplexStream, Arc<CountingSink>) {
        let (client, server) = tokio::io::duplex(4096);
        let sink = Arc::new(CountingSink::default());
        let slot = SinkSlot::new();
        slot.set(sink.clone());
        let link = Link::from_stream(server, Box::new(NoProbe));
        (
            Arc::new(Session::new(link, PeerAddress::default(), slot)),
            client,
            sink,
        )
    }

    #[tokio::test]
    async fn test_worker_forwards_chunks() {
        let (session, mut client, _) = session_pair();
        let (tx, mut rx) = mpsc::channel(8);
        let mut worker = ReceiveWorker::new(ReceiveConfig::default());

        worker.start(session.clone(), tx).unwrap();
        assert!(worker.is_running());

        client.write_all(b"abc").await.unwrap();
        let mut received = Vec::new();
        while received.len() < 3 {
            received.extend(rx.recv().await.unwrap());
        }
        assert_eq!(received, b"abc");

        worker.stop().await;
        assert_eq!(worker.state(), WorkerState::Idle);
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_worker_exits_on_peer_close() {
        let (session, client, sink) = session_pair();
        let (tx, mut rx) = mpsc::channel(8);
        let mut worker = ReceiveWorker::new(ReceiveConfig::default());
        worker.start(session.clone(), tx).unwrap();

        drop(client);
        assert!(rx.recv().await.is_none());
        assert!(!session.is_connected());
        assert_eq!(worker.state(), WorkerState::Idle);
        assert_eq!(sink.disconnects.load(Ordering::SeqCst), 1);

        // Stopping after a self-exit is harmless.
        worker.stop().await;
        worker.stop().await;
    }

    #[tokio::test]
    async fn test_start_rejects_disconnected_session() {
        let (session, _client, _) = session_pair();
        session.close().await;
        let (tx, _rx) = mpsc::channel(1);
        let mut worker = ReceiveWorker::new(ReceiveConfig::default());
        assert!(matches!(
            worker.start(session, tx),
            Err(LinkError::NotConnected)
        ));
        assert_eq!(worker.state(), WorkerState::Idle);
    }

    #[tokio::test]
    async fn test_second_start_is_noop() {
        let (session, _client, _) = session_pair();
        let (tx, _rx) = mpsc::channel(1);
        let mut worker = ReceiveWorker::new(ReceiveConfig::default());
        worker.start(session.clone(), tx.clone()).unwrap();
        worker.start(session, tx).unwrap();
        assert!(worker.is_running());
        worker.stop().await;
    }

    #[tokio::test]
    async fn test_dropped_receiver_stops_worker() {
        let (session, mut client, _) = session_pair();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut worker = ReceiveWorker::new(ReceiveConfig::default());
        worker.start(session.clone(), tx).unwrap();

        client.write_all(b"x").await.unwrap();
        worker.stop().await;
        assert_eq!(worker.state(), WorkerState::Idle);
        assert!(session.is_connected());
    }
}
