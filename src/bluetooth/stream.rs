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

//! Byte-stream view of a session for transfer protocols.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

use super::session::Session;
use crate::error::LinkError;

type ReadFuture = Pin<Box<dyn Future<Output = Result<Vec<u8>, LinkError>> + Send>>;
type WriteFuture = Pin<Box<dyn Future<Output = Result<usize, LinkError>> + Send>>;
type CloseFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// [`AsyncRead`] + [`AsyncWrite`] over a [`Session`].
///
/// Reads go through [`Session::receive`] and writes through
/// [`Session::send`], so a failure still runs the session's exactly-once
/// disconnect path. A disconnected or failed session reads as EOF.
pub struct SessionStream {
    session: Arc<Session>,
    read: Option<ReadFuture>,
    pending: Vec<u8>,
    write: Option<WriteFuture>,
    close: Option<CloseFuture>,
}

impl SessionStream {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            read: None,
            pending: Vec::new(),
            write: None,
            close: None,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Bytes readable without waiting: anything already received plus the
    /// socket's bytes-ready hint.
    pub fn available(&self) -> usize {
        self.pending.len() + self.session.available()
    }

    fn drain_pending(&mut self, buf: &mut ReadBuf<'_>) {
        let n = self.pending.len().min(buf.remaining());
        buf.put_slice(&self.pending[..n]);
        self.pending.drain(..n);
    }
}

impl Session {
    /// Wrap this session in a [`SessionStream`].
    pub fn stream(self: &Arc<Self>) -> SessionStream {
        SessionStream::new(self.clone())
    }
}

fn read_chunk(session: Arc<Session>, len: usize) -> ReadFuture {
    Box::pin(async move {
        let mut chunk = vec![0u8; len];
        let n = session.receive(&mut chunk).await?;
        chunk.truncate(n);
        Ok(chunk)
    })
}

fn write_chunk(session: Arc<Session>, data: Vec<u8>) -> WriteFuture {
    Box::pin(async move { session.send(&data).await })
}

fn into_io_error(err: LinkError) -> io::Error {
    match err {
        LinkError::ReadFailed(e) | LinkError::WriteFailed(e) => e,
        LinkError::NotConnected => {
            io::Error::new(io::ErrorKind::NotConnected, "session is not connected")
        }
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}

impl AsyncRead for SessionStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        if !this.pending.is_empty() {
            this.drain_pending(buf);
            return Poll::Ready(Ok(()));
        }
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        if this.read.is_none() && !this.session.is_connected() {
            return Poll::Ready(Ok(()));
        }

        let len = buf.remaining();
        let session = &this.session;
        let fut = this
            .read
            .get_or_insert_with(|| read_chunk(session.clone(), len));
        let result = ready!(fut.as_mut().poll(cx));
        this.read = None;

        match result {
            Ok(chunk) => {
                this.pending = chunk;
                this.drain_pending(buf);
            }
            Err(e) => debug!(peer = %this.session.peer(), "Stream read ended: {}", e),
        }
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for SessionStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        if this.write.is_none() && data.is_empty() {
            return Poll::Ready(Ok(0));
        }

        // An in-flight write keeps the bytes it was started with; callers
        // retry with the same buffer after Pending.
        let session = &this.session;
        let fut = this
            .write
            .get_or_insert_with(|| write_chunk(session.clone(), data.to_vec()));
        let result = ready!(fut.as_mut().poll(cx));
        this.write = None;
        Poll::Ready(result.map_err(into_io_error))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let Some(fut) = this.write.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let result = ready!(fut.as_mut().poll(cx));
        this.write = None;
        Poll::Ready(result.map(|_| ()).map_err(into_io_error))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if let Err(e) = ready!(self.as_mut().poll_flush(cx)) {
            debug!("Write pending at shutdown failed: {}", e);
        }

        let this = &mut *self;
        let session = &this.session;
        let fut = this.close.get_or_insert_with(|| {
            let session = session.clone();
            Box::pin(async move { session.close().await })
        });
        ready!(fut.as_mut().poll(cx));
        this.close = None;
        Poll::Ready(Ok(()))
    }
}

impl std::fmt::Debug for SessionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStream")
            .field("session", &self.session)
            .field("pending", &self.pending.len())
            .finish()
    }
}
