//! In-memory byte sink and replay source.
//!
//! [`MemoryWriter`] collects the chunks of one segment as they come out of the
//! segment pipeline and hands them back as a single contiguous buffer.
//! [`MemoryReader`] replays a list of finished buffers, in order, to a consumer
//! such as a file or a child process' stdin.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use futures::Stream;
use tokio::io::{AsyncRead, ReadBuf};

/// Append-only sink that accumulates byte chunks.
#[derive(Debug)]
pub struct MemoryWriter {
    /// `None` once the contents have been taken with [`MemoryWriter::data`].
    chunks: Option<Vec<Bytes>>,
    len: usize,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self {
            chunks: Some(Vec::new()),
            len: 0,
        }
    }

    /// Append a chunk. Empty chunks are ignored.
    pub fn write(&mut self, chunk: Bytes) -> io::Result<()> {
        let chunks = self
            .chunks
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "memory writer destroyed"))?;
        if chunk.is_empty() {
            return Ok(());
        }
        self.len += chunk.len();
        chunks.push(chunk);
        Ok(())
    }

    /// Total number of bytes written so far.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_destroyed(&self) -> bool {
        self.chunks.is_none()
    }

    /// Take the written bytes as one contiguous buffer and destroy the writer.
    ///
    /// Returns `None` if the data has already been taken.
    pub fn data(&mut self) -> Option<Bytes> {
        let mut chunks = self.chunks.take()?;
        let len = std::mem::replace(&mut self.len, 0);
        Some(match chunks.len() {
            0 => Bytes::new(),
            1 => chunks.pop().unwrap_or_default(),
            _ => concat(&chunks, len),
        })
    }

    /// Copy the written bytes without destroying the writer.
    pub fn snapshot(&self) -> Option<Bytes> {
        self.chunks.as_ref().map(|chunks| concat(chunks, self.len))
    }
}

impl Default for MemoryWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn concat(chunks: &[Bytes], len: usize) -> Bytes {
    let mut out = BytesMut::with_capacity(len);
    for chunk in chunks {
        out.extend_from_slice(chunk);
    }
    out.freeze()
}

/// Read source replaying a sequence of pre-built buffers.
#[derive(Debug, Default)]
pub struct MemoryReader {
    buffers: VecDeque<Bytes>,
}

impl MemoryReader {
    pub fn new(buffers: Vec<Bytes>) -> Self {
        Self {
            buffers: buffers.into_iter().filter(|b| !b.is_empty()).collect(),
        }
    }

    /// Bytes not yet handed out.
    pub fn remaining(&self) -> usize {
        self.buffers.iter().map(Bytes::len).sum()
    }
}

impl From<Bytes> for MemoryReader {
    fn from(buffer: Bytes) -> Self {
        Self::new(vec![buffer])
    }
}

impl AsyncRead for MemoryReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        while buf.remaining() > 0 {
            let Some(front) = this.buffers.front_mut() else {
                break;
            };
            let n = front.len().min(buf.remaining());
            buf.put_slice(&front[..n]);
            front.advance(n);
            if front.is_empty() {
                this.buffers.pop_front();
            }
        }
        Poll::Ready(Ok(()))
    }
}

impl Stream for MemoryReader {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(self.get_mut().buffers.pop_front().map(Ok))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.buffers.len(), Some(self.buffers.len()))
    }
}
