//! Peekable stream wrapper.
//!
//! Wraps a byte stream with a read-ahead buffer so protocol handlers can
//! inspect bytes (the one-byte version probe, HTTP head scanning) without
//! consuming them. Reads drain the buffer before touching the underlying
//! stream; writes pass straight through.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

/// Initial capacity of the read-ahead buffer
const INITIAL_CAPACITY: usize = 8 * 1024;

/// A stream with a peekable read-ahead buffer.
///
/// Invariant: `peek(n)` never advances the read position; a subsequent
/// read returns the same bytes `peek` returned, in order.
#[derive(Debug)]
pub struct BufferedStream<S> {
    inner: S,
    buf: Vec<u8>,
    pos: usize,
}

impl<S> BufferedStream<S> {
    /// Wrap a stream with an empty read-ahead buffer
    pub fn new(inner: S) -> Self {
        BufferedStream {
            inner,
            buf: Vec::with_capacity(INITIAL_CAPACITY),
            pos: 0,
        }
    }

    /// Number of buffered bytes not yet consumed
    pub fn buffered(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Get a reference to the wrapped stream
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    fn compact(&mut self) {
        if self.pos == self.buf.len() {
            self.buf.clear();
            self.pos = 0;
        }
    }
}

impl<S: AsyncRead + Unpin> BufferedStream<S> {
    /// Fill the buffer to at least `n` bytes without consuming them and
    /// return everything buffered so far (which may be more than `n`).
    ///
    /// Fails with an `UnexpectedEof`-kind error if the stream ends before
    /// `n` bytes are available.
    pub async fn peek(&mut self, n: usize) -> io::Result<&[u8]> {
        let mut chunk = [0u8; 4096];
        while self.buffered() < n {
            let read = self.inner.read(&mut chunk).await?;
            if read == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed while peeking",
                ));
            }
            self.buf.extend_from_slice(&chunk[..read]);
        }
        Ok(&self.buf[self.pos..])
    }

    /// Read exactly `n` bytes, failing with an `UnexpectedEof`-kind error
    /// on a short read.
    pub async fn read_full(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let mut out = vec![0u8; n];
        self.read_exact(&mut out).await?;
        Ok(out)
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for BufferedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.pos < this.buf.len() {
            let n = out.remaining().min(this.buf.len() - this.pos);
            out.put_slice(&this.buf[this.pos..this.pos + n]);
            this.pos += n;
            this.compact();
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, out)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for BufferedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, data)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
