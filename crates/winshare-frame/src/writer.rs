use std::io::{ErrorKind, Write};
use std::thread;
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use tracing::{debug, trace};

use crate::codec::{encode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const STALL_BACKOFF: Duration = Duration::from_millis(1);

/// Outcome of [`FrameWriter::flush_pending`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    /// The outbound queue is empty.
    Drained,
    /// The stream stopped accepting bytes; this many are still queued.
    Partial { remaining: usize },
}

/// The single writer for a shared stream.
///
/// Frames are encoded whole into one outbound queue, so the bytes of two
/// frames can never interleave no matter how the socket splits writes.
pub struct FrameWriter<T> {
    inner: T,
    pending: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            pending: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode a frame onto the outbound queue without writing.
    pub fn queue(&mut self, channel: u16, payload: &[u8]) -> Result<()> {
        let max = self.config.effective_max_payload();
        if payload.len() > max {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }
        encode_frame(channel, payload, &mut self.pending)?;
        trace!(channel, len = payload.len(), queued = self.pending.len(), "frame queued");
        Ok(())
    }

    /// Queue an already built frame.
    pub fn queue_frame(&mut self, frame: &Frame) -> Result<()> {
        self.queue(frame.channel, frame.payload.as_ref())
    }

    /// Write as much of the queue as the stream accepts.
    ///
    /// A would-block write is not an error: it yields `Flush::Partial` and
    /// the caller retries when the stream is writable.
    pub fn flush_pending(&mut self) -> Result<Flush> {
        while !self.pending.is_empty() {
            match self.inner.write(&self.pending) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => self.pending.advance(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    return Ok(Flush::Partial {
                        remaining: self.pending.len(),
                    });
                }
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        self.flush()?;
        Ok(Flush::Drained)
    }

    /// Encode and send a payload on a channel (blocking).
    ///
    /// Anything queued earlier goes out first.
    pub fn send(&mut self, channel: u16, payload: &[u8]) -> Result<()> {
        self.queue(channel, payload)?;
        self.drain()
    }

    /// Write a complete frame (blocking).
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send(frame.channel, frame.payload.as_ref())
    }

    /// Keep flushing until the queue is empty.
    ///
    /// While the stream takes nothing the writer backs off; once it has
    /// taken nothing for the configured `write_timeout` this fails with
    /// `TimedOut` and the unsent bytes stay queued.
    pub fn drain(&mut self) -> Result<()> {
        let mut stalled_since: Option<Instant> = None;
        let mut last_remaining = self.pending.len();
        loop {
            let remaining = match self.flush_pending()? {
                Flush::Drained => return Ok(()),
                Flush::Partial { remaining } => remaining,
            };
            if remaining < last_remaining {
                last_remaining = remaining;
                stalled_since = None;
                thread::yield_now();
                continue;
            }
            let since = *stalled_since.get_or_insert_with(Instant::now);
            if let Some(timeout) = self.config.write_timeout {
                if since.elapsed() >= timeout {
                    debug!(remaining, ?timeout, "drain stalled past write timeout");
                    return Err(FrameError::Io(std::io::Error::new(
                        ErrorKind::TimedOut,
                        format!("stream accepted no bytes for {timeout:?}, {remaining} still queued"),
                    )));
                }
            }
            thread::sleep(STALL_BACKOFF);
        }
    }

    fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Bytes waiting in the outbound queue.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream. Queued bytes are lost.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}
