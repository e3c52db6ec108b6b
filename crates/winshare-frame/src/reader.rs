use std::collections::VecDeque;
use std::io::{ErrorKind, Read};

use crate::codec::{Frame, FrameConfig, FrameDecoder};
use crate::error::{FrameError, Result};

const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Outcome of one [`FrameReader::fill`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// This many bytes were read and decoded.
    Data(usize),
    /// Nothing available right now.
    WouldBlock,
}

/// Reads frames from any `Read` stream.
///
/// Works for blocking streams via [`read_frame`](Self::read_frame) and for
/// non-blocking ones via [`fill`](Self::fill) + [`next_ready`](Self::next_ready),
/// which is how the session loop drives it.
pub struct FrameReader<T> {
    inner: T,
    decoder: FrameDecoder,
    ready: VecDeque<Frame>,
    chunk: Box<[u8]>,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(config.effective_max_payload()),
            ready: VecDeque::new(),
            chunk: vec![0u8; READ_CHUNK_SIZE].into_boxed_slice(),
            config,
        }
    }

    /// Perform one read and decode whatever arrived.
    ///
    /// EOF is `ConnectionClosed`, even between frames: the shared stream has
    /// no orderly end other than the session going away.
    pub fn fill(&mut self) -> Result<Fill> {
        loop {
            match self.inner.read(&mut self.chunk) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => {
                    let mut frames = Vec::new();
                    let decoded = self.decoder.decode_into(&self.chunk[..n], &mut frames);
                    self.ready.extend(frames);
                    decoded?;
                    return Ok(Fill::Data(n));
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(Fill::WouldBlock),
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Pop the next frame already decoded, without touching the stream.
    pub fn next_ready(&mut self) -> Option<Frame> {
        self.ready.pop_front()
    }

    /// Number of decoded frames waiting.
    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    /// Read the next complete frame (blocking).
    ///
    /// On a non-blocking stream with nothing to read this returns the
    /// `WouldBlock` I/O error.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(frame);
            }
            if self.fill()? == Fill::WouldBlock {
                return Err(FrameError::Io(std::io::Error::from(ErrorKind::WouldBlock)));
            }
        }
    }

    /// True when a frame has been partly received.
    pub fn has_partial(&self) -> bool {
        !self.decoder.is_idle()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}
