/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds the configured maximum size.
    ///
    /// On the decode side this is fatal for the stream: the peer announced a
    /// frame we refuse to buffer.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed (EOF on read, zero-length write).
    #[error("connection closed")]
    ConnectionClosed,
}

impl FrameError {
    /// True when the peer is gone rather than misbehaving.
    pub fn is_disconnect(&self) -> bool {
        match self {
            FrameError::ConnectionClosed => true,
            FrameError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            FrameError::PayloadTooLarge { .. } => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
