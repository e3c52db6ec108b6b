use std::time::Duration;

use crate::config::Role;
use crate::registry::WindowId;
use crate::status::StatusCode;

/// Errors that end a session or refuse a request on it.
///
/// Problems confined to one control message or one channel are logged and
/// dropped inside the session loop; they never surface here.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] winshare_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] winshare_frame::FrameError),

    /// The peer's greeting differed from ours.
    #[error("greeting mismatch at byte {offset}: expected {expected:#04x}, got {got:#04x}")]
    GreetingMismatch { offset: usize, expected: u8, got: u8 },

    /// Peer disconnected.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// Nothing arrived within the configured time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// A channel id was registered twice.
    #[error("channel {0} is already registered")]
    DuplicateChannel(u16),

    /// Every 16-bit channel id has been handed out.
    #[error("channel ids exhausted")]
    ChannelIdsExhausted,

    /// The window already has a channel.
    #[error("window {0:#x} is already shared")]
    AlreadyShared(WindowId),

    /// A control message announcing the window would not fit in one frame.
    #[error("metadata for window {window:#x} needs {size} bytes, a frame holds {max}")]
    MetadataTooLarge {
        window: WindowId,
        size: usize,
        max: usize,
    },

    /// The operation belongs to the other side of the session.
    #[error("operation requires the {0} role")]
    WrongRole(Role),

    /// A listener already has a live session.
    #[error("a session is already live on this listener")]
    PeerBusy,

    /// Failed to start a framebuffer client.
    #[error("failed to start framebuffer client: {0}")]
    Spawn(std::io::Error),

    /// Local I/O error outside the frame layer.
    #[error("session I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The session loop has already finished.
    #[error("session is closed")]
    Closed,
}

impl SessionError {
    /// Status code to report for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            SessionError::Transport(_) => StatusCode::TransportUnavailable,
            SessionError::GreetingMismatch { .. } => StatusCode::IncompatiblePeer,
            SessionError::Spawn(_) => StatusCode::EngineFailed,
            SessionError::AlreadyShared(_)
            | SessionError::ChannelIdsExhausted
            | SessionError::DuplicateChannel(_)
            | SessionError::MetadataTooLarge { .. }
            | SessionError::WrongRole(_) => StatusCode::Unshareable,
            SessionError::Frame(_)
            | SessionError::Disconnected(_)
            | SessionError::Timeout(_)
            | SessionError::PeerBusy
            | SessionError::Io(_)
            | SessionError::Closed => StatusCode::SessionLost,
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
