//! Callbacks from the session loop to the application.
//!
//! The loop calls these on its own thread, in the order the peer's messages
//! arrived. Implementations should return quickly; long work belongs on
//! another thread, reached through a channel.

use crate::avatar::Avatar;
use crate::control::Metadata;
use crate::registry::WindowId;
use crate::status::StatusCode;

/// Whether a newly opened window can take metadata yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// Apply metadata immediately.
    Ready,
    /// Hold metadata until [`Session::mark_ready`](crate::Session::mark_ready).
    Pending,
}

pub trait SessionEvents {
    /// The peer opened a window channel and its framebuffer client is running.
    fn on_window_opened(&mut self, channel: u16) -> ResourceState {
        let _ = channel;
        ResourceState::Ready
    }

    /// Metadata for a ready window.
    fn on_metadata(&mut self, channel: u16, metadata: &Metadata) {
        let _ = (channel, metadata);
    }

    /// A window channel went away, whichever side closed it.
    fn on_window_closed(&mut self, channel: u16) {
        let _ = channel;
    }

    fn on_wall(&mut self, code: u16, text: &str) {
        let _ = (code, text);
    }

    fn on_avatar(&mut self, avatar: &Avatar) {
        let _ = avatar;
    }

    /// Remote pointer position; `None` hides it.
    fn on_pointer(&mut self, position: Option<(u16, u16)>) {
        let _ = position;
    }

    fn on_audio_opened(&mut self, audio: u16, video: u16) {
        let _ = (audio, video);
    }

    /// Bytes for an audio channel that has no local socket.
    fn on_audio(&mut self, channel: u16, data: &[u8]) {
        let _ = (channel, data);
    }

    fn on_respawn(&mut self, token: u32) {
        let _ = token;
    }

    /// Lifecycle status, per window where there is one.
    fn on_status(&mut self, window: Option<WindowId>, status: StatusCode) {
        let _ = (window, status);
    }
}

/// Ignores everything; windows are ready as soon as they open.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEvents;

impl SessionEvents for NoEvents {}
