use std::fmt;
use std::time::Duration;

use serde::Serialize;
use winshare_frame::FrameConfig;

/// Which end of the share this session is.
///
/// The sharing side allocates channel ids and originates OPEN; the receiving
/// side answers OPEN by starting a framebuffer client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Sharing,
    Receiving,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Sharing => f.write_str("sharing"),
            Role::Receiving => f.write_str("receiving"),
        }
    }
}

/// Configuration for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub role: Role,
    /// Frame limits and blocking timeouts for the shared stream.
    pub frame: FrameConfig,
    /// How long the connecting side waits for the full greeting.
    pub greeting_timeout: Option<Duration>,
    /// Tear the session down when the peer sends nothing for this long.
    pub idle_timeout: Option<Duration>,
    /// Close a channel whose local socket and peer traffic are both quiet
    /// for this long.
    pub channel_idle_timeout: Option<Duration>,
    /// Stop reading local sockets while this many bytes wait for the stream.
    pub outbound_high_water: usize,
    /// Largest single read from a local socket.
    pub read_chunk_size: usize,
    /// Receiving side echoes OPEN(id) once the channel is set up.
    pub acknowledge_open: bool,
    /// Postponed SETs held per channel before further ones are dropped.
    pub max_pending_per_channel: usize,
    /// Postponed metadata value bytes held across all channels.
    pub max_pending_bytes: usize,
    /// Bytes a local socket may leave unread before its channel is closed.
    pub channel_backlog_limit: usize,
}

impl SessionConfig {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            frame: FrameConfig::default(),
            greeting_timeout: Some(Duration::from_secs(10)),
            idle_timeout: None,
            channel_idle_timeout: None,
            outbound_high_water: 256 * 1024,
            read_chunk_size: 16 * 1024,
            acknowledge_open: true,
            max_pending_per_channel: crate::pending::DEFAULT_MAX_PER_CHANNEL,
            max_pending_bytes: crate::pending::DEFAULT_MAX_TOTAL_BYTES,
            channel_backlog_limit: 4 * 1024 * 1024,
        }
    }

    pub fn sharing() -> Self {
        Self::new(Role::Sharing)
    }

    pub fn receiving() -> Self {
        Self::new(Role::Receiving)
    }

    pub fn with_frame_config(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_greeting_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.greeting_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_channel_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.channel_idle_timeout = timeout;
        self
    }

    pub fn with_outbound_high_water(mut self, bytes: usize) -> Self {
        self.outbound_high_water = bytes;
        self
    }

    pub fn with_read_chunk_size(mut self, bytes: usize) -> Self {
        self.read_chunk_size = bytes;
        self
    }

    pub fn with_acknowledge_open(mut self, acknowledge: bool) -> Self {
        self.acknowledge_open = acknowledge;
        self
    }

    pub fn with_pending_limits(mut self, per_channel: usize, total_bytes: usize) -> Self {
        self.max_pending_per_channel = per_channel;
        self.max_pending_bytes = total_bytes;
        self
    }

    pub fn with_channel_backlog_limit(mut self, bytes: usize) -> Self {
        self.channel_backlog_limit = bytes;
        self
    }

    /// Local reads never produce more than one frame's worth of bytes.
    pub(crate) fn effective_read_chunk(&self) -> usize {
        self.read_chunk_size
            .clamp(1, self.frame.effective_max_payload())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::receiving()
    }
}
