use std::fmt;

use serde::Serialize;

/// Numeric status reported back to whoever asked for a window to be shared.
///
/// The values are what the window-sharing UI expects to find on the window;
/// the 3xx range distinguishes failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    /// Window is no longer shared.
    Unshared,
    /// OPEN was sent for the window.
    Shared,
    /// Peer acknowledged the channel; framebuffer bytes flow.
    SocketReady,
    /// Window can't be shared (already shared, no ids left).
    Unshareable,
    /// Session to the peer is being set up.
    Connecting,
    /// No stream to the peer could be obtained.
    TransportUnavailable,
    /// Peer did not send the expected greeting.
    IncompatiblePeer,
    /// Local framebuffer engine or client could not be started.
    EngineFailed,
    /// Stream to the peer failed after setup.
    SessionLost,
}

impl StatusCode {
    pub const ALL: [StatusCode; 9] = [
        StatusCode::Unshared,
        StatusCode::Shared,
        StatusCode::SocketReady,
        StatusCode::Unshareable,
        StatusCode::Connecting,
        StatusCode::TransportUnavailable,
        StatusCode::IncompatiblePeer,
        StatusCode::EngineFailed,
        StatusCode::SessionLost,
    ];

    pub fn code(self) -> u16 {
        match self {
            StatusCode::Unshared => 100,
            StatusCode::Shared => 101,
            StatusCode::SocketReady => 102,
            StatusCode::Unshareable => 103,
            StatusCode::Connecting => 200,
            StatusCode::TransportUnavailable => 301,
            StatusCode::IncompatiblePeer => 302,
            StatusCode::EngineFailed => 312,
            StatusCode::SessionLost => 322,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.code() == code)
    }

    pub fn is_failure(self) -> bool {
        self.code() >= 300
    }

    pub fn description(self) -> &'static str {
        match self {
            StatusCode::Unshared => "unshared",
            StatusCode::Shared => "shared",
            StatusCode::SocketReady => "socket ready",
            StatusCode::Unshareable => "unshareable",
            StatusCode::Connecting => "connecting",
            StatusCode::TransportUnavailable => "transport unavailable",
            StatusCode::IncompatiblePeer => "incompatible peer",
            StatusCode::EngineFailed => "framebuffer engine failed",
            StatusCode::SessionLost => "session lost",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip() {
        for status in StatusCode::ALL {
            assert_eq!(StatusCode::from_code(status.code()), Some(status));
        }
        assert_eq!(StatusCode::from_code(999), None);
    }

    #[test]
    fn failure_range() {
        assert!(!StatusCode::Connecting.is_failure());
        assert!(StatusCode::IncompatiblePeer.is_failure());
        assert_eq!(StatusCode::SocketReady.to_string(), "102 (socket ready)");
    }

    #[test]
    fn serializes_as_snake_case_name() {
        assert_eq!(
            serde_json::to_string(&StatusCode::EngineFailed).unwrap(),
            "\"engine_failed\""
        );
    }
}
