//! Share individual windows between two desktops.
//!
//! One stream to the peer carries a control channel plus one channel per
//! shared window, each relaying a framebuffer protocol conversation between
//! the local engine and the remote viewer.
//!
//! # Crate Structure
//!
//! - [`transport`] - Local sockets, endpoints and the `poll(2)` readiness set
//! - [`frame`] - Channel-tagged, length-prefixed framing
//! - [`session`] - Greeting, control messages, channel registry and the session loop

/// Re-export transport types.
pub mod transport {
    pub use winshare_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use winshare_frame::*;
}

/// Re-export session types.
pub mod session {
    pub use winshare_session::*;
}
