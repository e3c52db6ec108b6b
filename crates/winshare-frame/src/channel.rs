//! Channel ids.
//!
//! Only channel 0 is reserved. Every other id is handed out by the sharing
//! side, one per shared window (video) or per announced audio stream.

/// Session management: OPEN, CLOSE, SET and the other control opcodes.
pub const CONTROL: u16 = 0;

/// First id the sharing side allocates.
pub const FIRST_DYNAMIC: u16 = 1;

/// Returns a human-readable name for a channel ID.
pub fn channel_name(id: u16) -> &'static str {
    match id {
        CONTROL => "CONTROL",
        _ => "WINDOW",
    }
}

/// Returns true for the control channel.
pub fn is_control(id: u16) -> bool {
    id == CONTROL
}
