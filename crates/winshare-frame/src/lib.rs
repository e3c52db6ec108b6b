//! Channel-multiplexed framing for winshare streams.
//!
//! Every frame on the shared stream is:
//! - a 2-byte little-endian channel id (0 is the control channel)
//! - a 2-byte little-endian payload length
//! - exactly that many payload bytes
//!
//! There is no magic and no resynchronisation: the stream is trusted once
//! the session greeting has been validated. Decoding is incremental, so
//! callers can feed whatever a non-blocking read returned.

pub mod channel;
pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod tokio_codec;

pub use channel::{channel_name, CONTROL};
pub use codec::{
    chunk_payload, encode_frame, Frame, FrameConfig, FrameDecoder, HEADER_SIZE, MAX_PAYLOAD,
};
pub use error::{FrameError, Result};
pub use reader::{Fill, FrameReader};
pub use writer::{Flush, FrameWriter};

#[cfg(feature = "async")]
pub use tokio_codec::MuxCodec;
