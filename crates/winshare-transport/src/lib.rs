//! Local socket plumbing for winshare.
//!
//! The tube collaborator hands us one connected duplex socket per peer, and
//! every shared window talks to its framebuffer engine over another local
//! socket. This crate wraps both in [`LocalStream`], provides the listener
//! and connector used for session bootstrap, and a small `poll(2)` readiness
//! set that drives the single-threaded session loop.
//!
//! This is the lowest layer of winshare. Everything else builds on top of it.

pub mod endpoint;
pub mod error;
pub mod stream;

#[cfg(unix)]
pub mod poll;
#[cfg(unix)]
pub mod uds;

pub mod tcp;

pub use endpoint::{BoundEndpoint, Endpoint, DEFAULT_TCP_PORT};
pub use error::{Result, TransportError};
pub use stream::LocalStream;
pub use tcp::TcpEndpoint;

#[cfg(unix)]
pub use poll::{Interest, PollSet, Readiness};
#[cfg(unix)]
pub use uds::UnixDomainSocket;
