//! Window-sharing sessions over one multiplexed stream.
//!
//! A [`Session`] owns the shared stream to one peer, the registry of open
//! channels and every local framebuffer socket. It runs a single-threaded
//! `poll(2)` loop: decoded frames are dispatched to the control state
//! machine or forwarded to the channel's local socket, and bytes read from
//! local sockets go back out as frames. Other threads talk to a running
//! session through a [`SessionHandle`].
//!
//! Bootstrap is handled by [`SessionListener`] (accepting side, sends the
//! greeting) and [`connect`] (connecting side, validates it).
//!
//! The session loop is built on `poll(2)` and needs a Unix platform; the
//! message types, registry and greeting check build everywhere.

pub mod avatar;
pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod forwarder;
pub mod greeting;
pub mod launcher;
pub mod pending;
pub mod registry;
pub mod status;

#[cfg(unix)]
pub mod connector;
#[cfg(unix)]
pub mod listener;
#[cfg(unix)]
pub mod session;

pub use avatar::{decode_avatar, Avatar};
pub use config::{Role, SessionConfig};
pub use control::{ControlError, ControlMessage, Metadata, MetadataKind, WindowType};
pub use error::{Result, SessionError};
pub use events::{NoEvents, ResourceState, SessionEvents};
pub use greeting::{GreetingRole, GreetingValidator, GREETING};
pub use launcher::FramebufferLauncher;
pub use pending::PendingMetadata;
pub use registry::{ChannelEntry, ChannelKind, ChannelRegistry, WindowId};
pub use status::StatusCode;

#[cfg(unix)]
pub use connector::{connect, connect_with_config};
#[cfg(unix)]
pub use launcher::{CommandLauncher, PairLauncher};
#[cfg(unix)]
pub use listener::SessionListener;
#[cfg(unix)]
pub use session::{Session, SessionHandle, Turn, WindowMetadata};
