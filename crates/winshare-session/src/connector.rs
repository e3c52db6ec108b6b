use tracing::info;
use winshare_transport::Endpoint;

use crate::config::SessionConfig;
use crate::error::Result;
use crate::greeting::GreetingRole;
use crate::session::Session;

/// Connect to a listening peer as the sharing side.
pub fn connect(endpoint: &Endpoint) -> Result<Session> {
    connect_with_config(endpoint, SessionConfig::sharing())
}

/// Connect with explicit configuration.
///
/// Waits for the peer's greeting (bounded by `greeting_timeout`) before
/// returning; no frame is read or written until it has been validated.
pub fn connect_with_config(endpoint: &Endpoint, config: SessionConfig) -> Result<Session> {
    let stream = endpoint.connect()?;
    info!(%endpoint, transport = stream.kind(), role = %config.role, "connected to peer");
    Session::from_stream(stream, GreetingRole::Expect, config)
}
