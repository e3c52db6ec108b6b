use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};
use winshare_transport::{BoundEndpoint, Endpoint};

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::greeting::send_greeting;
use crate::session::Session;

/// Accepts the peer's stream and starts a session on it.
///
/// Holds at most one live session: a connection arriving while the previous
/// session is still alive is shut down unanswered.
pub struct SessionListener {
    bound: BoundEndpoint,
    config: SessionConfig,
    live: Arc<AtomicBool>,
}

impl SessionListener {
    /// Bind to a Unix socket path or TCP address.
    pub fn bind(endpoint: &Endpoint, config: SessionConfig) -> Result<Self> {
        let bound = endpoint.bind()?;
        info!(endpoint = %bound.endpoint(), role = %config.role, "listening for peer");
        Ok(Self {
            bound,
            config,
            live: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Accept the next connection, send the greeting and wrap it in a session.
    pub fn accept(&self) -> Result<Session> {
        let mut stream = self.bound.accept()?;
        let Some(lease) = SessionLease::acquire(&self.live) else {
            warn!(transport = stream.kind(), "refusing peer: a session is already live");
            stream.shutdown();
            return Err(SessionError::PeerBusy);
        };

        send_greeting(&mut stream)?;
        let mut session = Session::new(stream, self.config.clone())?;
        session.attach_lease(lease);
        info!(role = %self.config.role, "peer accepted");
        Ok(session)
    }

    /// The endpoint as bound (TCP port 0 resolved).
    pub fn endpoint(&self) -> Endpoint {
        self.bound.endpoint()
    }

    /// True while a session from this listener is alive.
    pub fn is_busy(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

/// Marks the listener busy for as long as the session lives.
#[derive(Debug)]
pub(crate) struct SessionLease {
    live: Arc<AtomicBool>,
}

impl SessionLease {
    fn acquire(live: &Arc<AtomicBool>) -> Option<Self> {
        live.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                live: Arc::clone(live),
            })
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.live.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::thread;

    use super::*;
    use crate::config::Role;
    use crate::connector::connect_with_config;

    fn make_sock_path(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "winshare-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir.join("listener.sock")
    }

    fn cleanup(path: &std::path::Path) {
        if let Some(parent) = path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn accept_sends_greeting_and_connect_validates_it() {
        let sock_path = make_sock_path("accept");
        let endpoint = Endpoint::Unix(sock_path.clone());
        let listener = SessionListener::bind(&endpoint, SessionConfig::receiving())
            .expect("listener should bind");

        let server = thread::spawn(move || {
            let session = listener.accept().expect("listener should accept");
            assert_eq!(session.role(), Role::Receiving);
            assert!(listener.is_busy());
            drop(session);
            assert!(!listener.is_busy());
        });

        let client = connect_with_config(&endpoint, SessionConfig::sharing())
            .expect("client should connect");
        assert_eq!(client.role(), Role::Sharing);
        server.join().expect("server thread should finish");
        cleanup(&sock_path);
    }

    #[test]
    fn second_peer_is_refused_while_session_is_live() {
        let sock_path = make_sock_path("busy");
        let endpoint = Endpoint::Unix(sock_path.clone());
        let listener = SessionListener::bind(&endpoint, SessionConfig::receiving())
            .expect("listener should bind");

        let server = thread::spawn(move || {
            let first = listener.accept().expect("first accept should succeed");
            let second = listener.accept();
            assert!(matches!(second, Err(SessionError::PeerBusy)));
            drop(first);
            listener.accept().expect("accept after the session ended should succeed");
        });

        let _first = connect_with_config(&endpoint, SessionConfig::sharing())
            .expect("first client should connect");
        let refused = connect_with_config(&endpoint, SessionConfig::sharing());
        assert!(matches!(refused, Err(SessionError::Disconnected(_))));
        let _third = connect_with_config(&endpoint, SessionConfig::sharing())
            .expect("third client should connect");

        server.join().expect("server thread should finish");
        cleanup(&sock_path);
    }

    #[test]
    fn tcp_loopback_with_ephemeral_port() {
        let endpoint: Endpoint = "tcp:127.0.0.1:0".parse().unwrap();
        let listener = SessionListener::bind(&endpoint, SessionConfig::receiving())
            .expect("listener should bind");
        let bound = listener.endpoint();
        assert_ne!(bound, endpoint);

        let server = thread::spawn(move || {
            listener.accept().expect("listener should accept");
        });
        connect_with_config(&bound, SessionConfig::sharing()).expect("client should connect");
        server.join().expect("server thread should finish");
    }
}
