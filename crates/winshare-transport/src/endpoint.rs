use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Result, TransportError};
use crate::stream::LocalStream;
use crate::tcp::TcpEndpoint;
#[cfg(unix)]
use crate::uds::UnixDomainSocket;

/// Loopback port used when two instances meet over TCP instead of a tube.
pub const DEFAULT_TCP_PORT: u16 = 1770;

/// Where the shared stream lives: a tube's Unix socket or a TCP address.
///
/// Parsed from `tcp:HOST:PORT`, bare `tcp` (loopback on
/// [`DEFAULT_TCP_PORT`]), or anything else as a socket path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp(SocketAddr),
}

/// A bound endpoint waiting for its peer.
pub enum BoundEndpoint {
    #[cfg(unix)]
    Unix(UnixDomainSocket),
    Tcp(TcpEndpoint),
}

impl Endpoint {
    /// Bind and listen on this endpoint.
    pub fn bind(&self) -> Result<BoundEndpoint> {
        match self {
            #[cfg(unix)]
            Endpoint::Unix(path) => Ok(BoundEndpoint::Unix(UnixDomainSocket::bind(path)?)),
            #[cfg(not(unix))]
            Endpoint::Unix(path) => Err(unsupported(path)),
            Endpoint::Tcp(addr) => Ok(BoundEndpoint::Tcp(TcpEndpoint::bind(*addr)?)),
        }
    }

    /// Connect to a peer listening on this endpoint.
    pub fn connect(&self) -> Result<LocalStream> {
        match self {
            #[cfg(unix)]
            Endpoint::Unix(path) => UnixDomainSocket::connect(path),
            #[cfg(not(unix))]
            Endpoint::Unix(path) => Err(unsupported(path)),
            Endpoint::Tcp(addr) => TcpEndpoint::connect(*addr),
        }
    }
}

#[cfg(not(unix))]
fn unsupported(path: &std::path::Path) -> TransportError {
    TransportError::Connect {
        addr: path.display().to_string(),
        source: std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "unix domain sockets are not available on this platform",
        ),
    }
}

impl BoundEndpoint {
    /// Accept the next connection (blocking).
    pub fn accept(&self) -> Result<LocalStream> {
        match self {
            #[cfg(unix)]
            BoundEndpoint::Unix(socket) => socket.accept(),
            BoundEndpoint::Tcp(endpoint) => endpoint.accept(),
        }
    }

    /// The endpoint as actually bound (TCP port 0 resolves to the real port).
    pub fn endpoint(&self) -> Endpoint {
        match self {
            #[cfg(unix)]
            BoundEndpoint::Unix(socket) => Endpoint::Unix(socket.path().to_path_buf()),
            BoundEndpoint::Tcp(endpoint) => Endpoint::Tcp(endpoint.local_addr()),
        }
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "tcp" {
            return Ok(Endpoint::Tcp(SocketAddr::from((
                Ipv4Addr::LOCALHOST,
                DEFAULT_TCP_PORT,
            ))));
        }
        if let Some(addr) = s.strip_prefix("tcp:") {
            return addr
                .parse()
                .map(Endpoint::Tcp)
                .map_err(|_| TransportError::InvalidEndpoint(s.to_string()));
        }
        if s.is_empty() {
            return Err(TransportError::InvalidEndpoint(s.to_string()));
        }
        Ok(Endpoint::Unix(PathBuf::from(s)))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_socket_path() {
        let endpoint: Endpoint = "/run/user/1000/tube.sock".parse().unwrap();
        assert_eq!(
            endpoint,
            Endpoint::Unix(PathBuf::from("/run/user/1000/tube.sock"))
        );
    }

    #[test]
    fn parses_tcp_address() {
        let endpoint: Endpoint = "tcp:127.0.0.1:7177".parse().unwrap();
        assert_eq!(endpoint, Endpoint::Tcp("127.0.0.1:7177".parse().unwrap()));
        assert_eq!(endpoint.to_string(), "tcp:127.0.0.1:7177");
    }

    #[test]
    fn bare_tcp_uses_default_port() {
        let endpoint: Endpoint = "tcp".parse().unwrap();
        assert_eq!(
            endpoint,
            Endpoint::Tcp(SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_TCP_PORT)))
        );
    }

    #[test]
    fn rejects_bad_tcp_address_and_empty_string() {
        assert!(matches!(
            "tcp:nowhere".parse::<Endpoint>(),
            Err(TransportError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            "".parse::<Endpoint>(),
            Err(TransportError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn bound_tcp_reports_real_port() {
        let endpoint: Endpoint = "tcp:127.0.0.1:0".parse().unwrap();
        let bound = endpoint.bind().unwrap();
        match bound.endpoint() {
            Endpoint::Tcp(addr) => assert_ne!(addr.port(), 0),
            other => panic!("unexpected endpoint {other:?}"),
        }
    }
}
