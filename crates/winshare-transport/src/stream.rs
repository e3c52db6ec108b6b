use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
#[cfg(unix)]
use std::os::fd::{AsRawFd, RawFd};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::time::Duration;

use crate::error::Result;

/// A connected local stream: the tube socket or a framebuffer-engine socket.
///
/// Wraps either a Unix domain socket (the normal case: tubes and socket
/// pairs) or a TCP stream (loopback test mode).
pub struct LocalStream {
    inner: LocalStreamInner,
}

enum LocalStreamInner {
    #[cfg(unix)]
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Read for LocalStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            LocalStreamInner::Unix(stream) => stream.read(buf),
            LocalStreamInner::Tcp(stream) => stream.read(buf),
        }
    }
}

impl Write for LocalStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            LocalStreamInner::Unix(stream) => stream.write(buf),
            LocalStreamInner::Tcp(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            LocalStreamInner::Unix(stream) => stream.flush(),
            LocalStreamInner::Tcp(stream) => stream.flush(),
        }
    }
}

impl LocalStream {
    /// Create a connected pair of Unix sockets.
    ///
    /// Used to hand one end to a framebuffer client while the session keeps
    /// the other.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = UnixStream::pair()?;
        Ok((Self::from(left), Self::from(right)))
    }

    /// Switch the stream between blocking and non-blocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            LocalStreamInner::Unix(stream) => stream.set_nonblocking(nonblocking)?,
            LocalStreamInner::Tcp(stream) => stream.set_nonblocking(nonblocking)?,
        }
        Ok(())
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            LocalStreamInner::Unix(stream) => stream.set_read_timeout(timeout)?,
            LocalStreamInner::Tcp(stream) => stream.set_read_timeout(timeout)?,
        }
        Ok(())
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            LocalStreamInner::Unix(stream) => stream.set_write_timeout(timeout)?,
            LocalStreamInner::Tcp(stream) => stream.set_write_timeout(timeout)?,
        }
        Ok(())
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        let inner = match &self.inner {
            #[cfg(unix)]
            LocalStreamInner::Unix(stream) => LocalStreamInner::Unix(stream.try_clone()?),
            LocalStreamInner::Tcp(stream) => LocalStreamInner::Tcp(stream.try_clone()?),
        };
        Ok(Self { inner })
    }

    /// Shut down both directions. Errors from an already-closed peer are ignored.
    pub fn shutdown(&self) {
        let _ = match &self.inner {
            #[cfg(unix)]
            LocalStreamInner::Unix(stream) => stream.shutdown(Shutdown::Both),
            LocalStreamInner::Tcp(stream) => stream.shutdown(Shutdown::Both),
        };
    }

    /// Short transport label for logs.
    pub fn kind(&self) -> &'static str {
        match &self.inner {
            #[cfg(unix)]
            LocalStreamInner::Unix(_) => "unix",
            LocalStreamInner::Tcp(_) => "tcp",
        }
    }

    /// Get the credentials of the connected peer (Linux only).
    ///
    /// Returns `(uid, gid, pid)` via `SO_PEERCRED`, or `None` if unavailable
    /// (including TCP streams).
    #[cfg(target_os = "linux")]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        let fd = match &self.inner {
            LocalStreamInner::Unix(stream) => stream.as_raw_fd(),
            LocalStreamInner::Tcp(_) => return None,
        };

        let mut cred = libc::ucred {
            pid: 0,
            uid: 0,
            gid: 0,
        };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

        // SAFETY: `cred` and `len` are valid writable pointers for the provided sizes,
        // and `fd` is an open Unix socket descriptor owned by this stream.
        let rc = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                (&mut cred as *mut libc::ucred).cast::<libc::c_void>(),
                &mut len,
            )
        };

        if rc == 0 && len as usize == std::mem::size_of::<libc::ucred>() {
            Some((cred.uid, cred.gid, cred.pid as u32))
        } else {
            None
        }
    }

    /// Get the credentials of the connected peer.
    ///
    /// Returns `None` on platforms that do not expose peer credentials.
    #[cfg(not(target_os = "linux"))]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        None
    }
}

#[cfg(unix)]
impl From<UnixStream> for LocalStream {
    fn from(stream: UnixStream) -> Self {
        Self {
            inner: LocalStreamInner::Unix(stream),
        }
    }
}

impl From<TcpStream> for LocalStream {
    fn from(stream: TcpStream) -> Self {
        Self {
            inner: LocalStreamInner::Tcp(stream),
        }
    }
}

#[cfg(unix)]
impl AsRawFd for LocalStream {
    fn as_raw_fd(&self) -> RawFd {
        match &self.inner {
            LocalStreamInner::Unix(stream) => stream.as_raw_fd(),
            LocalStreamInner::Tcp(stream) => stream.as_raw_fd(),
        }
    }
}

impl std::fmt::Debug for LocalStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStream")
            .field("type", &self.kind())
            .finish()
    }
}
