//! Minimal `poll(2)` readiness set.
//!
//! The session loop rebuilds the set every turn from the sockets it owns,
//! waits once, then walks the ready entries. Tokens are whatever the caller
//! uses to find the socket again (a channel id, "the stream", ...).

use std::io;
use std::os::fd::{BorrowedFd, RawFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout};

/// What to wait for on one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const READABLE: Interest = Interest {
        readable: true,
        writable: false,
    };
    pub const WRITABLE: Interest = Interest {
        readable: false,
        writable: true,
    };
    pub const BOTH: Interest = Interest {
        readable: true,
        writable: true,
    };

    fn flags(self) -> PollFlags {
        let mut flags = PollFlags::empty();
        flags.set(PollFlags::POLLIN, self.readable);
        flags.set(PollFlags::POLLOUT, self.writable);
        flags
    }
}

/// What `poll` reported for one descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    /// Peer hung up. A read will return EOF or the pending error.
    pub hangup: bool,
    pub error: bool,
}

impl Readiness {
    fn from_revents(revents: PollFlags) -> Self {
        Self {
            readable: revents.contains(PollFlags::POLLIN),
            writable: revents.contains(PollFlags::POLLOUT),
            hangup: revents.contains(PollFlags::POLLHUP),
            error: revents.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL),
        }
    }

    /// Anything at all to look at.
    pub fn is_ready(&self) -> bool {
        self.readable || self.writable || self.hangup || self.error
    }

    /// The descriptor should be read: data, EOF, or an error to collect.
    pub fn wants_read(&self) -> bool {
        self.readable || self.hangup || self.error
    }
}

/// A set of descriptors with caller-defined tokens.
///
/// Registered descriptors must stay open until the next [`clear`](Self::clear).
pub struct PollSet<T> {
    fds: Vec<(RawFd, PollFlags)>,
    revents: Vec<PollFlags>,
    tokens: Vec<T>,
}

impl<T: Copy> PollSet<T> {
    pub fn new() -> Self {
        Self {
            fds: Vec::new(),
            revents: Vec::new(),
            tokens: Vec::new(),
        }
    }

    /// Drop every registration, keeping the allocations.
    pub fn clear(&mut self) {
        self.fds.clear();
        self.revents.clear();
        self.tokens.clear();
    }

    pub fn register(&mut self, fd: RawFd, interest: Interest, token: T) {
        self.fds.push((fd, interest.flags()));
        self.revents.push(PollFlags::empty());
        self.tokens.push(token);
    }

    pub fn len(&self) -> usize {
        self.fds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    /// Wait until something is ready or `timeout` elapses (`None` waits forever).
    ///
    /// Returns the number of ready descriptors. An interrupted wait returns 0.
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout = match timeout {
            Some(t) => PollTimeout::try_from(t).unwrap_or(PollTimeout::MAX),
            None => PollTimeout::NONE,
        };

        // SAFETY: callers keep every registered descriptor open until the set
        // is cleared, which cannot happen while these borrows are alive.
        let mut pfds: Vec<PollFd<'_>> = self
            .fds
            .iter()
            .map(|&(fd, flags)| PollFd::new(unsafe { BorrowedFd::borrow_raw(fd) }, flags))
            .collect();

        let ready = match nix::poll::poll(&mut pfds, timeout) {
            Ok(n) => n,
            Err(Errno::EINTR) => 0,
            Err(errno) => return Err(io::Error::from(errno)),
        };

        for (slot, pfd) in self.revents.iter_mut().zip(pfds.iter()) {
            *slot = pfd.revents().unwrap_or(PollFlags::empty());
        }
        Ok(usize::try_from(ready).unwrap_or(0))
    }

    /// Entries reported ready by the last `wait`.
    pub fn ready(&self) -> impl Iterator<Item = (T, Readiness)> + '_ {
        self.revents
            .iter()
            .zip(self.tokens.iter())
            .map(|(revents, token)| (*token, Readiness::from_revents(*revents)))
            .filter(|(_, readiness)| readiness.is_ready())
    }
}

impl<T: Copy> Default for PollSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    use super::*;

    #[test]
    fn reports_readable_socket_only() {
        let (mut a, b) = UnixStream::pair().unwrap();
        let (_c, d) = UnixStream::pair().unwrap();
        a.write_all(b"x").unwrap();

        let mut set = PollSet::new();
        set.register(b.as_raw_fd(), Interest::READABLE, 1u16);
        set.register(d.as_raw_fd(), Interest::READABLE, 2u16);

        let n = set.wait(Some(Duration::from_millis(100))).unwrap();
        assert_eq!(n, 1);
        let ready: Vec<_> = set.ready().collect();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].0, 1);
        assert!(ready[0].1.readable);
    }

    #[test]
    fn timeout_with_nothing_ready() {
        let (_a, b) = UnixStream::pair().unwrap();
        let mut set = PollSet::new();
        set.register(b.as_raw_fd(), Interest::READABLE, ());
        let n = set.wait(Some(Duration::from_millis(10))).unwrap();
        assert_eq!(n, 0);
        assert_eq!(set.ready().count(), 0);
    }

    #[test]
    fn writable_and_hangup() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut set = PollSet::new();
        set.register(a.as_raw_fd(), Interest::WRITABLE, "a");
        set.wait(Some(Duration::from_millis(100))).unwrap();
        let (_, readiness) = set.ready().next().expect("socket should be writable");
        assert!(readiness.writable);

        drop(b);
        set.clear();
        assert!(set.is_empty());
        set.register(a.as_raw_fd(), Interest::READABLE, "a");
        set.wait(Some(Duration::from_millis(100))).unwrap();
        let (_, readiness) = set.ready().next().expect("hangup should be reported");
        assert!(readiness.wants_read());
    }

    #[test]
    fn interest_maps_to_poll_flags() {
        assert_eq!(Interest::READABLE.flags(), PollFlags::POLLIN);
        assert_eq!(Interest::BOTH.flags(), PollFlags::POLLIN | PollFlags::POLLOUT);
        let readiness = Readiness::from_revents(PollFlags::POLLNVAL);
        assert!(readiness.error && readiness.wants_read());
        assert!(!Readiness::from_revents(PollFlags::empty()).is_ready());
    }
}
