//! Framebuffer clients for the receiving side.
//!
//! Every OPEN from the peer needs a local socket speaking the framebuffer
//! protocol. A [`FramebufferLauncher`] provides it: usually by spawning a
//! viewer process on one end of a socket pair.

use std::io;
#[cfg(unix)]
use std::sync::mpsc::{self, Receiver, Sender};

use winshare_transport::LocalStream;

pub trait FramebufferLauncher {
    /// Produce the local socket for a new channel.
    fn launch(&mut self, channel: u16) -> io::Result<LocalStream>;

    /// The channel closed; stop whatever `launch` started.
    fn release(&mut self, channel: u16) {
        let _ = channel;
    }
}

/// Hands the far end of a socket pair to whoever holds the receiver.
///
/// For embedding a viewer in-process, and for tests.
#[cfg(unix)]
#[derive(Debug)]
pub struct PairLauncher {
    tx: Sender<(u16, LocalStream)>,
}

#[cfg(unix)]
impl PairLauncher {
    pub fn new() -> (Self, Receiver<(u16, LocalStream)>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

#[cfg(unix)]
impl FramebufferLauncher for PairLauncher {
    fn launch(&mut self, channel: u16) -> io::Result<LocalStream> {
        let (ours, theirs) = LocalStream::pair().map_err(io::Error::other)?;
        self.tx
            .send((channel, theirs))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "launcher receiver dropped"))?;
        Ok(ours)
    }
}

#[cfg(unix)]
pub use command::CommandLauncher;

#[cfg(unix)]
mod command {
    use std::collections::HashMap;
    use std::io;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::os::unix::process::CommandExt;
    use std::process::{Child, Command, Stdio};

    use tracing::{debug, info, warn};
    use winshare_transport::LocalStream;

    use super::FramebufferLauncher;

    /// Descriptor the child finds its socket on.
    pub const CHILD_FD: i32 = 3;

    /// Arguments used when none are given.
    pub const DEFAULT_ARGS: [&str; 4] = ["-f", "{fd}", "-r", "{channel}"];

    /// Spawns one framebuffer client process per channel.
    ///
    /// The child gets its end of a socket pair on descriptor 3. `{fd}` and
    /// `{channel}` in the arguments are replaced before spawning.
    #[derive(Debug)]
    pub struct CommandLauncher {
        program: String,
        args: Vec<String>,
        children: HashMap<u16, Child>,
    }

    impl CommandLauncher {
        pub fn new(program: impl Into<String>) -> Self {
            Self {
                program: program.into(),
                args: DEFAULT_ARGS.iter().map(|arg| arg.to_string()).collect(),
                children: HashMap::new(),
            }
        }

        pub fn with_args<I, S>(mut self, args: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            self.args = args.into_iter().map(Into::into).collect();
            self
        }

        pub fn program(&self) -> &str {
            &self.program
        }

        /// Arguments for `channel`, placeholders filled in.
        pub fn render_args(&self, channel: u16) -> Vec<String> {
            let fd = CHILD_FD.to_string();
            let channel = channel.to_string();
            self.args
                .iter()
                .map(|arg| arg.replace("{fd}", &fd).replace("{channel}", &channel))
                .collect()
        }

        pub fn running(&self) -> usize {
            self.children.len()
        }

        fn spawn(&self, channel: u16, child_end: &UnixStream) -> io::Result<Child> {
            let fd = child_end.as_raw_fd();
            let mut command = Command::new(&self.program);
            command.args(self.render_args(channel)).stdin(Stdio::null());

            // SAFETY: only async-signal-safe calls (dup2, fcntl) run between
            // fork and exec, on a descriptor the parent keeps open until spawn
            // returns.
            unsafe {
                command.pre_exec(move || {
                    if fd == CHILD_FD {
                        let flags = libc::fcntl(fd, libc::F_GETFD);
                        if flags < 0
                            || libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0
                        {
                            return Err(io::Error::last_os_error());
                        }
                    } else if libc::dup2(fd, CHILD_FD) < 0 {
                        return Err(io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
            command.spawn()
        }
    }

    impl FramebufferLauncher for CommandLauncher {
        fn launch(&mut self, channel: u16) -> io::Result<LocalStream> {
            let (ours, theirs) = UnixStream::pair()?;
            let child = self.spawn(channel, &theirs)?;
            info!(channel, pid = child.id(), program = %self.program, "framebuffer client started");
            if let Some(mut stale) = self.children.insert(channel, child) {
                warn!(channel, "replacing framebuffer client still registered for channel");
                let _ = stale.kill();
                let _ = stale.wait();
            }
            Ok(LocalStream::from(ours))
        }

        fn release(&mut self, channel: u16) {
            let Some(mut child) = self.children.remove(&channel) else {
                return;
            };
            if let Err(err) = child.kill() {
                debug!(channel, error = %err, "framebuffer client already gone");
            }
            match child.wait() {
                Ok(status) => debug!(channel, %status, "framebuffer client reaped"),
                Err(err) => warn!(channel, error = %err, "failed to reap framebuffer client"),
            }
        }
    }

    impl Drop for CommandLauncher {
        fn drop(&mut self) {
            let channels: Vec<u16> = self.children.keys().copied().collect();
            for channel in channels {
                self.release(channel);
            }
        }
    }

}
