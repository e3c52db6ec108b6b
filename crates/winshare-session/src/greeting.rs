//! The fixed greeting that opens every stream.
//!
//! The accepting side writes it; the connecting side checks it byte by byte
//! before trusting anything else on the stream. There is no negotiation: a
//! single differing byte ends the session.

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use winshare_transport::LocalStream;

use crate::error::{Result, SessionError};

/// Protocol magic, sent once at the start of the stream.
pub const GREETING: &[u8; 12] = b"Xz 000.001\r\n";

/// Which half of the greeting exchange this end performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GreetingRole {
    /// Write the greeting (accepting side).
    Send,
    /// Read and validate the greeting (connecting side).
    Expect,
}

/// Incremental greeting check.
#[derive(Debug, Default)]
pub struct GreetingValidator {
    matched: usize,
}

impl GreetingValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check the next bytes of the stream.
    ///
    /// Returns how many bytes belonged to the greeting; anything after that
    /// is frame data. Fails on the first byte that differs.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<usize> {
        let wanted = &GREETING[self.matched..];
        let take = wanted.len().min(bytes.len());
        for (i, (&got, &expected)) in bytes[..take].iter().zip(wanted).enumerate() {
            if got != expected {
                return Err(SessionError::GreetingMismatch {
                    offset: self.matched + i,
                    expected,
                    got,
                });
            }
        }
        self.matched += take;
        Ok(take)
    }

    /// Bytes still expected.
    pub fn remaining(&self) -> usize {
        GREETING.len() - self.matched
    }

    pub fn is_complete(&self) -> bool {
        self.matched == GREETING.len()
    }
}

/// Write the greeting.
pub fn send_greeting<W: Write>(writer: &mut W) -> Result<()> {
    writer.write_all(GREETING)?;
    writer.flush()?;
    debug!("greeting sent");
    Ok(())
}

/// Read and validate the greeting from a blocking reader.
///
/// Never reads past the greeting, so the stream is positioned at the first
/// frame afterwards.
pub fn read_greeting<R: Read>(reader: &mut R) -> Result<()> {
    let mut validator = GreetingValidator::new();
    let mut buf = [0u8; GREETING.len()];
    while !validator.is_complete() {
        let want = validator.remaining();
        let n = match reader.read(&mut buf[..want]) {
            Ok(0) => {
                return Err(SessionError::Disconnected(
                    "stream closed during greeting".to_string(),
                ))
            }
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(SessionError::Io(err)),
        };
        validator.feed(&buf[..n])?;
    }
    Ok(())
}

/// Read the greeting from a stream, giving up after `timeout`.
pub fn expect_greeting(stream: &mut LocalStream, timeout: Option<Duration>) -> Result<()> {
    let Some(timeout) = timeout else {
        stream.set_read_timeout(None)?;
        return read_greeting(stream);
    };

    let deadline = Instant::now() + timeout;
    let mut validator = GreetingValidator::new();
    let mut buf = [0u8; GREETING.len()];
    let result = loop {
        if validator.is_complete() {
            break Ok(());
        }
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            break Err(SessionError::Timeout(timeout));
        }
        stream.set_read_timeout(Some(left))?;

        let want = validator.remaining();
        match stream.read(&mut buf[..want]) {
            Ok(0) => {
                break Err(SessionError::Disconnected(
                    "stream closed during greeting".to_string(),
                ))
            }
            Ok(n) => {
                if let Err(err) = validator.feed(&buf[..n]) {
                    break Err(err);
                }
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                break Err(SessionError::Timeout(timeout))
            }
            Err(err) => break Err(SessionError::Io(err)),
        }
    };
    stream.set_read_timeout(None)?;

    if let Err(err) = &result {
        warn!(error = %err, "greeting rejected");
    } else {
        debug!("greeting accepted");
    }
    result
}

/// Perform this end's half of the exchange.
pub fn perform(stream: &mut LocalStream, role: GreetingRole, timeout: Option<Duration>) -> Result<()> {
    match role {
        GreetingRole::Send => send_greeting(stream),
        GreetingRole::Expect => expect_greeting(stream, timeout),
    }
}
