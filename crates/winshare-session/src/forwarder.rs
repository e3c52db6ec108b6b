//! Byte pumping between channel sockets and the shared stream.
//!
//! Neither direction ever blocks: local reads happen only after `poll`
//! reported the socket readable, and bytes a local socket will not take yet
//! wait in that channel's own outbound buffer.

use std::io::{self, ErrorKind, Read, Write};

use bytes::Buf;
use tracing::{trace, warn};
use winshare_frame::{chunk_payload, FrameWriter};

use crate::error::Result;
use crate::registry::ChannelEntry;

/// Result of reading a channel's local socket once.
#[derive(Debug, PartialEq, Eq)]
pub enum Pump {
    /// This many bytes were queued on the shared stream.
    Forwarded(usize),
    WouldBlock,
    /// EOF or a read error; the channel should be closed.
    Closed,
}

/// Result of pushing bytes towards a channel's local socket.
#[derive(Debug)]
pub enum Delivery {
    /// Everything written.
    Written,
    /// The socket is full; this many bytes wait for the next writable event.
    Buffered(usize),
    /// The channel has no local socket.
    NoSocket,
    /// Write failed; the channel should be closed.
    Failed(io::Error),
}

#[derive(Debug)]
pub struct Forwarder {
    chunk: Box<[u8]>,
}

impl Forwarder {
    /// `chunk_size` bounds a single local read and therefore a single frame.
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk: vec![0u8; chunk_size.max(1)].into_boxed_slice(),
        }
    }

    /// Read once from the channel's socket and queue the bytes as frames.
    ///
    /// Only errors from the shared writer are returned; local failures come
    /// back as [`Pump::Closed`].
    pub fn pump_local<W: Write>(
        &mut self,
        entry: &mut ChannelEntry,
        writer: &mut FrameWriter<W>,
    ) -> Result<Pump> {
        let id = entry.id;
        let (Some(socket), _) = entry.io_parts() else {
            return Ok(Pump::WouldBlock);
        };

        let n = loop {
            match socket.read(&mut self.chunk) {
                Ok(0) => return Ok(Pump::Closed),
                Ok(n) => break n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(Pump::WouldBlock),
                Err(err) => {
                    warn!(channel = id, error = %err, "local read failed");
                    return Ok(Pump::Closed);
                }
            }
        };

        let max = writer.config().effective_max_payload();
        for piece in chunk_payload(&self.chunk[..n], max) {
            writer.queue(id, piece)?;
        }
        entry.touch();
        trace!(channel = id, len = n, "local bytes forwarded");
        Ok(Pump::Forwarded(n))
    }

    /// Hand a frame payload to the channel's local socket.
    pub fn deliver(&self, entry: &mut ChannelEntry, payload: &[u8]) -> Delivery {
        if !entry.has_socket() {
            return Delivery::NoSocket;
        }
        entry.touch();
        let (_, outbound) = entry.io_parts();
        outbound.extend_from_slice(payload);
        self.flush_local(entry)
    }

    /// Write as much of the channel's outbound buffer as the socket accepts.
    pub fn flush_local(&self, entry: &mut ChannelEntry) -> Delivery {
        let (Some(socket), outbound) = entry.io_parts() else {
            return Delivery::NoSocket;
        };
        while !outbound.is_empty() {
            match socket.write(&outbound[..]) {
                Ok(0) => return Delivery::Failed(io::Error::from(ErrorKind::WriteZero)),
                Ok(n) => outbound.advance(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    return Delivery::Buffered(outbound.len());
                }
                Err(err) => return Delivery::Failed(err),
            }
        }
        Delivery::Written
    }
}
