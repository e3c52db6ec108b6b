use std::collections::HashMap;

use tracing::{debug, warn};

use crate::control::Metadata;

/// Entries held for one channel unless configured otherwise.
pub const DEFAULT_MAX_PER_CHANNEL: usize = 64;

/// Value bytes held across all channels unless configured otherwise.
pub const DEFAULT_MAX_TOTAL_BYTES: usize = 1024 * 1024;

/// Metadata that arrived before its channel's window could take it.
///
/// Entries come back out in arrival order, once; a flush empties the
/// channel's list. The peer decides which channel ids get SETs, so both the
/// entries per channel and the value bytes across all channels are capped;
/// anything over either cap is dropped.
#[derive(Debug)]
pub struct PendingMetadata {
    queues: HashMap<u16, Vec<Metadata>>,
    max_per_channel: usize,
    max_total_bytes: usize,
    total_bytes: usize,
}

impl Default for PendingMetadata {
    fn default() -> Self {
        Self::with_limits(DEFAULT_MAX_PER_CHANNEL, DEFAULT_MAX_TOTAL_BYTES)
    }
}

impl PendingMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(max_per_channel: usize, max_total_bytes: usize) -> Self {
        Self {
            queues: HashMap::new(),
            max_per_channel,
            max_total_bytes,
            total_bytes: 0,
        }
    }

    /// Queue `metadata` for `channel`. Returns false if a cap dropped it.
    pub fn enqueue(&mut self, channel: u16, metadata: Metadata) -> bool {
        let size = value_len(&metadata);
        let held = self.len(channel);
        if held >= self.max_per_channel {
            warn!(channel, held, kind = ?metadata.kind(), "pending metadata full for channel, dropping");
            return false;
        }
        if self.total_bytes.saturating_add(size) > self.max_total_bytes {
            warn!(
                channel,
                size,
                total = self.total_bytes,
                kind = ?metadata.kind(),
                "pending metadata over byte limit, dropping"
            );
            return false;
        }
        debug!(channel, kind = ?metadata.kind(), "metadata postponed");
        self.total_bytes += size;
        self.queues.entry(channel).or_default().push(metadata);
        true
    }

    /// Take everything queued for `channel`, oldest first.
    pub fn flush(&mut self, channel: u16) -> Vec<Metadata> {
        let queue = self.queues.remove(&channel).unwrap_or_default();
        self.release(&queue);
        queue
    }

    /// Drop entries for a channel that went away. Returns how many.
    pub fn discard(&mut self, channel: u16) -> usize {
        let queue = self.queues.remove(&channel).unwrap_or_default();
        self.release(&queue);
        queue.len()
    }

    pub fn len(&self, channel: u16) -> usize {
        self.queues.get(&channel).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Value bytes currently held across all channels.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    fn release(&mut self, queue: &[Metadata]) {
        let freed: usize = queue.iter().map(value_len).sum();
        self.total_bytes = self.total_bytes.saturating_sub(freed);
    }
}

fn value_len(metadata: &Metadata) -> usize {
    match metadata {
        Metadata::Transiency(_) => 2,
        Metadata::Title(title) => title.len(),
        Metadata::WindowType(_) => 1,
        Metadata::Icon(image) => image.len(),
        Metadata::Other { value, .. } => value.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::WindowType;

    #[test]
    fn flush_returns_arrival_order_once() {
        let mut pending = PendingMetadata::new();
        pending.enqueue(5, Metadata::Title("first".into()));
        pending.enqueue(5, Metadata::WindowType(WindowType::Dialog));
        pending.enqueue(5, Metadata::Title("second".into()));
        pending.enqueue(6, Metadata::Title("other".into()));

        assert_eq!(pending.len(5), 3);
        assert_eq!(
            pending.flush(5),
            vec![
                Metadata::Title("first".into()),
                Metadata::WindowType(WindowType::Dialog),
                Metadata::Title("second".into()),
            ]
        );
        assert!(pending.flush(5).is_empty());
        assert_eq!(pending.len(6), 1);
        assert_eq!(pending.total_bytes(), "other".len());
    }

    #[test]
    fn discard_drops_only_that_channel() {
        let mut pending = PendingMetadata::new();
        pending.enqueue(1, Metadata::Transiency(0));
        pending.enqueue(2, Metadata::Transiency(1));
        assert_eq!(pending.discard(1), 1);
        assert_eq!(pending.discard(1), 0);
        assert!(!pending.is_empty());
        assert_eq!(pending.flush(2).len(), 1);
        assert!(pending.is_empty());
        assert_eq!(pending.total_bytes(), 0);
    }

    #[test]
    fn per_channel_cap_drops_newest() {
        let mut pending = PendingMetadata::with_limits(2, usize::MAX);
        assert!(pending.enqueue(9, Metadata::Title("a".into())));
        assert!(pending.enqueue(9, Metadata::Title("b".into())));
        assert!(!pending.enqueue(9, Metadata::Title("c".into())));
        assert!(pending.enqueue(10, Metadata::Title("d".into())));
        assert_eq!(
            pending.flush(9),
            vec![Metadata::Title("a".into()), Metadata::Title("b".into())]
        );
    }

    #[test]
    fn byte_cap_bounds_never_opened_channels() {
        let mut pending = PendingMetadata::with_limits(64, 16 * 1024);
        let title = "x".repeat(1024);
        let accepted = (1..=2000u16)
            .filter(|&channel| pending.enqueue(channel, Metadata::Title(title.clone())))
            .count();
        assert_eq!(accepted, 16);
        assert!(pending.total_bytes() <= 16 * 1024);

        // Room comes back once a channel is discarded.
        assert_eq!(pending.discard(1), 1);
        assert!(pending.enqueue(2001, Metadata::Title(title)));
    }
}
