use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use serde::Serialize;
use tracing::{debug, warn};
use winshare_frame::CONTROL;
use winshare_transport::LocalStream;

use crate::error::{Result, SessionError};

/// Identity of a window on the sharing side (an X11 window id, say).
pub type WindowId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Control,
    Video,
    Audio,
}

/// One live channel and its local resource.
#[derive(Debug)]
pub struct ChannelEntry {
    pub id: u16,
    pub kind: ChannelKind,
    socket: Option<LocalStream>,
    /// Bytes from the peer not yet accepted by the local socket.
    outbound: BytesMut,
    ready: bool,
    video: Option<u16>,
    window: Option<WindowId>,
    last_activity: Instant,
}

impl ChannelEntry {
    fn new(id: u16, kind: ChannelKind, socket: Option<LocalStream>) -> Self {
        Self {
            id,
            kind,
            socket,
            outbound: BytesMut::new(),
            ready: false,
            video: None,
            window: None,
            last_activity: Instant::now(),
        }
    }

    pub fn control() -> Self {
        let mut entry = Self::new(CONTROL, ChannelKind::Control, None);
        entry.ready = true;
        entry
    }

    pub fn video(id: u16, socket: Option<LocalStream>) -> Self {
        Self::new(id, ChannelKind::Video, socket)
    }

    /// Audio channel announced alongside `video`. Audio is not synchronised
    /// with its video channel; the link is informational.
    pub fn audio(id: u16, video: u16, socket: Option<LocalStream>) -> Self {
        let mut entry = Self::new(id, ChannelKind::Audio, socket);
        entry.video = Some(video);
        entry.ready = true;
        entry
    }

    /// Bind this channel to a forwarded window.
    pub fn with_window(mut self, window: WindowId) -> Self {
        self.window = Some(window);
        self
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    pub fn window(&self) -> Option<WindowId> {
        self.window
    }

    /// Video channel an audio channel was announced for.
    pub fn video_channel(&self) -> Option<u16> {
        self.video
    }

    pub fn socket(&self) -> Option<&LocalStream> {
        self.socket.as_ref()
    }

    pub fn socket_mut(&mut self) -> Option<&mut LocalStream> {
        self.socket.as_mut()
    }

    pub fn has_socket(&self) -> bool {
        self.socket.is_some()
    }

    pub(crate) fn outbound(&self) -> &BytesMut {
        &self.outbound
    }

    /// Socket and outbound buffer together, for the forwarder.
    pub(crate) fn io_parts(&mut self) -> (Option<&mut LocalStream>, &mut BytesMut) {
        (self.socket.as_mut(), &mut self.outbound)
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    fn release(&mut self) {
        if let Some(socket) = self.socket.take() {
            if !self.outbound.is_empty() {
                debug!(
                    channel = self.id,
                    dropped = self.outbound.len(),
                    "discarding undelivered bytes"
                );
            }
            socket.shutdown();
        }
        self.outbound.clear();
    }
}

/// Live channels for one session.
///
/// Owns every channel's local socket. Channel 0 is registered from the start
/// and can never be removed. Ids for new channels come from a per-registry
/// counter that starts at 1 and never goes back.
#[derive(Debug)]
pub struct ChannelRegistry {
    entries: BTreeMap<u16, ChannelEntry>,
    windows: HashMap<WindowId, u16>,
    next_id: u32,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(CONTROL, ChannelEntry::control());
        Self {
            entries,
            windows: HashMap::new(),
            next_id: 1,
        }
    }

    /// Add a channel. Fails if the id is already live.
    pub fn register(&mut self, entry: ChannelEntry) -> Result<()> {
        if self.entries.contains_key(&entry.id) {
            return Err(SessionError::DuplicateChannel(entry.id));
        }
        if let Some(window) = entry.window {
            if self.windows.contains_key(&window) {
                return Err(SessionError::AlreadyShared(window));
            }
            self.windows.insert(window, entry.id);
        }
        debug!(channel = entry.id, kind = ?entry.kind, "channel registered");
        self.entries.insert(entry.id, entry);
        Ok(())
    }

    pub fn lookup(&self, id: u16) -> Option<&ChannelEntry> {
        self.entries.get(&id)
    }

    pub fn lookup_mut(&mut self, id: u16) -> Option<&mut ChannelEntry> {
        self.entries.get_mut(&id)
    }

    pub fn contains(&self, id: u16) -> bool {
        self.entries.contains_key(&id)
    }

    /// Remove a channel and shut its local socket down.
    ///
    /// Safe on an absent id. The control channel is never removed.
    pub fn unregister(&mut self, id: u16) -> Option<ChannelEntry> {
        if id == CONTROL {
            warn!("refusing to unregister the control channel");
            return None;
        }
        let mut entry = self.entries.remove(&id)?;
        if let Some(window) = entry.window {
            self.windows.remove(&window);
        }
        entry.release();
        debug!(channel = id, "channel unregistered");
        Some(entry)
    }

    /// Next id for a channel this side originates.
    pub fn allocate_id(&mut self) -> Result<u16> {
        while self.next_id <= u32::from(u16::MAX) {
            let id = self.next_id as u16;
            self.next_id += 1;
            if !self.entries.contains_key(&id) {
                return Ok(id);
            }
        }
        Err(SessionError::ChannelIdsExhausted)
    }

    /// The channel forwarding `window`, if it is shared.
    pub fn forwarded_window(&self, window: WindowId) -> Option<&ChannelEntry> {
        self.windows.get(&window).and_then(|id| self.entries.get(id))
    }

    pub fn channel_for_window(&self, window: WindowId) -> Option<u16> {
        self.windows.get(&window).copied()
    }

    /// Ids of every channel except control, ascending.
    pub fn channel_ids(&self) -> Vec<u16> {
        self.entries.keys().copied().filter(|id| *id != CONTROL).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelEntry> {
        self.entries.values()
    }

    /// Number of channels, control included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when only the control channel is left.
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    #[test]
    fn control_channel_is_always_present() {
        let mut registry = ChannelRegistry::new();
        assert_eq!(registry.lookup(0).map(|e| e.kind), Some(ChannelKind::Control));
        assert!(registry.unregister(0).is_none());
        assert!(registry.contains(0));
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_registration_is_refused() {
        let mut registry = ChannelRegistry::new();
        registry.register(ChannelEntry::video(3, None)).unwrap();
        let err = registry.register(ChannelEntry::video(3, None)).unwrap_err();
        assert!(matches!(err, SessionError::DuplicateChannel(3)));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn unregister_absent_id_is_harmless() {
        let mut registry = ChannelRegistry::new();
        assert!(registry.unregister(9).is_none());
        registry.register(ChannelEntry::video(9, None)).unwrap();
        assert!(registry.unregister(9).is_some());
        assert!(registry.unregister(9).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn unregister_shuts_local_socket() {
        let (ours, mut theirs) = LocalStream::pair().unwrap();
        let mut registry = ChannelRegistry::new();
        registry.register(ChannelEntry::video(4, Some(ours))).unwrap();
        registry.unregister(4);

        let mut buf = [0u8; 4];
        assert_eq!(theirs.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn ids_are_monotonic_and_skip_live_ones() {
        let mut registry = ChannelRegistry::new();
        registry.register(ChannelEntry::video(2, None)).unwrap();
        assert_eq!(registry.allocate_id().unwrap(), 1);
        assert_eq!(registry.allocate_id().unwrap(), 3);
        registry.unregister(2);
        assert_eq!(registry.allocate_id().unwrap(), 4);
    }

    #[test]
    fn ids_run_out() {
        let mut registry = ChannelRegistry::new();
        registry.next_id = u32::from(u16::MAX);
        assert_eq!(registry.allocate_id().unwrap(), u16::MAX);
        assert!(matches!(
            registry.allocate_id(),
            Err(SessionError::ChannelIdsExhausted)
        ));
    }

    #[test]
    fn window_index_follows_registration() {
        let mut registry = ChannelRegistry::new();
        registry
            .register(ChannelEntry::video(1, None).with_window(0x4000_01))
            .unwrap();
        assert_eq!(registry.channel_for_window(0x4000_01), Some(1));
        assert_eq!(registry.forwarded_window(0x4000_01).map(|e| e.id), Some(1));

        let err = registry
            .register(ChannelEntry::video(2, None).with_window(0x4000_01))
            .unwrap_err();
        assert!(matches!(err, SessionError::AlreadyShared(0x4000_01)));

        registry.unregister(1);
        assert_eq!(registry.channel_for_window(0x4000_01), None);
    }

    #[test]
    fn audio_entry_links_video() {
        let entry = ChannelEntry::audio(8, 7, None);
        assert_eq!(entry.video_channel(), Some(7));
        assert!(entry.is_ready());
        assert!(!ChannelEntry::video(7, None).is_ready());
    }

    #[test]
    fn channel_ids_exclude_control() {
        let mut registry = ChannelRegistry::new();
        registry.register(ChannelEntry::video(5, None)).unwrap();
        registry.register(ChannelEntry::audio(2, 5, None)).unwrap();
        assert_eq!(registry.channel_ids(), vec![2, 5]);
        assert_eq!(registry.iter().count(), 3);
    }
}
