//! The session loop.
//!
//! One thread owns the shared stream, the channel registry and every local
//! socket. Each [`Session::turn`] builds a `poll(2)` set from what it owns,
//! waits once and services whatever became ready:
//!
//! - the stream: frames are decoded and dispatched in arrival order
//! - the wake socket: commands queued by [`SessionHandle`]s are applied
//! - channel sockets: bytes are pumped in both directions
//!
//! Errors on the stream are fatal and tear every channel down. Errors that
//! concern a single control message or a single channel are logged and the
//! session carries on.

use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, error, info, trace, warn};
use winshare_frame::{Fill, FrameError, FrameReader, FrameWriter, CONTROL};
use winshare_transport::{Interest, LocalStream, PollSet, Readiness};

use crate::avatar::decode_avatar;
use crate::config::{Role, SessionConfig};
use crate::control::{ControlMessage, Metadata, WindowType};
use crate::error::{Result, SessionError};
use crate::events::{NoEvents, ResourceState, SessionEvents};
use crate::forwarder::{Delivery, Forwarder, Pump};
use crate::greeting::{self, GreetingRole};
use crate::launcher::FramebufferLauncher;
use crate::listener::SessionLease;
use crate::pending::PendingMetadata;
use crate::registry::{ChannelEntry, ChannelKind, ChannelRegistry, WindowId};
use crate::status::StatusCode;

/// What the loop should do after a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    Continue,
    Shutdown,
}

/// Metadata sent along with a newly shared window.
#[derive(Debug, Clone, Default)]
pub struct WindowMetadata {
    pub title: Option<String>,
    pub window_type: Option<WindowType>,
    /// Window this one is transient for. Only sent if that window is shared
    /// too, as its channel id.
    pub transient_for: Option<WindowId>,
    /// Encoded icon image.
    pub icon: Option<Bytes>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Stream,
    Wake,
    Channel(u16),
}

enum Command {
    Share {
        window: WindowId,
        engine: LocalStream,
        metadata: WindowMetadata,
        reply: Sender<Result<u16>>,
    },
    Unshare {
        window: WindowId,
    },
    UpdateMetadata {
        window: WindowId,
        metadata: Metadata,
    },
    MarkReady {
        channel: u16,
    },
    Wall {
        code: u16,
        text: String,
    },
    Avatar {
        image: Bytes,
    },
    Pointer {
        position: Option<(u16, u16)>,
    },
    Respawn {
        token: u32,
    },
    Listen {
        video: u16,
        socket: Option<LocalStream>,
        reply: Sender<Result<u16>>,
    },
    Shutdown,
}

/// A window-sharing session with one peer.
pub struct Session {
    config: SessionConfig,
    reader: FrameReader<LocalStream>,
    writer: FrameWriter<LocalStream>,
    registry: ChannelRegistry,
    pending: PendingMetadata,
    forwarder: Forwarder,
    events: Box<dyn SessionEvents + Send>,
    launcher: Option<Box<dyn FramebufferLauncher + Send>>,
    commands: Receiver<Command>,
    command_tx: Sender<Command>,
    wake_rx: UnixStream,
    wake_tx: Arc<UnixStream>,
    poll: PollSet<Token>,
    last_peer_activity: Instant,
    respawn_token: Option<u32>,
    closed: bool,
    lease: Option<SessionLease>,
}

impl Session {
    /// Start a session on a stream whose greeting has already been handled.
    pub fn new(stream: LocalStream, config: SessionConfig) -> Result<Self> {
        let read_half = stream.try_clone()?;
        stream.set_nonblocking(true)?;

        let (wake_rx, wake_tx) = UnixStream::pair()?;
        wake_rx.set_nonblocking(true)?;
        wake_tx.set_nonblocking(true)?;
        let (command_tx, commands) = mpsc::channel();

        debug!(
            role = %config.role,
            transport = stream.kind(),
            max_payload = config.frame.effective_max_payload(),
            "session started"
        );

        Ok(Self {
            reader: FrameReader::with_config(read_half, config.frame.clone()),
            writer: FrameWriter::with_config(stream, config.frame.clone()),
            registry: ChannelRegistry::new(),
            pending: PendingMetadata::with_limits(
                config.max_pending_per_channel,
                config.max_pending_bytes,
            ),
            forwarder: Forwarder::new(config.effective_read_chunk()),
            events: Box::new(NoEvents),
            launcher: None,
            commands,
            command_tx,
            wake_rx,
            wake_tx: Arc::new(wake_tx),
            poll: PollSet::new(),
            last_peer_activity: Instant::now(),
            respawn_token: None,
            closed: false,
            lease: None,
            config,
        })
    }

    /// Perform this end's half of the greeting, then start the session.
    ///
    /// For a socket handed over by the transport (a tube), or any stream
    /// obtained outside [`SessionListener`](crate::SessionListener) and
    /// [`connect`](crate::connect).
    pub fn from_stream(
        mut stream: LocalStream,
        greeting_role: GreetingRole,
        config: SessionConfig,
    ) -> Result<Self> {
        greeting::perform(&mut stream, greeting_role, config.greeting_timeout)?;
        Self::new(stream, config)
    }

    pub fn with_events<E>(mut self, events: E) -> Self
    where
        E: SessionEvents + Send + 'static,
    {
        self.events = Box::new(events);
        self
    }

    pub fn with_launcher<L>(mut self, launcher: L) -> Self
    where
        L: FramebufferLauncher + Send + 'static,
    {
        self.launcher = Some(Box::new(launcher));
        self
    }

    pub(crate) fn attach_lease(&mut self, lease: SessionLease) {
        self.lease = Some(lease);
    }

    /// A handle for other threads.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            tx: self.command_tx.clone(),
            wake: Arc::clone(&self.wake_tx),
        }
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Most recent RESPAWN token from the peer.
    pub fn respawn_token(&self) -> Option<u32> {
        self.respawn_token
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Run until shutdown or a fatal error.
    pub fn run(&mut self) -> Result<()> {
        info!(role = %self.config.role, "session loop running");
        loop {
            if self.turn(None)? == Turn::Shutdown {
                return Ok(());
            }
        }
    }

    /// One loop iteration: wait up to `timeout` (`None` = until something
    /// happens), then service everything that became ready.
    ///
    /// A fatal error closes every channel, reports the failure status and
    /// leaves the session closed.
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<Turn> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        match self.turn_inner(timeout) {
            Ok(Turn::Shutdown) => {
                self.finish();
                Ok(Turn::Shutdown)
            }
            Ok(Turn::Continue) => Ok(Turn::Continue),
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    fn turn_inner(&mut self, timeout: Option<Duration>) -> Result<Turn> {
        let now = Instant::now();
        self.check_idle(now)?;
        let wait = self.next_wait(timeout, now);

        self.build_poll_set();
        self.poll.wait(wait)?;
        let ready: Vec<(Token, Readiness)> = self.poll.ready().collect();

        for (token, readiness) in ready {
            match token {
                Token::Stream => {
                    if readiness.writable {
                        self.flush_stream()?;
                    }
                    if readiness.wants_read() {
                        self.read_stream()?;
                    }
                }
                Token::Wake => {
                    if self.drain_commands() == Turn::Shutdown {
                        return Ok(Turn::Shutdown);
                    }
                }
                Token::Channel(id) => self.service_channel(id, readiness)?,
            }
        }

        self.flush_stream()?;
        Ok(Turn::Continue)
    }

    fn build_poll_set(&mut self) {
        self.poll.clear();
        let stream_interest = if self.writer.has_pending() {
            Interest::BOTH
        } else {
            Interest::READABLE
        };
        self.poll
            .register(self.reader.get_ref().as_raw_fd(), stream_interest, Token::Stream);
        self.poll
            .register(self.wake_rx.as_raw_fd(), Interest::READABLE, Token::Wake);

        let read_local = self.local_reads_allowed();
        for entry in self.registry.iter() {
            let Some(socket) = entry.socket() else {
                continue;
            };
            let interest = Interest {
                readable: read_local,
                writable: !entry.outbound().is_empty(),
            };
            if interest.readable || interest.writable {
                self.poll
                    .register(socket.as_raw_fd(), interest, Token::Channel(entry.id));
            }
        }
    }

    /// Local sockets are not read while the stream is backed up.
    fn local_reads_allowed(&self) -> bool {
        self.writer.pending_len() < self.config.outbound_high_water
    }

    fn next_wait(&self, timeout: Option<Duration>, now: Instant) -> Option<Duration> {
        let mut wait = timeout;
        let mut consider = |left: Duration| {
            wait = Some(wait.map_or(left, |current| current.min(left)));
        };
        if let Some(idle) = self.config.idle_timeout {
            consider(idle.saturating_sub(now.saturating_duration_since(self.last_peer_activity)));
        }
        if let Some(idle) = self.config.channel_idle_timeout {
            for entry in self.registry.iter().filter(|e| e.kind != ChannelKind::Control) {
                consider(idle.saturating_sub(entry.idle_for(now)));
            }
        }
        wait
    }

    fn check_idle(&mut self, now: Instant) -> Result<()> {
        if let Some(idle) = self.config.idle_timeout {
            if now.saturating_duration_since(self.last_peer_activity) >= idle {
                return Err(SessionError::Timeout(idle));
            }
        }
        if let Some(idle) = self.config.channel_idle_timeout {
            let expired: Vec<u16> = self
                .registry
                .iter()
                .filter(|e| e.kind != ChannelKind::Control && e.idle_for(now) >= idle)
                .map(|e| e.id)
                .collect();
            for id in expired {
                info!(channel = id, idle = ?idle, "closing idle channel");
                self.close_channel(id, true)?;
            }
        }
        Ok(())
    }

    fn flush_stream(&mut self) -> Result<()> {
        self.writer.flush_pending().map(|_| ()).map_err(stream_error)
    }

    fn read_stream(&mut self) -> Result<()> {
        let filled = self.reader.fill();
        if let Ok(Fill::Data(n)) = filled {
            self.last_peer_activity = Instant::now();
            trace!(len = n, "stream bytes read");
        }
        // Frames completed before a decode error are still dispatched.
        while let Some(frame) = self.reader.next_ready() {
            self.handle_frame(frame.channel, frame.payload)?;
        }
        filled.map(|_| ()).map_err(stream_error)
    }

    fn handle_frame(&mut self, channel: u16, payload: Bytes) -> Result<()> {
        if channel == CONTROL {
            return self.handle_control(&payload);
        }

        let Some(entry) = self.registry.lookup_mut(channel) else {
            warn!(channel, len = payload.len(), "dropping frame for unregistered channel");
            return Ok(());
        };
        let kind = entry.kind;
        match self.forwarder.deliver(entry, &payload) {
            Delivery::Written => {}
            Delivery::Buffered(waiting) if waiting > self.config.channel_backlog_limit => {
                warn!(
                    channel,
                    waiting,
                    limit = self.config.channel_backlog_limit,
                    "local socket stopped reading, closing channel"
                );
                self.close_channel(channel, true)?;
            }
            Delivery::Buffered(waiting) => {
                trace!(channel, waiting, "local socket full, buffering");
            }
            Delivery::NoSocket if kind == ChannelKind::Audio => {
                self.events.on_audio(channel, &payload);
            }
            Delivery::NoSocket => {
                debug!(channel, len = payload.len(), "no local socket, dropping frame");
            }
            Delivery::Failed(err) => {
                warn!(channel, error = %err, "local write failed, closing channel");
                self.close_channel(channel, true)?;
            }
        }
        Ok(())
    }

    fn handle_control(&mut self, payload: &Bytes) -> Result<()> {
        let message = match ControlMessage::decode(payload) {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!("empty control message ignored");
                return Ok(());
            }
            Err(err) => {
                warn!(
                    opcode = payload.first().copied(),
                    len = payload.len(),
                    error = %err,
                    "dropping malformed control message"
                );
                return Ok(());
            }
        };
        debug!(message = %message, "control message received");

        match message {
            ControlMessage::Open { channel } => self.on_open(channel)?,
            ControlMessage::Close { channel } => self.on_close(channel)?,
            ControlMessage::Set { channel, metadata } => self.on_set(channel, metadata),
            ControlMessage::Wall { code, text } => self.events.on_wall(code, &text),
            ControlMessage::Respawn { token } => {
                self.respawn_token = Some(token);
                self.events.on_respawn(token);
            }
            ControlMessage::Avatar { image } => match decode_avatar(&image) {
                Ok(avatar) => {
                    debug!(width = avatar.width, height = avatar.height, "avatar received");
                    self.events.on_avatar(&avatar);
                }
                Err(err) => warn!(len = image.len(), error = %err, "undecodable avatar"),
            },
            ControlMessage::Listen { video, audio } => self.on_listen(video, audio)?,
            ControlMessage::Mouse { position } => self.events.on_pointer(position),
        }
        Ok(())
    }

    fn on_open(&mut self, channel: u16) -> Result<()> {
        if channel == CONTROL {
            warn!("ignoring OPEN for the control channel");
            return Ok(());
        }
        match self.config.role {
            Role::Sharing => {
                let Some(entry) = self.registry.lookup_mut(channel) else {
                    warn!(channel, "OPEN for a channel not opened here");
                    return Ok(());
                };
                if entry.is_ready() {
                    return Ok(());
                }
                entry.set_ready(true);
                let window = entry.window();
                info!(channel, "peer acknowledged channel");
                self.events.on_status(window, StatusCode::SocketReady);
                Ok(())
            }
            Role::Receiving => self.open_window(channel),
        }
    }

    fn open_window(&mut self, channel: u16) -> Result<()> {
        if self.registry.contains(channel) {
            warn!(channel, "peer reopened a live channel, ignoring");
            return Ok(());
        }

        let socket = match self.launch(channel) {
            Ok(socket) => socket,
            Err(err) => {
                error!(channel, error = %err, "failed to start framebuffer client");
                self.events.on_status(None, StatusCode::EngineFailed);
                self.pending.discard(channel);
                return self.queue_control(&ControlMessage::Close { channel });
            }
        };

        if let Err(err) = self.registry.register(ChannelEntry::video(channel, socket)) {
            warn!(channel, error = %err, "could not register channel");
            return Ok(());
        }
        info!(channel, "window opened");

        let state = self.events.on_window_opened(channel);
        if self.config.acknowledge_open {
            self.queue_control(&ControlMessage::Open { channel })?;
        }
        if state == ResourceState::Ready {
            self.mark_ready(channel);
        }
        Ok(())
    }

    fn launch(&mut self, channel: u16) -> std::io::Result<Option<LocalStream>> {
        let Some(launcher) = self.launcher.as_mut() else {
            return Ok(None);
        };
        let socket = launcher.launch(channel)?;
        if let Err(err) = socket.set_nonblocking(true) {
            launcher.release(channel);
            return Err(std::io::Error::other(err));
        }
        Ok(Some(socket))
    }

    fn on_close(&mut self, channel: u16) -> Result<()> {
        if channel == CONTROL {
            debug!("ignoring CLOSE for the control channel");
            return Ok(());
        }
        if !self.registry.contains(channel) {
            let dropped = self.pending.discard(channel);
            warn!(channel, dropped_metadata = dropped, "CLOSE for unknown channel");
            return Ok(());
        }
        self.close_channel(channel, false)
    }

    fn on_set(&mut self, channel: u16, metadata: Metadata) {
        if channel == CONTROL {
            warn!(kind = ?metadata.kind(), "ignoring SET for the control channel");
            return;
        }
        match self.registry.lookup(channel) {
            Some(entry) if entry.is_ready() => self.events.on_metadata(channel, &metadata),
            _ => {
                self.pending.enqueue(channel, metadata);
            }
        }
    }

    fn on_listen(&mut self, video: u16, audio: u16) -> Result<()> {
        if audio == CONTROL || self.registry.contains(audio) {
            warn!(video, audio, "LISTEN for a channel already in use");
            return Ok(());
        }
        if !self.registry.contains(video) {
            debug!(video, audio, "LISTEN names an unknown video channel");
        }
        self.registry
            .register(ChannelEntry::audio(audio, video, None))?;
        info!(video, audio, "audio channel opened");
        self.events.on_audio_opened(audio, video);
        Ok(())
    }

    /// Mark a window ready and apply its postponed metadata, oldest first.
    ///
    /// Returns false if the channel is not registered.
    pub fn mark_ready(&mut self, channel: u16) -> bool {
        let Some(entry) = self.registry.lookup_mut(channel) else {
            warn!(channel, "mark_ready for unknown channel");
            return false;
        };
        entry.set_ready(true);
        for metadata in self.pending.flush(channel) {
            self.events.on_metadata(channel, &metadata);
        }
        true
    }

    /// Tear a channel down locally, telling the peer if `notify_peer`.
    fn close_channel(&mut self, id: u16, notify_peer: bool) -> Result<()> {
        let Some(entry) = self.registry.unregister(id) else {
            return Ok(());
        };
        let dropped = self.pending.discard(id);
        if let Some(launcher) = self.launcher.as_mut() {
            launcher.release(id);
        }
        if notify_peer {
            self.queue_control(&ControlMessage::Close { channel: id })?;
        }
        if entry.kind == ChannelKind::Video {
            self.events.on_window_closed(id);
            if let Some(window) = entry.window() {
                self.events.on_status(Some(window), StatusCode::Unshared);
            }
        }
        info!(channel = id, dropped_metadata = dropped, notify_peer, "channel closed");
        Ok(())
    }

    fn service_channel(&mut self, id: u16, readiness: Readiness) -> Result<()> {
        let Some(entry) = self.registry.lookup_mut(id) else {
            return Ok(());
        };

        if readiness.writable {
            if let Delivery::Failed(err) = self.forwarder.flush_local(entry) {
                warn!(channel = id, error = %err, "local write failed, closing channel");
                return self.close_channel(id, true);
            }
        }

        let should_read = readiness.hangup
            || readiness.error
            || (readiness.readable
                && self.writer.pending_len() < self.config.outbound_high_water);
        if should_read && self.forwarder.pump_local(entry, &mut self.writer)? == Pump::Closed {
            info!(channel = id, "local socket closed");
            return self.close_channel(id, true);
        }
        Ok(())
    }

    fn queue_control(&mut self, message: &ControlMessage) -> Result<()> {
        self.writer.queue(CONTROL, &message.encode())?;
        debug!(message = %message, "control message queued");
        Ok(())
    }

    fn require_role(&self, role: Role) -> Result<()> {
        if self.config.role == role {
            Ok(())
        } else {
            Err(SessionError::WrongRole(role))
        }
    }

    /// Start forwarding a local window to the peer.
    ///
    /// `engine` is the framebuffer engine's socket for this window. Sends
    /// OPEN followed by whatever metadata is known. Returns the channel id.
    pub fn share_window(
        &mut self,
        window: WindowId,
        engine: LocalStream,
        metadata: WindowMetadata,
    ) -> Result<u16> {
        self.require_role(Role::Sharing)?;
        if self.registry.channel_for_window(window).is_some() {
            self.events.on_status(Some(window), StatusCode::Unshareable);
            return Err(SessionError::AlreadyShared(window));
        }
        let id = match self.registry.allocate_id() {
            Ok(id) => id,
            Err(err) => {
                self.events.on_status(Some(window), StatusCode::Unshareable);
                return Err(err);
            }
        };

        let mut sets = Vec::new();
        if let Some(title) = metadata.title {
            sets.push(Metadata::Title(title));
        }
        if let Some(window_type) = metadata.window_type {
            sets.push(Metadata::WindowType(window_type));
        }
        if let Some(parent) = metadata
            .transient_for
            .and_then(|parent| self.registry.channel_for_window(parent))
        {
            sets.push(Metadata::Transiency(parent));
        }
        if let Some(icon) = metadata.icon {
            sets.push(Metadata::Icon(icon));
        }

        // Everything is encoded before anything is registered or queued, so a
        // failure leaves no trace of the window on either side.
        let mut bodies = vec![ControlMessage::Open { channel: id }.encode()];
        bodies.extend(sets.into_iter().map(|metadata| {
            ControlMessage::Set {
                channel: id,
                metadata,
            }
            .encode()
        }));
        let max = self.writer.config().effective_max_payload();
        if let Some(body) = bodies.iter().find(|body| body.len() > max) {
            warn!(window, size = body.len(), max, "window metadata does not fit in a frame");
            self.events.on_status(Some(window), StatusCode::Unshareable);
            return Err(SessionError::MetadataTooLarge {
                window,
                size: body.len(),
                max,
            });
        }

        if let Err(err) = engine.set_nonblocking(true) {
            self.events.on_status(Some(window), StatusCode::EngineFailed);
            return Err(err.into());
        }
        self.registry
            .register(ChannelEntry::video(id, Some(engine)).with_window(window))?;
        for body in &bodies {
            self.writer.queue(CONTROL, body)?;
        }

        info!(channel = id, window, sets = bodies.len() - 1, "window shared");
        self.events.on_status(Some(window), StatusCode::Shared);
        Ok(id)
    }

    /// Stop forwarding a window. Unknown windows are ignored.
    pub fn unshare_window(&mut self, window: WindowId) -> Result<()> {
        self.require_role(Role::Sharing)?;
        match self.registry.channel_for_window(window) {
            Some(id) => self.close_channel(id, true),
            None => {
                debug!(window, "unshare for a window that is not shared");
                Ok(())
            }
        }
    }

    /// Send new metadata for a shared window.
    pub fn update_metadata(&mut self, window: WindowId, metadata: Metadata) -> Result<()> {
        self.require_role(Role::Sharing)?;
        let Some(id) = self.registry.channel_for_window(window) else {
            debug!(window, kind = ?metadata.kind(), "metadata for a window that is not shared");
            return Ok(());
        };
        self.send_metadata(id, metadata)
    }

    fn send_metadata(&mut self, channel: u16, metadata: Metadata) -> Result<()> {
        self.queue_control(&ControlMessage::Set { channel, metadata })
    }

    pub fn send_wall(&mut self, code: u16, text: impl Into<String>) -> Result<()> {
        self.queue_control(&ControlMessage::Wall {
            code,
            text: text.into(),
        })
    }

    pub fn send_avatar(&mut self, image: impl Into<Bytes>) -> Result<()> {
        self.queue_control(&ControlMessage::Avatar {
            image: image.into(),
        })
    }

    /// Show the pointer at `(x, y)`, or hide it.
    pub fn send_pointer(&mut self, position: Option<(u16, u16)>) -> Result<()> {
        self.queue_control(&ControlMessage::Mouse { position })
    }

    pub fn send_respawn(&mut self, token: u32) -> Result<()> {
        self.queue_control(&ControlMessage::Respawn { token })
    }

    /// Open an audio channel alongside `video` and announce it with LISTEN.
    ///
    /// Bytes read from `socket` are forwarded like any channel.
    pub fn announce_audio(&mut self, video: u16, socket: Option<LocalStream>) -> Result<u16> {
        self.require_role(Role::Sharing)?;
        let id = self.registry.allocate_id()?;
        if let Some(socket) = &socket {
            socket.set_nonblocking(true)?;
        }
        self.registry
            .register(ChannelEntry::audio(id, video, socket))?;
        self.queue_control(&ControlMessage::Listen { video, audio: id })?;
        info!(video, audio = id, "audio channel announced");
        Ok(id)
    }

    fn drain_commands(&mut self) -> Turn {
        let mut buf = [0u8; 64];
        loop {
            match self.wake_rx.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        while let Ok(command) = self.commands.try_recv() {
            if self.apply(command) == Turn::Shutdown {
                return Turn::Shutdown;
            }
        }
        Turn::Continue
    }

    fn apply(&mut self, command: Command) -> Turn {
        let outcome = match command {
            Command::Share {
                window,
                engine,
                metadata,
                reply,
            } => {
                let result = self.share_window(window, engine, metadata);
                if let Err(err) = &result {
                    warn!(window, error = %err, "share failed");
                }
                let _ = reply.send(result);
                Ok(())
            }
            Command::Listen {
                video,
                socket,
                reply,
            } => {
                let result = self.announce_audio(video, socket);
                if let Err(err) = &result {
                    warn!(video, error = %err, "audio announcement failed");
                }
                let _ = reply.send(result);
                Ok(())
            }
            Command::Unshare { window } => self.unshare_window(window),
            Command::UpdateMetadata { window, metadata } => self.update_metadata(window, metadata),
            Command::MarkReady { channel } => {
                self.mark_ready(channel);
                Ok(())
            }
            Command::Wall { code, text } => self.send_wall(code, text),
            Command::Avatar { image } => self.send_avatar(image),
            Command::Pointer { position } => self.send_pointer(position),
            Command::Respawn { token } => self.send_respawn(token),
            Command::Shutdown => return Turn::Shutdown,
        };
        if let Err(err) = outcome {
            warn!(error = %err, "session command failed");
        }
        Turn::Continue
    }

    /// Request an orderly shutdown from the session's own thread.
    pub fn shutdown(&mut self) {
        if !self.closed {
            self.finish();
        }
    }

    fn close_all(&mut self, notify_peer: bool) {
        for id in self.registry.channel_ids() {
            if let Err(err) = self.close_channel(id, notify_peer) {
                debug!(channel = id, error = %err, "close during teardown failed");
            }
        }
    }

    fn finish(&mut self) {
        self.close_all(true);
        if let Err(err) = self.flush_stream() {
            debug!(error = %err, "final flush failed");
        }
        self.reader.get_ref().shutdown();
        self.closed = true;
        self.lease = None;
        info!("session shut down");
    }

    fn fail(&mut self, err: &SessionError) {
        error!(error = %err, status = err.status().code(), "session failed");
        self.close_all(false);
        self.events.on_status(None, err.status());
        self.reader.get_ref().shutdown();
        self.closed = true;
        self.lease = None;
    }
}

fn stream_error(err: FrameError) -> SessionError {
    if err.is_disconnect() {
        SessionError::Disconnected(err.to_string())
    } else {
        SessionError::Frame(err)
    }
}

/// Sends commands to a running session from any thread.
///
/// Every call wakes the session loop. Calls that return a channel id block
/// until the session has applied them, so they must not be made from the
/// session's own thread.
#[derive(Clone)]
pub struct SessionHandle {
    tx: Sender<Command>,
    wake: Arc<UnixStream>,
}

impl SessionHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).map_err(|_| SessionError::Closed)?;
        match (&*self.wake).write(&[1]) {
            Ok(_) => Ok(()),
            // A full wake socket already has the loop's attention.
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(()),
            Err(_) => Err(SessionError::Closed),
        }
    }

    pub fn share_window(
        &self,
        window: WindowId,
        engine: LocalStream,
        metadata: WindowMetadata,
    ) -> Result<u16> {
        let (reply, rx) = mpsc::channel();
        self.send(Command::Share {
            window,
            engine,
            metadata,
            reply,
        })?;
        rx.recv().map_err(|_| SessionError::Closed)?
    }

    pub fn unshare_window(&self, window: WindowId) -> Result<()> {
        self.send(Command::Unshare { window })
    }

    pub fn update_metadata(&self, window: WindowId, metadata: Metadata) -> Result<()> {
        self.send(Command::UpdateMetadata { window, metadata })
    }

    pub fn mark_ready(&self, channel: u16) -> Result<()> {
        self.send(Command::MarkReady { channel })
    }

    pub fn send_wall(&self, code: u16, text: impl Into<String>) -> Result<()> {
        self.send(Command::Wall {
            code,
            text: text.into(),
        })
    }

    pub fn send_avatar(&self, image: impl Into<Bytes>) -> Result<()> {
        self.send(Command::Avatar {
            image: image.into(),
        })
    }

    pub fn send_pointer(&self, position: Option<(u16, u16)>) -> Result<()> {
        self.send(Command::Pointer { position })
    }

    pub fn send_respawn(&self, token: u32) -> Result<()> {
        self.send(Command::Respawn { token })
    }

    pub fn announce_audio(&self, video: u16, socket: Option<LocalStream>) -> Result<u16> {
        let (reply, rx) = mpsc::channel();
        self.send(Command::Listen {
            video,
            socket,
            reply,
        })?;
        rx.recv().map_err(|_| SessionError::Closed)?
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle").finish_non_exhaustive()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.config.role)
            .field("channels", &self.registry.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
