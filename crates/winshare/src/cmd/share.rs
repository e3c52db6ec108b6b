use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::info;
use winshare_session::{
    connect_with_config, ResourceState, SessionConfig, SessionError, SessionEvents,
    SessionHandle, StatusCode, WindowId, WindowMetadata,
};
use winshare_session::{Avatar, Metadata};
use winshare_transport::UnixDomainSocket;

use crate::cmd::{install_ctrlc_handler, parse_endpoint, set_current, CurrentSession, ShareArgs};
use crate::exit::{io_error, session_error, transport_error, CliResult, SUCCESS};
use crate::output::{EventPrinter, OutputFormat};

/// Prints events and ends the session once the shared window is gone.
struct ShareEvents {
    printer: EventPrinter,
    handle: SessionHandle,
}

impl SessionEvents for ShareEvents {
    fn on_window_opened(&mut self, channel: u16) -> ResourceState {
        self.printer.on_window_opened(channel)
    }

    fn on_metadata(&mut self, channel: u16, metadata: &Metadata) {
        self.printer.on_metadata(channel, metadata);
    }

    fn on_window_closed(&mut self, channel: u16) {
        self.printer.on_window_closed(channel);
        let _ = self.handle.shutdown();
    }

    fn on_wall(&mut self, code: u16, text: &str) {
        self.printer.on_wall(code, text);
    }

    fn on_avatar(&mut self, avatar: &Avatar) {
        self.printer.on_avatar(avatar);
    }

    fn on_status(&mut self, window: Option<WindowId>, status: StatusCode) {
        self.printer.on_status(window, status);
    }
}

pub fn run(args: ShareArgs, format: OutputFormat) -> CliResult<i32> {
    let endpoint = parse_endpoint(&args.endpoint)?;
    let icon = args.icon.as_deref().map(read_image).transpose()?;
    let avatar = args.avatar.as_deref().map(read_image).transpose()?;

    let mut printer = EventPrinter::new(format);
    printer.on_status(Some(args.window), StatusCode::Connecting);
    let session = match connect_with_config(&endpoint, SessionConfig::sharing()) {
        Ok(session) => session,
        Err(err) => {
            printer.on_status(Some(args.window), err.status());
            return Err(session_error("connect failed", err));
        }
    };

    let engine = match UnixDomainSocket::connect(&args.engine) {
        Ok(engine) => engine,
        Err(err) => {
            printer.on_status(Some(args.window), StatusCode::EngineFailed);
            return Err(transport_error("engine connect failed", err));
        }
    };

    let handle = session.handle();
    let mut session = session.with_events(ShareEvents {
        printer,
        handle: handle.clone(),
    });

    if let Some(image) = avatar {
        session
            .send_avatar(image)
            .map_err(|err| session_error("avatar failed", err))?;
    }
    let metadata = WindowMetadata {
        title: args.title.clone(),
        window_type: args.window_type,
        transient_for: None,
        icon: icon.map(Into::into),
    };
    let channel = session
        .share_window(args.window, engine, metadata)
        .map_err(|err| session_error("share failed", err))?;
    info!(channel, window = args.window, "sharing window");

    let current: CurrentSession = Arc::new(Mutex::new(None));
    set_current(&current, Some(handle));
    let window = args.window;
    install_ctrlc_handler(current, move |handle| {
        if let Some(handle) = handle {
            let _ = handle.unshare_window(window);
            let _ = handle.shutdown();
        }
    })?;

    match session.run() {
        Ok(()) => Ok(SUCCESS),
        Err(SessionError::Disconnected(reason)) => {
            info!(%reason, "peer went away");
            Ok(SUCCESS)
        }
        Err(err) => Err(session_error("session failed", err)),
    }
}

fn read_image(path: &Path) -> CliResult<Vec<u8>> {
    std::fs::read(path).map_err(|err| io_error(&format!("reading {}", path.display()), err))
}
