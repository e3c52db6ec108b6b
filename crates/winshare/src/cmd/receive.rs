use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{info, warn};
use winshare_session::{CommandLauncher, SessionConfig, SessionError, SessionListener};

use crate::cmd::{
    install_ctrlc_handler, parse_duration, parse_endpoint, set_current, CurrentSession,
    ReceiveArgs,
};
use crate::exit::{session_error, CliResult, SUCCESS};
use crate::output::{EventPrinter, EventRecord, OutputFormat};

pub fn run(args: ReceiveArgs, format: OutputFormat) -> CliResult<i32> {
    let endpoint = parse_endpoint(&args.endpoint)?;
    let idle_timeout = args.idle_timeout.as_deref().map(parse_duration).transpose()?;
    let config = SessionConfig::receiving()
        .with_acknowledge_open(!args.no_ack)
        .with_idle_timeout(idle_timeout);

    let listener =
        SessionListener::bind(&endpoint, config).map_err(|err| session_error("bind failed", err))?;
    let printer = EventPrinter::new(format);
    printer.emit(EventRecord::new("listening").detail(listener.endpoint().to_string()));

    let running = Arc::new(AtomicBool::new(true));
    let current: CurrentSession = Arc::new(Mutex::new(None));
    {
        let running = running.clone();
        install_ctrlc_handler(current.clone(), move |handle| {
            running.store(false, Ordering::SeqCst);
            match handle {
                Some(handle) => {
                    let _ = handle.shutdown();
                }
                // Blocked in accept with nothing to tear down.
                None => std::process::exit(SUCCESS),
            }
        })?;
    }

    while running.load(Ordering::SeqCst) {
        let session = match listener.accept() {
            Ok(session) => session,
            Err(SessionError::PeerBusy) => continue,
            Err(err) => return Err(session_error("accept failed", err)),
        };
        printer.emit(EventRecord::new("peer_connected"));

        let mut session = session
            .with_events(printer)
            .with_launcher(launcher_for(&args));
        set_current(&current, Some(session.handle()));
        let outcome = session.run();
        set_current(&current, None);
        drop(session);

        match outcome {
            Ok(()) => info!("session shut down"),
            Err(SessionError::Disconnected(reason)) => info!(%reason, "peer went away"),
            Err(err) if args.once => return Err(session_error("session failed", err)),
            Err(err) => warn!(error = %err, "session failed; waiting for the next peer"),
        }
        printer.emit(EventRecord::new("peer_disconnected"));

        if args.once {
            break;
        }
    }

    Ok(SUCCESS)
}

fn launcher_for(args: &ReceiveArgs) -> CommandLauncher {
    let launcher = CommandLauncher::new(args.client.as_str());
    if args.client_args.is_empty() {
        launcher
    } else {
        launcher.with_args(args.client_args.iter().cloned())
    }
}
