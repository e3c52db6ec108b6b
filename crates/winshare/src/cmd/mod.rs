use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use winshare_session::{SessionHandle, WindowId, WindowType};
use winshare_transport::Endpoint;

use crate::exit::{transport_error, CliError, CliResult, INTERNAL};
use crate::output::OutputFormat;

pub mod receive;
pub mod share;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept a peer and show the windows it shares.
    Receive(ReceiveArgs),
    /// Share one local window with a listening peer.
    Share(ShareArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Receive(args) => receive::run(args, format),
        Command::Share(args) => share::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ReceiveArgs {
    /// Socket path, `tcp` or `tcp:HOST:PORT` to listen on.
    #[arg(env = "WINSHARE_ENDPOINT")]
    pub endpoint: String,
    /// Framebuffer client started for every window the peer opens.
    #[arg(long, env = "WINSHARE_CLIENT", default_value = "winshare-viewer")]
    pub client: String,
    /// Client argument; `{fd}` and `{channel}` are substituted. Repeatable.
    /// Default: -f {fd} -r {channel}
    #[arg(long = "client-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub client_args: Vec<String>,
    /// Exit after the first session ends.
    #[arg(long)]
    pub once: bool,
    /// Do not echo OPEN back to the peer.
    #[arg(long)]
    pub no_ack: bool,
    /// Drop the peer after this long without traffic (e.g. 30s, 500ms).
    #[arg(long)]
    pub idle_timeout: Option<String>,
}

#[derive(Args, Debug)]
pub struct ShareArgs {
    /// Socket path, `tcp` or `tcp:HOST:PORT` of the receiving peer.
    #[arg(env = "WINSHARE_ENDPOINT")]
    pub endpoint: String,
    /// Socket of the framebuffer engine serving the window.
    #[arg(long)]
    pub engine: PathBuf,
    /// Window id, decimal or 0x-prefixed hex.
    #[arg(long, value_parser = parse_window_id)]
    pub window: WindowId,
    #[arg(long)]
    pub title: Option<String>,
    /// Window type letter or EWMH name (e.g. N, dialog, _NET_WM_WINDOW_TYPE_MENU).
    #[arg(long)]
    pub window_type: Option<WindowType>,
    /// Image file sent as the window icon.
    #[arg(long, value_name = "FILE")]
    pub icon: Option<PathBuf>,
    /// Image file sent as our avatar once connected.
    #[arg(long, value_name = "FILE")]
    pub avatar: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_window_id(raw: &str) -> Result<WindowId, String> {
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => WindowId::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed.map_err(|err| format!("invalid window id '{raw}': {err}"))
}

pub(crate) fn parse_endpoint(raw: &str) -> CliResult<Endpoint> {
    raw.parse()
        .map_err(|err| transport_error("invalid endpoint", err))
}

pub(crate) fn parse_duration(raw: &str) -> CliResult<std::time::Duration> {
    let invalid = || CliError::new(crate::exit::USAGE, format!("invalid duration '{raw}'"));
    let (digits, scale) = if let Some(ms) = raw.strip_suffix("ms") {
        (ms, 1)
    } else if let Some(s) = raw.strip_suffix('s') {
        (s, 1000)
    } else {
        (raw, 1000)
    };
    let value: u64 = digits.trim().parse().map_err(|_| invalid())?;
    Ok(std::time::Duration::from_millis(
        value.checked_mul(scale).ok_or_else(invalid)?,
    ))
}

/// Slot holding the handle of the session currently running, if any.
pub(crate) type CurrentSession = std::sync::Arc<Mutex<Option<SessionHandle>>>;

pub(crate) fn set_current(slot: &CurrentSession, handle: Option<SessionHandle>) {
    *slot.lock().unwrap_or_else(PoisonError::into_inner) = handle;
}

/// Ctrl-C runs `on_interrupt` with the live session's handle.
pub(crate) fn install_ctrlc_handler<F>(slot: CurrentSession, mut on_interrupt: F) -> CliResult<()>
where
    F: FnMut(Option<&SessionHandle>) + Send + 'static,
{
    ctrlc::set_handler(move || {
        let current = slot.lock().unwrap_or_else(PoisonError::into_inner);
        on_interrupt(current.as_ref());
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
