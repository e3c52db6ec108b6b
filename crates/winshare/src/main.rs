mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "winshare", version, about = "Share single windows with a peer desktop")]
struct Cli {
    /// Event output format (stdout).
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use winshare_session::WindowType;

    #[test]
    fn parses_share_subcommand() {
        let cli = Cli::try_parse_from([
            "winshare",
            "share",
            "tcp:127.0.0.1:1770",
            "--engine",
            "/tmp/engine.sock",
            "--window",
            "0x1a00003",
            "--title",
            "xterm",
            "--window-type",
            "dialog",
        ])
        .expect("share args should parse");

        let Command::Share(args) = cli.command else {
            panic!("expected share");
        };
        assert_eq!(args.window, 0x1a0_0003);
        assert_eq!(args.window_type, Some(WindowType::Dialog));
        assert_eq!(args.title.as_deref(), Some("xterm"));
    }

    #[test]
    fn share_requires_engine_and_window() {
        let err = Cli::try_parse_from(["winshare", "share", "/tmp/peer.sock"])
            .expect_err("missing required args should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_receive_with_client_args() {
        let cli = Cli::try_parse_from([
            "winshare",
            "--format",
            "json",
            "receive",
            "/tmp/peer.sock",
            "--client",
            "/bin/sh",
            "--client-arg",
            "-c",
            "--client-arg",
            "exec viewer {fd}",
            "--once",
        ])
        .expect("receive args should parse");

        assert!(matches!(cli.format, Some(OutputFormat::Json)));
        let Command::Receive(args) = cli.command else {
            panic!("expected receive");
        };
        assert_eq!(args.client, "/bin/sh");
        assert_eq!(args.client_args, vec!["-c", "exec viewer {fd}"]);
        assert!(args.once);
    }

    #[test]
    fn rejects_bad_window_id() {
        let err = Cli::try_parse_from([
            "winshare", "share", "/tmp/p.sock", "--engine", "/tmp/e.sock", "--window", "xyz",
        ])
        .expect_err("bad window id should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
