mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "mmagic", version, about = "MMAGIC M2M controller/agent CLI")]
struct Cli {
    /// Output format.
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
    match cmd::run(cli.command, format) {
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

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "mmagic",
            "send",
            "/tmp/agent.sock",
            "--stream",
            "3",
            "--subsystem",
            "wlan",
            "--command",
            "5",
            "--data",
            "X",
        ])
        .expect("send args should parse");

        let Command::Send(args) = cli.command else {
            panic!("expected send");
        };
        assert_eq!(args.stream, 3);
        assert_eq!(args.subsystem, 1);
        assert_eq!(args.subcommand, 0);
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "mmagic",
            "send",
            "/tmp/agent.sock",
            "--subsystem",
            "sys",
            "--command",
            "2",
            "--hex",
            "00",
            "--data",
            "hello",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn rejects_unknown_subsystem() {
        let err = Cli::try_parse_from([
            "mmagic",
            "send",
            "/tmp/agent.sock",
            "--subsystem",
            "radio",
            "--command",
            "1",
        ])
        .expect_err("unknown subsystem should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn parses_decode_with_global_format() {
        let cli = Cli::try_parse_from(["mmagic", "decode", "00000000", "--format", "pretty"])
            .expect("decode args should parse");
        assert!(matches!(cli.command, Command::Decode(_)));
        assert!(matches!(cli.format, Some(OutputFormat::Pretty)));
    }
}
