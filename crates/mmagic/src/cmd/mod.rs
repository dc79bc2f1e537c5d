use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use mmagic_llc::Subsystem;

use crate::exit::{CliError, CliResult};
use crate::output::OutputFormat;

pub mod agent;
pub mod decode;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve a demo agent on a Unix socket.
    Agent(AgentArgs),
    /// Run one command round trip against an agent.
    Send(SendArgs),
    /// Decode a hex-encoded LLC frame.
    Decode(DecodeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Agent(args) => agent::run(args),
        Command::Send(args) => send::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct AgentArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Version string reported to `sys/1/0`.
    #[arg(long)]
    pub app_version: Option<String>,
    /// Do not announce the agent when a controller connects.
    #[arg(long)]
    pub no_start_notification: bool,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Stream to send on (0-31).
    #[arg(long, short = 's', default_value = "0")]
    pub stream: u8,
    /// Subsystem name (wlan, ip, ping, iperf, sys, tcp) or number.
    #[arg(long, value_parser = parse_subsystem)]
    pub subsystem: u8,
    /// Command id within the subsystem.
    #[arg(long)]
    pub command: u8,
    #[arg(long, default_value = "0")]
    pub subcommand: u8,
    /// Raw string payload.
    #[arg(long, conflicts_with = "hex")]
    pub data: Option<String>,
    /// Hex-encoded payload.
    #[arg(long, conflicts_with = "data")]
    pub hex: Option<String>,
    /// How long to wait for the agent and its response (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Frame bytes as hex, LLC header first. Whitespace is ignored.
    pub frame: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_subsystem(input: &str) -> Result<u8, String> {
    if let Ok(raw) = input.parse::<u8>() {
        return Ok(raw);
    }
    (1..=u8::MAX)
        .filter_map(|raw| Subsystem::try_from(raw).ok())
        .find(|subsystem| subsystem.name().eq_ignore_ascii_case(input))
        .map(u8::from)
        .ok_or_else(|| format!("unknown subsystem: {input}"))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(number) => (number, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };
    let value: u64 = number
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::usage("duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

pub fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let digits: Vec<u8> = input
        .bytes()
        .filter(|byte| !byte.is_ascii_whitespace())
        .collect();
    if digits.len() % 2 != 0 {
        return Err(CliError::usage("hex input has an odd number of digits"));
    }
    digits
        .chunks(2)
        .map(|pair| {
            let text = std::str::from_utf8(pair).unwrap_or("??");
            u8::from_str_radix(text, 16)
                .map_err(|_| CliError::usage(format!("invalid hex byte: {text}")))
        })
        .collect()
}
