use std::time::Duration;

use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod doctor;
pub mod send;
pub mod version;
pub mod watch;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send one raw request to an endpoint and print the response.
    Send(SendArgs),
    /// Stream connection events and frames from an endpoint.
    Watch(WatchArgs),
    /// Show version information.
    Version(VersionArgs),
    /// Run local environment health checks.
    Doctor(DoctorArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args, format).await,
        Command::Watch(args) => watch::run(args, format).await,
        Command::Version(args) => version::run(args),
        Command::Doctor(args) => doctor::run(args, format).await,
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Endpoint address (host:port).
    pub addr: String,
    /// Head bytes as hex (e.g. 0200).
    #[arg(long, default_value = "")]
    pub head: String,
    /// Tail bytes as hex.
    #[arg(long, default_value = "")]
    pub tail: String,
    /// Payload bytes as hex.
    #[arg(long, default_value = "")]
    pub data: String,
    /// Device identifier as hex, for multiplexed endpoints.
    #[arg(long)]
    pub ident: Option<String>,
    /// Length-preamble width in bytes (1, 2 or 4).
    #[arg(long, default_value = "1")]
    pub preamble: usize,
    /// Keep-alive interval (e.g. 2s, 500ms).
    #[arg(long, default_value = "2s")]
    pub keep_alive: String,
    /// Response timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Give up if the endpoint is unreachable for this long.
    #[arg(long, default_value = "10s")]
    pub connect_timeout: String,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Endpoint address (host:port).
    pub addr: String,
    /// Length-preamble width in bytes (1, 2 or 4).
    #[arg(long, default_value = "1")]
    pub preamble: usize,
    /// Keep-alive interval (e.g. 2s, 500ms).
    #[arg(long, default_value = "2s")]
    pub keep_alive: String,
    /// Exit after printing N frames.
    #[arg(long)]
    pub count: Option<usize>,
    /// Print only frames, not connection state changes.
    #[arg(long)]
    pub frames_only: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug, Default)]
pub struct DoctorArgs {}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}

pub fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let input = input.trim();
    if input.len() % 2 != 0 {
        return Err(CliError::new(
            USAGE,
            format!("hex string must have an even number of digits: {input:?}"),
        ));
    }
    let mut out = Vec::with_capacity(input.len() / 2);
    for pair in input.as_bytes().chunks(2) {
        let pair = std::str::from_utf8(pair)
            .map_err(|_| CliError::new(USAGE, format!("invalid hex string: {input:?}")))?;
        let byte = u8::from_str_radix(pair, 16)
            .map_err(|_| CliError::new(USAGE, format!("invalid hex digit in {input:?}")))?;
        out.push(byte);
    }
    Ok(out)
}
