use std::io::{IsTerminal, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use homelink_transport::TransportEvent;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ResponseOutput<'a> {
    addr: &'a str,
    elapsed_ms: u128,
    response_size: usize,
    response_hex: String,
    timestamp: String,
}

pub fn print_response(addr: &str, response: &[u8], elapsed: Duration, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ResponseOutput {
                addr,
                elapsed_ms: elapsed.as_millis(),
                response_size: response.len(),
                response_hex: hex_encode(response),
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ENDPOINT", "ELAPSED", "SIZE", "RESPONSE"])
                .add_row(vec![
                    addr.to_string(),
                    format!("{elapsed:?}"),
                    response.len().to_string(),
                    hex_encode(response),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "endpoint={} elapsed={:?} size={} response={}",
                addr,
                elapsed,
                response.len(),
                hex_encode(response)
            );
        }
        OutputFormat::Raw => {
            print_raw(response);
        }
    }
}

#[derive(Serialize)]
struct EventOutput<'a> {
    addr: &'a str,
    event: &'static str,
    frame_size: Option<usize>,
    frame_hex: Option<String>,
    timestamp: String,
}

pub fn print_transport_event(addr: &str, event: &TransportEvent, format: OutputFormat) {
    let (name, frame) = match event {
        TransportEvent::Connected => ("connected", None),
        TransportEvent::StableConnected => ("stable-connected", None),
        TransportEvent::Disconnected => ("disconnected", None),
        TransportEvent::ProlongedOutage => ("prolonged-outage", None),
        TransportEvent::Frame(body) => ("frame", Some(body.as_ref())),
    };

    match format {
        OutputFormat::Json => {
            let out = EventOutput {
                addr,
                event: name,
                frame_size: frame.map(<[u8]>::len),
                frame_hex: frame.map(hex_encode),
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => match frame {
            Some(body) => println!("{addr} frame size={} {}", body.len(), hex_encode(body)),
            None => println!("{addr} {name}"),
        },
        OutputFormat::Raw => {
            if let Some(body) = frame {
                print_raw(body);
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

pub fn hex_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for byte in data {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
