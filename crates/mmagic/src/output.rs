use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use mmagic_llc::{CommandId, Subsystem};
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

/// Result of one command round trip.
#[derive(Serialize)]
pub struct ResponseOutput {
    pub stream: u8,
    pub subsystem: String,
    pub command: u8,
    pub subcommand: u8,
    pub status: &'static str,
    pub payload_size: usize,
    pub payload: String,
    #[serde(skip)]
    pub raw: Vec<u8>,
}

impl ResponseOutput {
    pub fn new(stream: u8, id: CommandId, payload: &[u8]) -> Self {
        Self {
            stream,
            subsystem: subsystem_label(id.subsystem),
            command: id.command,
            subcommand: id.subcommand,
            status: "OK",
            payload_size: payload.len(),
            payload: payload_preview(payload),
            raw: payload.to_vec(),
        }
    }
}

/// A decoded LLC frame.
#[derive(Serialize)]
pub struct FrameOutput {
    pub packet_type: String,
    pub seq: u8,
    pub stream: u8,
    pub length: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub m2m: Option<String>,
    pub payload_size: usize,
    pub payload: String,
    #[serde(skip)]
    pub raw: Vec<u8>,
}

pub fn print_response(out: &ResponseOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => print_table(
            &["STREAM", "COMMAND", "STATUS", "SIZE", "PAYLOAD"],
            vec![
                out.stream.to_string(),
                format!("{}/{}/{}", out.subsystem, out.command, out.subcommand),
                out.status.to_string(),
                out.payload_size.to_string(),
                out.payload.clone(),
            ],
        ),
        OutputFormat::Pretty => println!(
            "stream={} command={}/{}/{} status={} size={} payload={}",
            out.stream,
            out.subsystem,
            out.command,
            out.subcommand,
            out.status,
            out.payload_size,
            out.payload
        ),
        OutputFormat::Raw => print_raw(&out.raw),
    }
}

pub fn print_frame(out: &FrameOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => print_table(
            &["TYPE", "SEQ", "STREAM", "LENGTH", "M2M", "PAYLOAD"],
            vec![
                out.packet_type.clone(),
                out.seq.to_string(),
                out.stream.to_string(),
                out.length.to_string(),
                out.m2m.clone().unwrap_or_else(|| "-".to_string()),
                out.payload.clone(),
            ],
        ),
        OutputFormat::Pretty => {
            print!(
                "type={} seq={} stream={} length={}",
                out.packet_type, out.seq, out.stream, out.length
            );
            if let Some(m2m) = &out.m2m {
                print!(" m2m={m2m}");
            }
            println!(" payload={}", out.payload);
        }
        OutputFormat::Raw => print_raw(&out.raw),
    }
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn print_table(header: &[&str], row: Vec<String>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.to_vec())
        .add_row(row);
    println!("{table}");
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

/// Subsystem name when known, otherwise its number.
pub fn subsystem_label(raw: u8) -> String {
    Subsystem::try_from(raw)
        .map(|subsystem| subsystem.name().to_string())
        .unwrap_or_else(|_| raw.to_string())
}

pub fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes: {}>", payload.len(), to_hex(payload)),
    }
}

pub fn to_hex(data: &[u8]) -> String {
    data.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_known_and_unknown_subsystems() {
        assert_eq!(subsystem_label(1), "wlan");
        assert_eq!(subsystem_label(42), "42");
    }

    #[test]
    fn binary_payload_preview_shows_hex() {
        assert_eq!(payload_preview(b"hi"), "hi");
        assert_eq!(payload_preview(&[0xFF, 0x00]), "<binary 2 bytes: ff00>");
    }

    #[test]
    fn response_json_omits_raw_bytes() {
        let out = ResponseOutput::new(3, CommandId::new(1, 5, 0), b"Y");
        let json = serde_json::to_string(&out).unwrap();
        assert_eq!(
            json,
            r#"{"stream":3,"subsystem":"wlan","command":5,"subcommand":0,"status":"OK","payload_size":1,"payload":"Y"}"#
        );
    }
}
