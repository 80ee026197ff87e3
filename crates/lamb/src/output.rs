use std::io::{IsTerminal, Write};
use std::net::SocketAddr;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use lamb_fabric::{HelloResponse, QueueItem};
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
struct ListeningOutput {
    event: &'static str,
    addr: String,
    port: u16,
}

#[derive(Serialize)]
struct HelloOutput<'a> {
    event: &'static str,
    id: i64,
    addr: &'a str,
    port: u16,
}

#[derive(Serialize)]
struct ItemOutput {
    event: &'static str,
    kind: &'static str,
    size: usize,
    payload: String,
}

#[derive(Serialize)]
struct SentOutput {
    event: &'static str,
    port: u16,
    command: &'static str,
    size: usize,
}

pub fn print_listening(addr: SocketAddr, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&ListeningOutput {
            event: "listening",
            addr: addr.ip().to_string(),
            port: addr.port(),
        }),
        _ => println!("listening on {addr}"),
    }
}

pub fn print_hello(response: &HelloResponse, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&HelloOutput {
            event: "hello",
            id: response.id,
            addr: &response.addr,
            port: response.port,
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ID", "ADDR", "PORT"])
                .add_row(vec![
                    response.id.to_string(),
                    response.addr.clone(),
                    response.port.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!(
                "id={} session={}:{}",
                response.id, response.addr, response.port
            );
        }
    }
}

pub fn print_sent(port: u16, command: &'static str, size: usize, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&SentOutput {
            event: "sent",
            port,
            command,
            size,
        }),
        OutputFormat::Raw => {}
        _ => println!("sent {command} ({size} bytes) via session port {port}"),
    }
}

/// Print one pulled record; `None` means the queue was empty.
pub fn print_item(item: Option<&QueueItem>, format: OutputFormat) {
    let Some(item) = item else {
        match format {
            OutputFormat::Json => print_json(&ItemOutput {
                event: "empty",
                kind: "EMPTY",
                size: 0,
                payload: String::new(),
            }),
            OutputFormat::Raw => {}
            _ => println!("queue empty"),
        }
        return;
    };

    let body = trim_padding(item.payload.as_ref());
    match format {
        OutputFormat::Json => print_json(&ItemOutput {
            event: "record",
            kind: item.kind.name(),
            size: item.payload.len(),
            payload: payload_preview(body),
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["KIND", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    item.kind.name().to_string(),
                    item.payload.len().to_string(),
                    payload_preview(body),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "kind={} size={} payload={}",
                item.kind,
                item.payload.len(),
                payload_preview(body)
            );
        }
        OutputFormat::Raw => print_raw(body),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

/// Records are zero-padded to a fixed size; drop the padding for display.
fn trim_padding(payload: &[u8]) -> &[u8] {
    let end = payload
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |last| last + 1);
    &payload[..end]
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}
