//! Input readers and result writers around the batch runner.

use std::io::{Read, Write};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use clap::ValueEnum;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::batch::{LogInput, ResultRecord};

/// Column holding the log text in CSV inputs.
pub const MESSAGE_COLUMN: &str = "Message";
/// Optional column holding a source identifier in CSV inputs.
pub const EVENT_ID_COLUMN: &str = "eventid";

/// Supported input layouts.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum InputFormat {
    /// Pick from the file extension (`.csv` or `.jsonl`/`.json`).
    Auto,
    /// Comma-separated with a `Message` column.
    Csv,
    /// One JSON object per line with a `message` field.
    Jsonl,
}

impl InputFormat {
    /// Resolves `Auto` against a path.
    pub fn resolve(self, path: &Path) -> Result<Self> {
        if self != InputFormat::Auto {
            return Ok(self);
        }
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("csv") => Ok(InputFormat::Csv),
            Some("jsonl") | Some("json") | Some("ndjson") => Ok(InputFormat::Jsonl),
            _ => bail!("cannot infer input format from {path:?}; pass --input-format"),
        }
    }
}

/// Supported output layouts.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON array.
    Json,
    /// CSV with a header row.
    Csv,
}

/// Reads inputs from raw bytes in the given (resolved) format.
pub fn read_inputs(bytes: &[u8], format: InputFormat) -> Result<Vec<LogInput>> {
    let text = decode_text(bytes);
    let inputs = match format {
        InputFormat::Csv => read_csv(&text)?,
        InputFormat::Jsonl => read_jsonl(&text)?,
        InputFormat::Auto => bail!("input format must be resolved before reading"),
    };
    debug!(count = inputs.len(), ?format, "read inputs");
    Ok(inputs)
}

/// Reads a whole stream and parses it.
pub fn read_inputs_from<R: Read>(mut reader: R, format: InputFormat) -> Result<Vec<LogInput>> {
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .context("failed to read input")?;
    read_inputs(&bytes, format)
}

/// Decodes UTF-8, falling back to Windows-1252 for exports from Windows event
/// viewers that are not valid UTF-8.
pub fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            warn!("input is not valid UTF-8; decoding as Windows-1252");
            bytes.iter().map(|&b| cp1252_char(b)).collect()
        }
    }
}

// Windows-1252 differs from Latin-1 only in 0x80..=0x9F.
const CP1252_HIGH: [char; 32] = [
    '\u{20AC}', '\u{81}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{8D}', '\u{017D}', '\u{8F}',
    '\u{90}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}', '\u{0153}', '\u{9D}', '\u{017E}', '\u{0178}',
];

fn cp1252_char(byte: u8) -> char {
    match byte {
        0x80..=0x9F => CP1252_HIGH[(byte - 0x80) as usize],
        _ => char::from(byte),
    }
}

fn read_csv(text: &str) -> Result<Vec<LogInput>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers = reader.headers().context("failed to read CSV header")?.clone();
    let find = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
    };
    let message_col =
        find(MESSAGE_COLUMN).ok_or_else(|| anyhow!("CSV input has no '{MESSAGE_COLUMN}' column"))?;
    let id_col = find(EVENT_ID_COLUMN);

    let mut inputs = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("invalid CSV row {}", row + 2))?;
        let message = record
            .get(message_col)
            .ok_or_else(|| anyhow!("CSV row {} has no message cell", row + 2))?;
        let event_id = id_col
            .and_then(|col| record.get(col))
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        inputs.push(LogInput {
            event_id,
            message: message.to_string(),
        });
    }
    Ok(inputs)
}

#[derive(Deserialize)]
struct JsonlRow {
    message: String,
    #[serde(default, alias = "eventid")]
    event_id: Option<Value>,
}

fn read_jsonl(text: &str) -> Result<Vec<LogInput>> {
    let mut inputs = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row: JsonlRow = serde_json::from_str(line)
            .with_context(|| format!("invalid input record at line {}", line_no + 1))?;
        let event_id = match row.event_id {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) => Some(id),
            Some(other) => Some(other.to_string()),
        };
        inputs.push(LogInput {
            event_id,
            message: row.message,
        });
    }
    Ok(inputs)
}

/// Writes records in the requested format.
pub fn write_records<W: Write>(
    writer: W,
    records: &[ResultRecord],
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Json => write_json(writer, records),
        OutputFormat::Csv => write_csv(writer, records),
    }
}

fn write_json<W: Write>(mut writer: W, records: &[ResultRecord]) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, records).context("failed to write JSON output")?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

fn write_csv<W: Write>(writer: W, records: &[ResultRecord]) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for record in records {
        csv.serialize(record).context("failed to write CSV row")?;
    }
    csv.flush()?;
    Ok(())
}
