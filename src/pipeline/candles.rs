use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use trend_signals::Bar;

/// CSV row structure for 1-minute candles
#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

/// Parse a candle timestamp: RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) or epoch milliseconds
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }
    if let Ok(millis) = raw.parse::<i64>() {
        return DateTime::from_timestamp_millis(millis)
            .with_context(|| format!("Epoch milliseconds out of range: {}", raw));
    }

    anyhow::bail!("Unrecognized timestamp: {}", raw)
}

/// Load candles from a CSV file, zstd-compressed when the extension is `.zst`
pub fn load_candles(path: &Path) -> Result<Vec<Bar>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file: {:?}", path))?;

    let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "zst") {
        let decoder = zstd::stream::Decoder::new(file)
            .with_context(|| format!("Failed to create zstd decoder for: {:?}", path))?;
        Box::new(decoder)
    } else {
        Box::new(file)
    };

    read_candles(BufReader::new(reader))
}

pub fn read_candles<R: Read>(reader: R) -> Result<Vec<Bar>> {
    let mut csv_reader = csv::Reader::from_reader(reader);

    let mut bars = Vec::new();
    let mut skipped = 0u64;

    for (line, result) in csv_reader.deserialize().enumerate() {
        let row: CsvRow = result.with_context(|| format!("Failed to parse CSV row {}", line + 1))?;
        let timestamp = parse_timestamp(&row.timestamp)?;

        // Skip rows that cannot be a valid candle
        if row.high < row.low || !row.close.is_finite() {
            skipped += 1;
            continue;
        }

        bars.push(Bar::new(timestamp, row.open, row.high, row.low, row.close, row.volume));
    }

    if skipped > 0 {
        tracing::debug!("Skipped {} malformed candles", skipped);
    }

    Ok(bars)
}
