//! Historical trade data loading.
//!
//! CSV columns, in order: `timestamp,symbol,price,volume`. Timestamps
//! are Unix milliseconds. `#` lines are comments; an optional header is
//! detected by the literal words "timestamp" or "symbol" on the first
//! data line. The loader sorts ascending by timestamp before returning.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One historical trade record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeTick {
    pub timestamp_ms: i64,
    pub symbol: String,
    pub price: f64,
    pub volume: i64,
}

/// Data loading failures. A malformed row aborts the whole load.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("failed to open data file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("csv read failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("malformed row at line {line}: {reason}")]
    BadRow { line: u64, reason: String },
}

/// Load trade ticks from a CSV file, sorted by timestamp.
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<TradeTick>, DataError> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|source| DataError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(file);

    let mut ticks = Vec::new();
    let mut first_data_line = true;

    for record in reader.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);

        if first_data_line {
            first_data_line = false;
            if is_header(&record) {
                continue;
            }
        }

        if record.len() < 4 {
            return Err(DataError::BadRow {
                line,
                reason: format!("expected 4 columns, found {}", record.len()),
            });
        }

        let timestamp_ms: i64 = parse_field(&record[0], "timestamp", line)?;
        let symbol = record[1].to_string();
        let price: f64 = parse_field(&record[2], "price", line)?;
        let volume: i64 = parse_field(&record[3], "volume", line)?;

        ticks.push(TradeTick {
            timestamp_ms,
            symbol,
            price,
            volume,
        });
    }

    sort_by_timestamp(&mut ticks);
    Ok(ticks)
}

fn is_header(record: &csv::StringRecord) -> bool {
    record.iter().any(|field| {
        let lower = field.to_ascii_lowercase();
        lower.contains("timestamp") || lower.contains("symbol")
    })
}

fn parse_field<T: std::str::FromStr>(raw: &str, name: &str, line: u64) -> Result<T, DataError> {
    raw.parse().map_err(|_| DataError::BadRow {
        line,
        reason: format!("invalid {name}: {raw:?}"),
    })
}

/// Keep only ticks for one symbol.
pub fn filter_by_symbol(ticks: &[TradeTick], symbol: &str) -> Vec<TradeTick> {
    ticks.iter().filter(|t| t.symbol == symbol).cloned().collect()
}

/// Keep ticks with `start <= ts <= end` (inclusive on both ends).
pub fn filter_by_time_range(ticks: &[TradeTick], start_ms: i64, end_ms: i64) -> Vec<TradeTick> {
    ticks
        .iter()
        .filter(|t| t.timestamp_ms >= start_ms && t.timestamp_ms <= end_ms)
        .cloned()
        .collect()
}

pub fn sort_by_timestamp(ticks: &mut [TradeTick]) {
    ticks.sort_by_key(|t| t.timestamp_ms);
}
