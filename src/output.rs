//! Trade output sinks.
//!
//! The core hands each trade over as soon as it is constructed; these
//! writers put it somewhere useful. Field order comes from [`Trade`]'s
//! `Serialize` impl, so the CSV header and JSON keys need no knowledge of
//! decoding internals.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use tracing::info;

use crate::types::Trade;

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("csv write failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("json write failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// File sink for decoded trades, one record per trade.
pub enum TradeWriter {
    Csv(csv::Writer<File>),
    Jsonl(BufWriter<File>),
}

impl TradeWriter {
    /// CSV with a header row.
    pub fn csv(path: &Path) -> Result<Self, OutputError> {
        Ok(Self::Csv(csv::Writer::from_path(path)?))
    }

    /// JSON Lines, one object per line.
    pub fn jsonl(path: &Path) -> Result<Self, OutputError> {
        Ok(Self::Jsonl(BufWriter::new(File::create(path)?)))
    }

    /// Appends one record and flushes, so a killed run loses at most the
    /// in-flight trade.
    pub fn write(&mut self, trade: &Trade) -> Result<(), OutputError> {
        match self {
            Self::Csv(writer) => {
                writer.serialize(trade)?;
                writer.flush()?;
            }
            Self::Jsonl(writer) => {
                serde_json::to_writer(&mut *writer, trade)?;
                writer.write_all(b"\n")?;
                writer.flush()?;
            }
        }
        Ok(())
    }
}

/// Logs a human-readable line for one trade.
pub fn write_stdout(trade: &Trade) {
    info!(
        wallet = %trade.wallet,
        side = %trade.side,
        tokens = %trade.tokens,
        price = %trade.price,
        total = %trade.total_usdc,
        block = trade.block_number,
        tx = %trade.tx_hash,
        "Trade"
    );
}
