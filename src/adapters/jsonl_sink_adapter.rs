//! JSON-lines trade decision sink.
//!
//! Writes one serialized [`TradeDecision`] per line to a file or to stdout.

use crate::domain::decision::TradeDecision;
use crate::domain::error::AppError;
use crate::ports::decision_port::DecisionSink;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::debug;

pub struct JsonlSink {
    writer: BufWriter<Box<dyn Write>>,
    written: usize,
}

impl JsonlSink {
    pub fn new(writer: Box<dyn Write>) -> Self {
        Self {
            writer: BufWriter::new(writer),
            written: 0,
        }
    }

    /// Open `path`, truncating unless `append` is set.
    pub fn open<P: AsRef<Path>>(path: P, append: bool) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), append, "opened decision log");
        Ok(Self::new(Box::new(file)))
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl DecisionSink for JsonlSink {
    fn record(&mut self, decision: &TradeDecision) -> Result<(), AppError> {
        serde_json::to_writer(&mut self.writer, decision).map_err(io::Error::from)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), AppError> {
        self.writer.flush()?;
        Ok(())
    }
}
