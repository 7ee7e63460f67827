//! JSON export

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

/// Report export errors
#[derive(Error, Debug)]
pub enum ReportError {
    /// File could not be written
    #[error("failed to write {path}: {source}")]
    Io {
        /// Target path
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Value could not be serialized
    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Write `value` to `path` as pretty-printed JSON
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ReportError> {
    let io_err = |source| ReportError::Io {
        path: path.display().to_string(),
        source,
    };

    let file = File::create(path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.write_all(b"\n").map_err(io_err)?;
    writer.flush().map_err(io_err)?;
    Ok(())
}
