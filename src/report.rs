//! Batch summary persistence.

use std::path::Path;

use crate::error::MailError;
use crate::scheduler::BatchSummary;

/// Write the summary as pretty-printed JSON.
pub fn write_summary(path: impl AsRef<Path>, summary: &BatchSummary) -> Result<(), MailError> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(path, json)
        .map_err(|e| MailError::Io(format!("{}: {}", path.display(), e)))
}

/// Read a summary written by [`write_summary`].
pub fn read_summary(path: impl AsRef<Path>) -> Result<BatchSummary, MailError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| MailError::Io(format!("{}: {}", path.display(), e)))?;
    Ok(serde_json::from_str(&text)?)
}
