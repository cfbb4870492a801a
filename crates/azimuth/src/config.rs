//! Replay configuration.

use std::path::PathBuf;

/// Batch size used when none is configured.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Replay configuration.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// SQLite database holding `event_logs` and `points`.
    pub database_path: PathBuf,
    /// Max unprocessed entries applied per transaction.
    pub batch_size: usize,
}

impl ReplayConfig {
    /// Batch size actually used; a zero batch would never make progress.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("azimuth.db"),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}
