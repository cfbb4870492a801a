//! Position of a log entry in the causal order.

use std::fmt;

/// `(block_number, log_index)`: total order over logs and the uniqueness key of `event_logs`.
///
/// Field order matters: the derived `Ord` compares block first, then log index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor {
    pub block_number: u64,
    pub log_index: u64,
}

impl Cursor {
    pub fn new(block_number: u64, log_index: u64) -> Self {
        Self {
            block_number,
            log_index,
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block {} log {}", self.block_number, self.log_index)
    }
}
