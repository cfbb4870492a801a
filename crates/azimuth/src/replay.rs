//! Replay engine: drains unprocessed event logs into the point table.
//!
//! Batches of up to `batch_size` entries are read in `(block_number, log_index)` order and
//! applied in one transaction each. Every entry is compiled, its upsert (if any) executed, and
//! the entry marked processed; any failure rolls the whole batch back and stops the replay.
//! Upserts are idempotent, so a batch interrupted before commit can be replayed unchanged.

use crate::abi::RawLogEntry;
use crate::catalog::EventCatalog;
use crate::config::ReplayConfig;
use crate::cursor::Cursor;
use crate::effect::{DecodeError, Effect, EffectCompiler};
use crate::store::{Store, StoreError, StoreTx};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplayError {
    /// Unknown event or malformed payload. Retrying will fail the same way.
    #[error("cannot decode log at {at} (topic0 0x{}): {source}", hex::encode(.topic0))]
    Decode {
        at: Cursor,
        topic0: [u8; 32],
        #[source]
        source: DecodeError,
    },
    /// Store failed while applying one entry; the batch was rolled back.
    #[error("store failed applying log at {at} (topic0 0x{}): {source}", hex::encode(.topic0))]
    Apply {
        at: Cursor,
        topic0: [u8; 32],
        #[source]
        source: StoreError,
    },
    /// Store failed outside any single entry (fetch, begin, commit).
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReplayError {
    /// Storage failures leave nothing applied and may be retried; decode failures need a
    /// catalog fix first.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ReplayError::Decode { .. })
    }

    /// Entry that triggered the failure, if any.
    pub fn position(&self) -> Option<Cursor> {
        match self {
            ReplayError::Decode { at, .. } | ReplayError::Apply { at, .. } => Some(*at),
            ReplayError::Store(_) => None,
        }
    }

    pub fn topic0(&self) -> Option<[u8; 32]> {
        match self {
            ReplayError::Decode { topic0, .. } | ReplayError::Apply { topic0, .. } => Some(*topic0),
            ReplayError::Store(_) => None,
        }
    }
}

/// Summary of a successful [ReplayEngine::replay_all].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub batches: u64,
    pub entries: u64,
    /// Entries whose effect was an upsert (no-op events excluded).
    pub effects_applied: u64,
    /// Last entry marked processed.
    pub last: Option<Cursor>,
}

/// Single-worker replay loop over a [Store].
pub struct ReplayEngine {
    compiler: EffectCompiler,
    batch_size: usize,
}

impl ReplayEngine {
    pub fn new(catalog: EventCatalog, config: &ReplayConfig) -> Self {
        Self {
            compiler: EffectCompiler::new(catalog),
            batch_size: config.effective_batch_size(),
        }
    }

    pub fn with_batch_size(catalog: EventCatalog, batch_size: usize) -> Self {
        let config = ReplayConfig {
            batch_size,
            ..Default::default()
        };
        Self::new(catalog, &config)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Apply every unprocessed entry, batch by batch, until a fetch comes back empty.
    pub fn replay_all(&self, store: &mut Store) -> Result<ReplayReport, ReplayError> {
        let mut report = ReplayReport::default();
        loop {
            let batch = store.unprocessed(self.batch_size)?;
            if batch.is_empty() {
                break;
            }
            let applied = self.apply_batch(store, &batch)?;
            report.batches += 1;
            report.entries += batch.len() as u64;
            report.effects_applied += applied;
            report.last = batch.last().map(RawLogEntry::position);
            tracing::debug!(
                batch = report.batches,
                entries = batch.len(),
                applied,
                last = ?report.last,
                "replayed batch"
            );
        }
        tracing::info!(
            batches = report.batches,
            entries = report.entries,
            applied = report.effects_applied,
            "replay complete"
        );
        Ok(report)
    }

    fn apply_batch(&self, store: &mut Store, batch: &[RawLogEntry]) -> Result<u64, ReplayError> {
        let tx = store.begin()?;
        match self.apply_entries(&tx, batch) {
            Ok(applied) => {
                tx.commit()?;
                Ok(applied)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback() {
                    tracing::error!(reason = %rollback, "batch rollback failed");
                }
                Err(e)
            }
        }
    }

    fn apply_entries(&self, tx: &StoreTx<'_>, batch: &[RawLogEntry]) -> Result<u64, ReplayError> {
        let mut applied = 0;
        for entry in batch {
            let at = entry.position();
            let effect = self.compiler.compile(entry).map_err(|source| {
                tracing::error!(
                    block_number = at.block_number,
                    log_index = at.log_index,
                    topic0 = %hex::encode(entry.topic0),
                    event = %self.compiler.catalog().name_of(&entry.topic0),
                    reason = %source,
                    "cannot decode log, halting replay"
                );
                ReplayError::Decode {
                    at,
                    topic0: entry.topic0,
                    source,
                }
            })?;
            let apply_err = |source| ReplayError::Apply {
                at,
                topic0: entry.topic0,
                source,
            };
            if let Effect::Upsert(upsert) = &effect {
                tx.upsert(
                    upsert.number,
                    &upsert.statement(),
                    &upsert.mutation.assignments(),
                )
                .map_err(apply_err)?;
                applied += 1;
            }
            tx.mark_processed(at).map_err(apply_err)?;
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::CHANGED_KEYS_DATA_LEN;

    #[test]
    fn decode_errors_are_not_retryable() {
        let err = ReplayError::Decode {
            at: Cursor::new(4, 2),
            topic0: [0xab; 32],
            source: DecodeError::UnknownEvent { topic0: [0xab; 32] },
        };
        assert!(!err.is_retryable());
        assert_eq!(err.position(), Some(Cursor::new(4, 2)));
        assert_eq!(err.topic0(), Some([0xab; 32]));
        let msg = err.to_string();
        assert!(msg.contains("block 4 log 2"), "{msg}");
        assert!(msg.contains(&"ab".repeat(32)), "{msg}");
    }

    #[test]
    fn store_errors_are_retryable() {
        let err = ReplayError::Apply {
            at: Cursor::new(1, 0),
            topic0: [0; 32],
            source: StoreError::MissingLog(Cursor::new(1, 0)),
        };
        assert!(err.is_retryable());
        let err = ReplayError::from(StoreError::MissingLog(Cursor::new(1, 0)));
        assert!(err.is_retryable());
        assert_eq!(err.position(), None);
    }

    #[test]
    fn malformed_payload_message_names_event() {
        let err = ReplayError::Decode {
            at: Cursor::new(1, 0),
            topic0: [0; 32],
            source: DecodeError::MalformedPayload {
                event: crate::catalog::EventKind::ChangedKeys,
                expected: CHANGED_KEYS_DATA_LEN,
                actual: 100,
            },
        };
        assert!(err.to_string().contains("malformed ChangedKeys payload"));
    }

    #[test]
    fn batch_size_is_at_least_one() {
        let engine = ReplayEngine::with_batch_size(EventCatalog::new(), 0);
        assert_eq!(engine.batch_size(), 1);
        let engine = ReplayEngine::new(EventCatalog::new(), &ReplayConfig::default());
        assert_eq!(engine.batch_size(), 500);
    }
}
