//! Off-chain Azimuth runtime: replays captured contract event logs into a derived point table.
//!
//! - **EventCatalog**: keccak256 fingerprints (topic0) of every Azimuth event, built once at
//!   startup.
//! - **EffectCompiler**: pure decoder from a [RawLogEntry] to zero or one point upsert; unknown
//!   events and malformed payloads are errors.
//! - **ReplayEngine**: drains unprocessed entries from the [Store] in `(block_number, log_index)`
//!   order, one transaction per batch, marking each entry processed exactly once.

pub mod abi;
pub mod catalog;
pub mod config;
pub mod cursor;
pub mod effect;
pub mod point;
pub mod replay;
pub mod store;

pub use abi::{topic_to_address, topic_to_number, topic_to_u32, RawLogEntry};
pub use catalog::{fingerprint, EventCatalog, EventKind};
pub use config::ReplayConfig;
pub use cursor::Cursor;
pub use effect::{DecodeError, Effect, EffectCompiler, Mutation, Proxy, Upsert};
pub use point::{AzimuthNumber, Point, Tier};
pub use replay::{ReplayEngine, ReplayError, ReplayReport};
pub use store::{Column, FieldValue, Store, StoreError, StoreTx};

/// Open the configured database and replay everything not yet processed.
pub fn replay_all(config: &ReplayConfig) -> Result<ReplayReport, ReplayError> {
    let mut store = Store::open(&config.database_path)?;
    let engine = ReplayEngine::new(EventCatalog::new(), config);
    engine.replay_all(&mut store)
}
