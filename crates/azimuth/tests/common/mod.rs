//! Common helpers for integration tests: log builders and an in-memory store.
//! Some helpers are only used by specific test binaries; allow dead_code to avoid per-binary warnings.
#![allow(dead_code)]

use azimuth::{fingerprint, EventKind, RawLogEntry, Store};
use tracing_subscriber::EnvFilter;

pub const CONTRACT: [u8; 20] = [0x22; 20];

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("azimuth=debug".parse().unwrap()))
        .with_test_writer()
        .try_init();
}

/// uint32 as an indexed topic / data word.
pub fn word(n: u32) -> [u8; 32] {
    let mut w = [0u8; 32];
    w[28..].copy_from_slice(&n.to_be_bytes());
    w
}

/// Address as an indexed topic (left-padded).
pub fn address_topic(addr: [u8; 20]) -> [u8; 32] {
    let mut w = [0u8; 32];
    w[12..].copy_from_slice(&addr);
    w
}

pub fn log(
    kind: EventKind,
    block_number: u64,
    log_index: u64,
    topic1: [u8; 32],
    topic2: [u8; 32],
    data: Vec<u8>,
) -> RawLogEntry {
    let mut block_hash = [0u8; 32];
    block_hash[24..].copy_from_slice(&block_number.to_be_bytes());
    let mut tx_hash = block_hash;
    tx_hash[..8].copy_from_slice(&log_index.to_be_bytes());
    RawLogEntry {
        block_number,
        block_hash,
        tx_hash,
        log_index,
        contract_address: CONTRACT,
        topic0: fingerprint(kind.signature()),
        topic1,
        topic2,
        data,
        is_processed: false,
    }
}

pub fn spawned(block: u64, idx: u64, parent: u32, child: u32) -> RawLogEntry {
    log(EventKind::Spawned, block, idx, word(parent), word(child), vec![])
}

pub fn activated(block: u64, idx: u64, number: u32) -> RawLogEntry {
    log(EventKind::Activated, block, idx, word(number), [0; 32], vec![])
}

pub fn owner_changed(block: u64, idx: u64, number: u32, owner: [u8; 20]) -> RawLogEntry {
    log(EventKind::OwnerChanged, block, idx, word(number), address_topic(owner), vec![])
}

pub fn proxy_changed(kind: EventKind, block: u64, idx: u64, number: u32, proxy: [u8; 20]) -> RawLogEntry {
    log(kind, block, idx, word(number), address_topic(proxy), vec![])
}

pub fn escape_requested(block: u64, idx: u64, number: u32, to: u32) -> RawLogEntry {
    log(EventKind::EscapeRequested, block, idx, word(number), word(to), vec![])
}

pub fn escape_canceled(block: u64, idx: u64, number: u32, to: u32) -> RawLogEntry {
    log(EventKind::EscapeCanceled, block, idx, word(number), word(to), vec![])
}

pub fn escape_accepted(block: u64, idx: u64, number: u32, sponsor: u32) -> RawLogEntry {
    log(EventKind::EscapeAccepted, block, idx, word(number), word(sponsor), vec![])
}

pub fn lost_sponsor(block: u64, idx: u64, number: u32, sponsor: u32) -> RawLogEntry {
    log(EventKind::LostSponsor, block, idx, word(number), word(sponsor), vec![])
}

pub fn broke_continuity(block: u64, idx: u64, number: u32, rift: u32) -> RawLogEntry {
    log(EventKind::BrokeContinuity, block, idx, word(number), word(rift), vec![])
}

pub fn changed_keys(
    block: u64,
    idx: u64,
    number: u32,
    encryption_key: [u8; 32],
    auth_key: [u8; 32],
    suite: u32,
    life: u32,
) -> RawLogEntry {
    let mut data = Vec::with_capacity(128);
    data.extend_from_slice(&encryption_key);
    data.extend_from_slice(&auth_key);
    data.extend_from_slice(&word(suite));
    data.extend_from_slice(&word(life));
    log(EventKind::ChangedKeys, block, idx, word(number), [0; 32], data)
}

/// In-memory store with `entries` saved in the given order.
pub fn store_with(entries: &[RawLogEntry]) -> Store {
    let store = Store::open_in_memory().expect("open in-memory store");
    for e in entries {
        store.save(e).expect("save entry");
    }
    store
}

/// Make any insert of point `number` fail inside SQLite.
pub fn fail_inserts_of(store: &Store, number: u32) {
    store
        .connection()
        .execute_batch(&format!(
            "create trigger fail_point_{number} before insert on points
             when new.azimuth_number = {number}
             begin select raise(abort, 'injected failure'); end;"
        ))
        .expect("create failure trigger");
}

pub fn clear_failure(store: &Store, number: u32) {
    store
        .connection()
        .execute_batch(&format!("drop trigger fail_point_{number};"))
        .expect("drop failure trigger");
}

pub fn processed_count(store: &Store) -> u64 {
    store
        .connection()
        .query_row("select count(*) from event_logs where is_processed = 1", [], |r| r.get(0))
        .expect("count processed")
}
