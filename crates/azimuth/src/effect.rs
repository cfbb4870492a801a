//! Effect compiler: raw log entry -> point upsert.
//!
//! Pure and deterministic. Each cataloged event has one decoding rule in [RULES]; the
//! [EffectCompiler] indexes them by fingerprint. Values that depend on earlier state (sponsor,
//! rift) come from the event payload alone, never from the store.

use crate::abi::{topic_to_address, topic_to_number, topic_to_u32, word_to_u32, RawLogEntry, WORD};
use crate::catalog::{EventCatalog, EventKind};
use crate::point::AzimuthNumber;
use crate::store::{upsert_statement, Column, FieldValue};
use std::collections::HashMap;
use thiserror::Error;

/// Data length of ChangedKeys: four words (encryption key, auth key, suite, life).
pub const CHANGED_KEYS_DATA_LEN: usize = 4 * WORD;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown event fingerprint 0x{}", hex::encode(.topic0))]
    UnknownEvent { topic0: [u8; 32] },
    #[error("malformed {event} payload: expected {expected} data bytes, got {actual}")]
    MalformedPayload {
        event: EventKind,
        expected: usize,
        actual: usize,
    },
}

/// Which proxy address a `Changed*Proxy` event sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proxy {
    Spawn,
    Transfer,
    Management,
    Voting,
}

impl Proxy {
    fn column(self) -> Column {
        match self {
            Proxy::Spawn => Column::SpawnAddress,
            Proxy::Transfer => Column::TransferAddress,
            Proxy::Management => Column::ManagementAddress,
            Proxy::Voting => Column::VotingAddress,
        }
    }
}

/// State change applied to one point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Create,
    Activate { sponsor: AzimuthNumber },
    SetOwner { address: [u8; 20] },
    SetProxy { proxy: Proxy, address: [u8; 20] },
    RequestEscape { to: AzimuthNumber },
    CancelEscape,
    AcceptEscape { sponsor: AzimuthNumber },
    LoseSponsor,
    BreakContinuity { rift: u32 },
    ChangeKeys {
        encryption_key: [u8; 32],
        auth_key: [u8; 32],
        crypto_suite_version: u32,
        life: u32,
    },
}

impl Mutation {
    /// Columns written and their values. Columns not listed keep their stored value.
    pub fn assignments(&self) -> Vec<(Column, FieldValue)> {
        use FieldValue::*;
        match *self {
            Mutation::Create => Vec::new(),
            Mutation::Activate { sponsor } => vec![
                (Column::IsActive, Bool(true)),
                (Column::HasSponsor, Bool(true)),
                (Column::Sponsor, U32(sponsor.0)),
            ],
            Mutation::SetOwner { address } => vec![(Column::OwnerAddress, Address(address))],
            Mutation::SetProxy { proxy, address } => vec![(proxy.column(), Address(address))],
            Mutation::RequestEscape { to } => vec![
                (Column::IsEscapeRequested, Bool(true)),
                (Column::EscapeRequestedTo, U32(to.0)),
            ],
            Mutation::CancelEscape => vec![
                (Column::IsEscapeRequested, Bool(false)),
                (Column::EscapeRequestedTo, U32(0)),
            ],
            Mutation::AcceptEscape { sponsor } => vec![
                (Column::IsEscapeRequested, Bool(false)),
                (Column::EscapeRequestedTo, U32(0)),
                (Column::HasSponsor, Bool(true)),
                (Column::Sponsor, U32(sponsor.0)),
            ],
            Mutation::LoseSponsor => vec![(Column::HasSponsor, Bool(false))],
            Mutation::BreakContinuity { rift } => vec![(Column::Rift, U32(rift))],
            Mutation::ChangeKeys {
                encryption_key,
                auth_key,
                crypto_suite_version,
                life,
            } => vec![
                (Column::EncryptionKey, Bytes32(encryption_key)),
                (Column::AuthKey, Bytes32(auth_key)),
                (Column::CryptoSuiteVersion, U32(crypto_suite_version)),
                (Column::Life, U32(life)),
            ],
        }
    }
}

/// Upsert of one point: statement template plus bound number and field values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upsert {
    pub number: AzimuthNumber,
    pub mutation: Mutation,
}

impl Upsert {
    pub fn statement(&self) -> String {
        let columns: Vec<Column> = self
            .mutation
            .assignments()
            .into_iter()
            .map(|(c, _)| c)
            .collect();
        upsert_statement(&columns)
    }
}

/// Outcome of compiling one log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Cataloged event whose decoding is deferred; nothing to apply.
    Noop,
    Upsert(Upsert),
}

type DecodeRule = fn(&RawLogEntry) -> Result<Effect, DecodeError>;

/// One decoding rule per cataloged event.
const RULES: [(EventKind, DecodeRule); 14] = [
    (EventKind::Spawned, spawned),
    (EventKind::Activated, activated),
    (EventKind::OwnerChanged, owner_changed),
    (EventKind::ChangedSpawnProxy, changed_spawn_proxy),
    (EventKind::ChangedTransferProxy, changed_transfer_proxy),
    (EventKind::ChangedManagementProxy, changed_management_proxy),
    (EventKind::ChangedVotingProxy, changed_voting_proxy),
    (EventKind::EscapeRequested, escape_requested),
    (EventKind::EscapeCanceled, escape_canceled),
    (EventKind::EscapeAccepted, escape_accepted),
    (EventKind::LostSponsor, lost_sponsor),
    (EventKind::BrokeContinuity, broke_continuity),
    (EventKind::ChangedKeys, changed_keys),
    (EventKind::ChangedDns, changed_dns),
];

/// Dispatch table from fingerprint to decoding rule, built from an [EventCatalog].
#[derive(Debug, Clone)]
pub struct EffectCompiler {
    catalog: EventCatalog,
    rules: HashMap<[u8; 32], DecodeRule>,
}

impl EffectCompiler {
    pub fn new(catalog: EventCatalog) -> Self {
        let rules = RULES
            .iter()
            .map(|&(kind, rule)| (catalog.fingerprint_of(kind), rule))
            .collect();
        Self { catalog, rules }
    }

    pub fn catalog(&self) -> &EventCatalog {
        &self.catalog
    }

    /// Compile one entry. Unknown fingerprints are an error, never a no-op.
    pub fn compile(&self, entry: &RawLogEntry) -> Result<Effect, DecodeError> {
        let rule = self
            .rules
            .get(&entry.topic0)
            .ok_or(DecodeError::UnknownEvent {
                topic0: entry.topic0,
            })?;
        rule(entry)
    }
}

fn upsert(number: AzimuthNumber, mutation: Mutation) -> Result<Effect, DecodeError> {
    Ok(Effect::Upsert(Upsert { number, mutation }))
}

fn spawned(e: &RawLogEntry) -> Result<Effect, DecodeError> {
    // topic1 is the parent; the new point is topic2.
    upsert(topic_to_number(&e.topic2), Mutation::Create)
}

fn activated(e: &RawLogEntry) -> Result<Effect, DecodeError> {
    let number = topic_to_number(&e.topic1);
    upsert(
        number,
        Mutation::Activate {
            sponsor: number.original_sponsor(),
        },
    )
}

fn owner_changed(e: &RawLogEntry) -> Result<Effect, DecodeError> {
    upsert(
        topic_to_number(&e.topic1),
        Mutation::SetOwner {
            address: topic_to_address(&e.topic2),
        },
    )
}

fn set_proxy(e: &RawLogEntry, proxy: Proxy) -> Result<Effect, DecodeError> {
    upsert(
        topic_to_number(&e.topic1),
        Mutation::SetProxy {
            proxy,
            address: topic_to_address(&e.topic2),
        },
    )
}

fn changed_spawn_proxy(e: &RawLogEntry) -> Result<Effect, DecodeError> {
    set_proxy(e, Proxy::Spawn)
}

fn changed_transfer_proxy(e: &RawLogEntry) -> Result<Effect, DecodeError> {
    set_proxy(e, Proxy::Transfer)
}

fn changed_management_proxy(e: &RawLogEntry) -> Result<Effect, DecodeError> {
    set_proxy(e, Proxy::Management)
}

fn changed_voting_proxy(e: &RawLogEntry) -> Result<Effect, DecodeError> {
    set_proxy(e, Proxy::Voting)
}

fn escape_requested(e: &RawLogEntry) -> Result<Effect, DecodeError> {
    upsert(
        topic_to_number(&e.topic1),
        Mutation::RequestEscape {
            to: topic_to_number(&e.topic2),
        },
    )
}

fn escape_canceled(e: &RawLogEntry) -> Result<Effect, DecodeError> {
    upsert(topic_to_number(&e.topic1), Mutation::CancelEscape)
}

fn escape_accepted(e: &RawLogEntry) -> Result<Effect, DecodeError> {
    upsert(
        topic_to_number(&e.topic1),
        Mutation::AcceptEscape {
            sponsor: topic_to_number(&e.topic2),
        },
    )
}

fn lost_sponsor(e: &RawLogEntry) -> Result<Effect, DecodeError> {
    upsert(topic_to_number(&e.topic1), Mutation::LoseSponsor)
}

fn broke_continuity(e: &RawLogEntry) -> Result<Effect, DecodeError> {
    upsert(
        topic_to_number(&e.topic1),
        Mutation::BreakContinuity {
            rift: topic_to_u32(&e.topic2),
        },
    )
}

fn changed_keys(e: &RawLogEntry) -> Result<Effect, DecodeError> {
    if e.data.len() != CHANGED_KEYS_DATA_LEN {
        return Err(DecodeError::MalformedPayload {
            event: EventKind::ChangedKeys,
            expected: CHANGED_KEYS_DATA_LEN,
            actual: e.data.len(),
        });
    }
    let mut encryption_key = [0u8; 32];
    encryption_key.copy_from_slice(&e.data[..WORD]);
    let mut auth_key = [0u8; 32];
    auth_key.copy_from_slice(&e.data[WORD..2 * WORD]);
    let crypto_suite_version = word_to_u32(&e.data[2 * WORD..3 * WORD]);
    let life = word_to_u32(&e.data[3 * WORD..]);

    upsert(
        topic_to_number(&e.topic1),
        Mutation::ChangeKeys {
            encryption_key,
            auth_key,
            crypto_suite_version,
            life,
        },
    )
}

fn changed_dns(_: &RawLogEntry) -> Result<Effect, DecodeError> {
    // No dns columns in `points` yet.
    Ok(Effect::Noop)
}
