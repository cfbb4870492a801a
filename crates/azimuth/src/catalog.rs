//! Azimuth event catalog: fingerprint (topic0) to event.
//!
//! Fingerprints are keccak256 of the canonical signature. Build the [EventCatalog] once at
//! startup and hand it to the effect compiler.

use sha3::{Digest, Keccak256};
use std::collections::HashMap;
use std::fmt;

/// Events emitted by the Azimuth contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Point creation.
    Spawned,
    Activated,
    OwnerChanged,
    ChangedSpawnProxy,
    ChangedTransferProxy,
    ChangedManagementProxy,
    ChangedVotingProxy,
    EscapeRequested,
    EscapeCanceled,
    EscapeAccepted,
    LostSponsor,
    BrokeContinuity,
    ChangedKeys,
    ChangedDns,
}

impl EventKind {
    pub const ALL: [EventKind; 14] = [
        EventKind::Spawned,
        EventKind::Activated,
        EventKind::OwnerChanged,
        EventKind::ChangedSpawnProxy,
        EventKind::ChangedTransferProxy,
        EventKind::ChangedManagementProxy,
        EventKind::ChangedVotingProxy,
        EventKind::EscapeRequested,
        EventKind::EscapeCanceled,
        EventKind::EscapeAccepted,
        EventKind::LostSponsor,
        EventKind::BrokeContinuity,
        EventKind::ChangedKeys,
        EventKind::ChangedDns,
    ];

    /// Canonical signature (no spaces) as hashed into topic0.
    pub fn signature(self) -> &'static str {
        match self {
            EventKind::Spawned => "Spawned(uint32,uint32)",
            EventKind::Activated => "Activated(uint32)",
            EventKind::OwnerChanged => "OwnerChanged(uint32,address)",
            EventKind::ChangedSpawnProxy => "ChangedSpawnProxy(uint32,address)",
            EventKind::ChangedTransferProxy => "ChangedTransferProxy(uint32,address)",
            EventKind::ChangedManagementProxy => "ChangedManagementProxy(uint32,address)",
            EventKind::ChangedVotingProxy => "ChangedVotingProxy(uint32,address)",
            EventKind::EscapeRequested => "EscapeRequested(uint32,uint32)",
            EventKind::EscapeCanceled => "EscapeCanceled(uint32,uint32)",
            EventKind::EscapeAccepted => "EscapeAccepted(uint32,uint32)",
            EventKind::LostSponsor => "LostSponsor(uint32,uint32)",
            EventKind::BrokeContinuity => "BrokeContinuity(uint32,uint32)",
            EventKind::ChangedKeys => "ChangedKeys(uint32,bytes32,bytes32,uint32,uint32)",
            EventKind::ChangedDns => "ChangedDns(string,string,string)",
        }
    }

    /// Event name: the signature up to the argument list.
    pub fn name(self) -> &'static str {
        let sig = self.signature();
        sig.split_once('(').map(|(name, _)| name).unwrap_or(sig)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// keccak256 over the UTF-8 bytes of a canonical event signature.
pub fn fingerprint(signature: &str) -> [u8; 32] {
    Keccak256::digest(signature.as_bytes()).into()
}

/// Fixed fingerprint -> event mapping.
#[derive(Debug, Clone)]
pub struct EventCatalog {
    by_fingerprint: HashMap<[u8; 32], EventKind>,
    fingerprints: HashMap<EventKind, [u8; 32]>,
}

impl EventCatalog {
    /// Hash every cataloged signature. Do this once per process.
    pub fn new() -> Self {
        let mut by_fingerprint = HashMap::with_capacity(EventKind::ALL.len());
        let mut fingerprints = HashMap::with_capacity(EventKind::ALL.len());
        for kind in EventKind::ALL {
            let fp = fingerprint(kind.signature());
            by_fingerprint.insert(fp, kind);
            fingerprints.insert(kind, fp);
        }
        Self {
            by_fingerprint,
            fingerprints,
        }
    }

    pub fn lookup(&self, topic0: &[u8; 32]) -> Option<EventKind> {
        self.by_fingerprint.get(topic0).copied()
    }

    pub fn fingerprint_of(&self, kind: EventKind) -> [u8; 32] {
        // Every kind is inserted in new().
        self.fingerprints
            .get(&kind)
            .copied()
            .unwrap_or_else(|| fingerprint(kind.signature()))
    }

    /// Name for diagnostics; unknown fingerprints render as hex.
    pub fn name_of(&self, topic0: &[u8; 32]) -> String {
        match self.lookup(topic0) {
            Some(kind) => kind.name().to_string(),
            None => format!("unknown(0x{})", hex::encode(topic0)),
        }
    }

    /// All cataloged fingerprints (e.g. for an eth_getLogs topic filter).
    pub fn fingerprints(&self) -> impl Iterator<Item = (EventKind, [u8; 32])> + '_ {
        EventKind::ALL
            .iter()
            .map(move |&kind| (kind, self.fingerprint_of(kind)))
    }

    pub fn len(&self) -> usize {
        self.by_fingerprint.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_fingerprint.is_empty()
    }
}

impl Default for EventCatalog {
    fn default() -> Self {
        Self::new()
    }
}
