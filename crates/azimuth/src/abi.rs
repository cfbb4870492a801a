//! Raw Azimuth log entries and topic decoding.
//!
//! A [RawLogEntry] is the stored shape of one contract log: up to three topics and the
//! non-indexed `data` words. Decode from the JSON-RPC log shape with [RawLogEntry::from_rpc_log].

use crate::cursor::Cursor;
use crate::point::AzimuthNumber;
use anyhow::{Context, Result};
use serde_json::Value;

/// Width of one EVM word (topic or data word).
pub const WORD: usize = 32;

/// One captured contract log, as appended to `event_logs`.
///
/// Immutable once saved except for `is_processed`, which the replay engine flips once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLogEntry {
    pub block_number: u64,
    pub block_hash: [u8; 32],
    pub tx_hash: [u8; 32],
    pub log_index: u64,
    pub contract_address: [u8; 20],
    /// Event fingerprint: keccak256 of the canonical signature.
    pub topic0: [u8; 32],
    pub topic1: [u8; 32],
    pub topic2: [u8; 32],
    pub data: Vec<u8>,
    pub is_processed: bool,
}

impl RawLogEntry {
    /// Position of this entry in the causal order.
    pub fn position(&self) -> Cursor {
        Cursor::new(self.block_number, self.log_index)
    }

    /// Decode a JSON-RPC log (eth_getLogs / eth_subscription result).
    ///
    /// Topics beyond topic0 that the event does not carry are stored as zero words.
    pub fn from_rpc_log(log_value: &Value) -> Result<Self> {
        if log_value.get("removed").and_then(|r| r.as_bool()) == Some(true) {
            anyhow::bail!("log was removed by a reorg");
        }
        let block_number = parse_hex_u64(str_field(log_value, "blockNumber")?)?;
        let log_index = parse_hex_u64(str_field(log_value, "logIndex")?)?;
        let block_hash = parse_hex_bytes_32(str_field(log_value, "blockHash")?)?;
        let tx_hash = parse_hex_bytes_32(str_field(log_value, "transactionHash")?)?;
        let contract_address = parse_hex_bytes_20(str_field(log_value, "address")?)?;
        let data = parse_hex_bytes(str_field(log_value, "data")?)?;
        let topics = log_value
            .get("topics")
            .and_then(|t| t.as_array())
            .ok_or_else(|| anyhow::anyhow!("Missing topics"))?;
        if topics.is_empty() || topics.len() > 3 {
            anyhow::bail!("Expected 1 to 3 topics, got {}", topics.len());
        }
        let mut words = [[0u8; 32]; 3];
        for (i, topic) in topics.iter().enumerate() {
            let s = topic
                .as_str()
                .ok_or_else(|| anyhow::anyhow!("topic{} not str", i))?;
            words[i] = parse_hex_bytes_32(s).with_context(|| format!("topic{}", i))?;
        }
        let [topic0, topic1, topic2] = words;

        Ok(Self {
            block_number,
            block_hash,
            tx_hash,
            log_index,
            contract_address,
            topic0,
            topic1,
            topic2,
            data,
            is_processed: false,
        })
    }
}

/// Low 4 bytes of a topic, big-endian.
pub fn topic_to_u32(topic: &[u8; 32]) -> u32 {
    word_to_u32(topic)
}

/// Identity number carried in an indexed `uint32` argument.
pub fn topic_to_number(topic: &[u8; 32]) -> AzimuthNumber {
    AzimuthNumber(topic_to_u32(topic))
}

/// Indexed address: the low 20 bytes of the topic (left-padded in the EVM).
pub fn topic_to_address(topic: &[u8; 32]) -> [u8; 20] {
    let mut out = [0u8; 20];
    out.copy_from_slice(&topic[12..]);
    out
}

/// Low 4 bytes of a 32-byte word, big-endian.
pub(crate) fn word_to_u32(word: &[u8]) -> u32 {
    let mut be = [0u8; 4];
    be.copy_from_slice(&word[WORD - 4..WORD]);
    u32::from_be_bytes(be)
}

fn str_field<'a>(v: &'a Value, key: &str) -> Result<&'a str> {
    v.get(key)
        .and_then(|s| s.as_str())
        .ok_or_else(|| anyhow::anyhow!("Missing {}", key))
}

fn parse_hex_u64(s: &str) -> Result<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).context("parse hex u64")
}

fn parse_hex_bytes(s: &str) -> Result<Vec<u8>> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).context("parse hex bytes")
}

fn parse_hex_bytes_32(s: &str) -> Result<[u8; 32]> {
    let bytes = parse_hex_bytes(s)?;
    if bytes.len() != 32 {
        anyhow::bail!("Expected 32 bytes, got {}", bytes.len());
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

fn parse_hex_bytes_20(s: &str) -> Result<[u8; 20]> {
    let bytes = parse_hex_bytes(s)?;
    if bytes.len() == 20 {
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Ok(out)
    } else if bytes.len() == 32 {
        // Indexed address in EVM is 32 bytes (left-padded); take last 20.
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes[12..32]);
        Ok(out)
    } else {
        anyhow::bail!("Expected 20 or 32 bytes for address, got {}", bytes.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn padded(tail: &[u8]) -> [u8; 32] {
        let mut w = [0u8; 32];
        w[32 - tail.len()..].copy_from_slice(tail);
        w
    }

    #[test]
    fn topic_to_u32_reads_low_bytes() {
        let mut t = padded(&[0x00, 0x02, 0x00, 0x05]);
        t[0] = 0xff; // high bytes ignored
        assert_eq!(topic_to_u32(&t), 0x0002_0005);
        assert_eq!(topic_to_number(&t), AzimuthNumber(0x0002_0005));
    }

    #[test]
    fn topic_to_address_takes_last_20() {
        let addr = [0xabu8; 20];
        assert_eq!(topic_to_address(&padded(&addr)), addr);
    }

    #[test]
    fn rpc_log_with_two_topics() {
        let log = json!({
            "address": format!("0x{}", "11".repeat(20)),
            "blockHash": format!("0x{}", "22".repeat(32)),
            "blockNumber": "0x10",
            "transactionHash": format!("0x{}", "33".repeat(32)),
            "logIndex": "0x2",
            "data": "0x",
            "topics": [
                format!("0x{}", "44".repeat(32)),
                format!("0x{:064x}", 0x42),
            ],
            "removed": false
        });
        let entry = RawLogEntry::from_rpc_log(&log).unwrap();
        assert_eq!(entry.position(), Cursor::new(16, 2));
        assert_eq!(entry.contract_address, [0x11; 20]);
        assert_eq!(entry.topic0, [0x44; 32]);
        assert_eq!(topic_to_u32(&entry.topic1), 0x42);
        assert_eq!(entry.topic2, [0u8; 32]);
        assert!(entry.data.is_empty());
        assert!(!entry.is_processed);
    }

    #[test]
    fn rpc_log_rejects_removed_and_missing_fields() {
        let removed = json!({ "removed": true });
        assert!(RawLogEntry::from_rpc_log(&removed).is_err());
        let no_topics = json!({
            "address": format!("0x{}", "11".repeat(20)),
            "blockHash": format!("0x{}", "22".repeat(32)),
            "blockNumber": "0x1",
            "transactionHash": format!("0x{}", "33".repeat(32)),
            "logIndex": "0x0",
            "data": "0x",
            "topics": []
        });
        assert!(RawLogEntry::from_rpc_log(&no_topics).is_err());
    }
}
