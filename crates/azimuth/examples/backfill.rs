//! Example: fetch Azimuth logs over HTTP JSON-RPC, save them, then replay.
//!
//! Pulls `eth_getLogs` for the Azimuth contract in bounded block ranges, filtered to the
//! cataloged event fingerprints, appends each log to `event_logs`, and runs the replay engine.
//! Logs already saved (same block and log index) are skipped, so the range can be re-run.
//!
//! Usage:
//!
//!   cargo run -p azimuth --example backfill -- --rpc-url <HTTP_URL> --contract <AZIMUTH_ADDRESS> \
//!       --from-block <N> [--to-block <N>] [--db azimuth.db] [--max-range 2000]

use anyhow::{Context, Result};
use azimuth::{EventCatalog, RawLogEntry, ReplayConfig, ReplayEngine, Store, StoreError};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

async fn http_json_rpc(client: &reqwest::Client, url: &str, method: &str, params: Value, id: u64) -> Result<Value> {
    let body = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    });
    let resp = client
        .post(url)
        .json(&body)
        .send()
        .await
        .context("HTTP request failed")?;
    let json: Value = resp.json().await.context("parse response")?;
    if let Some(err) = json.get("error") {
        anyhow::bail!("RPC error: {}", err);
    }
    json.get("result")
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Missing result"))
}

async fn eth_block_number(client: &reqwest::Client, http_url: &str) -> Result<u64> {
    let result = http_json_rpc(client, http_url, "eth_blockNumber", json!([]), 1).await?;
    let s = result.as_str().ok_or_else(|| anyhow::anyhow!("blockNumber not string"))?;
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).context("parse block number")
}

fn build_logs_filter(address: &[u8; 20], catalog: &EventCatalog, from_block: u64, to_block: u64) -> Value {
    // Position 0 as a list: match any cataloged fingerprint.
    let topic0s: Vec<String> = catalog
        .fingerprints()
        .map(|(_, fp)| format!("0x{}", hex::encode(fp)))
        .collect();
    json!({
        "address": format!("0x{}", hex::encode(address)),
        "topics": [topic0s],
        "fromBlock": format!("0x{:x}", from_block),
        "toBlock": format!("0x{:x}", to_block),
    })
}

fn is_duplicate(e: &StoreError) -> bool {
    match e {
        StoreError::Sqlite(rusqlite_err) => rusqlite_err
            .sqlite_error_code()
            .map(|code| code == rusqlite::ErrorCode::ConstraintViolation)
            .unwrap_or(false),
        _ => false,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("azimuth=info".parse()?))
        .init();
    let args: Vec<String> = std::env::args().collect();
    let mut rpc_url = String::new();
    let mut contract = String::new();
    let mut from_block: Option<u64> = None;
    let mut to_block: Option<u64> = None;
    let mut max_range: u64 = 2000;
    let mut config = ReplayConfig::default();
    let mut i = 1;
    while i < args.len() {
        let next = args.get(i + 1).cloned().unwrap_or_default();
        match args[i].as_str() {
            "--rpc-url" => rpc_url = next,
            "--contract" => contract = next,
            "--from-block" => from_block = Some(next.parse().context("--from-block")?),
            "--to-block" => to_block = Some(next.parse().context("--to-block")?),
            "--max-range" => max_range = next.parse().context("--max-range")?,
            "--db" => config.database_path = next.into(),
            "--help" | "-h" => {
                eprintln!(
                    "Usage: backfill --rpc-url <HTTP_URL> --contract <AZIMUTH_ADDRESS> --from-block <N> \
                     [--to-block <N>] [--db <PATH>] [--max-range <N>]"
                );
                std::process::exit(0);
            }
            _ => {
                i += 1;
                continue;
            }
        }
        i += 2;
    }
    let from_block = match from_block {
        Some(b) if !rpc_url.is_empty() && !contract.is_empty() => b,
        _ => {
            eprintln!("Usage: backfill --rpc-url <HTTP_URL> --contract <AZIMUTH_ADDRESS> --from-block <N>");
            std::process::exit(1);
        }
    };
    let addr_hex = contract.strip_prefix("0x").unwrap_or(&contract);
    let addr_bytes = hex::decode(addr_hex).context("decode contract address")?;
    if addr_bytes.len() != 20 {
        anyhow::bail!("contract address must be 20 bytes");
    }
    let mut contract_address = [0u8; 20];
    contract_address.copy_from_slice(&addr_bytes);

    let client = reqwest::Client::builder().no_proxy().build()?;
    let to_block = match to_block {
        Some(b) => b,
        None => eth_block_number(&client, &rpc_url).await?,
    };
    let catalog = EventCatalog::new();
    let mut store = Store::open(&config.database_path)?;

    let (mut saved, mut skipped) = (0u64, 0u64);
    let mut from = from_block;
    while from <= to_block {
        let to = (from + max_range.max(1) - 1).min(to_block);
        let filter = build_logs_filter(&contract_address, &catalog, from, to);
        let logs = http_json_rpc(&client, &rpc_url, "eth_getLogs", json!([filter]), 2).await?;
        let logs = logs.as_array().ok_or_else(|| anyhow::anyhow!("getLogs not array"))?;
        for log in logs {
            let entry = RawLogEntry::from_rpc_log(log).context("decode log")?;
            match store.save(&entry) {
                Ok(()) => saved += 1,
                Err(e) if is_duplicate(&e) => skipped += 1,
                Err(e) => return Err(e.into()),
            }
        }
        tracing::debug!(count = logs.len(), from, to, "backfill: saved range");
        from = to + 1;
    }
    tracing::info!(saved, skipped, from_block, to_block, "backfill complete");

    let report = ReplayEngine::new(catalog, &config).replay_all(&mut store)?;
    println!(
        "saved {} logs ({} already present); replayed {} entries, last {:?}",
        saved, skipped, report.entries, report.last
    );
    Ok(())
}
