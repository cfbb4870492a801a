//! Example: replay every unprocessed Azimuth log in a SQLite database into `points`.
//!
//! Usage:
//!
//!   cargo run -p azimuth --example replay -- --db azimuth.db [--batch-size 500] [--dump]
//!
//! `--dump` prints every point (with its tier) as one JSON object per line after the replay.
//! Set RUST_LOG=azimuth=debug for per-batch progress.

use azimuth::{EventCatalog, ReplayConfig, ReplayEngine, Store};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args: Vec<String> = std::env::args().collect();
    let mut config = ReplayConfig::default();
    let mut dump = false;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" => {
                i += 1;
                if let Some(path) = args.get(i) {
                    config.database_path = path.into();
                }
            }
            "--batch-size" => {
                i += 1;
                config.batch_size = args
                    .get(i)
                    .map(|s| s.parse::<usize>())
                    .transpose()?
                    .unwrap_or(config.batch_size);
            }
            "--dump" => dump = true,
            "--help" | "-h" => {
                eprintln!("Usage: replay --db <PATH> [--batch-size N] [--dump]");
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    let mut store = Store::open(&config.database_path)?;
    let pending = store.unprocessed_count()?;
    tracing::info!(db = %config.database_path.display(), pending, "starting replay");

    let engine = ReplayEngine::new(EventCatalog::new(), &config);
    let report = match engine.replay_all(&mut store) {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(
                reason = %e,
                retryable = e.is_retryable(),
                at = ?e.position(),
                "replay stopped"
            );
            return Err(e.into());
        }
    };
    println!(
        "replayed {} entries in {} batches ({} effects), last {:?}",
        report.entries, report.batches, report.effects_applied, report.last
    );

    if dump {
        for point in store.points()? {
            let mut row = serde_json::to_value(&point)?;
            row["tier"] = serde_json::to_value(point.tier())?;
            println!("{}", row);
        }
    }
    Ok(())
}
