//! One-shot export: fetch the configured universe once, score it and write
//! the CSV artifact.
//!
//! Run with: cargo run --bin snapshot_export -- [output.csv]

use std::path::PathBuf;

use anyhow::{Context, Result};

use quantpulse::config::Config;
use quantpulse::export::CsvExporter;
use quantpulse::logging::{log, obj, v_num, v_str, Domain, Level};
use quantpulse::scorer::select;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env().context("invalid configuration")?;
    cfg.validate().context("invalid configuration")?;

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| cfg.export_path.clone())
        .unwrap_or_else(|| PathBuf::from("snapshot.csv"));

    let provider = cfg.provider.build(&cfg)?;
    let snapshot = provider
        .fetch(&cfg.instrument_universe)
        .await
        .context("fetching snapshot")?;
    let scorer = cfg.scorer.build(&cfg);
    let selection = select(scorer.as_ref(), &snapshot, cfg.selection_budget)?;
    let rows = CsvExporter::new(&path).write(&snapshot, &selection)?;

    let omitted: Vec<&str> = snapshot
        .omitted(&cfg.instrument_universe)
        .into_iter()
        .map(|i| i.id.as_str())
        .collect();
    log(
        Level::Info,
        Domain::Export,
        "snapshot_exported",
        obj(&[
            ("path", v_str(&path.display().to_string())),
            ("rows", v_num(rows as f64)),
            ("selected", v_str(&selection.selected_ids().join(","))),
            ("omitted", v_str(&omitted.join(","))),
        ]),
    );
    Ok(())
}
