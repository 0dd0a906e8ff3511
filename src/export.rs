//! Per-cycle CSV artifact: one row per instrument in the snapshot.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{EngineError, EngineResult};
use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::model::{MarketSnapshot, SelectionResult};

#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    symbol: &'a str,
    name: &'a str,
    price: f64,
    prev_close: Option<f64>,
    day_change_pct: Option<f64>,
    volume: Option<f64>,
    mean_return: f64,
    volatility: f64,
    selected: bool,
    score: f64,
    timestamp: String,
}

#[derive(Debug, Clone)]
pub struct CsvExporter {
    path: PathBuf,
}

impl CsvExporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the export file. The rows land in a sibling temp file first and
    /// are renamed into place, so readers never see a partial file.
    pub fn write(&self, snapshot: &MarketSnapshot, selection: &SelectionResult) -> EngineResult<usize> {
        let tmp = self.temp_path();
        let timestamp = snapshot.fetched_at().to_rfc3339();

        let mut wtr = csv::Writer::from_path(&tmp).map_err(|e| export_err(&tmp, e))?;
        let mut rows = 0;
        for entry in snapshot.entries() {
            let pick = selection.entries().iter().find(|s| s.instrument.id == entry.instrument.id);
            wtr.serialize(ExportRow {
                symbol: &entry.instrument.id,
                name: &entry.instrument.name,
                price: entry.price,
                prev_close: entry.prev_close,
                day_change_pct: entry.day_change_pct(),
                volume: entry.volume,
                mean_return: entry.expected_return(),
                volatility: entry.volatility(),
                selected: pick.map(|p| p.selected).unwrap_or(false),
                score: pick.map(|p| p.score).unwrap_or_default(),
                timestamp: timestamp.clone(),
            })
            .map_err(|e| export_err(&tmp, e))?;
            rows += 1;
        }
        wtr.flush().map_err(|e| export_err(&tmp, e))?;
        drop(wtr);

        fs::rename(&tmp, &self.path).map_err(|e| export_err(&self.path, e))?;
        log(
            Level::Debug,
            Domain::Export,
            "csv_written",
            obj(&[
                ("path", v_str(&self.path.display().to_string())),
                ("rows", v_num(rows as f64)),
            ]),
        );
        Ok(rows)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "export.csv".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn export_err(path: &Path, err: impl std::fmt::Display) -> EngineError {
    EngineError::Export(format!("{}: {}", path.display(), err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Instrument, PriceSeries, SelectionEntry};

    fn fixture() -> (MarketSnapshot, SelectionResult) {
        let universe = vec![Instrument::new("GC=F", "Gold"), Instrument::new("SI=F", "Silver")];
        let snap = MarketSnapshot::from_series(
            &universe,
            vec![
                (universe[0].clone(), PriceSeries::new(vec![(1, 2300.0), (2, 2310.0), (3, 2320.0)]).with_volume(Some(18250.0))),
                (universe[1].clone(), PriceSeries::new(vec![(1, 29.0), (2, 29.5), (3, 29.0)])),
            ],
        )
        .unwrap();
        let sel = SelectionResult::new(vec![
            SelectionEntry { instrument: universe[0].clone(), selected: true, score: 0.004 },
            SelectionEntry { instrument: universe[1].clone(), selected: false, score: -0.001 },
        ]);
        (snap, sel)
    }

    #[test]
    fn test_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signals.csv");
        let (snap, sel) = fixture();
        let rows = CsvExporter::new(&path).write(&snap, &sel).unwrap();
        assert_eq!(rows, 2);

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "symbol,name,price,prev_close,day_change_pct,volume,mean_return,volatility,selected,score,timestamp"
        );
        let gold = lines.next().unwrap();
        assert!(gold.starts_with("GC=F,Gold,2320.0,2310.0,"));
        assert!(gold.contains(",18250.0,"));
        assert!(gold.contains(",true,"));
        // no reported volume leaves the column empty
        let silver = lines.next().unwrap();
        assert!(silver.contains(",false,"));
        assert_eq!(silver.split(',').nth(5), Some(""));
        assert!(!dir.path().join("signals.csv.tmp").exists());
    }

    #[test]
    fn test_rewrite_replaces_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signals.csv");
        std::fs::write(&path, "stale\n").unwrap();
        let (snap, sel) = fixture();
        CsvExporter::new(&path).write(&snap, &sel).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("stale"));
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn test_missing_directory_is_export_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("signals.csv");
        let (snap, sel) = fixture();
        let err = CsvExporter::new(path).write(&snap, &sel).unwrap_err();
        assert!(matches!(err, EngineError::Export(_)));
    }
}
