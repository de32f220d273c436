//! Result export — report JSON and snapshot CSV artifacts.

use std::path::Path;

use anyhow::{Context, Result};

use crate::metrics::{BacktestReport, PortfolioSnapshot};

/// Serialize the report as pretty-printed JSON.
pub fn report_json(report: &BacktestReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("serializing report")
}

/// Render snapshots as CSV with a header row.
pub fn snapshots_csv(snapshots: &[PortfolioSnapshot]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record([
        "timestamp_ms",
        "portfolio_value",
        "cash",
        "realized_pnl",
        "unrealized_pnl",
    ])?;
    for snapshot in snapshots {
        writer.write_record([
            snapshot.timestamp_ms.to_string(),
            format!("{:.2}", snapshot.portfolio_value),
            format!("{:.2}", snapshot.cash),
            format!("{:.2}", snapshot.realized_pnl),
            format!("{:.2}", snapshot.unrealized_pnl),
        ])?;
    }
    let bytes = writer.into_inner().context("flushing csv writer")?;
    String::from_utf8(bytes).context("csv output was not utf-8")
}

/// Write `report.json` and `snapshots.csv` into a directory, creating it
/// if needed.
pub fn write_artifacts(
    dir: impl AsRef<Path>,
    report: &BacktestReport,
    snapshots: &[PortfolioSnapshot],
) -> Result<()> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating artifact dir {}", dir.display()))?;
    std::fs::write(dir.join("report.json"), report_json(report)?)?;
    std::fs::write(dir.join("snapshots.csv"), snapshots_csv(snapshots)?)?;
    Ok(())
}
