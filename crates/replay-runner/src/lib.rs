//! Drives the external hatetris player over a (generation, trial) grid and
//! turns the replay files it leaves behind into a score-by-generation chart.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

pub mod chart;
pub mod checkpoint;
pub mod config;
pub mod grid;
pub mod interrupt;
pub mod invoke;
pub mod runner;
pub mod scores;

pub use chart::{render_chart, ChartSpec};
pub use checkpoint::Checkpoint;
pub use config::{ConfigOverrides, FailurePolicy, FailurePolicyKind, LabConfig, Preset};
pub use grid::{LabelScheme, ResultLayout, RunGrid, RunPair};
pub use interrupt::InterruptFlag;
pub use invoke::{InvocationOutcome, Invoker, ProcessInvoker};
pub use runner::{resolve_start_offset, run_grid, FailedPair, RunSummary};
pub use scores::{collect_scores, read_score, ScoreFileError, ScoreTable};

/// Creates `dir` and its parents; an existing directory is fine.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    fs::create_dir_all(dir).with_context(|| format!("create_dir_failed: {}", dir.display()))
}

/// Reads the scores for every pair of the configured grid.
pub fn collect_configured_scores(config: &LabConfig) -> Result<ScoreTable> {
    let grid = config.grid()?;
    let table = collect_scores(
        &config.layout,
        &config.label_scheme,
        grid.generations(),
        grid.trials(),
    )?;
    Ok(table)
}

/// Collects scores and renders the chart; no file is written if any read fails.
pub fn plot_scores(config: &LabConfig) -> Result<ScoreTable> {
    let table = collect_configured_scores(config)?;
    render_chart(&table, &config.chart)?;
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_dir_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("replay");
        ensure_dir(&target).expect("first create");
        ensure_dir(&target).expect("existing dir is not an error");
        assert!(target.is_dir());
    }

    #[test]
    fn plot_fails_without_chart_when_file_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = LabConfig::preset(Preset::W10);
        config.generations = 0..1;
        config.trials = 2;
        config.layout.dir = dir.path().to_path_buf();
        config.chart.output = dir.path().join("chart.png");
        fs::write(dir.path().join("replay_w10_0_0.txt"), "12\n").expect("write");

        let err = plot_scores(&config).expect_err("second trial missing");
        assert!(err.to_string().contains("result_file_unreadable"));
        assert!(!config.chart.output.exists());
    }
}
