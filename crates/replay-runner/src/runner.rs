use crate::checkpoint::Checkpoint;
use crate::config::{FailurePolicy, LabConfig};
use crate::ensure_dir;
use crate::grid::{RunGrid, RunPair};
use crate::interrupt::InterruptFlag;
use crate::invoke::Invoker;
use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedPair {
    pub pair: RunPair,
    pub label: String,
    /// Exit code or `signal` of the last attempt.
    pub exit: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub start_offset: usize,
    pub total: usize,
    /// Pairs the loop is done with, failed ones included unless the run aborted on them.
    pub completed: usize,
    pub succeeded: usize,
    pub failed: Vec<FailedPair>,
    pub interrupted: bool,
    pub aborted: bool,
    pub resume_offset: usize,
}

impl RunSummary {
    fn new(start_offset: usize, total: usize) -> Self {
        Self {
            start_offset,
            total,
            completed: 0,
            succeeded: 0,
            failed: Vec::new(),
            interrupted: false,
            aborted: false,
            resume_offset: start_offset,
        }
    }

    /// True when the loop stopped early and a later run should pick up from `resume_offset`.
    pub fn stopped_early(&self) -> bool {
        self.interrupted || self.aborted
    }

    pub fn is_finished(&self) -> bool {
        self.resume_offset == self.total
    }
}

/// Explicit offset wins; otherwise the checkpoint file, if any; otherwise zero.
pub fn resolve_start_offset(config: &LabConfig, grid: &RunGrid) -> Result<usize> {
    if let Some(offset) = config.offset {
        return Ok(offset);
    }
    if let Some(path) = &config.checkpoint {
        if let Some(checkpoint) = Checkpoint::load(path)? {
            checkpoint.ensure_matches(grid.total(), &config.label_scheme)?;
            tracing::info!(
                path = %path.display(),
                offset = checkpoint.offset,
                "resuming from checkpoint"
            );
            return Ok(checkpoint.offset);
        }
    }
    Ok(0)
}

/// Runs every remaining pair of the grid through `invoker`, one at a time.
///
/// A line `gen {g} try {t}` is written to `progress` before each invocation. The
/// interrupt flag is checked before each pair and after each invocation returns; a
/// pair during which the flag was raised is not counted as completed.
///
/// A process that cannot be spawned at all is fatal: the error is returned and the
/// checkpoint keeps the offset of the last pair that actually ran.
pub fn run_grid(
    config: &LabConfig,
    invoker: &mut dyn Invoker,
    interrupt: &InterruptFlag,
    progress: &mut dyn Write,
) -> Result<RunSummary> {
    let grid = config.grid()?;
    let start = resolve_start_offset(config, &grid)?;
    let pairs = grid.slice(start)?;
    ensure_dir(config.layout.dir())?;

    let policy = config.failure_policy();
    let attempts_allowed = match policy {
        FailurePolicy::Retry(extra) => extra.saturating_add(1),
        _ => 1,
    };
    let mut summary = RunSummary::new(start, grid.total());
    tracing::info!(
        start,
        remaining = pairs.len(),
        total = summary.total,
        policy = policy.as_str(),
        "starting run"
    );

    for pair in &pairs {
        if interrupt.is_set() {
            summary.interrupted = true;
            break;
        }
        let label = config.label_scheme.label(pair);
        writeln!(progress, "{}", pair)?;
        progress.flush()?;

        let mut succeeded = false;
        let mut last_exit = String::new();
        let mut attempts = 0;
        while attempts < attempts_allowed {
            attempts += 1;
            let outcome = invoker.invoke(pair, &label).with_context(|| {
                format!(
                    "run_stopped: {} not started, resume with offset = {}",
                    pair, summary.resume_offset
                )
            })?;
            if outcome.is_success() {
                succeeded = true;
            } else {
                last_exit = outcome.describe();
            }
            if succeeded || interrupt.is_set() {
                break;
            }
            if attempts < attempts_allowed {
                tracing::warn!(%pair, label = %label, exit = %last_exit, attempts, "retrying failed pair");
            }
        }

        if interrupt.is_set() {
            summary.interrupted = true;
            break;
        }

        if succeeded {
            summary.succeeded += 1;
        } else {
            tracing::warn!(%pair, label = %label, exit = %last_exit, attempts, "external process failed");
            summary.failed.push(FailedPair {
                pair: *pair,
                label: label.clone(),
                exit: last_exit,
                attempts,
            });
            if policy == FailurePolicy::Abort {
                summary.aborted = true;
                break;
            }
        }
        summary.completed += 1;
        summary.resume_offset = start + summary.completed;
        store_checkpoint(config, &summary)?;
    }

    if summary.stopped_early() {
        store_checkpoint(config, &summary)?;
    }
    tracing::info!(
        completed = summary.completed,
        failed = summary.failed.len(),
        resume_offset = summary.resume_offset,
        interrupted = summary.interrupted,
        aborted = summary.aborted,
        "run finished"
    );
    Ok(summary)
}

fn store_checkpoint(config: &LabConfig, summary: &RunSummary) -> Result<()> {
    if let Some(path) = &config.checkpoint {
        Checkpoint::new(
            summary.resume_offset,
            summary.total,
            config.label_scheme.clone(),
        )
        .store(path)?;
        tracing::debug!(path = %path.display(), offset = summary.resume_offset, "checkpoint written");
    }
    Ok(())
}
