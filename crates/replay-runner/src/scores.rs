use crate::grid::{LabelScheme, ResultLayout, RunPair};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::ops::Range;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScoreFileError {
    #[error("result_file_unreadable: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("result_file_empty: {path}")]
    Empty { path: PathBuf },
    #[error("result_file_malformed: {path}: first line {line:?} is not an integer")]
    Malformed { path: PathBuf, line: String },
}

/// Reads the score from the first line of a result file. Later lines are ignored.
pub fn read_score(path: &Path) -> Result<i64, ScoreFileError> {
    let io_err = |source| ScoreFileError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_err)?;
    let mut first = String::new();
    let read = BufReader::new(file).read_line(&mut first).map_err(io_err)?;
    if read == 0 {
        return Err(ScoreFileError::Empty {
            path: path.to_path_buf(),
        });
    }
    let line = first.trim();
    line.parse::<i64>().map_err(|_| ScoreFileError::Malformed {
        path: path.to_path_buf(),
        line: line.to_string(),
    })
}

/// All trial scores plus the per-generation arithmetic mean.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScoreTable {
    pub points: Vec<(u32, i64)>,
    pub means: Vec<(u32, f64)>,
}

impl ScoreTable {
    pub fn mean_of(&self, generation: u32) -> Option<f64> {
        self.means
            .iter()
            .find(|(g, _)| *g == generation)
            .map(|(_, m)| *m)
    }

    /// Highest single-trial score; the earliest generation wins ties.
    pub fn best(&self) -> Option<(u32, i64)> {
        self.points
            .iter()
            .copied()
            .fold(None, |best, (g, s)| match best {
                Some((_, top)) if top >= s => best,
                _ => Some((g, s)),
            })
    }
}

/// Reads every result file for `generations` x `trials` in generation-major order.
/// The first unreadable or malformed file aborts the whole collection.
pub fn collect_scores(
    layout: &ResultLayout,
    scheme: &LabelScheme,
    generations: Range<u32>,
    trials: u32,
) -> Result<ScoreTable, ScoreFileError> {
    let mut table = ScoreTable::default();
    for generation in generations {
        // Holds u32::MAX trials of i64 scores without overflow.
        let mut sum: i128 = 0;
        for trial in 0..trials {
            let pair = RunPair::new(generation, trial);
            let path = layout.path_for(&scheme.label(&pair));
            let score = read_score(&path)?;
            tracing::trace!(path = %path.display(), score, "read score");
            sum += i128::from(score);
            table.points.push((generation, score));
        }
        if trials > 0 {
            table.means.push((generation, sum as f64 / trials as f64));
        }
    }
    Ok(table)
}
