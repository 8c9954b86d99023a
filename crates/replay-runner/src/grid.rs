use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// One (generation, trial) cell of the run grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunPair {
    pub generation: u32,
    pub trial: u32,
}

impl RunPair {
    pub fn new(generation: u32, trial: u32) -> Self {
        Self { generation, trial }
    }
}

impl fmt::Display for RunPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen {} try {}", self.generation, self.trial)
    }
}

/// Cartesian product of a generation range and a per-generation trial count,
/// enumerated generation-major, trial-minor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunGrid {
    generations: Range<u32>,
    trials: u32,
}

impl RunGrid {
    pub fn new(generations: Range<u32>, trials: u32) -> Result<Self> {
        if generations.is_empty() {
            return Err(anyhow!(
                "invalid_grid: generation range {}..{} is empty",
                generations.start,
                generations.end
            ));
        }
        if trials == 0 {
            return Err(anyhow!("invalid_grid: trial count must be > 0"));
        }
        Ok(Self {
            generations,
            trials,
        })
    }

    pub fn generations(&self) -> Range<u32> {
        self.generations.clone()
    }

    pub fn trials(&self) -> u32 {
        self.trials
    }

    pub fn total(&self) -> usize {
        self.generations.len() * self.trials as usize
    }

    pub fn pairs(&self) -> impl Iterator<Item = RunPair> + '_ {
        let trials = self.trials;
        self.generations
            .clone()
            .flat_map(move |g| (0..trials).map(move |t| RunPair::new(g, t)))
    }

    /// Pairs from `offset` onward. `offset == total()` yields an empty slice.
    pub fn slice(&self, offset: usize) -> Result<Vec<RunPair>> {
        let total = self.total();
        if offset > total {
            return Err(anyhow!(
                "offset_out_of_range: offset {} exceeds grid size {}",
                offset,
                total
            ));
        }
        Ok(self.pairs().skip(offset).collect())
    }
}

/// How a pair is turned into the run label handed to the external program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelScheme {
    Plain,
    Prefixed(String),
}

impl LabelScheme {
    pub fn from_prefix(prefix: &str) -> Self {
        if prefix.is_empty() {
            LabelScheme::Plain
        } else {
            LabelScheme::Prefixed(prefix.to_string())
        }
    }

    pub fn label(&self, pair: &RunPair) -> String {
        match self {
            LabelScheme::Plain => format!("{}_{}", pair.generation, pair.trial),
            LabelScheme::Prefixed(prefix) => {
                format!("{}_{}_{}", prefix, pair.generation, pair.trial)
            }
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            LabelScheme::Plain => "plain",
            LabelScheme::Prefixed(prefix) => prefix,
        }
    }
}

/// Where the external program leaves the result file for a given label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultLayout {
    pub dir: PathBuf,
    pub file_prefix: String,
    pub extension: String,
}

impl Default for ResultLayout {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("replay"),
            file_prefix: "replay".to_string(),
            extension: "txt".to_string(),
        }
    }
}

impl ResultLayout {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, label: &str) -> PathBuf {
        let mut name = if self.file_prefix.is_empty() {
            label.to_string()
        } else {
            format!("{}_{}", self.file_prefix, label)
        };
        if !self.extension.is_empty() {
            name.push('.');
            name.push_str(&self.extension);
        }
        self.dir.join(name)
    }
}
