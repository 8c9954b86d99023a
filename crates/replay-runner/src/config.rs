use crate::chart::ChartSpec;
use crate::grid::{LabelScheme, ResultLayout, RunGrid};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

pub const DEFAULT_EXECUTABLE: &str = "target/release/hatetris-public";

/// Named starting points matching the two grid shapes used in practice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    /// 20 generations x 5 trials, labels `w10_{g}_{t}`.
    #[default]
    W10,
    /// 20 generations x 10 trials, labels `{g}_{t}`.
    Plain,
}

impl Preset {
    pub fn as_str(self) -> &'static str {
        match self {
            Preset::W10 => "w10",
            Preset::Plain => "plain",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicyKind {
    #[default]
    Continue,
    Abort,
    Retry,
}

/// What the run loop does when the external program exits unsuccessfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    Continue,
    Abort,
    /// Extra attempts before the pair is recorded as failed and the loop moves on.
    Retry(u32),
}

impl FailurePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            FailurePolicy::Continue => "continue",
            FailurePolicy::Abort => "abort",
            FailurePolicy::Retry(_) => "retry",
        }
    }
}

/// Partial configuration, as read from a JSON file or assembled from CLI flags.
/// `label_prefix: ""` selects plain labels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    #[serde(default)]
    pub executable: Option<PathBuf>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub generations_start: Option<u32>,
    #[serde(default)]
    pub generations_end: Option<u32>,
    #[serde(default)]
    pub trials: Option<u32>,
    #[serde(default)]
    pub label_prefix: Option<String>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub file_prefix: Option<String>,
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub checkpoint: Option<PathBuf>,
    #[serde(default)]
    pub failure_policy: Option<FailurePolicyKind>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub chart_output: Option<PathBuf>,
    #[serde(default)]
    pub chart_title: Option<String>,
    #[serde(default)]
    pub tick_stride: Option<u32>,
}

impl ConfigOverrides {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("config_unreadable: {}", path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("config_invalid: {}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabConfig {
    pub preset: Preset,
    pub executable: PathBuf,
    pub working_dir: Option<PathBuf>,
    pub generations: Range<u32>,
    pub trials: u32,
    pub label_scheme: LabelScheme,
    pub layout: ResultLayout,
    pub offset: Option<usize>,
    pub checkpoint: Option<PathBuf>,
    pub failure_policy: FailurePolicyKind,
    pub retries: u32,
    pub chart: ChartSpec,
}

impl LabConfig {
    pub fn preset(preset: Preset) -> Self {
        let (trials, label_scheme, title) = match preset {
            Preset::W10 => (
                5,
                LabelScheme::from_prefix("w10"),
                "Average score for generations (width 10)",
            ),
            Preset::Plain => (10, LabelScheme::Plain, "Average score for generations"),
        };
        Self {
            preset,
            executable: PathBuf::from(DEFAULT_EXECUTABLE),
            working_dir: None,
            generations: 0..20,
            trials,
            label_scheme,
            layout: ResultLayout::default(),
            offset: None,
            checkpoint: None,
            failure_policy: FailurePolicyKind::Continue,
            retries: 1,
            chart: ChartSpec {
                title: title.to_string(),
                ..ChartSpec::default()
            },
        }
    }

    /// Preset, then config file, then CLI flags; later layers win.
    pub fn resolve(
        preset: Preset,
        config_file: Option<&Path>,
        cli: &ConfigOverrides,
    ) -> Result<Self> {
        let mut config = Self::preset(preset);
        if let Some(path) = config_file {
            config.apply(&ConfigOverrides::load(path)?);
        }
        config.apply(cli);
        config.grid()?;
        if let Some(offset) = config.offset {
            config.validate_offset(offset)?;
        }
        Ok(config)
    }

    pub fn apply(&mut self, o: &ConfigOverrides) {
        if let Some(v) = &o.executable {
            self.executable = v.clone();
        }
        if let Some(v) = &o.working_dir {
            self.working_dir = Some(v.clone());
        }
        if let Some(v) = o.generations_start {
            self.generations.start = v;
        }
        if let Some(v) = o.generations_end {
            self.generations.end = v;
        }
        if let Some(v) = o.trials {
            self.trials = v;
        }
        if let Some(v) = &o.label_prefix {
            self.label_scheme = LabelScheme::from_prefix(v);
        }
        if let Some(v) = &o.output_dir {
            let default_chart = self.layout.dir.join("score_by_generation.png");
            if self.chart.output == default_chart {
                self.chart.output = v.join("score_by_generation.png");
            }
            self.layout.dir = v.clone();
        }
        if let Some(v) = &o.file_prefix {
            self.layout.file_prefix = v.clone();
        }
        if let Some(v) = &o.extension {
            self.layout.extension = v.trim_start_matches('.').to_string();
        }
        if let Some(v) = o.offset {
            self.offset = Some(v);
        }
        if let Some(v) = &o.checkpoint {
            self.checkpoint = Some(v.clone());
        }
        if let Some(v) = o.failure_policy {
            self.failure_policy = v;
        }
        if let Some(v) = o.retries {
            self.retries = v;
        }
        if let Some(v) = &o.chart_output {
            self.chart.output = v.clone();
        }
        if let Some(v) = &o.chart_title {
            self.chart.title = v.clone();
        }
        if let Some(v) = o.tick_stride {
            self.chart.tick_stride = v;
        }
    }

    pub fn grid(&self) -> Result<RunGrid> {
        RunGrid::new(self.generations.clone(), self.trials)
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        match self.failure_policy {
            FailurePolicyKind::Continue => FailurePolicy::Continue,
            FailurePolicyKind::Abort => FailurePolicy::Abort,
            FailurePolicyKind::Retry => FailurePolicy::Retry(self.retries),
        }
    }

    pub fn validate_offset(&self, offset: usize) -> Result<()> {
        let total = self.grid()?.total();
        if offset > total {
            return Err(anyhow!(
                "offset_out_of_range: offset {} exceeds grid size {}",
                offset,
                total
            ));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Value {
        json!({
            "preset": self.preset.as_str(),
            "executable": self.executable.display().to_string(),
            "working_dir": self.working_dir.as_ref().map(|p| p.display().to_string()),
            "generations": { "start": self.generations.start, "end": self.generations.end },
            "trials": self.trials,
            "total_pairs": self.generations.len() * self.trials as usize,
            "label_scheme": self.label_scheme.as_str(),
            "output_dir": self.layout.dir.display().to_string(),
            "result_pattern": self.layout.path_for(&self.label_scheme.label(
                &crate::grid::RunPair::new(self.generations.start, 0)
            )).display().to_string(),
            "offset": self.offset,
            "checkpoint": self.checkpoint.as_ref().map(|p| p.display().to_string()),
            "failure_policy": self.failure_policy().as_str(),
            "retries": self.retries,
            "chart": {
                "output": self.chart.output.display().to_string(),
                "title": self.chart.title,
                "tick_stride": self.chart.tick_stride,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn w10_preset_is_twenty_by_five() {
        let config = LabConfig::preset(Preset::W10);
        assert_eq!(config.generations, 0..20);
        assert_eq!(config.trials, 5);
        assert_eq!(config.label_scheme, LabelScheme::from_prefix("w10"));
        assert_eq!(config.executable, PathBuf::from(DEFAULT_EXECUTABLE));
        assert_eq!(config.failure_policy(), FailurePolicy::Continue);
        assert_eq!(config.grid().expect("grid").total(), 100);
    }

    #[test]
    fn plain_preset_uses_unprefixed_labels() {
        let config = LabConfig::preset(Preset::Plain);
        assert_eq!(config.trials, 10);
        assert_eq!(config.label_scheme, LabelScheme::Plain);
    }

    #[test]
    fn file_then_cli_precedence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("lab.json");
        fs::write(
            &path,
            r#"{ "trials": 3, "generations_end": 8, "label_prefix": "w12", "failure_policy": "retry" }"#,
        )
        .expect("write config");

        let cli = ConfigOverrides {
            trials: Some(4),
            retries: Some(2),
            ..ConfigOverrides::default()
        };
        let config = LabConfig::resolve(Preset::W10, Some(&path), &cli).expect("resolve");
        assert_eq!(config.trials, 4);
        assert_eq!(config.generations, 0..8);
        assert_eq!(config.label_scheme, LabelScheme::from_prefix("w12"));
        assert_eq!(config.failure_policy(), FailurePolicy::Retry(2));
    }

    #[test]
    fn unknown_config_keys_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("lab.json");
        fs::write(&path, r#"{ "trails": 3 }"#).expect("write config");
        let err = LabConfig::resolve(Preset::W10, Some(&path), &ConfigOverrides::default())
            .expect_err("typo must fail");
        assert!(err.to_string().contains("config_invalid"));
    }

    #[test]
    fn empty_grid_fails_resolution() {
        let cli = ConfigOverrides {
            generations_start: Some(5),
            generations_end: Some(5),
            ..ConfigOverrides::default()
        };
        assert!(LabConfig::resolve(Preset::W10, None, &cli).is_err());
    }

    #[test]
    fn output_dir_moves_default_chart() {
        let mut config = LabConfig::preset(Preset::W10);
        config.apply(&ConfigOverrides {
            output_dir: Some(PathBuf::from("runs/w10")),
            ..ConfigOverrides::default()
        });
        assert_eq!(config.layout.dir, PathBuf::from("runs/w10"));
        assert_eq!(
            config.chart.output,
            PathBuf::from("runs/w10").join("score_by_generation.png")
        );
    }

    #[test]
    fn offset_past_grid_is_invalid() {
        let config = LabConfig::preset(Preset::W10);
        config.validate_offset(100).expect("end offset is valid");
        assert!(config.validate_offset(101).is_err());
    }
}
