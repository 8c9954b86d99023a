use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use replay_runner::{
    ConfigOverrides, FailurePolicyKind, InterruptFlag, LabConfig, Preset, ProcessInvoker,
    RunSummary, ScoreTable,
};
use serde_json::{json, Value};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "replay-lab",
    version,
    about = "Run hatetris replays over a generation grid and plot their scores"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PresetArg {
    #[value(name = "w10")]
    W10,
    #[value(name = "plain")]
    Plain,
}

impl From<PresetArg> for Preset {
    fn from(value: PresetArg) -> Self {
        match value {
            PresetArg::W10 => Preset::W10,
            PresetArg::Plain => Preset::Plain,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FailurePolicyArg {
    #[value(name = "continue")]
    Continue,
    #[value(name = "abort")]
    Abort,
    #[value(name = "retry")]
    Retry,
}

impl From<FailurePolicyArg> for FailurePolicyKind {
    fn from(value: FailurePolicyArg) -> Self {
        match value {
            FailurePolicyArg::Continue => FailurePolicyKind::Continue,
            FailurePolicyArg::Abort => FailurePolicyKind::Abort,
            FailurePolicyArg::Retry => FailurePolicyKind::Retry,
        }
    }
}

/// Grid and layout flags shared by every subcommand.
#[derive(Args, Debug, Clone)]
struct GridArgs {
    #[arg(long, value_enum, default_value = "w10")]
    preset: PresetArg,
    /// JSON file with configuration overrides; flags still win over it.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    gen_start: Option<u32>,
    /// Exclusive end of the generation range.
    #[arg(long)]
    gen_end: Option<u32>,
    #[arg(long)]
    trials: Option<u32>,
    /// Label prefix such as `w10`; pass an empty string for `{gen}_{trial}` labels.
    #[arg(long)]
    label_prefix: Option<String>,
    #[arg(long)]
    output_dir: Option<PathBuf>,
    #[arg(long)]
    file_prefix: Option<String>,
    #[arg(long)]
    extension: Option<String>,
}

impl GridArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            generations_start: self.gen_start,
            generations_end: self.gen_end,
            trials: self.trials,
            label_prefix: self.label_prefix.clone(),
            output_dir: self.output_dir.clone(),
            file_prefix: self.file_prefix.clone(),
            extension: self.extension.clone(),
            ..ConfigOverrides::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Invoke the external player once per (generation, trial) pair.
    Run {
        #[command(flatten)]
        grid: GridArgs,
        #[arg(long)]
        executable: Option<PathBuf>,
        #[arg(long)]
        working_dir: Option<PathBuf>,
        /// Number of pairs already completed; printed when a run is interrupted.
        #[arg(long)]
        offset: Option<usize>,
        /// JSON file that records progress after every pair and seeds the offset.
        #[arg(long)]
        checkpoint: Option<PathBuf>,
        #[arg(long, value_enum)]
        on_failure: Option<FailurePolicyArg>,
        #[arg(long)]
        retries: Option<u32>,
        #[arg(long)]
        json: bool,
    },
    /// Read every result file and chart score against generation.
    Plot {
        #[command(flatten)]
        grid: GridArgs,
        /// Chart file; `.svg` selects the SVG backend, anything else PNG.
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        tick_stride: Option<u32>,
        /// Print the collected scores without rendering a chart.
        #[arg(long)]
        no_chart: bool,
        #[arg(long)]
        json: bool,
    },
    /// Print the resolved configuration without running anything.
    Describe {
        #[command(flatten)]
        grid: GridArgs,
        #[arg(long)]
        json: bool,
    },
}

impl Commands {
    fn resolve_config(&self) -> Result<LabConfig> {
        let (grid, extra) = match self {
            Commands::Run {
                grid,
                executable,
                working_dir,
                offset,
                checkpoint,
                on_failure,
                retries,
                ..
            } => (
                grid,
                ConfigOverrides {
                    executable: executable.clone(),
                    working_dir: working_dir.clone(),
                    offset: *offset,
                    checkpoint: checkpoint.clone(),
                    failure_policy: on_failure.map(Into::into),
                    retries: *retries,
                    ..ConfigOverrides::default()
                },
            ),
            Commands::Plot {
                grid,
                out,
                title,
                tick_stride,
                ..
            } => (
                grid,
                ConfigOverrides {
                    chart_output: out.clone(),
                    chart_title: title.clone(),
                    tick_stride: *tick_stride,
                    ..ConfigOverrides::default()
                },
            ),
            Commands::Describe { grid, .. } => (grid, ConfigOverrides::default()),
        };
        let mut cli = grid.overrides();
        merge_overrides(&mut cli, extra);
        LabConfig::resolve(grid.preset.into(), grid.config.as_deref(), &cli)
    }
}

fn merge_overrides(base: &mut ConfigOverrides, extra: ConfigOverrides) {
    base.executable = extra.executable.or(base.executable.take());
    base.working_dir = extra.working_dir.or(base.working_dir.take());
    base.offset = extra.offset.or(base.offset);
    base.checkpoint = extra.checkpoint.or(base.checkpoint.take());
    base.failure_policy = extra.failure_policy.or(base.failure_policy);
    base.retries = extra.retries.or(base.retries);
    base.chart_output = extra.chart_output.or(base.chart_output.take());
    base.chart_title = extra.chart_title.or(base.chart_title.take());
    base.tick_stride = extra.tick_stride.or(base.tick_stride);
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            let failed = payload.get("ok") == Some(&Value::Bool(false));
            emit_json(&payload);
            if failed {
                std::process::exit(1);
            }
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", format!("{:#}", err), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    let config = command.resolve_config()?;
    tracing::debug!(?config, "resolved configuration");
    match command {
        Commands::Run { json, .. } => {
            let interrupt = InterruptFlag::install()?;
            let mut invoker = ProcessInvoker::new(config.executable.clone())
                .with_working_dir(config.working_dir.clone())
                .with_interrupt(interrupt.clone());
            let summary = if json {
                replay_runner::run_grid(&config, &mut invoker, &interrupt, &mut io::stderr())?
            } else {
                let stdout = io::stdout();
                let mut out = stdout.lock();
                replay_runner::run_grid(&config, &mut invoker, &interrupt, &mut out)?
            };
            if json {
                return Ok(Some(json!({
                    "ok": !summary.aborted,
                    "command": "run",
                    "config": config.to_json(),
                    "run": run_summary_to_json(&summary)?,
                })));
            }
            print_run_summary(&summary)?;
            if summary.aborted {
                std::process::exit(1);
            }
        }
        Commands::Plot { no_chart, json, .. } => {
            let table = if no_chart {
                replay_runner::collect_configured_scores(&config)?
            } else {
                replay_runner::plot_scores(&config)?
            };
            let chart = (!no_chart).then(|| config.chart.output.display().to_string());
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "plot",
                    "config": config.to_json(),
                    "scores": score_table_to_json(&table),
                    "chart": chart,
                })));
            }
            print_score_table(&table);
            if let Some(path) = chart {
                println!("chart: {}", path);
            }
        }
        Commands::Describe { json, .. } => {
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "config": config.to_json(),
                })));
            }
            print_config(&config);
        }
    }
    Ok(None)
}

fn print_run_summary(summary: &RunSummary) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if summary.stopped_early() {
        writeln!(out, "To continue: ")?;
        writeln!(out, "offset = {}", summary.resume_offset)?;
    }
    writeln!(
        out,
        "completed: {} / {} (from offset {})",
        summary.resume_offset, summary.total, summary.start_offset
    )?;
    writeln!(out, "succeeded: {}", summary.succeeded)?;
    writeln!(out, "failed: {}", summary.failed.len())?;
    for failed in &summary.failed {
        writeln!(
            out,
            "  {} ({}): exit {} after {} attempt(s)",
            failed.pair, failed.label, failed.exit, failed.attempts
        )?;
    }
    Ok(())
}

fn print_score_table(table: &ScoreTable) {
    println!("points: {}", table.points.len());
    for (generation, mean) in &table.means {
        println!("gen {}: mean {:.2}", generation, mean);
    }
    if let Some((generation, score)) = table.best() {
        println!("best: {} (gen {})", score, generation);
    }
}

fn print_config(config: &LabConfig) {
    println!("preset: {}", config.preset.as_str());
    println!("executable: {}", config.executable.display());
    println!(
        "generations: {}..{}",
        config.generations.start, config.generations.end
    );
    println!("trials: {}", config.trials);
    println!(
        "total_pairs: {}",
        config.generations.len() * config.trials as usize
    );
    println!("label_scheme: {}", config.label_scheme.as_str());
    println!("output_dir: {}", config.layout.dir.display());
    if let Some(path) = &config.checkpoint {
        println!("checkpoint: {}", path.display());
    }
    println!("failure_policy: {}", config.failure_policy().as_str());
    println!("chart: {}", config.chart.output.display());
}

fn run_summary_to_json(summary: &RunSummary) -> Result<Value> {
    Ok(serde_json::to_value(summary)?)
}

fn score_table_to_json(table: &ScoreTable) -> Value {
    json!({
        "points": table.points.iter().map(|(g, s)| json!({"generation": g, "score": s})).collect::<Vec<_>>(),
        "means": table.means.iter().map(|(g, m)| json!({"generation": g, "mean": m})).collect::<Vec<_>>(),
        "best": table.best().map(|(g, s)| json!({"generation": g, "score": s})),
    })
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. } | Commands::Plot { json, .. } | Commands::Describe { json, .. } => {
            *json
        }
    }
}
