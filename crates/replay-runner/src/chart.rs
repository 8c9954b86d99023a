use crate::scores::ScoreTable;
use anyhow::{anyhow, Context, Result};
use plotters::coord::Shift;
use plotters::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const MAX_X_TICKS: u32 = 50;

/// Presentation settings for the score chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub output: PathBuf,
    pub title: String,
    pub x_desc: String,
    pub y_desc: String,
    pub tick_stride: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for ChartSpec {
    fn default() -> Self {
        Self {
            output: PathBuf::from("replay").join("score_by_generation.png"),
            title: "Average score for generations (width 10)".to_string(),
            x_desc: "Generations".to_string(),
            y_desc: "Average score".to_string(),
            tick_stride: 5,
            width: 1200,
            height: 800,
        }
    }
}

impl ChartSpec {
    /// Tick positions at multiples of the stride, from `first_generation` rounded
    /// down to the first multiple at or past `last_generation`. Wide ranges double
    /// the stride until at most `MAX_X_TICKS` intervals remain.
    pub fn x_ticks(&self, first_generation: u32, last_generation: u32) -> Vec<u32> {
        let span = last_generation.saturating_sub(first_generation);
        let mut stride = self.tick_stride.max(1);
        while span / stride > MAX_X_TICKS {
            match stride.checked_mul(2) {
                Some(wider) => stride = wider,
                None => break,
            }
        }
        let mut tick = first_generation - first_generation % stride;
        let mut ticks = vec![tick];
        while tick < last_generation {
            match tick.checked_add(stride) {
                Some(next) => {
                    tick = next;
                    ticks.push(tick);
                }
                None => break,
            }
        }
        ticks
    }

    fn is_svg(&self) -> bool {
        self.output
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("svg"))
            .unwrap_or(false)
    }
}

/// Draws every trial score as a cross and the per-generation means as a line.
pub fn render_chart(table: &ScoreTable, spec: &ChartSpec) -> Result<PathBuf> {
    if table.points.is_empty() {
        return Err(anyhow!("empty_table: no scores to plot"));
    }
    if let Some(parent) = spec.output.parent() {
        crate::ensure_dir(parent)?;
    }
    let size = (spec.width, spec.height);
    let drawn = if spec.is_svg() {
        let root = SVGBackend::new(&spec.output, size).into_drawing_area();
        draw(&root, table, spec)
    } else {
        let root = BitMapBackend::new(&spec.output, size).into_drawing_area();
        draw(&root, table, spec)
    };
    drawn.with_context(|| format!("chart_render_failed: {}", spec.output.display()))?;
    Ok(spec.output.clone())
}

fn draw<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    table: &ScoreTable,
    spec: &ChartSpec,
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;

    let first_generation = table.points.iter().map(|(g, _)| *g).min().unwrap_or(0);
    let last_generation = table.points.iter().map(|(g, _)| *g).max().unwrap_or(0);
    let ticks = spec.x_ticks(first_generation, last_generation);
    let (x_lo, x_hi) = x_bounds(&ticks, last_generation);
    let (y_lo, y_hi) = y_bounds(table);

    let mut chart = ChartBuilder::on(root)
        .caption(&spec.title, ("sans-serif", 28))
        .margin(16)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d((x_lo..x_hi).with_key_points(ticks), y_lo..y_hi)?;

    chart
        .configure_mesh()
        .x_desc(spec.x_desc.as_str())
        .y_desc(spec.y_desc.as_str())
        .axis_desc_style(("sans-serif", 20))
        .draw()?;

    chart.draw_series(
        table
            .points
            .iter()
            .map(|(g, s)| Cross::new((*g, *s as f64), 4, BLUE)),
    )?;
    chart.draw_series(LineSeries::new(
        table.means.iter().map(|(g, m)| (*g, *m)),
        &RED,
    ))?;

    root.present()?;
    Ok(())
}

fn x_bounds(ticks: &[u32], last_generation: u32) -> (u32, u32) {
    let lo = ticks.first().copied().unwrap_or(0);
    let hi = ticks.last().copied().unwrap_or(lo).max(last_generation);
    if hi > lo {
        (lo, hi)
    } else if lo < u32::MAX {
        (lo, lo + 1)
    } else {
        (lo - 1, lo)
    }
}

fn y_bounds(table: &ScoreTable) -> (f64, f64) {
    let lo = table.points.iter().map(|(_, s)| *s).min().unwrap_or(0) as f64;
    let hi = table.points.iter().map(|(_, s)| *s).max().unwrap_or(0) as f64;
    let lo = lo.min(0.0);
    let pad = ((hi - lo) * 0.05).max(1.0);
    (lo, hi + pad)
}
