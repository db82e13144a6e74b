use plotters::prelude::*;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};

/// Keeps the features that were split on, ordered by ascending split count so
/// the most used feature ends up at the top of a horizontal bar chart.
pub fn ranked_importance(importance: &[(String, usize)]) -> Vec<(String, usize)> {
    let mut ranked: Vec<(String, usize)> = importance
        .iter()
        .filter(|(_, count)| *count > 0)
        .cloned()
        .collect();
    ranked.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)));
    ranked
}

/// Draws split counts per feature as a horizontal bar chart and saves it as SVG.
/// Returns the number of bars drawn.
pub fn render_feature_importance<P: AsRef<Path>>(
    path: P,
    importance: &[(String, usize)],
) -> Result<usize> {
    let path = path.as_ref();
    let to_output_error = |e: &dyn std::fmt::Display| PipelineError::Output {
        path: path.display().to_string(),
        reason: e.to_string(),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let ranked = ranked_importance(importance);
    if ranked.is_empty() {
        warn!("The model made no splits; the importance chart has no bars");
    }
    let names: Vec<&str> = ranked.iter().map(|(name, _)| name.as_str()).collect();
    let max_count = ranked.iter().map(|(_, c)| *c).max().unwrap_or(1) as f64;
    let height = 120 + 28 * ranked.len().max(1) as u32;

    let root = SVGBackend::new(path, (1500, height)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| to_output_error(&e))?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Feature Weight", ("sans-serif", 24))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(260)
        .build_cartesian_2d(0f64..max_count * 1.05, (0..ranked.len().max(1)).into_segmented())
        .map_err(|e| to_output_error(&e))?;

    chart
        .configure_mesh()
        .disable_y_mesh()
        .x_desc("F score")
        .y_desc("Features")
        .y_labels(ranked.len().max(1))
        .y_label_formatter(&|value| match value {
            SegmentValue::CenterOf(i) => names.get(*i).map(|n| n.to_string()).unwrap_or_default(),
            _ => String::new(),
        })
        .draw()
        .map_err(|e| to_output_error(&e))?;

    chart
        .draw_series(ranked.iter().enumerate().map(|(i, (_, count))| {
            let mut bar = Rectangle::new(
                [
                    (0.0, SegmentValue::Exact(i)),
                    (*count as f64, SegmentValue::Exact(i + 1)),
                ],
                BLUE.filled(),
            );
            bar.set_margin(4, 4, 0, 0);
            bar
        }))
        .map_err(|e| to_output_error(&e))?;

    root.present().map_err(|e| to_output_error(&e))?;
    info!(path = %path.display(), features = ranked.len(), "Feature importance chart saved");
    Ok(ranked.len())
}
