use cwnd_lab_abstract::{ChartSpec, RenderError, Renderer};
use plotters::prelude::*;
use std::fmt::Display;
use std::ops::Range;
use std::path::Path;
use tracing::info;

const SERIES_COLORS: [RGBColor; 6] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
    RGBColor(23, 190, 207),
];
const REFERENCE_COLOR: RGBColor = RGBColor(214, 39, 40);

/// Draws a [`ChartSpec`] as a PNG bitmap.
#[derive(Debug, Clone, Copy)]
pub struct PngRenderer {
    pub width: u32,
    pub height: u32,
}

impl Default for PngRenderer {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 600,
        }
    }
}

/// Axis ranges for a chart: the data extent on x, and either the fixed y
/// range or the data extent padded by 10% with the floor at 0 for
/// non-negative data.
pub fn plot_ranges(chart: &ChartSpec) -> Option<(Range<f64>, Range<f64>)> {
    let (x0, mut x1) = chart.x_bounds()?;
    if x1 <= x0 {
        x1 = x0 + 1.0;
    }

    let (y0, y1) = match chart.y_range {
        Some(range) => range,
        None => {
            let (lo, hi) = chart.y_bounds()?;
            let lo = lo.min(0.0);
            let pad = ((hi - lo) * 0.1).max(1.0);
            (lo, hi + pad)
        }
    };
    Some((x0..x1, y0..y1.max(y0 + 1.0)))
}

fn draw_err(path: &Path, e: impl Display) -> RenderError {
    RenderError::Backend {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

impl Renderer for PngRenderer {
    fn render(&self, chart: &ChartSpec, path: &Path) -> Result<(), RenderError> {
        if chart.is_empty() {
            return Err(RenderError::Empty(chart.title.clone()));
        }
        let Some((x_range, y_range)) = plot_ranges(chart) else {
            return Err(RenderError::Empty(chart.title.clone()));
        };

        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir).map_err(|source| RenderError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let root = BitMapBackend::new(path, (self.width, self.height)).into_drawing_area();
        root.fill(&WHITE).map_err(|e| draw_err(path, e))?;

        let (x_start, x_end) = (x_range.start, x_range.end);
        let mut ctx = ChartBuilder::on(&root)
            .caption(&chart.title, ("sans-serif", 28))
            .margin(16)
            .x_label_area_size(48)
            .y_label_area_size(72)
            .build_cartesian_2d(x_range, y_range)
            .map_err(|e| draw_err(path, e))?;

        ctx.configure_mesh()
            .x_desc(chart.x_label.as_str())
            .y_desc(chart.y_label.as_str())
            .bold_line_style(BLACK.mix(0.15))
            .light_line_style(BLACK.mix(0.05))
            .label_style(("sans-serif", 15))
            .draw()
            .map_err(|e| draw_err(path, e))?;

        for (idx, series) in chart.series.iter().enumerate() {
            let color = SERIES_COLORS[idx % SERIES_COLORS.len()];
            ctx.draw_series(LineSeries::new(
                series.points.iter().copied(),
                color.stroke_width(2),
            ))
            .map_err(|e| draw_err(path, e))?
            .label(series.label.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
        }

        for reference in &chart.reference_lines {
            ctx.draw_series(LineSeries::new(
                [(x_start, reference.y), (x_end, reference.y)],
                REFERENCE_COLOR.stroke_width(1),
            ))
            .map_err(|e| draw_err(path, e))?
            .label(reference.label.as_str())
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], REFERENCE_COLOR));
        }

        ctx.configure_series_labels()
            .label_font(("sans-serif", 15))
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .position(SeriesLabelPosition::UpperRight)
            .draw()
            .map_err(|e| draw_err(path, e))?;

        root.present().map_err(|e| draw_err(path, e))?;
        info!("Chart saved to {}", path.display());
        Ok(())
    }
}
