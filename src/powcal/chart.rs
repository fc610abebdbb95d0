use std::path::Path;

use plotters::prelude::*;

use crate::error::{Error, Result};

use super::fit::Polynomial;

const FIT_POINTS: usize = 100;

fn render_error(err: impl std::fmt::Display) -> Error {
    Error::Render(err.to_string())
}

/// Scatter of (tx_scale, sqrt(rx_pow)), the fitted curve, and the x = y
/// reference up to the largest tx_scale sample. Written as SVG.
pub fn render_power_chart(
    path: &Path,
    serial: &str,
    points: &[(f64, f64)],
    fit: &Polynomial,
) -> Result<()> {
    let (x_min, x_max) = bounds(points.iter().map(|p| p.0));
    let curve: Vec<(f64, f64)> = (0..FIT_POINTS)
        .map(|i| {
            let x = x_min + (x_max - x_min) * i as f64 / (FIT_POINTS - 1) as f64;
            (x, fit.eval(x))
        })
        .collect();

    let reference_end = points
        .iter()
        .copied()
        .fold(None, |best: Option<(f64, f64)>, p| match best {
            Some(b) if b.0 >= p.0 => Some(b),
            _ => Some(p),
        })
        .unwrap_or((0.0, 0.0));
    let reference = [(0.0, 0.0), reference_end];

    let (y_min, y_max) = bounds(
        points
            .iter()
            .chain(curve.iter())
            .chain(reference.iter())
            .map(|p| p.1),
    );
    let (x_lo, x_hi) = bounds([x_min, x_max, 0.0].into_iter());

    let root = SVGBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(render_error)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(
            format!("Post-calibration signal scaling - {serial}"),
            ("sans-serif", 24),
        )
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(pad(x_lo, x_hi), pad(y_min, y_max))
        .map_err(render_error)?;

    chart
        .configure_mesh()
        .x_desc("TX scale")
        .y_desc("RX scale")
        .draw()
        .map_err(render_error)?;

    chart
        .draw_series(
            points
                .iter()
                .map(|&(x, y)| Circle::new((x, y), 3, BLUE.filled())),
        )
        .map_err(render_error)?
        .label("data points")
        .legend(|(x, y)| Circle::new((x, y), 3, BLUE.filled()));

    chart
        .draw_series(LineSeries::new(curve, &GREEN))
        .map_err(render_error)?
        .label(format!("Polynomial Fit (degree={})", fit.degree()))
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], GREEN));

    chart
        .draw_series(LineSeries::new(reference, &RED))
        .map_err(render_error)?
        .label("x=y")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(render_error)?;

    root.present().map_err(render_error)?;
    Ok(())
}

fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values
        .filter(|v| v.is_finite())
        .fold(None, |acc: Option<(f64, f64)>, v| match acc {
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            None => Some((v, v)),
        })
        .unwrap_or((0.0, 1.0))
}

fn pad(lo: f64, hi: f64) -> std::ops::Range<f64> {
    let margin = ((hi - lo) * 0.05).max(1e-3);
    (lo - margin)..(hi + margin)
}
