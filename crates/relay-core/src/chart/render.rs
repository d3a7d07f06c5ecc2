//! PNG rendering for validated chart specs.

use anyhow::{Context, Result, anyhow};
use plotters::prelude::*;

use super::spec::{ChartSpec, ChartType};

const WIDTH: u32 = 800;
const HEIGHT: u32 = 500;

const STEEL_BLUE: RGBColor = RGBColor(70, 130, 180);
const NAVY: RGBColor = RGBColor(0, 0, 128);

/// Pastel palette for pie slices, cycled when there are more slices.
const PIE_PALETTE: [RGBColor; 8] = [
    RGBColor(141, 211, 199),
    RGBColor(255, 255, 179),
    RGBColor(190, 186, 218),
    RGBColor(251, 128, 114),
    RGBColor(128, 177, 211),
    RGBColor(253, 180, 98),
    RGBColor(179, 222, 105),
    RGBColor(252, 205, 229),
];

/// Render a chart spec to PNG bytes.
///
/// Draws into a scoped temp directory; the directory is removed on every
/// exit path when the guard drops.
pub fn render_png(spec: &ChartSpec) -> Result<Vec<u8>> {
    let dir = tempfile::tempdir().context("failed to create chart temp dir")?;
    let path = dir.path().join("chart.png");

    draw(spec, path.to_str().context("non-utf8 temp path")?)?;

    let bytes = std::fs::read(&path).context("failed to read rendered chart")?;
    Ok(bytes)
}

fn draw(spec: &ChartSpec, path: &str) -> Result<()> {
    let root = BitMapBackend::new(path, (WIDTH, HEIGHT)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| anyhow!("fill failed: {e}"))?;

    match spec.chart_type {
        ChartType::Bar => {
            draw_bars(&root, spec, &spec.x_categories, &spec.y, true)?;
        }
        ChartType::Histogram => {
            let (categories, counts) = bucketize(&spec.values, spec.bins);
            draw_bars(&root, spec, &categories, &counts, false)?;
        }
        ChartType::Line | ChartType::Scatter | ChartType::Area => {
            draw_xy(&root, spec)?;
        }
        ChartType::Pie => {
            draw_pie(&root, spec)?;
        }
    }

    root.present().map_err(|e| anyhow!("present failed: {e}"))?;
    Ok(())
}

/// Bucket a sample into `bins` equal-width ranges, returning the bucket
/// labels (lower bounds) and counts.
fn bucketize(values: &[f64], bins: usize) -> (Vec<String>, Vec<f64>) {
    let bins = bins.max(1);
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let width = if max > min { (max - min) / bins as f64 } else { 1.0 };

    let mut counts = vec![0f64; bins];
    for value in values {
        let mut index = ((value - min) / width) as usize;
        if index >= bins {
            index = bins - 1;
        }
        counts[index] += 1.0;
    }

    let labels = (0..bins)
        .map(|i| format!("{:.1}", min + width * i as f64))
        .collect();
    (labels, counts)
}

fn draw_bars(
    root: &DrawingArea<BitMapBackend<'_>, plotters::coord::Shift>,
    spec: &ChartSpec,
    categories: &[String],
    heights: &[f64],
    value_labels: bool,
) -> Result<()> {
    let y_max = heights.iter().cloned().fold(0f64, f64::max).max(1e-9) * 1.15;
    let n = heights.len();

    let mut chart = ChartBuilder::on(root)
        .caption(&spec.title, ("sans-serif", 24))
        .margin(12)
        .x_label_area_size(40)
        .y_label_area_size(56)
        .build_cartesian_2d((0usize..n).into_segmented(), 0f64..y_max)
        .map_err(|e| anyhow!("chart build failed: {e}"))?;

    let labels = categories.to_vec();
    chart
        .configure_mesh()
        .disable_x_mesh()
        .light_line_style(RGBColor(220, 220, 220))
        .x_desc(spec.x_label.clone())
        .y_desc(spec.y_label.clone())
        .x_label_formatter(&move |segment: &SegmentValue<usize>| match segment {
            SegmentValue::CenterOf(i) => labels.get(*i).cloned().unwrap_or_default(),
            _ => String::new(),
        })
        .draw()
        .map_err(|e| anyhow!("mesh draw failed: {e}"))?;

    chart
        .draw_series(
            Histogram::vertical(&chart)
                .style(STEEL_BLUE.filled())
                .margin(4)
                .data(heights.iter().enumerate().map(|(i, v)| (i, *v))),
        )
        .map_err(|e| anyhow!("bar series failed: {e}"))?;

    if value_labels {
        chart
            .draw_series(heights.iter().enumerate().map(|(i, v)| {
                Text::new(
                    format!("{v:.1}"),
                    (SegmentValue::CenterOf(i), *v),
                    ("sans-serif", 12),
                )
            }))
            .map_err(|e| anyhow!("bar labels failed: {e}"))?;
    }

    Ok(())
}

fn draw_xy(
    root: &DrawingArea<BitMapBackend<'_>, plotters::coord::Shift>,
    spec: &ChartSpec,
) -> Result<()> {
    let x_min = spec.x.iter().cloned().fold(f64::INFINITY, f64::min);
    let x_max = spec.x.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let y_min = spec.y.iter().cloned().fold(f64::INFINITY, f64::min).min(0.0);
    let y_max = spec.y.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let y_pad = ((y_max - y_min).abs()).max(1e-9) * 0.1;
    let x_pad = ((x_max - x_min).abs()).max(1e-9) * 0.05;

    let mut chart = ChartBuilder::on(root)
        .caption(&spec.title, ("sans-serif", 24))
        .margin(12)
        .x_label_area_size(40)
        .y_label_area_size(56)
        .build_cartesian_2d(
            (x_min - x_pad)..(x_max + x_pad),
            (y_min - y_pad)..(y_max + y_pad),
        )
        .map_err(|e| anyhow!("chart build failed: {e}"))?;

    chart
        .configure_mesh()
        .light_line_style(RGBColor(220, 220, 220))
        .x_desc(spec.x_label.clone())
        .y_desc(spec.y_label.clone())
        .draw()
        .map_err(|e| anyhow!("mesh draw failed: {e}"))?;

    let points: Vec<(f64, f64)> = spec.x.iter().cloned().zip(spec.y.iter().cloned()).collect();

    match spec.chart_type {
        ChartType::Line => {
            chart
                .draw_series(LineSeries::new(points.clone(), STEEL_BLUE.stroke_width(2)))
                .map_err(|e| anyhow!("line series failed: {e}"))?;
            chart
                .draw_series(
                    points
                        .iter()
                        .map(|(x, y)| Circle::new((*x, *y), 4, STEEL_BLUE.filled())),
                )
                .map_err(|e| anyhow!("line markers failed: {e}"))?;
        }
        ChartType::Scatter => {
            chart
                .draw_series(
                    points
                        .iter()
                        .map(|(x, y)| Circle::new((*x, *y), 5, STEEL_BLUE.mix(0.6).filled())),
                )
                .map_err(|e| anyhow!("scatter series failed: {e}"))?;
        }
        ChartType::Area => {
            chart
                .draw_series(
                    AreaSeries::new(points.clone(), 0.0, STEEL_BLUE.mix(0.35))
                        .border_style(NAVY.stroke_width(1)),
                )
                .map_err(|e| anyhow!("area series failed: {e}"))?;
        }
        _ => unreachable!("draw_xy only handles line/scatter/area"),
    }

    Ok(())
}

fn draw_pie(
    root: &DrawingArea<BitMapBackend<'_>, plotters::coord::Shift>,
    spec: &ChartSpec,
) -> Result<()> {
    let titled = root
        .titled(&spec.title, ("sans-serif", 24))
        .map_err(|e| anyhow!("title failed: {e}"))?;

    let center = ((WIDTH / 2) as i32, (HEIGHT / 2) as i32);
    let radius = (HEIGHT as f64) * 0.32;
    let colors: Vec<RGBColor> = (0..spec.values.len())
        .map(|i| PIE_PALETTE[i % PIE_PALETTE.len()])
        .collect();

    let mut pie = Pie::new(&center, &radius, &spec.values, &colors, &spec.labels);
    pie.start_angle(90.0);
    pie.label_style(("sans-serif", 16).into_font());
    pie.percentages(("sans-serif", 13).into_font().color(&BLACK));

    titled
        .draw(&pie)
        .map_err(|e| anyhow!("pie draw failed: {e}"))?;
    Ok(())
}
