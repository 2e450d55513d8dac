#![cfg(feature = "web")]
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use std::error::Error;
use std::f64::consts::PI;

use crate::aggregate::{DepartmentProgress, StatusCounts};

/// Bar colour of the department chart (#3b82f6)
const BAR_COLOR: RGBColor = RGBColor(59, 130, 246);

/// Grid line colour (#f1f5f9)
const GRID_COLOR: RGBColor = RGBColor(241, 245, 249);

/// Axis label colour (#64748b)
const LABEL_COLOR: RGBColor = RGBColor(100, 116, 139);

/// Size options for chart generation
#[derive(Clone, Debug)]
pub struct GraphOptions {
    /// Width of the graph in pixels
    pub width: u32,

    /// Height of the graph in pixels
    pub height: u32,

    /// Bar width in pixels, department chart only
    pub bar_width: u32,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            width: 720,
            height: 256,
            bar_width: 45,
        }
    }
}

impl GraphOptions {
    /// Square canvas for the status donut
    pub fn donut() -> Self {
        Self {
            width: 200,
            height: 200,
            bar_width: 0,
        }
    }
}

/// Creates the per-department progress bar chart as an SVG document
///
/// The value axis is fixed to 0..=100 so departments compare at a glance.
/// Bars keep the order of the input.
///
/// # Examples
/// ```
/// use ed_dash::aggregate::DepartmentProgress;
/// use ed_dash::graph::{GraphOptions, department_chart};
///
/// let data = vec![DepartmentProgress { name: "기획".to_string(), mean_progress: 40 }];
/// let svg = department_chart(&data, &GraphOptions::default()).unwrap();
/// assert!(svg.contains("<svg"));
/// ```
pub fn department_chart(
    data: &[DepartmentProgress],
    options: &GraphOptions,
) -> Result<String, Box<dyn Error + Send + Sync>> {
    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (options.width, options.height))
            .into_drawing_area();
        root.fill(&WHITE)?;

        let label_band = 28i32;
        let top = 8i32;
        let plot_height = options.height as i32 - label_band - top;
        let baseline = top + plot_height;

        // grid at 25% steps
        for step in 0..=4 {
            let y = baseline - plot_height * step / 4;
            root.draw(&PathElement::new(
                vec![(0, y), (options.width as i32, y)],
                GRID_COLOR.stroke_width(1),
            ))?;
        }

        if !data.is_empty() {
            let slot = options.width as i32 / data.len() as i32;
            let half_bar = (options.bar_width as i32).min(slot - 4).max(2) / 2;
            let label_style = ("sans-serif", 13)
                .into_font()
                .color(&LABEL_COLOR)
                .pos(Pos::new(HPos::Center, VPos::Top));

            for (i, department) in data.iter().enumerate() {
                let center = slot * i as i32 + slot / 2;
                let value = department.mean_progress.clamp(0, 100) as i32;
                let bar_top = baseline - plot_height * value / 100;

                root.draw(&Rectangle::new(
                    [(center - half_bar, bar_top), (center + half_bar, baseline)],
                    BAR_COLOR.filled(),
                ))?;
                root.draw(&Text::new(
                    department.name.clone(),
                    (center, baseline + 8),
                    label_style.clone(),
                ))?;
            }
        }

        root.present()?;
    }

    Ok(svg)
}

/// Creates the status distribution donut as an SVG document
///
/// Slices follow [`StatusCounts::entries`] order and use each status colour.
/// An empty record set draws a grey ring.
pub fn status_chart(
    counts: &StatusCounts,
    options: &GraphOptions,
) -> Result<String, Box<dyn Error + Send + Sync>> {
    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (options.width, options.height))
            .into_drawing_area();
        root.fill(&WHITE)?;

        let center = (options.width as f64 / 2.0, options.height as f64 / 2.0);
        let outer = options.width.min(options.height) as f64 / 2.0 - 4.0;
        let inner = outer * 55.0 / 75.0;
        let total = counts.total();

        if total == 0 {
            root.draw(&Polygon::new(
                ring_segment(center, inner, outer, 0.0, 2.0 * PI),
                RGBColor(226, 232, 240).filled(),
            ))?;
        } else {
            let mut start = -PI / 2.0;
            for (status, count) in counts.entries() {
                if count == 0 {
                    continue;
                }
                let sweep = 2.0 * PI * count as f64 / total as f64;
                let (r, g, b) = status.rgb();
                root.draw(&Polygon::new(
                    ring_segment(center, inner, outer, start, start + sweep),
                    RGBColor(r, g, b).filled(),
                ))?;
                start += sweep;
            }
        }

        root.present()?;
    }

    Ok(svg)
}

/// Outline of a ring slice between two angles, as pixel coordinates
fn ring_segment(
    center: (f64, f64),
    inner: f64,
    outer: f64,
    start: f64,
    end: f64,
) -> Vec<(i32, i32)> {
    let steps = (((end - start).abs() / (2.0 * PI)) * 96.0).ceil().max(2.0) as usize;
    let point = |radius: f64, angle: f64| {
        (
            (center.0 + radius * angle.cos()).round() as i32,
            (center.1 + radius * angle.sin()).round() as i32,
        )
    };

    let mut points = Vec::with_capacity(2 * (steps + 1));
    for i in 0..=steps {
        let angle = start + (end - start) * i as f64 / steps as f64;
        points.push(point(outer, angle));
    }
    for i in (0..=steps).rev() {
        let angle = start + (end - start) * i as f64 / steps as f64;
        points.push(point(inner, angle));
    }
    points
}
