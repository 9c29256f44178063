//! ASCII ribbon plots for terminal output.
//!
//! This is intentionally "dumb" (fixed-size grid), optimized for:
//! - quick visual sanity checks in a terminal
//! - deterministic output (helpful for golden tests)
//!
//! Plot elements:
//! - credible band: `.`
//! - per-class mean line: the class index digit (`1`, `2`, ...)
//! - observed routes: `o`

use crate::domain::{ClassTable, Observation, PredictionSummary};

/// Render one ribbon per class from prediction summaries (typically a sweep grid).
pub fn render_ribbon_plot(
    predictions: &[PredictionSummary],
    observations: &[Observation],
    classes: &ClassTable,
    width: usize,
    height: usize,
) -> String {
    let width = width.max(10);
    let height = height.max(5);

    let (h_min, h_max) = hours_range(predictions, observations).unwrap_or((-0.5, 0.5));
    let (y_min, y_max) = y_range(predictions, observations).unwrap_or((-1.0, 1.0));
    let (y_min, y_max) = pad_range(y_min, y_max, 0.05);

    let mut grid = vec![vec![' '; width]; height];
    let series = split_by_class(predictions);

    for (_, points) in &series {
        draw_band(&mut grid, points, h_min, h_max, y_min, y_max);
    }
    for (class, points) in &series {
        let ch = std::char::from_digit((*class % 10) as u32, 10).unwrap_or('*');
        let line: Vec<(f64, f64)> = points.iter().map(|p| (p.hours_change_fraction, p.mean)).collect();
        draw_curve(&mut grid, &line, h_min, h_max, y_min, y_max, ch);
    }
    for o in observations {
        let x = map_x(o.hours_change_fraction, h_min, h_max, width);
        let y = map_y(o.response_log_rate, y_min, y_max, height);
        grid[y][x] = 'o';
    }

    let mass = predictions.first().map(|p| p.mass).unwrap_or(0.0);
    let mut out = String::new();
    out.push_str(&format!(
        "Plot: hours=[{h_min:.3}, {h_max:.3}] | y=[{y_min:.2}, {y_max:.2}] | band={:.0}%\n",
        mass * 100.0
    ));
    for row in grid {
        out.push_str(&row.into_iter().collect::<String>());
        out.push('\n');
    }

    let legend: Vec<String> = series
        .iter()
        .map(|(class, _)| format!("{}={}", class % 10, classes.label(*class).unwrap_or("?")))
        .collect();
    if !legend.is_empty() {
        out.push_str(&legend.join("  "));
        out.push('\n');
    }
    out
}

/// Group by class in first-appearance order, each series sorted by hours.
fn split_by_class(predictions: &[PredictionSummary]) -> Vec<(usize, Vec<PredictionSummary>)> {
    let mut out: Vec<(usize, Vec<PredictionSummary>)> = Vec::new();
    for p in predictions {
        match out.iter_mut().find(|(c, _)| *c == p.class) {
            Some((_, v)) => v.push(*p),
            None => out.push((p.class, vec![*p])),
        }
    }
    for (_, v) in &mut out {
        v.sort_by(|a, b| {
            a.hours_change_fraction
                .partial_cmp(&b.hours_change_fraction)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }
    out
}

fn hours_range(predictions: &[PredictionSummary], observations: &[Observation]) -> Option<(f64, f64)> {
    let values = predictions
        .iter()
        .map(|p| p.hours_change_fraction)
        .chain(observations.iter().map(|o| o.hours_change_fraction));
    min_max(values)
}

fn y_range(predictions: &[PredictionSummary], observations: &[Observation]) -> Option<(f64, f64)> {
    let values = predictions
        .iter()
        .flat_map(|p| [p.lower, p.upper])
        .chain(observations.iter().map(|o| o.response_log_rate));
    min_max(values)
}

fn min_max(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values.filter(|v| v.is_finite()) {
        min = min.min(v);
        max = max.max(v);
    }
    if min.is_finite() && max.is_finite() && max > min {
        Some((min, max))
    } else {
        None
    }
}

fn pad_range(min: f64, max: f64, frac: f64) -> (f64, f64) {
    let span = (max - min).abs();
    let pad = (span * frac).max(1e-12);
    (min - pad, max + pad)
}

fn map_x(t: f64, t_min: f64, t_max: f64, width: usize) -> usize {
    let width = width.max(2);
    let u = ((t - t_min) / (t_max - t_min)).clamp(0.0, 1.0);
    (u * (width as f64 - 1.0)).round() as usize
}

fn map_y(y: f64, y_min: f64, y_max: f64, height: usize) -> usize {
    let height = height.max(2);
    let u = ((y - y_min) / (y_max - y_min)).clamp(0.0, 1.0);
    // y=top is max -> row 0
    (height as f64 - 1.0 - (u * (height as f64 - 1.0))).round() as usize
}

/// Fill the interval between `lower` and `upper`, interpolating between grid points.
fn draw_band(grid: &mut [Vec<char>], points: &[PredictionSummary], h_min: f64, h_max: f64, y_min: f64, y_max: f64) {
    let height = grid.len();
    let width = grid[0].len();
    let mut fill = |x: usize, lower: f64, upper: f64| {
        let top = map_y(upper, y_min, y_max, height);
        let bottom = map_y(lower, y_min, y_max, height);
        for row in grid.iter_mut().take(bottom + 1).skip(top) {
            if row[x] == ' ' {
                row[x] = '.';
            }
        }
    };

    if let [only] = points {
        fill(map_x(only.hours_change_fraction, h_min, h_max, width), only.lower, only.upper);
        return;
    }
    for pair in points.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        let x0 = map_x(a.hours_change_fraction, h_min, h_max, width);
        let x1 = map_x(b.hours_change_fraction, h_min, h_max, width);
        for x in x0..=x1 {
            let u = if x1 == x0 { 0.0 } else { (x - x0) as f64 / (x1 - x0) as f64 };
            fill(x, a.lower + u * (b.lower - a.lower), a.upper + u * (b.upper - a.upper));
        }
    }
}

fn draw_curve(grid: &mut [Vec<char>], curve: &[(f64, f64)], t_min: f64, t_max: f64, y_min: f64, y_max: f64, ch: char) {
    let height = grid.len();
    let width = grid[0].len();

    let mut prev = None;
    for &(t, y) in curve {
        let x = map_x(t, t_min, t_max, width);
        let yy = map_y(y, y_min, y_max, height);
        if let Some((x0, y0)) = prev {
            draw_line(grid, x0, y0, x, yy, ch);
        } else {
            grid[yy][x] = ch;
        }
        prev = Some((x, yy));
    }
}

/// Integer line drawing (Bresenham-ish). Draws over blanks and band cells only.
fn draw_line(grid: &mut [Vec<char>], x0: usize, y0: usize, x1: usize, y1: usize, ch: char) {
    let mut x0 = x0 as isize;
    let mut y0 = y0 as isize;
    let x1 = x1 as isize;
    let y1 = y1 as isize;

    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if y0 >= 0 && (y0 as usize) < grid.len() && x0 >= 0 && (x0 as usize) < grid[0].len() {
            let cell = &mut grid[y0 as usize][x0 as usize];
            if *cell == ' ' || *cell == '.' {
                *cell = ch;
            }
        }

        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(class: usize, hours: f64) -> PredictionSummary {
        PredictionSummary {
            class,
            hours_change_fraction: hours,
            mean: 0.0,
            lower: -1.0,
            upper: 1.0,
            mass: 0.89,
        }
    }

    #[test]
    fn ribbon_golden_snapshot_small() {
        let preds = [flat(1, 1.0), flat(1, 0.0)];
        let txt = render_ribbon_plot(&preds, &[], &ClassTable::route_types_v1(), 10, 5);
        let expected = concat!(
            "Plot: hours=[0.000, 1.000] | y=[-1.10, 1.10] | band=89%\n",
            "..........\n",
            "..........\n",
            "1111111111\n",
            "..........\n",
            "..........\n",
            "1=CoreLoc\n",
        );
        assert_eq!(txt, expected);
    }

    #[test]
    fn observations_overlay_the_ribbon() {
        let preds = [flat(2, 0.0), flat(2, 1.0)];
        let obs = [Observation {
            route: "1".into(),
            class: 2,
            hours_change_fraction: 1.0,
            response_log_rate: 0.0,
        }];
        let txt = render_ribbon_plot(&preds, &obs, &ClassTable::route_types_v1(), 10, 5);
        let mean_row = txt.lines().nth(3).unwrap();
        assert_eq!(mean_row, "222222222o");
        assert!(txt.ends_with("2=CommExp\n"));
    }
}
