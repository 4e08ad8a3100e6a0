use crate::registry::TRIANGLE_COUNTS;

/// Estimate runtime in seconds for a mesh of `triangles` triangles from a
/// benchmark series measured at [`TRIANGLE_COUNTS`].
///
/// Interpolates linearly in log-log space; `None` outside the measured range.
pub fn estimate_seconds(seconds: &[f64], triangles: u64) -> Option<f64> {
    let points: Vec<(f64, f64)> = TRIANGLE_COUNTS
        .iter()
        .zip(seconds)
        .filter(|(_, s)| **s > 0.0)
        .map(|(&n, &s)| ((n as f64).ln(), s.ln()))
        .collect();
    if points.len() < 2 || triangles == 0 {
        return None;
    }
    let x = (triangles as f64).ln();
    let (lo, hi) = (points[0].0, points[points.len() - 1].0);
    if x < lo || x > hi {
        return None;
    }
    let i = points.windows(2).position(|w| x <= w[1].0)?;
    let (x0, y0) = points[i];
    let (x1, y1) = points[i + 1];
    let t = (x - x0) / (x1 - x0);
    Some((y0 + t * (y1 - y0)).exp())
}

/// Mean of a quality series.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}
