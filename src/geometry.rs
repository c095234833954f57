// src/geometry.rs
//
// Pure geometry and robust-statistics helpers shared by the detector,
// tracker, and counter. Median/MAD is used everywhere a spread estimate
// must survive a minority of wild outliers (merged blobs, dropped marks).

use crate::types::Point;

/// Median of a sample. None for an empty slice.
pub fn median(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Median absolute deviation around the sample median.
pub fn mad(values: &[f32]) -> Option<f32> {
    let med = median(values)?;
    let deviations: Vec<f32> = values.iter().map(|v| (v - med).abs()).collect();
    median(&deviations)
}

/// Acceptance band `median - lower*MAD ..= median + upper*MAD`.
///
/// Returns None when the band is undefined or degenerate (fewer than two
/// samples, or MAD of zero): callers treat None as "reject nothing"
/// rather than collapsing the band to a single value.
pub fn mad_band(values: &[f32], lower_factor: f32, upper_factor: f32) -> Option<(f32, f32)> {
    if values.len() < 2 {
        return None;
    }
    let med = median(values)?;
    let spread = mad(values)?;
    if spread == 0.0 {
        return None;
    }
    Some((med - lower_factor * spread, med + upper_factor * spread))
}

/// True when `value` lies strictly inside the band, or when no band exists.
pub fn within_band(value: f32, band: Option<(f32, f32)>) -> bool {
    match band {
        Some((lower, upper)) => value > lower && value < upper,
        None => true,
    }
}

/// Rotate `point` by `angle_deg` counter-clockwise around `anchor`.
pub fn rotate_around(point: Point, anchor: Point, angle_deg: f32) -> Point {
    let rad = angle_deg.to_radians();
    let (sin, cos) = rad.sin_cos();
    let dx = point.x - anchor.x;
    let dy = point.y - anchor.y;
    Point::new(
        dx * cos - dy * sin + anchor.x,
        dx * sin + dy * cos + anchor.y,
    )
}

/// Euclidean distance between two points.
pub fn distance(a: Point, b: Point) -> f32 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_odd_and_even() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn mad_of_uniform_sample_is_zero() {
        assert_eq!(mad(&[5.0, 5.0, 5.0]), Some(0.0));
    }

    #[test]
    fn mad_band_rejects_nothing_when_degenerate() {
        // Single sample: no spread estimate exists.
        assert_eq!(mad_band(&[7.0], 1.0, 1.0), None);
        // Identical samples: MAD is zero, band would collapse.
        assert_eq!(mad_band(&[7.0, 7.0, 7.0], 1.0, 1.0), None);
        assert!(within_band(123.0, None));
    }

    #[test]
    fn mad_band_asymmetric_factors() {
        let values = [10.0, 12.0, 14.0, 16.0, 100.0];
        let (lower, upper) = mad_band(&values, 1.0, 3.0).unwrap();
        // median 14, MAD 2 -> band 12..20
        assert!((lower - 12.0).abs() < 1e-5);
        assert!((upper - 20.0).abs() < 1e-5);
        assert!(!within_band(100.0, Some((lower, upper))));
        assert!(within_band(13.0, Some((lower, upper))));
    }

    #[test]
    fn rotate_quarter_turn() {
        let rotated = rotate_around(Point::new(1.0, 0.0), Point::new(0.0, 0.0), 90.0);
        assert!(rotated.x.abs() < 1e-5);
        assert!((rotated.y - 1.0).abs() < 1e-5);
    }

    #[test]
    fn euclidean_distance() {
        assert!((distance(Point::new(0.0, 0.0), Point::new(3.0, 4.0)) - 5.0).abs() < 1e-6);
    }
}
