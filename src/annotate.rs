// src/annotate.rs
//
// Overlay rendering for the counted video output: tracked marks with their
// ids, the counting border, and a per-group totals panel.

use crate::border_counter::CountReport;
use crate::mark_tracker::Track;
use opencv::{core, imgproc, prelude::*};
use std::collections::BTreeMap;

use anyhow::Result;

/// One color per strand group, cycled when there are more groups.
fn group_colors() -> Vec<core::Scalar> {
    vec![
        core::Scalar::new(0.0, 0.0, 255.0, 0.0),   // Red
        core::Scalar::new(0.0, 255.0, 0.0, 0.0),   // Green
        core::Scalar::new(255.0, 0.0, 0.0, 0.0),   // Blue
        core::Scalar::new(0.0, 255.0, 255.0, 0.0), // Yellow
    ]
}

fn repaired_color() -> core::Scalar {
    core::Scalar::new(255.0, 0.0, 255.0, 0.0) // Magenta
}

pub fn draw_annotations(
    frame: &Mat,
    tracked: &[BTreeMap<u32, Track>],
    report: &CountReport,
    border_y: f32,
    timestamp_ms: f64,
) -> Result<Mat> {
    let mut output = frame.try_clone()?;
    let width = output.cols();
    let colors = group_colors();

    // Counting border across the full frame width.
    imgproc::line(
        &mut output,
        core::Point::new(0, border_y as i32),
        core::Point::new(width, border_y as i32),
        core::Scalar::new(255.0, 255.0, 255.0, 0.0),
        2,
        imgproc::LINE_AA,
        0,
    )?;

    // Tracked marks with their ids; repaired marks stand out.
    for (gi, group) in tracked.iter().enumerate() {
        let group_color = colors[gi % colors.len()];
        for (id, track) in group {
            let color = if track.mark.is_repaired() {
                repaired_color()
            } else {
                group_color
            };
            let start = core::Point::new(track.mark.start.x as i32, track.mark.start.y as i32);
            let end = core::Point::new(track.mark.end.x as i32, track.mark.end.y as i32);
            imgproc::line(&mut output, start, end, color, 2, imgproc::LINE_AA, 0)?;

            let centroid = track.mark.centroid();
            imgproc::circle(
                &mut output,
                core::Point::new(centroid.x as i32, centroid.y as i32),
                3,
                color,
                -1,
                imgproc::LINE_8,
                0,
            )?;
            imgproc::put_text(
                &mut output,
                &format!("{}", id),
                core::Point::new(centroid.x as i32 + 8, centroid.y as i32 - 8),
                imgproc::FONT_HERSHEY_SIMPLEX,
                0.5,
                color,
                1,
                imgproc::LINE_8,
                false,
            )?;
        }
    }

    // Totals panel.
    let panel_height = 30 + 25 * report.totals.len() as i32;
    imgproc::rectangle(
        &mut output,
        core::Rect::new(5, 5, 260, panel_height),
        core::Scalar::new(40.0, 40.0, 40.0, 0.0),
        -1,
        imgproc::LINE_8,
        0,
    )?;
    imgproc::put_text(
        &mut output,
        &format!("Time: {}", format_timestamp(timestamp_ms)),
        core::Point::new(15, 27),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.6,
        core::Scalar::new(255.0, 255.0, 255.0, 0.0),
        1,
        imgproc::LINE_8,
        false,
    )?;
    for (gi, total) in report.totals.iter().enumerate() {
        let line = format!(
            "Strand {}: {} ({} repaired)",
            gi + 1,
            total,
            report.repaired_totals[gi]
        );
        imgproc::put_text(
            &mut output,
            &line,
            core::Point::new(15, 52 + 25 * gi as i32),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.55,
            colors[gi % colors.len()],
            1,
            imgproc::LINE_8,
            false,
        )?;
    }

    Ok(output)
}

/// Millisecond position rendered as HH:MM:SS.
pub fn format_timestamp(timestamp_ms: f64) -> String {
    let total_secs = (timestamp_ms / 1000.0) as u64;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_formatting() {
        assert_eq!(format_timestamp(0.0), "00:00:00");
        assert_eq!(format_timestamp(61_500.0), "00:01:01");
        assert_eq!(format_timestamp(3_725_000.0), "01:02:05");
    }
}
