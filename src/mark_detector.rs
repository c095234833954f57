// src/mark_detector.rs
//
// Per-frame recognition of the diagonal marks painted on the cable strands.
//
// A mark shows up in the binary mask as an elongated blob; the major axis
// of an ellipse fitted to its contour approximates the painted line. The
// frame pipeline is: preprocess -> fit ellipses -> reject outliers ->
// major axes -> group by strand -> order along travel -> merge fragments
// -> align laterally -> compensate gaps near the border.
//
// The detector is stateless per frame except for two things it establishes
// on the first successfully processed frame and then holds fixed: the
// number of strand groups and each group's mean center X (the lateral
// alignment reference). A frame that cannot reproduce the established
// group count yields Ok(None) and the caller skips it.

use crate::geometry::{distance, mad, mad_band, median, rotate_around, within_band};
use crate::types::{Detection, DetectorConfig, Ellipse, Mark, Point, Provenance};
use anyhow::Result;
use opencv::{
    core::{self, Mat, Point as CvPoint, Size, Vector},
    imgproc,
    prelude::*,
};
use tracing::{debug, info};

/// One mark candidate while it moves through the pipeline: the fitted
/// ellipse plus the derived major-axis segment, slope, and angle.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    ellipse: Ellipse,
    axis_start: Point,
    axis_end: Point,
    slope: f32,
    angle: f32,
    provenance: Provenance,
}

impl Candidate {
    /// Derive the major-axis segment from the ellipse. The painted line
    /// runs along the long axis, 90 degrees off the angle OpenCV reports.
    /// Candidates with a vertical axis (dx = 0) have no defined slope and
    /// are dropped.
    fn from_ellipse(ellipse: Ellipse) -> Option<Self> {
        let axis_angle = if ellipse.angle_deg > 90.0 {
            ellipse.angle_deg - 90.0
        } else {
            ellipse.angle_deg + 90.0
        };
        let half = ellipse.major / 2.0;
        let rad = axis_angle.to_radians();
        let axis_start = Point::new(
            ellipse.center.x + half * rad.cos(),
            ellipse.center.y + half * rad.sin(),
        );
        let axis_end = Point::new(
            ellipse.center.x - half * rad.cos(),
            ellipse.center.y - half * rad.sin(),
        );
        // cos(90 deg) is not exactly zero in f32; a sub-millipixel span
        // still means the axis is vertical and the slope undefined.
        let dx = axis_end.x - axis_start.x;
        if dx.abs() < 1e-3 {
            return None;
        }
        let slope = (axis_start.y - axis_end.y) / dx;
        Some(Self {
            ellipse,
            axis_start,
            axis_end,
            slope,
            angle: slope.atan().to_degrees(),
            provenance: Provenance::Observed,
        })
    }

    fn mark(&self) -> Mark {
        Mark {
            start: self.axis_start,
            end: self.axis_end,
            provenance: self.provenance,
        }
    }
}

pub struct MarkDetector {
    config: DetectorConfig,
    border_y: Option<f32>,
    upward: bool,
    expected_groups: usize,
    /// Per-group mean ellipse-center X, fixed after the first successful
    /// frame. Doubles as the established group count.
    group_mean_center_xs: Vec<f32>,
}

impl MarkDetector {
    pub fn new(
        config: DetectorConfig,
        expected_groups: usize,
        border_y: Option<f32>,
        upward: bool,
    ) -> Self {
        Self {
            config,
            border_y,
            upward,
            expected_groups,
            group_mean_center_xs: Vec::new(),
        }
    }

    /// Recognise the marks in one frame. `Ok(None)` means the frame could
    /// not be processed (no usable blobs, or a group count disagreeing
    /// with the established one) and must be skipped by the caller.
    pub fn detect(&mut self, frame: &Mat) -> Result<Option<Detection>> {
        let mask = self.preprocess(frame)?;
        let ellipses = self.fit_ellipses(&mask)?;
        let size = frame.size()?;
        let image_center = Point::new(
            (size.width as f32 / 2.0).round(),
            (size.height as f32 / 2.0).round(),
        );
        Ok(self.process(ellipses, image_center))
    }

    /// Grayscale, blur, binarize, morphological open: isolates the
    /// mark-like blobs from cable texture and lighting noise.
    fn preprocess(&self, frame: &Mat) -> Result<Mat> {
        let mut gray = Mat::default();
        imgproc::cvt_color(frame, &mut gray, imgproc::COLOR_BGR2GRAY, 0)?;
        let mut blurred = Mat::default();
        imgproc::gaussian_blur(
            &gray,
            &mut blurred,
            Size::new(5, 5),
            0.0,
            0.0,
            core::BORDER_DEFAULT,
        )?;
        let mut binary = Mat::default();
        imgproc::threshold(
            &blurred,
            &mut binary,
            self.config.threshold,
            255.0,
            imgproc::THRESH_BINARY,
        )?;
        let kernel = imgproc::get_structuring_element(
            imgproc::MORPH_RECT,
            Size::new(3, 3),
            CvPoint::new(-1, -1),
        )?;
        let mut opened = Mat::default();
        imgproc::morphology_ex(
            &binary,
            &mut opened,
            imgproc::MORPH_OPEN,
            &kernel,
            CvPoint::new(-1, -1),
            1,
            core::BORDER_CONSTANT,
            core::Scalar::default(),
        )?;
        Ok(opened)
    }

    /// Edge detection, external contours, ellipse fit per contour.
    /// Contours need more than 5 points to be fit-eligible.
    fn fit_ellipses(&self, mask: &Mat) -> Result<Vec<Ellipse>> {
        let mut edges = Mat::default();
        imgproc::canny(mask, &mut edges, 100.0, 100.0, 3, false)?;
        let mut contours = Vector::<Vector<CvPoint>>::new();
        imgproc::find_contours(
            &edges,
            &mut contours,
            imgproc::RETR_EXTERNAL,
            imgproc::CHAIN_APPROX_SIMPLE,
            CvPoint::new(0, 0),
        )?;
        let mut ellipses = Vec::new();
        for contour in contours.iter() {
            if contour.len() <= 5 {
                continue;
            }
            let rect = imgproc::fit_ellipse(&contour)?;
            let size = rect.size;
            let center = rect.center;
            ellipses.push(Ellipse {
                center: Point::new(center.x, center.y),
                minor: size.width.min(size.height),
                major: size.width.max(size.height),
                angle_deg: rect.angle,
            });
        }
        Ok(ellipses)
    }

    /// The geometric part of the pipeline, independent of OpenCV input.
    fn process(&mut self, ellipses: Vec<Ellipse>, image_center: Point) -> Option<Detection> {
        let survivors = self.reject_outliers(ellipses);
        let mut candidates: Vec<Candidate> = survivors
            .into_iter()
            .filter_map(Candidate::from_ellipse)
            .collect();
        candidates.sort_by(|a, b| {
            a.axis_start
                .x
                .partial_cmp(&b.axis_start.x)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let groups = self.group_candidates(candidates);
        if groups.is_empty() {
            debug!("No usable mark groups in frame, skipping");
            return None;
        }
        if !self.group_mean_center_xs.is_empty()
            && groups.len() != self.group_mean_center_xs.len()
        {
            debug!(
                "Group count {} disagrees with established {}, skipping frame",
                groups.len(),
                self.group_mean_center_xs.len()
            );
            return None;
        }
        if self.expected_groups > 0 && groups.len() != self.expected_groups {
            debug!(
                "Group count {} disagrees with configured {}, skipping frame",
                groups.len(),
                self.expected_groups
            );
            return None;
        }

        let groups = self.order_along_travel(groups, image_center);
        let groups: Vec<Vec<Candidate>> = groups
            .into_iter()
            .map(|g| self.merge_fragments(g))
            .collect();
        let mut groups = groups;
        self.align_lateral(&mut groups);
        let groups = self.compensate(groups);

        let mut detection = Detection::default();
        for group in &groups {
            detection.marks.push(group.iter().map(Candidate::mark).collect());
            detection.slopes.push(group.iter().map(|c| c.slope).collect());
            detection.angles.push(group.iter().map(|c| c.angle).collect());
        }
        Some(detection)
    }

    /// Two-pass outlier rejection: a hard area floor first (so specks do
    /// not drag the median down), then a MAD band over areas and over
    /// ellipse angles. A degenerate band rejects nothing.
    fn reject_outliers(&self, ellipses: Vec<Ellipse>) -> Vec<Ellipse> {
        let sized: Vec<Ellipse> = ellipses
            .into_iter()
            .filter(|e| e.area() > self.config.min_area)
            .collect();
        let areas: Vec<f32> = sized.iter().map(Ellipse::area).collect();
        let angles: Vec<f32> = sized.iter().map(|e| e.angle_deg).collect();
        let area_band = mad_band(
            &areas,
            self.config.outlier_lower_factor,
            self.config.outlier_upper_factor,
        );
        let angle_band = mad_band(
            &angles,
            self.config.outlier_lower_factor,
            self.config.outlier_upper_factor,
        );
        let before = sized.len();
        let kept: Vec<Ellipse> = sized
            .into_iter()
            .filter(|e| {
                within_band(e.area(), area_band) && within_band(e.angle_deg, angle_band)
            })
            .collect();
        if kept.len() < before {
            debug!("Outlier rejection dropped {} ellipses", before - kept.len());
        }
        kept
    }

    /// Greedy left-to-right clustering into strand groups. A candidate
    /// joins the most recent group when its major-axis X interval overlaps
    /// any member's interval and its start X sits left of the group's mean
    /// end X; otherwise it opens a new group. Tiny groups are fragments.
    fn group_candidates(&self, sorted: Vec<Candidate>) -> Vec<Vec<Candidate>> {
        let mut groups: Vec<Vec<Candidate>> = Vec::new();
        for cand in sorted {
            let joined = match groups.last_mut() {
                Some(group) => {
                    let mean_end_x =
                        group.iter().map(|c| c.axis_end.x).sum::<f32>() / group.len() as f32;
                    let overlaps = group.iter().any(|member| {
                        x_intervals_overlap(
                            (cand.axis_start.x, cand.axis_end.x),
                            (member.axis_start.x, member.axis_end.x),
                        )
                    });
                    if overlaps && cand.axis_start.x < mean_end_x {
                        group.push(cand);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            };
            if !joined {
                groups.push(vec![cand]);
            }
        }
        groups.retain(|g| g.len() >= self.config.min_group_size);
        groups
    }

    /// Order each group's marks along the direction of travel: rotate the
    /// axis start points about the image center by the group's mean angle,
    /// then sort by the rotated Y (ascending for upward travel, descending
    /// for downward). This decouples the ordering from the raw pixel axes.
    fn order_along_travel(
        &self,
        groups: Vec<Vec<Candidate>>,
        image_center: Point,
    ) -> Vec<Vec<Candidate>> {
        groups
            .into_iter()
            .map(|mut group| {
                let mean_angle =
                    group.iter().map(|c| c.angle).sum::<f32>() / group.len() as f32;
                group.sort_by(|a, b| {
                    let ya = rotate_around(a.axis_start, image_center, mean_angle).y;
                    let yb = rotate_around(b.axis_start, image_center, mean_angle).y;
                    let ord = ya.partial_cmp(&yb).unwrap_or(std::cmp::Ordering::Equal);
                    if self.upward {
                        ord
                    } else {
                        ord.reverse()
                    }
                });
                group
            })
            .collect()
    }

    /// Repair a single physical mark that noise split into two blobs.
    /// Adjacent candidates merge when the slope of the line through their
    /// centers is consistent with the group's slope distribution.
    fn merge_fragments(&self, group: Vec<Candidate>) -> Vec<Candidate> {
        let slopes: Vec<f32> = group.iter().map(|c| c.slope).collect();
        let mut merged = Vec::with_capacity(group.len());
        let mut i = 0;
        while i < group.len() {
            if i + 1 == group.len() {
                merged.push(group[i]);
                break;
            }
            let current = &group[i];
            let next = &group[i + 1];
            let dx = next.ellipse.center.x - current.ellipse.center.x;
            // Vertically stacked centers are distinct marks on the strand.
            if dx == 0.0 {
                merged.push(*current);
                i += 1;
                continue;
            }
            let connecting_slope = (current.ellipse.center.y - next.ellipse.center.y) / dx;
            let mut sample = slopes.clone();
            sample.push(connecting_slope);
            let band = mad_band(
                &sample,
                self.config.merge_slope_factor,
                self.config.merge_slope_factor,
            );
            if within_band(connecting_slope, band) {
                merged.push(combine(current, next));
                i += 2;
            } else {
                merged.push(*current);
                i += 1;
            }
        }
        merged
    }

    /// Slide every mark along its own slope onto the group's common center
    /// X, removing lateral jitter so border comparisons line up frame to
    /// frame. The reference X per group is fixed on the first successful
    /// frame.
    fn align_lateral(&mut self, groups: &mut [Vec<Candidate>]) {
        if self.group_mean_center_xs.is_empty() {
            self.group_mean_center_xs = groups
                .iter()
                .map(|group| {
                    group.iter().map(|c| c.ellipse.center.x).sum::<f32>() / group.len() as f32
                })
                .collect();
            info!(
                "Established {} strand group(s), alignment X: {:?}",
                self.group_mean_center_xs.len(),
                self.group_mean_center_xs
            );
        }
        for (group, &mean_x) in groups.iter_mut().zip(&self.group_mean_center_xs) {
            for cand in group.iter_mut() {
                let cx = cand.ellipse.center.x;
                let cy = cand.ellipse.center.y;
                // Slope is in math convention (y up); the pixel-space line
                // through the center is y = -slope * x + b.
                let b = cy + cand.slope * cx;
                cand.ellipse.center = Point::new(mean_x, -cand.slope * mean_x + b);
                let shift = mean_x - cx;
                let start_x = cand.axis_start.x + shift;
                let end_x = cand.axis_end.x + shift;
                cand.axis_start = Point::new(start_x, -cand.slope * start_x + b);
                cand.axis_end = Point::new(end_x, -cand.slope * end_x + b);
            }
        }
    }

    /// Synthesize marks for statistically abnormal gaps, but only on the
    /// approach side within `compensation_margin` of the border. Past the
    /// border a missing mark no longer affects the count, and repairing
    /// there would risk double counting.
    fn compensate(&self, groups: Vec<Vec<Candidate>>) -> Vec<Vec<Candidate>> {
        let border_y = match self.border_y {
            Some(y) => y,
            None => return groups,
        };
        groups
            .iter()
            .zip(&self.group_mean_center_xs)
            .map(|(group, &mean_x)| self.compensate_group(group, mean_x, border_y))
            .collect()
    }

    fn compensate_group(
        &self,
        group: &[Candidate],
        mean_x: f32,
        border_y: f32,
    ) -> Vec<Candidate> {
        if group.len() < 2 {
            return group.to_vec();
        }
        let gaps: Vec<f32> = group
            .windows(2)
            .map(|pair| (pair[1].ellipse.center.y - pair[0].ellipse.center.y).abs())
            .collect();
        let median_gap = match median(&gaps) {
            Some(m) if m > f32::EPSILON => m,
            _ => return group.to_vec(),
        };
        let upper = median_gap + self.config.gap_factor * mad(&gaps).unwrap_or(0.0);

        let margin = self.config.compensation_margin;
        let first = group.iter().position(|c| {
            if self.upward {
                c.ellipse.center.y > border_y - margin
            } else {
                c.ellipse.center.y < border_y + margin
            }
        });
        // No mark before the border: nothing to repair.
        let first = match first {
            Some(i) => i,
            None => return group.to_vec(),
        };

        let mean_minor =
            group.iter().map(|c| c.ellipse.minor).sum::<f32>() / group.len() as f32;
        let mean_major =
            group.iter().map(|c| c.ellipse.major).sum::<f32>() / group.len() as f32;
        let mean_slope = group.iter().map(|c| c.slope).sum::<f32>() / group.len() as f32;
        let mean_angle = group.iter().map(|c| c.angle).sum::<f32>() / group.len() as f32;

        let mut repaired = group[..first].to_vec();
        for i in first..group.len() - 1 {
            repaired.push(group[i]);
            let gap = (group[i + 1].ellipse.center.y - group[i].ellipse.center.y).abs();
            if gap > upper {
                let missing = (gap / median_gap).round() as i64 - 1;
                if missing > 0 {
                    let spacing = gap / (missing + 1) as f32;
                    debug!(
                        "Gap of {:.1}px (median {:.1}) near the border: inserting {} repaired mark(s)",
                        gap, median_gap, missing
                    );
                    for k in 1..=missing {
                        let y = if self.upward {
                            group[i].ellipse.center.y + spacing * k as f32
                        } else {
                            group[i].ellipse.center.y - spacing * k as f32
                        };
                        repaired.push(synthesize(
                            Point::new(mean_x, y),
                            mean_minor,
                            mean_major,
                            mean_slope,
                            mean_angle,
                        ));
                    }
                }
            }
        }
        repaired.push(group[group.len() - 1]);
        repaired
    }
}

/// Overlap test between two major-axis X intervals (endpoints unordered).
fn x_intervals_overlap(a: (f32, f32), b: (f32, f32)) -> bool {
    let (a_lo, a_hi) = (a.0.min(a.1), a.0.max(a.1));
    let (b_lo, b_hi) = (b.0.min(b.1), b.0.max(b.1));
    a_lo.max(b_lo) < a_hi.min(b_hi)
}

/// Join two fragments into the mark spanning both: keep the endpoint pair
/// with the greater separation and recompute slope and angle from it.
fn combine(a: &Candidate, b: &Candidate) -> Candidate {
    let span_start_end = distance(a.axis_start, b.axis_end);
    let span_end_start = distance(a.axis_end, b.axis_start);
    let (start, end, major) = if span_start_end > span_end_start {
        (a.axis_start, b.axis_end, span_start_end)
    } else {
        (b.axis_start, a.axis_end, span_end_start)
    };
    let dx = end.x - start.x;
    let slope = if dx != 0.0 {
        (start.y - end.y) / dx
    } else {
        a.slope
    };
    let angle = slope.atan().to_degrees();
    Candidate {
        ellipse: Ellipse {
            center: Point::new((start.x + end.x) / 2.0, (start.y + end.y) / 2.0),
            minor: (a.ellipse.minor + b.ellipse.minor) / 2.0,
            major,
            angle_deg: 90.0 - angle,
        },
        axis_start: start,
        axis_end: end,
        slope,
        angle,
        provenance: Provenance::Observed,
    }
}

/// Build a repaired mark at `center` from the group's average geometry.
fn synthesize(center: Point, minor: f32, major: f32, slope: f32, angle: f32) -> Candidate {
    let mut axis_angle = 90.0 - angle;
    axis_angle = if axis_angle > 90.0 {
        axis_angle - 90.0
    } else {
        axis_angle + 90.0
    };
    let rad = axis_angle.to_radians();
    let half = major / 2.0;
    let start = Point::new(center.x + half * rad.cos(), center.y + half * rad.sin());
    let end = Point::new(center.x - half * rad.cos(), center.y - half * rad.sin());
    Candidate {
        ellipse: Ellipse {
            center,
            minor,
            major,
            angle_deg: 90.0 - angle,
        },
        axis_start: start,
        axis_end: end,
        slope,
        angle,
        provenance: Provenance::Repaired,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DetectorConfig;

    const STRAND_ANGLE: f32 = 30.0; // ellipse angle; axis runs at 120 deg

    fn ellipse(x: f32, y: f32) -> Ellipse {
        Ellipse {
            center: Point::new(x, y),
            minor: 6.0,
            major: 30.0,
            angle_deg: STRAND_ANGLE,
        }
    }

    /// A strand of ellipses sharing a center X, one per given Y.
    fn strand(x: f32, ys: &[f32]) -> Vec<Ellipse> {
        ys.iter().map(|&y| ellipse(x, y)).collect()
    }

    fn detector(border_y: Option<f32>, upward: bool) -> MarkDetector {
        MarkDetector::new(DetectorConfig::default(), 0, border_y, upward)
    }

    const IMAGE_CENTER: Point = Point { x: 512.0, y: 512.0 };

    #[test]
    fn major_axis_follows_angle_convention() {
        let cand = Candidate::from_ellipse(ellipse(100.0, 200.0)).unwrap();
        // axis angle 120 deg: start left-below, end right-above the center
        assert!(cand.axis_start.x < 100.0);
        assert!(cand.axis_end.x > 100.0);
        assert!((cand.axis_start.x - (100.0 - 7.5)).abs() < 1e-3);
        assert!((cand.axis_end.x - (100.0 + 7.5)).abs() < 1e-3);
        // slope in math convention is positive for this orientation
        assert!(cand.slope > 0.0);
        assert!((cand.angle - 60.0).abs() < 0.01);
    }

    #[test]
    fn vertical_axis_candidates_are_dropped() {
        // angle 0 -> axis angle 90 -> dx = 0
        let vertical = Ellipse {
            angle_deg: 0.0,
            ..ellipse(100.0, 100.0)
        };
        assert!(Candidate::from_ellipse(vertical).is_none());
    }

    #[test]
    fn area_floor_keeps_median_honest() {
        let det = detector(None, true);
        let mut input = strand(100.0, &[100.0, 120.0, 140.0, 160.0]);
        // Specks well below the floor must not survive.
        input.push(Ellipse {
            minor: 1.0,
            major: 2.0,
            ..ellipse(100.0, 180.0)
        });
        let kept = det.reject_outliers(input);
        assert_eq!(kept.len(), 4);
    }

    #[test]
    fn mad_rejection_drops_misaligned_blob() {
        let det = detector(None, true);
        // Slight natural variation in fitted angles, plus one blob whose
        // orientation is nowhere near the strand's marks.
        let angles = [28.0, 29.0, 30.0, 31.0, 32.0];
        let mut input: Vec<Ellipse> = angles
            .iter()
            .enumerate()
            .map(|(i, &a)| Ellipse {
                angle_deg: a,
                ..ellipse(100.0, 100.0 + 20.0 * i as f32)
            })
            .collect();
        input.push(Ellipse {
            angle_deg: 170.0,
            ..ellipse(100.0, 200.0)
        });
        let kept = det.reject_outliers(input);
        assert_eq!(kept.len(), 5);
        assert!(kept.iter().all(|e| e.angle_deg < 100.0));
    }

    #[test]
    fn grouping_splits_strands_and_discards_fragments() {
        let det = detector(None, true);
        let mut ellipses = strand(100.0, &[100.0, 120.0, 140.0, 160.0, 180.0, 200.0]);
        ellipses.extend(strand(300.0, &[105.0, 125.0, 145.0, 165.0, 185.0, 205.0]));
        // A lone fragment far to the right: too small to be a strand.
        ellipses.extend(strand(500.0, &[150.0]));
        let mut candidates: Vec<Candidate> = ellipses
            .into_iter()
            .filter_map(Candidate::from_ellipse)
            .collect();
        candidates.sort_by(|a, b| a.axis_start.x.partial_cmp(&b.axis_start.x).unwrap());
        let groups = det.group_candidates(candidates);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 6);
        assert_eq!(groups[1].len(), 6);
    }

    #[test]
    fn group_count_change_after_establishment_yields_none() {
        let mut det = detector(None, true);
        let mut two = strand(100.0, &[100.0, 120.0, 140.0, 160.0, 180.0, 200.0]);
        two.extend(strand(300.0, &[100.0, 120.0, 140.0, 160.0, 180.0, 200.0]));
        assert!(det.process(two.clone(), IMAGE_CENTER).is_some());

        let mut three = two.clone();
        three.extend(strand(600.0, &[100.0, 120.0, 140.0, 160.0, 180.0, 200.0]));
        assert!(det.process(three, IMAGE_CENTER).is_none());
        // The established count still works.
        assert!(det.process(two, IMAGE_CENTER).is_some());
    }

    #[test]
    fn configured_group_count_is_enforced_from_the_start() {
        let mut det = MarkDetector::new(DetectorConfig::default(), 2, None, true);
        let one = strand(100.0, &[100.0, 120.0, 140.0, 160.0, 180.0, 200.0]);
        assert!(det.process(one, IMAGE_CENTER).is_none());
    }

    #[test]
    fn empty_frame_yields_none() {
        let mut det = detector(None, true);
        assert!(det.process(Vec::new(), IMAGE_CENTER).is_none());
    }

    #[test]
    fn marks_are_ordered_along_travel() {
        let mut det = detector(None, true);
        let ys = [200.0, 100.0, 180.0, 120.0, 160.0, 140.0];
        let detection = det.process(strand(100.0, &ys), IMAGE_CENTER).unwrap();
        let centroids: Vec<f32> = detection.marks[0]
            .iter()
            .map(|m| m.centroid().y)
            .collect();
        for pair in centroids.windows(2) {
            assert!(pair[0] <= pair[1], "upward travel sorts ascending");
        }

        let mut det_down = detector(None, false);
        let detection = det_down.process(strand(100.0, &ys), IMAGE_CENTER).unwrap();
        let centroids: Vec<f32> = detection.marks[0]
            .iter()
            .map(|m| m.centroid().y)
            .collect();
        for pair in centroids.windows(2) {
            assert!(pair[0] >= pair[1], "downward travel sorts descending");
        }
    }

    #[test]
    fn consistent_fragments_merge_into_one_mark() {
        let det = detector(None, true);
        // Six marks with slope 1; the first two are fragments of one mark
        // (their centers connect at slope 1 as well).
        let fragment = |x: f32, y: f32| Candidate {
            ellipse: Ellipse {
                center: Point::new(x, y),
                minor: 4.0,
                major: 5.66,
                angle_deg: 45.0,
            },
            axis_start: Point::new(x - 2.0, y + 2.0),
            axis_end: Point::new(x + 2.0, y - 2.0),
            slope: 1.0,
            angle: 45.0,
            provenance: Provenance::Observed,
        };
        // The remaining marks sit on the strand axis: their centers connect
        // vertically to their neighbours, so they must not merge.
        let group = vec![
            fragment(0.0, 0.0),
            fragment(4.0, -4.0),
            fragment(0.0, 30.0),
            fragment(0.0, 60.0),
            fragment(0.0, 90.0),
            fragment(0.0, 120.0),
        ];
        let merged = det.merge_fragments(group);
        assert_eq!(merged.len(), 5);
        let joined = &merged[0];
        assert!((distance(joined.axis_start, joined.axis_end) - 128.0_f32.sqrt()).abs() < 1e-3);
        assert_eq!(joined.ellipse.center, Point::new(2.0, -2.0));
        assert!((joined.slope - 1.0).abs() < 1e-5);
    }

    #[test]
    fn trailing_mark_survives_merge_pass() {
        let det = detector(None, true);
        let mark = |y: f32| Candidate::from_ellipse(ellipse(100.0, y)).unwrap();
        let group: Vec<Candidate> = [0.0, 30.0, 60.0].iter().map(|&y| mark(y)).collect();
        let merged = det.merge_fragments(group);
        assert_eq!(merged.len(), 3);
        assert!((merged[2].ellipse.center.y - 60.0).abs() < 1e-3);
    }

    #[test]
    fn lateral_alignment_pins_group_center_x() {
        let mut det = detector(None, true);
        let ys = [100.0, 120.0, 140.0, 160.0, 180.0, 200.0];
        let mut jittered = strand(100.0, &ys);
        jittered[2].center.x = 108.0;
        jittered[4].center.x = 94.0;
        let detection = det.process(jittered, IMAGE_CENTER).unwrap();
        for mark in &detection.marks[0] {
            let cx = (mark.start.x + mark.end.x) / 2.0;
            assert!(
                (cx - det.group_mean_center_xs[0]).abs() < 0.5,
                "mark centered at {cx} after alignment"
            );
        }
    }

    #[test]
    fn gap_compensation_inserts_evenly_spaced_repaired_marks() {
        let det = detector(Some(500.0), true);
        let mean_x = 100.0;
        // Uniform gap 10, one abnormal gap of 41 before the border.
        let ys = [410.0, 420.0, 430.0, 440.0, 481.0, 491.0];
        let group: Vec<Candidate> = ys
            .iter()
            .map(|&y| Candidate::from_ellipse(ellipse(mean_x, y)).unwrap())
            .collect();
        let repaired = det.compensate_group(&group, mean_x, 500.0);

        assert_eq!(repaired.len(), 9, "round(41/10) - 1 = 3 inserted marks");
        let inserted: Vec<&Candidate> = repaired
            .iter()
            .filter(|c| c.provenance == Provenance::Repaired)
            .collect();
        assert_eq!(inserted.len(), 3);
        for (k, cand) in inserted.iter().enumerate() {
            let expected_y = 440.0 + 10.25 * (k + 1) as f32;
            assert!((cand.ellipse.center.y - expected_y).abs() < 1e-3);
            assert!((cand.ellipse.center.x - mean_x).abs() < 1e-3);
        }
        // Observed marks all survive, in order.
        let observed = repaired
            .iter()
            .filter(|c| c.provenance == Provenance::Observed)
            .count();
        assert_eq!(observed, 6);
    }

    #[test]
    fn compensation_only_applies_near_the_border() {
        let det = detector(Some(500.0), true);
        let mean_x = 100.0;
        // Same abnormal gap, but the whole group sits far above the
        // compensation margin (y < border - 100).
        let ys = [110.0, 120.0, 130.0, 140.0, 181.0, 191.0];
        let group: Vec<Candidate> = ys
            .iter()
            .map(|&y| Candidate::from_ellipse(ellipse(mean_x, y)).unwrap())
            .collect();
        let repaired = det.compensate_group(&group, mean_x, 500.0);
        assert_eq!(repaired.len(), 6, "no compensation away from the border");
    }

    #[test]
    fn degenerate_gap_statistics_disable_compensation() {
        let det = detector(Some(500.0), true);
        let group: Vec<Candidate> = [450.0]
            .iter()
            .map(|&y| Candidate::from_ellipse(ellipse(100.0, y)).unwrap())
            .collect();
        assert_eq!(det.compensate_group(&group, 100.0, 500.0).len(), 1);
    }
}
