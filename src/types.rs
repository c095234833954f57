// src/types.rs

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub video: VideoConfig,
    pub cable: CableConfig,
    pub detector: DetectorConfig,
    pub tracker: TrackerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    pub input: String,
    pub output_dir: String,
    pub save_annotated: bool,
}

/// Physical setup of the cable bundle under inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CableConfig {
    /// Expected number of cable strands. 0 = establish from the first
    /// successfully detected frame.
    pub expected_groups: usize,
    /// Reference border as a fraction of the frame height. Ignored when
    /// `border_y` is set explicitly.
    pub border_ratio: f32,
    /// Absolute border Y in pixels. None = derive from `border_ratio`.
    pub border_y: Option<f32>,
    /// Direction of cable travel: true = marks move up the frame.
    pub upward: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Binary threshold applied after Gaussian blur.
    pub threshold: f64,
    /// Ellipses with area below this floor are dropped before the MAD pass.
    pub min_area: f32,
    /// Lower MAD factor for area/angle outlier rejection.
    pub outlier_lower_factor: f32,
    /// Upper MAD factor for area/angle outlier rejection.
    pub outlier_upper_factor: f32,
    /// Groups with fewer members than this are discarded as fragments.
    pub min_group_size: usize,
    /// MAD factor for the fragment-merge slope consistency test.
    pub merge_slope_factor: f32,
    /// MAD factor above which an inter-mark gap flags missing marks.
    pub gap_factor: f32,
    /// Compensation starts this many pixels before the border, on the
    /// approach side.
    pub compensation_margin: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Consecutive unmatched frames a track survives before removal.
    pub max_disappear: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            input: "input.avi".to_string(),
            output_dir: "output".to_string(),
            save_annotated: true,
        }
    }
}

impl Default for CableConfig {
    fn default() -> Self {
        Self {
            expected_groups: 0,
            border_ratio: 0.35,
            border_y: None,
            upward: true,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold: 90.0,
            min_area: 80.0,
            outlier_lower_factor: 2.0,
            outlier_upper_factor: 3.0,
            min_group_size: 6,
            merge_slope_factor: 2.0,
            gap_factor: 30.0,
            compensation_margin: 100.0,
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self { max_disappear: 5 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            video: VideoConfig::default(),
            cable: CableConfig::default(),
            detector: DetectorConfig::default(),
            tracker: TrackerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

// ============================================================================
// GEOMETRIC PRIMITIVES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Fitted ellipse in OpenCV's convention: `angle_deg` is the rotation of
/// the axis-aligned ellipse, 0..180.
#[derive(Debug, Clone, Copy)]
pub struct Ellipse {
    pub center: Point,
    pub minor: f32,
    pub major: f32,
    pub angle_deg: f32,
}

impl Ellipse {
    pub fn area(&self) -> f32 {
        (self.minor / 2.0) * (self.major / 2.0) * std::f32::consts::PI
    }
}

/// Whether a mark was seen in the frame or synthesized by gap compensation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Observed,
    Repaired,
}

/// One diagonal mark on a cable strand, represented by the segment along
/// the major axis of its fitted ellipse.
#[derive(Debug, Clone, Copy)]
pub struct Mark {
    pub start: Point,
    pub end: Point,
    pub provenance: Provenance,
}

impl Mark {
    pub fn observed(start: Point, end: Point) -> Self {
        Self {
            start,
            end,
            provenance: Provenance::Observed,
        }
    }

    pub fn repaired(start: Point, end: Point) -> Self {
        Self {
            start,
            end,
            provenance: Provenance::Repaired,
        }
    }

    pub fn centroid(&self) -> Point {
        Point::new(
            (self.start.x + self.end.x) / 2.0,
            (self.start.y + self.end.y) / 2.0,
        )
    }

    pub fn is_repaired(&self) -> bool {
        self.provenance == Provenance::Repaired
    }
}

/// Per-frame detector output: one entry per cable strand, marks ordered
/// along the direction of travel.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub marks: Vec<Vec<Mark>>,
    pub slopes: Vec<Vec<f32>>,
    pub angles: Vec<Vec<f32>>,
}

impl Detection {
    pub fn group_count(&self) -> usize {
        self.marks.len()
    }
}
