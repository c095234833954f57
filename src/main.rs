// src/main.rs

mod annotate;
mod border_counter;
mod config;
mod geometry;
mod mark_detector;
mod mark_tracker;
mod types;
mod video_processor;

use anyhow::Result;
use border_counter::BorderCounter;
use mark_detector::MarkDetector;
use mark_tracker::MarkTracker;
use std::path::Path;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use types::Config;

fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = Config::load(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!("Cable mark counter starting");
    info!("✓ Configuration loaded from {}", config_path);

    let stats = process_video(&config)?;

    info!("\n📊 Final Report:");
    info!(
        "  Frames: {} total, {} processed, {} skipped",
        stats.total_frames, stats.processed_frames, stats.skipped_frames
    );
    for (gi, total) in stats.totals.iter().enumerate() {
        info!(
            "  Strand {}: {} mark(s) counted, {} of them repaired",
            gi + 1,
            total,
            stats.repaired_totals[gi]
        );
    }
    info!("  Processing Speed: {:.1} FPS", stats.avg_fps);

    Ok(())
}

struct ProcessingStats {
    total_frames: u64,
    processed_frames: u64,
    skipped_frames: u64,
    totals: Vec<u32>,
    repaired_totals: Vec<u32>,
    avg_fps: f64,
}

/// Tracker and counter come up together once the detector has established
/// the number of strand groups.
struct CountingStage {
    tracker: MarkTracker,
    counter: BorderCounter,
}

impl CountingStage {
    fn new(config: &Config, n_groups: usize, border_y: f32) -> Result<Self> {
        info!("✓ Counting {} strand group(s)", n_groups);
        Ok(Self {
            tracker: MarkTracker::new(n_groups, Some(border_y), config.cable.upward, &config.tracker)?,
            counter: BorderCounter::new(n_groups, border_y, config.cable.upward)?,
        })
    }
}

fn process_video(config: &Config) -> Result<ProcessingStats> {
    use std::time::Instant;

    let start_time = Instant::now();

    let video_processor = video_processor::VideoProcessor::new(config.clone());
    let video_path = Path::new(&config.video.input);
    let mut reader = video_processor.open_video(video_path)?;
    let mut writer =
        video_processor.create_writer(video_path, reader.width, reader.height, reader.fps)?;

    let border_y = config
        .cable
        .border_y
        .unwrap_or(reader.height as f32 * config.cable.border_ratio);
    info!(
        "Counting border at y={:.0} ({} travel)",
        border_y,
        if config.cable.upward { "upward" } else { "downward" }
    );

    let mut detector = MarkDetector::new(
        config.detector.clone(),
        config.cable.expected_groups,
        Some(border_y),
        config.cable.upward,
    );
    let mut stage: Option<CountingStage> = None;

    let mut total_frames: u64 = 0;
    let mut processed_frames: u64 = 0;
    let mut skipped_frames: u64 = 0;

    while let Some(frame) = reader.read_frame()? {
        total_frames += 1;
        let timestamp_ms = reader.timestamp_ms();

        match detector.detect(&frame)? {
            Some(detection) => {
                processed_frames += 1;

                if stage.is_none() {
                    stage = Some(CountingStage::new(config, detection.group_count(), border_y)?);
                }
                if let Some(stage) = stage.as_mut() {
                    let tracked = stage.tracker.track(&detection.marks);
                    let report = stage.counter.count(tracked);

                    if let Some(ref mut w) = writer {
                        use opencv::videoio::VideoWriterTrait;
                        let annotated = annotate::draw_annotations(
                            &frame,
                            tracked,
                            &report,
                            border_y,
                            timestamp_ms,
                        )?;
                        w.write(&annotated)?;
                    }
                }
            }
            None => {
                // Unprocessable frame: leave the tracker untouched so a
                // short bad stretch does not expire live tracks.
                skipped_frames += 1;
                debug!("Frame {} skipped", total_frames);
                if let Some(ref mut w) = writer {
                    use opencv::videoio::VideoWriterTrait;
                    w.write(&frame)?;
                }
            }
        }

        if total_frames % 50 == 0 {
            let counted: u32 = stage
                .as_ref()
                .map(|s| s.counter.report().totals.iter().sum())
                .unwrap_or(0);
            info!(
                "Progress: {:.1}% ({}/{}) | Counted: {} | Skipped: {}",
                reader.progress(),
                reader.current_frame,
                reader.total_frames,
                counted,
                skipped_frames
            );
        }
    }

    if stage.is_none() {
        warn!("No frame could be processed; nothing was counted");
    }

    let duration = start_time.elapsed();
    let (totals, repaired_totals) = match stage.as_ref() {
        Some(stage) => {
            let report = stage.counter.report();
            (report.totals.to_vec(), report.repaired_totals.to_vec())
        }
        None => (Vec::new(), Vec::new()),
    };

    Ok(ProcessingStats {
        total_frames,
        processed_frames,
        skipped_frames,
        totals,
        repaired_totals,
        avg_fps: total_frames as f64 / duration.as_secs_f64().max(1e-6),
    })
}
