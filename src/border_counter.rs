// src/border_counter.rs
//
// Counts each tracked mark exactly once when its centroid crosses the
// reference border. Idempotent per (group, id): re-examining a track that
// already crossed never increments anything, so totals are monotone even
// if a mark jitters back and forth across the line.

use crate::mark_tracker::Track;
use anyhow::{bail, Result};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Borrowed view of the counter state after an update.
pub struct CountReport<'a> {
    /// Crossings per group so far.
    pub totals: &'a [u32],
    /// One snapshot of `totals` per counting event, in event order.
    pub total_history: &'a [Vec<u32>],
    /// Crossings attributed to gap-repaired marks, per group.
    pub repaired_totals: &'a [u32],
    /// One snapshot of `repaired_totals` per counting event.
    pub repaired_history: &'a [Vec<u32>],
}

pub struct BorderCounter {
    border_y: f32,
    upward: bool,
    totals: Vec<u32>,
    total_history: Vec<Vec<u32>>,
    repaired_totals: Vec<u32>,
    repaired_history: Vec<Vec<u32>>,
    /// Tracks already counted or seen past the border, keyed (group, id).
    examined: HashSet<(usize, u32)>,
}

impl BorderCounter {
    pub fn new(n_groups: usize, border_y: f32, upward: bool) -> Result<Self> {
        if n_groups == 0 {
            bail!("counter needs at least one strand group");
        }
        Ok(Self {
            border_y,
            upward,
            totals: vec![0; n_groups],
            total_history: Vec::new(),
            repaired_totals: vec![0; n_groups],
            repaired_history: Vec::new(),
            examined: HashSet::new(),
        })
    }

    /// Examine this frame's tracks and count new crossings. Returns the
    /// cumulative state.
    pub fn count(&mut self, tracked: &[BTreeMap<u32, Track>]) -> CountReport<'_> {
        for (gi, group) in tracked.iter().enumerate().take(self.totals.len()) {
            for (id, track) in group {
                let cy = track.mark.centroid().y;
                let crossed = if self.upward {
                    cy < self.border_y
                } else {
                    cy > self.border_y
                };
                if crossed && self.examined.insert((gi, *id)) {
                    self.totals[gi] += 1;
                    if track.mark.is_repaired() {
                        self.repaired_totals[gi] += 1;
                    }
                    self.total_history.push(self.totals.clone());
                    self.repaired_history.push(self.repaired_totals.clone());
                    debug!(
                        "Group {} mark {} crossed the border (total {}, repaired {})",
                        gi, id, self.totals[gi], self.repaired_totals[gi]
                    );
                }
            }
        }
        self.report()
    }

    pub fn report(&self) -> CountReport<'_> {
        CountReport {
            totals: &self.totals,
            total_history: &self.total_history,
            repaired_totals: &self.repaired_totals,
            repaired_history: &self.repaired_history,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Mark, Point};

    fn track_at(y: f32, repaired: bool) -> Track {
        let start = Point::new(95.0, y + 5.0);
        let end = Point::new(105.0, y - 5.0);
        let mark = if repaired {
            Mark::repaired(start, end)
        } else {
            Mark::observed(start, end)
        };
        Track {
            mark,
            frames_since_seen: 0,
        }
    }

    fn frame(entries: &[(u32, f32, bool)]) -> Vec<BTreeMap<u32, Track>> {
        let mut group = BTreeMap::new();
        for &(id, y, repaired) in entries {
            group.insert(id, track_at(y, repaired));
        }
        vec![group]
    }

    #[test]
    fn upward_crossing_counts_once() {
        let mut counter = BorderCounter::new(1, 500.0, true).unwrap();
        // Approaching from below: not yet counted.
        let report = counter.count(&frame(&[(0, 510.0, false)]));
        assert_eq!(report.totals, &[0]);
        // Crossed on the next frame: counted exactly once.
        let report = counter.count(&frame(&[(0, 495.0, false)]));
        assert_eq!(report.totals, &[1]);
        let report = counter.count(&frame(&[(0, 480.0, false)]));
        assert_eq!(report.totals, &[1]);
        assert_eq!(report.total_history.len(), 1);
    }

    #[test]
    fn jitter_across_the_border_does_not_double_count() {
        let mut counter = BorderCounter::new(1, 500.0, true).unwrap();
        counter.count(&frame(&[(0, 495.0, false)]));
        counter.count(&frame(&[(0, 503.0, false)]));
        let report = counter.count(&frame(&[(0, 494.0, false)]));
        assert_eq!(report.totals, &[1]);
    }

    #[test]
    fn repaired_crossings_are_attributed() {
        let mut counter = BorderCounter::new(1, 500.0, true).unwrap();
        let report = counter.count(&frame(&[(0, 490.0, false), (1, 485.0, true)]));
        assert_eq!(report.totals, &[2]);
        assert_eq!(report.repaired_totals, &[1]);
        assert!(report.repaired_totals[0] <= report.totals[0]);
    }

    #[test]
    fn history_snapshots_one_per_event() {
        let mut counter = BorderCounter::new(2, 500.0, true).unwrap();
        let mut groups = frame(&[(0, 490.0, false)]);
        groups.push(BTreeMap::new());
        counter.count(&groups);
        let mut groups: Vec<BTreeMap<u32, Track>> = vec![BTreeMap::new(), BTreeMap::new()];
        groups[1].insert(0, track_at(480.0, true));
        let report = counter.count(&groups);
        assert_eq!(report.totals, &[1, 1]);
        assert_eq!(report.total_history, &[vec![1, 0], vec![1, 1]]);
        assert_eq!(report.repaired_history, &[vec![0, 0], vec![0, 1]]);
    }

    #[test]
    fn downward_travel_mirrors_the_comparison() {
        let mut counter = BorderCounter::new(1, 500.0, false).unwrap();
        let report = counter.count(&frame(&[(0, 490.0, false)]));
        assert_eq!(report.totals, &[0]);
        let report = counter.count(&frame(&[(0, 512.0, false)]));
        assert_eq!(report.totals, &[1]);
    }

    #[test]
    fn totals_are_monotone_across_frames() {
        let mut counter = BorderCounter::new(1, 500.0, true).unwrap();
        let mut last = 0;
        for y in [520.0, 505.0, 498.0, 502.0, 490.0, 470.0] {
            let report = counter.count(&frame(&[(0, y, false)]));
            assert!(report.totals[0] >= last);
            last = report.totals[0];
        }
        assert_eq!(last, 1);
    }
}
