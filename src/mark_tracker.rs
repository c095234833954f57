// src/mark_tracker.rs
//
// Temporal association of detected marks across frames. Each strand group
// keeps its own id space; within a group, detections are matched to
// existing tracks by greedy nearest-centroid assignment. Ids are never
// reused, so the counter can key its examined set on (group, id).

use crate::geometry::distance;
use crate::types::{Mark, TrackerConfig};
use anyhow::{bail, Result};
use std::collections::BTreeMap;
use tracing::debug;

/// A mark being followed across frames.
#[derive(Debug, Clone, Copy)]
pub struct Track {
    pub mark: Mark,
    /// Consecutive frames without a matching detection.
    pub frames_since_seen: u32,
}

pub struct MarkTracker {
    border_y: Option<f32>,
    upward: bool,
    max_disappear: u32,
    /// Next id to assign, per group. Monotone, never recycled.
    next_ids: Vec<u32>,
    /// Live tracks per group, keyed by id. BTreeMap keeps iteration (and
    /// therefore matching and counting) deterministic.
    groups: Vec<BTreeMap<u32, Track>>,
}

impl MarkTracker {
    pub fn new(
        n_groups: usize,
        border_y: Option<f32>,
        upward: bool,
        config: &TrackerConfig,
    ) -> Result<Self> {
        if n_groups == 0 {
            bail!("tracker needs at least one strand group");
        }
        if config.max_disappear == 0 {
            bail!("tracker.max_disappear must be at least 1");
        }
        Ok(Self {
            border_y,
            upward,
            max_disappear: config.max_disappear,
            next_ids: vec![0; n_groups],
            groups: vec![BTreeMap::new(); n_groups],
        })
    }

    /// Update all groups with this frame's detections and return the live
    /// tracks. `detected` holds one mark list per group, ordered along the
    /// direction of travel by the detector.
    pub fn track(&mut self, detected: &[Vec<Mark>]) -> &[BTreeMap<u32, Track>] {
        let total: usize = detected.iter().map(Vec::len).sum();
        if total == 0 {
            for gi in 0..self.groups.len() {
                self.age_group(gi);
            }
            return &self.groups;
        }
        for gi in 0..self.groups.len() {
            let candidates = detected.get(gi).map(Vec::as_slice).unwrap_or(&[]);
            self.update_group(gi, candidates);
        }
        &self.groups
    }

    pub fn tracks(&self) -> &[BTreeMap<u32, Track>] {
        &self.groups
    }

    /// A new track must start on the approach side of the border, so its
    /// crossing is observed rather than assumed. Without a border every
    /// mark is eligible.
    fn eligible(&self, mark: &Mark) -> bool {
        match self.border_y {
            None => true,
            Some(border) => {
                let cy = mark.centroid().y;
                if self.upward {
                    cy > border
                } else {
                    cy < border
                }
            }
        }
    }

    fn register(&mut self, gi: usize, mark: Mark) {
        let id = self.next_ids[gi];
        self.next_ids[gi] += 1;
        self.groups[gi].insert(
            id,
            Track {
                mark,
                frames_since_seen: 0,
            },
        );
        debug!("Group {} registered track {}", gi, id);
    }

    /// Age every track in the group by one unmatched frame, removing those
    /// past the disappearance tolerance.
    fn age_group(&mut self, gi: usize) {
        let expired: Vec<u32> = self.groups[gi]
            .iter_mut()
            .filter_map(|(id, track)| {
                track.frames_since_seen += 1;
                (track.frames_since_seen > self.max_disappear).then_some(*id)
            })
            .collect();
        for id in expired {
            self.groups[gi].remove(&id);
            debug!("Group {} dropped track {} after disappearance", gi, id);
        }
    }

    fn update_group(&mut self, gi: usize, candidates: &[Mark]) {
        if self.groups[gi].is_empty() {
            for mark in candidates {
                if self.eligible(mark) {
                    self.register(gi, *mark);
                }
            }
            return;
        }
        if candidates.is_empty() {
            self.age_group(gi);
            return;
        }

        let ids: Vec<u32> = self.groups[gi].keys().copied().collect();
        let mut pairs: Vec<(usize, usize, f32)> = Vec::with_capacity(ids.len() * candidates.len());
        for (ti, id) in ids.iter().enumerate() {
            let tracked = self.groups[gi][id].mark.centroid();
            for (ci, candidate) in candidates.iter().enumerate() {
                pairs.push((ti, ci, distance(tracked, candidate.centroid())));
            }
        }
        // Globally ascending by distance; the first claim on a track or a
        // candidate wins.
        pairs.sort_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal));

        let mut track_taken = vec![false; ids.len()];
        let mut candidate_taken = vec![false; candidates.len()];
        for (ti, ci, _) in pairs {
            if track_taken[ti] || candidate_taken[ci] {
                continue;
            }
            track_taken[ti] = true;
            candidate_taken[ci] = true;
            self.groups[gi].insert(
                ids[ti],
                Track {
                    mark: candidates[ci],
                    frames_since_seen: 0,
                },
            );
        }

        for (ti, taken) in track_taken.iter().enumerate() {
            if *taken {
                continue;
            }
            let id = ids[ti];
            let expired = match self.groups[gi].get_mut(&id) {
                Some(track) => {
                    track.frames_since_seen += 1;
                    track.frames_since_seen > self.max_disappear
                }
                None => false,
            };
            if expired {
                self.groups[gi].remove(&id);
                debug!("Group {} dropped track {} after disappearance", gi, id);
            }
        }
        for (ci, taken) in candidate_taken.iter().enumerate() {
            if !*taken && self.eligible(&candidates[ci]) {
                self.register(gi, candidates[ci]);
            }
        }
    }
}
