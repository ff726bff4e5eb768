//! Pointer-drag repositioning of a clip.

use seq_transport::TrackId;

use crate::time;

/// An in-progress drag. Positions are unsnapped until the drag ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Drag {
    track: TrackId,
    start_x: f64,
    baseline: f64,
    raw: f64,
}

/// Where a dragged clip is now, and where it would land if released.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragPreview {
    pub track: TrackId,
    pub raw: f64,
    pub snapped: f64,
}

impl Drag {
    /// `baseline` is the track's position when the pointer went down.
    pub fn begin(track: TrackId, pointer_x: f64, baseline: f64) -> Self {
        Self {
            track,
            start_x: pointer_x,
            baseline,
            raw: baseline,
        }
    }

    pub fn track(&self) -> TrackId {
        self.track
    }

    /// Move the pointer; returns the new raw position, never negative.
    pub fn update(&mut self, pointer_x: f64, zoom: f64) -> f64 {
        let delta = time::pixels_to_seconds(pointer_x - self.start_x, zoom);
        self.raw = (self.baseline + delta).max(0.0);
        self.raw
    }

    pub fn raw(&self) -> f64 {
        self.raw
    }

    pub fn preview(&self, bpm: f64) -> DragPreview {
        DragPreview {
            track: self.track,
            raw: self.raw,
            snapped: time::snap(self.raw, bpm),
        }
    }
}
