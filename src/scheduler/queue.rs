//! Frame queue of the point scheduler.
//!
//! Frames never exceed `max_points`. While one-shot playback is active the
//! tail may hold a sentinel frame, a single blanked point whose dispatch ends
//! playback after the last real frame has drained.

use std::collections::VecDeque;

use crate::protocols::easylase::DevicePoint;

/// One device buffer worth of points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    points: Vec<DevicePoint>,
    sentinel: bool,
}

impl Frame {
    /// Creates a regular frame.
    pub fn new(points: Vec<DevicePoint>) -> Self {
        Self {
            points,
            sentinel: false,
        }
    }

    /// Creates the end-of-stream marker: one blanked point at `at`.
    pub fn sentinel(at: DevicePoint) -> Self {
        Self {
            points: vec![at.to_blanked()],
            sentinel: true,
        }
    }

    pub fn points(&self) -> &[DevicePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn is_sentinel(&self) -> bool {
        self.sentinel
    }
}

/// Ordered frames waiting for the device.
///
/// Consumed front to back in one-shot mode and addressed as a ring in repeat
/// mode.
#[derive(Debug, Clone)]
pub struct FrameQueue {
    frames: VecDeque<Frame>,
    max_points: usize,
}

impl FrameQueue {
    /// Creates an empty queue whose frames hold at most `max_points` points.
    pub fn new(max_points: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            max_points: max_points.max(1),
        }
    }

    pub fn max_points(&self) -> usize {
        self.max_points
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Total number of queued points, sentinel included.
    pub fn total_points(&self) -> usize {
        self.frames.iter().map(Frame::len).sum()
    }

    pub fn get(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    pub fn front(&self) -> Option<&Frame> {
        self.frames.front()
    }

    pub fn pop_front(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Last point of the last frame.
    pub fn last_point(&self) -> Option<DevicePoint> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.points.last().copied())
    }

    /// Appends `points`, each emitted `replication` times.
    ///
    /// An under-full last frame is continued rather than left short. Full
    /// frames are flushed as soon as they reach `max_points`.
    pub fn extend_replicated<I>(&mut self, points: I, replication: usize)
    where
        I: IntoIterator<Item = DevicePoint>,
    {
        let continue_last = self
            .frames
            .back()
            .is_some_and(|last| !last.sentinel && last.len() < self.max_points);
        let mut current = if continue_last {
            self.frames.pop_back().map_or_else(Vec::new, |f| f.points)
        } else {
            Vec::with_capacity(self.max_points)
        };

        for point in points {
            for _ in 0..replication.max(1) {
                current.push(point);
                if current.len() == self.max_points {
                    let full = std::mem::replace(&mut current, Vec::with_capacity(self.max_points));
                    self.frames.push_back(Frame::new(full));
                }
            }
        }

        if !current.is_empty() {
            self.frames.push_back(Frame::new(current));
        }
    }

    /// Appends a sentinel at the last queued position.
    pub fn push_sentinel(&mut self) {
        let at = self.last_point().unwrap_or_default();
        self.frames.push_back(Frame::sentinel(at));
    }

    /// Drops a trailing sentinel. Returns whether there was one.
    pub fn remove_sentinel(&mut self) -> bool {
        if self.frames.back().is_some_and(Frame::is_sentinel) {
            self.frames.pop_back();
            true
        } else {
            false
        }
    }

    /// Tops up the frame at `index` from the leading points of the frame
    /// after it in ring order.
    ///
    /// If the following frame is drained completely it is removed and its
    /// former index is returned, so ring positions can be adjusted.
    pub fn rebalance(&mut self, index: usize) -> Option<usize> {
        let len = self.frames.len();
        if len < 2 || index >= len {
            return None;
        }
        let missing = self.max_points.saturating_sub(self.frames[index].len());
        if missing == 0 {
            return None;
        }

        let following = (index + 1) % len;
        let take = missing.min(self.frames[following].len());
        let moved: Vec<DevicePoint> = self.frames[following].points.drain(..take).collect();
        self.frames[index].points.extend(moved);

        if self.frames[following].is_empty() {
            self.frames.remove(following);
            Some(following)
        } else {
            None
        }
    }
}
