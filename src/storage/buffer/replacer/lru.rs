use std::collections::VecDeque;
use parking_lot::Mutex;

use crate::common::types::FrameId;

/// LRU (Least Recently Used) page replacement policy.
///
/// The list is ordered by unpin time: the front is the least recently
/// unpinned frame and the next victim. A frame that is already evictable
/// keeps its position on a repeated unpin, so the first unpin time is the
/// LRU key.
pub struct LruReplacer {
    inner: Mutex<LruList>,
}

struct LruList {
    frames: VecDeque<FrameId>,
    capacity: usize,
}

impl LruReplacer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruList {
                frames: VecDeque::with_capacity(capacity),
                capacity,
            }),
        }
    }

    /// Evict the least recently unpinned frame, if any.
    pub fn victim(&self) -> Option<FrameId> {
        self.inner.lock().frames.pop_front()
    }

    /// A frame was pinned: it is no longer an eviction candidate.
    pub fn pin(&self, frame_id: FrameId) {
        let mut list = self.inner.lock();
        if let Some(pos) = list.frames.iter().position(|&id| id == frame_id) {
            list.frames.remove(pos);
        }
    }

    /// A frame's pin count dropped to zero: it becomes an eviction
    /// candidate. No-op if the frame is already present or the list is at
    /// capacity.
    pub fn unpin(&self, frame_id: FrameId) {
        let mut list = self.inner.lock();
        if list.frames.len() < list.capacity && !list.frames.contains(&frame_id) {
            list.frames.push_back(frame_id);
        }
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.inner.lock().frames.len()
    }
}
