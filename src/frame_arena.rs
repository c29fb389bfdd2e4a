//! Paged arena of call records
//!
//! The capture engine appends one record per call-like event and stores a
//! back-reference from each frame to its parent. A flat growable vector
//! would invalidate those references on reallocation, so frames live in
//! fixed-capacity pages and are addressed by `(page, slot)` handles that
//! stay valid from push until the frame is popped or the arena is
//! truncated.
//!
//! Pages are sized so one page fits in roughly 32 KiB and holds a
//! power-of-two number of records. Truncation empties the pages but keeps
//! them allocated, so steady-state intervals reuse memory instead of
//! hitting the allocator. Page allocation is the one fallible operation;
//! the engine treats failure as fatal to the current interval only.

use std::collections::TryReserveError;

use thiserror::Error;

use crate::clock::Timestamp;
use crate::events::EventKind;

/// Target allocation size of one page, including its records.
const PAGE_TARGET_BYTES: usize = 32 * 1024;

/// Arena failure; only page allocation can fail.
#[derive(Debug, Error)]
pub enum ArenaError {
    #[error("frame arena page allocation failed: {0}")]
    Allocation(#[from] TryReserveError),
    #[error("frame arena page limit of {0} reached")]
    PageLimit(usize),
}

/// Stable handle to a frame in the arena.
///
/// Valid from the `push` that returned it until that frame is removed by
/// `pop` or `truncate`. Handles are never reused while their frame is
/// live because pushes only ever append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRef {
    page: u32,
    slot: u32,
}

/// One call record. See the capture engine for field semantics; the
/// arena only provides storage and zero-initialization.
#[derive(Debug, Clone, Default)]
pub struct CallFrame {
    /// When the frame was entered.
    pub enter_time: Timestamp,
    /// Seconds spent in the frame, finalized on return or on flush.
    pub duration: f64,
    /// Relative depth at the time of record; negative when returns have
    /// outnumbered calls in this interval.
    pub nesting: i32,
    /// Direct child frames still present after filtering.
    pub children: u32,
    /// Direct child frames elided by the filter.
    pub filtered: u32,
    /// Classified host event that produced this frame.
    pub kind: EventKind,
    /// Method identifier as reported by the host.
    pub method: String,
    /// Defining class of the method as reported by the host.
    pub class: String,
    /// Source path, copied out of the host callback.
    pub path: String,
    /// Source line.
    pub line: u32,
    /// Nearest older call-like frame that was not elided, if any.
    pub parent: Option<FrameRef>,
}

/// Append-mostly store of [`CallFrame`]s with stable handles.
#[derive(Debug, Default)]
pub struct FrameArena {
    /// Pages in order. Pages before `tail` are full, `pages[tail]` is
    /// partially filled, pages after `tail` are empty spares retained by
    /// `truncate`.
    pages: Vec<Vec<CallFrame>>,
    tail: usize,
    len: usize,
    /// Maximum number of pages; `None` grows until the allocator fails.
    page_limit: Option<usize>,
}

impl FrameArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// An arena that refuses to grow past `pages` pages. Pushes beyond
    /// the bound fail with [`ArenaError::PageLimit`], which the capture
    /// engine treats like any other allocation failure.
    pub fn with_page_limit(pages: usize) -> Self {
        FrameArena {
            page_limit: Some(pages),
            ..Self::default()
        }
    }

    /// Number of records a page holds: the largest power of two that
    /// keeps the page within [`PAGE_TARGET_BYTES`].
    fn page_capacity() -> usize {
        let per_page = PAGE_TARGET_BYTES / std::mem::size_of::<CallFrame>();
        if per_page <= 1 {
            return 1;
        }
        if per_page.is_power_of_two() {
            per_page
        } else {
            per_page.next_power_of_two() / 2
        }
    }

    fn allocate_page(&self) -> Result<Vec<CallFrame>, ArenaError> {
        if let Some(limit) = self.page_limit {
            if self.pages.len() >= limit {
                return Err(ArenaError::PageLimit(limit));
            }
        }
        let mut page = Vec::new();
        page.try_reserve_exact(Self::page_capacity())?;
        Ok(page)
    }

    /// Append a zero-initialized frame and return its handle. Never
    /// moves or invalidates previously pushed frames.
    pub fn push(&mut self) -> Result<FrameRef, ArenaError> {
        if self.pages.is_empty() {
            let page = self.allocate_page()?;
            self.pages.push(page);
        } else if self.pages[self.tail].len() == Self::page_capacity() {
            if self.tail + 1 == self.pages.len() {
                // No spare page to reuse; grow.
                let page = self.allocate_page()?;
                self.pages.push(page);
            }
            self.tail += 1;
        }

        let page = &mut self.pages[self.tail];
        let slot = page.len();
        page.push(CallFrame::default());
        self.len += 1;

        Ok(FrameRef {
            page: self.tail as u32,
            slot: slot as u32,
        })
    }

    /// Remove and drop the most recently pushed frame. No-op when empty.
    pub fn pop(&mut self) {
        if self.len == 0 {
            return;
        }
        self.pages[self.tail].pop();
        self.len -= 1;
        if self.pages[self.tail].is_empty() && self.tail > 0 {
            self.tail -= 1;
        }
    }

    /// The most recently pushed frame not yet popped.
    pub fn last(&self) -> Option<&CallFrame> {
        self.last_ref().map(|r| self.get(r))
    }

    /// Handle of the most recently pushed frame not yet popped.
    pub fn last_ref(&self) -> Option<FrameRef> {
        if self.len == 0 {
            return None;
        }
        let slot = self.pages[self.tail].len() - 1;
        Some(FrameRef {
            page: self.tail as u32,
            slot: slot as u32,
        })
    }

    /// Resolve a handle. The handle must refer to a live frame.
    pub fn get(&self, frame: FrameRef) -> &CallFrame {
        &self.pages[frame.page as usize][frame.slot as usize]
    }

    /// Resolve a handle mutably. The handle must refer to a live frame.
    pub fn get_mut(&mut self, frame: FrameRef) -> &mut CallFrame {
        &mut self.pages[frame.page as usize][frame.slot as usize]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drop all frames. Pages stay allocated so the next interval reuses
    /// their memory.
    pub fn truncate(&mut self) {
        for page in &mut self.pages {
            page.clear();
        }
        self.tail = 0;
        self.len = 0;
    }

    /// Iterate frames oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = (FrameRef, &CallFrame)> {
        self.pages.iter().enumerate().flat_map(|(page, frames)| {
            frames.iter().enumerate().map(move |(slot, frame)| {
                (
                    FrameRef {
                        page: page as u32,
                        slot: slot as u32,
                    },
                    frame,
                )
            })
        })
    }

    /// Bytes allocated for page storage, excluding frame-owned strings.
    /// Used by hosts that account for profiler memory.
    pub fn memory_size(&self) -> usize {
        self.pages.len() * Self::page_capacity() * std::mem::size_of::<CallFrame>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_last() {
        let mut arena = FrameArena::new();
        assert!(arena.is_empty());
        assert!(arena.last().is_none());

        let a = arena.push().unwrap();
        arena.get_mut(a).line = 10;
        let b = arena.push().unwrap();
        arena.get_mut(b).line = 20;

        assert_eq!(arena.len(), 2);
        assert_eq!(arena.last().unwrap().line, 20);
        assert_eq!(arena.last_ref(), Some(b));

        arena.pop();
        assert_eq!(arena.last().unwrap().line, 10);
        arena.pop();
        assert!(arena.is_empty());

        // Popping an empty arena is a no-op.
        arena.pop();
        assert!(arena.is_empty());
    }

    #[test]
    fn handles_stay_valid_across_page_growth() {
        let mut arena = FrameArena::new();
        let capacity = FrameArena::page_capacity();

        let first = arena.push().unwrap();
        arena.get_mut(first).method = "first".to_string();
        arena.get_mut(first).line = 1;

        // Force several page allocations.
        for i in 0..capacity * 3 {
            let frame = arena.push().unwrap();
            arena.get_mut(frame).line = i as u32 + 2;
        }

        assert_eq!(arena.get(first).method, "first");
        assert_eq!(arena.get(first).line, 1);
        assert_eq!(arena.len(), capacity * 3 + 1);
    }

    #[test]
    fn pop_crosses_page_boundaries() {
        let mut arena = FrameArena::new();
        let capacity = FrameArena::page_capacity();

        for i in 0..capacity + 1 {
            let frame = arena.push().unwrap();
            arena.get_mut(frame).line = i as u32;
        }
        // Last frame sits alone on the second page.
        arena.pop();
        assert_eq!(arena.len(), capacity);
        assert_eq!(arena.last().unwrap().line, capacity as u32 - 1);

        // And pushing again reuses the spare page.
        let size_before = arena.memory_size();
        arena.push().unwrap();
        assert_eq!(arena.memory_size(), size_before);
    }

    #[test]
    fn truncate_retains_capacity() {
        let mut arena = FrameArena::new();
        let capacity = FrameArena::page_capacity();
        for _ in 0..capacity * 2 {
            arena.push().unwrap();
        }
        let size = arena.memory_size();
        assert!(size > 0);

        arena.truncate();
        assert!(arena.is_empty());
        assert_eq!(arena.last_ref(), None);
        assert_eq!(arena.memory_size(), size);

        // Refill reuses the retained pages without growing.
        for _ in 0..capacity * 2 {
            arena.push().unwrap();
        }
        assert_eq!(arena.memory_size(), size);
    }

    #[test]
    fn page_limit_bounds_growth() {
        let mut arena = FrameArena::with_page_limit(1);
        let capacity = FrameArena::page_capacity();
        for _ in 0..capacity {
            arena.push().unwrap();
        }
        assert!(matches!(arena.push(), Err(ArenaError::PageLimit(1))));
        // A failed push leaves the arena intact.
        assert_eq!(arena.len(), capacity);
        assert!(arena.last_ref().is_some());

        // Truncation makes the existing page reusable under the bound.
        arena.truncate();
        arena.push().unwrap();
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn zero_page_limit_rejects_every_push() {
        let mut arena = FrameArena::with_page_limit(0);
        assert!(arena.push().is_err());
        assert!(arena.is_empty());
        assert_eq!(arena.memory_size(), 0);
    }

    #[test]
    fn iter_is_oldest_to_newest() {
        let mut arena = FrameArena::new();
        let capacity = FrameArena::page_capacity();
        for i in 0..capacity + 5 {
            let frame = arena.push().unwrap();
            arena.get_mut(frame).line = i as u32;
        }
        let lines: Vec<u32> = arena.iter().map(|(_, f)| f.line).collect();
        let expected: Vec<u32> = (0..capacity as u32 + 5).collect();
        assert_eq!(lines, expected);

        // Handles from iteration resolve to the same frames.
        for (frame_ref, frame) in arena.iter() {
            assert_eq!(arena.get(frame_ref).line, frame.line);
        }
    }

    #[test]
    fn page_capacity_is_a_power_of_two() {
        let capacity = FrameArena::page_capacity();
        assert!(capacity.is_power_of_two());
        assert!(capacity * std::mem::size_of::<CallFrame>() <= PAGE_TARGET_BYTES);
    }
}
