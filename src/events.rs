//! Classification of host runtime events
//!
//! The host delivers a flat stream of tagged events; the engine only
//! cares about three shapes: call-like (a frame opens), return-like (a
//! frame closes) and task-switch (an interval boundary). Everything else
//! is "other" and is recorded as a pseudo-frame when call tracking is
//! enabled.

/// Tag of a host event, mirroring the hook masks the engine subscribes
/// to. Each kind has a fixed human name used only for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventKind {
    /// Method entry.
    Call,
    /// Foreign-function (C) entry.
    CCall,
    /// Block entry.
    BlockCall,
    /// Method exit.
    Return,
    /// Foreign-function (C) exit.
    CReturn,
    /// Block exit.
    BlockReturn,
    /// Beginning of a garbage-collection phase.
    GcStart,
    /// End of the sweep phase of garbage collection.
    GcEndSweep,
    /// Line event; recorded as a pseudo-frame if tracking is enabled.
    Line,
    #[default]
    Unknown,
}

impl EventKind {
    /// A frame opens: method, block and C-function entries, and the
    /// beginning of a GC phase.
    pub fn is_call_like(self) -> bool {
        matches!(
            self,
            EventKind::Call | EventKind::CCall | EventKind::BlockCall | EventKind::GcStart
        )
    }

    /// A frame closes: the exits corresponding to [`is_call_like`].
    ///
    /// [`is_call_like`]: EventKind::is_call_like
    pub fn is_return_like(self) -> bool {
        matches!(
            self,
            EventKind::Return | EventKind::CReturn | EventKind::BlockReturn | EventKind::GcEndSweep
        )
    }

    /// Reporting name of this kind.
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Call => "call",
            EventKind::CCall => "c-call",
            EventKind::BlockCall => "b-call",
            EventKind::Return => "return",
            EventKind::CReturn => "c-return",
            EventKind::BlockReturn => "b-return",
            EventKind::GcStart => "gc-start",
            EventKind::GcEndSweep => "gc-end-sweep",
            EventKind::Line => "line",
            EventKind::Unknown => "unknown",
        }
    }

    fn is_gc(self) -> bool {
        matches!(self, EventKind::GcStart | EventKind::GcEndSweep)
    }
}

/// Source path recorded for GC-phase frames when the host supplies none.
pub const GC_PATH_MARKER: &str = "<internal:gc>";

/// One event as delivered by the host's hook callback.
///
/// String fields borrow from the host and may be invalidated as soon as
/// the callback returns; the engine copies whatever it keeps.
#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    /// Cooperative yield between tasks. `blocking` is the host's
    /// `task.is_blocking()` predicate for the task now being resumed.
    Switch { blocking: bool },
    /// Call, return, GC-phase or line event attributed to a source
    /// location.
    Frame {
        kind: EventKind,
        method: &'a str,
        class: &'a str,
        path: &'a str,
        line: u32,
    },
}

impl<'a> Event<'a> {
    /// The path to record for a frame event, substituting the internal
    /// GC marker when a GC-phase event carries no source path.
    pub fn effective_path(kind: EventKind, path: &str) -> &str {
        if path.is_empty() && kind.is_gc() {
            GC_PATH_MARKER
        } else {
            path
        }
    }
}
