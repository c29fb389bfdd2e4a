//! Fiber Profiler - stall detection for cooperative schedulers
//!
//! Detects tasks that monopolize a single-threaded cooperative scheduler
//! and reports the call stack that caused it. Any interval between two
//! task-switches that runs longer than a configured budget is a stall;
//! while an interval is being captured the engine mirrors the host's
//! call and return events into a tree of frames, and when a stall is
//! detected it renders that tree either for a terminal or as one
//! machine-parseable line.
//!
//! The engine piggybacks on a host runtime's event hooks: the host
//! registers through [`hooks::HostHooks`] and feeds events to
//! [`capture::Capture::dispatch`]. Everything is per-OS-thread; see the
//! module docs for the concurrency model.
//!
//! ```no_run
//! use fiber_profiler::{Capture, CaptureConfig, Event, EventKind, NullHooks, Output};
//!
//! let config = CaptureConfig::with_stall_threshold(0.01);
//! let mut capture = Capture::new(config, Output::stderr(), Box::new(NullHooks));
//! capture.start();
//! // ... the host delivers events ...
//! capture.dispatch(Event::Switch { blocking: false });
//! capture.dispatch(Event::Frame {
//!     kind: EventKind::Call,
//!     method: "read",
//!     class: "IO",
//!     path: "io.rb",
//!     line: 42,
//! });
//! capture.stop();
//! ```

pub mod aggregate;
pub mod capture;
pub mod cli;
pub mod clock;
pub mod config;
pub mod events;
pub mod fork;
pub mod frame_arena;
pub mod hooks;
pub mod output;
pub mod report;

pub use capture::Capture;
pub use clock::{Clock, ManualClock, MonotonicClock, Timestamp};
pub use config::CaptureConfig;
pub use events::{Event, EventKind};
pub use hooks::{HookSet, HostHooks, NullHooks};
pub use output::Output;
pub use report::{MachineCall, MachineReport, StallReport};
