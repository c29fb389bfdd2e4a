//! Per-thread stall capture engine
//!
//! A `Capture` observes one OS thread's cooperative scheduler through
//! host event hooks. Between two task-switches it accumulates a tree of
//! call frames in the frame arena; at the next switch it finalizes the
//! interval, decides whether it was a stall, renders a report if so, and
//! resets for the next interval.
//!
//! The state machine has three states. Idle: no hooks installed.
//! Running-Paused: the switch hook is installed but the current interval
//! is not being captured (sampling declined it, the current task is
//! allowed to block, or a frame allocation failed). Running-Capturing:
//! call/return/GC hooks are installed and frames are being recorded.
//! `stop` from either running state discards in-flight interval state
//! without rendering.
//!
//! All mutation happens synchronously inside `dispatch`; nothing here
//! raises out of an event callback.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::clock::{Clock, MonotonicClock, Timestamp};
use crate::config::{defaults, CaptureConfig};
use crate::events::{Event, EventKind};
use crate::fork::{self, ArmedToken};
use crate::frame_arena::{ArenaError, FrameArena, FrameRef};
use crate::hooks::{HookSet, HostHooks};
use crate::output::Output;
use crate::report::StallReport;

/// Stall detector for one OS thread's cooperative scheduler.
pub struct Capture {
    config: CaptureConfig,
    output: Output,
    clock: Box<dyn Clock>,
    hooks: Box<dyn HostHooks>,
    rng: SmallRng,

    running: bool,
    capturing: bool,
    calls_hooked: bool,

    /// When `start` was called.
    start_time: Timestamp,
    /// The task-switch that began the current interval.
    switch_time: Timestamp,

    nesting: i32,
    nesting_minimum: i32,
    current: Option<FrameRef>,
    frames: FrameArena,

    switches: usize,
    samples: usize,
    stalls: usize,
    dropped_intervals: usize,

    armed: ArmedToken,
    sink_error_logged: bool,
}

impl Capture {
    /// A capture with the monotonic wall clock. The capture is idle
    /// until [`start`](Capture::start).
    pub fn new(config: CaptureConfig, output: Output, hooks: Box<dyn HostHooks>) -> Self {
        Self::with_clock(config, output, hooks, Box::new(MonotonicClock::new()))
    }

    /// A capture reading time from the given clock. Used with
    /// [`ManualClock`](crate::clock::ManualClock) for deterministic
    /// replay.
    pub fn with_clock(
        config: CaptureConfig,
        output: Output,
        hooks: Box<dyn HostHooks>,
        clock: Box<dyn Clock>,
    ) -> Self {
        let config = config.sanitized();
        let rng = match config.sample_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Capture {
            config,
            output,
            clock,
            hooks,
            rng,
            running: false,
            capturing: false,
            calls_hooked: false,
            start_time: Timestamp::ZERO,
            switch_time: Timestamp::ZERO,
            nesting: 0,
            nesting_minimum: 0,
            current: None,
            frames: FrameArena::new(),
            switches: 0,
            samples: 0,
            stalls: 0,
            dropped_intervals: 0,
            armed: ArmedToken::new(),
            sink_error_logged: false,
        }
    }

    /// The process-default capture: `None` unless `FIBER_PROFILER_CAPTURE`
    /// is `true`, otherwise a capture configured from the environment
    /// writing to stderr.
    pub fn from_env(hooks: Box<dyn HostHooks>) -> Option<Self> {
        if !defaults().capture_enabled {
            return None;
        }
        Some(Self::new(CaptureConfig::default(), Output::stderr(), hooks))
    }

    /// Install hooks on the current OS thread and begin observing.
    /// Returns `false` without side effects when already running.
    pub fn start(&mut self) -> bool {
        self.sync_fork_state();
        if self.running {
            return false;
        }

        self.reset_interval();
        self.start_time = self.clock.now();
        self.switch_time = self.start_time;
        self.running = true;
        self.capturing = false;

        self.hooks.install(HookSet::Switch);
        self.armed.arm();
        fork::set_active(self.armed.clone());

        debug!(
            stall_threshold = self.config.stall_threshold,
            sample_rate = self.config.sample_rate,
            "capture started"
        );
        true
    }

    /// Uninstall hooks and discard any in-flight interval without
    /// rendering. Returns `false` when not running; idempotent after the
    /// first call. Tolerates hooks that are already gone, as after a
    /// process fork.
    pub fn stop(&mut self) -> bool {
        self.sync_fork_state();
        if !self.running {
            return false;
        }

        self.uninstall_call_hooks();
        self.hooks.uninstall(HookSet::Switch);
        self.armed.disarm();
        fork::clear_active(&self.armed);

        self.running = false;
        self.capturing = false;
        self.reset_interval();

        debug!("capture stopped");
        true
    }

    /// Feed one host event to the engine. Events arriving while idle are
    /// ignored.
    pub fn dispatch(&mut self, event: Event<'_>) {
        self.sync_fork_state();
        if !self.running {
            return;
        }

        match event {
            Event::Switch { blocking } => self.on_switch(blocking),
            Event::Frame {
                kind,
                method,
                class,
                path,
                line,
            } => {
                if !self.capturing || !self.config.track_calls {
                    return;
                }
                if kind.is_call_like() {
                    self.on_call(kind, method, class, path, line);
                } else if kind.is_return_like() {
                    self.on_return(kind, method, class, path, line);
                } else {
                    self.on_other(kind, method, class, path, line);
                }
            }
        }
    }

    fn on_switch(&mut self, blocking: bool) {
        self.switches += 1;
        let now = self.clock.now();

        if self.capturing {
            let duration = now.seconds_since(self.switch_time);

            // Pause before doing anything that could itself generate
            // events, such as writing the report.
            self.capturing = false;
            self.uninstall_call_hooks();

            self.finalize_open_frames(now);

            if duration > self.config.stall_threshold {
                self.stalls += 1;
                self.emit_report(duration);
            }

            self.reset_interval();
        }

        // Sampling is re-decided for every interval. Tasks the host has
        // marked as allowed to block are excluded from stall accounting.
        if blocking {
            return;
        }
        if self.accept_sample() {
            self.switch_time = now;
            self.capturing = true;
            self.samples += 1;
            self.install_call_hooks();
        }
    }

    fn accept_sample(&mut self) -> bool {
        self.config.sample_rate >= 1.0 || self.rng.gen::<f64>() < self.config.sample_rate
    }

    fn on_call(&mut self, kind: EventKind, method: &str, class: &str, path: &str, line: u32) {
        let now = self.clock.now();
        let parent = self.current;

        let frame_ref = match self.frames.push() {
            Ok(frame_ref) => frame_ref,
            Err(error) => {
                self.abort_interval(error);
                return;
            }
        };

        let frame = self.frames.get_mut(frame_ref);
        frame.kind = kind;
        frame.method = method.to_owned();
        frame.class = class.to_owned();
        frame.path = Event::effective_path(kind, path).to_owned();
        frame.line = line;
        frame.enter_time = now;
        frame.nesting = self.nesting;
        frame.parent = parent;

        if let Some(parent_ref) = parent {
            self.frames.get_mut(parent_ref).children += 1;
        }

        self.current = Some(frame_ref);
        self.nesting += 1;
    }

    fn on_return(&mut self, kind: EventKind, method: &str, class: &str, path: &str, line: u32) {
        let now = self.clock.now();

        match self.current {
            Some(frame_ref) => {
                let frame = self.frames.get_mut(frame_ref);
                frame.duration = now.seconds_since(frame.enter_time);
                self.current = frame.parent;
                self.nesting -= 1;
                self.nesting_minimum = self.nesting_minimum.min(self.nesting);
                self.filter_tail(frame_ref);
            }
            None => {
                // A return for a frame that was already open when capture
                // began. Pretend the call started at the previous frame's
                // entry, or at the interval start when the arena is empty.
                let enter_time = self
                    .frames
                    .last()
                    .map(|frame| frame.enter_time)
                    .unwrap_or(self.switch_time);

                let frame_ref = match self.frames.push() {
                    Ok(frame_ref) => frame_ref,
                    Err(error) => {
                        self.abort_interval(error);
                        return;
                    }
                };

                // The frame belongs one level shallower than anything
                // recorded so far, so take the depth after the decrement.
                self.nesting -= 1;
                self.nesting_minimum = self.nesting_minimum.min(self.nesting);

                let frame = self.frames.get_mut(frame_ref);
                frame.kind = kind;
                frame.method = method.to_owned();
                frame.class = class.to_owned();
                frame.path = Event::effective_path(kind, path).to_owned();
                frame.line = line;
                frame.enter_time = enter_time;
                frame.duration = now.seconds_since(enter_time);
                frame.nesting = self.nesting;
                frame.parent = None;
            }
        }
    }

    /// Line and other untracked events become pseudo-frames at the
    /// current depth; they open nothing and never affect nesting.
    fn on_other(&mut self, kind: EventKind, method: &str, class: &str, path: &str, line: u32) {
        let enter_time = self
            .frames
            .last()
            .map(|frame| frame.enter_time)
            .unwrap_or(self.switch_time);

        let frame_ref = match self.frames.push() {
            Ok(frame_ref) => frame_ref,
            Err(error) => {
                self.abort_interval(error);
                return;
            }
        };

        let frame = self.frames.get_mut(frame_ref);
        frame.kind = kind;
        frame.method = method.to_owned();
        frame.class = class.to_owned();
        frame.path = path.to_owned();
        frame.line = line;
        frame.enter_time = enter_time;
        frame.nesting = self.nesting;
        frame.parent = None;
    }

    /// End-of-frame filter: a call-like frame that is still the arena
    /// tail and ran shorter than the filter threshold is removed, with
    /// the removal accounted on its parent. Return-like frames are never
    /// filtered.
    fn filter_tail(&mut self, frame_ref: FrameRef) {
        if self.frames.last_ref() != Some(frame_ref) {
            return;
        }
        let frame = self.frames.get(frame_ref);
        if !frame.kind.is_call_like() || frame.duration >= self.config.filter_threshold {
            return;
        }

        let parent = frame.parent;
        if let Some(parent_ref) = parent {
            let parent_frame = self.frames.get_mut(parent_ref);
            parent_frame.children = parent_frame.children.saturating_sub(1);
            parent_frame.filtered += 1;
        }

        // Clear the back-reference before the frame is destroyed.
        self.frames.get_mut(frame_ref).parent = None;
        self.frames.pop();
    }

    /// Close every frame still open at the interval boundary, innermost
    /// first so the filter sees each candidate while it is the tail.
    fn finalize_open_frames(&mut self, now: Timestamp) {
        let mut open = self.current.take();
        while let Some(frame_ref) = open {
            let frame = self.frames.get_mut(frame_ref);
            frame.duration = now.seconds_since(frame.enter_time);
            let parent = frame.parent;
            self.filter_tail(frame_ref);
            open = parent;
        }
    }

    fn emit_report(&mut self, duration: f64) {
        let text = {
            let report = StallReport {
                frames: &self.frames,
                start_time: self.switch_time,
                duration,
                nesting_minimum: self.nesting_minimum,
                switches: self.switches,
                samples: self.samples,
                stalls: self.stalls,
            };
            report.render(self.output.is_tty())
        };

        if let Err(error) = self.output.write_report(text.as_bytes()) {
            if !self.sink_error_logged {
                warn!(%error, "stall report write failed; further failures will not be logged");
                self.sink_error_logged = true;
            }
        }
    }

    fn abort_interval(&mut self, error: ArenaError) {
        self.dropped_intervals += 1;
        self.capturing = false;
        self.uninstall_call_hooks();
        self.reset_interval();
        debug!(%error, "interval dropped after frame allocation failure");
    }

    fn reset_interval(&mut self) {
        self.frames.truncate();
        self.nesting = 0;
        self.nesting_minimum = 0;
        self.current = None;
    }

    fn install_call_hooks(&mut self) {
        if !self.config.track_calls || self.calls_hooked {
            return;
        }
        // Two independent subscriptions: some hosts refuse to register
        // internal GC hooks together with user-space call hooks.
        self.hooks.install(HookSet::Calls);
        self.hooks.install(HookSet::Gc);
        self.calls_hooked = true;
    }

    fn uninstall_call_hooks(&mut self) {
        if !self.calls_hooked {
            return;
        }
        self.hooks.uninstall(HookSet::Calls);
        self.hooks.uninstall(HookSet::Gc);
        self.calls_hooked = false;
    }

    /// A fork observer disarms the inherited capture in the child; the
    /// hooks it knew about belong to the parent's bookkeeping. Observe
    /// that teardown lazily and drop straight to idle without touching
    /// the hooks.
    fn sync_fork_state(&mut self) {
        if self.running && !self.armed.is_armed() {
            self.running = false;
            self.capturing = false;
            self.calls_hooked = false;
            self.reset_interval();
        }
    }

    /// Intervals observed since construction.
    pub fn switches(&self) -> usize {
        self.switches
    }

    /// Intervals accepted by the sampler.
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Intervals that exceeded the stall threshold and were reported.
    pub fn stalls(&self) -> usize {
        self.stalls
    }

    /// Intervals discarded after a frame allocation failure.
    pub fn dropped_intervals(&self) -> usize {
        self.dropped_intervals
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn capturing(&self) -> bool {
        self.capturing
    }

    pub fn stall_threshold(&self) -> f64 {
        self.config.stall_threshold
    }

    pub fn filter_threshold(&self) -> f64 {
        self.config.filter_threshold
    }

    pub fn track_calls(&self) -> bool {
        self.config.track_calls
    }

    pub fn sample_rate(&self) -> f64 {
        self.config.sample_rate
    }

    /// The frame arena for the in-flight interval. Empty between
    /// intervals.
    pub fn frames(&self) -> &FrameArena {
        &self.frames
    }

    /// Bytes of frame storage currently allocated, for hosts that
    /// account for profiler memory.
    pub fn memory_size(&self) -> usize {
        self.frames.memory_size()
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        if self.running {
            self.stop();
        }
    }
}
