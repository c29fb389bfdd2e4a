//! Stall report rendering
//!
//! Both output forms share one traversal over the frame arena: it
//! assigns each frame a reported depth, collapses single-child chains
//! that dominate their parent's duration, and carries the per-frame
//! skip and filter counts. The TTY form is indented text for a human;
//! the machine form is one self-contained line per stall.
//!
//! The machine grammar is fixed:
//!
//! ```text
//! {"start_time":<f>,"duration":<f>,"calls":[{call},...][,"skipped":<u>],
//!  "switches":<u>,"samples":<u>,"stalls":<u>}\n
//! ```
//!
//! with each `call` as
//! `{"path":"<s>","line":<i>,"class":"<s>","method":"<s>","duration":<f>,"offset":<f>,"nesting":<u>,"skipped":<u>,"filtered":<u>}`.
//! Durations use 6 fractional digits; start_time and offset use 3. The
//! emitter is assembled by hand to keep the fixed-point representation
//! bit-exact; [`MachineReport`] is the serde model of the same line for
//! consumers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::frame_arena::{CallFrame, FrameArena, FrameRef};

/// A frame whose duration exceeds this share of its parent's duration,
/// when it is the parent's only child, is collapsed into the parent.
pub const SKIP_THRESHOLD: f64 = 0.98;

/// A frame whose duration exceeds this share of the interval is flagged
/// as expensive in the TTY output.
pub const EXPENSIVE_PROPORTION: f64 = 0.2;

const HIGHLIGHT: &str = "\x1b[31m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// One finished stall interval, borrowed from the capture engine for
/// rendering.
#[derive(Debug)]
pub struct StallReport<'a> {
    pub frames: &'a FrameArena,
    /// Interval start: the task-switch that began the interval.
    pub start_time: Timestamp,
    /// Interval duration in seconds.
    pub duration: f64,
    /// Minimum relative depth seen during the interval; never positive.
    pub nesting_minimum: i32,
    pub switches: usize,
    pub samples: usize,
    pub stalls: usize,
}

struct RenderedCall<'a> {
    depth: usize,
    frame: &'a CallFrame,
    /// Length of the skip run that ended immediately before this call.
    skipped: usize,
}

struct Traversal<'a> {
    calls: Vec<RenderedCall<'a>>,
    /// Skip run still open when the frames ran out.
    trailing_skipped: usize,
    trailing_depth: usize,
    total_skipped: usize,
}

impl<'a> StallReport<'a> {
    /// Render in the form matching the sink: human text on a TTY,
    /// machine line otherwise.
    pub fn render(&self, tty: bool) -> String {
        if tty {
            self.render_tty()
        } else {
            self.render_machine()
        }
    }

    fn traverse(&self) -> Traversal<'a> {
        let mut depths: HashMap<FrameRef, usize> = HashMap::new();
        let mut calls = Vec::new();
        let mut run = 0;
        let mut run_depth = 0;
        let mut total_skipped = 0;

        for (frame_ref, frame) in self.frames.iter() {
            if let Some(parent_ref) = frame.parent {
                let parent = self.frames.get(parent_ref);
                if parent.children == 1 && frame.duration > parent.duration * SKIP_THRESHOLD {
                    // Single-child collapse: the frame reports at its
                    // parent's depth and is not emitted itself.
                    let depth = depths.get(&parent_ref).copied().unwrap_or(0);
                    depths.insert(frame_ref, depth);
                    run += 1;
                    run_depth = depth;
                    total_skipped += 1;
                    continue;
                }
            }

            let depth = match frame.parent {
                Some(parent_ref) => depths.get(&parent_ref).copied().unwrap_or(0) + 1,
                None => (frame.nesting - self.nesting_minimum).max(0) as usize,
            };
            depths.insert(frame_ref, depth);
            calls.push(RenderedCall {
                depth,
                frame,
                skipped: run,
            });
            run = 0;
        }

        Traversal {
            calls,
            trailing_skipped: run,
            trailing_depth: run_depth,
            total_skipped,
        }
    }

    /// Human-readable report: one line per surviving frame, indented by
    /// reported depth, with skip and filter markers dimmed and expensive
    /// frames highlighted.
    pub fn render_tty(&self) -> String {
        let traversal = self.traverse();
        let mut out = String::new();

        out.push_str(&format!("Fiber stalled for {:.3} seconds\n", self.duration));

        for call in &traversal.calls {
            if call.skipped > 0 {
                push_skip_marker(&mut out, call.depth, call.skipped);
            }

            let frame = call.frame;
            let offset = frame.enter_time.seconds_since(self.start_time);
            let expensive = frame.duration > self.duration * EXPENSIVE_PROPORTION;

            for _ in 0..call.depth {
                out.push('\t');
            }
            if expensive {
                out.push_str(HIGHLIGHT);
            }
            out.push_str(&format!(
                "{}:{} in {} '{}#{}' ({:.6}s, T+{:.3}s)",
                frame.path,
                frame.line,
                frame.kind.name(),
                frame.class,
                frame.method,
                frame.duration,
                offset
            ));
            if expensive {
                out.push_str(RESET);
            }
            out.push('\n');

            if frame.filtered > 0 {
                for _ in 0..call.depth + 1 {
                    out.push('\t');
                }
                out.push_str(&format!(
                    "{}... filtered {} direct calls ...{}\n",
                    DIM, frame.filtered, RESET
                ));
            }
        }

        if traversal.trailing_skipped > 0 {
            push_skip_marker(&mut out, traversal.trailing_depth, traversal.trailing_skipped);
        }

        out
    }

    /// Machine report: one newline-terminated line, independently
    /// parseable.
    pub fn render_machine(&self) -> String {
        let traversal = self.traverse();
        let mut out = String::new();

        out.push_str(&format!(
            "{{\"start_time\":{:.3},\"duration\":{:.6},\"calls\":[",
            self.start_time.as_secs_f64(),
            self.duration
        ));

        for (index, call) in traversal.calls.iter().enumerate() {
            if index > 0 {
                out.push(',');
            }
            let frame = call.frame;
            let offset = frame.enter_time.seconds_since(self.start_time);

            out.push_str("{\"path\":");
            push_json_string(&mut out, &frame.path);
            out.push_str(&format!(",\"line\":{},\"class\":", frame.line));
            push_json_string(&mut out, &frame.class);
            out.push_str(",\"method\":");
            push_json_string(&mut out, &frame.method);
            out.push_str(&format!(
                ",\"duration\":{:.6},\"offset\":{:.3},\"nesting\":{},\"skipped\":{},\"filtered\":{}}}",
                frame.duration, offset, call.depth, call.skipped, frame.filtered
            ));
        }

        out.push(']');
        if traversal.total_skipped > 0 {
            out.push_str(&format!(",\"skipped\":{}", traversal.total_skipped));
        }
        out.push_str(&format!(
            ",\"switches\":{},\"samples\":{},\"stalls\":{}}}\n",
            self.switches, self.samples, self.stalls
        ));

        out
    }
}

fn push_skip_marker(out: &mut String, depth: usize, skipped: usize) {
    for _ in 0..depth {
        out.push('\t');
    }
    out.push_str(&format!(
        "{}... skipped {} nested calls ...{}\n",
        DIM, skipped, RESET
    ));
}

fn push_json_string(out: &mut String, value: &str) {
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ch if (ch as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", ch as u32));
            }
            ch => out.push(ch),
        }
    }
    out.push('"');
}

/// One machine-format report line, as consumed by the offline
/// aggregator and by tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineReport {
    pub start_time: f64,
    pub duration: f64,
    pub calls: Vec<MachineCall>,
    /// Total calls collapsed out of the report; absent when zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<u64>,
    pub switches: u64,
    pub samples: u64,
    pub stalls: u64,
}

/// One call record within a machine-format report line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineCall {
    pub path: String,
    pub line: u32,
    pub class: String,
    pub method: String,
    pub duration: f64,
    pub offset: f64,
    pub nesting: u64,
    pub skipped: u64,
    pub filtered: u64,
}
