//! Shared test harness: a manually driven clock and an inspectable sink
//! wired into a capture, standing in for a host runtime.
#![allow(dead_code)]

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use fiber_profiler::{Capture, CaptureConfig, ManualClock, NullHooks, Output};

/// In-memory sink shared between the capture and the test.
#[derive(Clone, Default)]
pub struct SharedSink(Rc<RefCell<Vec<u8>>>);

impl SharedSink {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).expect("report output is UTF-8")
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A capture driven by a manual clock, writing machine-format reports
/// into a shared buffer.
pub fn scripted_capture(config: CaptureConfig) -> (Capture, ManualClock, SharedSink) {
    let clock = ManualClock::new();
    let sink = SharedSink::default();
    let capture = Capture::with_clock(
        config,
        Output::writer(Box::new(sink.clone()), false),
        Box::new(NullHooks),
        Box::new(clock.clone()),
    );
    (capture, clock, sink)
}

/// Like [`scripted_capture`] with a sink that pretends to be a TTY.
pub fn scripted_tty_capture(config: CaptureConfig) -> (Capture, ManualClock, SharedSink) {
    let clock = ManualClock::new();
    let sink = SharedSink::default();
    let capture = Capture::with_clock(
        config,
        Output::writer(Box::new(sink.clone()), true),
        Box::new(NullHooks),
        Box::new(clock.clone()),
    );
    (capture, clock, sink)
}
