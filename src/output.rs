//! Report destination
//!
//! A capture writes each report as one complete byte blob, buffered in
//! memory by the renderer first, so a report is indivisible with respect
//! to other writers on the same descriptor. The is-tty flag selects the
//! renderer: human-readable on a terminal, machine format otherwise.

use std::fmt;
use std::io::{self, IsTerminal, Write};

/// Byte sink plus terminal flag.
pub struct Output {
    stream: Box<dyn Write>,
    tty: bool,
}

impl Output {
    /// Standard error with TTY auto-detection. This is the default
    /// destination for reports.
    pub fn stderr() -> Self {
        let tty = io::stderr().is_terminal();
        Output {
            stream: Box::new(io::stderr()),
            tty,
        }
    }

    /// An arbitrary sink. The caller states whether it behaves like a
    /// terminal, which selects the human renderer.
    pub fn writer(stream: Box<dyn Write>, tty: bool) -> Self {
        Output { stream, tty }
    }

    pub fn is_tty(&self) -> bool {
        self.tty
    }

    /// Write one complete report and flush.
    pub fn write_report(&mut self, report: &[u8]) -> io::Result<()> {
        self.stream.write_all(report)?;
        self.stream.flush()
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Output").field("tty", &self.tty).finish()
    }
}
