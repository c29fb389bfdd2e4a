//! Offline aggregation of machine-format reports
//!
//! Each machine line describes one stall. The aggregator folds many
//! lines (from files or a stream) into per-method totals so recurring
//! offenders stand out across a whole run. Lines that fail to parse are
//! counted and skipped rather than aborting the whole aggregation,
//! since report streams are often interleaved with other stderr output.

use std::collections::HashMap;
use std::io::BufRead;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::report::MachineReport;

/// Accumulated totals for one `Class#method`.
#[derive(Debug, Clone, Default)]
struct CallStats {
    calls: u64,
    total_duration: f64,
    max_duration: f64,
}

/// Folds machine-format report lines into per-method totals.
#[derive(Debug, Default)]
pub struct Aggregator {
    stats: HashMap<String, CallStats>,
    reports: u64,
    total_duration: f64,
    skipped_lines: u64,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one parsed report.
    pub fn add_report(&mut self, report: &MachineReport) {
        self.reports += 1;
        self.total_duration += report.duration;
        for call in &report.calls {
            let name = format!("{}#{}", call.class, call.method);
            let entry = self.stats.entry(name).or_default();
            entry.calls += 1;
            entry.total_duration += call.duration;
            if call.duration > entry.max_duration {
                entry.max_duration = call.duration;
            }
        }
    }

    /// Parse one line and fold it in. Returns whether the line parsed.
    pub fn add_line(&mut self, line: &str) -> bool {
        if line.trim().is_empty() {
            return false;
        }
        match serde_json::from_str::<MachineReport>(line) {
            Ok(report) => {
                self.add_report(&report);
                true
            }
            Err(_) => {
                self.skipped_lines += 1;
                false
            }
        }
    }

    /// Fold in every line from a reader.
    pub fn read(&mut self, reader: impl BufRead) -> Result<()> {
        for line in reader.lines() {
            let line = line.context("failed to read report line")?;
            self.add_line(&line);
        }
        Ok(())
    }

    /// Snapshot of the aggregation, methods sorted by total duration
    /// descending. `top` limits the number of methods reported.
    pub fn summary(&self, top: Option<usize>) -> AggregateSummary {
        let mut methods: Vec<MethodSummary> = self
            .stats
            .iter()
            .map(|(name, stats)| MethodSummary {
                name: name.clone(),
                calls: stats.calls,
                total_duration: stats.total_duration,
                mean_duration: stats.total_duration / stats.calls as f64,
                max_duration: stats.max_duration,
            })
            .collect();
        methods.sort_by(|a, b| {
            b.total_duration
                .total_cmp(&a.total_duration)
                .then_with(|| a.name.cmp(&b.name))
        });
        if let Some(top) = top {
            methods.truncate(top);
        }

        AggregateSummary {
            reports: self.reports,
            total_duration: self.total_duration,
            skipped_lines: self.skipped_lines,
            methods,
        }
    }
}

/// Aggregation result, ready for text or JSON output.
#[derive(Debug, Serialize)]
pub struct AggregateSummary {
    /// Number of stall reports folded in.
    pub reports: u64,
    /// Sum of stall interval durations in seconds.
    pub total_duration: f64,
    /// Lines that were not parseable machine reports.
    pub skipped_lines: u64,
    pub methods: Vec<MethodSummary>,
}

/// Per-method totals across all reports.
#[derive(Debug, Clone, Serialize)]
pub struct MethodSummary {
    pub name: String,
    pub calls: u64,
    pub total_duration: f64,
    pub mean_duration: f64,
    pub max_duration: f64,
}

impl AggregateSummary {
    /// Text table sorted by total time.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Aggregated {} stalls, {:.6}s total\n",
            self.reports, self.total_duration
        ));
        if self.skipped_lines > 0 {
            out.push_str(&format!(
                "Skipped {} unparseable lines\n",
                self.skipped_lines
            ));
        }
        if self.methods.is_empty() {
            out.push_str("No calls recorded.\n");
            return out;
        }

        out.push('\n');
        out.push_str(&format!(
            "{:<48} {:>8} {:>12} {:>12} {:>12}\n",
            "Method", "Calls", "Total", "Mean", "Max"
        ));
        out.push_str(&format!("{}\n", "─".repeat(96)));
        for method in &self.methods {
            out.push_str(&format!(
                "{:<48} {:>8} {:>11.6}s {:>11.6}s {:>11.6}s\n",
                method.name,
                method.calls,
                method.total_duration,
                method.mean_duration,
                method.max_duration
            ));
        }
        out.push_str(&format!("{}\n", "─".repeat(96)));
        out
    }
}
