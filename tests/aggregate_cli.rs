//! Integration tests for the report aggregator binary

mod common;

use std::io::Write as _;

use assert_cmd::Command;
use common::scripted_capture;
use fiber_profiler::{CaptureConfig, Event, EventKind};

/// Produce real machine-format lines by running the engine through a
/// couple of stalls.
fn generate_reports() -> String {
    let (mut capture, clock, sink) = scripted_capture(CaptureConfig {
        stall_threshold: 0.0001,
        filter_threshold: 0.00001,
        track_calls: true,
        sample_rate: 1.0,
        sample_seed: Some(1),
    });
    capture.start();

    for method in ["parse", "render"] {
        capture.dispatch(Event::Switch { blocking: false });
        capture.dispatch(Event::Frame {
            kind: EventKind::Call,
            method,
            class: "Request",
            path: "request.rb",
            line: 12,
        });
        clock.advance(0.002);
        capture.dispatch(Event::Frame {
            kind: EventKind::Return,
            method,
            class: "Request",
            path: "request.rb",
            line: 12,
        });
    }
    capture.dispatch(Event::Switch { blocking: true });
    capture.stop();

    sink.contents()
}

#[test]
fn aggregates_reports_from_stdin() {
    let reports = generate_reports();

    let mut cmd = Command::cargo_bin("fiber-profiler").unwrap();
    let output = cmd.write_stdin(reports).output().expect("run aggregator");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Aggregated 2 stalls"), "stdout:\n{}", stdout);
    assert!(stdout.contains("Request#parse"));
    assert!(stdout.contains("Request#render"));
}

#[test]
fn aggregates_report_files_to_json() {
    let reports = generate_reports();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(reports.as_bytes()).unwrap();

    let mut cmd = Command::cargo_bin("fiber-profiler").unwrap();
    let output = cmd
        .arg("--format")
        .arg("json")
        .arg(file.path())
        .output()
        .expect("run aggregator");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let summary: serde_json::Value = serde_json::from_str(&stdout).expect("JSON output parses");
    assert_eq!(summary["reports"], 2);
    assert_eq!(summary["methods"].as_array().unwrap().len(), 2);
}

#[test]
fn top_limits_the_rows() {
    let reports = generate_reports();

    let mut cmd = Command::cargo_bin("fiber-profiler").unwrap();
    let output = cmd
        .arg("--format")
        .arg("json")
        .arg("--top")
        .arg("1")
        .write_stdin(reports)
        .output()
        .expect("run aggregator");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let summary: serde_json::Value = serde_json::from_str(&stdout).expect("JSON output parses");
    assert_eq!(summary["methods"].as_array().unwrap().len(), 1);
}

#[test]
fn missing_file_is_an_error() {
    let mut cmd = Command::cargo_bin("fiber-profiler").unwrap();
    let output = cmd
        .arg("/nonexistent/reports.ndjson")
        .output()
        .expect("run aggregator");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to open"), "stderr:\n{}", stderr);
}

#[test]
fn unrelated_stderr_noise_is_tolerated() {
    let mut input = String::from("warning: something unrelated\n");
    input.push_str(&generate_reports());

    let mut cmd = Command::cargo_bin("fiber-profiler").unwrap();
    let output = cmd.write_stdin(input).output().expect("run aggregator");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Aggregated 2 stalls"));
    assert!(stdout.contains("Skipped 1 unparseable lines"));
}
