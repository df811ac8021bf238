// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Integration tests for the mtkcam-v4l2 CLI
//!
//! These tests verify CLI commands work correctly end-to-end using the
//! assert_cmd crate pattern. The simulate command runs without hardware;
//! capture tests are serial and require a MediaTek ISP.

use assert_cmd::Command;
use predicates::prelude::*;
use serial_test::serial;
use std::{env, time::Duration};

/// Helper to create a Command for the mtkcam-v4l2 binary
/// Uses MTKCAM_V4L2_BIN environment variable if set, otherwise uses cargo run
fn mtkcam_cmd() -> Command {
    let mut cmd = if let Ok(bin_path) = env::var("MTKCAM_V4L2_BIN") {
        Command::new(bin_path)
    } else {
        let mut c = Command::new("cargo");
        c.args(["run", "--bin", "mtkcam-v4l2", "--"]);
        c
    };

    // Explicitly pass the library location for hardware testing
    for var in ["LD_LIBRARY_PATH", "MTKCAM_V4L2_LIBRARY"] {
        if let Ok(value) = env::var(var) {
            cmd.env(var, value);
        }
    }

    cmd
}

fn stdout_json(output: &[u8]) -> serde_json::Value {
    serde_json::from_slice(output).expect("stdout is not valid JSON")
}

// =============================================================================
// Basic CLI Tests (No Hardware Required)
// =============================================================================

#[test]
fn test_cli_help() {
    mtkcam_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("MTK camera V4L2 CLI"))
        .stdout(predicate::str::contains("topology"))
        .stdout(predicate::str::contains("formats"))
        .stdout(predicate::str::contains("simulate"))
        .stdout(predicate::str::contains("capture"));
}

#[test]
fn test_cli_version() {
    mtkcam_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mtkcam-v4l2"));
}

#[test]
fn test_simulate_help() {
    mtkcam_cmd()
        .args(["simulate", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--pipeline"))
        .stdout(predicate::str::contains("--frames"))
        .stdout(predicate::str::contains("--reserve"))
        .stdout(predicate::str::contains("--json"));
}

#[test]
fn test_unknown_command() {
    mtkcam_cmd()
        .arg("record")
        .assert()
        .failure()
        .code(2);
}

// =============================================================================
// Topology and Format Tables
// =============================================================================

#[test]
fn test_topology_p1() {
    mtkcam_cmd()
        .args(["topology", "p1-out2", "--tuning"])
        .assert()
        .success()
        .stdout(predicate::str::contains("mtk-cam-p1 packed out"))
        .stdout(predicate::str::contains("mtk-cam-p1 meta input"))
        .stdout(predicate::str::contains("with tuning"));
}

#[test]
fn test_topology_json() {
    let output = mtkcam_cmd()
        .args(["topology", "p1-out1", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json = stdout_json(&output.stdout);
    let topo = &json[0];
    assert_eq!(topo["tag"], "p1-out1");
    assert_eq!(topo["value"], 0x101);
    assert_eq!(topo["links"].as_array().unwrap().len(), 1);
    assert_eq!(topo["links"][0]["sink"], "mtk-cam-p1 main stream");
}

#[test]
fn test_topology_all() {
    let output = mtkcam_cmd()
        .args(["topology", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(stdout_json(&output.stdout).as_array().unwrap().len(), 13);
}

#[test]
fn test_topology_invalid_tag() {
    mtkcam_cmd()
        .args(["topology", "p3-out1"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_formats_json() {
    let output = mtkcam_cmd()
        .args(["formats", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json = stdout_json(&output.stdout);
    let formats = json["formats"].as_array().unwrap();
    assert!(formats.iter().any(|f| f["fourcc"] == "YUYV"));
    assert!(formats
        .iter()
        .any(|f| f["fourcc"] == "NM12" && f["multiplanar"] == true));
    assert_eq!(json["profiles"].as_array().unwrap().len(), 8);
}

// =============================================================================
// Simulated Request Cycles (No Hardware Required)
// =============================================================================

#[test]
fn test_simulate_json_metrics() {
    let output = mtkcam_cmd()
        .args(["-q", "simulate", "--frames", "12", "--reserve", "2", "--json"])
        .timeout(Duration::from_secs(60))
        .output()
        .unwrap();
    assert!(output.status.success());

    let metrics = stdout_json(&output.stdout);
    assert_eq!(metrics["cycles"], 12);
    assert_eq!(metrics["queued_requests"], 12);
    assert_eq!(metrics["dropped_frames"], 0);
    assert!(metrics["bytes_dequeued"].as_u64().unwrap() > 0);
    assert!(metrics["latency_us"]["p95"].is_u64());
}

#[test]
fn test_simulate_out1_text() {
    mtkcam_cmd()
        .args([
            "simulate",
            "--pipeline",
            "out1",
            "--frames",
            "3",
            "--resolution",
            "320x240",
            "--lazy-start",
        ])
        .timeout(Duration::from_secs(60))
        .assert()
        .success()
        .stdout(predicate::str::contains("Cycles:            3"))
        .stdout(predicate::str::contains("Queued requests:   3"));
}

#[test]
fn test_simulate_bayer_needs_order() {
    mtkcam_cmd()
        .args(["simulate", "--format", "bayer10"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("needs an order"));
}

#[test]
fn test_simulate_invalid_resolution() {
    mtkcam_cmd()
        .args(["simulate", "--resolution", "640"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_simulate_unknown_pipeline() {
    mtkcam_cmd()
        .args(["simulate", "--pipeline", "unknown"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("unknown pipeline"));
}

// =============================================================================
// Hardware Capture (Requires MediaTek ISP)
// =============================================================================

#[test]
#[ignore = "requires MediaTek ISP hardware (run with --include-ignored on hardware)"]
#[serial]
fn test_capture_json() {
    let output = mtkcam_cmd()
        .args(["-q", "capture", "--frames", "30", "--json"])
        .timeout(Duration::from_secs(30))
        .output()
        .unwrap();
    assert!(output.status.success());

    let metrics = stdout_json(&output.stdout);
    assert_eq!(metrics["cycles"], 30);
    assert!(metrics["cycles_per_sec"].as_f64().unwrap() > 0.0);
}

#[test]
#[serial]
fn test_capture_without_library() {
    if env::var("MTKCAM_V4L2_LIBRARY").is_ok() {
        return;
    }
    mtkcam_cmd()
        .env("MTKCAM_V4L2_LIBRARY", "/nonexistent/libmtkcam_v4l2.so")
        .args(["capture", "--frames", "1"])
        .assert()
        .failure()
        .code(4);
}
