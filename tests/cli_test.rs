//! Integration tests for the hologram-pipeline CLI

#![allow(deprecated)]

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use std::fs;
use tempfile::TempDir;

/// Job that inverts `frames` input files into `out/`
fn write_job(dir: &TempDir, frames: usize) -> std::path::PathBuf {
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    fs::create_dir(&input).unwrap();
    fs::create_dir(&output).unwrap();
    for k in 0..frames {
        fs::write(input.join(format!("{}.bin", k)), [k as u8; 16]).unwrap();
    }
    let kernel = dir.path().join("invert.wgsl");
    fs::write(&kernel, "").unwrap();

    let job = dir.path().join("job.json");
    let text = json!({
        "param": { "iterations": frames },
        "data": [
            { "name": "in", "size": 16, "source": "directory", "type": "buffer", "access": "read", "path": input },
            { "name": "out", "size": 16, "source": "directory", "type": "buffer", "access": "write", "path": output }
        ],
        "program": [ { "name": "invert", "path": kernel, "dispatch": [1, 1, 1] } ]
    });
    fs::write(&job, text.to_string()).unwrap();
    job
}

fn cmd(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("hologram-pipeline").unwrap();
    cmd.current_dir(dir.path()).env_remove("RUST_LOG");
    cmd
}

/// Test basic help command
#[test]
fn test_help_command() {
    let dir = TempDir::new().unwrap();
    cmd(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Hologram Pipeline"))
        .stdout(predicate::str::contains("--fence-timeout-ms"));
}

/// Test version command
#[test]
fn test_version_command() {
    let dir = TempDir::new().unwrap();
    cmd(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("hologram-pipeline"));
}

/// Test missing job file
#[test]
fn test_missing_job_file() {
    let dir = TempDir::new().unwrap();
    cmd(&dir)
        .arg("nonexistent.json")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Job description not found"));
}

/// Test invalid job description
#[test]
fn test_invalid_job_description() {
    let dir = TempDir::new().unwrap();
    let job = dir.path().join("bad.json");
    fs::write(&job, r#"{ "param": {}, "data": [ { "size": 0 } ], "program": [] }"#).unwrap();

    cmd(&dir)
        .arg(&job)
        .assert()
        .failure()
        .stderr(predicate::str::contains("data[0]"));
}

/// Test a full run prints the summary line
#[test]
fn test_run_prints_summary() {
    let dir = TempDir::new().unwrap();
    let job = write_job(&dir, 3);

    cmd(&dir)
        .arg(&job)
        .arg("--io-threads")
        .arg("2")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("[summary] total = "))
        .stdout(predicate::str::contains("sigma = "));

    for k in 0..3 {
        let out = fs::read(dir.path().join("out").join(format!("output{:04}.dat", k))).unwrap();
        assert_eq!(out, vec![!(k as u8); 16]);
    }
}

/// Test deferred mode and the report
#[test]
fn test_run_deferred_with_stats() {
    let dir = TempDir::new().unwrap();
    let job = write_job(&dir, 2);

    cmd(&dir)
        .arg(&job)
        .arg("--deferred")
        .arg("--stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("Ran 2 of 2 iteration(s) in 6 steps on the host backend"));
}

/// Test the job path taken from a settings file
#[test]
fn test_job_from_config_file() {
    let dir = TempDir::new().unwrap();
    let job = write_job(&dir, 1);
    let config = dir.path().join("settings.toml");
    fs::write(
        &config,
        format!("[pipeline]\njob = {:?}\nbackend = \"host\"\nio_threads = 1\n", job.to_string_lossy()),
    )
    .unwrap();

    cmd(&dir)
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("[summary]"));
}

/// Test that the wgpu backend needs the feature
#[cfg(not(feature = "wgpu"))]
#[test]
fn test_wgpu_backend_requires_feature() {
    let dir = TempDir::new().unwrap();
    let job = write_job(&dir, 1);

    cmd(&dir)
        .arg(&job)
        .arg("-b")
        .arg("wgpu")
        .assert()
        .failure()
        .stderr(predicate::str::contains("wgpu"));
}
