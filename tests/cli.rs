use std::fs;
use std::process::Command;

#[test]
fn index_dry_run_prints_knowledge_base() {
    let output = Command::new(env!("CARGO_BIN_EXE_eventrag-index"))
        .arg("--dry-run")
        .output()
        .expect("run CLI");

    assert!(
        output.status.success(),
        "cli exited with {}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout, eventrag::knowledge::snapshot_text());
    assert_eq!(stdout.lines().count(), 32);
}

#[test]
fn classify_without_store_fails_cleanly() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("logs.csv");
    fs::write(&input, "Message\nUser admin logged in successfully\n").expect("write input");

    let output = Command::new(env!("CARGO_BIN_EXE_eventrag-classify"))
        .arg("--input")
        .arg(&input)
        .arg("--store-dir")
        .arg(dir.path().join("missing"))
        .output()
        .expect("run CLI");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("failed to load knowledge store"),
        "unexpected stderr: {stderr}"
    );
    assert!(output.stdout.is_empty());
}

#[test]
fn classify_rejects_unknown_extension() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("logs.txt");
    fs::write(&input, "User admin logged in successfully\n").expect("write input");

    let output = Command::new(env!("CARGO_BIN_EXE_eventrag-classify"))
        .arg("--input")
        .arg(&input)
        .output()
        .expect("run CLI");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--input-format"));
}
