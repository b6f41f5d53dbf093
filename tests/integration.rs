//! End-to-end tests of the `triage` binary with the provider disabled.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn triage_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_triage"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let latest = root.join("sources/clinical_guidelines/ada/latest");
    fs::create_dir_all(&latest).unwrap();
    fs::write(latest.join("standards.pdf"), "%PDF-1.7 standards").unwrap();
    fs::write(
        latest.join("metadata.json"),
        r#"{"display_name":"ADA Standards","version":"2025","last_updated":"2020-01-01"}"#,
    )
    .unwrap();

    let latest = root.join("sources/user_sources/pump_manual/latest");
    fs::create_dir_all(&latest).unwrap();
    fs::write(latest.join("manual.pdf"), "%PDF-1.7 manual").unwrap();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[registry]
root = "{root}/sources"

[cache]
dir = "{root}/cache"

[provider]
kind = "disabled"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("triage.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_triage(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = triage_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run triage binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_sources_lists_registry() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_triage(&config_path, &["sources"]);
    assert!(success, "sources failed: stderr={}", stderr);
    assert!(stdout.contains("clinical_guidelines/ada"));
    assert!(stdout.contains("ADA Standards (v2025)"));
    assert!(stdout.contains("outdated"));
    assert!(stdout.contains("user_sources/pump_manual"));
    assert!(stdout.contains("unknown"));
}

#[test]
fn test_classify_uses_keyword_override() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_triage(
        &config_path,
        &["classify", "Why does pizza spike me 6 hours later?"],
    );
    assert!(success, "classify failed: stderr={}", stderr);
    assert!(stdout.contains("category:   hybrid"));
    assert!(stdout.contains("user_sources"));
}

#[test]
fn test_classify_falls_back_without_provider() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_triage(&config_path, &["classify", "What is a normal A1C?"]);
    assert!(success);
    assert!(stdout.contains("category:   hybrid"));
    assert!(stdout.contains("confidence: 0.50"));
}

#[test]
fn test_ask_without_provider_degrades() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_triage(
        &config_path,
        &["ask", "Should I use an extended bolus for pizza?"],
    );
    assert!(success, "ask failed: stderr={}", stderr);
    assert!(stdout.contains("couldn't find relevant information"));
    assert!(stderr.contains("unavailable"));
}

#[test]
fn test_missing_config_uses_defaults() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");

    let (stdout, _, success) = run_triage(&missing, &["sources"]);
    assert!(success);
    assert!(stdout.contains("No knowledge sources found"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("bad.toml");
    fs::write(&config_path, "[classifier]\nconfidence_threshold = 3.0\n").unwrap();

    let (_, stderr, success) = run_triage(&config_path, &["sources"]);
    assert!(!success);
    assert!(stderr.contains("confidence_threshold"));
}

#[test]
fn test_sources_json_is_machine_readable() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_triage(&config_path, &["sources", "--json"]);
    assert!(success, "sources --json failed: stderr={}", stderr);
    let listing: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let entries = listing.as_array().unwrap();
    assert_eq!(entries.len(), 2);

    let ada = entries
        .iter()
        .find(|e| e["source"]["key"] == "clinical_guidelines/ada")
        .unwrap();
    assert_eq!(ada["staleness"], "outdated");
    assert_eq!(ada["source"]["category"], "clinical_guidelines");
    assert_eq!(ada["source"]["kind"], "document_bundle");
    assert!(ada["age_days"].as_i64().unwrap() > 365);
}

#[test]
fn test_ask_json_carries_classification_and_failures() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_triage(&config_path, &["ask", "What is a normal A1C?", "--json"]);
    assert!(success, "ask --json failed: stderr={}", stderr);
    let answer: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(answer["classification"]["category"], "hybrid");
    assert!(!answer["text"].as_str().unwrap().is_empty());
    assert!(!answer["failures"].as_array().unwrap().is_empty());
}
