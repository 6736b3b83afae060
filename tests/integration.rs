use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn catalog_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("catalog");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();

    fs::write(
        data_dir.join("collection.xml"),
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Collection>
  <DVD>
    <ID>100</ID>
    <Title>Alpha</Title>
    <RunningTime>90</RunningTime>
    <Genres><Genre>Drama</Genre></Genres>
  </DVD>
  <DVD>
    <ID>101</ID>
    <Title>Beta</Title>
    <Genres><Genre>Comedy</Genre><Genre>drama</Genre></Genres>
  </DVD>
  <DVD>
    <ID>100</ID>
    <Title>Alpha again</Title>
  </DVD>
</Collection>
"#,
    )
    .unwrap();

    let config_content = format!(
        r#"[catalog]
kind = "Movies"
poll_interval_ms = 10

[source.file]
path = "{}/data/collection.xml"
"#,
        root.display()
    );

    let config_path = config_dir.join("catalog.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_catalog(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = catalog_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--status")
        .arg("off")
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run catalog binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_check_prints_summary() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_catalog(&config_path, &["check"]);
    assert!(success, "check failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("titles"), "got: {}", stdout);
    assert!(stdout.contains("duplicate 1"), "got: {}", stdout);
    assert!(stdout.contains("persistent id"));
}

#[test]
fn test_check_json_is_deterministic() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout1, _, success1) = run_catalog(&config_path, &["check", "--json"]);
    let (stdout2, _, success2) = run_catalog(&config_path, &["check", "--json"]);
    assert!(success1 && success2);

    let a: serde_json::Value = serde_json::from_str(&stdout1).unwrap();
    let b: serde_json::Value = serde_json::from_str(&stdout2).unwrap();
    assert_eq!(a["titles"], 2);
    // "All Movies", DRAMA, COMEDY
    assert_eq!(a["categories"], 3);
    assert_eq!(a["persistent_id"], b["persistent_id"]);
}

#[test]
fn test_check_fails_on_malformed_source() {
    let (tmp, config_path) = setup_test_env();
    fs::write(
        tmp.path().join("data").join("collection.xml"),
        "<Collection><DVD><ID>1</Title></DVD></Collection>",
    )
    .unwrap();

    let (_, stderr, success) = run_catalog(&config_path, &["check"]);
    assert!(!success);
    assert!(stderr.contains("malformed"), "got: {}", stderr);
}

#[test]
fn test_sources_reports_file_health() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_catalog(&config_path, &["sources"]);
    assert!(success);
    assert!(stdout.contains("file"));
    assert!(stdout.contains("true"));

    fs::remove_file(tmp.path().join("data").join("collection.xml")).unwrap();
    let (stdout, _, _) = run_catalog(&config_path, &["sources"]);
    assert!(stdout.contains("NOT FOUND"), "got: {}", stdout);
}

#[test]
fn test_invalid_config_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("catalog.toml");
    fs::write(&config_path, "[source.http]\nbase_url = \"ftp://nope\"\n").unwrap();

    let (_, stderr, success) = run_catalog(&config_path, &["check"]);
    assert!(!success);
    assert!(stderr.contains("base_url"), "got: {}", stderr);
}
