//! Integration tests for the replay binary

use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

const TRACE: &str = r"Error\n    at record (https://app.test/origin-tracer.js:40:9)\n    at open (https://app.test/menu.js:12:3)";

fn session(lines: &[String]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
    file.flush().unwrap();
    file
}

fn op(t: u32, token: &str) -> String {
    format!(
        r#"{{"t":{t},"event":"op","target":1,"kind":"classList.add","sign":"+","keys":["{token}"],"trace":"{TRACE}"}}"#
    )
}

fn batch(t: u32, token: &str) -> String {
    format!(
        r#"{{"t":{t},"event":"batch","changes":[{{"type":"attribute","target":1,"before":["menu"],"after":["menu","{token}"]}}]}}"#
    )
}

#[test]
fn test_text_output_reports_origin() {
    let file = session(&[op(0, "open"), batch(16, "open")]);
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("origin-tracer");
    cmd.arg(file.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("[CLASS] node#1 → +open"))
        .stdout(predicate::str::contains("before: menu"))
        .stdout(predicate::str::contains(
            "origin: classList.add + [open] at https://app.test/menu.js:12:3",
        ));
}

#[test]
fn test_json_output_lines_parse() {
    let file = session(&[op(0, "open"), batch(16, "open")]);
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("origin-tracer");
    cmd.arg("--format").arg("json").arg(file.path());

    let output = cmd.output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line: serde_json::Value = serde_json::from_str(stdout.lines().next().unwrap()).unwrap();
    assert_eq!(line["type"], "result");
    assert_eq!(line["suppressed"], false);
    assert_eq!(line["origin"]["call_site"]["line"], 12);
    assert_eq!(line["origin"]["kind"], "classList.add");
}

#[test]
fn test_throttled_repeat_is_hidden_in_text() {
    let file = session(&[op(0, "open"), batch(10, "open"), op(20, "open"), batch(30, "open")]);
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("origin-tracer");
    cmd.arg(file.path());

    let output = cmd.output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.matches("[CLASS]").count(), 1);
}

#[test]
fn test_preset_off_shows_every_repeat() {
    let file = session(&[op(0, "open"), batch(10, "open"), op(20, "open"), batch(30, "open")]);
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("origin-tracer");
    cmd.arg("--preset").arg("off").arg(file.path());

    let output = cmd.output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.matches("[CLASS]").count(), 2);
}

#[test]
fn test_verbose_and_show_stacks() {
    let file = session(&[op(0, "open"), batch(16, "open")]);
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("origin-tracer");
    cmd.arg("--verbose").arg("--show-stacks").arg(file.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("decision trace:"))
        .stdout(predicate::str::contains("stack:"))
        .stdout(predicate::str::contains("at open (https://app.test/menu.js:12:3)"));
}

#[test]
fn test_window_override_drops_stale_match() {
    let file = session(&[op(0, "open"), batch(500, "open")]);
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("origin-tracer");
    cmd.arg("--window-ms").arg("100").arg(file.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("origin: (no matching frame"));
}

#[test]
fn test_config_file_is_applied() {
    let file = session(&[op(0, "open"), batch(500, "open")]);
    let mut config = NamedTempFile::new().unwrap();
    writeln!(config, "window_ms = 100.0").unwrap();
    config.flush().unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("origin-tracer");
    cmd.arg("--config").arg(config.path()).arg(file.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("origin: (no matching frame"));
}

#[test]
fn test_invalid_config_file_fails() {
    let file = session(&[op(0, "open")]);
    let mut config = NamedTempFile::new().unwrap();
    writeln!(config, "per_target_max = 0").unwrap();
    config.flush().unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("origin-tracer");
    cmd.arg("--config").arg(config.path()).arg(file.path());

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("per_target_max"));
}

#[test]
fn test_malformed_session_reports_line() {
    let file = session(&[op(0, "open"), "{ nope".to_string()]);
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("origin-tracer");
    cmd.arg(file.path());

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("line 2"));
}

#[test]
fn test_missing_session_file_fails() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("origin-tracer");
    cmd.arg("/nonexistent/session.jsonl");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to open session"));
}

#[test]
fn test_session_from_stdin() {
    let input = format!("{}\n{}\n", op(0, "open"), batch(16, "open"));
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("origin-tracer");
    cmd.arg("-").write_stdin(input);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("[CLASS] node#1"));
}
