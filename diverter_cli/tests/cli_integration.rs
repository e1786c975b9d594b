use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

// Short start-up and a 1 s datalog so runs of a few seconds produce reports
fn write_valid_config(dir: &tempfile::TempDir) -> PathBuf {
    let toml = r#"
[sampling]
startup_ms = 1000

[datalog]
period_s = 1

[[loads]]
pin = 5
rating_w = 1000

[[loads]]
pin = 6
rating_w = 1000
"#;
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn json_lines(stdout: &[u8]) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap_or_else(|e| panic!("not JSON ({e}): {l}")))
        .collect()
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["simulate", "--seconds", "3"], 0, "done:", "stdout")]
#[case(&["simulate", "--step", "1500"], 1, "SECONDS:WATTS", "stderr")]
#[case(&["self-check"], 0, "OK", "stdout")]
#[case(&[], 2, "Usage", "stderr")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let mut cmd = Command::cargo_bin("diverter").unwrap();
    cmd.arg("--config").arg(&cfg);
    for a in args {
        cmd.arg(a);
    }

    let assert = cmd.assert().code(exit_code);
    match stream {
        "stdout" => assert.stdout(predicate::str::contains(needle)),
        _ => assert.stderr(predicate::str::contains(needle)),
    };
}

#[test]
fn simulate_json_emits_datalog_then_summary() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let out = Command::cargo_bin("diverter")
        .unwrap()
        .args(["--json", "--config"])
        .arg(&cfg)
        .args(["simulate", "--seconds", "5", "--surplus-w", "1500"])
        .output()
        .unwrap();
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let lines = json_lines(&out.stdout);
    let datalog: Vec<_> = lines.iter().filter(|v| v["type"] == "datalog").collect();
    assert!(datalog.len() >= 3, "{} datalog lines", datalog.len());
    for v in &datalog {
        assert_eq!(v["load_on_ratio"].as_array().unwrap().len(), 2);
        assert!(v["vrms"].as_f64().unwrap() > 200.0);
    }
    // the loads end up absorbing most of the surplus
    let last = datalog.last().unwrap();
    assert!(last["diverted_w"].as_f64().unwrap() > 1000.0, "{last}");

    let summary = lines.last().unwrap();
    assert_eq!(summary["type"], "summary");
    assert_eq!(summary["output_faults"], 0);
    assert_eq!(summary["datalog_reports"].as_u64().unwrap(), datalog.len() as u64);
}

#[test]
fn simulate_accepts_a_step_profile() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    Command::cargo_bin("diverter")
        .unwrap()
        .arg("--config")
        .arg(&cfg)
        .args(["simulate", "--seconds", "4", "--step", "0:-500", "--step", "2:1200"])
        .assert()
        .success()
        .stdout(predicate::str::contains("grid="));
}

#[test]
fn replay_of_an_exporting_trace_reports_negative_grid_power() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    // one 64-set mains cycle, current in phase with voltage (export)
    let mut csv = String::from("voltage,grid,diverted\n");
    for k in 0..64 {
        let s = (std::f64::consts::TAU * f64::from(k) / 64.0).sin();
        let v = 512.0 + (400.0 * s).round();
        let g = 512.0 + (100.0 * s).round();
        writeln!(csv, "{v},{g},512").unwrap();
    }
    let trace = dir.path().join("trace.csv");
    fs::write(&trace, csv).unwrap();

    let out = Command::cargo_bin("diverter")
        .unwrap()
        .args(["--json", "--config"])
        .arg(&cfg)
        .args(["replay", "--trace"])
        .arg(&trace)
        .args(["--repeat", "200"])
        .output()
        .unwrap();
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let lines = json_lines(&out.stdout);
    let datalog: Vec<_> = lines.iter().filter(|v| v["type"] == "datalog").collect();
    assert!(!datalog.is_empty());
    for v in &datalog {
        assert!(v["grid_w"].as_f64().unwrap() < 0.0, "{v}");
    }
    let summary = lines.last().unwrap();
    assert_eq!(summary["sample_sets"], 64 * 200);
}

#[test]
fn replay_rejects_bad_csv_headers() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    let trace = dir.path().join("bad.csv");
    fs::write(&trace, "v,i,d\n512,512,512\n").unwrap();

    Command::cargo_bin("diverter")
        .unwrap()
        .arg("--config")
        .arg(&cfg)
        .args(["replay", "--trace"])
        .arg(&trace)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid headers"));
}

#[rstest]
#[case("[supply]\nfrequency_hz = 40\n[[loads]]\npin = 5\n", "frequency_hz")]
#[case("[[loads]]\npin = 5\n[[loads]]\npin = 5\n", "more than once")]
#[case("[sampling]\nbogus = 1\n", "invalid")]
fn invalid_config_exits_with_code_2(#[case] toml: &str, #[case] needle: &str) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();

    Command::cargo_bin("diverter")
        .unwrap()
        .arg("--config")
        .arg(&path)
        .arg("self-check")
        .assert()
        .code(2)
        .stderr(predicate::str::contains(needle));
}

#[test]
fn missing_config_is_a_configuration_error() {
    let dir = tempdir().unwrap();
    Command::cargo_bin("diverter")
        .unwrap()
        .arg("--config")
        .arg(dir.path().join("nope.toml"))
        .arg("self-check")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("could not be read"));
}

#[test]
fn json_mode_reports_errors_as_json() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cfg.toml");
    fs::write(&path, "[supply]\nfrequency_hz = 40\n[[loads]]\npin = 5\n").unwrap();

    let out = Command::cargo_bin("diverter")
        .unwrap()
        .args(["--json", "--config"])
        .arg(&path)
        .arg("self-check")
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(2));
    let lines = json_lines(&out.stdout);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["type"], "error");
    assert_eq!(lines[0]["reason"], "InvalidConfig");
    assert_eq!(lines[0]["exit_code"], 2);
}

#[cfg(not(feature = "hardware"))]
#[test]
fn run_without_hardware_support_fails_cleanly() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    Command::cargo_bin("diverter")
        .unwrap()
        .arg("--config")
        .arg(&cfg)
        .arg("run")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("without hardware support"));
}
