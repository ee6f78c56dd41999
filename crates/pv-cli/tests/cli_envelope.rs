use std::path::PathBuf;
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_pdfvar"))
}

fn repo_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..").canonicalize().unwrap()
}

fn fixture_path(name: &str) -> PathBuf {
    repo_root().join("tests/fixtures").join(name)
}

fn tmp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("pdfvar_cli_{}_{}_{}", std::process::id(), nanos, name));
    p
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

fn stdout_json(out: &Output, what: &str) -> serde_json::Value {
    assert!(
        out.status.success(),
        "{what} should succeed, stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );
    serde_json::from_slice(&out.stdout).expect("stdout should be valid JSON")
}

#[test]
fn envelope_yield_sum_contract() {
    let input = fixture_path("events.jsonl");
    assert!(input.exists(), "missing fixture: {}", input.display());

    let out = run(&["envelope", "--input", input.to_string_lossy().as_ref(), "--threads", "1"]);
    let v = stdout_json(&out, "envelope");

    assert_eq!(v["schema_version"], "pdfvar_envelope_v0");
    assert_eq!(v["layout"], "bins");
    assert_eq!(v["meta"]["tool"], "pdfvar");
    assert_eq!(v["meta"]["strategy"], "yield_sum");
    assert_eq!(v["meta"]["stats"]["accepted"], 43);
    assert_eq!(v["meta"]["parity_mode"]["threads"], 1);
    assert!(v.get("y_range").is_none());

    let panels = v["panels"].as_array().expect("panels should be array");
    assert_eq!(panels.len(), 1);
    let labels = panels[0]["x_labels"].as_array().expect("x_labels");
    assert_eq!(labels.len(), 14);
    assert_eq!(labels[0], "Bin 22");
    assert_eq!(labels[13], "Bin 36");
    let replicas = panels[0]["replica_y"].as_array().expect("replica_y");
    assert_eq!(replicas.len(), 100);
    let low = panels[0]["low_y"].as_array().unwrap();
    let high = panels[0]["high_y"].as_array().unwrap();
    for (lo, hi) in low.iter().zip(high) {
        assert!(lo.as_f64().unwrap() <= hi.as_f64().unwrap());
    }
}

#[test]
fn envelope_per_event_ratio_from_config_to_file() {
    let input = fixture_path("events.jsonl");
    let config = fixture_path("config_per_event.json");
    let out_path = tmp_dir("per_event.json");

    let out = run(&[
        "envelope",
        "--input",
        input.to_string_lossy().as_ref(),
        "--config",
        config.to_string_lossy().as_ref(),
        "--event-values",
        "--output",
        out_path.to_string_lossy().as_ref(),
    ]);
    assert!(
        out.status.success(),
        "envelope should succeed, stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );
    assert!(out.stdout.is_empty());

    let bytes = std::fs::read(&out_path).expect("artifact written");
    std::fs::remove_file(&out_path).ok();
    let v: serde_json::Value = serde_json::from_slice(&bytes).expect("artifact JSON");

    assert_eq!(v["layout"], "grid");
    assert_eq!(v["meta"]["strategy"], "per_event_ratio");
    assert_eq!(v["grid_rows"], 5);
    assert_eq!(v["grid_cols"], 3);
    let panels = v["panels"].as_array().unwrap();
    assert_eq!(panels.len(), 14);
    assert_eq!(panels[0]["title"], "Bin 22");
    assert_eq!(panels[0]["x_labels"], serde_json::json!(["500-800", "800-1100", "1100+"]));
    assert!(panels[0]["event_y"].is_array());
    assert!(panels[0].get("replica_y").is_none());

    let y_range = v["y_range"].as_array().expect("y_range");
    assert!(y_range[0].as_f64().unwrap() <= y_range[1].as_f64().unwrap());
}

#[test]
fn envelope_strategy_and_sub_bin_flags() {
    let input = fixture_path("events.jsonl");
    let out = run(&[
        "envelope",
        "--input",
        input.to_string_lossy().as_ref(),
        "--strategy",
        "per-event-ratio",
        "--sub-bins",
    ]);
    let v = stdout_json(&out, "envelope --strategy --sub-bins");
    assert_eq!(v["meta"]["strategy"], "per_event_ratio");
    assert_eq!(v["layout"], "grid");
    assert_eq!(v["meta"]["stats"]["accepted"], 39);
    // Event lists are opt-in.
    assert!(v["panels"][0].get("event_y").is_none());
}

#[test]
fn config_prints_reference() {
    let v = stdout_json(&run(&["config"]), "config");
    assert_eq!(v["strategy"], "yield_sum");
    assert_eq!(v["replicas"], 100);
    assert_eq!(v["envelope_indices"]["low"], 15);
    assert_eq!(v["envelope_indices"]["high"], 83);
    assert!(v["sub_binning"].is_null());
    let bins = v["binning"]["bins"].as_array().unwrap();
    assert_eq!(bins.len(), 14);
    assert!(bins.iter().all(|b| b["id"] != 34));

    let v = stdout_json(
        &run(&["config", "--strategy", "per-event-ratio", "--sub-bins"]),
        "config per-event-ratio",
    );
    assert_eq!(v["strategy"], "per_event_ratio");
    assert_eq!(v["sub_binning"].as_array().unwrap().len(), 3);
}

#[test]
fn config_output_round_trips_through_envelope() {
    let cfg_path = tmp_dir("config.json");
    let out = run(&["config", "--output", cfg_path.to_string_lossy().as_ref()]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));

    let input = fixture_path("events.jsonl");
    let out = run(&[
        "envelope",
        "--input",
        input.to_string_lossy().as_ref(),
        "--config",
        cfg_path.to_string_lossy().as_ref(),
    ]);
    std::fs::remove_file(&cfg_path).ok();
    let v = stdout_json(&out, "envelope with printed config");
    assert_eq!(v["meta"]["stats"]["accepted"], 43);
}

#[test]
fn convert_then_envelope_on_parquet() {
    let input = fixture_path("events.jsonl");
    let pq = tmp_dir("events.parquet");

    let out = run(&[
        "convert",
        "--input",
        input.to_string_lossy().as_ref(),
        "--output",
        pq.to_string_lossy().as_ref(),
    ]);
    assert!(out.status.success(), "convert failed: {}", String::from_utf8_lossy(&out.stderr));
    assert!(pq.exists());

    let out = run(&["envelope", "--input", pq.to_string_lossy().as_ref()]);
    let from_parquet = stdout_json(&out, "envelope on parquet");
    let out = run(&["envelope", "--input", input.to_string_lossy().as_ref()]);
    let from_jsonl = stdout_json(&out, "envelope on jsonl");
    std::fs::remove_file(&pq).ok();

    assert_eq!(from_parquet["meta"]["stats"], from_jsonl["meta"]["stats"]);
    assert_eq!(from_parquet["panels"][0]["n_events"], from_jsonl["panels"][0]["n_events"]);
    assert_eq!(from_parquet["panels"][0]["low_y"], from_jsonl["panels"][0]["low_y"]);
    assert_eq!(from_parquet["panels"][0]["high_y"], from_jsonl["panels"][0]["high_y"]);
}

#[test]
fn convert_max_events() {
    let input = fixture_path("events.jsonl");
    let pq = tmp_dir("first10.parquet");
    let out = run(&[
        "convert",
        "--input",
        input.to_string_lossy().as_ref(),
        "--output",
        pq.to_string_lossy().as_ref(),
        "--max-events",
        "10",
    ]);
    assert!(out.status.success(), "convert failed: {}", String::from_utf8_lossy(&out.stderr));

    let v = stdout_json(&run(&["envelope", "--input", pq.to_string_lossy().as_ref()]), "envelope");
    std::fs::remove_file(&pq).ok();
    let stats = v["meta"]["stats"].as_object().expect("stats");
    let seen: u64 = stats.values().map(|x| x.as_u64().unwrap()).sum();
    assert_eq!(seen, 10);
}

#[test]
fn envelope_rejects_invalid_config() {
    let cfg_path = tmp_dir("bad_config.json");
    std::fs::write(&cfg_path, r#"{"strategy":"yield_sum","replicas":0}"#).unwrap();
    let input = fixture_path("events.jsonl");

    let out = run(&[
        "envelope",
        "--input",
        input.to_string_lossy().as_ref(),
        "--config",
        cfg_path.to_string_lossy().as_ref(),
    ]);
    std::fs::remove_file(&cfg_path).ok();

    assert!(!out.status.success(), "zero replicas should be rejected");
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("invalid envelope configuration"), "stderr={stderr}");
}

#[test]
fn envelope_rejects_unknown_input_format() {
    let out = run(&["envelope", "--input", "events.root"]);
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("unsupported input format"), "stderr={stderr}");
}

#[test]
fn envelope_rejects_unknown_strategy() {
    let input = fixture_path("events.jsonl");
    let out =
        run(&["envelope", "--input", input.to_string_lossy().as_ref(), "--strategy", "median"]);
    assert!(!out.status.success());
}
