#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

fn setup_graph() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let text = dir.path().join("chain.txt");
    fs::write(&text, "# chain\n0 1\n1 2 1.0\n2 3 1.0 2.5\n").expect("write edge list");
    let graph = dir.path().join("chain.sgr");
    cargo_bin_cmd!("sage")
        .arg("--plain")
        .args(["convert", "--input"])
        .arg(&text)
        .arg("--output")
        .arg(&graph)
        .assert()
        .success();
    (dir, graph)
}

fn run_json(graph: &Path, scratch: &Path, extra: &[&str]) -> Value {
    let output = cargo_bin_cmd!("sage")
        .args(["--format", "json", "run", "--graph"])
        .arg(graph)
        .arg("--scratch")
        .arg(scratch)
        .args(["--threads", "2"])
        .args(extra)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("valid json")
}

#[test]
fn info_reports_converted_graph() {
    let (_dir, graph) = setup_graph();
    let output = cargo_bin_cmd!("sage")
        .args(["--format", "json", "info", "--graph"])
        .arg(&graph)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["vertices"], 4);
    assert_eq!(json["edges"], 3);
    assert_eq!(json["edge_attrs"], true);
    assert_eq!(json["undirected"], false);
}

#[test]
fn bfs_run_reaches_whole_chain() {
    let (dir, graph) = setup_graph();
    let json = run_json(
        &graph,
        &dir.path().join("bfs.tmp"),
        &["--samples", "8", "--source", "0", "--certain"],
    );
    assert_eq!(json["program"], "bfs");
    assert_eq!(json["samples"], 8);
    assert_eq!(json["supersteps"], 4);
    assert_eq!(json["expected_reached"], 4.0);
    assert_eq!(json["reached_vertices"], 4);
    assert_eq!(json["mean_distance"], 1.5);
}

#[test]
fn sssp_run_uses_edge_weights() {
    let (dir, graph) = setup_graph();
    let json = run_json(
        &graph,
        &dir.path().join("sssp.tmp"),
        &["--program", "sssp", "--samples", "4", "--certain"],
    );
    assert_eq!(json["program"], "sssp");
    // Distances 0, 0, 0 and 2.5: only the last edge carries a weight.
    assert_eq!(json["mean_distance"], 0.625);
}

#[test]
fn config_file_sits_under_flags() {
    let (dir, graph) = setup_graph();
    let config = dir.path().join("sage.toml");
    fs::write(&config, "[engine]\nnum_samples = 16\ncertain_graph = true\n").expect("write config");
    let config = config.to_string_lossy().into_owned();

    let json = run_json(&graph, &dir.path().join("a.tmp"), &["--config", &config]);
    assert_eq!(json["samples"], 16);
    assert_eq!(json["expected_reached"], 4.0);

    let json = run_json(
        &graph,
        &dir.path().join("b.tmp"),
        &["--config", &config, "--samples", "2"],
    );
    assert_eq!(json["samples"], 2);
}

#[test]
fn bad_inputs_fail_cleanly() {
    let (dir, graph) = setup_graph();
    let config = dir.path().join("bad.toml");
    fs::write(&config, "[engine]\nsamples = 16\n").expect("write config");
    cargo_bin_cmd!("sage")
        .args(["run", "--graph"])
        .arg(&graph)
        .arg("--config")
        .arg(&config)
        .assert()
        .failure();

    cargo_bin_cmd!("sage")
        .args(["run", "--graph"])
        .arg(&graph)
        .arg("--scratch")
        .arg(dir.path().join("c.tmp"))
        .args(["--source", "9"])
        .assert()
        .failure();

    let corrupt = dir.path().join("corrupt.sgr");
    let mut bytes = fs::read(&graph).expect("read graph");
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    fs::write(&corrupt, bytes).expect("write graph");
    cargo_bin_cmd!("sage")
        .args(["info", "--graph"])
        .arg(&corrupt)
        .assert()
        .failure();
}
