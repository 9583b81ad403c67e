use std::path::Path;
use std::process::{Command, Output};

use basis_core::config::Dtype;
use basis_pipe::{
    generate, load_table, write_raw, PowerLaw, RunManifest, CONFIG_FILE, CSV_FILE, MANIFEST_FILE,
    TABLE_FILE,
};

fn basis_sim(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_basis-sim"))
        .args(args)
        .output()
        .expect("basis-sim runs")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("summary is JSON")
}

#[test]
fn demo_writes_a_verifiable_table() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("demo");
    let summary = stdout_json(&basis_sim(&[
        "demo",
        "--nmesh",
        "8",
        "--workers",
        "2",
        "--out",
        out.to_str().unwrap(),
    ]));
    assert_eq!(summary["pairs"], 15);
    for file in [TABLE_FILE, CSV_FILE, MANIFEST_FILE] {
        assert!(out.join(file).exists());
    }
    let table = load_table(&out.join(TABLE_FILE)).unwrap();
    assert_eq!(summary["table_hash"], table.table_hash.as_str());

    let inspected = basis_sim(&["inspect", "--table", out.join(TABLE_FILE).to_str().unwrap()]);
    assert!(inspected.status.success());
    let text = String::from_utf8_lossy(&inspected.stdout);
    assert!(text.contains("delta x s2"));
}

fn write_config(dir: &Path, extra: &str) -> std::path::PathBuf {
    let path = dir.join("run.yaml");
    std::fs::write(&path, format!("nmesh: 8\nbox_length: 100.0\nworkers: 2\n{extra}")).unwrap();
    path
}

#[test]
fn run_reads_raw_inputs_from_the_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let layout = basis_grid::GridLayout::new(8, 100.0, basis_grid::ProcessGrid::slab(1)).unwrap();
    let synthetic = generate(layout, PowerLaw::default(), 1.0, 5).unwrap();
    let density = dir.path().join("density.f32");
    let positions = dir.path().join("final.f32");
    write_raw(&density, &synthetic.density, Dtype::F32).unwrap();
    let flat: Vec<f64> = synthetic.final_positions.iter().flatten().copied().collect();
    write_raw(&positions, &flat, Dtype::F32).unwrap();

    let config = write_config(
        dir.path(),
        &format!(
            "fields: [\"1\", \"delta\"]\ninputs:\n  density: {}\n  final_positions: {}\n  particles_per_side: 8\n",
            density.display(),
            positions.display()
        ),
    );
    let out = dir.path().join("out");
    let summary = stdout_json(&basis_sim(&[
        "run",
        "--config",
        config.to_str().unwrap(),
        "--out",
        out.to_str().unwrap(),
    ]));
    assert_eq!(summary["pairs"], 3);
    let manifest = RunManifest::load(&out.join(MANIFEST_FILE)).unwrap();
    assert!(manifest.files.contains(&CONFIG_FILE.into()));
    let recorded = basis_core::RunConfig::load(&out.join(CONFIG_FILE)).unwrap();
    assert_eq!(recorded, manifest.config);
    assert!(load_table(&out.join(TABLE_FILE)).is_ok());
}

#[test]
fn validate_reports_the_plan_and_rejects_bad_layouts() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "process_grid: [2, 1]\n");
    let plan = stdout_json(&basis_sim(&["validate", "--config", config.to_str().unwrap()]));
    assert_eq!(plan["process_grid"], serde_json::json!([2, 1]));
    assert_eq!(plan["fields"].as_array().unwrap().len(), 5);
    assert_eq!(plan["line_of_sight"], serde_json::Value::Null);

    let rsd = write_config(
        dir.path(),
        "redshift_space:\n  line_of_sight: y\n  growth_rate: 0.5\n  multipoles: [0, 2]\n",
    );
    let plan = stdout_json(&basis_sim(&["validate", "--config", rsd.to_str().unwrap()]));
    assert_eq!(plan["line_of_sight"], 1);
    assert_eq!(plan["multipoles"], serde_json::json!([0, 2]));

    let bad = write_config(dir.path(), "process_grid: [3, 1]\n");
    let output = basis_sim(&["validate", "--config", bad.to_str().unwrap()]);
    assert!(!output.status.success());
}
