use std::io::Write;

use basis_core::config::{
    BinConfig, BoundaryOwner, Dtype, LineOfSight, MassAssignment, RunConfig, SampleKernel,
    ShotNoiseMode, TransferConfig,
};
use basis_core::provenance::RunProvenance;
use basis_core::{stable_hash_string, to_canonical_json_bytes, BasisError};

#[test]
fn minimal_yaml_fills_defaults() {
    let yaml = "nmesh: 32\nbox_length: 100.0\n";
    let config: RunConfig = serde_yaml::from_str(yaml).expect("parse");
    assert_eq!(config.workers, 1);
    assert_eq!(config.fields, vec!["1", "delta", "delta2", "s2", "nabla2"]);
    assert_eq!(config.painting.kernel, MassAssignment::Cic);
    assert_eq!(config.painting.sampling, SampleKernel::Nearest);
    assert_eq!(config.painting.boundary, BoundaryOwner::Right);
    assert!(config.painting.compensate);
    assert_eq!(config.shot_noise, ShotNoiseMode::Poisson);
    assert_eq!(config.inputs.density_dtype, Dtype::F32);
    assert!(matches!(config.bins, BinConfig::Linear { .. }));
    config.validate().expect("valid");
}

#[test]
fn tagged_bins_parse() {
    let yaml = r#"
nmesh: 16
box_length: 50.0
workers: 4
process_grid: [2, 2]
bins:
  spacing: log
  kmin: 0.01
  kmax: 1.0
  nbins: 12
painting:
  kernel: tsc
  sampling: trilinear
  boundary: left
shot_noise: weighted
"#;
    let config: RunConfig = serde_yaml::from_str(yaml).expect("parse");
    assert_eq!(config.process_grid, Some([2, 2]));
    assert_eq!(
        config.bins,
        BinConfig::Log {
            kmin: 0.01,
            kmax: 1.0,
            nbins: 12
        }
    );
    assert_eq!(config.painting.kernel, MassAssignment::Tsc);
    assert_eq!(config.painting.boundary, BoundaryOwner::Left);
    assert_eq!(config.shot_noise, ShotNoiseMode::Weighted);
}

#[test]
fn redshift_space_and_transfer_sections_parse() {
    let yaml = r#"
nmesh: 16
box_length: 50.0
transfer_function:
  k: [0.01, 0.1, 1.0]
  transfer: [1.0, 0.98, 0.9]
redshift_space:
  line_of_sight: x
  growth_rate: 0.75
  wedges: 3
"#;
    let config: RunConfig = serde_yaml::from_str(yaml).expect("parse");
    let rsd = config.redshift_space.clone().expect("redshift space");
    assert_eq!(rsd.line_of_sight, LineOfSight::X);
    assert_eq!(rsd.line_of_sight.axis(), 0);
    assert_eq!(rsd.multipoles, vec![0, 2, 4]);
    assert_eq!(rsd.wedges, 3);
    assert!(matches!(config.transfer_function, Some(TransferConfig::Table { ref k, .. }) if k.len() == 3));
    config.validate().expect("valid");

    let from_file: RunConfig =
        serde_yaml::from_str("nmesh: 8\nbox_length: 1.0\ntransfer_function:\n  file: t.csv\n").expect("parse");
    assert_eq!(
        from_file.transfer_function,
        Some(TransferConfig::File { file: "t.csv".into() })
    );
}

#[test]
fn malformed_redshift_space_sections_are_rejected() {
    let base = || {
        let mut config = RunConfig::new(16, 10.0);
        config.redshift_space = Some(basis_core::RedshiftSpaceConfig::new(LineOfSight::Z, 0.5));
        config
    };
    let mut odd = base();
    odd.redshift_space.as_mut().unwrap().multipoles = vec![0, 1];
    let mut repeated = base();
    repeated.redshift_space.as_mut().unwrap().multipoles = vec![2, 2];
    let mut infinite = base();
    infinite.redshift_space.as_mut().unwrap().growth_rate = f64::INFINITY;
    let mut ragged = RunConfig::new(16, 10.0);
    ragged.transfer_function = Some(TransferConfig::Table {
        k: vec![0.1, 0.2],
        transfer: vec![1.0],
    });
    for (config, code) in [
        (odd, "odd-multipole"),
        (repeated, "duplicate-multipole"),
        (infinite, "invalid-growth-rate"),
        (ragged, "transfer-table-shape"),
    ] {
        assert!(
            matches!(config.validate(), Err(BasisError::Configuration(ref info)) if info.code == code),
            "{code}"
        );
    }
    base().validate().expect("valid");
}

#[test]
fn invalid_scalars_are_configuration_errors() {
    let mut config = RunConfig::new(16, 10.0);
    config.box_length = -1.0;
    assert!(matches!(config.validate(), Err(BasisError::Configuration(_))));

    let mut config = RunConfig::new(16, 10.0);
    config.workers = 0;
    assert!(matches!(config.validate(), Err(BasisError::Configuration(_))));

    let mut config = RunConfig::new(16, 10.0);
    config.smoothing_kcut = Some(0.0);
    assert!(matches!(config.validate(), Err(BasisError::Configuration(_))));
}

#[test]
fn load_reads_yaml_from_disk() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    writeln!(file, "nmesh: 8\nbox_length: 20.0\nworkers: 2").expect("write");
    let config = RunConfig::load(file.path()).expect("load");
    assert_eq!(config.nmesh, 8);
    assert_eq!(config.workers, 2);
}

#[test]
fn canonical_hash_ignores_insertion_order() {
    let a = RunProvenance::default()
        .with_tool("basis-core", "0.1.0")
        .with_tool("basis-pk", "0.1.0");
    let b = RunProvenance::default()
        .with_tool("basis-pk", "0.1.0")
        .with_tool("basis-core", "0.1.0");
    assert_eq!(
        to_canonical_json_bytes(&a).expect("json"),
        to_canonical_json_bytes(&b).expect("json")
    );
    assert_eq!(
        stable_hash_string(&a).expect("hash"),
        stable_hash_string(&b).expect("hash")
    );
}
