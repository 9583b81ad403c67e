use basis_core::config::MassAssignment;
use basis_core::{from_json_slice, to_canonical_json_bytes};
use basis_pk::{FieldSummary, Multipole, SpectrumPair, SpectrumRow, SpectrumTable, Wedge};

fn table() -> SpectrumTable {
    let rows = vec![
        SpectrumRow {
            k_center: 0.5,
            k_mean: None,
            power: None,
            modes: 0,
        },
        SpectrumRow {
            k_center: 1.5,
            k_mean: Some(1.4),
            power: Some(12.5),
            modes: 26,
        },
    ];
    let summary = |label: &str| FieldSummary {
        label: label.to_string(),
        growth_order: Some(1),
        particles: 64,
        weight_sum: 0.0,
        mean_weight_sq: 0.1,
    };
    SpectrumTable {
        schema: Default::default(),
        catalogue_version: 1,
        nmesh: 8,
        box_length: 10.0,
        kernel: MassAssignment::Cic,
        compensated: true,
        edges: vec![0.0, 1.0, 2.0],
        line_of_sight: None,
        fields: vec![summary("1"), summary("delta")],
        pairs: vec![
            SpectrumPair {
                a: "1".into(),
                b: "1".into(),
                shot_noise: 15.6,
                rows: rows.clone(),
                multipoles: Vec::new(),
                wedges: Vec::new(),
            },
            SpectrumPair {
                a: "1".into(),
                b: "delta".into(),
                shot_noise: 0.0,
                rows,
                multipoles: Vec::new(),
                wedges: Vec::new(),
            },
        ],
        table_hash: String::new(),
    }
    .seal()
    .expect("seal")
}

#[test]
fn json_round_trip_keeps_the_hash_valid() {
    let table = table();
    let bytes = to_canonical_json_bytes(&table).expect("json");
    let decoded: SpectrumTable = from_json_slice(&bytes).expect("decode");
    assert_eq!(decoded, table);
    assert!(decoded.verify_hash().expect("hash"));

    let mut tampered = decoded.clone();
    tampered.pairs[0].shot_noise = 0.0;
    assert!(!tampered.verify_hash().expect("hash"));
}

#[test]
fn lookup_is_symmetric() {
    let table = table();
    assert_eq!(table.get("delta", "1"), table.get("1", "delta"));
    assert!(table.get("delta", "delta").is_none());
    assert_eq!(table.labels(), vec!["1", "delta"]);
}

#[test]
fn csv_has_one_row_per_pair_and_bin() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("spectra.csv");
    table().write_csv_file(&path).expect("csv");
    let text = std::fs::read_to_string(path).expect("read");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 1 + 2 * 2);
    assert_eq!(lines[0], "a,b,statistic,k_center,k_mean,power,modes,shot_noise");
    assert_eq!(lines[1], "1,1,power,0.5,,,0,15.6");
}

#[test]
fn anisotropic_statistics_are_hashed_and_exported() {
    let mut table = table();
    table.line_of_sight = Some(2);
    let rows = table.pairs[0].rows.clone();
    table.pairs[0].multipoles = vec![Multipole {
        ell: 2,
        power: vec![None, Some(-3.0)],
    }];
    table.pairs[0].wedges = vec![Wedge {
        mu_min: 0.5,
        mu_max: 1.0,
        rows,
    }];
    assert!(!table.verify_hash().expect("hash"));
    let table = table.seal().expect("seal");

    let bytes = to_canonical_json_bytes(&table).expect("json");
    let decoded: SpectrumTable = from_json_slice(&bytes).expect("decode");
    assert_eq!(decoded, table);
    assert!(decoded.verify_hash().expect("hash"));

    let mut csv = Vec::new();
    table.write_csv(&mut csv).expect("csv");
    let text = String::from_utf8(csv).expect("utf8");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 1 + 2 * 2 + 2 + 2);
    assert!(lines.contains(&"1,1,ell2,1.5,1.4,-3,26,15.6"));
    assert!(lines.contains(&"1,1,mu0.5-1,1.5,1.4,12.5,26,15.6"));
}

#[test]
fn isotropic_tables_omit_line_of_sight_members() {
    let json = String::from_utf8(to_canonical_json_bytes(&table()).expect("json")).expect("utf8");
    assert!(!json.contains("multipoles"));
    assert!(!json.contains("line_of_sight"));
}
