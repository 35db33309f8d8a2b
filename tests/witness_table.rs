use autodiff::autodiff::IndexSubset;
use autodiff::differentiation::witness::single_result_config;
use autodiff::differentiation::{DifferentiabilityWitness, ExportedWitness, WitnessError, WitnessTable};
use expect_test::expect;
use tempfile::tempdir;

fn witness(original: &str, capacity: usize, params: &[usize], suffix: &str) -> DifferentiabilityWitness {
    DifferentiabilityWitness {
        original: original.into(),
        config: single_result_config(IndexSubset::from_indices(capacity, params.iter().copied()), None),
        jvp: format!("AD__{original}__jvp_{suffix}"),
        vjp: format!("AD__{original}__vjp_{suffix}"),
    }
}

#[test]
fn duplicate_registration_keeps_first_witness() {
    let mut table = WitnessTable::new();
    table
        .register(witness("f", 2, &[0], "first"))
        .expect("first registration");
    let err = table
        .register(witness("f", 2, &[0], "second"))
        .expect_err("duplicate key");
    let WitnessError::Duplicate { key } = &err;
    assert_eq!(key.original, "f");
    assert_eq!(
        err.to_string(),
        "a differentiability witness for 'f' with parameter indices {0} already exists"
    );
    assert_eq!(table.len(), 1);
    let config = single_result_config(IndexSubset::from_indices(2, [0]), None);
    let kept = table.lookup("f", &config).expect("kept witness");
    assert_eq!(kept.vjp, "AD__f__vjp_first");
}

#[test]
fn minimal_superset_prefers_fewest_parameters() {
    let mut table = WitnessTable::new();
    table.register(witness("g", 3, &[0, 1, 2], "all")).expect("all");
    table.register(witness("g", 3, &[0, 2], "outer")).expect("outer");
    table.register(witness("h", 3, &[0], "other")).expect("other");

    let wanted = IndexSubset::from_indices(3, [2]);
    let found = table.find_minimal_superset("g", &wanted).expect("superset");
    assert_eq!(found.vjp, "AD__g__vjp_outer");

    let middle = IndexSubset::from_indices(3, [1]);
    let found = table.find_minimal_superset("g", &middle).expect("superset");
    assert_eq!(found.vjp, "AD__g__vjp_all");

    assert!(table.find_minimal_superset("h", &wanted).is_none());
    assert!(table.find_minimal_superset("missing", &wanted).is_none());
}

#[test]
fn export_round_trips_through_a_file() {
    let mut table = WitnessTable::new();
    table
        .register(witness("f", 2, &[0, 1], "src_0_wrt_0_1"))
        .expect("register");
    expect![[r#"
[
  {
    "original": "f",
    "parameter_count": 2,
    "parameter_indices": [
      0,
      1
    ],
    "result_indices": [
      0
    ],
    "jvp": "AD__f__jvp_src_0_wrt_0_1",
    "vjp": "AD__f__vjp_src_0_wrt_0_1"
  }
]"#]]
    .assert_eq(&table.to_json().expect("json"));

    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("witnesses.json");
    table.write_to(&path).expect("write witnesses");
    let contents = std::fs::read_to_string(&path).expect("read witnesses");
    let parsed = ExportedWitness::parse_all(&contents).expect("parse witnesses");
    assert_eq!(parsed, table.export());
    assert_eq!(parsed[0].generic_signature, None);
}

#[test]
fn malformed_export_is_an_error() {
    assert!(ExportedWitness::parse_all("{\"original\": 3}").is_err());
}
