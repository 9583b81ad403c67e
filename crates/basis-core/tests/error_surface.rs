use basis_core::errors::{try_alloc, BasisError, ErrorInfo};

fn sample_info(code: &str, message: &str) -> ErrorInfo {
    ErrorInfo::new(code, message)
        .with_context("stage", "painting")
        .with_context("rank", 3)
}

#[test]
fn configuration_error_surface() {
    let err = BasisError::Configuration(sample_info("C001", "nmesh not divisible"));
    assert_eq!(err.info().code, "C001");
    assert!(err.info().context.contains_key("stage"));
    assert_eq!(err.info().context["rank"], "3");
}

#[test]
fn data_shape_error_surface() {
    let err = BasisError::DataShape(sample_info("D001", "catalogue length mismatch"));
    assert_eq!(err.info().code, "D001");
}

#[test]
fn protocol_abort_is_recognised() {
    let err = BasisError::protocol("group-aborted", "worker 1 failed");
    assert!(err.is_group_abort());
    let other = BasisError::protocol("tag-mismatch", "desync");
    assert!(!other.is_group_abort());
}

#[test]
fn display_includes_context_and_hint() {
    let err = BasisError::Configuration(
        ErrorInfo::new("bad-grid", "grid mismatch")
            .with_context("nmesh", 30)
            .with_hint("use a multiple of the worker count"),
    );
    let text = err.to_string();
    assert!(text.starts_with("configuration error: grid mismatch (code: bad-grid)"));
    assert!(text.contains("nmesh=30"));
    assert!(text.contains("hint: use a multiple"));
}

#[test]
fn errors_round_trip_through_json() {
    let err = BasisError::NumericDivergence(sample_info("N001", "nan in density"));
    let json = serde_json::to_string(&err).expect("serialize");
    assert!(json.contains("\"family\":\"NumericDivergence\""));
    let decoded: BasisError = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(decoded, err);
}

#[test]
fn small_allocations_succeed() {
    let buffer: Vec<f64> = try_alloc(64, "test").expect("alloc");
    assert_eq!(buffer.len(), 64);
    assert!(buffer.iter().all(|value| *value == 0.0));
}

#[test]
fn impossible_allocations_surface_resource_exhaustion() {
    let err = try_alloc::<f64>(usize::MAX / 2, "painting").expect_err("must fail");
    match err {
        BasisError::ResourceExhaustion(info) => {
            assert_eq!(info.context["stage"], "painting");
            assert!(info.hint.is_some());
        }
        other => panic!("unexpected error {other:?}"),
    }
}
