use basis_comm::{launch, Stage};
use basis_core::{BasisError, ErrorInfo};

#[test]
fn failing_worker_releases_peers_blocked_in_a_barrier() {
    let err = launch(4, |comm| {
        if comm.rank() == 2 {
            return Err(BasisError::DataShape(
                ErrorInfo::new("catalogue-mismatch", "initial and final lengths differ")
                    .with_context("rank", comm.rank()),
            ));
        }
        comm.await_all(Stage::LagrangianFields)?;
        comm.await_all(Stage::Painting)
    })
    .expect_err("group must abort");

    // The originating error wins over the peers' group-aborted errors.
    assert!(matches!(err, BasisError::DataShape(_)));
    assert_eq!(err.info().code, "catalogue-mismatch");
}

#[test]
fn peers_observe_group_abort() {
    let outcomes = std::sync::Mutex::new(Vec::new());
    let _ = launch(3, |comm| {
        let result = if comm.rank() == 0 {
            Err(BasisError::protocol("boom", "worker zero failed"))
        } else {
            comm.barrier("never-completes")
        };
        if let Err(err) = &result {
            outcomes
                .lock()
                .expect("lock")
                .push((comm.rank(), err.info().code.clone()));
        }
        result
    });
    let mut outcomes = outcomes.into_inner().expect("lock");
    outcomes.sort();
    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0], (0, "boom".to_string()));
    assert_eq!(outcomes[1].1, "group-aborted");
    assert_eq!(outcomes[2].1, "group-aborted");
}

#[test]
fn panicking_worker_aborts_the_group() {
    let err = launch(2, |comm| {
        if comm.rank() == 1 {
            panic!("slab allocation failed");
        }
        comm.barrier("after-panic")
    })
    .expect_err("group must abort");
    assert_eq!(err.info().code, "worker-panic");
    assert!(err.info().message.contains("slab allocation failed"));
}

#[test]
fn divergent_collectives_are_detected_on_all_workers() {
    let err = launch(2, |comm| {
        if comm.rank() == 0 {
            comm.await_all(Stage::Painting)
        } else {
            comm.await_all(Stage::Spectra)
        }
    })
    .expect_err("mismatch");
    assert_eq!(err.info().code, "collective-mismatch");
}

#[test]
fn wrong_all_to_all_arity_is_a_protocol_error() {
    let err = launch(2, |comm| {
        let outgoing: Vec<Vec<u8>> = vec![Vec::new(); comm.size() + comm.rank()];
        comm.all_to_all("arity", outgoing).map(|_| ())
    })
    .expect_err("arity");
    assert_eq!(err.info().code, "all-to-all-arity");
}
