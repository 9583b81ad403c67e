use basis_comm::launch;
use basis_grid::{DomainGrid, GridLayout, HaloPlan, HaloWidth, ProcessGrid};

fn encode([x, y, z]: [usize; 3]) -> f64 {
    (x * 10_000 + y * 100 + z) as f64
}

#[test]
fn fill_copies_periodic_neighbours() {
    let n = 6;
    for grid in [ProcessGrid::slab(3), ProcessGrid::pencil(3, 2), ProcessGrid::slab(1)] {
        let layout = GridLayout::new(n, 1.0, grid).expect("layout");
        let mismatches = launch(layout.workers(), |comm| {
            let domain = DomainGrid::new(layout, comm)?;
            let plan = HaloPlan::build(&domain, HaloWidth::new(1, 1))?;
            let field = domain.real_from_fn("test", encode)?;
            let halo = plan.fill(&domain, &field)?;
            let block = domain.real_block();
            let mut bad = 0;
            block.region().for_each(|anchor| {
                for dx in -1i64..=1 {
                    for dy in -1i64..=1 {
                        for dz in -2i64..=2 {
                            let expected = encode([
                                layout.wrap_index(anchor[0] as i64 + dx),
                                layout.wrap_index(anchor[1] as i64 + dy),
                                layout.wrap_index(anchor[2] as i64 + dz),
                            ]);
                            if halo.value_around(anchor, [dx, dy, dz]) != expected {
                                bad += 1;
                            }
                        }
                    }
                }
            });
            Ok(bad)
        })
        .expect("launch");
        assert!(mismatches.iter().all(|&bad| bad == 0), "{grid:?}: {mismatches:?}");
    }
}

#[test]
fn accumulate_returns_ghost_deposits_to_owners() {
    let n = 4;
    let layout = GridLayout::new(n, 1.0, ProcessGrid::pencil(2, 2)).expect("layout");
    let totals = launch(4, |comm| {
        let domain = DomainGrid::new(layout, comm)?;
        let plan = HaloPlan::build(&domain, HaloWidth::new(0, 1))?;
        let mut halo = plan.zeros("test")?;
        // Every worker deposits one unit at the far corner of its block plus one
        // in the ghost cell beyond it.
        let block = domain.real_block();
        let corner = [
            block.start[0] + block.shape[0] - 1,
            block.start[1] + block.shape[1] - 1,
            n - 1,
        ];
        halo.add_around(corner, [0, 0, 0], 1.0);
        halo.add_around(corner, [1, 1, 1], 1.0);
        let field = plan.accumulate(&domain, halo)?;
        let total = domain.global_sum("total", &field)?;
        let origin = field.get([0, 0, 0]);
        Ok((total, origin))
    })
    .expect("launch");
    for (total, _) in &totals {
        assert_eq!(*total, 8.0);
    }
    // Rank 3's ghost at (4, 4, 4) wraps onto (0, 0, 0) owned by rank 0.
    assert_eq!(totals[0].1, Some(1.0));
}
