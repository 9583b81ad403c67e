use std::f64::consts::PI;

use basis_comm::launch;
use basis_grid::{Complex64, DomainGrid, GridLayout, ProcessGrid};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_grid(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n * n * n).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

fn round_trip_error(n: usize, grid: ProcessGrid, seed: u64) -> f64 {
    let input = random_grid(n, seed);
    let layout = GridLayout::new(n, 100.0, grid).expect("layout");
    let errors = launch(layout.workers(), |comm| {
        let domain = DomainGrid::new(layout, comm)?;
        let field = domain.real_from_fn("test", |[x, y, z]| input[(x * n + y) * n + z])?;
        let modes = domain.forward_transform(field)?;
        let back = domain.inverse_transform(modes)?;
        let mut worst = 0.0f64;
        for (offset, value) in back.values().iter().enumerate() {
            let [x, y, z] = back.block().global_index(offset);
            worst = worst.max((value - input[(x * n + y) * n + z]).abs());
        }
        Ok(worst)
    })
    .expect("launch");
    errors.into_iter().fold(0.0, f64::max)
}

#[test]
fn slab_and_pencil_round_trips_are_exact() {
    assert!(round_trip_error(8, ProcessGrid::slab(1), 1) < 1e-12);
    assert!(round_trip_error(8, ProcessGrid::slab(4), 2) < 1e-12);
    assert!(round_trip_error(8, ProcessGrid::pencil(2, 2), 3) < 1e-12);
    assert!(round_trip_error(6, ProcessGrid::pencil(3, 2), 4) < 1e-12);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]
    #[test]
    fn round_trip_holds_for_any_dividing_layout(p0 in 1usize..4, p1 in 1usize..3, seed in 0u64..1000) {
        let n = p0 * p1 * 2;
        prop_assert!(round_trip_error(n, ProcessGrid::pencil(p0, p1), seed) < 1e-11);
    }
}

#[test]
fn forward_matches_a_direct_dft() {
    let n = 4;
    let input = random_grid(n, 17);
    let layout = GridLayout::new(n, 1.0, ProcessGrid::pencil(2, 2)).expect("layout");
    let direct = |k: [usize; 3]| {
        let mut sum = Complex64::new(0.0, 0.0);
        for x in 0..n {
            for y in 0..n {
                for z in 0..n {
                    let phase = -2.0 * PI * ((k[0] * x + k[1] * y + k[2] * z) as f64) / n as f64;
                    sum += Complex64::from_polar(input[(x * n + y) * n + z], phase);
                }
            }
        }
        sum / (n * n * n) as f64
    };
    let worst = launch(layout.workers(), |comm| {
        let domain = DomainGrid::new(layout, comm)?;
        let field = domain.real_from_fn("test", |[x, y, z]| input[(x * n + y) * n + z])?;
        let modes = domain.forward_transform(field)?;
        let mut worst = 0.0f64;
        for (offset, mode) in modes.modes().iter().enumerate() {
            let k = modes.block().global_index(offset);
            worst = worst.max((mode - direct(k)).norm());
        }
        Ok(worst)
    })
    .expect("launch");
    assert!(worst.into_iter().fold(0.0, f64::max) < 1e-12);
}

#[test]
fn cosine_lands_in_two_modes() {
    let n = 8;
    let layout = GridLayout::new(n, 1.0, ProcessGrid::slab(2)).expect("layout");
    let found = launch(2, |comm| {
        let domain = DomainGrid::new(layout, comm)?;
        let field = domain.real_from_fn("test", |[x, _, _]| (2.0 * PI * 2.0 * x as f64 / n as f64).cos())?;
        let modes = domain.forward_transform(field)?;
        Ok(modes
            .modes()
            .iter()
            .enumerate()
            .filter(|(_, m)| m.norm() > 1e-9)
            .map(|(offset, m)| (modes.block().global_index(offset), m.re))
            .collect::<Vec<_>>())
    })
    .expect("launch");
    let mut all: Vec<_> = found.into_iter().flatten().collect();
    all.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].0, [2, 0, 0]);
    assert_eq!(all[1].0, [6, 0, 0]);
    assert!((all[0].1 - 0.5).abs() < 1e-12);
}

#[test]
fn mismatched_group_size_is_rejected() {
    let layout = GridLayout::new(8, 1.0, ProcessGrid::slab(4)).expect("layout");
    let err = launch(2, |comm| DomainGrid::new(layout, comm).map(|_| ())).unwrap_err();
    assert!(matches!(err, basis_core::BasisError::Configuration(_)));
}

#[test]
fn local_slice_positions_use_block_offsets() {
    let layout = GridLayout::new(4, 8.0, ProcessGrid::pencil(2, 2)).expect("layout");
    let positions = launch(4, |comm| {
        let domain = DomainGrid::new(layout, comm)?;
        let field = domain.zeros("test")?;
        let slice = field.local_slice(&layout);
        Ok(slice.position([1, 1, 3]))
    })
    .expect("launch");
    assert_eq!(positions[0], [2.0, 2.0, 6.0]);
    assert_eq!(positions[3], [6.0, 6.0, 6.0]);
}
