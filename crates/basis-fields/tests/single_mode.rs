use std::f64::consts::PI;

use basis_comm::launch;
use basis_fields::{
    derive_fields, prepare_density, tidal_squared, BiasField, FieldOptions, TransferFunction,
};
use basis_grid::{DomainGrid, GridLayout, ProcessGrid};

const N: usize = 8;

fn cosine([x, _, _]: [usize; 3]) -> f64 {
    (2.0 * PI * x as f64 / N as f64).cos()
}

/// Runs `derive_fields` on a unit-wavenumber cosine (box `2 pi`) and returns
/// the worst deviation from `expected` per field.
fn worst_errors(
    grid: ProcessGrid,
    options: FieldOptions,
    density: fn([usize; 3]) -> f64,
    expected: fn(BiasField, [usize; 3]) -> f64,
) -> Vec<(BiasField, f64)> {
    let layout = GridLayout::new(N, 2.0 * PI, grid).expect("layout");
    let per_worker = launch(layout.workers(), |comm| {
        let domain = DomainGrid::new(layout, comm)?;
        let delta = domain.real_from_fn("test", density)?;
        let fields = derive_fields(&domain, delta, &BiasField::ALL, &options)?;
        Ok(fields
            .iter()
            .map(|(field, values)| {
                let worst = values
                    .values()
                    .iter()
                    .enumerate()
                    .map(|(offset, v)| (v - expected(field, values.block().global_index(offset))).abs())
                    .fold(0.0, f64::max);
                (field, worst)
            })
            .collect::<Vec<_>>())
    })
    .expect("launch");
    let mut merged = per_worker[0].clone();
    for worker in &per_worker[1..] {
        for (slot, (_, worst)) in merged.iter_mut().zip(worker) {
            slot.1 = slot.1.max(*worst);
        }
    }
    merged
}

fn single_mode_expectation(field: BiasField, g: [usize; 3]) -> f64 {
    let d = cosine(g);
    match field {
        BiasField::One => 1.0,
        BiasField::Delta => d,
        BiasField::DeltaSquared => d * d - 0.5,
        BiasField::TidalSquared => 2.0 / 3.0 * (d * d - 0.5),
        BiasField::LaplacianDelta => -d,
    }
}

#[test]
fn single_mode_fields_match_closed_forms() {
    for grid in [ProcessGrid::slab(1), ProcessGrid::slab(2), ProcessGrid::pencil(2, 2)] {
        for (field, worst) in worst_errors(grid, FieldOptions::default(), cosine, single_mode_expectation) {
            assert!(worst < 1e-10, "{field} on {grid:?}: {worst}");
        }
    }
}

#[test]
fn constant_offset_does_not_leak_into_k_operators() {
    fn shifted(g: [usize; 3]) -> f64 {
        1.0 + cosine(g)
    }
    fn expected(field: BiasField, g: [usize; 3]) -> f64 {
        match field {
            BiasField::Delta => 1.0 + cosine(g),
            BiasField::DeltaSquared => {
                let d = 1.0 + cosine(g);
                d * d - 1.5
            }
            other => single_mode_expectation(other, g),
        }
    }
    for (field, worst) in worst_errors(ProcessGrid::slab(2), FieldOptions::default(), shifted, expected) {
        assert!(worst < 1e-10, "{field}: {worst}");
    }
}

#[test]
fn growth_and_smoothing_rescale_the_mode() {
    let kcut = 2.0;
    let scale = 3.0 * (-1.0f64 / (2.0 * kcut * kcut)).exp();
    let layout = GridLayout::new(N, 2.0 * PI, ProcessGrid::slab(2)).expect("layout");
    let options = FieldOptions {
        growth_factor: 3.0,
        smoothing_kcut: Some(kcut),
        transfer: None,
    };
    let worst = launch(2, |comm| {
        let domain = DomainGrid::new(layout, comm)?;
        let delta = domain.real_from_fn("test", cosine)?;
        let fields = derive_fields(&domain, delta, &[BiasField::Delta], &options)?;
        let values = fields.get(BiasField::Delta).expect("delta");
        Ok(values
            .values()
            .iter()
            .enumerate()
            .map(|(offset, v)| (v - scale * cosine(values.block().global_index(offset))).abs())
            .fold(0.0, f64::max))
    })
    .expect("launch");
    assert!(worst.iter().all(|w| *w < 1e-10), "{worst:?}");
}

#[test]
fn transfer_function_rescales_each_shell() {
    fn two_modes([x, _, _]: [usize; 3]) -> f64 {
        let phase = 2.0 * PI * x as f64 / N as f64;
        0.25 + phase.cos() + 0.5 * (2.0 * phase).cos()
    }
    // T(k) = 1 + k / 2, so T(1) = 1.5 and T(2) = 2; the mean is untouched.
    fn expected([x, _, _]: [usize; 3]) -> f64 {
        let phase = 2.0 * PI * x as f64 / N as f64;
        0.25 + 1.5 * phase.cos() + (2.0 * phase).cos()
    }
    let options = FieldOptions {
        transfer: Some(TransferFunction::new(vec![0.0, 4.0], vec![1.0, 3.0]).expect("table")),
        ..FieldOptions::default()
    };
    let layout = GridLayout::new(N, 2.0 * PI, ProcessGrid::pencil(2, 2)).expect("layout");
    let worst = launch(4, |comm| {
        let domain = DomainGrid::new(layout, comm)?;
        let density = domain.real_from_fn("test", two_modes)?;
        let prepared = prepare_density(&domain, density, &options)?;
        Ok(prepared
            .values()
            .iter()
            .enumerate()
            .map(|(offset, v)| (v - expected(prepared.block().global_index(offset))).abs())
            .fold(0.0, f64::max))
    })
    .expect("launch");
    assert!(worst.iter().all(|w| *w < 1e-10), "{worst:?}");
}

#[test]
fn tidal_scalar_of_diagonal_mode_is_isotropic() {
    // A mode along (1, 1, 0): s_xx = s_yy = 1/6, s_zz = -1/3, s_xy = 1/2 (times delta),
    // so s^2 = (1/36 + 1/36 + 1/9 + 2/4) delta^2 = 2/3 delta^2.
    fn diagonal([x, y, _]: [usize; 3]) -> f64 {
        (2.0 * PI * (x + y) as f64 / N as f64).cos()
    }
    let layout = GridLayout::new(N, 2.0 * PI, ProcessGrid::pencil(2, 2)).expect("layout");
    let worst = launch(4, |comm| {
        let domain = DomainGrid::new(layout, comm)?;
        let delta = domain.real_from_fn("test", diagonal)?;
        let delta_k = domain.forward_transform(delta)?;
        let s2 = tidal_squared(&domain, &delta_k)?;
        Ok(s2
            .values()
            .iter()
            .enumerate()
            .map(|(offset, v)| {
                let d = diagonal(s2.block().global_index(offset));
                (v - 2.0 / 3.0 * d * d).abs()
            })
            .fold(0.0, f64::max))
    })
    .expect("launch");
    assert!(worst.iter().all(|w| *w < 1e-10), "{worst:?}");
}

#[test]
fn non_finite_density_aborts_every_worker() {
    let layout = GridLayout::new(N, 1.0, ProcessGrid::slab(2)).expect("layout");
    let err = launch(2, |comm| {
        let domain = DomainGrid::new(layout, comm)?;
        let delta = domain.real_from_fn("test", |[x, y, z]| {
            if (x, y, z) == (7, 0, 0) {
                f64::NAN
            } else {
                0.0
            }
        })?;
        derive_fields(&domain, delta, &BiasField::ALL, &FieldOptions::default()).map(|_| ())
    })
    .unwrap_err();
    assert!(matches!(err, basis_core::BasisError::NumericDivergence(_)));
}
