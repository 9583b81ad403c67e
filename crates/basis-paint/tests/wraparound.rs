use basis_comm::launch;
use basis_core::config::{MassAssignment, PaintingConfig};
use basis_core::BasisError;
use basis_fields::{derive_fields, BiasField, FieldOptions};
use basis_grid::{DomainGrid, GridLayout, ProcessGrid};
use basis_paint::{lattice_positions, partition, ParticleBatch, Painter};

const N: usize = 8;
const L: f64 = 8.0;

/// Paints the unit field for the given final positions and returns the global grid.
fn paint_unit(grid: ProcessGrid, kernel: MassAssignment, finals: Vec<[f64; 3]>) -> Vec<f64> {
    let layout = GridLayout::new(N, L, grid).expect("layout");
    let workers = layout.workers();
    let config = PaintingConfig {
        kernel,
        ..PaintingConfig::default()
    };
    let per_worker = launch(workers, |comm| {
        let domain = DomainGrid::new(layout, comm)?;
        let density = domain.zeros("test")?;
        let fields = derive_fields(&domain, density, &[BiasField::One], &FieldOptions::default())?;
        let range = partition(finals.len(), workers, comm.rank());
        let initial = vec![[0.5, 0.5, 0.5]; range.len()];
        let batch = ParticleBatch::new(initial, finals[range].to_vec())?;
        let painter = Painter::new(&domain, &config)?;
        let painted = painter.paint_fields(&fields, &batch)?;
        let field = &painted[0].density;
        Ok(field
            .values()
            .iter()
            .enumerate()
            .map(|(offset, v)| (field.block().global_index(offset), *v))
            .collect::<Vec<_>>())
    })
    .expect("launch");
    let mut global = vec![0.0; N * N * N];
    for ([x, y, z], v) in per_worker.into_iter().flatten() {
        global[(x * N + y) * N + z] = v;
    }
    global
}

fn at(grid: &[f64], x: usize, y: usize, z: usize) -> f64 {
    grid[(x * N + y) * N + z]
}

#[test]
fn box_edge_mirrors_the_origin() {
    let eps = 0.125;
    for kernel in [MassAssignment::Ngp, MassAssignment::Cic, MassAssignment::Tsc] {
        let near_edge = paint_unit(ProcessGrid::slab(2), kernel, vec![[L - eps, 3.0, 3.0]]);
        let near_origin = paint_unit(ProcessGrid::slab(2), kernel, vec![[eps, 3.0, 3.0]]);
        for offset in 0..N {
            let mirrored = (N - offset) % N;
            assert!(
                (at(&near_origin, offset, 3, 3) - at(&near_edge, mirrored, 3, 3)).abs() < 1e-12,
                "{kernel:?} offset {offset}"
            );
        }
        let total: f64 = near_edge.iter().sum();
        assert!((total - (N * N * N) as f64).abs() < 1e-9);
    }
}

#[test]
fn positions_outside_the_box_are_wrapped_not_dropped() {
    let finals = vec![[-3.0, 1.0, 1.0], [L + 3.0, 1.0, 1.0], [5.0, 2.0 * L + 1.0, -L + 1.0]];
    let painted = paint_unit(ProcessGrid::pencil(2, 2), MassAssignment::Ngp, finals);
    let scale = (N * N * N) as f64 / 3.0;
    assert!((at(&painted, 5, 1, 1) - 2.0 * scale).abs() < 1e-9);
    assert!((at(&painted, 3, 1, 1) - scale).abs() < 1e-9);
}

#[test]
fn unperturbed_lattice_paints_a_uniform_grid() {
    let finals = lattice_positions(0..N * N * N, N, L);
    for kernel in [MassAssignment::Ngp, MassAssignment::Cic, MassAssignment::Tsc] {
        let painted = paint_unit(ProcessGrid::slab(4), kernel, finals.clone());
        assert!(painted.iter().all(|v| (v - 1.0).abs() < 1e-12), "{kernel:?}");
    }
}

#[test]
fn catalogue_length_mismatch_aborts_all_workers() {
    let layout = GridLayout::new(N, L, ProcessGrid::slab(2)).expect("layout");
    let err = launch(2, |comm| {
        let domain = DomainGrid::new(layout, comm)?;
        let initial = vec![[0.0; 3]; 4];
        let finals = vec![[0.0; 3]; if comm.rank() == 1 { 3 } else { 4 }];
        let batch = ParticleBatch::new(initial, finals)?;
        let fields = derive_fields(&domain, domain.zeros("test")?, &[BiasField::One], &FieldOptions::default())?;
        Painter::new(&domain, &PaintingConfig::default())?.paint_fields(&fields, &batch)?;
        Ok(())
    })
    .unwrap_err();
    assert!(matches!(err, BasisError::DataShape(ref info) if info.code == "catalogue-length"));
}
