use basis_comm::launch;
use basis_grid::{DomainGrid, GridLayout, ProcessGrid};
use criterion::{criterion_group, criterion_main, Criterion};

fn bench_transform(c: &mut Criterion) {
    let n = 32;
    for (name, grid) in [
        ("transform_slab_4", ProcessGrid::slab(4)),
        ("transform_pencil_2x2", ProcessGrid::pencil(2, 2)),
    ] {
        let layout = GridLayout::new(n, 100.0, grid).expect("layout");
        c.bench_function(name, |b| {
            b.iter(|| {
                launch(layout.workers(), |comm| {
                    let domain = DomainGrid::new(layout, comm)?;
                    let field = domain.real_from_fn("bench", |[x, y, z]| (x + 2 * y + 3 * z) as f64)?;
                    let modes = domain.forward_transform(field)?;
                    domain.inverse_transform(modes).map(|_| ())
                })
                .expect("transform");
            });
        });
    }
}

criterion_group!(benches, bench_transform);
criterion_main!(benches);
