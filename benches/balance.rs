use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use nalgebra::Vector3 as Vec3;

use standable::config::OptimizerConfig;
use standable::driver::Driver;
use standable::handles::{Handles, ObjectiveSpec};
use standable::inner_mesh::InnerMesh;
use standable::mesh::Mesh;
use standable::optimizer::{Objective, Optimizer};
use standable::qp::ProjectedGradientQp;
use standable::support::PlanarSupport;
use standable::voxel_grid::VoxelGrid;

fn cube() -> (Vec<Vec3>, Vec<[usize; 3]>) {
    let v = (0u8..8)
        .map(|i| Vec3::new((i % 2) as f64, ((i / 2) % 2) as f64, if i > 3 { 1.0 } else { 0.0 }))
        .collect();
    let f = vec![
        [0, 2, 1],
        [0, 3, 2],
        [4, 5, 6],
        [4, 6, 7],
        [0, 1, 5],
        [0, 5, 4],
        [1, 2, 6],
        [1, 6, 5],
        [2, 3, 7],
        [2, 7, 6],
        [3, 0, 4],
        [3, 4, 7],
    ];
    (v, f)
}

fn full_grid(resolution: usize) -> VoxelGrid {
    let n = resolution * resolution * resolution;
    let mut grid = VoxelGrid::init_from_occupancy(resolution, &vec![true; n]);
    grid.init_structure().unwrap();
    grid
}

/// A cube standing off-centre on a small footprint, one user handle at its
/// centroid, ready to take an outer iteration. Mirrors spec §8 scenario 4's
/// setup but at a driver-level granularity rather than a single gradient.
fn setup(resolution: usize) -> (Mesh, VoxelGrid, InnerMesh, Handles, Vec<Objective>, Driver) {
    let (v, f) = cube();
    let mut mesh = Mesh::from_vertices_and_faces(v, f).unwrap();
    let mut grid = full_grid(resolution);

    let off_centre_polygon = vec![
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(0.3, 0.0, 0.0),
        Vec3::new(0.3, 0.0, 0.3),
        Vec3::new(0.0, 0.0, 0.3),
    ];
    let objective_specs = vec![ObjectiveSpec::Standing {
        polygon: off_centre_polygon.clone(),
    }];
    let mut handles = Handles::new(&objective_specs, &[Vec3::new(0.5, 0.5, 0.5)], &grid).unwrap();
    grid.compute_bbw(&handles, &ProjectedGradientQp::default()).unwrap();
    mesh.compute_bbw(&handles, &grid).unwrap();
    grid.update_poses(&handles);
    mesh.update_poses(&handles);

    let mut inner_mesh = InnerMesh::new();
    inner_mesh.compute(&grid);

    let initial_com = standable::optimizer::evaluate(&mesh, &grid, &inner_mesh, &[]).com;
    let objective = Objective::new(Box::new(PlanarSupport::new(off_centre_polygon)), Vec3::new(0.0, -1.0, 0.0), 0.1, &initial_com);
    let objectives = vec![objective];

    let optimizer = Optimizer::prepare(&mesh, &handles);
    let driver = Driver::new(OptimizerConfig::default(), optimizer);

    (mesh, grid, inner_mesh, handles, objectives, driver)
}

fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("driver_step");

    for resolution in [4usize, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(resolution), &resolution, |b, &resolution| {
            b.iter_batched(
                || setup(resolution),
                |(mut mesh, mut grid, mut inner_mesh, mut handles, objectives, mut driver)| {
                    driver.step(&mut mesh, &mut grid, &mut inner_mesh, &mut handles, &objectives);
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
