//! The hollow's inner wall: the quad surface separating filled boxes from
//! carved or absent ones (spec §3/§4.E). Rebuilt from scratch each time fill
//! status changes; there's no incremental update because plane carving can
//! flip an arbitrary subset of boxes in one step.

use crate::geometry::mass_properties::{triangle_mass_grad, MassProperties};
use crate::helpers::aliases::{Mat3, Vec3};
use crate::voxel_grid::VoxelGrid;

/// Per [`crate::voxel_grid::NEIGHBOR_OFFSETS`] direction, the box-corner bit
/// indices (lexicographic `(dx,dy,dz)` per [`VoxelGrid::box_nodes`]) of that
/// face's quad, wound so the normal points along the direction itself — i.e.
/// outward from the box. This is the same table
/// [`crate::geometry::mass_properties::MassProperties::add_box`] uses,
/// reordered to match `NEIGHBOR_OFFSETS`' `-x,+x,-y,+y,-z,+z`.
const QUAD_FACES: [[usize; 4]; 6] = [
    [0, 2, 6, 4], // -x
    [1, 5, 7, 3], // +x
    [0, 4, 5, 1], // -y
    [2, 3, 7, 6], // +y
    [0, 1, 3, 2], // -z
    [4, 6, 7, 5], // +z
];

#[derive(Debug, Clone, Copy)]
pub struct Quad {
    pub nodes: [usize; 4],
}

/// The derived boundary between filled and carved/absent boxes.
#[derive(Debug, Clone, Default)]
pub struct InnerMesh {
    quads: Vec<Quad>,
}

impl InnerMesh {
    pub fn new() -> Self {
        Self { quads: Vec::new() }
    }

    pub fn quads(&self) -> &[Quad] {
        &self.quads
    }

    /// Rebuilds the quad list from `grid`'s current fill status. A quad is
    /// emitted for every `(filled box, direction)` whose neighbour across
    /// that direction is either outside the active set or carved.
    pub fn compute(&mut self, grid: &VoxelGrid) {
        self.quads = grid
            .filled_boxes()
            .flat_map(|k| {
                let corners = grid.box_nodes(k);
                (0..6).filter_map(move |dir| {
                    let exposed = match grid.box_neighbor(k, dir) {
                        Some(neighbor) => !grid.is_filled(neighbor),
                        None => true,
                    };
                    exposed.then(|| {
                        let face = QUAD_FACES[dir];
                        Quad {
                            nodes: [
                                corners[face[0]],
                                corners[face[1]],
                                corners[face[2]],
                                corners[face[3]],
                            ],
                        }
                    })
                })
            })
            .collect();
    }

    /// Volume and first moment of volume enclosed by the inner surface, no
    /// derivatives.
    pub fn mass_and_com(&self, grid: &VoxelGrid) -> MassProperties {
        let mut props = MassProperties::zero();
        for quad in &self.quads {
            let [a, b, c, d] = quad.nodes.map(|n| grid.node_current_pose(n));
            props.add_quad(&a, &b, &c, &d);
        }
        props
    }

    /// Same integrals, plus `d(mass)/d(node)` and `d(moment)/d(node)` for
    /// every active grid node. Each quad contributes to exactly 4 nodes, so
    /// unlike Mesh's per-vertex scatter (spec §5(v)) there's no precomputed
    /// node-to-quad adjacency here — the scatter is keyed by a flat
    /// accumulator instead, since `InnerMesh` is rebuilt wholesale on every
    /// carve and a persistent adjacency would be stale as often as not.
    pub fn mass_and_com_with_grad(&self, grid: &VoxelGrid) -> (MassProperties, Vec<Vec3>, Vec<Mat3>) {
        let num_nodes = grid.num_nodes();
        let mut d_mass = vec![Vec3::zeros(); num_nodes];
        let mut d_moment = vec![Mat3::zeros(); num_nodes];

        // Each quad splits into (a,b,c) + (c,d,a), matching `add_quad`.
        for quad in &self.quads {
            let positions = quad.nodes.map(|n| grid.node_current_pose(n));
            let triangles: [[usize; 3]; 2] = [[0, 1, 2], [2, 3, 0]];
            for tri in triangles {
                let grad = triangle_mass_grad(&positions[tri[0]], &positions[tri[1]], &positions[tri[2]]);
                for (local, &bit) in tri.iter().enumerate() {
                    let node = quad.nodes[bit];
                    d_mass[node] += grad.d_volume[local];
                    d_moment[node] += grad.d_moment[local];
                }
            }
        }

        (self.mass_and_com(grid), d_mass, d_moment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_grid(resolution: usize) -> VoxelGrid {
        let n = resolution * resolution * resolution;
        let mut grid = VoxelGrid::init_from_occupancy(resolution, &vec![true; n]);
        grid.init_structure().unwrap();
        grid
    }

    #[test]
    fn complete_box_boundary_matches_outer_extent() {
        let grid = full_grid(3);
        let mut inner = InnerMesh::new();
        inner.compute(&grid);
        let props = inner.mass_and_com(&grid);
        assert!((props.mass() - 1.0).abs() < 1e-9, "volume was {}", props.mass());
        assert!((props.center_of_mass() - Vec3::new(0.5, 0.5, 0.5)).norm() < 1e-9);
    }

    #[test]
    fn carving_the_centre_box_reduces_volume_by_one_cell() {
        let mut grid = full_grid(3);
        // the single interior box of a 3^3 grid
        let centre = (0..grid.num_boxes())
            .find(|&k| grid.depth(k) == 1)
            .expect("3^3 grid has exactly one interior box");
        grid.set_filled(centre, false);

        let mut inner = InnerMesh::new();
        inner.compute(&grid);
        let props = inner.mass_and_com(&grid);
        let cell = 1.0 / 3.0;
        assert!((props.mass() - (1.0 - cell * cell * cell)).abs() < 1e-9);
    }

    #[test]
    fn mass_gradient_matches_finite_difference_under_a_translated_handle() {
        // Every node carries weight 1 on a single handle, so translating
        // that handle by h moves every node's current position by h along
        // one axis uniformly — exactly the perturbation
        // `triangle_mass_grad`'s own finite-difference test already
        // validates per-triangle; here we check `InnerMesh`'s scatter
        // reproduces the same total derivative summed over all its quads'
        // node gradients.
        let mut grid = full_grid(3);
        let centre = (0..grid.num_boxes()).find(|&k| grid.depth(k) == 1).unwrap();
        grid.set_filled(centre, false);

        let mut handles = crate::handles::Handles::for_tests(vec![Vec3::zeros()]);
        for node in 0..grid.num_nodes() {
            grid.push_node_weight(node, 1.0);
        }
        grid.update_poses(&handles);

        let mut inner = InnerMesh::new();
        inner.compute(&grid);
        let (_, d_mass, _) = inner.mass_and_com_with_grad(&grid);
        let total_d_mass: Vec3 = d_mass.iter().sum();

        let axis = 0;
        let h = 1e-6;

        handles.translate(0, Vec3::new(h, 0.0, 0.0));
        grid.update_poses(&handles);
        let mut inner_plus = InnerMesh::new();
        inner_plus.compute(&grid);
        let mass_plus = inner_plus.mass_and_com(&grid).mass();

        handles.translate(0, Vec3::new(-2.0 * h, 0.0, 0.0));
        grid.update_poses(&handles);
        let mut inner_minus = InnerMesh::new();
        inner_minus.compute(&grid);
        let mass_minus = inner_minus.mass_and_com(&grid).mass();

        let numeric = (mass_plus - mass_minus) / (2.0 * h);
        assert!(
            (numeric - total_d_mass[axis]).abs() < 1e-4,
            "numeric {numeric} vs analytic {}",
            total_d_mass[axis]
        );
    }
}
