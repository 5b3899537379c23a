//! A regular axis-aligned box grid over `[0,1]³`, sparsely populated by an
//! occupancy bitmap. Dense `R³`/`(R+1)³` sentinel arrays (`-1` or a compact
//! index) give O(1) containing-box and node lookups at the cost of `O(R³)`
//! memory — acceptable up to `R ≈ 256` (spec §9).

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use std::collections::VecDeque;

use crate::deformable::Deformable;
use crate::error::{Error, Result};
use crate::geometry::mass_properties::MassProperties;
use crate::handles::Handles;
use crate::helpers::aliases::Vec3;
use crate::qp::QpSolver;
use crate::rasterize::OccupancyGrid;

/// Face directions in the fixed order used by `box_boxes` and by
/// [`crate::inner_mesh::InnerMesh`] to decide a quad's winding: -x,+x,-y,+y,-z,+z.
pub const NEIGHBOR_OFFSETS: [(isize, isize, isize); 6] = [
    (-1, 0, 0),
    (1, 0, 0),
    (0, -1, 0),
    (0, 1, 0),
    (0, 0, -1),
    (0, 0, 1),
];

#[derive(Debug, Clone)]
pub struct VoxelGrid {
    resolution: usize,
    cell: f64,
    box_idx: Vec<i64>,
    node_idx: Vec<i64>,
    box_coord: Vec<[usize; 3]>,
    node_coord: Vec<[usize; 3]>,
    box_nodes: Vec<[usize; 8]>,
    box_boxes: Vec<[i64; 6]>,
    node_nodes: Vec<[i64; 6]>,
    depth: Vec<u32>,
    filled: Vec<bool>,
    node_deformables: Vec<Deformable>,
}

impl VoxelGrid {
    pub fn new(resolution: usize) -> Self {
        let r = resolution;
        Self {
            resolution: r,
            cell: 1.0 / r as f64,
            box_idx: vec![-1; r * r * r],
            node_idx: vec![-1; (r + 1) * (r + 1) * (r + 1)],
            box_coord: Vec::new(),
            node_coord: Vec::new(),
            box_nodes: Vec::new(),
            box_boxes: Vec::new(),
            node_nodes: Vec::new(),
            depth: Vec::new(),
            filled: Vec::new(),
            node_deformables: Vec::new(),
        }
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    pub fn cell_size(&self) -> f64 {
        self.cell
    }

    pub fn num_boxes(&self) -> usize {
        self.box_coord.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.node_coord.len()
    }

    #[inline]
    fn box_linear(&self, x: usize, y: usize, z: usize) -> usize {
        x + self.resolution * (y + self.resolution * z)
    }

    #[inline]
    fn node_linear(&self, x: usize, y: usize, z: usize) -> usize {
        let n = self.resolution + 1;
        x + n * (y + n * z)
    }

    fn activate_box(&mut self, x: usize, y: usize, z: usize) {
        let lin = self.box_linear(x, y, z);
        if self.box_idx[lin] == -1 {
            let id = self.box_coord.len() as i64;
            self.box_idx[lin] = id;
            self.box_coord.push([x, y, z]);
        }
    }

    /// Cell coordinates containing `p`, or `None` if `p` is outside `[0,1]³`.
    fn cell_of(&self, p: &Vec3) -> Option<[usize; 3]> {
        if p.iter().any(|&c| !(0.0..=1.0).contains(&c)) {
            return None;
        }
        let r = self.resolution;
        let coord = |c: f64| ((c / self.cell).floor() as isize).clamp(0, r as isize - 1) as usize;
        Some([coord(p.x), coord(p.y), coord(p.z)])
    }

    /// Builds box activation directly from a precomputed occupancy flag per
    /// cell, skipping the mesh-vertex fixup step. Used by `.vox` import and
    /// internally by [`Self::init_voxels`].
    pub fn init_from_occupancy(resolution: usize, occupied: &[bool]) -> Self {
        assert_eq!(occupied.len(), resolution * resolution * resolution);
        let mut grid = Self::new(resolution);
        for z in 0..resolution {
            for y in 0..resolution {
                for x in 0..resolution {
                    if occupied[grid.box_linear(x, y, z)] {
                        grid.activate_box(x, y, z);
                    }
                }
            }
        }
        grid
    }

    /// Consumes the rasteriser's occupancy bitmap, then activates any box
    /// still missing a mesh vertex (spec §4.B invariant: every vertex lies
    /// in an active box).
    pub fn init_voxels(&mut self, occupancy: &OccupancyGrid, mesh_vertices: &[Vec3]) -> Result<()> {
        assert_eq!(occupancy.resolution(), self.resolution);
        for z in 0..self.resolution {
            for y in 0..self.resolution {
                for x in 0..self.resolution {
                    if occupancy.is_occupied(x, y, z) {
                        self.activate_box(x, y, z);
                    }
                }
            }
        }

        for v in mesh_vertices {
            let [x, y, z] = self.cell_of(v).ok_or(Error::PointOutsideGrid)?;
            self.activate_box(x, y, z);
        }

        Ok(())
    }

    /// Flat box occupancy array in the `.vox` file's x,y,z lexicographic
    /// order: `-1` for empty, else the box's compact index.
    pub fn box_idx_flat(&self) -> &[i64] {
        &self.box_idx
    }

    pub fn init_structure(&mut self) -> Result<()> {
        self.build_nodes();
        self.build_box_nodes();
        self.build_box_boxes();
        self.build_node_nodes();
        self.build_depths()?;
        self.filled = vec![true; self.num_boxes()];
        self.node_deformables = self
            .node_coord
            .iter()
            .map(|&[x, y, z]| Deformable::new(Vec3::new(x as f64 * self.cell, y as f64 * self.cell, z as f64 * self.cell)))
            .collect();
        Ok(())
    }

    fn build_nodes(&mut self) {
        let r = self.resolution;
        for z in 0..=r {
            for y in 0..=r {
                for x in 0..=r {
                    let mut active = false;
                    for dz in [-1isize, 0] {
                        for dy in [-1isize, 0] {
                            for dx in [-1isize, 0] {
                                let (bx, by, bz) = (x as isize + dx, y as isize + dy, z as isize + dz);
                                if bx < 0 || by < 0 || bz < 0 || bx >= r as isize || by >= r as isize || bz >= r as isize {
                                    continue;
                                }
                                if self.box_idx[self.box_linear(bx as usize, by as usize, bz as usize)] != -1 {
                                    active = true;
                                }
                            }
                        }
                    }

                    if active {
                        let lin = self.node_linear(x, y, z);
                        let id = self.node_coord.len() as i64;
                        self.node_idx[lin] = id;
                        self.node_coord.push([x, y, z]);
                    }
                }
            }
        }
    }

    fn build_box_nodes(&mut self) {
        self.box_nodes = self
            .box_coord
            .iter()
            .map(|&[x, y, z]| {
                let mut corners = [0usize; 8];
                for i in 0..8u8 {
                    let dx = (i % 2) as usize;
                    let dy = ((i / 2) % 2) as usize;
                    let dz = (i / 4) as usize;
                    let lin = self.node_linear(x + dx, y + dy, z + dz);
                    corners[i as usize] = self.node_idx[lin] as usize;
                }
                corners
            })
            .collect();
    }

    fn build_box_boxes(&mut self) {
        let r = self.resolution as isize;
        self.box_boxes = self
            .box_coord
            .iter()
            .map(|&[x, y, z]| {
                let mut neighbors = [-1i64; 6];
                for (dir, &(dx, dy, dz)) in NEIGHBOR_OFFSETS.iter().enumerate() {
                    let (nx, ny, nz) = (x as isize + dx, y as isize + dy, z as isize + dz);
                    if nx < 0 || ny < 0 || nz < 0 || nx >= r || ny >= r || nz >= r {
                        continue;
                    }
                    neighbors[dir] = self.box_idx[self.box_linear(nx as usize, ny as usize, nz as usize)];
                }
                neighbors
            })
            .collect();
    }

    fn build_node_nodes(&mut self) {
        let n = self.resolution as isize + 1;
        self.node_nodes = self
            .node_coord
            .iter()
            .map(|&[x, y, z]| {
                let mut neighbors = [-1i64; 6];
                for (dir, &(dx, dy, dz)) in NEIGHBOR_OFFSETS.iter().enumerate() {
                    let (nx, ny, nz) = (x as isize + dx, y as isize + dy, z as isize + dz);
                    if nx < 0 || ny < 0 || nz < 0 || nx >= n || ny >= n || nz >= n {
                        continue;
                    }
                    neighbors[dir] = self.node_idx[self.node_linear(nx as usize, ny as usize, nz as usize)];
                }
                neighbors
            })
            .collect();
    }

    /// Seeds hull boxes (depth 0) from 26-neighbour emptiness, then BFS-
    /// propagates depth over 6-adjacency. The asymmetry is intentional
    /// (spec §9 design note / open question) and must be preserved: it is
    /// what lets thin diagonal appendages end up one depth deeper than
    /// 6-connectivity alone would suggest, which plane carving relies on to
    /// leave a skin of hull boxes untouched.
    fn build_depths(&mut self) -> Result<()> {
        let r = self.resolution as isize;
        let n = self.num_boxes();
        self.depth = vec![u32::MAX; n];
        let mut queue = VecDeque::new();

        for (k, &[x, y, z]) in self.box_coord.iter().enumerate() {
            let mut is_hull = false;
            'neighbors: for dz in -1..=1isize {
                for dy in -1..=1isize {
                    for dx in -1..=1isize {
                        if dx == 0 && dy == 0 && dz == 0 {
                            continue;
                        }
                        let (nx, ny, nz) = (x as isize + dx, y as isize + dy, z as isize + dz);
                        let missing = nx < 0
                            || ny < 0
                            || nz < 0
                            || nx >= r
                            || ny >= r
                            || nz >= r
                            || self.box_idx[self.box_linear(nx as usize, ny as usize, nz as usize)] == -1;
                        if missing {
                            is_hull = true;
                            break 'neighbors;
                        }
                    }
                }
            }

            if is_hull {
                self.depth[k] = 0;
                queue.push_back(k);
            }
        }

        while let Some(k) = queue.pop_front() {
            let d = self.depth[k];
            for &neighbor in &self.box_boxes[k] {
                if neighbor < 0 {
                    continue;
                }
                let neighbor = neighbor as usize;
                if self.depth[neighbor] == u32::MAX {
                    self.depth[neighbor] = d + 1;
                    queue.push_back(neighbor);
                }
            }
        }

        if self.depth.iter().any(|&d| d == u32::MAX) {
            return Err(Error::Internal(
                "unreachable box in hull-depth BFS: active-box connectivity is broken".to_string(),
            ));
        }

        Ok(())
    }

    pub fn nearest_node(&self, p: &Vec3) -> Option<usize> {
        if p.iter().any(|&c| !(0.0..=1.0).contains(&c)) {
            return None;
        }
        let round = |c: f64| ((c / self.cell).round() as isize).clamp(0, self.resolution as isize) as usize;
        let lin = self.node_linear(round(p.x), round(p.y), round(p.z));
        let id = self.node_idx[lin];
        (id >= 0).then_some(id as usize)
    }

    pub fn node_rest_pose(&self, node: usize) -> Vec3 {
        self.node_deformables[node].rest()
    }

    pub fn node_current_pose(&self, node: usize) -> Vec3 {
        self.node_deformables[node].current()
    }

    pub fn containing_box(&self, p: &Vec3) -> Option<usize> {
        let [x, y, z] = self.cell_of(p)?;
        let id = self.box_idx[self.box_linear(x, y, z)];
        (id >= 0).then_some(id as usize)
    }

    pub fn box_nodes(&self, k: usize) -> [usize; 8] {
        self.box_nodes[k]
    }

    pub fn box_neighbor(&self, k: usize, dir: usize) -> Option<usize> {
        let n = self.box_boxes[k][dir];
        (n >= 0).then_some(n as usize)
    }

    pub fn box_min(&self, k: usize) -> Vec3 {
        let [x, y, z] = self.box_coord[k];
        Vec3::new(x as f64 * self.cell, y as f64 * self.cell, z as f64 * self.cell)
    }

    pub fn box_centre(&self, k: usize) -> Vec3 {
        let [x, y, z] = self.box_coord[k];
        Vec3::new(
            (x as f64 + 0.5) * self.cell,
            (y as f64 + 0.5) * self.cell,
            (z as f64 + 0.5) * self.cell,
        )
    }

    pub fn depth(&self, k: usize) -> u32 {
        self.depth[k]
    }

    pub fn is_hull(&self, k: usize) -> bool {
        self.depth[k] == 0
    }

    pub fn is_filled(&self, k: usize) -> bool {
        self.filled[k]
    }

    pub fn set_filled(&mut self, k: usize, value: bool) {
        self.filled[k] = value;
    }

    pub fn filled_boxes(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.num_boxes()).filter(|&k| self.filled[k])
    }

    /// Resets fill status to "filled iff within `hull_depth` of the hull",
    /// the baseline the driver's reset forces before a full rebalance.
    pub fn clear_filling(&mut self, hull_depth: u32) {
        for k in 0..self.num_boxes() {
            self.filled[k] = self.depth[k] <= hull_depth;
        }
    }

    pub fn clear_carving(&mut self) {
        self.filled.iter_mut().for_each(|f| *f = true);
    }

    pub fn box_mass_properties(&self, k: usize) -> MassProperties {
        let corners = self.box_nodes[k].map(|n| self.node_deformables[n].current());
        let mut mp = MassProperties::zero();
        mp.add_box(&corners);
        mp
    }

    pub fn update_poses(&mut self, handles: &Handles) {
        self.node_deformables
            .par_iter_mut()
            .for_each(|d| d.compute_current_pose(handles));
    }

    /// Solves BBW weights for every active node against every handle (spec
    /// §4.B). Each handle's QP pins the union of all handles' constraint
    /// nodes (itself to 1, the rest to 0) and solves for the free nodes;
    /// this is the equality-constrained QP `min ½xᵀLᵀLx s.t. Ax=b` with the
    /// pinned degrees of freedom eliminated, expressed purely in terms of
    /// [`QpSolver`]'s simpler box-constrained form.
    pub fn compute_bbw(&mut self, handles: &Handles, qp: &dyn QpSolver) -> Result<()> {
        let n = self.num_nodes();
        let l = self.node_graph_laplacian();
        let ltl = l.transpose() * &l;

        let ranges = handles.constraint_ranges();
        let pinned = handles.flatten_constraints();
        let pinned_set: std::collections::HashSet<usize> = pinned.iter().copied().collect();
        let free: Vec<usize> = (0..n).filter(|i| !pinned_set.contains(i)).collect();

        let qff = ltl.select_rows(&free).select_columns(&free);
        let qfp = ltl.select_rows(&free).select_columns(&pinned);

        for (handle_idx, &(start, len)) in ranges.iter().enumerate() {
            let x_p = DVector::from_iterator(
                pinned.len(),
                (0..pinned.len()).map(|i| if i >= start && i < start + len { 1.0 } else { 0.0 }),
            );

            let mut x_full = vec![0.0; n];
            for (i, &node) in pinned.iter().enumerate() {
                x_full[node] = x_p[i];
            }

            if !free.is_empty() {
                let c_f = &qfp * &x_p;
                let lb = DVector::from_element(free.len(), 0.0);
                let ub = DVector::from_element(free.len(), 1.0);
                let xf = qp.solve(&qff, &c_f, &lb, &ub).map_err(|e| {
                    Error::QpFailure(format!("BBW solve failed for handle {handle_idx}: {e}"))
                })?;
                for (i, &node) in free.iter().enumerate() {
                    x_full[node] = xf[i];
                }
            }

            for (node, &w) in x_full.iter().enumerate() {
                self.node_deformables[node].push_weight(w);
            }
        }

        for d in self.node_deformables.iter_mut() {
            d.normalize_weights();
            let sum: f64 = d.weights().iter().sum();
            if sum <= 0.0 {
                return Err(Error::QpFailure("BBW produced an all-zero weight vector".to_string()));
            }
        }

        Ok(())
    }

    fn node_graph_laplacian(&self) -> DMatrix<f64> {
        let n = self.num_nodes();
        let mut l = DMatrix::zeros(n, n);
        for (i, neighbors) in self.node_nodes.iter().enumerate() {
            let mut valence = 0.0;
            for &neighbor in neighbors {
                if neighbor >= 0 {
                    l[(i, neighbor as usize)] -= 1.0;
                    valence += 1.0;
                }
            }
            l[(i, i)] = valence;
        }
        l
    }

    pub fn node_weights(&self, node: usize) -> &[f64] {
        self.node_deformables[node].weights()
    }

    pub fn push_node_weight(&mut self, node: usize, weight: f64) {
        self.node_deformables[node].push_weight(weight);
    }

    pub fn import_bbw(&mut self, path: &std::path::Path, num_handles: usize) -> Result<()> {
        crate::io::bbw::read_into(path, self, num_handles)
    }

    pub fn save_bbw(&self, path: &std::path::Path) -> Result<()> {
        crate::io::bbw::write(path, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::{Handles, ObjectiveSpec};
    use crate::qp::ProjectedGradientQp;

    fn cube_vertices() -> Vec<Vec3> {
        (0u8..8)
            .map(|i| {
                Vec3::new(
                    (i % 2) as f64,
                    ((i / 2) % 2) as f64,
                    if i > 3 { 1.0 } else { 0.0 },
                )
            })
            .collect()
    }

    fn full_grid(resolution: usize) -> VoxelGrid {
        let n = resolution * resolution * resolution;
        let mut grid = VoxelGrid::init_from_occupancy(resolution, &vec![true; n]);
        grid.init_structure().unwrap();
        grid
    }

    #[test]
    fn every_box_node_is_active() {
        let grid = full_grid(3);
        for k in 0..grid.num_boxes() {
            for &node in &grid.box_nodes(k) {
                assert!(node < grid.num_nodes());
            }
        }
    }

    #[test]
    fn hull_depth_zero_iff_on_the_boundary() {
        let grid = full_grid(3);
        for k in 0..grid.num_boxes() {
            let [x, y, z] = grid.box_coord[k];
            let on_boundary = x == 0 || y == 0 || z == 0 || x == 2 || y == 2 || z == 2;
            assert_eq!(grid.is_hull(k), on_boundary, "box {x},{y},{z}");
        }
    }

    #[test]
    fn interior_box_of_5_cubed_grid_has_depth_one() {
        let grid = full_grid(5);
        for k in 0..grid.num_boxes() {
            let [x, y, z] = grid.box_coord[k];
            if x == 2 && y == 2 && z == 2 {
                assert_eq!(grid.depth(k), 1);
            }
        }
    }

    #[test]
    fn init_from_occupancy_round_trips_box_idx() {
        let grid = full_grid(4);
        let occupied: Vec<bool> = grid.box_idx_flat().iter().map(|&id| id != -1).collect();
        let grid2 = VoxelGrid::init_from_occupancy(4, &occupied);
        assert_eq!(grid.box_idx_flat(), grid2.box_idx_flat());
    }

    #[test]
    fn clear_filling_protects_hull_and_carves_interior() {
        let mut grid = full_grid(5);
        grid.clear_filling(0);
        for k in 0..grid.num_boxes() {
            assert_eq!(grid.is_filled(k), grid.is_hull(k));
        }
    }

    #[test]
    fn bbw_weights_on_grid_nodes_sum_to_one_and_are_bounded() {
        let mut grid = full_grid(4);
        let verts = cube_vertices();
        let objectives = vec![ObjectiveSpec::Standing {
            polygon: vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::new(0.0, 0.0, 1.0),
            ],
        }];
        let handles = Handles::new(&objectives, &[Vec3::new(0.5, 0.9, 0.5)], &grid).unwrap();
        grid.compute_bbw(&handles, &ProjectedGradientQp::default()).unwrap();

        for node in 0..grid.num_nodes() {
            let w = grid.node_weights(node);
            let sum: f64 = w.iter().sum();
            assert!((sum - 1.0).abs() < 1e-6, "node {node} weights sum to {sum}");
            assert!(w.iter().all(|&x| (-1e-9..=1.0 + 1e-9).contains(&x)));
        }
        let _ = verts;
    }
}
