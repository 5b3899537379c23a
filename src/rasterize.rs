//! The voxel occupancy bitmap [`VoxelGrid::init_voxels`](crate::voxel_grid::VoxelGrid::init_voxels)
//! consumes, and a CPU reference rasteriser that produces one from a closed
//! mesh. Spec §6 treats the production rasteriser (a GPU shader) as an
//! external collaborator; this is the fallback that keeps the crate
//! exercisable without one.

use crate::helpers::aliases::Vec3;

/// `R×R×R` occupancy, stored x-fastest (spec §6: "a flat R³ byte array in
/// x-fastest order; non-zero marks occupied").
#[derive(Debug, Clone)]
pub struct OccupancyGrid {
    resolution: usize,
    occupied: Vec<bool>,
}

impl OccupancyGrid {
    pub fn resolution(&self) -> usize {
        self.resolution
    }

    pub fn from_flat(resolution: usize, flat: &[u8]) -> Self {
        assert_eq!(flat.len(), resolution * resolution * resolution);
        Self {
            resolution,
            occupied: flat.iter().map(|&b| b != 0).collect(),
        }
    }

    #[inline]
    pub fn linear_index(&self, x: usize, y: usize, z: usize) -> usize {
        x + self.resolution * (y + self.resolution * z)
    }

    #[inline]
    pub fn is_occupied(&self, x: usize, y: usize, z: usize) -> bool {
        self.occupied[self.linear_index(x, y, z)]
    }
}

/// Ray-parity voxelisation: for every `(x, y)` column, cast a ray along +z
/// against the mesh's triangles and toggle occupancy at every crossing.
/// Correct for closed, non-self-intersecting meshes; quadratic in triangle
/// count per column, which is fine at the resolutions this crate targets.
pub fn rasterize_cpu(
    vertices: &[Vec3],
    faces: &[[usize; 3]],
    resolution: usize,
) -> OccupancyGrid {
    let cell = 1.0 / resolution as f64;
    let mut occupied = vec![false; resolution * resolution * resolution];

    for xi in 0..resolution {
        let x = (xi as f64 + 0.5) * cell;
        for yi in 0..resolution {
            let y = (yi as f64 + 0.5) * cell;

            let mut crossings: Vec<f64> = Vec::new();
            for face in faces {
                let [a, b, c] = *face;
                if let Some(z) = ray_triangle_z(x, y, &vertices[a], &vertices[b], &vertices[c]) {
                    crossings.push(z);
                }
            }
            crossings.sort_by(|a, b| a.partial_cmp(b).unwrap());

            let mut pairs = crossings.chunks_exact(2);
            for pair in &mut pairs {
                let (z0, z1) = (pair[0], pair[1]);
                for zi in 0..resolution {
                    let z = (zi as f64 + 0.5) * cell;
                    if z >= z0 && z < z1 {
                        let idx = xi + resolution * (yi + resolution * zi);
                        occupied[idx] = true;
                    }
                }
            }
        }
    }

    OccupancyGrid {
        resolution,
        occupied,
    }
}

/// Intersects the vertical line `(x, y, *)` with triangle `(v0, v1, v2)`,
/// returning the hit's z coordinate projected onto the xy plane via
/// barycentric coordinates. `None` if the line misses the triangle's xy
/// footprint.
fn ray_triangle_z(x: f64, y: f64, v0: &Vec3, v1: &Vec3, v2: &Vec3) -> Option<f64> {
    let (x0, y0) = (v0.x, v0.y);
    let (x1, y1) = (v1.x, v1.y);
    let (x2, y2) = (v2.x, v2.y);

    let denom = (y1 - y2) * (x0 - x2) + (x2 - x1) * (y0 - y2);
    if denom.abs() < 1e-15 {
        return None;
    }

    let a = ((y1 - y2) * (x - x2) + (x2 - x1) * (y - y2)) / denom;
    let b = ((y2 - y0) * (x - x2) + (x0 - x2) * (y - y2)) / denom;
    let c = 1.0 - a - b;

    if a < 0.0 || b < 0.0 || c < 0.0 {
        return None;
    }

    Some(a * v0.z + b * v1.z + c * v2.z)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_cube() -> (Vec<Vec3>, Vec<[usize; 3]>) {
        let v = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::new(0.0, 1.0, 1.0),
        ];
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

    #[test]
    fn rasterizing_a_unit_cube_fills_the_whole_grid() {
        let (v, f) = unit_cube();
        let grid = rasterize_cpu(&v, &f, 4);
        for x in 0..4 {
            for y in 0..4 {
                for z in 0..4 {
                    assert!(grid.is_occupied(x, y, z), "{x},{y},{z} should be filled");
                }
            }
        }
    }
}
