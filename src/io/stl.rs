//! ASCII STL export for the outer mesh and the inner quad surface (spec §6
//! Export). Grounded on `baby_shark`'s binary STL writer, adapted to the
//! `facet normal / outer loop / endloop / endfacet` ASCII grammar because
//! the spec calls for ASCII specifically.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Result;
use crate::helpers::aliases::Vec3;
use crate::inner_mesh::InnerMesh;
use crate::mesh::Mesh;
use crate::voxel_grid::VoxelGrid;

fn write_facet(w: &mut impl Write, normal: Vec3, p0: Vec3, p1: Vec3, p2: Vec3) -> std::io::Result<()> {
    writeln!(w, "facet normal {} {} {}", normal.x, normal.y, normal.z)?;
    writeln!(w, "outer loop")?;
    writeln!(w, "vertex {} {} {}", p0.x, p0.y, p0.z)?;
    writeln!(w, "vertex {} {} {}", p1.x, p1.y, p1.z)?;
    writeln!(w, "vertex {} {} {}", p2.x, p2.y, p2.z)?;
    writeln!(w, "endloop")?;
    writeln!(w, "endfacet")
}

/// Outer surface: one facet per triangle, outward normal `(p1-p0)×(p2-p0)`
/// normalised (spec §6).
pub fn write_outer(path: &Path, mesh: &Mesh) -> Result<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);
    writeln!(w, "solid outer")?;

    for &[a, b, c] in mesh.faces() {
        let (p0, p1, p2) = (
            mesh.current_position(a),
            mesh.current_position(b),
            mesh.current_position(c),
        );
        let n = (p1 - p0).cross(&(p2 - p0));
        let n = if n.norm() > 1e-15 { n.normalize() } else { n };
        write_facet(&mut w, n, p0, p1, p2)?;
    }

    writeln!(w, "endsolid outer")?;
    Ok(())
}

/// Inner surface: each quad split into two triangles, the outward normal
/// derived from [`InnerMesh`]'s winding (outward from filled into carved or
/// empty space, spec §4.E).
pub fn write_inner(path: &Path, inner: &InnerMesh, grid: &VoxelGrid) -> Result<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);
    writeln!(w, "solid inner")?;

    for quad in inner.quads() {
        let p: Vec<Vec3> = quad.nodes.iter().map(|&n| grid.node_current_pose(n)).collect();
        for &(a, b, c) in &[(0, 1, 2), (2, 3, 0)] {
            let (p0, p1, p2) = (p[a], p[b], p[c]);
            let n = (p1 - p0).cross(&(p2 - p0));
            let n = if n.norm() > 1e-15 { n.normalize() } else { n };
            write_facet(&mut w, n, p0, p1, p2)?;
        }
    }

    writeln!(w, "endsolid inner")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::Mesh;
    use std::env::temp_dir;

    fn cube() -> (Vec<Vec3>, Vec<[usize; 3]>) {
        let v = (0u8..8)
            .map(|i| {
                Vec3::new(
                    (i % 2) as f64,
                    ((i / 2) % 2) as f64,
                    if i > 3 { 1.0 } else { 0.0 },
                )
            })
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

    #[test]
    fn writes_one_facet_per_triangle() {
        let (v, f) = cube();
        let mesh = Mesh::from_vertices_and_faces(v, f).unwrap();
        let path = temp_dir().join("standable_test_outer.stl");
        write_outer(&path, &mesh).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("facet normal").count(), 12);
        std::fs::remove_file(&path).ok();
    }
}
