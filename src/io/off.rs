//! Reader for the Object File Format the reference implementation loads
//! meshes from exclusively (`examples/original_source/utils/meshIO/readOFF.h`).
//! Spec §6 scopes mesh I/O out of the optimisation core but doesn't forbid
//! carrying a reader; this one only needs to produce the `(vertices, faces)`
//! soup [`crate::mesh::Mesh::from_vertices_and_faces`] consumes.

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::helpers::aliases::Vec3;

pub fn read(path: &Path) -> Result<(Vec<Vec3>, Vec<[usize; 3]>)> {
    let contents = fs::read_to_string(path)?;
    parse(&contents)
}

fn parse(contents: &str) -> Result<(Vec<Vec3>, Vec<[usize; 3]>)> {
    let mut tokens = contents.split_whitespace();

    let magic = tokens.next().ok_or_else(|| Error::Parse("empty OFF file".to_string()))?;
    if magic != "OFF" && magic != "off" {
        return Err(Error::Parse(format!("expected OFF magic, found {magic}")));
    }

    let num_vertices: usize = next_usize(&mut tokens, "vertex count")?;
    let num_faces: usize = next_usize(&mut tokens, "face count")?;
    let _num_edges: usize = next_usize(&mut tokens, "edge count")?;

    let mut vertices = Vec::with_capacity(num_vertices);
    for _ in 0..num_vertices {
        let x = next_f64(&mut tokens, "vertex x")?;
        let y = next_f64(&mut tokens, "vertex y")?;
        let z = next_f64(&mut tokens, "vertex z")?;
        vertices.push(Vec3::new(x, y, z));
    }

    let mut faces = Vec::with_capacity(num_faces);
    for _ in 0..num_faces {
        let n = next_usize(&mut tokens, "face vertex count")?;
        if n != 3 {
            return Err(Error::Parse(format!(
                "face with {n} vertices: only triangle faces are supported"
            )));
        }
        let a = next_usize(&mut tokens, "face index")?;
        let b = next_usize(&mut tokens, "face index")?;
        let c = next_usize(&mut tokens, "face index")?;
        faces.push([a, b, c]);
    }

    Ok((vertices, faces))
}

fn next_usize<'a>(tokens: &mut impl Iterator<Item = &'a str>, what: &str) -> Result<usize> {
    tokens
        .next()
        .ok_or_else(|| Error::Parse(format!("missing {what}")))?
        .parse()
        .map_err(|_| Error::Parse(format!("malformed {what}")))
}

fn next_f64<'a>(tokens: &mut impl Iterator<Item = &'a str>, what: &str) -> Result<f64> {
    tokens
        .next()
        .ok_or_else(|| Error::Parse(format!("missing {what}")))?
        .parse()
        .map_err(|_| Error::Parse(format!("malformed {what}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_unit_tetrahedron() {
        let off = "OFF\n4 4 0\n\
            0.0 0.0 0.0\n\
            1.0 0.0 0.0\n\
            0.0 1.0 0.0\n\
            0.0 0.0 1.0\n\
            3 0 1 2\n\
            3 0 3 1\n\
            3 0 2 3\n\
            3 1 3 2\n";

        let (vertices, faces) = parse(off).unwrap();
        assert_eq!(vertices.len(), 4);
        assert_eq!(faces.len(), 4);
        assert_eq!(faces[0], [0, 1, 2]);
    }

    #[test]
    fn rejects_non_triangle_faces() {
        let off = "OFF\n4 1 0\n0 0 0\n1 0 0\n0 1 0\n0 0 1\n4 0 1 2 3\n";
        assert!(matches!(parse(off), Err(Error::Parse(_))));
    }

    #[test]
    fn rejects_wrong_magic() {
        assert!(matches!(parse("NOPE\n"), Err(Error::Parse(_))));
    }
}
