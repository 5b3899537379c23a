//! `.bbw` persistence: one line per active node, `H` whitespace-separated
//! non-negative weights summing to 1 (spec §6).

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::voxel_grid::VoxelGrid;

pub fn write(path: &Path, grid: &VoxelGrid) -> Result<()> {
    let mut out = String::new();
    for node in 0..grid.num_nodes() {
        let weights = grid.node_weights(node);
        let line: Vec<String> = weights.iter().map(|w| w.to_string()).collect();
        out.push_str(&line.join(" "));
        out.push('\n');
    }
    fs::write(path, out)?;
    Ok(())
}

/// Loads weights directly into `grid`'s nodes, bypassing the QP solve.
pub fn read_into(path: &Path, grid: &mut VoxelGrid, num_handles: usize) -> Result<()> {
    let contents = fs::read_to_string(path)?;
    let lines: Vec<&str> = contents.lines().filter(|l| !l.trim().is_empty()).collect();

    if lines.len() != grid.num_nodes() {
        return Err(Error::Parse(format!(
            ".bbw file has {} node lines, grid has {} active nodes",
            lines.len(),
            grid.num_nodes()
        )));
    }

    for (node, line) in lines.iter().enumerate() {
        let weights: Vec<f64> = line
            .split_whitespace()
            .map(|tok| tok.parse::<f64>().map_err(|_| Error::Parse("malformed BBW weight".to_string())))
            .collect::<Result<Vec<_>>>()?;

        if weights.len() != num_handles {
            return Err(Error::Parse(format!(
                "node {node} has {} weights, expected {num_handles}",
                weights.len()
            )));
        }

        for w in weights {
            grid.push_node_weight(node, w);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::{Handles, ObjectiveSpec};
    use crate::helpers::aliases::Vec3;
    use crate::qp::ProjectedGradientQp;
    use std::env::temp_dir;

    #[test]
    fn round_trips_bbw_weights() {
        let n = 4 * 4 * 4;
        let mut grid = VoxelGrid::init_from_occupancy(4, &vec![true; n]);
        grid.init_structure().unwrap();

        let objectives = vec![ObjectiveSpec::Standing {
            polygon: vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::new(0.0, 0.0, 1.0),
            ],
        }];
        let handles = Handles::new(&objectives, &[], &grid).unwrap();
        grid.compute_bbw(&handles, &ProjectedGradientQp::default()).unwrap();

        let path = temp_dir().join("standable_test.bbw");
        write(&path, &grid).unwrap();

        let mut grid2 = VoxelGrid::init_from_occupancy(4, &vec![true; n]);
        grid2.init_structure().unwrap();
        read_into(&path, &mut grid2, handles.len()).unwrap();

        for node in 0..grid.num_nodes() {
            let a = grid.node_weights(node);
            let b = grid2.node_weights(node);
            for (x, y) in a.iter().zip(b.iter()) {
                assert!((x - y).abs() < 1e-9);
            }
        }
        std::fs::remove_file(&path).ok();
    }
}
