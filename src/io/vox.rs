//! `.vox` persistence: whitespace-separated `boxIdx` values in x,y,z
//! lexicographic order, `-1` for empty (spec §6). The values written back
//! out need not match the ids read in bit-for-bit — only whether each cell
//! is occupied matters, since [`VoxelGrid::init_from_occupancy`] reassigns
//! compact ids deterministically from occupancy alone. That's what makes
//! the save/load round trip exact (spec §8).

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::voxel_grid::VoxelGrid;

pub fn write(path: &Path, grid: &VoxelGrid) -> Result<()> {
    let mut out = String::new();
    out.push_str(&format!("{}\n", grid.resolution()));
    for (i, &id) in grid.box_idx_flat().iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&id.to_string());
    }
    out.push('\n');
    fs::write(path, out)?;
    Ok(())
}

pub fn read(path: &Path) -> Result<VoxelGrid> {
    let contents = fs::read_to_string(path)?;
    let mut tokens = contents.split_whitespace();

    let resolution: usize = tokens
        .next()
        .ok_or_else(|| Error::Parse("missing .vox resolution".to_string()))?
        .parse()
        .map_err(|_| Error::Parse("malformed .vox resolution".to_string()))?;

    let expected = resolution * resolution * resolution;
    let mut occupied = Vec::with_capacity(expected);
    for _ in 0..expected {
        let value: i64 = tokens
            .next()
            .ok_or_else(|| Error::Parse("truncated .vox box list".to_string()))?
            .parse()
            .map_err(|_| Error::Parse("malformed .vox box index".to_string()))?;
        occupied.push(value != -1);
    }

    Ok(VoxelGrid::init_from_occupancy(resolution, &occupied))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env::temp_dir;

    #[test]
    fn round_trips_box_occupancy() {
        let n = 3 * 3 * 3;
        let mut grid = VoxelGrid::init_from_occupancy(3, &vec![true; n]);
        grid.init_structure().unwrap();

        let path = temp_dir().join("standable_test.vox");
        write(&path, &grid).unwrap();
        let loaded = read(&path).unwrap();

        assert_eq!(grid.box_idx_flat(), loaded.box_idx_flat());
        std::fs::remove_file(&path).ok();
    }
}
