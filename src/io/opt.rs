//! `.opt` persistence: the full optimisation state needed to resume a run
//! unchanged — `balancing B\n` then `B` fill booleans (`1`=filled), then
//! `handles H\n` then `H` lines of `tx ty tz s` (spec §6).

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::handles::Handles;
use crate::voxel_grid::VoxelGrid;

pub fn write(path: &Path, grid: &VoxelGrid, handles: &Handles) -> Result<()> {
    let mut out = String::new();

    out.push_str(&format!("balancing {}\n", grid.num_boxes()));
    let fill: Vec<&str> = (0..grid.num_boxes())
        .map(|k| if grid.is_filled(k) { "1" } else { "0" })
        .collect();
    out.push_str(&fill.join(" "));
    out.push('\n');

    out.push_str(&format!("handles {}\n", handles.len()));
    for h in handles.iter() {
        let t = h.translation();
        out.push_str(&format!("{} {} {} {}\n", t.x, t.y, t.z, h.scale()));
    }

    fs::write(path, out)?;
    Ok(())
}

pub fn read(path: &Path, grid: &mut VoxelGrid, handles: &mut Handles) -> Result<()> {
    let contents = fs::read_to_string(path)?;
    let mut lines = contents.lines();

    let balancing_header = lines
        .next()
        .ok_or_else(|| Error::Parse("missing .opt balancing header".to_string()))?;
    let num_boxes: usize = balancing_header
        .strip_prefix("balancing ")
        .ok_or_else(|| Error::Parse("expected 'balancing <N>' header".to_string()))?
        .trim()
        .parse()
        .map_err(|_| Error::Parse("malformed balancing count".to_string()))?;

    if num_boxes != grid.num_boxes() {
        return Err(Error::Parse(format!(
            ".opt has {num_boxes} boxes, grid has {}",
            grid.num_boxes()
        )));
    }

    let fill_line = lines
        .next()
        .ok_or_else(|| Error::Parse("missing .opt fill line".to_string()))?;
    let fills: Vec<bool> = fill_line
        .split_whitespace()
        .map(|tok| match tok {
            "1" => Ok(true),
            "0" => Ok(false),
            _ => Err(Error::Parse("malformed fill flag".to_string())),
        })
        .collect::<Result<Vec<_>>>()?;
    if fills.len() != num_boxes {
        return Err(Error::Parse("fill line length mismatch".to_string()));
    }
    for (k, &f) in fills.iter().enumerate() {
        grid.set_filled(k, f);
    }

    let handles_header = lines
        .next()
        .ok_or_else(|| Error::Parse("missing .opt handles header".to_string()))?;
    let num_handles: usize = handles_header
        .strip_prefix("handles ")
        .ok_or_else(|| Error::Parse("expected 'handles <H>' header".to_string()))?
        .trim()
        .parse()
        .map_err(|_| Error::Parse("malformed handle count".to_string()))?;

    if num_handles != handles.len() {
        return Err(Error::Parse(format!(
            ".opt has {num_handles} handles, live set has {}",
            handles.len()
        )));
    }

    for j in 0..num_handles {
        let line = lines
            .next()
            .ok_or_else(|| Error::Parse("truncated .opt handle list".to_string()))?;
        let values: Vec<f64> = line
            .split_whitespace()
            .map(|tok| tok.parse::<f64>().map_err(|_| Error::Parse("malformed handle line".to_string())))
            .collect::<Result<Vec<_>>>()?;
        if values.len() != 4 {
            return Err(Error::Parse("handle line must have 4 values".to_string()));
        }
        handles.set_raw(j, crate::helpers::aliases::Vec3::new(values[0], values[1], values[2]), values[3]);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::ObjectiveSpec;
    use crate::helpers::aliases::Vec3;
    use std::env::temp_dir;

    #[test]
    fn round_trips_fill_status_and_handle_transforms() {
        let n = 3 * 3 * 3;
        let mut grid = VoxelGrid::init_from_occupancy(3, &vec![true; n]);
        grid.init_structure().unwrap();
        grid.set_filled(0, false);

        let objectives = vec![ObjectiveSpec::Standing {
            polygon: vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::new(0.0, 0.0, 1.0),
            ],
        }];
        let mut handles = Handles::new(&objectives, &[Vec3::new(0.5, 0.9, 0.5)], &grid).unwrap();
        handles.translate(1, Vec3::new(0.05, 0.0, 0.0));

        let path = temp_dir().join("standable_test.opt");
        write(&path, &grid, &handles).unwrap();

        let mut grid2 = VoxelGrid::init_from_occupancy(3, &vec![true; n]);
        grid2.init_structure().unwrap();
        let mut handles2 = Handles::new(&objectives, &[Vec3::new(0.5, 0.9, 0.5)], &grid2).unwrap();
        read(&path, &mut grid2, &mut handles2).unwrap();

        assert!(!grid2.is_filled(0));
        assert!((handles2.get(1).translation() - handles.get(1).translation()).norm() < 1e-9);
        std::fs::remove_file(&path).ok();
    }
}
