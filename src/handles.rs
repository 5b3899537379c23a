//! The control points a deformation is driven by: one or two automatically
//! placed "support" handles (the polygon or point the object balances on)
//! plus any number of user handles. Every [`crate::deformable::Deformable`]
//! blends these by weight; the optimizer moves the unlocked ones.

use log::warn;

use crate::error::{Error, Result};
use crate::helpers::aliases::Vec3;
use crate::voxel_grid::VoxelGrid;

const SCALE_MIN: f64 = 0.8;
const SCALE_MAX: f64 = 1.4;

/// Where a support objective's contact region comes from.
#[derive(Debug, Clone)]
pub enum ObjectiveSpec {
    /// Resting on a convex polygon (e.g. the footprint of the lowest voxel
    /// layer). Rest position is the polygon centroid; every polygon vertex
    /// snaps to its nearest grid node and becomes a BBW constraint.
    Standing { polygon: Vec<Vec3> },
    /// Hanging from a single point (e.g. the highest vertex along gravity).
    /// Rest position is that point; the single nearest grid node is the BBW
    /// constraint. Suspended handles are locked in both translation and
    /// scale (spec §3).
    Suspended { point: Vec3 },
}

#[derive(Debug, Clone, Copy)]
struct SavedState {
    t: Vec3,
    s: f64,
}

/// One handle: `v ↦ s·(v − rest) + t`.
#[derive(Debug, Clone)]
pub struct Handle {
    rest: Vec3,
    t: Vec3,
    s: f64,
    translation_locked: bool,
    scale_locked: bool,
    /// Grid node indices this handle pins to 1 during the BBW solve (spec
    /// §4.D: a contiguous constraint range per handle).
    pub constraint_nodes: Vec<usize>,
    saved: Option<SavedState>,
}

impl Handle {
    fn new(rest: Vec3, constraint_nodes: Vec<usize>) -> Self {
        Self {
            rest,
            t: rest,
            s: 1.0,
            translation_locked: false,
            scale_locked: false,
            constraint_nodes,
            saved: None,
        }
    }

    pub fn rest(&self) -> Vec3 {
        self.rest
    }

    pub fn translation(&self) -> Vec3 {
        self.t
    }

    pub fn scale(&self) -> f64 {
        self.s
    }

    pub fn is_translation_locked(&self) -> bool {
        self.translation_locked
    }

    pub fn is_scale_locked(&self) -> bool {
        self.scale_locked
    }

    #[inline]
    pub fn transform(&self, v: &Vec3) -> Vec3 {
        self.s * (v - self.rest) + self.t
    }

    /// `∂transform/∂s = v − rest`.
    #[inline]
    pub fn grad_scale(&self, v: &Vec3) -> Vec3 {
        v - self.rest
    }

    pub fn translate(&mut self, dt: Vec3) {
        if !self.translation_locked {
            self.t += dt;
        }
    }

    pub fn set_translation(&mut self, t: Vec3) {
        if !self.translation_locked {
            self.t = t;
        }
    }

    pub fn scale_by(&mut self, ds: f64) {
        if !self.scale_locked {
            self.s = (self.s + ds).clamp(SCALE_MIN, SCALE_MAX);
        }
    }

    pub fn set_scale(&mut self, s: f64) {
        if !self.scale_locked {
            self.s = s.clamp(SCALE_MIN, SCALE_MAX);
        }
    }

    pub fn save_state(&mut self) {
        self.saved = Some(SavedState { t: self.t, s: self.s });
    }

    pub fn restore_state(&mut self) {
        if let Some(saved) = self.saved {
            self.t = saved.t;
            self.s = saved.s;
        }
    }

    /// Overwrites translation and scale directly, ignoring locks and the
    /// scale clamp. Used only to restore persisted optimizer state
    /// (`.opt` import), where the saved values are trusted verbatim.
    pub fn set_raw(&mut self, t: Vec3, s: f64) {
        self.t = t;
        self.s = s;
    }
}

/// The full handle set: `num_objectives` support handles (indices
/// `0..num_objectives`) followed by user handles. Support handles never
/// translate (spec §4.F); suspended ones are also locked against scaling.
#[derive(Debug, Clone)]
pub struct Handles {
    handles: Vec<Handle>,
    num_objectives: usize,
}

impl Handles {
    pub fn new(
        objectives: &[ObjectiveSpec],
        user_handles: &[Vec3],
        grid: &VoxelGrid,
    ) -> Result<Self> {
        let mut handles = Vec::with_capacity(objectives.len() + user_handles.len());

        for objective in objectives {
            match objective {
                ObjectiveSpec::Standing { polygon } => {
                    let mut nodes = Vec::with_capacity(polygon.len());
                    for p in polygon {
                        match grid.nearest_node(p) {
                            Some(n) => nodes.push(n),
                            None => return Err(Error::PointOutsideGrid),
                        }
                    }
                    let centroid: Vec3 = polygon.iter().sum::<Vec3>() / polygon.len().max(1) as f64;
                    let mut h = Handle::new(centroid, nodes);
                    h.translation_locked = true;
                    handles.push(h);
                }
                ObjectiveSpec::Suspended { point } => {
                    let node = grid.nearest_node(point).ok_or(Error::PointOutsideGrid)?;
                    let mut h = Handle::new(*point, vec![node]);
                    h.translation_locked = true;
                    h.scale_locked = true;
                    handles.push(h);
                }
            }
        }
        let num_objectives = handles.len();

        for (i, p) in user_handles.iter().enumerate() {
            match grid.nearest_node(p) {
                Some(node) => {
                    let rest = grid.node_rest_pose(node);
                    handles.push(Handle::new(rest, vec![node]));
                }
                None => {
                    warn!("user handle {i} lies outside the voxel grid, dropping it");
                }
            }
        }

        Ok(Self {
            handles,
            num_objectives,
        })
    }

    /// Builds an all-user-handle set directly from rest positions, without a
    /// grid. Used by tests that only exercise [`crate::deformable::Deformable`].
    #[cfg(test)]
    pub fn for_tests(rest_positions: Vec<Vec3>) -> Self {
        let handles = rest_positions
            .into_iter()
            .map(|r| Handle::new(r, Vec::new()))
            .collect();
        Self {
            handles,
            num_objectives: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn num_objectives(&self) -> usize {
        self.num_objectives
    }

    pub fn get(&self, j: usize) -> &Handle {
        &self.handles[j]
    }

    pub fn set_raw(&mut self, j: usize, t: Vec3, s: f64) {
        self.handles[j].set_raw(t, s);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Handle> {
        self.handles.iter()
    }

    pub fn transform(&self, j: usize, v: &Vec3) -> Vec3 {
        self.handles[j].transform(v)
    }

    pub fn translate(&mut self, j: usize, dt: Vec3) {
        self.handles[j].translate(dt);
    }

    pub fn scale_by(&mut self, j: usize, ds: f64) {
        self.handles[j].scale_by(ds);
    }

    pub fn save_state(&mut self) {
        for h in self.handles.iter_mut() {
            h.save_state();
        }
    }

    pub fn restore_state(&mut self) {
        for h in self.handles.iter_mut() {
            h.restore_state();
        }
    }

    /// Snaps every handle back to identity (`t = rest`, `s = 1`), bypassing
    /// locks — a fresh run and a driver reset both start from here.
    pub fn reset_to_rest(&mut self) {
        for h in self.handles.iter_mut() {
            h.t = h.rest;
            h.s = 1.0;
        }
    }

    /// Lays out the BBW constraint rows contiguously in handle order, as
    /// spec §4.D requires ("support₀ rows ... support₁ ... one row per user
    /// handle"). Returns, per handle, the `(start, len)` range into the flat
    /// constrained-node list produced by [`Self::flatten_constraints`].
    pub fn constraint_ranges(&self) -> Vec<(usize, usize)> {
        let mut ranges = Vec::with_capacity(self.handles.len());
        let mut offset = 0;
        for h in &self.handles {
            ranges.push((offset, h.constraint_nodes.len()));
            offset += h.constraint_nodes.len();
        }
        ranges
    }

    pub fn flatten_constraints(&self) -> Vec<usize> {
        self.handles
            .iter()
            .flat_map(|h| h.constraint_nodes.iter().copied())
            .collect()
    }
}
