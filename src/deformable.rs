//! A single point in the deformation space: a rest pose, a partition-of-unity
//! blend of handle weights, and the pose that follows from blending the
//! handles' current transforms. One of these sits behind every mesh vertex
//! and every voxel grid node; neither owns a back-pointer to the mesh or
//! grid it came from, so weights are always looked up by index.

use crate::handles::Handles;
use crate::helpers::aliases::Vec3;

/// `current = Σ_j weights[j] * handles[j].transform(rest)`.
#[derive(Debug, Clone)]
pub struct Deformable {
    rest: Vec3,
    weights: Vec<f64>,
    current: Vec3,
}

impl Deformable {
    pub fn new(rest: Vec3) -> Self {
        Self {
            rest,
            weights: Vec::new(),
            current: rest,
        }
    }

    pub fn rest(&self) -> Vec3 {
        self.rest
    }

    pub fn current(&self) -> Vec3 {
        self.current
    }

    pub fn weight(&self, handle: usize) -> f64 {
        self.weights.get(handle).copied().unwrap_or(0.0)
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Appends the next handle's weight. BBW solves handles one at a time,
    /// so weights accumulate in handle order.
    pub fn push_weight(&mut self, w: f64) {
        self.weights.push(w);
    }

    /// Renormalizes the accumulated weights so they sum to 1, the partition-
    /// of-unity invariant BBW is required to hold.
    pub fn normalize_weights(&mut self) {
        let sum: f64 = self.weights.iter().sum();
        if sum > 1e-12 {
            for w in self.weights.iter_mut() {
                *w /= sum;
            }
        }
    }

    pub fn compute_current_pose(&mut self, handles: &Handles) {
        let mut pose = Vec3::zeros();
        for (j, &w) in self.weights.iter().enumerate() {
            if w == 0.0 {
                continue;
            }
            pose += w * handles.transform(j, &self.rest);
        }
        self.current = pose;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::Handles;

    #[test]
    fn rest_handles_reproduce_rest_pose() {
        let rest = Vec3::new(0.3, 0.4, 0.5);
        let mut d = Deformable::new(rest);
        d.push_weight(0.25);
        d.push_weight(0.75);
        d.normalize_weights();

        let handles = Handles::for_tests(vec![Vec3::zeros(), Vec3::new(1.0, 0.0, 0.0)]);
        d.compute_current_pose(&handles);
        assert!((d.current() - rest).norm() < 1e-12);
    }

    #[test]
    fn weights_renormalize_to_unit_sum() {
        let mut d = Deformable::new(Vec3::zeros());
        d.push_weight(2.0);
        d.push_weight(2.0);
        d.normalize_weights();
        let sum: f64 = d.weights().iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
        assert!(d.weights().iter().all(|&w| (0.0..=1.0).contains(&w)));
    }
}
