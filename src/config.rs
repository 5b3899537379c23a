//! Tunables for the optimizer and driver loop. Plain structs, not global
//! state: callers build one and pass it in, so a batch driver can run many
//! optimizations with different settings side by side.

use crate::helpers::aliases::Vec3;

/// Parameters of the gradient-descent energy minimization.
#[derive(Debug, Clone, Copy)]
pub struct OptimizerConfig {
    /// Initial step size for a translation handle.
    pub start_step: f64,
    /// Current step size; decays over iterations that fail to improve energy.
    pub step: f64,
    /// Weight of the Laplacian (ARAP) term relative to the center-of-mass term.
    pub lambda: f64,
    /// Blend between the center-of-mass energy and the Laplacian energy,
    /// `E = (1 - mu) * E_C + mu * lambda * E_L`.
    pub mu: f64,
    /// BFS depth used to seed the BBW handle region around the support.
    pub hull_depth: usize,
    /// If true, `mu` stays fixed instead of decaying over iterations.
    pub fixed_mu: bool,
    /// If true, handles may scale as well as translate.
    pub use_scaling: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            start_step: 1.0,
            step: 1.0,
            lambda: 20.0,
            mu: 0.75,
            hull_depth: 2,
            fixed_mu: false,
            use_scaling: true,
        }
    }
}

/// Describes what "balanced" means for a particular run: which direction
/// gravity pulls, and how much of an overhang around the support counts as
/// stable before the angle objective kicks in.
#[derive(Debug, Clone, Copy)]
pub struct ObjectiveConfig {
    pub gravity: Vec3,
    /// Angle, in radians, beyond which the center of mass is considered
    /// outside the support polygon's safety margin.
    pub angle_threshold: f64,
}

impl Default for ObjectiveConfig {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -1.0, 0.0),
            angle_threshold: 0.0,
        }
    }
}
