//! The outer optimization loop (spec §4.G): repeatedly take a gradient step
//! and a carving pass, keep the result only if it actually helped, and back
//! off the step size — then the energy blend `μ` — when it stops helping.

use log::{debug, info};

use crate::config::OptimizerConfig;
use crate::handles::Handles;
use crate::inner_mesh::InnerMesh;
use crate::mesh::Mesh;
use crate::optimizer::{self, Objective, Optimizer};
use crate::voxel_grid::VoxelGrid;

/// Where a single objective stands relative to its support, independent of
/// the others: a multi-objective run only stops once every objective
/// reaches `Met`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectiveState {
    /// The projected center of mass has left the support entirely (a
    /// standing objective only; a suspended one is never off its support).
    OffSupport,
    /// On the support, but not yet past its angle threshold.
    NotYetMet,
    /// On the support and past its angle threshold: nothing left to do.
    Met,
}

/// Below this relative energy change, progress is judged too slow and the
/// step/μ schedule decays — independent of whether the step is kept: a step
/// that still improved the energy, just by less than 3%, is kept but the
/// schedule tightens anyway.
const IMPROVEMENT_THRESHOLD: f64 = -0.03;

/// Evaluates every objective's state against the mesh/grid's current pose.
pub fn objective_states(mesh: &Mesh, grid: &VoxelGrid, inner_mesh: &InnerMesh, objectives: &[Objective]) -> Vec<ObjectiveState> {
    let eval = optimizer::evaluate(mesh, grid, inner_mesh, objectives);
    objectives
        .iter()
        .map(|o| {
            if !o.support.is_engaged(&eval.com, &o.gravity) {
                ObjectiveState::OffSupport
            } else {
                let (_, met) = o.support.angle_objective(&eval.com, &o.gravity, o.angle_threshold);
                if met {
                    ObjectiveState::Met
                } else {
                    ObjectiveState::NotYetMet
                }
            }
        })
        .collect()
}

/// Drives an [`Optimizer`] towards satisfying a set of objectives, adapting
/// its step size and center-of-mass/Laplacian blend as it goes.
pub struct Driver {
    config: OptimizerConfig,
    optimizer: Optimizer,
    initial_mu: f64,
}

impl Driver {
    pub fn new(config: OptimizerConfig, optimizer: Optimizer) -> Self {
        let initial_mu = config.mu;
        Self {
            config,
            optimizer,
            initial_mu,
        }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Runs one outer iteration. Returns `true` once every objective is
    /// already met, or once the step/μ schedule has nothing left to try —
    /// in either case the caller should stop calling `step`.
    pub fn step(&mut self, mesh: &mut Mesh, grid: &mut VoxelGrid, inner_mesh: &mut InnerMesh, handles: &mut Handles, objectives: &[Objective]) -> bool {
        let states = objective_states(mesh, grid, inner_mesh, objectives);
        if states.iter().all(|s| *s == ObjectiveState::Met) {
            info!("all {} objective(s) met, stopping", objectives.len());
            return true;
        }

        handles.save_state();
        let before = optimizer::evaluate(mesh, grid, inner_mesh, objectives);
        let energy_before = optimizer::total_energy(&before, &self.config);

        self.optimizer.apply_grad_energy(mesh, grid, handles, &before, &self.config);
        grid.update_poses(handles);
        mesh.update_poses(handles);

        let energy_after = optimizer::balance(mesh, grid, inner_mesh, objectives, &self.config);

        let relative = (energy_after - energy_before) / energy_before.abs().max(1e-12);
        debug!(
            "energy {energy_before:.6} -> {energy_after:.6} ({:+.2}%), step={}, mu={}",
            relative * 100.0,
            self.config.step,
            self.config.mu
        );

        if energy_after > energy_before {
            handles.restore_state();
            grid.update_poses(handles);
            mesh.update_poses(handles);
            optimizer::balance(mesh, grid, inner_mesh, objectives, &self.config);
        }

        if relative > IMPROVEMENT_THRESHOLD {
            if self.config.step > 0.4 {
                self.config.step *= 0.8;
            } else if !self.config.fixed_mu && self.config.mu > 0.05 {
                self.config.mu -= 0.05;
                self.config.step = self.config.start_step;
            } else {
                info!("step/mu schedule exhausted without meeting every objective");
                return true;
            }
        }

        false
    }

    /// Snaps every handle back to identity, restores the full fill (no
    /// interior carved), and resets the step/μ schedule — the state a fresh
    /// optimization run begins from.
    pub fn reset(&mut self, mesh: &mut Mesh, grid: &mut VoxelGrid, inner_mesh: &mut InnerMesh, handles: &mut Handles) {
        handles.reset_to_rest();
        grid.clear_carving();
        grid.update_poses(handles);
        mesh.update_poses(handles);
        inner_mesh.compute(grid);

        self.config.step = self.config.start_step;
        self.config.mu = self.initial_mu;
    }
}
