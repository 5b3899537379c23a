//! The balancing energy and its handle gradients: how moving a handle's
//! translation or scale changes the hollow object's center-of-mass
//! objective and its as-rigid-as-possible residual.
//!
//! The as-rigid-as-possible term's handle Jacobians never change once BBW
//! weights are fixed, so [`Optimizer::prepare`] precomputes `MM · dv/dα` for
//! every handle direction `α` up front; each iteration's Laplacian gradient
//! is then a dot product against the current vertex positions, not a fresh
//! pass over the mesh. The center-of-mass term's gradient, by contrast,
//! depends on the current center of mass itself, so it's recomputed by
//! [`evaluate`] every call from the mass/moment derivatives `Mesh` and
//! `InnerMesh` already expose.

use nalgebra::DVector;

use crate::config::{ObjectiveConfig, OptimizerConfig};
use crate::handles::Handles;
use crate::helpers::aliases::{Mat3, Vec3};
use crate::inner_mesh::InnerMesh;
use crate::mesh::Mesh;
use crate::support::Support;
use crate::voxel_grid::VoxelGrid;

/// One balancing objective: the support it must land on, the direction
/// gravity pulls in, and a fixed target point in that support to pull the
/// projected center of mass towards. `target` is computed once, from the
/// center of mass at the moment the objective is created, and never moves
/// again — later iterations always aim at the same point, even as the
/// center of mass drifts while getting there.
pub struct Objective {
    pub support: Box<dyn Support>,
    pub gravity: Vec3,
    pub target: Vec3,
    pub angle_threshold: f64,
}

impl Objective {
    pub fn new(support: Box<dyn Support>, gravity: Vec3, angle_threshold: f64, initial_com: &Vec3) -> Self {
        let target = support.target_point(initial_com, &gravity);
        Self {
            support,
            gravity,
            target,
            angle_threshold,
        }
    }

    /// Builds an objective from an [`ObjectiveConfig`] (spec §9's explicit
    /// configuration struct) instead of separate gravity/threshold
    /// arguments — the entry point a driver built from persisted or
    /// user-supplied settings uses.
    pub fn from_config(support: Box<dyn Support>, config: &ObjectiveConfig, initial_com: &Vec3) -> Self {
        Self::new(support, config.gravity, config.angle_threshold, initial_com)
    }
}

/// Mass, center of mass, and per-objective/per-term energies at the current
/// geometry, together with the raw mass/moment derivatives the gradient
/// step scatters over handles.
pub struct Evaluation {
    pub mass_total: f64,
    pub moment_total: Vec3,
    pub com: Vec3,
    /// Per objective: the projection of `com - target` onto the plane
    /// perpendicular to that objective's gravity. Zero exactly when the
    /// objective's center-of-mass term is already satisfied.
    pub c: Vec<Vec3>,
    pub energy_com: Vec<f64>,
    pub energy_laplacian: f64,
    pub d_mass_outer: Vec<Vec3>,
    pub d_moment_outer: Vec<Mat3>,
    pub d_mass_inner: Vec<Vec3>,
    pub d_moment_inner: Vec<Mat3>,
}

fn flatten_positions(mesh: &Mesh) -> DVector<f64> {
    let n = mesh.num_vertices();
    DVector::from_iterator(
        3 * n,
        (0..n).flat_map(|v| {
            let p = mesh.current_position(v);
            [p.x, p.y, p.z]
        }),
    )
}

/// Evaluates mass, center of mass, and energy terms at the mesh/grid's
/// current pose. The hollow object's mass and moment are the outer shell's
/// integral minus the inner cavity's (spec §4.E): what's left once the
/// carved-out interior is subtracted from the solid exterior.
pub fn evaluate(mesh: &Mesh, grid: &VoxelGrid, inner_mesh: &InnerMesh, objectives: &[Objective]) -> Evaluation {
    let (outer_props, d_mass_outer, d_moment_outer) = mesh.mass_and_com_with_grad();
    let (inner_props, d_mass_inner, d_moment_inner) = inner_mesh.mass_and_com_with_grad(grid);

    let mass_total = outer_props.mass() - inner_props.mass();
    let moment_total = outer_props.moment() - inner_props.moment();
    let com = moment_total / mass_total;

    let mut c = Vec::with_capacity(objectives.len());
    let mut energy_com = Vec::with_capacity(objectives.len());
    for objective in objectives {
        let n = objective.gravity.normalize();
        let diff = com - objective.target;
        let projected = diff - n * n.dot(&diff);
        energy_com.push(0.5 * projected.norm_squared());
        c.push(projected);
    }

    let energy_laplacian = 0.5 * mesh.mm().quadratic_form(&flatten_positions(mesh));

    Evaluation {
        mass_total,
        moment_total,
        com,
        c,
        energy_com,
        energy_laplacian,
        d_mass_outer,
        d_moment_outer,
        d_mass_inner,
        d_moment_inner,
    }
}

/// `E = (1 - μ) Σⱼ E_C,j + μ λ E_L` (spec §4.F).
pub fn total_energy(eval: &Evaluation, config: &OptimizerConfig) -> f64 {
    let e_c: f64 = eval.energy_com.iter().sum();
    (1.0 - config.mu) * e_c + config.mu * config.lambda * eval.energy_laplacian
}

/// `d(E_C,j)/d(site)` for one mass/moment-contributing site (a mesh vertex
/// or a grid node), via the quotient rule on `com = moment / mass`:
/// `d(com)/d(site) = (d(moment)/d(site)·mass - moment⊗d(mass)/d(site)) / mass²`,
/// then `d(E_C,j)/d(site) = d(com)/d(site)ᵀ · c_j` (the chain rule collapses
/// neatly here because `E_C,j = ½‖c_j‖²` and `d(E_C,j)/d(com) = c_j`).
#[inline]
fn com_vertex_gradient(d_mass: &Vec3, d_moment: &Mat3, mass_total: f64, moment_total: &Vec3, c: &Vec3) -> Vec3 {
    (d_moment.transpose() * c) / mass_total - d_mass * (moment_total.dot(c) / (mass_total * mass_total))
}

/// Precomputed per-handle Jacobians of the as-rigid-as-possible energy.
/// `mm_dv_t[axis]` is `MM · (∂v_O/∂Tₖ)` for translation axis `axis`;
/// `mm_dv_s` is `MM · (∂v_O/∂Sₖ)`. Both are fixed once BBW weights and the
/// rest-pose Laplacian are known, independent of the current iteration.
struct HandlePrep {
    mm_dv_t: [DVector<f64>; 3],
    mm_dv_s: DVector<f64>,
}

pub struct Optimizer {
    handle_preps: Vec<HandlePrep>,
}

impl Optimizer {
    /// Builds the per-handle Laplacian Jacobians from the mesh's current BBW
    /// weights. Must be called again whenever those weights change (a fresh
    /// `compute_bbw`), but not on every optimization step.
    pub fn prepare(mesh: &Mesh, handles: &Handles) -> Self {
        let n = mesh.num_vertices();
        let mm = mesh.mm();

        let handle_preps = (0..handles.len())
            .map(|k| {
                let rest_k = handles.get(k).rest();
                let mut dv_t: [DVector<f64>; 3] = [DVector::zeros(3 * n), DVector::zeros(3 * n), DVector::zeros(3 * n)];
                let mut dv_s = DVector::zeros(3 * n);

                for v in 0..n {
                    let w = mesh.vertex_weights(v).get(k).copied().unwrap_or(0.0);
                    if w == 0.0 {
                        continue;
                    }
                    for axis in 0..3 {
                        dv_t[axis][3 * v + axis] = w;
                    }
                    let delta = mesh.rest_position(v) - rest_k;
                    for axis in 0..3 {
                        dv_s[3 * v + axis] = w * delta[axis];
                    }
                }

                HandlePrep {
                    mm_dv_t: dv_t.map(|d| mm.matvec(&d)),
                    mm_dv_s: mm.matvec(&dv_s),
                }
            })
            .collect();

        Self { handle_preps }
    }

    /// One gradient-descent step: moves every handle (translation, and scale
    /// when `config.use_scaling`) downhill in the combined energy, honoring
    /// locks via [`Handles::translate`]/[`Handles::scale_by`]. Support
    /// handles are included in the loop rather than special-cased — a
    /// standing handle's translation is locked but its scale may still be
    /// free, and the lock check already lives in `Handles`.
    pub fn apply_grad_energy(
        &self,
        mesh: &Mesh,
        grid: &VoxelGrid,
        handles: &mut Handles,
        eval: &Evaluation,
        config: &OptimizerConfig,
    ) {
        let num_handles = handles.len();
        let mut grad_t = vec![Vec3::zeros(); num_handles];
        // Accumulates Σᵢ wₖ(i)·g_i·restᵢ so that `g·(restᵢ - restₖ)` can be
        // recovered afterwards as `scalar_acc[k] - restₖ·grad_t[k]`, without
        // needing handleₖ's rest position inside the per-site loop.
        let mut scalar_acc = vec![0.0; num_handles];

        for c_j in &eval.c {
            for v in 0..mesh.num_vertices() {
                let g = com_vertex_gradient(&eval.d_mass_outer[v], &eval.d_moment_outer[v], eval.mass_total, &eval.moment_total, c_j);
                let rest = mesh.rest_position(v);
                for (k, &w) in mesh.vertex_weights(v).iter().enumerate() {
                    if w == 0.0 {
                        continue;
                    }
                    grad_t[k] += w * g;
                    scalar_acc[k] += w * g.dot(&rest);
                }
            }

            for node in 0..grid.num_nodes() {
                // The cavity is subtracted from the shell, so its mass/moment
                // derivatives enter the total with a flipped sign.
                let d_mass = -eval.d_mass_inner[node];
                let d_moment = -eval.d_moment_inner[node];
                let g = com_vertex_gradient(&d_mass, &d_moment, eval.mass_total, &eval.moment_total, c_j);
                let rest = grid.node_rest_pose(node);
                for (k, &w) in grid.node_weights(node).iter().enumerate() {
                    if w == 0.0 {
                        continue;
                    }
                    grad_t[k] += w * g;
                    scalar_acc[k] += w * g.dot(&rest);
                }
            }
        }

        let pos = flatten_positions(mesh);

        for k in 0..num_handles {
            let mut dt = (1.0 - config.mu) * grad_t[k];
            let mut ds = (1.0 - config.mu) * (scalar_acc[k] - handles.get(k).rest().dot(&grad_t[k]));

            let prep = &self.handle_preps[k];
            let dl_dt = Vec3::new(pos.dot(&prep.mm_dv_t[0]), pos.dot(&prep.mm_dv_t[1]), pos.dot(&prep.mm_dv_t[2]));
            let dl_ds = pos.dot(&prep.mm_dv_s);

            dt += config.mu * config.lambda * dl_dt;
            ds += config.mu * config.lambda * dl_ds;

            handles.translate(k, -config.step * dt);
            if config.use_scaling {
                handles.scale_by(k, -config.step * ds);
            }
        }
    }
}

/// Tries to lower the current energy by carving hull-protected interior
/// boxes, one objective at a time: for each objective, filled boxes deeper
/// than `config.hull_depth` are sorted by how far they sit, from the
/// current center of mass, in the direction away from that objective's
/// target — carving them first moves the remaining mass's center back
/// towards the target fastest. The greedy search tries growing prefixes of
/// that ordering and keeps whichever prefix yields the lowest trial energy,
/// carving nothing if no prefix improves on the energy already measured
/// before this call.
pub fn balance_by_plane_carving(
    mesh: &Mesh,
    grid: &mut VoxelGrid,
    inner_mesh: &mut InnerMesh,
    objectives: &[Objective],
    config: &OptimizerConfig,
) -> f64 {
    grid.clear_carving();
    inner_mesh.compute(grid);
    let mut best_energy = total_energy(&evaluate(mesh, grid, inner_mesh, objectives), config);

    for objective in objectives {
        let eval = evaluate(mesh, grid, inner_mesh, objectives);
        let away = eval.com - objective.target;
        if away.norm() < 1e-12 {
            continue;
        }
        let direction = away.normalize();

        let mut candidates: Vec<usize> = grid
            .filled_boxes()
            .filter(|&k| grid.depth(k) > config.hull_depth as u32)
            .collect();
        candidates.sort_by(|&a, &b| {
            let pa = (grid.box_centre(a) - eval.com).dot(&direction);
            let pb = (grid.box_centre(b) - eval.com).dot(&direction);
            pb.partial_cmp(&pa).unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut best_prefix = 0;
        for prefix in 1..=candidates.len() {
            for &k in &candidates[..prefix] {
                grid.set_filled(k, false);
            }
            inner_mesh.compute(grid);
            let trial = total_energy(&evaluate(mesh, grid, inner_mesh, objectives), config);
            for &k in &candidates[..prefix] {
                grid.set_filled(k, true);
            }
            if trial < best_energy {
                best_energy = trial;
                best_prefix = prefix;
            }
        }

        for &k in &candidates[..best_prefix] {
            grid.set_filled(k, false);
        }
        inner_mesh.compute(grid);
    }

    best_energy
}

/// The two-objective counterpart of [`balance_by_plane_carving`] (spec §4.F
/// "Multi-objective variant"): a candidate box must sit on the far side of
/// the center of mass under *both* objectives' directions before it's
/// eligible, sorted by the sum of its two signed distances rather than
/// either one alone, and the greedy prefix search minimises the combined
/// `Σⱼ ½‖ĉⱼ‖²` instead of a single objective's energy. Requires exactly two
/// objectives; callers dispatch to this instead of
/// [`balance_by_plane_carving`] when `objectives.len() > 1`.
pub fn balance_by_plane_carving_multi(
    mesh: &Mesh,
    grid: &mut VoxelGrid,
    inner_mesh: &mut InnerMesh,
    objectives: &[Objective],
    config: &OptimizerConfig,
) -> f64 {
    assert_eq!(objectives.len(), 2, "plane-carving-multi requires exactly two objectives");

    grid.clear_carving();
    inner_mesh.compute(grid);
    let mut best_energy = total_energy(&evaluate(mesh, grid, inner_mesh, objectives), config);

    let eval = evaluate(mesh, grid, inner_mesh, objectives);
    let directions: Vec<Vec3> = objectives
        .iter()
        .map(|o| {
            let away = eval.com - o.target;
            if away.norm() < 1e-12 {
                Vec3::zeros()
            } else {
                away.normalize()
            }
        })
        .collect();

    if directions.iter().any(|d| d.norm() < 1e-12) {
        return best_energy;
    }

    let mut candidates: Vec<usize> = grid
        .filled_boxes()
        .filter(|&k| grid.depth(k) > config.hull_depth as u32)
        .filter(|&k| {
            let centre = grid.box_centre(k);
            directions.iter().all(|d| (centre - eval.com).dot(d) > 0.0)
        })
        .collect();

    candidates.sort_by(|&a, &b| {
        let score = |k: usize| -> f64 {
            let centre = grid.box_centre(k);
            directions.iter().map(|d| (centre - eval.com).dot(d)).sum()
        };
        score(b).partial_cmp(&score(a)).unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut best_prefix = 0;
    for prefix in 1..=candidates.len() {
        for &k in &candidates[..prefix] {
            grid.set_filled(k, false);
        }
        inner_mesh.compute(grid);
        let trial = total_energy(&evaluate(mesh, grid, inner_mesh, objectives), config);
        for &k in &candidates[..prefix] {
            grid.set_filled(k, true);
        }
        if trial < best_energy {
            best_energy = trial;
            best_prefix = prefix;
        }
    }

    for &k in &candidates[..best_prefix] {
        grid.set_filled(k, false);
    }
    inner_mesh.compute(grid);

    best_energy
}

/// Dispatches to [`balance_by_plane_carving_multi`] for two objectives and
/// [`balance_by_plane_carving`] otherwise, the split the driver's outer loop
/// (spec §4.G step 3) needs without itself knowing which variant applies.
pub fn balance(
    mesh: &Mesh,
    grid: &mut VoxelGrid,
    inner_mesh: &mut InnerMesh,
    objectives: &[Objective],
    config: &OptimizerConfig,
) -> f64 {
    if objectives.len() > 1 {
        balance_by_plane_carving_multi(mesh, grid, inner_mesh, objectives, config)
    } else {
        balance_by_plane_carving(mesh, grid, inner_mesh, objectives, config)
    }
}
