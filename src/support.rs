//! The footprint an object is expected to balance on. The optimizer reads
//! this once per iteration to turn "is the center of mass over the base?"
//! into a signed distance it can push on.

use crate::helpers::aliases::Vec3;

/// A region in space, implicitly lying in the plane perpendicular to gravity
/// that passes through the support's own points, over which a projected
/// center of mass is considered stable.
pub trait Support {
    /// True if the center of mass, projected along `gravity`, falls inside
    /// the support.
    fn contains(&self, center_of_mass: &Vec3, gravity: &Vec3) -> bool;

    /// Signed distance from the projected center of mass to the support
    /// boundary: positive inside, negative outside. Used as the stability
    /// margin in the balancing objective.
    fn signed_distance(&self, center_of_mass: &Vec3, gravity: &Vec3) -> f64;

    fn centroid(&self) -> Vec3;

    /// The point `c*` the optimizer pulls the projected center of mass
    /// towards: the closest point, in the plane orthogonal to `gravity`, of
    /// a shrunk copy of the support (a safety margin inset towards the
    /// centroid) to the projected center of mass. When the projection
    /// already lies inside the shrunk support, `c*` is the projection
    /// itself — the objective is already satisfied, so the optimizer has
    /// nothing left to pull towards.
    fn target_point(&self, center_of_mass: &Vec3, gravity: &Vec3) -> Vec3;

    /// True while the object is in contact with this support at all. A
    /// planar support drops out of contact the instant the projected center
    /// of mass leaves the (unshrunk) footprint; a single suspension point
    /// never does, since nothing can detach from it. The driver's objective
    /// state is "off support" exactly when this is false.
    fn is_engaged(&self, center_of_mass: &Vec3, gravity: &Vec3) -> bool;

    /// A scalar measuring how far the configuration is from its stability
    /// limit, together with whether that counts as "met" against
    /// `angle_threshold`. Standing and suspended supports read the angle in
    /// opposite directions (a wider toppling margin is safer; a smaller
    /// hang deviation is safer), so each implementation owns its own
    /// comparison rather than the caller guessing which way to compare.
    fn angle_objective(&self, center_of_mass: &Vec3, gravity: &Vec3, angle_threshold: f64) -> (f64, bool);
}

/// A convex polygon support, given by its vertices in order (winding doesn't
/// matter, it's normalized on construction). Typically the contact footprint
/// of the object's base: the convex hull of the lowest voxel layer.
#[derive(Debug, Clone)]
pub struct PlanarSupport {
    vertices: Vec<Vec3>,
    centroid: Vec3,
}

impl PlanarSupport {
    /// `vertices` must be coplanar and form a convex polygon; fewer than 3
    /// points degenerates to a single contained point (the centroid).
    pub fn new(vertices: Vec<Vec3>) -> Self {
        let centroid = if vertices.is_empty() {
            Vec3::zeros()
        } else {
            let sum: Vec3 = vertices.iter().sum();
            sum / vertices.len() as f64
        };

        Self { vertices, centroid }
    }

    /// Builds an orthonormal basis (u, v) spanning the plane perpendicular to
    /// `gravity`, so polygon containment can be tested as ordinary 2D
    /// point-in-polygon.
    fn plane_basis(gravity: &Vec3) -> (Vec3, Vec3) {
        let n = gravity.normalize();
        let seed = if n.x.abs() < 0.9 {
            Vec3::x()
        } else {
            Vec3::y()
        };
        let u = (seed - n * n.dot(&seed)).normalize();
        let v = n.cross(&u);
        (u, v)
    }

    fn project(&self, point: &Vec3, gravity: &Vec3) -> (f64, f64) {
        let (u, v) = Self::plane_basis(gravity);
        let rel = point - self.centroid;
        (rel.dot(&u), rel.dot(&v))
    }

    fn projected_vertices(&self, gravity: &Vec3) -> Vec<(f64, f64)> {
        let (u, v) = Self::plane_basis(gravity);
        self.vertices
            .iter()
            .map(|p| {
                let rel = p - self.centroid;
                (rel.dot(&u), rel.dot(&v))
            })
            .collect()
    }

    /// Minimum signed distance from `(x, y)` to the polygon's edges, positive
    /// when `(x, y)` is inside. Assumes the polygon's vertices are ordered
    /// (not necessarily convex-hull-reduced, but non-self-intersecting).
    fn signed_distance_2d(poly: &[(f64, f64)], x: f64, y: f64) -> f64 {
        if poly.len() < 3 {
            return if poly.is_empty() {
                0.0
            } else {
                let (px, py) = poly[0];
                -((px - x).hypot(py - y))
            };
        }

        let mut min_dist = f64::MAX;
        let mut inside = false;
        let n = poly.len();
        for i in 0..n {
            let (ax, ay) = poly[i];
            let (bx, by) = poly[(i + 1) % n];

            if (ay > y) != (by > y) {
                let t = (y - ay) / (by - ay);
                let x_cross = ax + t * (bx - ax);
                if x < x_cross {
                    inside = !inside;
                }
            }

            min_dist = min_dist.min(point_segment_distance(x, y, ax, ay, bx, by));
        }

        if inside {
            min_dist
        } else {
            -min_dist
        }
    }

    /// Nearest point to `(x, y)` in or on `poly`: the point itself when
    /// inside, else the nearest point on the nearest edge.
    fn closest_point_2d(poly: &[(f64, f64)], x: f64, y: f64) -> (f64, f64) {
        if poly.len() < 3 {
            return poly.first().copied().unwrap_or((x, y));
        }

        let mut inside = false;
        let n = poly.len();
        for i in 0..n {
            let (ax, ay) = poly[i];
            let (bx, by) = poly[(i + 1) % n];
            if (ay > y) != (by > y) {
                let t = (y - ay) / (by - ay);
                let x_cross = ax + t * (bx - ax);
                if x < x_cross {
                    inside = !inside;
                }
            }
        }
        if inside {
            return (x, y);
        }

        let mut best = (poly[0].0, poly[0].1);
        let mut best_dist = f64::MAX;
        for i in 0..n {
            let (ax, ay) = poly[i];
            let (bx, by) = poly[(i + 1) % n];
            let (cx, cy) = point_on_segment(x, y, ax, ay, bx, by);
            let d = (x - cx).hypot(y - cy);
            if d < best_dist {
                best_dist = d;
                best = (cx, cy);
            }
        }
        best
    }

    /// The angle the object would need to tip through, about the nearest
    /// edge of the (unshrunk) support, before the center of mass's
    /// projection crosses that edge: `atan(margin / height)`, where `margin`
    /// is the signed distance to the boundary (clamped to 0 when already
    /// outside, since a negative margin isn't a meaningful tipping angle
    /// anymore) and `height` is how far the center of mass sits above the
    /// support plane along `-gravity`. Larger is safer — a tall margin over
    /// a short drop tips easily, a short margin over a tall rise barely
    /// tips at all.
    fn toppling_angle(&self, center_of_mass: &Vec3, gravity: &Vec3) -> f64 {
        let n = gravity.normalize();
        let height = -(center_of_mass - self.centroid).dot(&n);
        if height <= 1e-9 {
            return std::f64::consts::FRAC_PI_2;
        }
        let margin = self.signed_distance(center_of_mass, gravity).max(0.0);
        (margin / height).atan()
    }
}

/// A single fixed point the object hangs from. Unlike [`PlanarSupport`] it
/// is never left behind: the stability question for a suspended handle is
/// not "did we fall off" but "how far has the center of mass swung away
/// from hanging straight down".
#[derive(Debug, Clone, Copy)]
pub struct PointSupport {
    point: Vec3,
}

impl PointSupport {
    pub fn new(point: Vec3) -> Self {
        Self { point }
    }

    /// Angle between the line from the suspension point to the center of
    /// mass and `-gravity`: zero when hanging perfectly plumb, growing as
    /// the object swings out to the side.
    fn deviation_angle(&self, center_of_mass: &Vec3, gravity: &Vec3) -> f64 {
        let n = gravity.normalize();
        let rel = center_of_mass - self.point;
        let along = -rel.dot(&n);
        let perp = (rel + n * along).norm();
        perp.atan2(along)
    }
}

impl Support for PointSupport {
    fn contains(&self, _center_of_mass: &Vec3, _gravity: &Vec3) -> bool {
        true
    }

    fn signed_distance(&self, center_of_mass: &Vec3, gravity: &Vec3) -> f64 {
        -self.deviation_angle(center_of_mass, gravity)
    }

    fn centroid(&self) -> Vec3 {
        self.point
    }

    fn target_point(&self, center_of_mass: &Vec3, gravity: &Vec3) -> Vec3 {
        let n = gravity.normalize();
        let along = -(center_of_mass - self.point).dot(&n);
        self.point - n * along
    }

    fn is_engaged(&self, _center_of_mass: &Vec3, _gravity: &Vec3) -> bool {
        true
    }

    fn angle_objective(&self, center_of_mass: &Vec3, gravity: &Vec3, angle_threshold: f64) -> (f64, bool) {
        let angle = self.deviation_angle(center_of_mass, gravity);
        (angle, angle <= angle_threshold)
    }
}

fn point_segment_distance(px: f64, py: f64, ax: f64, ay: f64, bx: f64, by: f64) -> f64 {
    let (cx, cy) = point_on_segment(px, py, ax, ay, bx, by);
    (px - cx).hypot(py - cy)
}

fn point_on_segment(px: f64, py: f64, ax: f64, ay: f64, bx: f64, by: f64) -> (f64, f64) {
    let abx = bx - ax;
    let aby = by - ay;
    let len_sq = abx * abx + aby * aby;
    let t = if len_sq > 1e-15 {
        (((px - ax) * abx + (py - ay) * aby) / len_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };
    (ax + t * abx, ay + t * aby)
}

/// Fraction of the support polygon's half-width kept as the "shrunk
/// stability polygon" the optimizer's target point must stay inside (spec
/// §3). Not pinned down numerically by the spec; chosen as a conservative
/// safety margin and recorded as an Open Question resolution in `DESIGN.md`.
const SHRINK_FACTOR: f64 = 0.85;

impl Support for PlanarSupport {
    fn contains(&self, center_of_mass: &Vec3, gravity: &Vec3) -> bool {
        self.signed_distance(center_of_mass, gravity) >= 0.0
    }

    fn signed_distance(&self, center_of_mass: &Vec3, gravity: &Vec3) -> f64 {
        let poly = self.projected_vertices(gravity);
        let (x, y) = self.project(center_of_mass, gravity);
        Self::signed_distance_2d(&poly, x, y)
    }

    fn centroid(&self) -> Vec3 {
        self.centroid
    }

    fn target_point(&self, center_of_mass: &Vec3, gravity: &Vec3) -> Vec3 {
        let (u, v) = Self::plane_basis(gravity);
        let (x, y) = self.project(center_of_mass, gravity);
        let poly: Vec<(f64, f64)> = self
            .projected_vertices(gravity)
            .into_iter()
            .map(|(px, py)| (px * SHRINK_FACTOR, py * SHRINK_FACTOR))
            .collect();

        let (tx, ty) = Self::closest_point_2d(&poly, x, y);
        self.centroid + u * tx + v * ty
    }

    fn is_engaged(&self, center_of_mass: &Vec3, gravity: &Vec3) -> bool {
        self.contains(center_of_mass, gravity)
    }

    fn angle_objective(&self, center_of_mass: &Vec3, gravity: &Vec3, angle_threshold: f64) -> (f64, bool) {
        let angle = self.toppling_angle(center_of_mass, gravity);
        (angle, angle >= angle_threshold)
    }
}
