//! Mass and center-of-mass of a closed surface via the divergence theorem.
//!
//! For a closed, consistently-oriented triangle mesh the volume enclosed and
//! its center of mass can be computed as a sum over triangles of the signed
//! volume of the tetrahedron formed with the origin, weighted by that
//! tetrahedron's centroid. No assumption is made about which way the surface
//! winds relative to the origin: degenerate or inverted triangles contribute
//! negative volume and cancel out correctly as long as the whole surface is
//! closed.

use crate::helpers::aliases::{Mat3, Vec3};

/// Accumulates signed volume and the first moment of volume (volume * centroid)
/// over a set of triangles. `center_of_mass()` divides through once at the end
/// so that contributions from individual faces never need to carry a partial
/// centroid.
#[derive(Debug, Clone, Copy, Default)]
pub struct MassProperties {
    pub volume: f64,
    moment: Vec3,
}

impl MassProperties {
    pub fn zero() -> Self {
        Self {
            volume: 0.0,
            moment: Vec3::zeros(),
        }
    }

    #[inline]
    pub fn add_triangle(&mut self, v0: &Vec3, v1: &Vec3, v2: &Vec3) {
        let (volume, moment) = triangle_volume_and_moment(v0, v1, v2);
        self.volume += volume;
        self.moment += moment;
    }

    /// Splits the quad (v0,v1,v2,v3) the same way the reference implementation
    /// does: (v0,v1,v2) + (v2,v3,v0).
    #[inline]
    pub fn add_quad(&mut self, v0: &Vec3, v1: &Vec3, v2: &Vec3, v3: &Vec3) {
        self.add_triangle(v0, v1, v2);
        self.add_triangle(v2, v3, v0);
    }

    /// 6-quad closed box, corners ordered the way `Box3::vertex` emits them:
    /// (x,y,z),(X,y,z),(x,Y,z),(X,Y,z),(x,y,Z),(X,y,Z),(x,Y,Z),(X,Y,Z).
    pub fn add_box(&mut self, corners: &[Vec3; 8]) {
        const FACES: [[usize; 4]; 6] = [
            [0, 1, 3, 2],
            [0, 4, 5, 1],
            [0, 2, 6, 4],
            [4, 6, 7, 5],
            [2, 3, 7, 6],
            [1, 5, 7, 3],
        ];

        for face in FACES {
            self.add_quad(
                &corners[face[0]],
                &corners[face[1]],
                &corners[face[2]],
                &corners[face[3]],
            );
        }
    }

    pub fn mass(&self) -> f64 {
        self.volume
    }

    pub fn center_of_mass(&self) -> Vec3 {
        if self.volume.abs() < f64::EPSILON {
            return Vec3::zeros();
        }

        self.moment / self.volume
    }

    /// The raw first moment of volume (`volume * centroid`), undivided.
    /// Needed wherever moments from several parts are summed before a single
    /// division, rather than averaging already-divided centroids.
    pub fn moment(&self) -> Vec3 {
        self.moment
    }

    #[inline]
    pub fn merge(&mut self, other: &MassProperties) {
        self.volume += other.volume;
        self.moment += other.moment;
    }
}

#[inline]
fn triangle_volume_and_moment(v0: &Vec3, v1: &Vec3, v2: &Vec3) -> (f64, Vec3) {
    let volume = v0.dot(&v1.cross(v2)) / 6.0;
    let centroid = (v0 + v1 + v2) / 4.0;
    (volume, centroid * volume)
}

/// Analytic gradient of a single triangle's volume and volume-moment with
/// respect to each of its three vertices. `d_volume[i]` is `d(volume)/d(v_i)`
/// (a vector, since volume is a scalar); `d_moment[i]` is the Jacobian
/// `d(moment)/d(v_i)` (moment is a vector, so this is a 3x3 matrix).
#[derive(Debug, Clone, Copy)]
pub struct TriangleMassGrad {
    pub volume: f64,
    pub moment: Vec3,
    pub d_volume: [Vec3; 3],
    pub d_moment: [Mat3; 3],
}

pub fn triangle_mass_grad(v0: &Vec3, v1: &Vec3, v2: &Vec3) -> TriangleMassGrad {
    let volume = v0.dot(&v1.cross(v2)) / 6.0;
    let centroid = (v0 + v1 + v2) / 4.0;
    let moment = centroid * volume;

    let d_volume = [
        v1.cross(v2) / 6.0,
        v2.cross(v0) / 6.0,
        v0.cross(v1) / 6.0,
    ];

    let d_moment = d_volume.map(|dv| dv * centroid.transpose() + Mat3::identity() * (volume / 4.0));

    TriangleMassGrad {
        volume,
        moment,
        d_volume,
        d_moment,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_cube_corners(origin: Vec3) -> [Vec3; 8] {
        let mut corners = [Vec3::zeros(); 8];
        for i in 0..8u8 {
            corners[i as usize] = origin
                + Vec3::new(
                    (i % 2) as f64,
                    ((i / 2) % 2) as f64,
                    if i > 3 { 1.0 } else { 0.0 },
                );
        }
        corners
    }

    #[test]
    fn unit_cube_has_unit_volume_and_centered_com() {
        let corners = unit_cube_corners(Vec3::zeros());
        let mut props = MassProperties::zero();
        props.add_box(&corners);

        assert!((props.mass() - 1.0).abs() < 1e-9, "volume was {}", props.mass());
        let com = props.center_of_mass();
        assert!((com - Vec3::new(0.5, 0.5, 0.5)).norm() < 1e-9);
    }

    #[test]
    fn translating_the_box_translates_the_com_but_not_the_volume() {
        let shift = Vec3::new(3.0, -2.0, 1.0);
        let corners = unit_cube_corners(shift);
        let mut props = MassProperties::zero();
        props.add_box(&corners);

        assert!((props.mass() - 1.0).abs() < 1e-9);
        let com = props.center_of_mass();
        assert!((com - (Vec3::new(0.5, 0.5, 0.5) + shift)).norm() < 1e-9);
    }

    #[test]
    fn two_adjacent_boxes_sum_like_their_union() {
        let mut whole = MassProperties::zero();
        whole.add_box(&unit_cube_corners(Vec3::zeros()));
        whole.add_box(&unit_cube_corners(Vec3::new(1.0, 0.0, 0.0)));

        assert!((whole.mass() - 2.0).abs() < 1e-9);
        let com = whole.center_of_mass();
        assert!((com - Vec3::new(1.0, 0.5, 0.5)).norm() < 1e-9);
    }

    #[test]
    fn triangle_gradient_matches_finite_difference() {
        let v0 = Vec3::new(0.1, 0.2, 0.0);
        let v1 = Vec3::new(1.0, 0.0, 0.0);
        let v2 = Vec3::new(0.0, 1.0, 0.3);

        let grad = triangle_mass_grad(&v0, &v1, &v2);

        let h = 1e-6;
        for axis in 0..3 {
            let mut v0_plus = v0;
            v0_plus[axis] += h;
            let (vol_plus, _) = triangle_volume_and_moment(&v0_plus, &v1, &v2);
            let (vol_minus, _) = {
                let mut v0_minus = v0;
                v0_minus[axis] -= h;
                triangle_volume_and_moment(&v0_minus, &v1, &v2)
            };
            let numeric = (vol_plus - vol_minus) / (2.0 * h);
            assert!(
                (numeric - grad.d_volume[0][axis]).abs() < 1e-4,
                "axis {axis}: numeric {numeric} vs analytic {}",
                grad.d_volume[0][axis]
            );
        }
    }
}
