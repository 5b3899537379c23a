use nalgebra::{Matrix3, Vector3};

/// Scalar type used throughout the crate. The optimizer and voxel grid are not
/// generic over it: the reference implementation works in double precision and
/// so do we.
pub type Scalar = f64;

pub type Vec3<T = Scalar> = Vector3<T>;
pub type Mat3<T = Scalar> = Matrix3<T>;
pub type Vec3i = Vector3<isize>;
