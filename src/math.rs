//! Vector and index primitives
//!
//! Arithmetic goes through `cgmath::Vector3<f64>`; container storage uses the
//! plain `[f64; 3]` array so buffers stay bytemuck-castable.

use bytemuck::{Pod, Zeroable};
use cgmath::{InnerSpace, Quaternion, Rad, Rotation, Rotation3};

/// Working 3D vector type.
pub type Vec3 = cgmath::Vector3<f64>;

/// Storage form of a 3D vector.
pub type Packed3 = [f64; 3];

/// Zero vector in storage form.
pub const ZERO3: Packed3 = [0.0; 3];

/// Unpack a stored vector for arithmetic.
#[inline]
pub fn vec3(p: Packed3) -> Vec3 {
    Vec3::from(p)
}

/// Pack a vector for storage.
#[inline]
pub fn pack(v: Vec3) -> Packed3 {
    v.into()
}

/// Narrow a stored vector to GPU/render precision.
#[inline]
pub fn to_f32(p: Packed3) -> [f32; 3] {
    [p[0] as f32, p[1] as f32, p[2] as f32]
}

/// Compact pair of mass indices (spring endpoints, joint anchors).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
pub struct IndexPair {
    pub left: u32,
    pub right: u32,
}

impl IndexPair {
    pub const fn new(left: u32, right: u32) -> Self {
        Self { left, right }
    }

    /// Both indices as `usize`.
    #[inline]
    pub fn get(self) -> (usize, usize) {
        (self.left as usize, self.right as usize)
    }

    /// Whether both indices address an array of length `len`.
    #[inline]
    pub fn within(self, len: usize) -> bool {
        (self.left as usize) < len && (self.right as usize) < len
    }
}

impl From<[u32; 2]> for IndexPair {
    fn from(pair: [u32; 2]) -> Self {
        Self::new(pair[0], pair[1])
    }
}

/// Rotate `point` by `angle` radians about the line through `origin` along
/// `axis`. `axis` must be unit length.
pub fn rotate_about_axis(point: Vec3, origin: Vec3, axis: Vec3, angle: f64) -> Vec3 {
    let rotation = Quaternion::from_axis_angle(axis, Rad(angle));
    origin + rotation.rotate_vector(point - origin)
}

/// Signed angle from `from` to `to` measured about `axis` (right-handed),
/// after projecting both onto the plane normal to `axis`.
pub fn signed_angle_about(from: Vec3, to: Vec3, axis: Vec3) -> f64 {
    let axis = axis.normalize();
    let a = from - axis * from.dot(axis);
    let b = to - axis * to.dot(axis);
    axis.dot(a.cross(b)).atan2(a.dot(b))
}

/// Unit vector along `v`, or zero when `v` is degenerate.
#[inline]
pub fn normalize_or_zero(v: Vec3) -> Vec3 {
    let len = v.magnitude();
    if len > f64::EPSILON {
        v / len
    } else {
        Vec3::new(0.0, 0.0, 0.0)
    }
}
