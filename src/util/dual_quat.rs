//! Dual-quaternion pose type
//!
//! Rigid poses travel on the wire as 8 floats: the rotation quaternion
//! followed by the dual (translation) part, `[rx, ry, rz, rw, dx, dy, dz, dw]`.

use serde::{Deserialize, Serialize};

/// Rigid rotation + translation encoded as a unit dual quaternion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DualQuat(pub [f32; 8]);

impl DualQuat {
    pub const IDENTITY: Self = Self([0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0]);

    /// Build from a unit rotation quaternion `[x, y, z, w]` and a translation
    #[inline]
    pub fn from_rotation_translation(rotation: [f32; 4], translation: [f32; 3]) -> Self {
        let [qx, qy, qz, qw] = rotation;
        let [tx, ty, tz] = translation;

        // dual = 0.5 * (t, 0) * q
        let dx = 0.5 * (tx * qw + ty * qz - tz * qy);
        let dy = 0.5 * (-tx * qz + ty * qw + tz * qx);
        let dz = 0.5 * (tx * qy - ty * qx + tz * qw);
        let dw = 0.5 * (-tx * qx - ty * qy - tz * qz);

        Self([qx, qy, qz, qw, dx, dy, dz, dw])
    }

    /// Rotation of `angle` radians around the +Y axis, then translation
    #[inline]
    pub fn from_axis_angle_y(angle: f32, translation: [f32; 3]) -> Self {
        let half = angle * 0.5;
        Self::from_rotation_translation([0.0, half.sin(), 0.0, half.cos()], translation)
    }

    /// Rotation part `[x, y, z, w]`
    #[inline]
    pub fn rotation(&self) -> [f32; 4] {
        [self.0[0], self.0[1], self.0[2], self.0[3]]
    }

    /// Recover the translation: `t = 2 * dual * conj(real)`
    #[inline]
    pub fn translation(&self) -> [f32; 3] {
        let [rx, ry, rz, rw, dx, dy, dz, dw] = self.0;
        let (cx, cy, cz, cw) = (-rx, -ry, -rz, rw);

        [
            2.0 * (dw * cx + dx * cw + dy * cz - dz * cy),
            2.0 * (dw * cy - dx * cz + dy * cw + dz * cx),
            2.0 * (dw * cz + dx * cy - dy * cx + dz * cw),
        ]
    }

    #[inline]
    pub fn as_array(&self) -> &[f32; 8] {
        &self.0
    }
}

impl Default for DualQuat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl From<[f32; 8]> for DualQuat {
    fn from(values: [f32; 8]) -> Self {
        Self(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-5;

    fn approx_eq(a: [f32; 3], b: [f32; 3]) -> bool {
        a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < EPSILON)
    }

    #[test]
    fn test_identity_has_no_translation() {
        assert_eq!(DualQuat::IDENTITY.translation(), [0.0, 0.0, 0.0]);
        assert_eq!(DualQuat::default(), DualQuat::IDENTITY);
    }

    #[test]
    fn test_translation_only() {
        let dq = DualQuat::from_rotation_translation([0.0, 0.0, 0.0, 1.0], [1.0, 2.0, 3.0]);
        assert_eq!(dq.rotation(), [0.0, 0.0, 0.0, 1.0]);
        assert!(approx_eq(dq.translation(), [1.0, 2.0, 3.0]));
    }

    #[test]
    fn test_rotated_translation_recovered() {
        let dq = DualQuat::from_axis_angle_y(std::f32::consts::FRAC_PI_2, [0.5, 1.6, -2.0]);
        assert!(approx_eq(dq.translation(), [0.5, 1.6, -2.0]));

        let rotation = dq.rotation();
        let norm: f32 = rotation.iter().map(|v| v * v).sum();
        assert!((norm - 1.0).abs() < EPSILON);
    }

    #[test]
    fn test_serializes_as_plain_array() {
        let dq = DualQuat::from([1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let json = serde_json::to_string(&dq).unwrap();
        assert_eq!(json, "[1.0,2.0,3.0,4.0,5.0,6.0,7.0,8.0]");

        let back: DualQuat = serde_json::from_str(&json).unwrap();
        assert_eq!(back, dq);
    }

    #[test]
    fn test_rejects_wrong_length() {
        let result: Result<DualQuat, _> = serde_json::from_str("[1.0, 2.0, 3.0]");
        assert!(result.is_err());
    }
}
