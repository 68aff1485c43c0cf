// Transform utilities for Mat4
//
// USD stores `matrix4d` values row-major with row vectors, translation in the
// last row. glam is column-major with column vectors, so a USD row maps
// directly onto a glam column.

use glam::{DMat4, Mat4, Vec3};
use serde::{Deserialize, Serialize};

/// Stage up axis as authored in layer metadata.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpAxis {
    #[default]
    Y,
    Z,
}

impl UpAxis {
    /// Parse the `upAxis` token. Anything other than "Z" is treated as Y.
    pub fn from_token(token: &str) -> Self {
        if token.eq_ignore_ascii_case("z") {
            UpAxis::Z
        } else {
            UpAxis::Y
        }
    }

    pub fn as_token(&self) -> &'static str {
        match self {
            UpAxis::Y => "Y",
            UpAxis::Z => "Z",
        }
    }

    /// Basis change taking points authored in `self` into `target`.
    pub fn conversion_to(&self, target: UpAxis) -> Mat4 {
        match (self, target) {
            (UpAxis::Y, UpAxis::Z) => Mat4::from_rotation_x(std::f32::consts::FRAC_PI_2),
            (UpAxis::Z, UpAxis::Y) => Mat4::from_rotation_x(-std::f32::consts::FRAC_PI_2),
            _ => Mat4::IDENTITY,
        }
    }
}

/// Extension trait for Mat4 covering USD interchange.
pub trait Mat4Ext {
    /// Build a matrix from USD `matrix4d` rows.
    fn from_usd_rows(rows: [[f64; 4]; 4]) -> Self;

    /// Rows as authored in a USD `matrix4d` value.
    fn to_usd_rows(&self) -> [[f64; 4]; 4];

    /// Component-wise comparison within `epsilon`.
    fn approx_eq(&self, other: &Self, epsilon: f32) -> bool;

    fn is_identity_approx(&self) -> bool;
}

impl Mat4Ext for Mat4 {
    fn from_usd_rows(rows: [[f64; 4]; 4]) -> Self {
        DMat4::from_cols_array_2d(&rows).as_mat4()
    }

    fn to_usd_rows(&self) -> [[f64; 4]; 4] {
        self.as_dmat4().to_cols_array_2d()
    }

    fn approx_eq(&self, other: &Self, epsilon: f32) -> bool {
        self.to_cols_array()
            .iter()
            .zip(other.to_cols_array().iter())
            .all(|(a, b)| (a - b).abs() <= epsilon)
    }

    fn is_identity_approx(&self) -> bool {
        self.approx_eq(&Mat4::IDENTITY, 1e-6)
    }
}

/// Translation component of a matrix.
pub fn translation_of(m: &Mat4) -> Vec3 {
    m.w_axis.truncate()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usd_rows_translation_in_last_row() {
        let rows = [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [10.0, 20.0, 30.0, 1.0],
        ];
        let m = Mat4::from_usd_rows(rows);
        assert_eq!(translation_of(&m), Vec3::new(10.0, 20.0, 30.0));
        assert_eq!(
            m.transform_point3(Vec3::ZERO),
            Vec3::new(10.0, 20.0, 30.0)
        );
    }

    #[test]
    fn test_usd_rows_round_trip() {
        let m = Mat4::from_scale_rotation_translation(
            Vec3::new(2.0, 2.0, 2.0),
            glam::Quat::from_rotation_z(0.5),
            Vec3::new(1.0, -3.0, 4.5),
        );
        let back = Mat4::from_usd_rows(m.to_usd_rows());
        assert!(back.approx_eq(&m, 1e-6));
    }

    #[test]
    fn test_identity_detection() {
        assert!(Mat4::IDENTITY.is_identity_approx());
        assert!(!Mat4::from_translation(Vec3::X).is_identity_approx());
    }

    #[test]
    fn test_up_axis_conversion() {
        let m = UpAxis::Y.conversion_to(UpAxis::Z);
        let up = m.transform_vector3(Vec3::Y);
        assert!((up - Vec3::Z).length() < 1e-6);
        assert!(UpAxis::Z.conversion_to(UpAxis::Z).is_identity_approx());
        assert_eq!(UpAxis::from_token("Z"), UpAxis::Z);
        assert_eq!(UpAxis::from_token("Y").as_token(), "Y");
    }
}
