//! Pose decoding.
//!
//! The detection engine reports the object pose as 16 floats: a row-major 4x4
//! homogeneous matrix with the translation in the last column. Decoding strips
//! any per-axis scale from the upper-left 3x3 block before converting it to a
//! unit quaternion, so scaled or slightly skewed matrices still produce a
//! normalized rotation.

use nalgebra::{Matrix3, Matrix4, Rotation3, UnitQuaternion, Vector3};
use serde::Serialize;

/// Number of elements in an engine transformation.
pub const TRANSFORMATION_LEN: usize = 16;

/// Axis scales below this are treated as a collapsed basis.
const MIN_AXIS_SCALE: f32 = 1.0e-6;

/// Convergence threshold for the rotation refinement.
const ORTHONORMALIZE_EPS: f32 = 1.0e-6;
const ORTHONORMALIZE_MAX_ITER: usize = 32;

// ----------------------------------------------------------------------------
// Transformation: raw engine output
// ----------------------------------------------------------------------------

/// Row-major 4x4 transformation as delivered by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Transformation([f32; TRANSFORMATION_LEN]);

impl Transformation {
    pub fn from_row_major(values: [f32; TRANSFORMATION_LEN]) -> Self {
        Self(values)
    }

    /// Build from an engine callback payload.
    ///
    /// # Panics
    ///
    /// Panics unless `values` has exactly 16 elements. The engine contract
    /// guarantees the length, so anything else is a programming error.
    pub fn from_slice(values: &[f32]) -> Self {
        assert_eq!(
            values.len(),
            TRANSFORMATION_LEN,
            "engine transformation must have {} elements, got {}",
            TRANSFORMATION_LEN,
            values.len()
        );
        let mut raw = [0.0; TRANSFORMATION_LEN];
        raw.copy_from_slice(values);
        Self(raw)
    }

    pub fn identity() -> Self {
        Self::from_matrix(&Matrix4::identity())
    }

    pub fn from_matrix(matrix: &Matrix4<f32>) -> Self {
        let mut raw = [0.0; TRANSFORMATION_LEN];
        for row in 0..4 {
            for col in 0..4 {
                raw[row * 4 + col] = matrix[(row, col)];
            }
        }
        Self(raw)
    }

    pub fn as_row_major(&self) -> &[f32; TRANSFORMATION_LEN] {
        &self.0
    }

    pub fn to_matrix(&self) -> Matrix4<f32> {
        Matrix4::from_row_slice(&self.0)
    }

    pub fn decode(&self) -> Pose {
        let matrix = self.to_matrix();
        let position = Vector3::new(matrix[(0, 3)], matrix[(1, 3)], matrix[(2, 3)]);
        let linear: Matrix3<f32> = matrix.fixed_view::<3, 3>(0, 0).into_owned();
        Pose {
            position,
            rotation: rotation_from_linear(&linear),
        }
    }
}

/// Decode a flat engine transformation into a pose.
///
/// # Panics
///
/// Panics unless `values` has exactly 16 elements.
pub fn decode(values: &[f32]) -> Pose {
    Transformation::from_slice(values).decode()
}

// ----------------------------------------------------------------------------
// Pose: position + orientation
// ----------------------------------------------------------------------------

/// World position and orientation. Used both for decoded placements and for
/// the camera pose attached to each frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Pose {
    pub position: Vector3<f32>,
    pub rotation: UnitQuaternion<f32>,
}

impl Pose {
    pub fn new(position: Vector3<f32>, rotation: UnitQuaternion<f32>) -> Self {
        Self { position, rotation }
    }

    pub fn identity() -> Self {
        Self {
            position: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
        }
    }

    /// Homogeneous matrix with the translation in the last column.
    pub fn to_matrix(&self) -> Matrix4<f32> {
        let mut matrix = self.rotation.to_homogeneous();
        matrix.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.position);
        matrix
    }

    pub fn to_transformation(&self) -> Transformation {
        Transformation::from_matrix(&self.to_matrix())
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

fn rotation_from_linear(linear: &Matrix3<f32>) -> UnitQuaternion<f32> {
    let scales = Vector3::new(
        linear.column(0).norm(),
        linear.column(1).norm(),
        linear.column(2).norm(),
    );
    if scales.iter().any(|s| !s.is_finite() || *s < MIN_AXIS_SCALE) {
        log::warn!(
            "degenerate rotation block (axis scales {:?}), using identity orientation",
            scales.as_slice()
        );
        return UnitQuaternion::identity();
    }

    let mut basis = *linear;
    for (mut column, scale) in basis.column_iter_mut().zip(scales.iter()) {
        column.unscale_mut(*scale);
    }
    if basis.determinant() < 0.0 {
        // Mirrored basis: attribute the reflection to a negative x scale.
        log::debug!("mirrored rotation block, flipping x axis");
        let flipped = -basis.column(0);
        basis.set_column(0, &flipped);
    }

    // Closed-form estimate first, then polish it against the unscaled block.
    // The iterative refinement needs a nearby guess; from identity it stalls
    // on half-turn rotations.
    let estimate = UnitQuaternion::new_normalize(
        UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(basis))
            .into_inner(),
    );
    let refined = Rotation3::from_matrix_eps(
        &basis,
        ORTHONORMALIZE_EPS,
        ORTHONORMALIZE_MAX_ITER,
        estimate.to_rotation_matrix(),
    );
    UnitQuaternion::new_normalize(UnitQuaternion::from_rotation_matrix(&refined).into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::{FRAC_PI_2, PI};

    fn row_major(matrix: &Matrix4<f32>) -> Vec<f32> {
        Transformation::from_matrix(matrix).as_row_major().to_vec()
    }

    #[test]
    fn identity_decodes_to_origin() {
        let pose = decode(&row_major(&Matrix4::identity()));

        assert_relative_eq!(pose.position, Vector3::zeros());
        assert_relative_eq!(pose.rotation.angle(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn translation_comes_from_last_column() {
        let mut values = row_major(&Matrix4::identity());
        values[3] = 1.5;
        values[7] = -2.0;
        values[11] = 0.25;
        // Bottom row is ignored.
        values[12] = 9.0;

        let pose = decode(&values);
        assert_relative_eq!(pose.position, Vector3::new(1.5, -2.0, 0.25));
    }

    #[test]
    fn round_trip_reproduces_matrix() {
        let rotations = [
            UnitQuaternion::from_euler_angles(0.3, -0.7, 1.1),
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), FRAC_PI_2),
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), PI),
            UnitQuaternion::from_axis_angle(&Vector3::x_axis(), -2.5),
        ];
        for rotation in rotations {
            let original = Pose::new(Vector3::new(0.4, 1.2, -3.0), rotation);
            let matrix = original.to_matrix();

            let decoded = decode(&row_major(&matrix));

            assert_relative_eq!(decoded.position, original.position, epsilon = 1e-6);
            assert_relative_eq!(decoded.to_matrix(), matrix, epsilon = 1e-5);
            assert_relative_eq!(decoded.rotation.norm(), 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn uniform_scale_is_stripped() {
        let rotation = UnitQuaternion::from_euler_angles(0.2, 0.4, -0.6);
        let mut matrix = Pose::new(Vector3::new(1.0, 2.0, 3.0), rotation).to_matrix();
        for row in 0..3 {
            for col in 0..3 {
                matrix[(row, col)] *= 2.5;
            }
        }

        let decoded = decode(&row_major(&matrix));

        assert!(decoded.rotation.coords.iter().all(|c| c.is_finite()));
        assert_relative_eq!(decoded.rotation.angle_to(&rotation), 0.0, epsilon = 1e-4);
        assert_relative_eq!(decoded.position, Vector3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn near_orthogonal_block_stays_normalized() {
        let rotation = UnitQuaternion::from_euler_angles(-0.9, 0.1, 0.5);
        let mut matrix = rotation.to_homogeneous();
        matrix[(0, 1)] += 1e-3;
        matrix[(2, 0)] -= 1e-3;

        let decoded = decode(&row_major(&matrix));

        assert_relative_eq!(decoded.rotation.norm(), 1.0, epsilon = 1e-6);
        assert!(decoded.rotation.angle_to(&rotation) < 1e-2);
    }

    #[test]
    fn collapsed_basis_falls_back_to_identity() {
        let mut matrix = Matrix4::identity();
        matrix[(1, 1)] = 0.0;

        let decoded = decode(&row_major(&matrix));
        assert_eq!(decoded.rotation, UnitQuaternion::identity());
    }

    #[test]
    #[should_panic(expected = "must have 16 elements")]
    fn short_transformation_panics() {
        decode(&[0.0; 12]);
    }

    #[test]
    #[should_panic(expected = "must have 16 elements")]
    fn long_transformation_panics() {
        decode(&[0.0; 17]);
    }
}
