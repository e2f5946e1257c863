//! Local transform value

use bevy_ecs::prelude::*;
use glam::{Mat4, Quat, Vec3};

/// Position, rotation and scale of a node relative to its parent
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn from_position_rotation(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            ..Default::default()
        }
    }

    pub fn from_position_scale(position: Vec3, scale: Vec3) -> Self {
        Self {
            position,
            scale,
            ..Default::default()
        }
    }

    /// Decompose a matrix built by [`Transform::matrix`].
    /// Exact for uniform scale; shear from non-uniform parents is lost.
    pub fn from_matrix(matrix: Mat4) -> Self {
        let (scale, rotation, translation) = matrix.to_scale_rotation_translation();
        let position = Vec3::select(scale.cmpeq(Vec3::ZERO), translation, translation / scale);
        Self {
            position,
            rotation,
            scale,
        }
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_uniform_scale(mut self, scale: f32) -> Self {
        self.scale = Vec3::splat(scale);
        self
    }

    /// Local matrix `scale * translation * rotation`.
    /// The scale applies to the whole local frame, offset included, so a child
    /// at (0, 1, 0) with scale 0.5 sits half a unit above its parent.
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale(self.scale) * Mat4::from_rotation_translation(self.rotation, self.position)
    }

    /// Get forward direction (local -Z)
    pub fn forward(&self) -> Vec3 {
        self.rotation * -Vec3::Z
    }

    /// Get right direction (local +X)
    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    /// Get up direction (local +Y)
    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    /// Rotate so that forward points at `target`
    pub fn look_at(mut self, target: Vec3, up: Vec3) -> Self {
        let forward = (target - self.position).normalize_or_zero();
        if forward == Vec3::ZERO {
            return self;
        }
        let up = if forward.cross(up).length_squared() < 1e-6 {
            forward.any_orthonormal_vector()
        } else {
            up
        };
        let right = forward.cross(up).normalize();
        let up = right.cross(forward);
        self.rotation = Quat::from_mat3(&glam::Mat3::from_cols(right, up, -forward));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_matrix() {
        assert_eq!(Transform::IDENTITY.matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn test_matrix_round_trip() {
        let t = Transform::from_position(Vec3::new(1.0, 2.0, 3.0))
            .with_rotation(Quat::from_rotation_y(0.7))
            .with_uniform_scale(2.0);
        let back = Transform::from_matrix(t.matrix());
        assert!(back.position.abs_diff_eq(t.position, 1e-5));
        assert!(back.scale.abs_diff_eq(t.scale, 1e-5));
        assert!(back.rotation.abs_diff_eq(t.rotation, 1e-5));
    }

    #[test]
    fn test_scale_applies_to_offset() {
        let t = Transform::from_position(Vec3::Y).with_uniform_scale(0.5);
        assert!(t.matrix().transform_point3(Vec3::ZERO).abs_diff_eq(Vec3::new(0.0, 0.5, 0.0), 1e-6));
    }

    #[test]
    fn test_look_at_points_forward() {
        let t = Transform::from_position(Vec3::new(0.0, 0.0, 5.0)).look_at(Vec3::ZERO, Vec3::Y);
        assert!(t.forward().abs_diff_eq(-Vec3::Z, 1e-5));

        let down = Transform::from_position(Vec3::Y).look_at(Vec3::ZERO, Vec3::Y);
        assert!(down.forward().abs_diff_eq(-Vec3::Y, 1e-5));
    }
}
