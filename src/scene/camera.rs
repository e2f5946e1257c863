//! Camera component
//!
//! The view comes from the camera entity's transform node; the component only
//! describes the projection.

use bevy_ecs::prelude::*;
use glam::{Mat3, Mat4, Vec3};

/// Camera projection type
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective {
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        near: f32,
        far: f32,
    },
}

impl Default for Projection {
    fn default() -> Self {
        Projection::Perspective {
            fov_y: std::f32::consts::FRAC_PI_4,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Projection {
    pub fn perspective(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Projection::Perspective {
            fov_y: fov_y_degrees.to_radians(),
            aspect,
            near,
            far,
        }
    }

    pub fn orthographic(width: f32, height: f32, near: f32, far: f32) -> Self {
        let half_w = width / 2.0;
        let half_h = height / 2.0;
        Projection::Orthographic {
            left: -half_w,
            right: half_w,
            bottom: -half_h,
            top: half_h,
            near,
            far,
        }
    }

    pub fn matrix(&self) -> Mat4 {
        match self {
            Projection::Perspective {
                fov_y,
                aspect,
                near,
                far,
            } => Mat4::perspective_rh(*fov_y, *aspect, *near, *far),
            Projection::Orthographic {
                left,
                right,
                bottom,
                top,
                near,
                far,
            } => Mat4::orthographic_rh(*left, *right, *bottom, *top, *near, *far),
        }
    }

    pub fn near(&self) -> f32 {
        match self {
            Projection::Perspective { near, .. } => *near,
            Projection::Orthographic { near, .. } => *near,
        }
    }

    pub fn far(&self) -> f32 {
        match self {
            Projection::Perspective { far, .. } => *far,
            Projection::Orthographic { far, .. } => *far,
        }
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        if let Projection::Perspective { aspect: a, .. } = self {
            *a = aspect;
        }
    }
}

/// Camera component
#[derive(Component, Debug, Clone, Default, PartialEq)]
pub struct Camera {
    pub projection: Projection,
}

impl Camera {
    pub fn new(projection: Projection) -> Self {
        Self { projection }
    }

    pub fn perspective(fov_y_degrees: f32, near: f32, far: f32) -> Self {
        Self::new(Projection::perspective(fov_y_degrees, 16.0 / 9.0, near, far))
    }

    /// Get the projection matrix
    pub fn projection_matrix(&self) -> Mat4 {
        self.projection.matrix()
    }

    /// Update aspect ratio for perspective projection
    pub fn set_aspect(&mut self, width: f32, height: f32) {
        if height > 0.0 {
            self.projection.set_aspect(width / height);
        }
    }
}

/// Per-frame camera matrices resolved against the transform graph
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraView {
    pub view: Mat4,
    pub projection: Mat4,
    pub position: Vec3,
}

impl CameraView {
    /// View from a node's world matrix; scale on the node is ignored
    pub fn from_world(world: Mat4, projection: Mat4) -> Self {
        let (_, rotation, position) = world.to_scale_rotation_translation();
        Self {
            view: Mat4::from_rotation_translation(rotation, position).inverse(),
            projection,
            position,
        }
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }

    /// View-projection with the view translation removed, for the skybox
    pub fn rotation_projection(&self) -> Mat4 {
        self.projection * Mat4::from_mat3(Mat3::from_mat4(self.view))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec4};

    #[test]
    fn test_view_inverts_world() {
        let world = Mat4::from_rotation_translation(Quat::from_rotation_y(0.4), Vec3::new(1.0, 2.0, 3.0));
        let view = CameraView::from_world(world, Mat4::IDENTITY);
        assert!((view.view * world).abs_diff_eq(Mat4::IDENTITY, 1e-5));
        assert!(view.position.abs_diff_eq(Vec3::new(1.0, 2.0, 3.0), 1e-6));
    }

    #[test]
    fn test_rotation_projection_ignores_translation() {
        let world = Mat4::from_translation(Vec3::new(10.0, -4.0, 2.0));
        let view = CameraView::from_world(world, Mat4::IDENTITY);
        let direction = view.rotation_projection() * Vec4::new(0.0, 0.0, -1.0, 1.0);
        assert!(direction.abs_diff_eq(Vec4::new(0.0, 0.0, -1.0, 1.0), 1e-6));
    }

    #[test]
    fn test_set_aspect() {
        let mut camera = Camera::perspective(60.0, 0.1, 100.0);
        camera.set_aspect(800.0, 400.0);
        assert!(matches!(camera.projection, Projection::Perspective { aspect, .. } if aspect == 2.0));
        camera.set_aspect(800.0, 0.0);
        assert!(matches!(camera.projection, Projection::Perspective { aspect, .. } if aspect == 2.0));
    }
}
