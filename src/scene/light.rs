//! Light descriptors
//!
//! Position and direction come from the transform node of the owning entity;
//! a light only stores its photometric data and the derived range and shadow
//! projection, which every setter keeps current.

use bevy_ecs::prelude::*;
use glam::{Mat4, Vec3};

/// Color depth of the display used to derive a light's cut-off range
pub const COLOR_DEPTH: f32 = 256.0;
/// Far plane of the six point light shadow faces
pub const POINT_SHADOW_FAR_PLANE: f32 = 25.0;
/// Upper bound for the far plane of a spot shadow
pub const SPOT_SHADOW_MAX_FAR: f32 = 50.0;
pub const SHADOW_NEAR_PLANE: f32 = 0.1;
/// Default half-size of the directional shadow volume
pub const DEFAULT_DIRECTIONAL_EXTENT: f32 = 40.0;

/// Distance falloff `1 / (constant + linear * d + quadratic * d^2)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attenuation {
    pub constant: f32,
    pub linear: f32,
    pub quadratic: f32,
}

impl Default for Attenuation {
    fn default() -> Self {
        Self {
            constant: 1.0,
            linear: 0.09,
            quadratic: 0.032,
        }
    }
}

impl Attenuation {
    pub fn new(constant: f32, linear: f32, quadratic: f32) -> Self {
        Self {
            constant,
            linear,
            quadratic,
        }
    }

    /// Distance beyond which the brightest channel drops below one display step.
    /// Infinite when neither linear nor quadratic falloff is set.
    pub fn range(&self, color: Vec3, intensity: f32) -> f32 {
        let c = self.constant - COLOR_DEPTH * intensity * color.max_element();
        if self.quadratic > 0.0 {
            let discriminant = self.linear * self.linear - 4.0 * self.quadratic * c;
            (-self.linear + discriminant.max(0.0).sqrt()) / (2.0 * self.quadratic)
        } else if self.linear > 0.0 {
            -c / self.linear
        } else {
            f32::INFINITY
        }
    }

    /// `(constant, linear, quadratic)` as the lighting programs take it
    pub fn as_vec3(&self) -> Vec3 {
        Vec3::new(self.constant, self.linear, self.quadratic)
    }
}

/// Shadow parameters of a light
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowInfo {
    pub projection: Mat4,
    pub casts_shadows: bool,
    /// Shadow views mirror the winding, so the caster pass culls the other face
    pub flip_faces: bool,
}

impl Default for ShadowInfo {
    fn default() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            casts_shadows: false,
            flip_faces: false,
        }
    }
}

/// Light type, in the order the lighting passes visit them
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LightType {
    Directional,
    Point,
    Spot,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    Directional,
    Point {
        attenuation: Attenuation,
    },
    Spot {
        attenuation: Attenuation,
        /// Cosine of the half-angle of the cone
        cutoff: f32,
    },
}

/// Light component
#[derive(Component, Debug, Clone, PartialEq)]
pub struct Light {
    kind: LightKind,
    color: Vec3,
    intensity: f32,
    range: f32,
    shadow: ShadowInfo,
    directional_extent: f32,
}

impl Light {
    fn with_kind(kind: LightKind, color: Vec3, intensity: f32) -> Self {
        let mut light = Self {
            kind,
            color,
            intensity,
            range: f32::INFINITY,
            shadow: ShadowInfo::default(),
            directional_extent: DEFAULT_DIRECTIONAL_EXTENT,
        };
        light.refresh();
        light
    }

    pub fn directional(color: Vec3, intensity: f32) -> Self {
        Self::with_kind(LightKind::Directional, color, intensity)
    }

    pub fn point(color: Vec3, intensity: f32, attenuation: Attenuation) -> Self {
        Self::with_kind(LightKind::Point { attenuation }, color, intensity)
    }

    /// Spot light with a cone half-angle in degrees
    pub fn spot(color: Vec3, intensity: f32, attenuation: Attenuation, cutoff_degrees: f32) -> Self {
        Self::with_kind(
            LightKind::Spot {
                attenuation,
                cutoff: cutoff_degrees.to_radians().cos(),
            },
            color,
            intensity,
        )
    }

    pub fn with_shadows(mut self, casts_shadows: bool) -> Self {
        self.shadow.casts_shadows = casts_shadows;
        self
    }

    /// Recompute range and shadow projection from the current parameters
    fn refresh(&mut self) {
        self.range = match self.kind {
            LightKind::Directional => f32::INFINITY,
            LightKind::Point { attenuation } | LightKind::Spot { attenuation, .. } => {
                attenuation.range(self.color, self.intensity)
            }
        };

        let (projection, flip_faces) = match self.kind {
            LightKind::Directional => {
                let e = self.directional_extent;
                (Mat4::orthographic_rh(-e, e, -e, e, 0.0, 2.0 * e), false)
            }
            LightKind::Point { .. } => (
                Mat4::perspective_lh(
                    std::f32::consts::FRAC_PI_2,
                    1.0,
                    SHADOW_NEAR_PLANE,
                    POINT_SHADOW_FAR_PLANE,
                ),
                true,
            ),
            LightKind::Spot { cutoff, .. } => {
                let fov = 2.0 * cutoff.clamp(-1.0, 1.0).acos();
                (
                    Mat4::perspective_rh(
                        fov.clamp(1e-3, std::f32::consts::PI - 1e-3),
                        1.0,
                        SHADOW_NEAR_PLANE,
                        self.spot_shadow_far(),
                    ),
                    false,
                )
            }
        };
        self.shadow.projection = projection;
        self.shadow.flip_faces = flip_faces;
    }

    /// Far plane of a spot shadow: the light's range, capped
    pub fn spot_shadow_far(&self) -> f32 {
        self.range.min(SPOT_SHADOW_MAX_FAR).max(SHADOW_NEAR_PLANE * 2.0)
    }

    pub fn kind(&self) -> &LightKind {
        &self.kind
    }

    pub fn light_type(&self) -> LightType {
        match self.kind {
            LightKind::Directional => LightType::Directional,
            LightKind::Point { .. } => LightType::Point,
            LightKind::Spot { .. } => LightType::Spot,
        }
    }

    pub fn color(&self) -> Vec3 {
        self.color
    }

    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    pub fn range(&self) -> f32 {
        self.range
    }

    pub fn shadow(&self) -> &ShadowInfo {
        &self.shadow
    }

    pub fn casts_shadows(&self) -> bool {
        self.shadow.casts_shadows
    }

    pub fn attenuation(&self) -> Option<Attenuation> {
        match self.kind {
            LightKind::Directional => None,
            LightKind::Point { attenuation } | LightKind::Spot { attenuation, .. } => Some(attenuation),
        }
    }

    /// Cosine of the spot cone half-angle
    pub fn cutoff(&self) -> Option<f32> {
        match self.kind {
            LightKind::Spot { cutoff, .. } => Some(cutoff),
            _ => None,
        }
    }

    pub fn directional_extent(&self) -> f32 {
        self.directional_extent
    }

    pub fn set_color(&mut self, color: Vec3) {
        self.color = color;
        self.refresh();
    }

    pub fn set_intensity(&mut self, intensity: f32) {
        self.intensity = intensity;
        self.refresh();
    }

    /// Returns `false` for directional lights, which have no falloff
    pub fn set_attenuation(&mut self, value: Attenuation) -> bool {
        match &mut self.kind {
            LightKind::Directional => return false,
            LightKind::Point { attenuation } | LightKind::Spot { attenuation, .. } => {
                *attenuation = value
            }
        }
        self.refresh();
        true
    }

    /// Returns `false` unless this is a spot light
    pub fn set_cutoff_degrees(&mut self, degrees: f32) -> bool {
        let LightKind::Spot { cutoff, .. } = &mut self.kind else {
            return false;
        };
        *cutoff = degrees.to_radians().cos();
        self.refresh();
        true
    }

    pub fn set_casts_shadows(&mut self, casts_shadows: bool) {
        self.shadow.casts_shadows = casts_shadows;
    }

    pub fn set_directional_extent(&mut self, extent: f32) {
        self.directional_extent = extent.max(f32::EPSILON);
        self.refresh();
    }
}
