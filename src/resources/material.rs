//! Material definitions
//!
//! A material is a queue kind plus named parameters. Names follow the program
//! prefix convention: only `mat_` names are bound, everything else belongs to
//! the renderer.

use glam::{Vec2, Vec3, Vec4};
use std::collections::BTreeMap;

use super::TextureId;
use crate::scene::QueueKind;
use crate::shader::ParameterClass;

/// Value of a material parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MaterialValue {
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Texture(TextureId),
}

pub const DIFFUSE_TEXTURE: &str = "mat_diffuse";
pub const COLOR: &str = "mat_color";
pub const SPECULAR_INTENSITY: &str = "mat_specular_intensity";
pub const SPECULAR_POWER: &str = "mat_specular_power";

#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    pub queue: QueueKind,
    params: BTreeMap<String, MaterialValue>,
}

impl Default for Material {
    fn default() -> Self {
        Self::new("default")
    }
}

impl Material {
    pub fn new(name: &str) -> Self {
        let mut material = Self {
            name: name.to_string(),
            queue: QueueKind::Opaque,
            params: BTreeMap::new(),
        };
        material.set(COLOR, MaterialValue::Vec4(Vec4::ONE));
        material.set(SPECULAR_INTENSITY, MaterialValue::Float(0.5));
        material.set(SPECULAR_POWER, MaterialValue::Float(32.0));
        material
    }

    pub fn with_queue(mut self, queue: QueueKind) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_color(mut self, color: Vec4) -> Self {
        self.set(COLOR, MaterialValue::Vec4(color));
        self
    }

    pub fn with_diffuse(mut self, texture: TextureId) -> Self {
        self.set(DIFFUSE_TEXTURE, MaterialValue::Texture(texture));
        self
    }

    pub fn with_specular(mut self, intensity: f32, power: f32) -> Self {
        self.set(SPECULAR_INTENSITY, MaterialValue::Float(intensity));
        self.set(SPECULAR_POWER, MaterialValue::Float(power));
        self
    }

    pub fn with_param(mut self, name: &str, value: MaterialValue) -> Self {
        self.set(name, value);
        self
    }

    /// Store a parameter. Names outside the `mat_` class are kept but never bound.
    pub fn set(&mut self, name: &str, value: MaterialValue) {
        if ParameterClass::of(name) != ParameterClass::Material {
            log::warn!(
                "Material '{}': parameter '{}' lacks the mat_ prefix and will not be bound",
                self.name,
                name
            );
        }
        self.params.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&MaterialValue> {
        self.params.get(name)
    }

    /// Parameters a lighting program should receive
    pub fn bound_params(&self) -> impl Iterator<Item = (&str, &MaterialValue)> {
        self.params
            .iter()
            .filter(|(name, _)| ParameterClass::of(name) == ParameterClass::Material)
            .map(|(name, value)| (name.as_str(), value))
    }

    // Presets

    pub fn plastic(color: Vec3) -> Self {
        Self::new("plastic")
            .with_color(color.extend(1.0))
            .with_specular(0.6, 64.0)
    }

    pub fn rubber(color: Vec3) -> Self {
        Self::new("rubber")
            .with_color(color.extend(1.0))
            .with_specular(0.05, 8.0)
    }

    pub fn glass(tint: Vec3, opacity: f32) -> Self {
        Self::new("glass")
            .with_queue(QueueKind::Alpha)
            .with_color(tint.extend(opacity))
            .with_specular(1.0, 128.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let material = Material::default();
        assert_eq!(material.queue, QueueKind::Opaque);
        assert_eq!(material.get(COLOR), Some(&MaterialValue::Vec4(Vec4::ONE)));
        assert_eq!(material.bound_params().count(), 3);
    }

    #[test]
    fn test_only_material_names_bound() {
        let material = Material::glass(Vec3::ONE, 0.4)
            .with_param("g_model", MaterialValue::Float(1.0))
            .with_param("x_debug", MaterialValue::Float(1.0));
        assert_eq!(material.queue, QueueKind::Alpha);
        assert!(material.bound_params().all(|(name, _)| name.starts_with("mat_")));
        assert!(material.get("g_model").is_some());
    }
}
