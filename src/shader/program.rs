//! Shader programs and their parameter cache

use std::collections::HashMap;

use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};

use crate::backend::traits::{GraphicsBackend, ProgramDescriptor, ProgramHandle, SamplerHandle, TextureViewHandle};
use crate::backend::types::ShaderStage;
use crate::shader::reflect::{ParameterKind, ParameterLocation};

/// A value that can be assigned to a named program parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParameterValue {
    Int(i32),
    UInt(u32),
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat3(Mat3),
    Mat4(Mat4),
    Texture {
        view: TextureViewHandle,
        sampler: SamplerHandle,
    },
}

impl ParameterValue {
    /// Uniform kind of the value, `None` for textures
    pub fn kind(&self) -> Option<ParameterKind> {
        match self {
            ParameterValue::Int(_) => Some(ParameterKind::Int),
            ParameterValue::UInt(_) => Some(ParameterKind::UInt),
            ParameterValue::Float(_) => Some(ParameterKind::Float),
            ParameterValue::Vec2(_) => Some(ParameterKind::Vec2),
            ParameterValue::Vec3(_) => Some(ParameterKind::Vec3),
            ParameterValue::Vec4(_) => Some(ParameterKind::Vec4),
            ParameterValue::Mat3(_) => Some(ParameterKind::Mat3),
            ParameterValue::Mat4(_) => Some(ParameterKind::Mat4),
            ParameterValue::Texture { .. } => None,
        }
    }

    /// Write the value into a uniform block at `offset`.
    ///
    /// Returns false when the value does not fit the parameter's declared kind.
    /// Signed and unsigned integers convert into each other.
    pub fn write_uniform(&self, block: &mut [u8], offset: u32, kind: ParameterKind) -> bool {
        let offset = offset as usize;
        if offset + kind.size() as usize > block.len() {
            return false;
        }
        let mut put = |at: usize, bytes: &[u8]| {
            block[offset + at..offset + at + bytes.len()].copy_from_slice(bytes);
        };
        match (self, kind) {
            (ParameterValue::Int(v), ParameterKind::Int) => put(0, &v.to_le_bytes()),
            (ParameterValue::Int(v), ParameterKind::UInt) => put(0, &(*v as u32).to_le_bytes()),
            (ParameterValue::UInt(v), ParameterKind::UInt) => put(0, &v.to_le_bytes()),
            (ParameterValue::UInt(v), ParameterKind::Int) => put(0, &(*v as i32).to_le_bytes()),
            (ParameterValue::Float(v), ParameterKind::Float) => put(0, &v.to_le_bytes()),
            (ParameterValue::Vec2(v), ParameterKind::Vec2) => put(0, bytemuck::bytes_of(v)),
            (ParameterValue::Vec3(v), ParameterKind::Vec3) => put(0, bytemuck::bytes_of(v)),
            (ParameterValue::Vec4(v), ParameterKind::Vec4) => put(0, bytemuck::bytes_of(v)),
            (ParameterValue::Mat3(m), ParameterKind::Mat3) => {
                for (i, column) in [m.x_axis, m.y_axis, m.z_axis].iter().enumerate() {
                    put(i * 16, bytemuck::bytes_of(column));
                }
            }
            (ParameterValue::Mat4(m), ParameterKind::Mat4) => put(0, bytemuck::bytes_of(m)),
            _ => return false,
        }
        true
    }
}

impl From<i32> for ParameterValue {
    fn from(v: i32) -> Self {
        ParameterValue::Int(v)
    }
}

impl From<u32> for ParameterValue {
    fn from(v: u32) -> Self {
        ParameterValue::UInt(v)
    }
}

impl From<f32> for ParameterValue {
    fn from(v: f32) -> Self {
        ParameterValue::Float(v)
    }
}

impl From<Vec2> for ParameterValue {
    fn from(v: Vec2) -> Self {
        ParameterValue::Vec2(v)
    }
}

impl From<Vec3> for ParameterValue {
    fn from(v: Vec3) -> Self {
        ParameterValue::Vec3(v)
    }
}

impl From<Vec4> for ParameterValue {
    fn from(v: Vec4) -> Self {
        ParameterValue::Vec4(v)
    }
}

impl From<Mat3> for ParameterValue {
    fn from(v: Mat3) -> Self {
        ParameterValue::Mat3(v)
    }
}

impl From<Mat4> for ParameterValue {
    fn from(v: Mat4) -> Self {
        ParameterValue::Mat4(v)
    }
}

/// Who is responsible for setting a parameter, decided by its name prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterClass {
    /// `mat_*`: supplied by the material being drawn
    Material,
    /// `g_*`: per-frame or per-object values supplied by the renderer
    Global,
    /// `x_*`: declared in the shader but set by nobody
    Skipped,
    Other,
}

impl ParameterClass {
    pub fn of(name: &str) -> Self {
        if name.starts_with("mat_") {
            ParameterClass::Material
        } else if name.starts_with("g_") {
            ParameterClass::Global
        } else if name.starts_with("x_") {
            ParameterClass::Skipped
        } else {
            ParameterClass::Other
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CachedLocation {
    Found(ParameterLocation),
    KnownMissing,
}

/// Named alternatives of one stage, chosen by writing their index to `selector`
#[derive(Debug, Clone)]
struct VariantGroup {
    stage: ShaderStage,
    selector: String,
    variants: Vec<String>,
}

/// A linked program plus a by-name cache of its parameter locations.
///
/// A program that failed to link stays usable: binding it does nothing and
/// every draw issued under it is dropped by the caller.
#[derive(Debug)]
pub struct GpuProgram {
    label: String,
    handle: Option<ProgramHandle>,
    cache: HashMap<String, CachedLocation>,
    variant_groups: Vec<VariantGroup>,
}

impl GpuProgram {
    /// Compile and link through the backend. Link errors are logged, not returned.
    pub fn new<B: GraphicsBackend + ?Sized>(backend: &mut B, desc: &ProgramDescriptor) -> Self {
        let handle = match backend.create_program(desc) {
            Ok(handle) => {
                log::debug!("Linked program '{}'", desc.label);
                Some(handle)
            }
            Err(err) => {
                log::error!("Program '{}' failed to link: {}", desc.label, err);
                None
            }
        };

        Self {
            label: desc.label.clone(),
            handle,
            cache: HashMap::new(),
            variant_groups: Vec::new(),
        }
    }

    /// Declare a group of variants for `stage` selected through the `selector` parameter
    pub fn with_variants(mut self, stage: ShaderStage, selector: &str, variants: &[&str]) -> Self {
        self.variant_groups.push(VariantGroup {
            stage,
            selector: selector.to_string(),
            variants: variants.iter().map(|v| v.to_string()).collect(),
        });
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn handle(&self) -> Option<ProgramHandle> {
        self.handle
    }

    pub fn is_linked(&self) -> bool {
        self.handle.is_some()
    }

    /// Make this program current. Returns false, doing nothing, if it never linked.
    pub fn bind<B: GraphicsBackend + ?Sized>(&self, backend: &mut B) -> bool {
        match self.handle {
            Some(handle) => {
                backend.bind_program(handle);
                true
            }
            None => false,
        }
    }

    /// Look up a parameter, asking the backend at most once per name
    pub fn location<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        name: &str,
    ) -> Option<ParameterLocation> {
        let handle = self.handle?;
        if let Some(cached) = self.cache.get(name) {
            return match cached {
                CachedLocation::Found(location) => Some(*location),
                CachedLocation::KnownMissing => None,
            };
        }

        let cached = match backend.parameter_location(handle, name) {
            Some(location) => CachedLocation::Found(location),
            None => {
                log::warn!("Program '{}' has no parameter '{}'", self.label, name);
                CachedLocation::KnownMissing
            }
        };
        self.cache.insert(name.to_string(), cached);
        match cached {
            CachedLocation::Found(location) => Some(location),
            CachedLocation::KnownMissing => None,
        }
    }

    /// Set a parameter by name. Returns false if the program lacks it or never linked.
    pub fn set_parameter<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        name: &str,
        value: impl Into<ParameterValue>,
    ) -> bool {
        let Some(handle) = self.handle else {
            return false;
        };
        let Some(location) = self.location(backend, name) else {
            return false;
        };
        backend.set_parameter(handle, &location, &value.into());
        true
    }

    /// Select the variant called `name` among those declared for `stage`
    pub fn select_variant<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        stage: ShaderStage,
        name: &str,
    ) -> bool {
        let found = self.variant_groups.iter().find_map(|group| {
            (group.stage == stage)
                .then(|| group.variants.iter().position(|v| v == name))
                .flatten()
                .map(|index| (group.selector.clone(), index as u32))
        });
        match found {
            Some((selector, index)) => self.set_parameter(backend, &selector, ParameterValue::UInt(index)),
            None => {
                log::warn!(
                    "Program '{}' has no {:?} variant named '{}'",
                    self.label,
                    stage,
                    name
                );
                false
            }
        }
    }

    /// Release the backend program. The cache is cleared and the program becomes unlinked.
    pub fn destroy<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) {
        if let Some(handle) = self.handle.take() {
            backend.destroy_program(handle);
        }
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::{RecordedCommand, RecordingBackend};

    const SOURCE: &str = r#"
struct Params {
    g_ambient: vec3<f32>,
    fs_variant: u32,
}
@group(0) @binding(0) var<uniform> params: Params;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    return vec4<f32>(f32(index), 0.0, 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    if params.fs_variant == 1u {
        return vec4<f32>(1.0, 0.0, 1.0, 1.0);
    }
    return vec4<f32>(params.g_ambient, 1.0);
}
"#;

    fn program(backend: &mut RecordingBackend) -> GpuProgram {
        GpuProgram::new(backend, &ProgramDescriptor::new("test", SOURCE)).with_variants(
            ShaderStage::Fragment,
            "fs_variant",
            &["lit", "debug"],
        )
    }

    #[test]
    fn test_missing_parameter_is_queried_once() {
        let mut backend = RecordingBackend::new(64, 64);
        let mut program = program(&mut backend);

        for _ in 0..10 {
            assert!(!program.set_parameter(&mut backend, "g_not_there", 1.0f32));
        }
        assert_eq!(backend.parameter_queries(), 1);
    }

    #[test]
    fn test_found_parameter_is_cached() {
        let mut backend = RecordingBackend::new(64, 64);
        let mut program = program(&mut backend);

        assert!(program.set_parameter(&mut backend, "g_ambient", Vec3::splat(0.2)));
        assert!(program.set_parameter(&mut backend, "g_ambient", Vec3::splat(0.3)));
        assert_eq!(backend.parameter_queries(), 1);
        assert_eq!(
            backend.parameter_value(program.handle().unwrap(), "g_ambient"),
            Some(ParameterValue::Vec3(Vec3::splat(0.3)))
        );
    }

    #[test]
    fn test_unlinked_program_is_inert() {
        let mut backend = RecordingBackend::new(64, 64);
        let mut program = GpuProgram::new(&mut backend, &ProgramDescriptor::new("broken", "fn ("));

        assert!(!program.is_linked());
        assert!(!program.bind(&mut backend));
        assert!(!program.set_parameter(&mut backend, "g_ambient", Vec3::ONE));
        assert_eq!(backend.parameter_queries(), 0);
        assert!(!backend
            .commands()
            .iter()
            .any(|c| matches!(c, RecordedCommand::BindProgram(_))));
    }

    #[test]
    fn test_select_variant_writes_index() {
        let mut backend = RecordingBackend::new(64, 64);
        let mut program = program(&mut backend);

        assert!(program.select_variant(&mut backend, ShaderStage::Fragment, "debug"));
        assert_eq!(
            backend.parameter_value(program.handle().unwrap(), "fs_variant"),
            Some(ParameterValue::UInt(1))
        );
        assert!(!program.select_variant(&mut backend, ShaderStage::Vertex, "debug"));
        assert!(!program.select_variant(&mut backend, ShaderStage::Fragment, "nope"));
    }

    #[test]
    fn test_write_uniform_pads_mat3_columns() {
        let mut block = vec![0u8; 48];
        let m = Mat3::from_cols(Vec3::X, Vec3::Y * 2.0, Vec3::Z * 3.0);
        assert!(ParameterValue::Mat3(m).write_uniform(&mut block, 0, ParameterKind::Mat3));
        let floats: &[f32] = bytemuck::cast_slice(&block);
        assert_eq!(floats[0], 1.0);
        assert_eq!(floats[5], 2.0);
        assert_eq!(floats[10], 3.0);
        assert_eq!(floats[3], 0.0);
    }

    #[test]
    fn test_write_uniform_rejects_kind_mismatch() {
        let mut block = vec![0u8; 64];
        assert!(!ParameterValue::Float(1.0).write_uniform(&mut block, 0, ParameterKind::Mat4));
        assert!(!ParameterValue::Vec4(Vec4::ONE).write_uniform(&mut block, 56, ParameterKind::Vec4));
    }

    #[test]
    fn test_parameter_class_prefixes() {
        assert_eq!(ParameterClass::of("mat_diffuse"), ParameterClass::Material);
        assert_eq!(ParameterClass::of("g_model"), ParameterClass::Global);
        assert_eq!(ParameterClass::of("x_debug_scale"), ParameterClass::Skipped);
        assert_eq!(ParameterClass::of("fs_variant"), ParameterClass::Other);
    }
}
