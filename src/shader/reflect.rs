//! WGSL reflection with naga
//!
//! Both backends link programs through [`reflect_wgsl`], so a program that fails here
//! fails everywhere. The reflection answers the two questions the renderer asks a
//! program: where does a named parameter live, and which textures does it sample.

use std::collections::HashMap;

use naga::{AddressSpace, ImageClass, ImageDimension, ScalarKind, TypeInner, VectorSize};
use thiserror::Error;

use crate::backend::types::ViewDimension;

/// Bind group holding the uniform parameter block
pub const UNIFORM_GROUP: u32 = 0;
/// Bind group holding textures and their samplers
pub const TEXTURE_GROUP: u32 = 1;

/// Why a program could not be linked
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShaderError {
    #[error("WGSL parse error: {0}")]
    Parse(String),
    #[error("WGSL validation error: {0}")]
    Validation(String),
    #[error("missing entry point `{0}`")]
    MissingEntryPoint(&'static str),
    #[error("unsupported parameter `{name}`: {reason}")]
    UnsupportedParameter { name: String, reason: String },
    #[error("texture `{0}` needs `{0}_sampler` at the following binding")]
    MissingSampler(String),
}

/// Type of a uniform parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterKind {
    Int,
    UInt,
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat3,
    Mat4,
}

impl ParameterKind {
    /// Bytes the parameter occupies in the uniform block, padding included
    pub fn size(&self) -> u32 {
        match self {
            ParameterKind::Int | ParameterKind::UInt | ParameterKind::Float => 4,
            ParameterKind::Vec2 => 8,
            ParameterKind::Vec3 => 12,
            ParameterKind::Vec4 => 16,
            // three vec3 columns, each padded to 16 bytes
            ParameterKind::Mat3 => 48,
            ParameterKind::Mat4 => 64,
        }
    }
}

/// Where a named parameter lives inside a linked program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterLocation {
    Uniform { offset: u32, kind: ParameterKind },
    Texture { binding: u32 },
}

/// A sampled texture and its sampler, bound at `binding` and `binding + 1`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureSlot {
    pub name: String,
    pub binding: u32,
    pub dimension: ViewDimension,
    pub depth: bool,
    pub comparison: bool,
}

/// Everything the backends need to know about a program
#[derive(Debug, Clone, Default)]
pub struct ProgramReflection {
    /// Size of the uniform block in bytes, 0 when the program has none
    pub uniform_size: u32,
    pub uniforms: HashMap<String, (u32, ParameterKind)>,
    pub textures: Vec<TextureSlot>,
    pub has_fragment: bool,
    pub has_vertex_input: bool,
}

impl ProgramReflection {
    pub fn location(&self, name: &str) -> Option<ParameterLocation> {
        if let Some(&(offset, kind)) = self.uniforms.get(name) {
            return Some(ParameterLocation::Uniform { offset, kind });
        }
        self.textures
            .iter()
            .find(|slot| slot.name == name)
            .map(|slot| ParameterLocation::Texture {
                binding: slot.binding,
            })
    }

    pub fn texture(&self, binding: u32) -> Option<&TextureSlot> {
        self.textures.iter().find(|slot| slot.binding == binding)
    }
}

/// Parse, validate and reflect a WGSL program
pub fn reflect_wgsl(source: &str) -> Result<ProgramReflection, ShaderError> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|err| ShaderError::Parse(err.emit_to_string(source)))?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|err| ShaderError::Validation(err.to_string()))?;

    let vertex = module
        .entry_points
        .iter()
        .find(|ep| ep.stage == naga::ShaderStage::Vertex && ep.name == "vs_main")
        .ok_or(ShaderError::MissingEntryPoint("vs_main"))?;

    let mut reflection = ProgramReflection {
        has_fragment: module
            .entry_points
            .iter()
            .any(|ep| ep.stage == naga::ShaderStage::Fragment && ep.name == "fs_main"),
        has_vertex_input: vertex
            .function
            .arguments
            .iter()
            .any(|arg| match &arg.binding {
                Some(binding) => matches!(binding, naga::Binding::Location { .. }),
                None => match &module.types[arg.ty].inner {
                    TypeInner::Struct { members, .. } => members
                        .iter()
                        .any(|m| matches!(m.binding, Some(naga::Binding::Location { .. }))),
                    _ => false,
                },
            }),
        ..Default::default()
    };

    let mut samplers = HashMap::new();
    for (_, var) in module.global_variables.iter() {
        let name = var.name.clone().unwrap_or_default();
        let Some(binding) = var.binding.as_ref() else {
            continue;
        };

        match (&var.space, &module.types[var.ty].inner) {
            (AddressSpace::Uniform, TypeInner::Struct { members, span }) => {
                if binding.group != UNIFORM_GROUP || binding.binding != 0 {
                    return Err(ShaderError::UnsupportedParameter {
                        name,
                        reason: "uniform blocks must sit at @group(0) @binding(0)".into(),
                    });
                }
                reflection.uniform_size = *span;
                for member in members {
                    let member_name = member.name.clone().unwrap_or_default();
                    let kind = parameter_kind(&module.types[member.ty].inner).ok_or_else(|| {
                        ShaderError::UnsupportedParameter {
                            name: member_name.clone(),
                            reason: "only i32, u32, f32, vecN<f32>, mat3x3 and mat4x4 are supported"
                                .into(),
                        }
                    })?;
                    reflection.uniforms.insert(member_name, (member.offset, kind));
                }
            }
            (AddressSpace::Handle, TypeInner::Image { dim, arrayed, class }) => {
                let dimension = match (dim, arrayed) {
                    (ImageDimension::D2, false) => ViewDimension::D2,
                    (ImageDimension::Cube, false) => ViewDimension::Cube,
                    _ => {
                        return Err(ShaderError::UnsupportedParameter {
                            name,
                            reason: "only 2D and cube textures are supported".into(),
                        })
                    }
                };
                let depth = match class {
                    ImageClass::Sampled {
                        kind: ScalarKind::Float,
                        multi: false,
                    } => false,
                    ImageClass::Depth { multi: false } => true,
                    _ => {
                        return Err(ShaderError::UnsupportedParameter {
                            name,
                            reason: "textures must be single-sampled float or depth".into(),
                        })
                    }
                };
                reflection.textures.push(TextureSlot {
                    name,
                    binding: binding.binding,
                    dimension,
                    depth,
                    comparison: false,
                });
            }
            (AddressSpace::Handle, TypeInner::Sampler { comparison }) => {
                samplers.insert(binding.binding, (name, *comparison));
            }
            _ => {}
        }
    }

    for slot in &mut reflection.textures {
        match samplers.get(&(slot.binding + 1)) {
            Some((name, comparison)) if *name == format!("{}_sampler", slot.name) => {
                slot.comparison = *comparison;
            }
            _ => return Err(ShaderError::MissingSampler(slot.name.clone())),
        }
    }
    reflection.textures.sort_by_key(|slot| slot.binding);

    Ok(reflection)
}

fn parameter_kind(inner: &TypeInner) -> Option<ParameterKind> {
    match inner {
        TypeInner::Scalar(scalar) => match scalar.kind {
            ScalarKind::Sint => Some(ParameterKind::Int),
            ScalarKind::Uint => Some(ParameterKind::UInt),
            ScalarKind::Float => Some(ParameterKind::Float),
            _ => None,
        },
        TypeInner::Vector { size, scalar } if scalar.kind == ScalarKind::Float => match size {
            VectorSize::Bi => Some(ParameterKind::Vec2),
            VectorSize::Tri => Some(ParameterKind::Vec3),
            VectorSize::Quad => Some(ParameterKind::Vec4),
        },
        TypeInner::Matrix { columns, rows, .. } => match (columns, rows) {
            (VectorSize::Tri, VectorSize::Tri) => Some(ParameterKind::Mat3),
            (VectorSize::Quad, VectorSize::Quad) => Some(ParameterKind::Mat4),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIT: &str = r#"
struct Params {
    g_model: mat4x4<f32>,
    g_normal_matrix: mat3x3<f32>,
    g_light_color: vec3<f32>,
    g_light_intensity: f32,
    g_shadow_enabled: i32,
}
@group(0) @binding(0) var<uniform> params: Params;
@group(1) @binding(0) var g_shadow_map: texture_depth_cube;
@group(1) @binding(1) var g_shadow_map_sampler: sampler_comparison;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return params.g_model * vec4<f32>(position, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    let lit = textureSampleCompareLevel(g_shadow_map, g_shadow_map_sampler, vec3<f32>(1.0, 0.0, 0.0), 0.5);
    return vec4<f32>(params.g_light_color * params.g_light_intensity * lit, 1.0);
}
"#;

    #[test]
    fn test_reflects_uniform_offsets() {
        let reflection = reflect_wgsl(LIT).unwrap();
        assert_eq!(
            reflection.location("g_model"),
            Some(ParameterLocation::Uniform {
                offset: 0,
                kind: ParameterKind::Mat4
            })
        );
        assert_eq!(
            reflection.location("g_normal_matrix"),
            Some(ParameterLocation::Uniform {
                offset: 64,
                kind: ParameterKind::Mat3
            })
        );
        // vec3 followed by f32 packs into one 16 byte slot
        assert_eq!(
            reflection.location("g_light_intensity"),
            Some(ParameterLocation::Uniform {
                offset: 124,
                kind: ParameterKind::Float
            })
        );
        assert!(reflection.location("g_missing").is_none());
    }

    #[test]
    fn test_reflects_textures_and_stages() {
        let reflection = reflect_wgsl(LIT).unwrap();
        assert!(reflection.has_fragment);
        assert!(reflection.has_vertex_input);
        assert_eq!(reflection.textures.len(), 1);
        let slot = &reflection.textures[0];
        assert_eq!(slot.dimension, ViewDimension::Cube);
        assert!(slot.depth);
        assert!(slot.comparison);
        assert_eq!(
            reflection.location("g_shadow_map"),
            Some(ParameterLocation::Texture { binding: 0 })
        );
    }

    #[test]
    fn test_rejects_broken_source() {
        assert!(matches!(
            reflect_wgsl("fn vs_main( {"),
            Err(ShaderError::Parse(_))
        ));
    }

    #[test]
    fn test_requires_vertex_entry_point() {
        let source = "@fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }";
        assert_eq!(
            reflect_wgsl(source).unwrap_err(),
            ShaderError::MissingEntryPoint("vs_main")
        );
    }

    #[test]
    fn test_requires_paired_sampler() {
        let source = r#"
@group(1) @binding(0) var albedo: texture_2d<f32>;
@vertex
fn vs_main() -> @builtin(position) vec4<f32> { return vec4<f32>(0.0); }
"#;
        assert_eq!(
            reflect_wgsl(source).unwrap_err(),
            ShaderError::MissingSampler("albedo".into())
        );
    }
}
