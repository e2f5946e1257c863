//! Shader programs: WGSL reflection, the parameter cache and built-in sources

pub mod program;
pub mod reflect;
pub mod sources;

pub use program::{GpuProgram, ParameterClass, ParameterValue};
pub use reflect::{reflect_wgsl, ParameterKind, ParameterLocation, ProgramReflection, ShaderError, TextureSlot};
