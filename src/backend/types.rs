//! Common types shared between backends

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Rgba32Float,
    Depth32Float,
    Depth24PlusStencil8,
    R32Float,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            TextureFormat::Depth32Float | TextureFormat::Depth24PlusStencil8
        )
    }

    pub fn is_srgb(&self) -> bool {
        matches!(
            self,
            TextureFormat::Rgba8UnormSrgb | TextureFormat::Bgra8UnormSrgb
        )
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::Depth32Float
            | TextureFormat::Depth24PlusStencil8
            | TextureFormat::R32Float => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

/// Texture usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureUsage(u32);

impl TextureUsage {
    pub const COPY_SRC: Self = Self(1 << 0);
    pub const COPY_DST: Self = Self(1 << 1);
    pub const TEXTURE_BINDING: Self = Self(1 << 2);
    pub const RENDER_ATTACHMENT: Self = Self(1 << 3);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for TextureUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Buffer usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferUsage(u32);

impl BufferUsage {
    pub const COPY_DST: Self = Self(1 << 0);
    pub const INDEX: Self = Self(1 << 1);
    pub const VERTEX: Self = Self(1 << 2);
    pub const UNIFORM: Self = Self(1 << 3);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for BufferUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Texture descriptor. `layers` is 6 for cube textures.
#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            width: 1,
            height: 1,
            layers: 1,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        }
    }
}

/// How a texture view interprets its layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewDimension {
    D2,
    Cube,
}

/// Texture view descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureViewDescriptor {
    pub dimension: ViewDimension,
    pub base_layer: u32,
    pub layer_count: u32,
}

impl TextureViewDescriptor {
    /// Plain 2D view of the first layer
    pub const fn d2() -> Self {
        Self {
            dimension: ViewDimension::D2,
            base_layer: 0,
            layer_count: 1,
        }
    }

    /// 2D view of a single layer, used to render into one cube face
    pub const fn layer(layer: u32) -> Self {
        Self {
            dimension: ViewDimension::D2,
            base_layer: layer,
            layer_count: 1,
        }
    }

    /// Cube view over six layers
    pub const fn cube() -> Self {
        Self {
            dimension: ViewDimension::Cube,
            base_layer: 0,
            layer_count: 6,
        }
    }
}

/// Buffer descriptor
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
}

/// Vertex attribute format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
    Float32x4,
}

/// Vertex attribute description
#[derive(Debug, Clone)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u64,
}

/// Vertex buffer layout
#[derive(Debug, Clone)]
pub struct VertexBufferLayout {
    pub array_stride: u64,
    pub attributes: Vec<VertexAttribute>,
}

/// Standard vertex with position, normal, UV, and tangent
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub tangent: Vec4,
}

impl Vertex {
    pub fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self {
            position,
            normal,
            uv,
            tangent: Vec4::new(1.0, 0.0, 0.0, 1.0),
        }
    }

    pub fn layout() -> VertexBufferLayout {
        VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as u64,
            attributes: vec![
                VertexAttribute {
                    location: 0,
                    format: VertexFormat::Float32x3,
                    offset: 0,
                },
                VertexAttribute {
                    location: 1,
                    format: VertexFormat::Float32x3,
                    offset: 12,
                },
                VertexAttribute {
                    location: 2,
                    format: VertexFormat::Float32x2,
                    offset: 24,
                },
                VertexAttribute {
                    location: 3,
                    format: VertexFormat::Float32x4,
                    offset: 32,
                },
            ],
        }
    }
}

/// Front face winding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrontFace {
    Ccw,
    Cw,
}

/// Cull mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
}

/// Compare function for depth testing and comparison samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Color blending applied to every color target of a draw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendMode {
    /// Source replaces destination
    Opaque,
    /// `dst + src`, used to accumulate one light at a time
    Additive,
    /// `src * a + dst * (1 - a)`
    Alpha,
}

/// Fixed-function state a draw is recorded with.
///
/// Backends keep the last state set with `set_render_state` across passes, so a
/// pass that changes it is responsible for restoring [`RenderState::STANDARD`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderState {
    pub depth_compare: CompareFunction,
    pub depth_write: bool,
    pub blend: BlendMode,
    pub cull: CullMode,
    pub front_face: FrontFace,
}

impl RenderState {
    /// Normal depth test, depth write on, opaque, back-face culling
    pub const STANDARD: Self = Self {
        depth_compare: CompareFunction::Less,
        depth_write: true,
        blend: BlendMode::Opaque,
        cull: CullMode::Back,
        front_face: FrontFace::Ccw,
    };

    /// Per-light accumulation over the depth resolved by the ambient pass
    pub const FORWARD_ADDITIVE: Self = Self {
        depth_compare: CompareFunction::Equal,
        depth_write: false,
        blend: BlendMode::Additive,
        cull: CullMode::Back,
        front_face: FrontFace::Ccw,
    };

    /// Transparent, double-sided geometry
    pub const ALPHA_BLEND: Self = Self {
        depth_compare: CompareFunction::Less,
        depth_write: false,
        blend: BlendMode::Alpha,
        cull: CullMode::None,
        front_face: FrontFace::Ccw,
    };

    /// Depth-only shadow casters, front faces culled
    pub const SHADOW_CASTER: Self = Self {
        depth_compare: CompareFunction::Less,
        depth_write: true,
        blend: BlendMode::Opaque,
        cull: CullMode::Front,
        front_face: FrontFace::Ccw,
    };

    /// Sky drawn at the far plane behind resolved geometry
    pub const SKYBOX: Self = Self {
        depth_compare: CompareFunction::LessEqual,
        depth_write: false,
        blend: BlendMode::Opaque,
        cull: CullMode::None,
        front_face: FrontFace::Ccw,
    };

    /// Full-screen triangle without depth test
    pub const FULLSCREEN: Self = Self {
        depth_compare: CompareFunction::Always,
        depth_write: false,
        blend: BlendMode::Opaque,
        cull: CullMode::None,
        front_face: FrontFace::Ccw,
    };

    pub fn with_front_face(mut self, front_face: FrontFace) -> Self {
        self.front_face = front_face;
        self
    }
}

impl Default for RenderState {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// Shader stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// Filter mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Nearest,
    Linear,
}

/// Address mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    ClampToEdge,
    Repeat,
}

/// Sampler descriptor
#[derive(Debug, Clone)]
pub struct SamplerDescriptor {
    pub label: Option<String>,
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub address_mode: AddressMode,
    pub compare: Option<CompareFunction>,
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            address_mode: AddressMode::ClampToEdge,
            compare: None,
        }
    }
}

impl SamplerDescriptor {
    /// Linear, repeating sampler for material textures
    pub fn material() -> Self {
        Self {
            label: Some("material sampler".into()),
            address_mode: AddressMode::Repeat,
            ..Default::default()
        }
    }

    /// Comparison sampler for shadow map lookups
    pub fn shadow() -> Self {
        Self {
            label: Some("shadow sampler".into()),
            compare: Some(CompareFunction::LessEqual),
            ..Default::default()
        }
    }
}

/// Index format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}
