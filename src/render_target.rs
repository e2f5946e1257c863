//! Render targets
//!
//! A render target owns the textures and views of one attachment set: a plain
//! 2D surface, a six-face cube or several color surfaces written together. It
//! is never resized in place; `recreate` frees everything and builds anew.

use crate::backend::traits::*;
use crate::backend::types::*;

/// Shape of the surfaces of a render target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    Single2d,
    /// Six layers, sampled as a cube and rendered one face at a time
    Cube,
    /// `n` color surfaces bound together
    Multi(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderTargetDescriptor {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub kind: SurfaceKind,
    pub color_formats: Vec<TextureFormat>,
    pub depth_format: Option<TextureFormat>,
}

impl RenderTargetDescriptor {
    /// One color surface, no depth
    pub fn color(label: &str, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: label.to_string(),
            width,
            height,
            kind: SurfaceKind::Single2d,
            color_formats: vec![format],
            depth_format: None,
        }
    }

    /// Depth surface only
    pub fn depth(label: &str, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: label.to_string(),
            width,
            height,
            kind: SurfaceKind::Single2d,
            color_formats: Vec::new(),
            depth_format: Some(format),
        }
    }

    /// Depth-only cube with square faces
    pub fn depth_cube(label: &str, size: u32, format: TextureFormat) -> Self {
        Self {
            kind: SurfaceKind::Cube,
            ..Self::depth(label, size, size, format)
        }
    }

    /// Several color surfaces written by one pass
    pub fn multi(label: &str, width: u32, height: u32, formats: &[TextureFormat]) -> Self {
        Self {
            label: label.to_string(),
            width,
            height,
            kind: SurfaceKind::Multi(formats.len() as u32),
            color_formats: formats.to_vec(),
            depth_format: None,
        }
    }

    pub fn with_depth(mut self, format: TextureFormat) -> Self {
        self.depth_format = Some(format);
        self
    }

    fn validate(&self) -> BackendResult<()> {
        let fail = |reason: &str| {
            Err(BackendError::TextureCreationFailed(format!(
                "render target '{}': {}",
                self.label, reason
            )))
        };
        if self.width == 0 || self.height == 0 {
            return fail("zero extent");
        }
        if self.color_formats.is_empty() && self.depth_format.is_none() {
            return fail("no attachments");
        }
        if self.color_formats.iter().any(|f| f.is_depth()) {
            return fail("depth format used for a color surface");
        }
        if self.depth_format.is_some_and(|f| !f.is_depth()) {
            return fail("color format used for the depth surface");
        }
        match self.kind {
            SurfaceKind::Single2d | SurfaceKind::Cube if self.color_formats.len() > 1 => {
                fail("more than one color surface")
            }
            SurfaceKind::Cube if self.width != self.height => fail("cube faces must be square"),
            SurfaceKind::Multi(n) if n as usize != self.color_formats.len() => {
                fail("surface count does not match the color formats")
            }
            _ => Ok(()),
        }
    }
}

/// Texture plus its sampling view and, for cubes, one view per face
#[derive(Debug, Clone)]
struct Surface {
    texture: TextureHandle,
    view: TextureViewHandle,
    faces: Vec<TextureViewHandle>,
}

impl Surface {
    fn create<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        label: String,
        desc: &RenderTargetDescriptor,
        format: TextureFormat,
    ) -> BackendResult<Self> {
        let cube = desc.kind == SurfaceKind::Cube;
        let texture = backend.create_texture(&TextureDescriptor {
            label: Some(label),
            width: desc.width,
            height: desc.height,
            layers: if cube { 6 } else { 1 },
            format,
            usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
        })?;

        let view_desc = if cube {
            TextureViewDescriptor::cube()
        } else {
            TextureViewDescriptor::d2()
        };
        let view = backend.create_texture_view(texture, &view_desc)?;

        let mut faces = Vec::new();
        if cube {
            for face in 0..6 {
                faces.push(backend.create_texture_view(texture, &TextureViewDescriptor::layer(face))?);
            }
        }

        Ok(Self { texture, view, faces })
    }

    fn destroy<B: GraphicsBackend + ?Sized>(&self, backend: &mut B) {
        for face in &self.faces {
            backend.destroy_texture_view(*face);
        }
        backend.destroy_texture_view(self.view);
        backend.destroy_texture(self.texture);
    }

    /// View to render into
    fn attachment(&self, face: Option<u32>) -> Option<TextureViewHandle> {
        match face {
            Some(face) => self.faces.get(face as usize).copied(),
            None => Some(self.view),
        }
    }
}

/// Owned set of render surfaces
#[derive(Debug)]
pub struct RenderTarget {
    desc: RenderTargetDescriptor,
    colors: Vec<Surface>,
    depth: Option<Surface>,
}

impl RenderTarget {
    pub fn new<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        desc: RenderTargetDescriptor,
    ) -> BackendResult<Self> {
        desc.validate()?;
        let mut target = Self {
            desc,
            colors: Vec::new(),
            depth: None,
        };
        if let Err(err) = target.allocate(backend) {
            target.destroy(backend);
            return Err(err);
        }
        log::info!(
            "Created render target '{}' {}x{} {:?}",
            target.desc.label,
            target.desc.width,
            target.desc.height,
            target.desc.kind
        );
        Ok(target)
    }

    fn allocate<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) -> BackendResult<()> {
        for (i, format) in self.desc.color_formats.clone().into_iter().enumerate() {
            let label = format!("{} Color {}", self.desc.label, i);
            let surface = Surface::create(backend, label, &self.desc, format)?;
            self.colors.push(surface);
        }
        if let Some(format) = self.desc.depth_format {
            let label = format!("{} Depth", self.desc.label);
            self.depth = Some(Surface::create(backend, label, &self.desc, format)?);
        }
        Ok(())
    }

    /// Free every surface and build a new set at the new size
    pub fn recreate<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        width: u32,
        height: u32,
    ) -> BackendResult<()> {
        let mut desc = self.desc.clone();
        desc.width = width;
        desc.height = height;
        desc.validate()?;

        self.destroy(backend);
        self.desc = desc;
        self.allocate(backend)?;
        log::info!("Recreated render target '{}' at {}x{}", self.desc.label, width, height);
        Ok(())
    }

    /// Release every owned texture and view
    pub fn destroy<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) {
        for surface in self.colors.drain(..) {
            surface.destroy(backend);
        }
        if let Some(surface) = self.depth.take() {
            surface.destroy(backend);
        }
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    pub fn kind(&self) -> SurfaceKind {
        self.desc.kind
    }

    pub fn color_formats(&self) -> &[TextureFormat] {
        &self.desc.color_formats
    }

    pub fn depth_format(&self) -> Option<TextureFormat> {
        self.desc.depth_format
    }

    /// Sampling view of color surface `index` (a cube view for cubes)
    pub fn color_view(&self, index: usize) -> Option<TextureViewHandle> {
        self.colors.get(index).map(|s| s.view)
    }

    /// Sampling view of the depth surface (a cube view for cubes)
    pub fn depth_view(&self) -> Option<TextureViewHandle> {
        self.depth.as_ref().map(|s| s.view)
    }

    /// Render view of one cube face: the depth face when there is no color
    pub fn face_view(&self, face: u32) -> Option<TextureViewHandle> {
        self.colors
            .first()
            .or(self.depth.as_ref())
            .and_then(|s| s.attachment(Some(face)))
    }

    fn descriptor(
        &self,
        label: &str,
        face: Option<u32>,
        color_load: LoadOp,
        depth_load: LoadOp,
    ) -> Option<RenderPassDescriptor> {
        let color_attachments = self
            .colors
            .iter()
            .map(|surface| {
                surface.attachment(face).map(|view| ColorAttachment {
                    view,
                    load_op: color_load,
                    store_op: StoreOp::Store,
                })
            })
            .collect::<Option<Vec<_>>>()?;

        let depth_stencil_attachment = match &self.depth {
            Some(surface) => Some(DepthStencilAttachment {
                view: surface.attachment(face)?,
                depth_load_op: depth_load,
                depth_store_op: StoreOp::Store,
                depth_clear_value: 1.0,
            }),
            None => None,
        };

        Some(RenderPassDescriptor {
            label: Some(label.to_string()),
            color_attachments,
            depth_stencil_attachment,
        })
    }

    /// Pass over every surface of a 2D or multi target
    pub fn pass(&self, label: &str, color_load: LoadOp, depth_load: LoadOp) -> RenderPassDescriptor {
        self.descriptor(label, None, color_load, depth_load)
            .unwrap_or_else(|| RenderPassDescriptor {
                label: Some(label.to_string()),
                color_attachments: Vec::new(),
                depth_stencil_attachment: None,
            })
    }

    /// Pass over one face of a cube target
    pub fn face_pass(
        &self,
        face: u32,
        label: &str,
        color_load: LoadOp,
        depth_load: LoadOp,
    ) -> Option<RenderPassDescriptor> {
        if self.desc.kind != SurfaceKind::Cube {
            return None;
        }
        self.descriptor(label, Some(face), color_load, depth_load)
    }
}
