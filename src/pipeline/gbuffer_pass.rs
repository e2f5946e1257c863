//! G-Buffer generation pass
//!
//! Renders the opaque queue to multiple render targets (MRT):
//! - World-space position
//! - Texture coordinates
//! - World-space normals
//! - Albedo, with specular intensity in alpha
//! - Depth buffer
//!
//! Experimental: the targets are filled every frame but nothing composites them.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::{draw_queue, opaque};
use crate::render_target::{RenderTarget, RenderTargetDescriptor};
use crate::resources::Assets;
use crate::scene::{CameraView, Scene};
use crate::shader::{sources, GpuProgram};

const GBUFFER_FORMATS: [TextureFormat; 4] = [
    TextureFormat::Rgba16Float, // position
    TextureFormat::Rgba16Float, // texcoord
    TextureFormat::Rgba16Float, // normal
    TextureFormat::Rgba8Unorm,  // albedo + specular
];

pub struct GBufferPass {
    program: GpuProgram,
    target: RenderTarget,
}

impl GBufferPass {
    pub fn new(backend: &mut dyn GraphicsBackend, width: u32, height: u32) -> BackendResult<Self> {
        let target = RenderTarget::new(
            backend,
            RenderTargetDescriptor::multi("GBuffer", width, height, &GBUFFER_FORMATS)
                .with_depth(TextureFormat::Depth32Float),
        )?;
        Ok(Self {
            program: GpuProgram::new(backend, &ProgramDescriptor::new("gbuffer", sources::gbuffer())),
            target,
        })
    }

    pub fn position_view(&self) -> Option<TextureViewHandle> {
        self.target.color_view(0)
    }

    pub fn texcoord_view(&self) -> Option<TextureViewHandle> {
        self.target.color_view(1)
    }

    pub fn normal_view(&self) -> Option<TextureViewHandle> {
        self.target.color_view(2)
    }

    pub fn albedo_specular_view(&self) -> Option<TextureViewHandle> {
        self.target.color_view(3)
    }

    pub fn depth_view(&self) -> Option<TextureViewHandle> {
        self.target.depth_view()
    }

    pub fn resize(&mut self, backend: &mut dyn GraphicsBackend, width: u32, height: u32) -> BackendResult<()> {
        self.target.recreate(backend, width, height)
    }

    pub fn execute(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        scene: &Scene,
        assets: &Assets,
        view: &CameraView,
    ) -> u32 {
        let pass = self
            .target
            .pass("GBuffer", LoadOp::Clear([0.0; 4]), LoadOp::Clear([1.0; 4]));
        backend.begin_render_pass(&pass);
        backend.set_viewport(0.0, 0.0, self.target.width() as f32, self.target.height() as f32);
        backend.set_render_state(RenderState::STANDARD);

        let mut draws = 0;
        if self.program.bind(backend) {
            self.program.set_parameter(backend, "g_view_proj", view.view_projection());
            draws = draw_queue(backend, &mut self.program, scene, assets, opaque(scene), true);
        }

        backend.end_render_pass();
        draws
    }

    pub fn destroy(&mut self, backend: &mut dyn GraphicsBackend) {
        self.target.destroy(backend);
        self.program.destroy(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::{RecordedCommand, RecordingBackend};

    #[test]
    fn test_targets_follow_resize() {
        let mut backend = RecordingBackend::new(64, 64);
        let mut pass = GBufferPass::new(&mut backend, 64, 64).unwrap();
        pass.resize(&mut backend, 200, 100).unwrap();

        let texture = backend.view_texture(pass.normal_view().unwrap()).unwrap();
        let desc = backend.texture_descriptor(texture).unwrap();
        assert_eq!((desc.width, desc.height), (200, 100));
        assert_eq!(backend.live_textures(), 5);
    }

    #[test]
    fn test_pass_binds_every_target() {
        let mut backend = RecordingBackend::new(64, 64);
        let mut pass = GBufferPass::new(&mut backend, 64, 64).unwrap();
        let view = CameraView::from_world(glam::Mat4::IDENTITY, glam::Mat4::IDENTITY);

        let draws = pass.execute(&mut backend, &Scene::new(), &Assets::new(), &view);
        assert_eq!(draws, 0);
        let Some(RecordedCommand::BeginRenderPass(desc)) = backend.commands().first() else {
            panic!("expected a render pass");
        };
        assert_eq!(desc.color_attachments.len(), 4);
        assert_eq!(
            desc.depth_stencil_attachment.as_ref().map(|d| d.view),
            pass.depth_view()
        );
    }
}
