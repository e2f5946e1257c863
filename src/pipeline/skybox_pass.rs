//! Skybox pass

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::render_target::RenderTarget;
use crate::resources::{GpuMesh, Mesh};
use crate::scene::{CameraView, Skybox};
use crate::shader::{sources, GpuProgram};

/// Gradient sky on a unit cube, centered on the camera and pushed to the far plane
pub struct SkyboxPass {
    program: GpuProgram,
    cube: Option<GpuMesh>,
}

impl SkyboxPass {
    pub fn new(backend: &mut dyn GraphicsBackend) -> Self {
        Self {
            program: GpuProgram::new(backend, &ProgramDescriptor::new("skybox", sources::SKYBOX)),
            cube: None,
        }
    }

    /// Draw into `hdr` where nothing nearer was drawn. Returns the draw count.
    pub fn execute(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        hdr: &RenderTarget,
        view: &CameraView,
        sky: &Skybox,
    ) -> BackendResult<u32> {
        let cube = match self.cube {
            Some(cube) => cube,
            None => *self.cube.insert(GpuMesh::upload(backend, &Mesh::cube())?),
        };

        backend.begin_render_pass(&hdr.pass("Skybox", LoadOp::Load, LoadOp::Load));
        backend.set_viewport(0.0, 0.0, hdr.width() as f32, hdr.height() as f32);
        backend.set_render_state(RenderState::SKYBOX);

        let mut draws = 0;
        if self.program.bind(backend) {
            self.program
                .set_parameter(backend, "g_view_rotation_proj", view.rotation_projection());
            self.program.set_parameter(backend, "g_sky_zenith", sky.zenith);
            self.program.set_parameter(backend, "g_sky_horizon", sky.horizon);
            self.program.set_parameter(backend, "g_sky_ground", sky.ground);
            cube.draw(backend);
            draws = 1;
        }

        backend.set_render_state(RenderState::STANDARD);
        backend.end_render_pass();
        Ok(draws)
    }

    pub fn destroy(&mut self, backend: &mut dyn GraphicsBackend) {
        if let Some(cube) = self.cube.take() {
            cube.destroy(backend);
        }
        self.program.destroy(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::RecordingBackend;
    use crate::render_target::RenderTargetDescriptor;
    use glam::{Mat4, Vec3};

    #[test]
    fn test_sky_draws_once_and_restores_state() {
        let mut backend = RecordingBackend::new(32, 32);
        let hdr = RenderTarget::new(
            &mut backend,
            RenderTargetDescriptor::color("HDR", 32, 32, TextureFormat::Rgba16Float)
                .with_depth(TextureFormat::Depth32Float),
        )
        .unwrap();
        let mut pass = SkyboxPass::new(&mut backend);
        let view = CameraView::from_world(Mat4::from_translation(Vec3::new(3.0, 1.0, 0.0)), Mat4::IDENTITY);

        assert_eq!(pass.execute(&mut backend, &hdr, &view, &Skybox::default()).unwrap(), 1);
        let buffers = backend.live_buffers();
        pass.execute(&mut backend, &hdr, &view, &Skybox::default()).unwrap();
        assert_eq!(backend.live_buffers(), buffers);

        assert_eq!(
            backend.draws(),
            vec![
                ("skybox".to_string(), RenderState::SKYBOX),
                ("skybox".to_string(), RenderState::SKYBOX)
            ]
        );
        let translation = view.rotation_projection().w_axis;
        assert_eq!(translation, glam::Vec4::W);
    }
}
