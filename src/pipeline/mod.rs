//! Forward rendering pipeline
//!
//! One frame runs, in order:
//! 1. Ambient pass - clears the HDR target and lays down depth for the opaque queue
//! 2. Light passes - per light (directional, point, spot), a shadow map pass
//!    followed by an additive pass over the resolved depth
//! 3. Skybox - drawn behind everything at the far plane
//! 4. Alpha pass - transparent queue, far to near
//! 5. Post-processing - tone mapping into the swapchain
//! 6. Experimental G-Buffer pass, never composited

pub mod forward_pass;
pub mod gbuffer_pass;
pub mod postprocess;
pub mod shadow_pass;
pub mod skybox_pass;

pub use forward_pass::ForwardLightingRenderer;
pub use gbuffer_pass::GBufferPass;
pub use postprocess::{PostProcessOutput, PostProcessPipeline, TonemapOperator, TonemapSettings, TonemappingPass};
pub use shadow_pass::{
    directional_light_space, point_light_faces, spot_light_space, CubeFace, ShadowMap, ShadowMapPass,
};
pub use skybox_pass::SkyboxPass;

use glam::Vec3;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::render_target::{RenderTarget, RenderTargetDescriptor};
use crate::resources::Assets;
use crate::scene::{QueueKind, RenderQueueEntry, Scene};
use crate::shader::GpuProgram;

/// Configuration for the forward renderer
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Clear color of the HDR target, and of the swapchain when there is no camera
    pub clear_color: [f32; 4],
    /// Ambient term of the ambient pass
    pub scene_ambient: Vec3,
    pub hdr_format: TextureFormat,
    /// Edge length of every shadow map, cube faces included
    pub shadow_map_size: u32,
    /// Depth bias subtracted before the shadow comparison
    pub shadow_bias: f32,
    pub tonemap: TonemapSettings,
    /// Left half tone mapped, right half raw HDR
    pub debug_split: bool,
    /// Lighting programs output surface normals instead of lighting
    pub debug_normals: bool,
    /// Render the opaque queue into G-Buffer targets after post-processing
    pub experimental_gbuffer: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            scene_ambient: Vec3::splat(0.1),
            hdr_format: TextureFormat::Rgba16Float,
            shadow_map_size: 1024,
            shadow_bias: 0.005,
            tonemap: TonemapSettings::default(),
            debug_split: false,
            debug_normals: false,
            experimental_gbuffer: false,
        }
    }
}

/// Counters for one rendered frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub draw_calls: u32,
    pub lights_drawn: u32,
    pub shadow_maps_rendered: u32,
    /// False when the frame only cleared the swapchain
    pub camera_found: bool,
}

/// Draw every entry of a queue with the already bound `program`.
///
/// Sets `g_model` per entry; with `materials` also `g_normal_matrix` and the
/// `mat_` parameters of each submesh. Returns the number of draws issued.
pub(crate) fn draw_queue(
    backend: &mut dyn GraphicsBackend,
    program: &mut GpuProgram,
    scene: &Scene,
    assets: &Assets,
    entries: &[RenderQueueEntry],
    materials: bool,
) -> u32 {
    let mut draws = 0;
    for entry in entries {
        let (Ok(model), Ok(normal)) = (
            scene.graph().world_matrix(entry.node),
            scene.graph().normal_matrix(entry.node),
        ) else {
            log::debug!("Queued entity {:?} has no transform node", entry.entity);
            continue;
        };
        let Some(renderable) = scene.renderable(entry.entity) else {
            continue;
        };

        program.set_parameter(backend, "g_model", model);
        if materials {
            program.set_parameter(backend, "g_normal_matrix", normal);
        }

        for &(mesh, material) in &renderable.submeshes {
            let Some(gpu_mesh) = assets.gpu_mesh(mesh) else {
                log::debug!("Mesh {:?} not uploaded, skipped", mesh);
                continue;
            };
            if materials && !assets.bind_material(material, program, backend) {
                continue;
            }
            gpu_mesh.draw(backend);
            draws += 1;
        }
    }
    draws
}

fn hdr_descriptor(config: &RendererConfig, width: u32, height: u32) -> RenderTargetDescriptor {
    RenderTargetDescriptor::color("HDR", width, height, config.hdr_format)
        .with_depth(TextureFormat::Depth32Float)
}

/// Owns every pass and the HDR target they share
pub struct Renderer {
    config: RendererConfig,
    hdr: RenderTarget,
    forward: ForwardLightingRenderer,
    skybox: SkyboxPass,
    gbuffer: Option<GBufferPass>,
    postprocess: PostProcessPipeline,
}

impl Renderer {
    /// Build programs and targets sized to the backend surface
    pub fn new(backend: &mut dyn GraphicsBackend, config: RendererConfig) -> BackendResult<Self> {
        let (width, height) = backend.surface_size();
        let hdr = RenderTarget::new(backend, hdr_descriptor(&config, width, height))?;
        let forward = ForwardLightingRenderer::new(backend, config.shadow_map_size);
        let skybox = SkyboxPass::new(backend);
        let gbuffer = if config.experimental_gbuffer {
            Some(GBufferPass::new(backend, width, height)?)
        } else {
            None
        };

        let mut postprocess = PostProcessPipeline::new();
        postprocess.add(TonemappingPass::new(backend, config.tonemap, config.debug_split));

        log::info!("Renderer initialized at {}x{}", width, height);
        Ok(Self {
            config,
            hdr,
            forward,
            skybox,
            gbuffer,
            postprocess,
        })
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn hdr_target(&self) -> &RenderTarget {
        &self.hdr
    }

    pub fn gbuffer(&self) -> Option<&GBufferPass> {
        self.gbuffer.as_ref()
    }

    pub fn postprocess_mut(&mut self) -> &mut PostProcessPipeline {
        &mut self.postprocess
    }

    /// Apply a new configuration, rebuilding whatever it affects
    pub fn configure(&mut self, backend: &mut dyn GraphicsBackend, config: RendererConfig) -> BackendResult<()> {
        let (width, height) = (self.hdr.width(), self.hdr.height());

        if config.hdr_format != self.config.hdr_format {
            let hdr = RenderTarget::new(backend, hdr_descriptor(&config, width, height))?;
            std::mem::replace(&mut self.hdr, hdr).destroy(backend);
        }
        if config.shadow_map_size != self.config.shadow_map_size {
            self.forward.shadows_mut().set_size(backend, config.shadow_map_size);
        }
        match (config.experimental_gbuffer, self.gbuffer.take()) {
            (true, Some(gbuffer)) => self.gbuffer = Some(gbuffer),
            (true, None) => self.gbuffer = Some(GBufferPass::new(backend, width, height)?),
            (false, Some(mut gbuffer)) => gbuffer.destroy(backend),
            (false, None) => {}
        }
        if let Some(tonemap) = self.postprocess.get_mut::<TonemappingPass>() {
            tonemap.settings = config.tonemap;
            tonemap.debug_split = config.debug_split;
        }

        self.config = config;
        Ok(())
    }

    /// Recreate the window-sized targets
    pub fn resize(&mut self, backend: &mut dyn GraphicsBackend, width: u32, height: u32) -> BackendResult<()> {
        if width == 0 || height == 0 {
            log::debug!("Ignoring resize to {}x{}", width, height);
            return Ok(());
        }
        self.hdr.recreate(backend, width, height)?;
        if let Some(gbuffer) = &mut self.gbuffer {
            gbuffer.resize(backend, width, height)?;
        }
        self.postprocess.resize(backend, width, height)?;
        log::info!("Renderer resized to {}x{}", width, height);
        Ok(())
    }

    /// Render one frame of `scene` into the swapchain
    pub fn render(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        scene: &mut Scene,
        assets: &Assets,
    ) -> BackendResult<FrameStats> {
        let frame = backend.begin_frame()?;
        let mut stats = FrameStats::default();

        let aspect = self.hdr.width() as f32 / self.hdr.height() as f32;
        let Some(view) = scene.camera_view(aspect) else {
            log::debug!("No current camera, clearing the swapchain only");
            backend.begin_render_pass(&RenderPassDescriptor {
                label: Some("Clear".into()),
                color_attachments: vec![ColorAttachment {
                    view: frame.swapchain_view,
                    load_op: LoadOp::Clear(self.config.clear_color),
                    store_op: StoreOp::Store,
                }],
                depth_stencil_attachment: None,
            });
            backend.end_render_pass();
            backend.end_frame()?;
            return Ok(stats);
        };
        stats.camera_found = true;

        scene.sort_alpha_queue(view.position);
        let scene: &Scene = scene;

        stats.draw_calls += self.forward.ambient_pass(backend, &self.hdr, scene, assets, &view, &self.config);
        let lit = self.forward.light_passes(backend, &self.hdr, scene, assets, &view, &self.config)?;
        stats.draw_calls += lit.draw_calls;
        stats.lights_drawn = lit.lights_drawn;
        stats.shadow_maps_rendered = lit.shadow_maps_rendered;

        if let Some(sky) = &scene.skybox {
            stats.draw_calls += self.skybox.execute(backend, &self.hdr, &view, sky)?;
        }

        stats.draw_calls += self.forward.alpha_pass(backend, &self.hdr, scene, assets, &view, &self.config);

        if let Some(input) = self.hdr.color_view(0) {
            let output = PostProcessOutput {
                view: frame.swapchain_view,
                format: backend.swapchain_format(),
                width: frame.width,
                height: frame.height,
            };
            stats.draw_calls += self.postprocess.execute(backend, input, output)?;
        }

        if let Some(gbuffer) = &mut self.gbuffer {
            stats.draw_calls += gbuffer.execute(backend, scene, assets, &view);
        }

        backend.end_frame()?;
        Ok(stats)
    }

    /// Release every program and target
    pub fn destroy(&mut self, backend: &mut dyn GraphicsBackend) {
        self.forward.destroy(backend);
        self.skybox.destroy(backend);
        if let Some(mut gbuffer) = self.gbuffer.take() {
            gbuffer.destroy(backend);
        }
        self.postprocess.destroy(backend);
        self.hdr.destroy(backend);
    }
}

/// Entries of the opaque queue
pub(crate) fn opaque(scene: &Scene) -> &[RenderQueueEntry] {
    scene.queues().queue(QueueKind::Opaque)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::RecordingBackend;

    #[test]
    fn test_new_sizes_hdr_to_surface() {
        let mut backend = RecordingBackend::new(320, 180);
        let renderer = Renderer::new(&mut backend, RendererConfig::default()).unwrap();
        assert_eq!(renderer.hdr_target().width(), 320);
        assert_eq!(renderer.hdr_target().color_formats(), &[TextureFormat::Rgba16Float]);
        assert!(renderer.gbuffer().is_none());
    }

    #[test]
    fn test_configure_toggles_gbuffer() {
        let mut backend = RecordingBackend::new(64, 64);
        let mut renderer = Renderer::new(&mut backend, RendererConfig::default()).unwrap();
        let textures = backend.live_textures();

        let config = RendererConfig {
            experimental_gbuffer: true,
            ..Default::default()
        };
        renderer.configure(&mut backend, config).unwrap();
        assert!(renderer.gbuffer().is_some());
        assert_eq!(backend.live_textures(), textures + 5);

        renderer.configure(&mut backend, RendererConfig::default()).unwrap();
        assert!(renderer.gbuffer().is_none());
        assert_eq!(backend.live_textures(), textures);
    }

    #[test]
    fn test_zero_resize_is_ignored() {
        let mut backend = RecordingBackend::new(64, 64);
        let mut renderer = Renderer::new(&mut backend, RendererConfig::default()).unwrap();
        renderer.resize(&mut backend, 0, 10).unwrap();
        assert_eq!(renderer.hdr_target().width(), 64);
        renderer.resize(&mut backend, 128, 32).unwrap();
        assert_eq!(renderer.hdr_target().height(), 32);
    }
}
