//! Forward lighting passes
//!
//! The ambient pass resolves depth for the opaque queue; every light then adds
//! its contribution in a pass that tests depth for equality and writes none.
//! Transparent geometry comes last, blended far to near.

use glam::{Mat4, Vec3};

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::shadow_pass::{ShadowMap, ShadowMapPass};
use crate::pipeline::{draw_queue, opaque, RendererConfig};
use crate::render_target::RenderTarget;
use crate::resources::Assets;
use crate::scene::{CameraView, Light, LightKind, LightType, QueueKind, Scene, POINT_SHADOW_FAR_PLANE};
use crate::shader::{sources, GpuProgram};

/// Counters of the per-light loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LightPassStats {
    pub draw_calls: u32,
    pub lights_drawn: u32,
    pub shadow_maps_rendered: u32,
}

fn lighting_program(backend: &mut dyn GraphicsBackend, label: &str, source: String) -> GpuProgram {
    GpuProgram::new(backend, &ProgramDescriptor::new(label, source)).with_variants(
        ShaderStage::Fragment,
        "fs_variant",
        &["lit", "normals"],
    )
}

fn set_camera(backend: &mut dyn GraphicsBackend, program: &mut GpuProgram, view: &CameraView, config: &RendererConfig) {
    program.set_parameter(backend, "g_view_proj", view.view_projection());
    program.set_parameter(backend, "g_eye_position", view.position);
    let variant = if config.debug_normals { "normals" } else { "lit" };
    program.select_variant(backend, ShaderStage::Fragment, variant);
}

fn begin_hdr_pass(backend: &mut dyn GraphicsBackend, hdr: &RenderTarget, label: &str, load: LoadOp, depth: LoadOp) {
    backend.begin_render_pass(&hdr.pass(label, load, depth));
    backend.set_viewport(0.0, 0.0, hdr.width() as f32, hdr.height() as f32);
}

/// Ambient, per-light and alpha passes plus the shadow maps feeding them
pub struct ForwardLightingRenderer {
    ambient: GpuProgram,
    directional: GpuProgram,
    point: GpuProgram,
    spot: GpuProgram,
    alpha: GpuProgram,
    shadows: ShadowMapPass,
}

impl ForwardLightingRenderer {
    pub fn new(backend: &mut dyn GraphicsBackend, shadow_map_size: u32) -> Self {
        Self {
            ambient: lighting_program(backend, "ambient", sources::ambient()),
            directional: lighting_program(backend, "directional", sources::directional()),
            point: lighting_program(backend, "point", sources::point()),
            spot: lighting_program(backend, "spot", sources::spot()),
            alpha: lighting_program(backend, "alpha", sources::alpha()),
            shadows: ShadowMapPass::new(backend, shadow_map_size),
        }
    }

    pub fn shadows_mut(&mut self) -> &mut ShadowMapPass {
        &mut self.shadows
    }

    /// Clear the HDR target and draw the opaque queue lit by the ambient term only
    pub fn ambient_pass(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        hdr: &RenderTarget,
        scene: &Scene,
        assets: &Assets,
        view: &CameraView,
        config: &RendererConfig,
    ) -> u32 {
        begin_hdr_pass(
            backend,
            hdr,
            "Ambient",
            LoadOp::Clear(config.clear_color),
            LoadOp::Clear([1.0; 4]),
        );
        backend.set_render_state(RenderState::STANDARD);

        let mut draws = 0;
        if self.ambient.bind(backend) {
            set_camera(backend, &mut self.ambient, view, config);
            self.ambient.set_parameter(backend, "g_ambient", config.scene_ambient);
            draws = draw_queue(backend, &mut self.ambient, scene, assets, opaque(scene), true);
        } else {
            log::debug!("Ambient program not linked, opaque queue skipped");
        }
        backend.end_render_pass();
        draws
    }

    /// One shadow step and one additive pass per light, directional lights first
    pub fn light_passes(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        hdr: &RenderTarget,
        scene: &Scene,
        assets: &Assets,
        view: &CameraView,
        config: &RendererConfig,
    ) -> BackendResult<LightPassStats> {
        let mut stats = LightPassStats::default();
        let mut passes = 0;

        for (entity, light) in scene.lights_in_pass_order() {
            let Ok(node) = scene.node_of(entity) else {
                log::debug!("Light {:?} has no transform node", entity);
                continue;
            };
            let (Ok(position), Ok(direction)) = (
                scene.graph().world_position(node),
                scene.graph().world_forward(node),
            ) else {
                continue;
            };

            let shadow = self.shadows.render(backend, scene, assets, light, position, direction)?;
            if let Some(map) = &shadow {
                stats.shadow_maps_rendered += 1;
                stats.draw_calls += map.draw_calls;
            }

            let program = match light.light_type() {
                LightType::Directional => &mut self.directional,
                LightType::Point => &mut self.point,
                LightType::Spot => &mut self.spot,
            };
            let label = format!("Light {:?}", light.light_type());
            begin_hdr_pass(backend, hdr, &label, LoadOp::Load, LoadOp::Load);
            passes += 1;

            if program.bind(backend) {
                backend.set_render_state(RenderState::FORWARD_ADDITIVE);
                set_camera(backend, program, view, config);
                set_light(backend, program, light, position, direction, shadow.as_ref(), config);
                stats.draw_calls += draw_queue(backend, program, scene, assets, opaque(scene), true);
                stats.lights_drawn += 1;
            } else {
                log::debug!("Program '{}' not linked, light {:?} skipped", program.label(), entity);
            }
            backend.end_render_pass();
        }

        if passes > 0 {
            backend.set_render_state(RenderState::STANDARD);
        }
        Ok(stats)
    }

    /// Transparent queue, already sorted far to near, blended over the lit image
    pub fn alpha_pass(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        hdr: &RenderTarget,
        scene: &Scene,
        assets: &Assets,
        view: &CameraView,
        config: &RendererConfig,
    ) -> u32 {
        let entries = scene.queues().queue(QueueKind::Alpha);
        if entries.is_empty() {
            return 0;
        }

        begin_hdr_pass(backend, hdr, "Alpha", LoadOp::Load, LoadOp::Load);
        backend.set_render_state(RenderState::ALPHA_BLEND);

        let mut draws = 0;
        if self.alpha.bind(backend) {
            // Transparent surfaces get the ambient term and the first directional light
            let key = scene.lights_in_pass_order().into_iter().find_map(|(entity, light)| {
                if light.light_type() != LightType::Directional {
                    return None;
                }
                let node = scene.node_of(entity).ok()?;
                let direction = scene.graph().world_forward(node).ok()?;
                Some((direction, light.color(), light.intensity()))
            });
            let (direction, color, intensity) = key.unwrap_or((Vec3::NEG_Y, Vec3::ONE, 0.0));

            set_camera(backend, &mut self.alpha, view, config);
            self.alpha.set_parameter(backend, "g_ambient", config.scene_ambient);
            self.alpha.set_parameter(backend, "g_light_direction", direction);
            self.alpha.set_parameter(backend, "g_light_color", color);
            self.alpha.set_parameter(backend, "g_light_intensity", intensity);
            draws = draw_queue(backend, &mut self.alpha, scene, assets, entries, true);
        }

        backend.set_render_state(RenderState::STANDARD);
        backend.end_render_pass();
        draws
    }

    pub fn destroy(&mut self, backend: &mut dyn GraphicsBackend) {
        for program in [
            &mut self.ambient,
            &mut self.directional,
            &mut self.point,
            &mut self.spot,
            &mut self.alpha,
        ] {
            program.destroy(backend);
        }
        self.shadows.destroy(backend);
    }
}

/// Light parameters of one additive pass
fn set_light(
    backend: &mut dyn GraphicsBackend,
    program: &mut GpuProgram,
    light: &Light,
    position: Vec3,
    direction: Vec3,
    shadow: Option<&ShadowMap>,
    config: &RendererConfig,
) {
    program.set_parameter(backend, "g_light_color", light.color());
    program.set_parameter(backend, "g_light_intensity", light.intensity());
    program.set_parameter(backend, "g_shadow_bias", config.shadow_bias);
    program.set_parameter(backend, "g_shadow_enabled", shadow.is_some() as i32);
    program.set_parameter(
        backend,
        "g_light_space",
        shadow.map_or(Mat4::IDENTITY, |map| map.light_space),
    );
    if let Some(map) = shadow {
        program.set_parameter(backend, "g_shadow_map", map.binding());
    }

    let range = light.range().min(f32::MAX);
    match *light.kind() {
        LightKind::Directional => {
            program.set_parameter(backend, "g_light_direction", direction);
        }
        LightKind::Point { attenuation } => {
            program.set_parameter(backend, "g_light_position", position);
            program.set_parameter(backend, "g_light_range", range);
            program.set_parameter(backend, "g_attenuation", attenuation.as_vec3());
            program.set_parameter(backend, "g_shadow_far", POINT_SHADOW_FAR_PLANE);
        }
        LightKind::Spot { attenuation, cutoff } => {
            program.set_parameter(backend, "g_light_position", position);
            program.set_parameter(backend, "g_light_direction", direction);
            program.set_parameter(backend, "g_light_range", range);
            program.set_parameter(backend, "g_attenuation", attenuation.as_vec3());
            program.set_parameter(backend, "g_spot_cutoff", cutoff);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::RecordingBackend;
    use crate::render_target::RenderTargetDescriptor;
    use crate::resources::{Material, Mesh};
    use crate::scene::{Attenuation, Camera, Renderable, SceneEvent, Transform};
    use crate::shader::ParameterValue;
    use bevy_ecs::entity::Entity;

    struct Fixture {
        backend: RecordingBackend,
        scene: Scene,
        assets: Assets,
        hdr: RenderTarget,
        next: u32,
    }

    impl Fixture {
        fn new() -> Self {
            let mut backend = RecordingBackend::new(64, 64);
            let mut assets = Assets::new();
            let mesh = assets.add_mesh(Mesh::cube());
            let material = assets.add_material(Material::plastic(Vec3::ONE));
            assets.upload(&mut backend).unwrap();
            let hdr = RenderTarget::new(
                &mut backend,
                RenderTargetDescriptor::color("HDR", 64, 64, TextureFormat::Rgba16Float)
                    .with_depth(TextureFormat::Depth32Float),
            )
            .unwrap();

            let mut fixture = Self {
                backend,
                scene: Scene::new(),
                assets,
                hdr,
                next: 0,
            };
            let cube = fixture.spawn(Transform::IDENTITY);
            fixture.send(SceneEvent::RenderableAttached {
                entity: cube,
                renderable: Renderable::new(mesh, material),
            });
            fixture
        }

        fn send(&mut self, event: SceneEvent) {
            self.scene.dispatch(event, &self.assets).unwrap();
        }

        fn spawn(&mut self, transform: Transform) -> Entity {
            self.next += 1;
            let entity = Entity::from_raw(self.next);
            self.send(SceneEvent::EntitySpawned {
                entity,
                parent: None,
                transform,
            });
            entity
        }

        fn add_light(&mut self, light: Light) {
            let entity = self.spawn(Transform::from_position(Vec3::new(0.0, 4.0, 0.0)));
            self.send(SceneEvent::LightAttached { entity, light });
        }

        fn view(&mut self) -> CameraView {
            self.scene.update();
            CameraView::from_world(Mat4::from_translation(Vec3::new(0.0, 0.0, 5.0)), Camera::default().projection_matrix())
        }
    }

    #[test]
    fn test_ambient_pass_uses_standard_state() {
        let mut fixture = Fixture::new();
        let view = fixture.view();
        let mut forward = ForwardLightingRenderer::new(&mut fixture.backend, 64);
        let config = RendererConfig::default();

        let draws = forward.ambient_pass(
            &mut fixture.backend,
            &fixture.hdr,
            &fixture.scene,
            &fixture.assets,
            &view,
            &config,
        );
        assert_eq!(draws, 1);
        assert_eq!(
            fixture.backend.draws(),
            vec![("ambient".to_string(), RenderState::STANDARD)]
        );
    }

    #[test]
    fn test_lights_run_in_type_order() {
        let mut fixture = Fixture::new();
        fixture.add_light(Light::spot(Vec3::ONE, 1.0, Attenuation::default(), 30.0));
        fixture.add_light(Light::point(Vec3::ONE, 1.0, Attenuation::default()));
        fixture.add_light(Light::directional(Vec3::ONE, 1.0));
        let view = fixture.view();
        let mut forward = ForwardLightingRenderer::new(&mut fixture.backend, 64);

        let stats = forward
            .light_passes(
                &mut fixture.backend,
                &fixture.hdr,
                &fixture.scene,
                &fixture.assets,
                &view,
                &RendererConfig::default(),
            )
            .unwrap();
        assert_eq!(stats.lights_drawn, 3);
        assert_eq!(stats.shadow_maps_rendered, 0);
        assert_eq!(
            fixture.backend.pass_labels(),
            vec!["Light Directional", "Light Point", "Light Spot"]
        );
        assert!(fixture
            .backend
            .draws()
            .iter()
            .all(|(_, state)| *state == RenderState::FORWARD_ADDITIVE));
    }

    #[test]
    fn test_unshadowed_light_reads_as_lit() {
        let mut fixture = Fixture::new();
        fixture.add_light(Light::directional(Vec3::ONE, 2.0));
        let view = fixture.view();
        let mut forward = ForwardLightingRenderer::new(&mut fixture.backend, 64);
        forward
            .light_passes(
                &mut fixture.backend,
                &fixture.hdr,
                &fixture.scene,
                &fixture.assets,
                &view,
                &RendererConfig::default(),
            )
            .unwrap();

        let program = forward.directional.handle().unwrap();
        assert_eq!(
            fixture.backend.parameter_value(program, "g_shadow_enabled"),
            Some(ParameterValue::Int(0))
        );
        assert_eq!(
            fixture.backend.parameter_value(program, "g_light_space"),
            Some(ParameterValue::Mat4(Mat4::IDENTITY))
        );
        assert_eq!(
            fixture.backend.parameter_value(program, "g_light_intensity"),
            Some(ParameterValue::Float(2.0))
        );
    }

    #[test]
    fn test_debug_normals_selects_variant() {
        let mut fixture = Fixture::new();
        let view = fixture.view();
        let mut forward = ForwardLightingRenderer::new(&mut fixture.backend, 64);
        let config = RendererConfig {
            debug_normals: true,
            ..Default::default()
        };
        forward.ambient_pass(&mut fixture.backend, &fixture.hdr, &fixture.scene, &fixture.assets, &view, &config);
        assert_eq!(
            fixture
                .backend
                .parameter_value(forward.ambient.handle().unwrap(), "fs_variant"),
            Some(ParameterValue::UInt(1))
        );
    }

    #[test]
    fn test_empty_alpha_queue_skips_pass() {
        let mut fixture = Fixture::new();
        let view = fixture.view();
        let mut forward = ForwardLightingRenderer::new(&mut fixture.backend, 64);
        let draws = forward.alpha_pass(
            &mut fixture.backend,
            &fixture.hdr,
            &fixture.scene,
            &fixture.assets,
            &view,
            &RendererConfig::default(),
        );
        assert_eq!(draws, 0);
        assert!(fixture.backend.pass_labels().is_empty());
    }
}
