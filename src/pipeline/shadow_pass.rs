//! Shadow map pass
//!
//! Renders the opaque queue from a light's point of view, depth only, into a
//! target kept per light type. Directional and spot lights get one 2D map; a
//! point light gets a cube rendered one face at a time, storing linear distance
//! over [`POINT_SHADOW_FAR_PLANE`].

use glam::{Mat4, Vec3};

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::{draw_queue, opaque};
use crate::render_target::{RenderTarget, RenderTargetDescriptor};
use crate::resources::Assets;
use crate::scene::{Light, LightType, Scene, POINT_SHADOW_FAR_PLANE};
use crate::shader::{sources, GpuProgram, ParameterValue};

const SHADOW_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// Look direction and up vector of the six cube faces, in layer order
const CUBE_DIRECTIONS: [(Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::Y),
    (Vec3::NEG_X, Vec3::Y),
    (Vec3::Y, Vec3::NEG_Z),
    (Vec3::NEG_Y, Vec3::Z),
    (Vec3::Z, Vec3::Y),
    (Vec3::NEG_Z, Vec3::Y),
];

/// One face of a point light's shadow cube
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubeFace {
    pub direction: Vec3,
    pub view: Mat4,
    pub view_projection: Mat4,
}

fn up_for(direction: Vec3) -> Vec3 {
    if direction.y.abs() > 0.99 {
        Vec3::Z
    } else {
        Vec3::Y
    }
}

/// Light-space transform of a directional light shining along `direction`.
///
/// The view sits at `-direction * extent` looking at the origin, so the
/// orthographic volume spans the scene around it.
pub fn directional_light_space(light: &Light, direction: Vec3) -> Mat4 {
    let direction = direction.try_normalize().unwrap_or(Vec3::NEG_Y);
    let eye = -direction * light.directional_extent();
    let view = Mat4::look_at_rh(eye, Vec3::ZERO, up_for(direction));
    light.shadow().projection * view
}

/// Light-space transform of a spot light at `position` shining along `direction`
pub fn spot_light_space(light: &Light, position: Vec3, direction: Vec3) -> Mat4 {
    let direction = direction.try_normalize().unwrap_or(Vec3::NEG_Z);
    let view = Mat4::look_at_rh(position, position + direction, up_for(direction));
    light.shadow().projection * view
}

/// The six 90 degree views of a point light at `position`, in cube layer order
pub fn point_light_faces(light: &Light, position: Vec3) -> [CubeFace; 6] {
    CUBE_DIRECTIONS.map(|(direction, up)| {
        let view = Mat4::look_at_lh(position, position + direction, up);
        CubeFace {
            direction,
            view,
            view_projection: light.shadow().projection * view,
        }
    })
}

/// Output of one shadow step, consumed by the matching light pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowMap {
    /// Identity for point lights, which sample by direction
    pub light_space: Mat4,
    pub view: TextureViewHandle,
    pub sampler: SamplerHandle,
    pub draw_calls: u32,
}

impl ShadowMap {
    pub fn binding(&self) -> ParameterValue {
        ParameterValue::Texture {
            view: self.view,
            sampler: self.sampler,
        }
    }
}

/// Shadow casters per light type, with lazily created targets reused across frames
pub struct ShadowMapPass {
    size: u32,
    depth_program: GpuProgram,
    distance_program: GpuProgram,
    directional: Option<RenderTarget>,
    spot: Option<RenderTarget>,
    point: Option<RenderTarget>,
    sampler: Option<SamplerHandle>,
}

fn slot<'a>(
    slot: &'a mut Option<RenderTarget>,
    backend: &mut dyn GraphicsBackend,
    desc: RenderTargetDescriptor,
) -> BackendResult<&'a RenderTarget> {
    if slot.is_none() {
        *slot = Some(RenderTarget::new(backend, desc)?);
    }
    slot.as_ref().ok_or(BackendError::InvalidHandle("shadow map"))
}

/// One depth-only pass over the opaque queue
#[allow(clippy::too_many_arguments)]
fn draw_casters(
    backend: &mut dyn GraphicsBackend,
    program: &mut GpuProgram,
    scene: &Scene,
    assets: &Assets,
    pass: &RenderPassDescriptor,
    size: u32,
    state: RenderState,
    params: &[(&str, ParameterValue)],
) -> u32 {
    backend.begin_render_pass(pass);
    backend.set_viewport(0.0, 0.0, size as f32, size as f32);
    backend.set_render_state(state);

    let mut draws = 0;
    if program.bind(backend) {
        for (name, value) in params {
            program.set_parameter(backend, name, *value);
        }
        draws = draw_queue(backend, program, scene, assets, opaque(scene), false);
    }

    backend.set_render_state(RenderState::STANDARD);
    backend.end_render_pass();
    draws
}

impl ShadowMapPass {
    pub fn new(backend: &mut dyn GraphicsBackend, size: u32) -> Self {
        Self {
            size: size.max(1),
            depth_program: GpuProgram::new(backend, &ProgramDescriptor::new("shadow_depth", sources::SHADOW_DEPTH)),
            distance_program: GpuProgram::new(
                backend,
                &ProgramDescriptor::new("shadow_distance", sources::SHADOW_DISTANCE),
            ),
            directional: None,
            spot: None,
            point: None,
            sampler: None,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Change the map size; targets are rebuilt on next use
    pub fn set_size(&mut self, backend: &mut dyn GraphicsBackend, size: u32) {
        self.size = size.max(1);
        self.release_targets(backend);
    }

    fn release_targets(&mut self, backend: &mut dyn GraphicsBackend) {
        for target in [&mut self.directional, &mut self.spot, &mut self.point] {
            if let Some(mut target) = target.take() {
                target.destroy(backend);
            }
        }
    }

    /// Render the shadow map of `light`. `None` when the light casts no shadows.
    pub fn render(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        scene: &Scene,
        assets: &Assets,
        light: &Light,
        position: Vec3,
        direction: Vec3,
    ) -> BackendResult<Option<ShadowMap>> {
        if !light.casts_shadows() {
            return Ok(None);
        }
        let sampler = match self.sampler {
            Some(sampler) => sampler,
            None => *self.sampler.insert(backend.create_sampler(&SamplerDescriptor::shadow())?),
        };
        let size = self.size;
        let state = if light.shadow().flip_faces {
            RenderState::SHADOW_CASTER.with_front_face(FrontFace::Cw)
        } else {
            RenderState::SHADOW_CASTER
        };

        let (light_space, view, draw_calls) = match light.light_type() {
            LightType::Directional | LightType::Spot => {
                let (label, target_slot, light_space) = if light.light_type() == LightType::Directional {
                    (
                        "Shadow Directional",
                        &mut self.directional,
                        directional_light_space(light, direction),
                    )
                } else {
                    (
                        "Shadow Spot",
                        &mut self.spot,
                        spot_light_space(light, position, direction),
                    )
                };
                let target = slot(
                    target_slot,
                    backend,
                    RenderTargetDescriptor::depth(label, size, size, SHADOW_FORMAT),
                )?;
                let pass = target.pass(label, LoadOp::Load, LoadOp::Clear([1.0; 4]));
                let draws = draw_casters(
                    backend,
                    &mut self.depth_program,
                    scene,
                    assets,
                    &pass,
                    size,
                    state,
                    &[("g_light_view_proj", ParameterValue::Mat4(light_space))],
                );
                (light_space, target.depth_view(), draws)
            }
            LightType::Point => {
                let target = slot(
                    &mut self.point,
                    backend,
                    RenderTargetDescriptor::depth_cube("Shadow Point", size, SHADOW_FORMAT),
                )?;
                let mut draws = 0;
                for (face, cube_face) in point_light_faces(light, position).iter().enumerate() {
                    let label = format!("Shadow Point Face {}", face);
                    let Some(pass) = target.face_pass(face as u32, &label, LoadOp::Load, LoadOp::Clear([1.0; 4]))
                    else {
                        log::warn!("Point shadow target has no face {}", face);
                        continue;
                    };
                    draws += draw_casters(
                        backend,
                        &mut self.distance_program,
                        scene,
                        assets,
                        &pass,
                        size,
                        state,
                        &[
                            ("g_light_view_proj", ParameterValue::Mat4(cube_face.view_projection)),
                            ("g_light_position", ParameterValue::Vec3(position)),
                            ("g_shadow_far", ParameterValue::Float(POINT_SHADOW_FAR_PLANE)),
                        ],
                    );
                }
                (Mat4::IDENTITY, target.depth_view(), draws)
            }
        };

        let Some(view) = view else {
            log::warn!("Shadow target of a {:?} light has no depth view", light.light_type());
            return Ok(None);
        };
        Ok(Some(ShadowMap {
            light_space,
            view,
            sampler,
            draw_calls,
        }))
    }

    pub fn destroy(&mut self, backend: &mut dyn GraphicsBackend) {
        self.release_targets(backend);
        self.depth_program.destroy(backend);
        self.distance_program.destroy(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::RecordingBackend;
    use crate::resources::{Material, Mesh};
    use crate::scene::{Attenuation, Renderable, SceneEvent, Transform};
    use bevy_ecs::entity::Entity;
    use glam::Vec4;

    fn scene_with_cube(backend: &mut RecordingBackend) -> (Scene, Assets) {
        let mut assets = Assets::new();
        let mesh = assets.add_mesh(Mesh::cube());
        let material = assets.add_material(Material::plastic(Vec3::ONE));
        assets.upload(backend).unwrap();

        let mut scene = Scene::new();
        let entity = Entity::from_raw(1);
        scene
            .dispatch(
                SceneEvent::EntitySpawned {
                    entity,
                    parent: None,
                    transform: Transform::IDENTITY,
                },
                &assets,
            )
            .unwrap();
        scene
            .dispatch(
                SceneEvent::RenderableAttached {
                    entity,
                    renderable: Renderable::new(mesh, material),
                },
                &assets,
            )
            .unwrap();
        scene.update();
        (scene, assets)
    }

    #[test]
    fn test_spot_field_of_view_is_twice_the_cutoff() {
        let light = Light::spot(Vec3::ONE, 1.0, Attenuation::default(), 30.0);
        let projection = light.shadow().projection;
        let expected = 1.0 / 30.0f32.to_radians().tan();
        assert!((projection.y_axis.y - expected).abs() < 1e-4);

        let light_space = spot_light_space(&light, Vec3::new(0.0, 5.0, 0.0), Vec3::NEG_Y);
        let below = light_space * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!((below.x / below.w).abs() < 1e-5);
        assert!((below.y / below.w).abs() < 1e-5);
    }

    #[test]
    fn test_point_faces_follow_axes() {
        let light = Light::point(Vec3::ONE, 1.0, Attenuation::default());
        let position = Vec3::new(1.0, 2.0, 3.0);
        let faces = point_light_faces(&light, position);
        let expected = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z];
        for (face, axis) in faces.iter().zip(expected) {
            assert_eq!(face.direction, axis);
            let forward = face.view.inverse().transform_vector3(Vec3::Z);
            assert!(forward.abs_diff_eq(axis, 1e-5), "{forward:?} != {axis:?}");
            assert!(face.view.transform_point3(position).abs_diff_eq(Vec3::ZERO, 1e-5));
        }
    }

    #[test]
    fn test_directional_view_looks_at_origin() {
        let light = Light::directional(Vec3::ONE, 1.0);
        let light_space = directional_light_space(&light, Vec3::new(0.0, -1.0, 0.0));
        let origin = light_space * Vec4::W;
        // Origin sits halfway through the 0..2e depth range
        assert!(origin.x.abs() < 1e-5 && origin.y.abs() < 1e-5);
        assert!((origin.z - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_targets_are_reused_across_frames() {
        let mut backend = RecordingBackend::new(64, 64);
        let (scene, assets) = scene_with_cube(&mut backend);
        let mut pass = ShadowMapPass::new(&mut backend, 128);
        let light = Light::directional(Vec3::ONE, 1.0).with_shadows(true);

        let first = pass
            .render(&mut backend, &scene, &assets, &light, Vec3::ZERO, Vec3::NEG_Y)
            .unwrap()
            .unwrap();
        let textures = backend.live_textures();
        let second = pass
            .render(&mut backend, &scene, &assets, &light, Vec3::ZERO, Vec3::NEG_Y)
            .unwrap()
            .unwrap();
        assert_eq!(first.view, second.view);
        assert_eq!(backend.live_textures(), textures);
        assert_eq!(
            backend.sampler_descriptor(first.sampler).unwrap().compare,
            Some(CompareFunction::LessEqual)
        );
        assert_eq!(second.draw_calls, 1);
        assert_eq!(
            backend.draws().last().unwrap(),
            &("shadow_depth".to_string(), RenderState::SHADOW_CASTER)
        );
    }

    #[test]
    fn test_point_renders_six_faces() {
        let mut backend = RecordingBackend::new(64, 64);
        let (scene, assets) = scene_with_cube(&mut backend);
        let mut pass = ShadowMapPass::new(&mut backend, 64);
        let light = Light::point(Vec3::ONE, 1.0, Attenuation::default()).with_shadows(true);

        let map = pass
            .render(&mut backend, &scene, &assets, &light, Vec3::new(0.0, 3.0, 0.0), Vec3::NEG_Z)
            .unwrap()
            .unwrap();
        assert_eq!(map.light_space, Mat4::IDENTITY);
        assert_eq!(map.draw_calls, 6);
        assert_eq!(
            backend.view_descriptor(map.view).unwrap().dimension,
            ViewDimension::Cube
        );
        let labels = backend.pass_labels();
        assert_eq!(labels.len(), 6);
        assert_eq!(labels[5], "Shadow Point Face 5");
        assert!(backend
            .draws()
            .iter()
            .all(|(_, state)| state.front_face == FrontFace::Cw && state.cull == CullMode::Front));
    }

    #[test]
    fn test_non_casting_light_skips() {
        let mut backend = RecordingBackend::new(64, 64);
        let (scene, assets) = scene_with_cube(&mut backend);
        let mut pass = ShadowMapPass::new(&mut backend, 64);
        let light = Light::spot(Vec3::ONE, 1.0, Attenuation::default(), 25.0);

        let map = pass
            .render(&mut backend, &scene, &assets, &light, Vec3::ZERO, Vec3::NEG_Z)
            .unwrap();
        assert!(map.is_none());
        assert!(backend.pass_labels().is_empty());
    }
}
