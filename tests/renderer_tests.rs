//! Frame-level tests of the forward renderer.
//!
//! Every test drives a full [`Engine`] over the recording backend: scene events
//! go in through the fixed-step loop and the recorded command stream is checked.
//!
//! ```bash
//! cargo test --test renderer_tests
//! ```

use std::time::Duration;

use bevy_ecs::entity::Entity;
use glam::{Mat4, Vec3};
use rstest::rstest;

use forward_engine::{
    backend::{recording::RecordedCommand, CullMode, RenderState},
    resources::{Material, Mesh, MaterialId, MeshId},
    scene::Skybox,
    Attenuation, Camera, DestroyPolicy, Engine, EngineConfig, FrameReport, Light, ParameterValue,
    RecordingBackend, Renderable, SceneEvent, Transform,
};

// ============================================================================
// Fixture
// ============================================================================

struct TestScene {
    engine: Engine<RecordingBackend>,
    cube: MeshId,
    plastic: MaterialId,
    glass: MaterialId,
    next: u32,
}

impl TestScene {
    fn new() -> Self {
        Self::with_backend(RecordingBackend::new(160, 90))
    }

    fn with_backend(backend: RecordingBackend) -> Self {
        let mut engine = Engine::new(backend, EngineConfig::default()).unwrap();
        let cube = engine.assets_mut().add_mesh(Mesh::cube());
        let plastic = engine.assets_mut().add_material(Material::plastic(Vec3::ONE));
        let glass = engine.assets_mut().add_material(Material::glass(Vec3::ONE, 0.5));
        Self {
            engine,
            cube,
            plastic,
            glass,
            next: 0,
        }
    }

    fn spawn(&mut self, parent: Option<Entity>, transform: Transform) -> Entity {
        self.next += 1;
        let entity = Entity::from_raw(self.next);
        self.engine.push_event(SceneEvent::EntitySpawned {
            entity,
            parent,
            transform,
        });
        entity
    }

    fn camera_at(&mut self, position: Vec3) -> Entity {
        let entity = self.spawn(None, Transform::from_position(position));
        self.engine.push_event(SceneEvent::CameraAttached {
            entity,
            camera: Camera::perspective(60.0, 0.1, 100.0),
            primary: true,
        });
        entity
    }

    fn opaque_at(&mut self, position: Vec3) -> Entity {
        let entity = self.spawn(None, Transform::from_position(position));
        self.engine.push_event(SceneEvent::RenderableAttached {
            entity,
            renderable: Renderable::new(self.cube, self.plastic),
        });
        entity
    }

    fn glass_at(&mut self, position: Vec3) -> Entity {
        let entity = self.spawn(None, Transform::from_position(position));
        self.engine.push_event(SceneEvent::RenderableAttached {
            entity,
            renderable: Renderable::new(self.cube, self.glass),
        });
        entity
    }

    fn light(&mut self, transform: Transform, light: Light) -> Entity {
        let entity = self.spawn(None, transform);
        self.engine.push_event(SceneEvent::LightAttached { entity, light });
        entity
    }

    /// Ground plus one shadowed light of each type, added spot first
    fn lit() -> Self {
        let mut scene = Self::new();
        scene.camera_at(Vec3::new(0.0, 2.0, 10.0));
        scene.opaque_at(Vec3::ZERO);
        scene.opaque_at(Vec3::new(2.0, 0.0, 0.0));
        scene.light(
            Transform::from_position(Vec3::new(0.0, 5.0, 0.0)).look_at(Vec3::ZERO, Vec3::Z),
            Light::spot(Vec3::ONE, 1.0, Attenuation::default(), 30.0).with_shadows(true),
        );
        scene.light(
            Transform::from_position(Vec3::new(3.0, 3.0, 0.0)),
            Light::point(Vec3::ONE, 1.0, Attenuation::default()).with_shadows(true),
        );
        scene.light(
            Transform::from_position_rotation(Vec3::ZERO, glam::Quat::from_rotation_x(-1.0)),
            Light::directional(Vec3::ONE, 1.0).with_shadows(true),
        );
        scene
    }

    /// One simulation step followed by one frame
    fn frame(&mut self) -> FrameReport {
        let step = self.engine.config().fixed_timestep;
        self.engine.frame(step, || false, |_, _| {}).unwrap()
    }

    fn backend(&self) -> &RecordingBackend {
        self.engine.backend()
    }

    fn clear(&mut self) {
        self.engine.backend_mut().clear_commands();
    }

    /// `g_model` translations set while the pass labelled `label` was open
    fn model_positions(&self, label: &str) -> Vec<Vec3> {
        let mut inside = false;
        let mut positions = Vec::new();
        for command in self.backend().commands() {
            match command {
                RecordedCommand::BeginRenderPass(desc) => {
                    inside = desc.label.as_deref() == Some(label);
                }
                RecordedCommand::EndRenderPass => inside = false,
                RecordedCommand::SetParameter {
                    name,
                    value: ParameterValue::Mat4(model),
                    ..
                } if inside && name == "g_model" => {
                    positions.push(model.transform_point3(Vec3::ZERO));
                }
                _ => {}
            }
        }
        positions
    }

    /// `(pass label, program label, state)` of every draw, in order
    fn draws_by_pass(&self) -> Vec<(String, String, RenderState)> {
        let mut pass = String::new();
        let mut draws = Vec::new();
        for command in self.backend().commands() {
            match command {
                RecordedCommand::BeginRenderPass(desc) => {
                    pass = desc.label.clone().unwrap_or_default();
                }
                RecordedCommand::Draw { program, state, .. } => {
                    draws.push((pass.clone(), program.clone(), *state));
                }
                _ => {}
            }
        }
        draws
    }

    /// States set after the pass labelled `label` began, up to the next pass
    fn states_from(&self, label: &str) -> Vec<RenderState> {
        let commands = self.backend().commands();
        let Some(start) = commands.iter().position(|c| {
            matches!(c, RecordedCommand::BeginRenderPass(desc) if desc.label.as_deref() == Some(label))
        }) else {
            return Vec::new();
        };
        commands[start + 1..]
            .iter()
            .take_while(|c| !matches!(c, RecordedCommand::BeginRenderPass(_)))
            .filter_map(|c| match c {
                RecordedCommand::SetRenderState(state) => Some(*state),
                _ => None,
            })
            .collect()
    }

    fn ended_frames(&self) -> usize {
        self.backend()
            .commands()
            .iter()
            .filter(|c| matches!(c, RecordedCommand::EndFrame))
            .count()
    }
}

fn labels(scene: &TestScene) -> Vec<String> {
    scene.backend().pass_labels()
}

// ============================================================================
// Pass Order Tests
// ============================================================================

#[test]
fn test_full_frame_pass_order() {
    let mut scene = TestScene::lit();
    scene.glass_at(Vec3::new(0.0, 1.0, 2.0));
    scene.engine.scene_mut().skybox = Some(Skybox::default());

    let report = scene.frame();
    let stats = report.stats.unwrap();
    assert!(stats.camera_found);
    assert_eq!(stats.lights_drawn, 3);
    assert_eq!(stats.shadow_maps_rendered, 3);

    let mut expected = vec![
        "Ambient".to_string(),
        "Shadow Directional".to_string(),
        "Light Directional".to_string(),
    ];
    expected.extend((0..6).map(|i| format!("Shadow Point Face {}", i)));
    expected.extend(
        ["Light Point", "Shadow Spot", "Light Spot", "Skybox", "Alpha", "Tonemapping"]
            .iter()
            .map(|s| s.to_string()),
    );
    assert_eq!(labels(&scene), expected);
    assert_eq!(scene.ended_frames(), 1);

    let draws = scene.draws_by_pass();
    let in_pass = |label: &str| -> Vec<(String, RenderState)> {
        draws
            .iter()
            .filter(|(pass, _, _)| pass == label)
            .map(|(_, program, state)| (program.clone(), *state))
            .collect()
    };
    let standard = ("ambient".to_string(), RenderState::STANDARD);
    assert_eq!(in_pass("Ambient"), vec![standard.clone(), standard]);
    for (label, program) in [
        ("Light Directional", "directional"),
        ("Light Point", "point"),
        ("Light Spot", "spot"),
    ] {
        assert_eq!(
            in_pass(label),
            vec![(program.to_string(), RenderState::FORWARD_ADDITIVE); 2],
            "{}",
            label
        );
    }
    assert_eq!(in_pass("Skybox"), vec![("skybox".to_string(), RenderState::SKYBOX)]);
    let alpha = in_pass("Alpha");
    assert_eq!(alpha, vec![("alpha".to_string(), RenderState::ALPHA_BLEND)]);
    assert_eq!(alpha[0].1.cull, CullMode::None);
    assert_eq!(in_pass("Tonemapping"), vec![("tonemap".to_string(), RenderState::FULLSCREEN)]);

    // Light loop and alpha pass leave the standard state behind
    assert_eq!(
        scene.states_from("Light Spot"),
        vec![RenderState::FORWARD_ADDITIVE, RenderState::STANDARD]
    );
    assert_eq!(
        scene.states_from("Alpha"),
        vec![RenderState::ALPHA_BLEND, RenderState::STANDARD]
    );
    assert_eq!(
        scene.states_from("Tonemapping"),
        vec![RenderState::FULLSCREEN, RenderState::STANDARD]
    );
}

#[test]
fn test_tonemap_writes_swapchain() {
    let mut scene = TestScene::new();
    scene.camera_at(Vec3::new(0.0, 0.0, 5.0));
    scene.opaque_at(Vec3::ZERO);
    scene.frame();

    let commands = scene.backend().commands();
    let swapchain = commands
        .iter()
        .find_map(|c| match c {
            RecordedCommand::BeginFrame { swapchain_view } => Some(*swapchain_view),
            _ => None,
        })
        .unwrap();
    let tonemap_target = commands
        .iter()
        .find_map(|c| match c {
            RecordedCommand::BeginRenderPass(desc) if desc.label.as_deref() == Some("Tonemapping") => {
                Some(desc.color_attachments[0].view)
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(tonemap_target, swapchain);
    assert_eq!(
        scene.backend().draws(),
        vec![
            ("ambient".to_string(), RenderState::STANDARD),
            ("tonemap".to_string(), RenderState::FULLSCREEN),
        ]
    );
}

#[test]
fn test_frame_without_lights_has_no_light_passes() {
    let mut scene = TestScene::new();
    scene.camera_at(Vec3::new(0.0, 0.0, 5.0));
    scene.opaque_at(Vec3::ZERO);

    let stats = scene.frame().stats.unwrap();
    assert_eq!(stats.lights_drawn, 0);
    assert_eq!(stats.shadow_maps_rendered, 0);
    assert_eq!(labels(&scene), vec!["Ambient", "Tonemapping"]);

    // Same scene, same frame
    let first = scene.backend().draws();
    scene.clear();
    scene.frame();
    assert_eq!(scene.backend().draws(), first);
}

#[test]
fn test_missing_camera_only_clears() {
    let mut scene = TestScene::new();
    scene.opaque_at(Vec3::ZERO);

    let stats = scene.frame().stats.unwrap();
    assert!(!stats.camera_found);
    assert_eq!(stats.draw_calls, 0);
    assert_eq!(labels(&scene), vec!["Clear"]);
    assert!(scene.backend().draws().is_empty());
    assert_eq!(scene.ended_frames(), 1);
}

#[test]
fn test_detached_camera_promotes_next() {
    let mut scene = TestScene::new();
    let first = scene.camera_at(Vec3::new(0.0, 0.0, 5.0));
    scene.camera_at(Vec3::new(0.0, 0.0, -5.0));
    scene.opaque_at(Vec3::ZERO);
    scene.frame();

    scene.engine.push_event(SceneEvent::CameraDetached { entity: first });
    scene.clear();
    assert!(scene.frame().stats.unwrap().camera_found);

    let second = Entity::from_raw(2);
    scene.engine.push_event(SceneEvent::EntityDespawned {
        entity: second,
        policy: DestroyPolicy::ReparentToRoot,
    });
    scene.clear();
    assert!(!scene.frame().stats.unwrap().camera_found);
}

// ============================================================================
// Failure Tests
// ============================================================================

/// A program that fails to link leaves its draws out; the frame still completes.
#[rstest]
#[case::ambient("ambient", 3)]
#[case::directional("directional", 2)]
#[case::point("point", 2)]
#[case::spot("spot", 2)]
#[case::tonemap("tonemap", 3)]
fn test_unlinked_program_skips_its_draws(#[case] program: &str, #[case] lights_drawn: u32) {
    let mut backend = RecordingBackend::new(160, 90);
    backend.fail_program(program);
    let mut scene = TestScene::with_backend(backend);
    scene.camera_at(Vec3::new(0.0, 2.0, 10.0));
    scene.opaque_at(Vec3::ZERO);
    scene.light(
        Transform::from_position(Vec3::new(0.0, 5.0, 0.0)).look_at(Vec3::ZERO, Vec3::Z),
        Light::spot(Vec3::ONE, 1.0, Attenuation::default(), 30.0),
    );
    scene.light(
        Transform::from_position(Vec3::new(3.0, 3.0, 0.0)),
        Light::point(Vec3::ONE, 1.0, Attenuation::default()),
    );
    scene.light(Transform::IDENTITY, Light::directional(Vec3::ONE, 1.0));

    let stats = scene.frame().stats.unwrap();
    assert_eq!(stats.lights_drawn, lights_drawn);
    assert!(scene.backend().draws().iter().all(|(label, _)| label != program));
    assert!(labels(&scene).contains(&"Tonemapping".to_string()));
    assert_eq!(scene.ended_frames(), 1);
}

#[test]
fn test_renderable_with_unknown_entity_is_rejected() {
    let mut scene = TestScene::new();
    scene.camera_at(Vec3::new(0.0, 0.0, 5.0));
    scene.engine.push_event(SceneEvent::RenderableAttached {
        entity: Entity::from_raw(999),
        renderable: Renderable::new(scene.cube, scene.plastic),
    });

    let report = scene.frame();
    assert_eq!(report.events_applied, 2);
    assert!(scene.engine.scene().queues().is_empty());
}

// ============================================================================
// Queue and Transform Tests
// ============================================================================

#[test]
fn test_alpha_drawn_far_to_near() {
    let mut scene = TestScene::new();
    scene.camera_at(Vec3::new(0.0, 0.0, 10.0));
    scene.glass_at(Vec3::new(0.0, 0.0, 5.0));
    scene.glass_at(Vec3::new(0.0, 0.0, -5.0));
    scene.glass_at(Vec3::ZERO);
    scene.frame();

    let depths: Vec<f32> = scene.model_positions("Alpha").iter().map(|p| p.z).collect();
    assert_eq!(depths, vec![-5.0, 0.0, 5.0]);
    assert!(scene.model_positions("Ambient").is_empty());
}

#[test]
fn test_hierarchy_reaches_draw_calls() {
    let mut scene = TestScene::new();
    scene.camera_at(Vec3::new(0.0, 0.0, 10.0));
    let root = scene.spawn(None, Transform::IDENTITY);
    let b = scene.spawn(Some(root), Transform::from_position(Vec3::new(2.0, 0.0, 0.0)));
    let c = scene.spawn(
        Some(b),
        Transform::from_position(Vec3::new(0.0, 1.0, 0.0)).with_uniform_scale(0.5),
    );
    scene.engine.push_event(SceneEvent::RenderableAttached {
        entity: c,
        renderable: Renderable::new(scene.cube, scene.plastic),
    });
    scene.frame();

    let positions = scene.model_positions("Ambient");
    assert_eq!(positions.len(), 1);
    assert!(positions[0].abs_diff_eq(Vec3::new(2.0, 0.5, 0.0), 1e-5));

    // Moving B carries C along on the next step
    scene
        .engine
        .scene_mut()
        .set_transform(b, Transform::from_position(Vec3::new(-1.0, 0.0, 0.0)))
        .unwrap();
    scene.clear();
    let report = scene.frame();
    assert_eq!(report.nodes_updated, 2);
    let positions = scene.model_positions("Ambient");
    assert!(positions[0].abs_diff_eq(Vec3::new(-1.0, 0.5, 0.0), 1e-5));
}

#[test]
fn test_parameter_lookups_are_cached_across_frames() {
    let mut scene = TestScene::lit();
    scene.glass_at(Vec3::new(0.0, 1.0, 2.0));
    scene.frame();
    let after_first = scene.backend().parameter_queries();
    assert!(after_first > 0);

    for _ in 0..3 {
        scene.frame();
    }
    assert_eq!(scene.backend().parameter_queries(), after_first);
}

#[test]
fn test_shadow_maps_follow_light_space() {
    let mut scene = TestScene::lit();
    scene.frame();

    let light_spaces: Vec<Mat4> = scene
        .backend()
        .commands()
        .iter()
        .filter_map(|c| match c {
            RecordedCommand::SetParameter {
                name,
                value: ParameterValue::Mat4(m),
                ..
            } if name == "g_light_space" => Some(*m),
            _ => None,
        })
        .collect();
    assert_eq!(light_spaces.len(), 3);
    // Point lights sample a cube by direction and carry no light-space matrix
    assert_eq!(light_spaces[1], Mat4::IDENTITY);
    assert_ne!(light_spaces[0], Mat4::IDENTITY);
    assert_ne!(light_spaces[2], Mat4::IDENTITY);
}

// ============================================================================
// Loop Tests
// ============================================================================

#[rstest]
#[case::one_step(1, 1)]
#[case::three_steps(3, 3)]
#[case::capped(40, 5)]
fn test_steps_per_frame(#[case] quanta: u32, #[case] expected: u32) {
    let mut scene = TestScene::new();
    let step = scene.engine.config().fixed_timestep;
    let report = scene
        .engine
        .frame(step * quanta + Duration::from_micros(10), || false, |_, _| {})
        .unwrap();
    assert_eq!(report.steps, expected);
    assert_eq!(report.dropped > Duration::ZERO, quanta > expected);
    assert_eq!(scene.ended_frames(), 1);
}

#[test]
fn test_close_requested_mid_catch_up() {
    let mut scene = TestScene::new();
    let step = scene.engine.config().fixed_timestep;
    let mut checks = 0;
    let report = scene
        .engine
        .frame(
            step * 4,
            || {
                checks += 1;
                checks > 2
            },
            |_, _| {},
        )
        .unwrap();
    assert_eq!(report.steps, 2);
    assert!(report.close_requested);
    assert!(report.stats.is_none());
    assert_eq!(scene.ended_frames(), 0);
}
