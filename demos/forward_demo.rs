//! Forward lighting demo
//!
//! Run with:
//!   cargo run --example forward_demo
//!   cargo run --example forward_demo -- --tonemap reinhard --split
//!
//! Controls:
//!   N       - Toggle normals view
//!   T       - Toggle tone mapping split view
//!   Space   - Pause the orbit
//!   Escape  - Exit

use std::path::PathBuf;
use std::time::Duration;

use bevy_ecs::prelude::*;
use clap::{Parser, ValueEnum};
use forward_engine::{
    init_logging,
    pipeline::{TonemapOperator, TonemapSettings},
    resources::{Material, Mesh, TextureData},
    scene::{Attenuation, Camera, Light, Renderable, SceneEvent, Skybox, Transform},
    Engine, EngineConfig, RendererConfig, Window,
};
use glam::{Quat, Vec3, Vec4};
use winit::{
    event::{ElementState, Event, KeyEvent, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Operator {
    Reinhard,
    Aces,
    Uncharted2,
    None,
}

impl From<Operator> for TonemapOperator {
    fn from(operator: Operator) -> Self {
        match operator {
            Operator::Reinhard => TonemapOperator::Reinhard,
            Operator::Aces => TonemapOperator::Aces,
            Operator::Uncharted2 => TonemapOperator::Uncharted2,
            Operator::None => TonemapOperator::None,
        }
    }
}

#[derive(Debug, Parser)]
#[command(about = "Shadowed forward lighting over a small transform hierarchy")]
struct Args {
    #[arg(long, default_value_t = 1280)]
    width: u32,
    #[arg(long, default_value_t = 720)]
    height: u32,
    #[arg(long)]
    no_vsync: bool,
    #[arg(long, value_enum, default_value_t = Operator::Aces)]
    tonemap: Operator,
    #[arg(long, default_value_t = 1.0)]
    exposure: f32,
    /// Left half tone mapped, right half raw
    #[arg(long)]
    split: bool,
    /// Show surface normals instead of lighting
    #[arg(long)]
    normals: bool,
    /// Also fill the experimental G-Buffer
    #[arg(long)]
    gbuffer: bool,
    #[arg(long, default_value_t = 2048)]
    shadow_map_size: u32,
    /// Diffuse texture for the ground plane
    #[arg(long)]
    texture: Option<PathBuf>,
}

/// Marks the entity the demo spins every step
#[derive(Component)]
struct Spinner {
    speed: f32,
    angle: f32,
}

/// Turn every component of the world into the scene events the engine consumes
fn spawn_events(world: &mut World) -> Vec<SceneEvent> {
    let mut events = Vec::new();
    // Parents are spawned before their children
    let mut query = world.query::<(Entity, &Transform, Option<&AttachedTo>)>();
    let mut ordered: Vec<(Entity, Transform, Option<Entity>)> = query
        .iter(world)
        .map(|(entity, transform, parent)| (entity, *transform, parent.map(|p| p.0)))
        .collect();
    ordered.sort_by_key(|(_, _, parent)| parent.is_some());
    for (entity, transform, parent) in ordered {
        events.push(SceneEvent::EntitySpawned {
            entity,
            parent,
            transform,
        });
    }

    for (entity, camera) in world.query::<(Entity, &Camera)>().iter(world) {
        events.push(SceneEvent::CameraAttached {
            entity,
            camera: camera.clone(),
            primary: true,
        });
    }
    for (entity, renderable) in world.query::<(Entity, &Renderable)>().iter(world) {
        events.push(SceneEvent::RenderableAttached {
            entity,
            renderable: renderable.clone(),
        });
    }
    for (entity, light) in world.query::<(Entity, &Light)>().iter(world) {
        events.push(SceneEvent::LightAttached {
            entity,
            light: light.clone(),
        });
    }
    events
}

/// Parent in the transform hierarchy
#[derive(Component, Clone, Copy)]
struct AttachedTo(Entity);

fn build_world(engine: &mut Engine<forward_engine::WgpuBackend>, args: &Args) -> World {
    let assets = engine.assets_mut();
    let cube = assets.add_mesh(Mesh::cube());
    let sphere = assets.add_mesh(Mesh::sphere(32, 16));
    let plane = assets.add_mesh(Mesh::plane(30.0, 30.0));

    let ground_texture = match &args.texture {
        Some(path) => match TextureData::from_file(path) {
            Ok(texture) => texture,
            Err(err) => {
                log::warn!("{}, using a checkerboard", err);
                TextureData::checkerboard(256, [200, 200, 200, 255], [90, 90, 90, 255])
            }
        },
        None => TextureData::checkerboard(256, [200, 200, 200, 255], [90, 90, 90, 255]),
    };
    let ground_texture = assets.add_texture(ground_texture);
    let ground = assets.add_material(Material::new("ground").with_diffuse(ground_texture));
    let red = assets.add_material(Material::plastic(Vec3::new(0.8, 0.15, 0.1)));
    let rubber = assets.add_material(Material::rubber(Vec3::new(0.1, 0.3, 0.8)));
    let glass = assets.add_material(Material::glass(Vec3::new(0.6, 0.9, 0.7), 0.35));
    let white = assets.add_material(Material::new("white").with_color(Vec4::ONE));

    let mut world = World::new();
    world.spawn((
        Transform::from_position(Vec3::new(0.0, 6.0, 14.0)).look_at(Vec3::new(0.0, 1.0, 0.0), Vec3::Y),
        Camera::perspective(60.0, 0.1, 200.0),
    ));
    world.spawn((Transform::IDENTITY, Renderable::new(plane, ground)));

    let hub = world
        .spawn((
            Transform::from_position(Vec3::new(0.0, 1.0, 0.0)),
            Renderable::new(cube, red),
            Spinner { speed: 0.6, angle: 0.0 },
        ))
        .id();
    world.spawn((
        Transform::from_position(Vec3::new(3.0, 0.0, 0.0)).with_uniform_scale(0.6),
        Renderable::new(sphere, rubber),
        AttachedTo(hub),
    ));
    world.spawn((
        Transform::from_position(Vec3::new(-3.0, 0.5, 0.0)),
        Renderable::new(sphere, glass),
        AttachedTo(hub),
    ));
    world.spawn((
        Transform::from_position(Vec3::new(0.0, 0.5, 4.0)).with_uniform_scale(0.5),
        Renderable::new(cube, white),
    ));

    world.spawn((
        Transform::from_position_rotation(Vec3::ZERO, Quat::from_rotation_x(-0.9) * Quat::from_rotation_y(0.4)),
        Light::directional(Vec3::new(1.0, 0.95, 0.85), 0.8).with_shadows(true),
    ));
    world.spawn((
        Transform::from_position(Vec3::new(-4.0, 3.0, 2.0)),
        Light::point(Vec3::new(1.0, 0.5, 0.2), 1.5, Attenuation::default()).with_shadows(true),
    ));
    world.spawn((
        Transform::from_position(Vec3::new(5.0, 6.0, 3.0)).look_at(Vec3::ZERO, Vec3::Y),
        Light::spot(Vec3::new(0.3, 0.6, 1.0), 2.0, Attenuation::new(1.0, 0.045, 0.0075), 25.0).with_shadows(true),
    ));
    world
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let args = Args::parse();

    let mut renderer = RendererConfig {
        shadow_map_size: args.shadow_map_size,
        tonemap: TonemapSettings {
            operator: args.tonemap.into(),
            exposure: args.exposure,
            ..Default::default()
        },
        debug_split: args.split,
        debug_normals: args.normals,
        experimental_gbuffer: args.gbuffer,
        ..Default::default()
    };
    renderer.scene_ambient = Vec3::splat(0.08);

    let config = EngineConfig {
        title: "Forward Engine Demo".to_string(),
        width: args.width,
        height: args.height,
        vsync: !args.no_vsync,
        renderer,
        ..Default::default()
    };

    let event_loop = EventLoop::new()?;
    let mut window = Window::new(&event_loop, &config.title, config.width, config.height)?;
    let mut engine = Engine::with_window(window.window_arc(), config)?;

    let mut world = build_world(&mut engine, &args);
    for event in spawn_events(&mut world) {
        engine.push_event(event);
    }
    engine.scene_mut().skybox = Some(Skybox::default());

    let mut paused = false;
    let mut last_report = std::time::Instant::now();

    event_loop.run(move |event, elwt| {
        elwt.set_control_flow(ControlFlow::Poll);
        match event {
            Event::WindowEvent { event, .. } => {
                window.handle_event(&event);
                if let WindowEvent::KeyboardInput {
                    event:
                        KeyEvent {
                            physical_key: PhysicalKey::Code(key),
                            state: ElementState::Pressed,
                            repeat: false,
                            ..
                        },
                    ..
                } = event
                {
                    let mut config = engine.renderer().config().clone();
                    match key {
                        KeyCode::Escape => engine.request_close(),
                        KeyCode::Space => paused = !paused,
                        KeyCode::KeyN => {
                            config.debug_normals = !config.debug_normals;
                            println!("Normals view: {}", config.debug_normals);
                            if let Err(err) = engine.configure_renderer(config) {
                                log::error!("Renderer reconfiguration failed: {}", err);
                            }
                        }
                        KeyCode::KeyT => {
                            config.debug_split = !config.debug_split;
                            println!("Split view: {}", config.debug_split);
                            if let Err(err) = engine.configure_renderer(config) {
                                log::error!("Renderer reconfiguration failed: {}", err);
                            }
                        }
                        _ => {}
                    }
                }
            }
            Event::AboutToWait => {
                if window.take_resized() {
                    let (width, height) = window.dimensions();
                    if let Err(err) = engine.resize(width, height) {
                        log::error!("Resize failed: {}", err);
                        elwt.exit();
                        return;
                    }
                }

                let should_close = window.should_close();
                let spin_world = &mut world;
                let result = engine.tick(
                    || should_close,
                    |scene, dt| {
                        if paused {
                            return;
                        }
                        let mut spinners = spin_world.query::<(Entity, &mut Spinner, &Transform)>();
                        for (entity, mut spinner, transform) in spinners.iter_mut(spin_world) {
                            spinner.angle += spinner.speed * dt.as_secs_f32();
                            let rotated = transform.with_rotation(Quat::from_rotation_y(spinner.angle));
                            if let Err(err) = scene.set_transform(entity, rotated) {
                                log::warn!("Spinner {:?}: {}", entity, err);
                            }
                        }
                    },
                );

                match result {
                    Ok(report) if report.close_requested => elwt.exit(),
                    Ok(report) => {
                        if last_report.elapsed() > Duration::from_secs(2) {
                            last_report = std::time::Instant::now();
                            if let Some(stats) = report.stats {
                                log::info!(
                                    "{} draws, {} lights, {} shadow maps",
                                    stats.draw_calls,
                                    stats.lights_drawn,
                                    stats.shadow_maps_rendered
                                );
                            }
                        }
                    }
                    Err(err) => {
                        log::error!("Frame failed: {}", err);
                        elwt.exit();
                    }
                }
                window.request_redraw();
            }
            _ => {}
        }
    })?;
    Ok(())
}
