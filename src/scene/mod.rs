//! Scene management
//!
//! [`Scene`] owns the transform graph, the render queues and the camera and
//! light registries. Entities come from an external entity store; the scene
//! only learns about them through [`SceneEvent`]s.

mod camera;
mod error;
mod events;
mod graph;
mod light;
mod queue;
mod transform;

pub use camera::*;
pub use error::*;
pub use events::*;
pub use graph::*;
pub use light::*;
pub use queue::*;
pub use transform::*;

use bevy_ecs::entity::Entity;
use glam::Vec3;
use slotmap::SecondaryMap;
use std::collections::{HashMap, VecDeque};

use crate::resources::Assets;

/// Gradient sky drawn behind the opaque geometry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Skybox {
    pub zenith: Vec3,
    pub horizon: Vec3,
    pub ground: Vec3,
}

impl Default for Skybox {
    fn default() -> Self {
        Self {
            zenith: Vec3::new(0.12, 0.25, 0.6),
            horizon: Vec3::new(0.7, 0.75, 0.8),
            ground: Vec3::new(0.18, 0.16, 0.14),
        }
    }
}

/// The scene containing all renderable content
#[derive(Default)]
pub struct Scene {
    graph: TransformGraph,
    queues: RenderQueueManager,
    nodes: HashMap<Entity, NodeId>,
    node_entities: SecondaryMap<NodeId, Entity>,
    lights: Vec<(Entity, Light)>,
    cameras: Vec<(Entity, Camera)>,
    main_camera: Option<Entity>,
    renderables: HashMap<Entity, Renderable>,
    pending: VecDeque<SceneEvent>,
    pub skybox: Option<Skybox>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event for the next [`Scene::dispatch_pending`]
    pub fn push_event(&mut self, event: SceneEvent) {
        self.pending.push_back(event);
    }

    pub fn pending_events(&self) -> usize {
        self.pending.len()
    }

    /// Apply queued events in order. Rejected events are logged and dropped.
    pub fn dispatch_pending(&mut self, assets: &Assets) -> usize {
        let mut applied = 0;
        while let Some(event) = self.pending.pop_front() {
            let entity = event.entity();
            match self.dispatch(event, assets) {
                Ok(()) => applied += 1,
                Err(err) => log::warn!("Scene event for {:?} rejected: {}", entity, err),
            }
        }
        applied
    }

    /// Apply one event
    pub fn dispatch(&mut self, event: SceneEvent, assets: &Assets) -> SceneResult<()> {
        match event {
            SceneEvent::EntitySpawned {
                entity,
                parent,
                transform,
            } => self.spawn(entity, parent, transform),
            SceneEvent::EntityDespawned { entity, policy } => self.despawn(entity, policy),
            SceneEvent::CameraAttached {
                entity,
                camera,
                primary,
            } => {
                self.node_of(entity)?;
                match self.cameras.iter_mut().find(|(e, _)| *e == entity) {
                    Some((_, existing)) => *existing = camera,
                    None => self.cameras.push((entity, camera)),
                }
                if primary || self.main_camera.is_none() {
                    log::debug!("Camera {:?} is now current", entity);
                    self.main_camera = Some(entity);
                }
                Ok(())
            }
            SceneEvent::CameraDetached { entity } => {
                self.remove_camera(entity);
                Ok(())
            }
            SceneEvent::RenderableAttached { entity, renderable } => {
                let node = self.node_of(entity)?;
                let material = renderable
                    .primary_material()
                    .ok_or(SceneError::EmptyRenderable(entity))?;
                let kind = assets
                    .material(material)
                    .ok_or(SceneError::UnknownMaterial(material))?
                    .queue;
                self.queues.on_renderable_attached(entity, node, kind);
                self.renderables.insert(entity, renderable);
                Ok(())
            }
            SceneEvent::RenderableDetached { entity } => {
                self.queues.on_renderable_detached(entity);
                self.renderables.remove(&entity);
                Ok(())
            }
            SceneEvent::LightAttached { entity, light } => {
                self.node_of(entity)?;
                match self.lights.iter_mut().find(|(e, _)| *e == entity) {
                    Some((_, existing)) => *existing = light,
                    None => self.lights.push((entity, light)),
                }
                Ok(())
            }
            SceneEvent::LightDetached { entity } => {
                self.lights.retain(|(e, _)| *e != entity);
                Ok(())
            }
        }
    }

    fn spawn(&mut self, entity: Entity, parent: Option<Entity>, transform: Transform) -> SceneResult<()> {
        let parent_node = parent.map(|p| self.node_of(p)).transpose()?;

        if let Some(&node) = self.nodes.get(&entity) {
            log::debug!("{:?} spawned twice, updating its transform", entity);
            self.graph.reparent(node, parent_node)?;
            return self.graph.set_local(node, transform);
        }

        let node = match parent_node {
            Some(parent) => self.graph.create_child(parent, transform)?,
            None => self.graph.create_node(transform),
        };
        self.nodes.insert(entity, node);
        self.node_entities.insert(node, entity);
        Ok(())
    }

    fn despawn(&mut self, entity: Entity, policy: DestroyPolicy) -> SceneResult<()> {
        let node = self.node_of(entity)?;

        let mut removed = vec![entity];
        if policy == DestroyPolicy::Recursive {
            let mut stack = self.graph.children(node)?.to_vec();
            while let Some(child) = stack.pop() {
                stack.extend_from_slice(self.graph.children(child)?);
                if let Some(&child_entity) = self.node_entities.get(child) {
                    removed.push(child_entity);
                }
            }
        }

        self.graph.destroy(node, policy)?;
        for entity in removed {
            if let Some(node) = self.nodes.remove(&entity) {
                self.node_entities.remove(node);
            }
            self.remove_camera(entity);
            self.lights.retain(|(e, _)| *e != entity);
            self.queues.on_renderable_detached(entity);
            self.renderables.remove(&entity);
        }
        Ok(())
    }

    fn remove_camera(&mut self, entity: Entity) {
        self.cameras.retain(|(e, _)| *e != entity);
        if self.main_camera == Some(entity) {
            self.main_camera = self.cameras.first().map(|(e, _)| *e);
            match self.main_camera {
                Some(next) => log::debug!("Camera {:?} detached, {:?} promoted", entity, next),
                None => log::debug!("Camera {:?} detached, no camera left", entity),
            }
        }
    }

    /// Recompute world matrices. Returns the number of nodes recomputed.
    pub fn update(&mut self) -> usize {
        self.graph.update()
    }

    pub fn node_of(&self, entity: Entity) -> SceneResult<NodeId> {
        self.nodes
            .get(&entity)
            .copied()
            .ok_or(SceneError::UnknownEntity(entity))
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.nodes.contains_key(&entity)
    }

    /// Overwrite an entity's local transform
    pub fn set_transform(&mut self, entity: Entity, transform: Transform) -> SceneResult<()> {
        let node = self.node_of(entity)?;
        self.graph.set_local(node, transform)
    }

    pub fn graph(&self) -> &TransformGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut TransformGraph {
        &mut self.graph
    }

    pub fn queues(&self) -> &RenderQueueManager {
        &self.queues
    }

    /// Sort the alpha queue far to near from `camera_position`
    pub fn sort_alpha_queue(&mut self, camera_position: Vec3) {
        self.queues.sort_alpha_queue(camera_position, &self.graph);
    }

    pub fn renderable(&self, entity: Entity) -> Option<&Renderable> {
        self.renderables.get(&entity)
    }

    pub fn main_camera(&self) -> Option<(Entity, &Camera)> {
        let entity = self.main_camera?;
        self.cameras
            .iter()
            .find(|(e, _)| *e == entity)
            .map(|(e, camera)| (*e, camera))
    }

    pub fn camera_mut(&mut self, entity: Entity) -> Option<&mut Camera> {
        self.cameras
            .iter_mut()
            .find(|(e, _)| *e == entity)
            .map(|(_, camera)| camera)
    }

    /// Matrices of the current camera for a target of the given aspect ratio
    pub fn camera_view(&self, aspect: f32) -> Option<CameraView> {
        let (entity, camera) = self.main_camera()?;
        let world = self.graph.world_matrix(self.node_of(entity).ok()?).ok()?;
        let mut projection = camera.projection;
        projection.set_aspect(aspect);
        Some(CameraView::from_world(world, projection.matrix()))
    }

    /// Lights in attachment order
    pub fn lights(&self) -> &[(Entity, Light)] {
        &self.lights
    }

    pub fn light_mut(&mut self, entity: Entity) -> Option<&mut Light> {
        self.lights
            .iter_mut()
            .find(|(e, _)| *e == entity)
            .map(|(_, light)| light)
    }

    /// Directional lights first, then point, then spot; attachment order within a type
    pub fn lights_in_pass_order(&self) -> Vec<(Entity, &Light)> {
        let mut ordered: Vec<(Entity, &Light)> = self.lights.iter().map(|(e, l)| (*e, l)).collect();
        ordered.sort_by_key(|(_, light)| light.light_type());
        ordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{Material, Mesh};

    fn entity(index: u32) -> Entity {
        Entity::from_raw(index)
    }

    fn spawn(scene: &mut Scene, assets: &Assets, index: u32, parent: Option<u32>, position: Vec3) {
        scene
            .dispatch(
                SceneEvent::EntitySpawned {
                    entity: entity(index),
                    parent: parent.map(entity),
                    transform: Transform::from_position(position),
                },
                assets,
            )
            .unwrap();
    }

    #[test]
    fn test_camera_promotion() {
        let assets = Assets::new();
        let mut scene = Scene::new();
        for i in 0..3 {
            spawn(&mut scene, &assets, i, None, Vec3::ZERO);
        }
        let attach = |scene: &mut Scene, i: u32, primary: bool| {
            scene
                .dispatch(
                    SceneEvent::CameraAttached {
                        entity: entity(i),
                        camera: Camera::default(),
                        primary,
                    },
                    &assets,
                )
                .unwrap();
        };

        attach(&mut scene, 0, false);
        assert_eq!(scene.main_camera().map(|(e, _)| e), Some(entity(0)));
        attach(&mut scene, 1, false);
        assert_eq!(scene.main_camera().map(|(e, _)| e), Some(entity(0)));
        attach(&mut scene, 2, true);
        assert_eq!(scene.main_camera().map(|(e, _)| e), Some(entity(2)));

        scene
            .dispatch(SceneEvent::CameraDetached { entity: entity(2) }, &assets)
            .unwrap();
        assert_eq!(scene.main_camera().map(|(e, _)| e), Some(entity(0)));

        scene
            .dispatch(
                SceneEvent::EntityDespawned {
                    entity: entity(0),
                    policy: DestroyPolicy::ReparentToRoot,
                },
                &assets,
            )
            .unwrap();
        assert_eq!(scene.main_camera().map(|(e, _)| e), Some(entity(1)));
    }

    #[test]
    fn test_renderable_queue_from_first_material() {
        let mut assets = Assets::new();
        let mesh = assets.add_mesh(Mesh::cube());
        let glass = assets.add_material(Material::glass(Vec3::ONE, 0.5));
        let plastic = assets.add_material(Material::plastic(Vec3::ONE));
        let mut scene = Scene::new();
        spawn(&mut scene, &assets, 1, None, Vec3::ZERO);

        scene.push_event(SceneEvent::RenderableAttached {
            entity: entity(1),
            renderable: Renderable::new(mesh, glass).with_submesh(mesh, plastic),
        });
        scene.push_event(SceneEvent::RenderableAttached {
            entity: entity(9),
            renderable: Renderable::new(mesh, plastic),
        });
        scene.push_event(SceneEvent::RenderableAttached {
            entity: entity(1),
            renderable: Renderable::default(),
        });
        assert_eq!(scene.dispatch_pending(&assets), 1);
        assert_eq!(scene.queues().kind_of(entity(1)), Some(QueueKind::Alpha));
        assert_eq!(scene.queues().len(), 1);
    }

    #[test]
    fn test_unknown_entities_rejected() {
        let assets = Assets::new();
        let mut scene = Scene::new();
        let err = scene.dispatch(
            SceneEvent::LightAttached {
                entity: entity(4),
                light: Light::directional(Vec3::ONE, 1.0),
            },
            &assets,
        );
        assert_eq!(err, Err(SceneError::UnknownEntity(entity(4))));

        let err = scene.dispatch(
            SceneEvent::EntitySpawned {
                entity: entity(5),
                parent: Some(entity(4)),
                transform: Transform::IDENTITY,
            },
            &assets,
        );
        assert_eq!(err, Err(SceneError::UnknownEntity(entity(4))));
    }

    #[test]
    fn test_recursive_despawn_forgets_descendants() {
        let mut assets = Assets::new();
        let mesh = assets.add_mesh(Mesh::cube());
        let material = assets.add_material(Material::default());
        let mut scene = Scene::new();
        spawn(&mut scene, &assets, 1, None, Vec3::ZERO);
        spawn(&mut scene, &assets, 2, Some(1), Vec3::X);
        spawn(&mut scene, &assets, 3, Some(2), Vec3::X);
        scene
            .dispatch(
                SceneEvent::RenderableAttached {
                    entity: entity(3),
                    renderable: Renderable::new(mesh, material),
                },
                &assets,
            )
            .unwrap();

        scene
            .dispatch(
                SceneEvent::EntityDespawned {
                    entity: entity(1),
                    policy: DestroyPolicy::Recursive,
                },
                &assets,
            )
            .unwrap();
        assert!(!scene.contains(entity(2)));
        assert!(!scene.contains(entity(3)));
        assert!(scene.queues().is_empty());
        assert!(scene.graph().is_empty());
    }

    #[test]
    fn test_lights_in_pass_order() {
        let assets = Assets::new();
        let mut scene = Scene::new();
        let lights = [
            Light::spot(Vec3::ONE, 1.0, Attenuation::default(), 30.0),
            Light::point(Vec3::ONE, 1.0, Attenuation::default()),
            Light::directional(Vec3::ONE, 1.0),
            Light::point(Vec3::ONE, 2.0, Attenuation::default()),
        ];
        for (i, light) in lights.into_iter().enumerate() {
            spawn(&mut scene, &assets, i as u32, None, Vec3::ZERO);
            scene
                .dispatch(SceneEvent::LightAttached { entity: entity(i as u32), light }, &assets)
                .unwrap();
        }
        let order: Vec<Entity> = scene.lights_in_pass_order().iter().map(|(e, _)| *e).collect();
        assert_eq!(order, vec![entity(2), entity(1), entity(3), entity(0)]);
    }

    #[test]
    fn test_camera_view_follows_node() {
        let assets = Assets::new();
        let mut scene = Scene::new();
        spawn(&mut scene, &assets, 1, None, Vec3::new(0.0, 2.0, 8.0));
        scene
            .dispatch(
                SceneEvent::CameraAttached {
                    entity: entity(1),
                    camera: Camera::default(),
                    primary: true,
                },
                &assets,
            )
            .unwrap();
        scene.update();
        let view = scene.camera_view(1.0).unwrap();
        assert!(view.position.abs_diff_eq(Vec3::new(0.0, 2.0, 8.0), 1e-6));
    }
}
