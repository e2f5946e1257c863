//! Scene events
//!
//! Component add/remove notifications from the entity layer, applied in order
//! by [`Scene::dispatch`](super::Scene::dispatch).

use bevy_ecs::entity::Entity;

use super::camera::Camera;
use super::graph::DestroyPolicy;
use super::light::Light;
use super::queue::Renderable;
use super::transform::Transform;

#[derive(Debug, Clone)]
pub enum SceneEvent {
    /// Every entity owns one transform node, created here
    EntitySpawned {
        entity: Entity,
        parent: Option<Entity>,
        transform: Transform,
    },
    EntityDespawned {
        entity: Entity,
        policy: DestroyPolicy,
    },
    CameraAttached {
        entity: Entity,
        camera: Camera,
        /// Make this the current camera even if one is already set
        primary: bool,
    },
    CameraDetached {
        entity: Entity,
    },
    RenderableAttached {
        entity: Entity,
        renderable: Renderable,
    },
    RenderableDetached {
        entity: Entity,
    },
    LightAttached {
        entity: Entity,
        light: Light,
    },
    LightDetached {
        entity: Entity,
    },
}

impl SceneEvent {
    pub fn entity(&self) -> Entity {
        match self {
            SceneEvent::EntitySpawned { entity, .. }
            | SceneEvent::EntityDespawned { entity, .. }
            | SceneEvent::CameraAttached { entity, .. }
            | SceneEvent::CameraDetached { entity }
            | SceneEvent::RenderableAttached { entity, .. }
            | SceneEvent::RenderableDetached { entity }
            | SceneEvent::LightAttached { entity, .. }
            | SceneEvent::LightDetached { entity } => *entity,
        }
    }
}
