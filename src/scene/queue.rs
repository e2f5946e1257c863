//! Render queues
//!
//! Every renderable entity sits in exactly one queue, picked from its material
//! when the renderable is attached.

use bevy_ecs::prelude::*;
use glam::Vec3;

use super::graph::{NodeId, TransformGraph};
use crate::resources::{MaterialId, MeshId};

/// Meshes drawn for an entity, each with its own material
#[derive(Component, Debug, Clone, PartialEq, Default)]
pub struct Renderable {
    pub submeshes: Vec<(MeshId, MaterialId)>,
}

impl Renderable {
    pub fn new(mesh: MeshId, material: MaterialId) -> Self {
        Self {
            submeshes: vec![(mesh, material)],
        }
    }

    pub fn with_submesh(mut self, mesh: MeshId, material: MaterialId) -> Self {
        self.submeshes.push((mesh, material));
        self
    }

    /// The material that decides the queue
    pub fn primary_material(&self) -> Option<MaterialId> {
        self.submeshes.first().map(|(_, material)| *material)
    }
}

/// Queue a material is drawn in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueueKind {
    #[default]
    Opaque,
    Alpha,
    /// Static environment-mapped geometry; kept but not drawn by the forward passes
    Environment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderQueueEntry {
    pub entity: Entity,
    pub node: NodeId,
}

#[derive(Debug, Default)]
pub struct RenderQueueManager {
    opaque: Vec<RenderQueueEntry>,
    alpha: Vec<RenderQueueEntry>,
    environment: Vec<RenderQueueEntry>,
}

impl RenderQueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue_mut(&mut self, kind: QueueKind) -> &mut Vec<RenderQueueEntry> {
        match kind {
            QueueKind::Opaque => &mut self.opaque,
            QueueKind::Alpha => &mut self.alpha,
            QueueKind::Environment => &mut self.environment,
        }
    }

    pub fn queue(&self, kind: QueueKind) -> &[RenderQueueEntry] {
        match kind {
            QueueKind::Opaque => &self.opaque,
            QueueKind::Alpha => &self.alpha,
            QueueKind::Environment => &self.environment,
        }
    }

    /// Append to the queue of `kind`. An entity already queued is moved.
    pub fn on_renderable_attached(&mut self, entity: Entity, node: NodeId, kind: QueueKind) {
        if self.on_renderable_detached(entity) {
            log::debug!("Renderable of {:?} re-attached, previous entry replaced", entity);
        }
        self.queue_mut(kind).push(RenderQueueEntry { entity, node });
    }

    /// Erase the entity's entry. Returns `false` if it was not queued.
    pub fn on_renderable_detached(&mut self, entity: Entity) -> bool {
        let mut removed = false;
        for queue in [&mut self.opaque, &mut self.alpha, &mut self.environment] {
            if let Some(index) = queue.iter().position(|e| e.entity == entity) {
                queue.remove(index);
                removed = true;
            }
        }
        removed
    }

    /// Farthest first by squared distance from `camera_position`. Stable for ties.
    pub fn sort_alpha_queue(&mut self, camera_position: Vec3, graph: &TransformGraph) {
        let mut keyed: Vec<(f32, RenderQueueEntry)> = self
            .alpha
            .iter()
            .map(|entry| {
                let position = graph.world_position(entry.node).unwrap_or(camera_position);
                (position.distance_squared(camera_position), *entry)
            })
            .collect();
        keyed.sort_by(|a, b| b.0.total_cmp(&a.0));
        self.alpha = keyed.into_iter().map(|(_, entry)| entry).collect();
    }

    pub fn kind_of(&self, entity: Entity) -> Option<QueueKind> {
        [QueueKind::Opaque, QueueKind::Alpha, QueueKind::Environment]
            .into_iter()
            .find(|kind| self.queue(*kind).iter().any(|e| e.entity == entity))
    }

    pub fn len(&self) -> usize {
        self.opaque.len() + self.alpha.len() + self.environment.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Transform;

    fn entity(index: u32) -> Entity {
        Entity::from_raw(index)
    }

    #[test]
    fn test_attach_is_exclusive() {
        let mut graph = TransformGraph::new();
        let node = graph.create_node(Transform::IDENTITY);
        let mut queues = RenderQueueManager::new();

        queues.on_renderable_attached(entity(1), node, QueueKind::Opaque);
        queues.on_renderable_attached(entity(1), node, QueueKind::Alpha);
        assert_eq!(queues.len(), 1);
        assert_eq!(queues.kind_of(entity(1)), Some(QueueKind::Alpha));
        assert!(queues.queue(QueueKind::Opaque).is_empty());
    }

    #[test]
    fn test_detach_is_idempotent() {
        let mut graph = TransformGraph::new();
        let node = graph.create_node(Transform::IDENTITY);
        let mut queues = RenderQueueManager::new();
        queues.on_renderable_attached(entity(1), node, QueueKind::Environment);
        queues.on_renderable_attached(entity(2), node, QueueKind::Environment);

        assert!(queues.on_renderable_detached(entity(1)));
        assert!(!queues.on_renderable_detached(entity(1)));
        assert_eq!(queues.queue(QueueKind::Environment).len(), 1);
        assert_eq!(queues.kind_of(entity(1)), None);
    }

    #[test]
    fn test_alpha_sorted_far_to_near() {
        let mut graph = TransformGraph::new();
        let mut queues = RenderQueueManager::new();
        for (i, z) in [2.0, -8.0, 5.0, -1.0].into_iter().enumerate() {
            let node = graph.create_node(Transform::from_position(Vec3::new(0.0, 0.0, z)));
            queues.on_renderable_attached(entity(i as u32), node, QueueKind::Alpha);
        }
        graph.update();

        let camera = Vec3::new(0.0, 0.0, 3.0);
        queues.sort_alpha_queue(camera, &graph);
        let distances: Vec<f32> = queues
            .queue(QueueKind::Alpha)
            .iter()
            .map(|e| graph.world_position(e.node).unwrap().distance(camera))
            .collect();
        assert!(distances.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(queues.queue(QueueKind::Alpha)[0].entity, entity(1));
    }
}
