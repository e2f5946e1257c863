//! Scene error types

use bevy_ecs::entity::Entity;
use thiserror::Error;

use super::graph::NodeId;
use crate::resources::MaterialId;

/// Errors raised by scene bookkeeping
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SceneError {
    #[error("Invalid hierarchy: {0:?} cannot become a child of {1:?}")]
    InvalidHierarchy(NodeId, NodeId),

    #[error("Transform node not found: {0:?}")]
    NodeNotFound(NodeId),

    #[error("Unknown entity: {0:?}")]
    UnknownEntity(Entity),

    #[error("Unknown material: {0:?}")]
    UnknownMaterial(MaterialId),

    #[error("Renderable of {0:?} has no sub-meshes")]
    EmptyRenderable(Entity),
}

pub type SceneResult<T> = Result<T, SceneError>;
