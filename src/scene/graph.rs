//! Transform hierarchy
//!
//! Nodes live in a generational arena. Edits only touch the edited node and
//! queue it; `update` walks the subtrees below the topmost queued nodes, so the
//! cost of a pass follows the number of nodes that actually moved.

use glam::{Mat3, Mat4, Quat, Vec3};
use slotmap::{new_key_type, SlotMap};

use super::error::{SceneError, SceneResult};
use super::transform::Transform;

new_key_type! {
    /// Generational handle to a node of a [`TransformGraph`]
    pub struct NodeId;
}

/// What happens to the children of a destroyed node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DestroyPolicy {
    /// Children become roots and keep their current world transform
    #[default]
    ReparentToRoot,
    /// The whole subtree is freed
    Recursive,
}

#[derive(Debug, Clone)]
struct TransformNode {
    local: Transform,
    local_matrix: Mat4,
    world: Mat4,
    normal: Mat3,
    dirty: bool,
    recomputed_pass: u64,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl TransformNode {
    fn new(local: Transform, parent: Option<NodeId>) -> Self {
        let local_matrix = local.matrix();
        Self {
            local,
            local_matrix,
            world: local_matrix,
            normal: normal_matrix(local_matrix),
            dirty: true,
            recomputed_pass: 0,
            parent,
            children: Vec::new(),
        }
    }
}

fn normal_matrix(world: Mat4) -> Mat3 {
    let linear = Mat3::from_mat4(world);
    let determinant = linear.determinant();
    // Only a singular basis has no normal matrix; tiny scales are still invertible
    if determinant == 0.0 || !determinant.is_finite() {
        Mat3::IDENTITY
    } else {
        linear.inverse().transpose()
    }
}

/// Arena of transform nodes with incremental world matrix updates
#[derive(Debug, Default)]
pub struct TransformGraph {
    nodes: SlotMap<NodeId, TransformNode>,
    roots: Vec<NodeId>,
    pending: Vec<NodeId>,
    pass: u64,
}

impl TransformGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(node)
    }

    /// Create a root node
    pub fn create_node(&mut self, local: Transform) -> NodeId {
        let id = self.nodes.insert(TransformNode::new(local, None));
        self.roots.push(id);
        self.pending.push(id);
        id
    }

    /// Create a node attached as the last child of `parent`
    pub fn create_child(&mut self, parent: NodeId, local: Transform) -> SceneResult<NodeId> {
        if !self.nodes.contains_key(parent) {
            return Err(SceneError::NodeNotFound(parent));
        }
        let id = self.nodes.insert(TransformNode::new(local, Some(parent)));
        self.nodes[parent].children.push(id);
        self.pending.push(id);
        Ok(id)
    }

    /// Overwrite the requested local components and mark the node dirty
    pub fn set_local_transform(
        &mut self,
        node: NodeId,
        position: Option<Vec3>,
        rotation: Option<Quat>,
        scale: Option<Vec3>,
    ) -> SceneResult<()> {
        let entry = self.nodes.get_mut(node).ok_or(SceneError::NodeNotFound(node))?;
        if let Some(position) = position {
            entry.local.position = position;
        }
        if let Some(rotation) = rotation {
            entry.local.rotation = rotation.normalize();
        }
        if let Some(scale) = scale {
            entry.local.scale = scale;
        }
        entry.local_matrix = entry.local.matrix();
        self.mark_dirty(node);
        Ok(())
    }

    /// Replace the whole local transform
    pub fn set_local(&mut self, node: NodeId, local: Transform) -> SceneResult<()> {
        self.set_local_transform(node, Some(local.position), Some(local.rotation), Some(local.scale))
    }

    fn mark_dirty(&mut self, node: NodeId) {
        if let Some(entry) = self.nodes.get_mut(node) {
            if !entry.dirty {
                entry.dirty = true;
                self.pending.push(node);
            }
        }
    }

    fn has_dirty_ancestor(&self, node: NodeId) -> bool {
        let mut current = self.nodes.get(node).and_then(|n| n.parent);
        while let Some(id) = current {
            let entry = &self.nodes[id];
            if entry.dirty {
                return true;
            }
            current = entry.parent;
        }
        false
    }

    /// Is `node` equal to `ancestor` or below it
    fn is_in_subtree(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes.get(id).and_then(|n| n.parent);
        }
        false
    }

    /// Recompute world and normal matrices of every dirty node and its descendants.
    /// Returns the number of nodes recomputed.
    pub fn update(&mut self) -> usize {
        self.pass += 1;
        let pass = self.pass;
        let pending = std::mem::take(&mut self.pending);

        let mut recomputed = 0;
        let mut stack = Vec::new();
        for start in pending {
            match self.nodes.get(start) {
                Some(node) if node.dirty => {}
                _ => continue,
            }
            // The walk from the dirty ancestor will reach this node
            if self.has_dirty_ancestor(start) {
                continue;
            }

            stack.push(start);
            while let Some(id) = stack.pop() {
                let parent_world = self.nodes[id]
                    .parent
                    .map(|p| self.nodes[p].world)
                    .unwrap_or(Mat4::IDENTITY);
                let node = &mut self.nodes[id];
                node.world = parent_world * node.local_matrix;
                node.normal = normal_matrix(node.world);
                node.dirty = false;
                node.recomputed_pass = pass;
                recomputed += 1;
                stack.extend(node.children.iter().rev().copied());
            }
        }

        if recomputed > 0 {
            log::trace!("Transform pass {} recomputed {} nodes", pass, recomputed);
        }
        recomputed
    }

    /// Move `node` under `new_parent`, or to the root list when `None`.
    /// The local transform is kept, so the world transform follows the new parent.
    pub fn reparent(&mut self, node: NodeId, new_parent: Option<NodeId>) -> SceneResult<()> {
        if !self.nodes.contains_key(node) {
            return Err(SceneError::NodeNotFound(node));
        }
        if let Some(parent) = new_parent {
            if !self.nodes.contains_key(parent) {
                return Err(SceneError::NodeNotFound(parent));
            }
            if self.is_in_subtree(parent, node) {
                return Err(SceneError::InvalidHierarchy(node, parent));
            }
        }

        self.detach(node);
        match new_parent {
            Some(parent) => self.nodes[parent].children.push(node),
            None => self.roots.push(node),
        }
        self.nodes[node].parent = new_parent;
        self.mark_dirty(node);
        Ok(())
    }

    fn detach(&mut self, node: NodeId) {
        let siblings = match self.nodes[node].parent {
            Some(parent) => &mut self.nodes[parent].children,
            None => &mut self.roots,
        };
        if let Some(index) = siblings.iter().position(|&id| id == node) {
            siblings.remove(index);
        }
    }

    /// Destroy a node. Handles to destroyed nodes are rejected afterwards.
    pub fn destroy(&mut self, node: NodeId, policy: DestroyPolicy) -> SceneResult<()> {
        if !self.nodes.contains_key(node) {
            return Err(SceneError::NodeNotFound(node));
        }
        // Cached worlds may be stale until the next update
        let removed_world = self.fresh_world(node);
        self.detach(node);

        match policy {
            DestroyPolicy::ReparentToRoot => {
                let Some(removed) = self.nodes.remove(node) else {
                    return Err(SceneError::NodeNotFound(node));
                };
                for child in removed.children {
                    let world = removed_world * self.nodes[child].local_matrix;
                    let entry = &mut self.nodes[child];
                    entry.parent = None;
                    entry.local = Transform::from_matrix(world);
                    entry.local_matrix = entry.local.matrix();
                    self.roots.push(child);
                    self.mark_dirty(child);
                }
            }
            DestroyPolicy::Recursive => {
                let mut stack = vec![node];
                while let Some(id) = stack.pop() {
                    if let Some(removed) = self.nodes.remove(id) {
                        stack.extend(removed.children);
                    }
                }
            }
        }
        Ok(())
    }

    /// World matrix composed from local matrices up the ancestor chain
    fn fresh_world(&self, node: NodeId) -> Mat4 {
        let mut world = Mat4::IDENTITY;
        let mut current = Some(node);
        while let Some(id) = current {
            let Some(entry) = self.nodes.get(id) else {
                break;
            };
            world = entry.local_matrix * world;
            current = entry.parent;
        }
        world
    }

    fn node(&self, node: NodeId) -> SceneResult<&TransformNode> {
        self.nodes.get(node).ok_or(SceneError::NodeNotFound(node))
    }

    pub fn world_matrix(&self, node: NodeId) -> SceneResult<Mat4> {
        Ok(self.node(node)?.world)
    }

    /// Inverse-transpose of the upper 3x3 of the world matrix
    pub fn normal_matrix(&self, node: NodeId) -> SceneResult<Mat3> {
        Ok(self.node(node)?.normal)
    }

    pub fn local(&self, node: NodeId) -> SceneResult<Transform> {
        Ok(self.node(node)?.local)
    }

    pub fn parent(&self, node: NodeId) -> SceneResult<Option<NodeId>> {
        Ok(self.node(node)?.parent)
    }

    pub fn children(&self, node: NodeId) -> SceneResult<&[NodeId]> {
        Ok(&self.node(node)?.children)
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn world_position(&self, node: NodeId) -> SceneResult<Vec3> {
        Ok(self.node(node)?.world.w_axis.truncate())
    }

    /// World direction of local -Z
    pub fn world_forward(&self, node: NodeId) -> SceneResult<Vec3> {
        Ok(self
            .node(node)?
            .world
            .transform_vector3(-Vec3::Z)
            .normalize_or_zero())
    }

    pub fn is_dirty(&self, node: NodeId) -> SceneResult<bool> {
        Ok(self.node(node)?.dirty)
    }

    /// Pass counter value of the last `update` that recomputed this node
    pub fn last_recomputed_pass(&self, node: NodeId) -> SceneResult<u64> {
        Ok(self.node(node)?.recomputed_pass)
    }

    /// Number of `update` passes run so far
    pub fn update_pass(&self) -> u64 {
        self.pass
    }
}
