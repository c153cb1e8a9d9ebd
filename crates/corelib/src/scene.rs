//! Scene objects: shared, individually locked nodes plus the capability
//! traits draw-order sorters are written against.

use std::{cmp::Ordering, ops::Deref, sync::Arc};

use parking_lot::{RwLock, RwLockReadGuard};

use crate::transform::Transform;

/// Something that can be read-locked for a short snapshot.
pub trait Lockable {
    type Target: ?Sized;
    type Guard<'a>: Deref<Target = Self::Target>
    where
        Self: 'a;

    /// Acquire a shared lock. Keep the guard alive only as long as needed.
    fn read(&self) -> Self::Guard<'_>;

    /// `true` when both handles lock the same object.
    fn same_object(&self, other: &Self) -> bool;
}

impl<T: ?Sized> Lockable for RwLock<T> {
    type Target = T;
    type Guard<'a>
        = RwLockReadGuard<'a, T>
    where
        Self: 'a;

    #[inline]
    fn read(&self) -> Self::Guard<'_> {
        RwLock::read(self)
    }

    #[inline]
    fn same_object(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl<L: Lockable + ?Sized> Lockable for Arc<L> {
    type Target = L::Target;
    type Guard<'a>
        = L::Guard<'a>
    where
        Self: 'a;

    #[inline]
    fn read(&self) -> Self::Guard<'_> {
        (**self).read()
    }

    #[inline]
    fn same_object(&self, other: &Self) -> bool {
        (**self).same_object(&**other)
    }
}

/// Exposes a transform snapshot.
pub trait Spatial {
    fn transform(&self) -> Transform;
}

/// Exposes the object's own graphics-state ordering.
///
/// The relation should be a total order; sorters do not check it.
pub trait StateOrder {
    fn cmp_state(&self, other: &Self) -> Ordering;
}

/// Graphics pipeline bindings of a drawable, ordered from the most
/// expensive switch (shader) to the cheapest (material).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GraphicsState {
    pub shader: u32,
    pub texture: u32,
    pub material: u32,
}

impl GraphicsState {
    pub const fn new(shader: u32, texture: u32, material: u32) -> Self {
        Self {
            shader,
            texture,
            material,
        }
    }
}

/// Drawable scene node.
#[derive(Clone, Copy, Debug, Default)]
pub struct Node {
    pub transform: Transform,
    pub state: GraphicsState,
}

impl Node {
    pub fn new(transform: Transform, state: GraphicsState) -> Self {
        Self { transform, state }
    }
}

impl Spatial for Node {
    #[inline]
    fn transform(&self) -> Transform {
        self.transform
    }
}

impl StateOrder for Node {
    #[inline]
    fn cmp_state(&self, other: &Self) -> Ordering {
        self.state.cmp(&other.state)
    }
}

/// Node handle shared between the scene and draw lists.
pub type SharedNode = Arc<RwLock<Node>>;

/// Flat scene: owns every node, hands out shared handles.
#[derive(Default)]
pub struct Scene {
    nodes: Vec<SharedNode>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&mut self, transform: Transform, state: GraphicsState) -> SharedNode {
        let node = Arc::new(RwLock::new(Node::new(transform, state)));
        self.nodes.push(Arc::clone(&node));
        node
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[SharedNode] {
        &self.nodes
    }

    /// Fresh draw list in spawn order. Callers keep it across frames so
    /// that re-sorting starts from last frame's order.
    pub fn draw_list(&self) -> Vec<SharedNode> {
        self.nodes.clone()
    }

    /// Rotate every node by `speed_xyz * dt` (radians).
    pub fn system_rotate_all(&self, dt: f32, speed_xyz: [f32; 3]) {
        let [sx, sy, sz] = speed_xyz;
        for node in &self.nodes {
            let mut node = node.write();
            let r = &mut node.transform.rotation_euler;
            r.x += sx * dt;
            r.y += sy * dt;
            r.z += sz * dt;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vec3;

    #[test]
    fn spawn_shares_node_with_draw_list() {
        let mut scene = Scene::new();
        let node = scene.spawn(Transform::identity(), GraphicsState::new(1, 2, 3));
        assert_eq!(scene.len(), 1);

        node.write().transform.translation = vec3(4.0, 0.0, 0.0);
        let list = scene.draw_list();
        assert_eq!(list[0].read().transform.translation, vec3(4.0, 0.0, 0.0));
    }

    #[test]
    fn same_object_compares_lock_identity() {
        let a: SharedNode = Arc::new(RwLock::new(Node::default()));
        let b: SharedNode = Arc::new(RwLock::new(Node::default()));
        let a2 = Arc::clone(&a);
        assert!(a.same_object(&a2));
        assert!(!a.same_object(&b));
    }

    #[test]
    fn state_order_is_shader_then_texture_then_material() {
        let a = Node::new(Transform::identity(), GraphicsState::new(0, 9, 9));
        let b = Node::new(Transform::identity(), GraphicsState::new(1, 0, 0));
        let c = Node::new(Transform::identity(), GraphicsState::new(1, 0, 1));
        assert_eq!(a.cmp_state(&b), Ordering::Less);
        assert_eq!(c.cmp_state(&b), Ordering::Greater);
        assert_eq!(b.cmp_state(&b), Ordering::Equal);
    }

    #[test]
    fn rotate_all_updates_every_node() {
        let mut scene = Scene::new();
        scene.spawn(Transform::identity(), GraphicsState::default());
        scene.spawn(Transform::identity(), GraphicsState::default());
        scene.system_rotate_all(0.5, [0.0, 2.0, 0.0]);
        for node in scene.nodes() {
            assert!((node.read().transform.rotation_euler.y - 1.0).abs() < 1e-6);
        }
    }
}
