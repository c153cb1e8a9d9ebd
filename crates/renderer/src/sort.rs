//! Draw-order comparators.
//!
//! `ByDist` orders by squared distance to a target point (back-to-front
//! for blending, front-to-back for early depth rejection). `ByState`
//! orders by the objects' own graphics-state comparison to batch pipeline
//! switches. Both read each object under a shared lock per comparison;
//! a sort is not atomic over the list, so concurrent writers can leave a
//! stale (never invalid) order.

use std::cmp::Ordering;

use corelib::{
    Vec3,
    order::DepthOrder,
    scene::{Lockable, Spatial, StateOrder},
};

use crate::coherence::Sequence;

/// Squared world-space distance from `object` to `target`. The lock is
/// held only while the transform is copied.
fn distance_sq<L>(object: &L, target: Vec3) -> f32
where
    L: Lockable,
    L::Target: Spatial,
{
    let transform = object.read().transform();
    transform.world_position().distance_squared(target)
}

/// f32 with a total order, for cached sort keys.
#[derive(Clone, Copy, Debug, PartialEq)]
struct DepthKey(f32);

impl Eq for DepthKey {}

impl PartialOrd for DepthKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DepthKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Orders objects by distance to `target`.
pub struct ByDist<'a, L> {
    objects: &'a mut [L],
    target: Vec3,
    order: DepthOrder,
}

impl<'a, L> ByDist<'a, L>
where
    L: Lockable,
    L::Target: Spatial,
{
    /// Back-to-front ordering around `target` (usually the camera eye).
    pub fn new(objects: &'a mut [L], target: Vec3) -> Self {
        Self {
            objects,
            target,
            order: DepthOrder::BackToFront,
        }
    }

    pub fn front_to_back(objects: &'a mut [L], target: Vec3) -> Self {
        Self::new(objects, target).with_order(DepthOrder::FrontToBack)
    }

    pub fn with_order(mut self, order: DepthOrder) -> Self {
        self.order = order;
        self
    }

    /// Same objects and target, opposite direction.
    pub fn reversed(self) -> Self {
        let order = self.order.reversed();
        self.with_order(order)
    }

    pub fn target(&self) -> Vec3 {
        self.target
    }

    pub fn order(&self) -> DepthOrder {
        self.order
    }

    pub fn objects(&self) -> &[L] {
        &*self.objects
    }

    /// `Less` when `a` draws before `b`. Equal or NaN distances compare
    /// `Equal`; there is no tie-break.
    pub fn compare(&self, a: &L, b: &L) -> Ordering {
        let da = distance_sq(a, self.target);
        let db = distance_sq(b, self.target);
        let nearer_first = da.partial_cmp(&db).unwrap_or(Ordering::Equal);
        match self.order {
            DepthOrder::BackToFront => nearer_first.reverse(),
            DepthOrder::FrontToBack => nearer_first,
        }
    }

    /// Full sort from scratch. Each object is locked once to snapshot its
    /// distance, so concurrent writers cannot make the relation
    /// inconsistent mid-sort.
    pub fn sort(&mut self) {
        let target = self.target;
        let order = self.order;
        self.objects.sort_by_cached_key(|object| {
            let d = distance_sq(object, target);
            match order {
                DepthOrder::BackToFront => DepthKey(-d),
                DepthOrder::FrontToBack => DepthKey(d),
            }
        });
    }
}

impl<L> Sequence for ByDist<'_, L>
where
    L: Lockable,
    L::Target: Spatial,
{
    #[inline]
    fn len(&self) -> usize {
        self.objects.len()
    }

    fn less(&self, i: usize, j: usize) -> bool {
        self.compare(&self.objects[i], &self.objects[j]) == Ordering::Less
    }

    #[inline]
    fn swap(&mut self, i: usize, j: usize) {
        self.objects.swap(i, j);
    }
}

/// Orders objects by their own state comparison.
pub struct ByState<'a, L> {
    objects: &'a mut [L],
}

impl<'a, L> ByState<'a, L>
where
    L: Lockable,
    L::Target: StateOrder,
{
    pub fn new(objects: &'a mut [L]) -> Self {
        Self { objects }
    }

    pub fn objects(&self) -> &[L] {
        &*self.objects
    }

    /// Both objects stay read-locked for the duration of the comparison.
    /// A handle compared with itself is locked once and is `Equal`.
    pub fn compare(&self, a: &L, b: &L) -> Ordering {
        if a.same_object(b) {
            return Ordering::Equal;
        }
        let a = a.read();
        let b = b.read();
        (*a).cmp_state(&*b)
    }

    /// Full sort from scratch. Heap sort: O(n log n), in place, and a
    /// broken `cmp_state` only yields a wrong order.
    pub fn sort(&mut self) {
        heap_sort(self);
    }
}

impl<L> Sequence for ByState<'_, L>
where
    L: Lockable,
    L::Target: StateOrder,
{
    #[inline]
    fn len(&self) -> usize {
        self.objects.len()
    }

    fn less(&self, i: usize, j: usize) -> bool {
        self.compare(&self.objects[i], &self.objects[j]) == Ordering::Less
    }

    #[inline]
    fn swap(&mut self, i: usize, j: usize) {
        self.objects.swap(i, j);
    }
}

/// General-purpose unstable sort over any [`Sequence`].
pub fn heap_sort<S: Sequence + ?Sized>(data: &mut S) {
    let n = data.len();
    for root in (0..n / 2).rev() {
        sift_down(data, root, n);
    }
    for end in (1..n).rev() {
        data.swap(0, end);
        sift_down(data, 0, end);
    }
}

fn sift_down<S: Sequence + ?Sized>(data: &mut S, mut root: usize, end: usize) {
    loop {
        let mut child = 2 * root + 1;
        if child >= end {
            break;
        }
        if child + 1 < end && data.less(child, child + 1) {
            child += 1;
        }
        if !data.less(root, child) {
            break;
        }
        data.swap(root, child);
        root = child;
    }
}
