//! Generation-indexed arena tree.
//!
//! Nodes own their children as ordered id lists and carry a non-owning parent
//! id, so parent lookup and path navigation stay cheap without reference
//! cycles. Freed slots are recycled; generation tags turn use of a stale
//! [`NodeId`] into a panic instead of silent aliasing.

use std::ops::Range;

use hashbrown::HashSet;

/// Handle to a node in an [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone)]
struct Node<T> {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    value: T,
}

#[derive(Debug, Clone)]
struct Slot<T> {
    generation: u32,
    node: Option<Node<T>>,
}

#[derive(Debug, Clone)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Arena<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Allocates a detached node.
    pub fn alloc(&mut self, value: T) -> NodeId {
        let node = Node {
            parent: None,
            children: Vec::new(),
            value,
        };
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            NodeId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = u32::try_from(self.slots.len()).expect("arena index overflow");
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            NodeId {
                index,
                generation: 0,
            }
        }
    }

    fn node(&self, id: NodeId) -> &Node<T> {
        let slot = &self.slots[id.index as usize];
        assert_eq!(slot.generation, id.generation, "stale node id");
        slot.node.as_ref().expect("freed node id")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node<T> {
        let slot = &mut self.slots[id.index as usize];
        assert_eq!(slot.generation, id.generation, "stale node id");
        slot.node.as_mut().expect("freed node id")
    }

    fn take_node(&mut self, id: NodeId) -> Node<T> {
        let slot = &mut self.slots[id.index as usize];
        assert_eq!(slot.generation, id.generation, "stale node id");
        let node = slot.node.take().expect("freed node id");
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        node
    }

    #[must_use]
    pub fn value(&self, id: NodeId) -> &T {
        &self.node(id).value
    }

    pub fn value_mut(&mut self, id: NodeId) -> &mut T {
        &mut self.node_mut(id).value
    }

    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    #[must_use]
    pub fn child_count(&self, id: NodeId) -> usize {
        self.node(id).children.len()
    }

    #[must_use]
    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.node(id).children.is_empty()
    }

    /// Position of `id` among its siblings.
    #[must_use]
    pub fn parent_index(&self, id: NodeId) -> Option<usize> {
        let parent = self.node(id).parent?;
        self.node(parent).children.iter().position(|&c| c == id)
    }

    /// Appends a detached node to `parent`'s children.
    pub fn attach(&mut self, parent: NodeId, child: NodeId) {
        assert!(self.node(child).parent.is_none(), "node is already attached");
        self.node_mut(child).parent = Some(parent);
        self.node_mut(parent).children.push(child);
    }

    /// Replaces the child `range` of `parent` with `replacement` and returns
    /// the removed children, detached.
    pub fn splice(
        &mut self,
        parent: NodeId,
        range: Range<usize>,
        replacement: Vec<NodeId>,
    ) -> Vec<NodeId> {
        for &child in &replacement {
            assert!(self.node(child).parent.is_none(), "node is already attached");
        }
        let removed: Vec<NodeId> = self
            .node_mut(parent)
            .children
            .splice(range, replacement.iter().copied())
            .collect();
        for &child in &removed {
            self.node_mut(child).parent = None;
        }
        for &child in &replacement {
            self.node_mut(child).parent = Some(parent);
        }
        removed
    }

    /// Detaches and returns all children of `parent`.
    pub fn take_children(&mut self, parent: NodeId) -> Vec<NodeId> {
        let count = self.child_count(parent);
        self.splice(parent, 0..count, Vec::new())
    }

    /// Frees a detached node and its whole subtree.
    pub fn free_subtree(&mut self, id: NodeId) {
        assert!(self.node(id).parent.is_none(), "cannot free an attached node");
        self.free_subtree_inner(id);
    }

    fn free_subtree_inner(&mut self, id: NodeId) {
        let node = self.take_node(id);
        for child in node.children {
            self.free_subtree_inner(child);
        }
    }

    /// Frees a single detached node whose children were already moved away
    /// and returns its value.
    pub fn take_value(&mut self, id: NodeId) -> T {
        assert!(self.node(id).parent.is_none(), "cannot free an attached node");
        assert!(self.node(id).children.is_empty(), "node still has children");
        self.take_node(id).value
    }

    /// Follows a path of child indices starting at `root`.
    #[must_use]
    pub fn locate(&self, root: NodeId, path: &[usize]) -> Option<NodeId> {
        let mut current = root;
        for &index in path {
            current = *self.node(current).children.get(index)?;
        }
        Some(current)
    }

    /// Path of child indices from the tree root down to `id`.
    #[must_use]
    pub fn location(&self, id: NodeId) -> Vec<usize> {
        let mut path = Vec::new();
        let mut current = id;
        while let Some(index) = self.parent_index(current) {
            path.push(index);
            current = self.node(current).parent.expect("parent_index implies parent");
        }
        path.reverse();
        path
    }

    /// Height of the subtree: 0 for a leaf, otherwise max child depth + 1.
    #[must_use]
    pub fn depth(&self, id: NodeId) -> usize {
        self.node(id)
            .children
            .iter()
            .map(|&c| self.depth(c) + 1)
            .max()
            .unwrap_or(0)
    }

    /// Whether all leaves of the subtree sit at the same depth.
    #[must_use]
    pub fn is_balanced(&self, id: NodeId) -> bool {
        self.balanced_depth(id).is_some()
    }

    fn balanced_depth(&self, id: NodeId) -> Option<usize> {
        let children = &self.node(id).children;
        if children.is_empty() {
            return Some(0);
        }
        let mut depths = children.iter().map(|&c| self.balanced_depth(c));
        let first = depths.next().expect("children is non-empty")?;
        for depth in depths {
            if depth? != first {
                return None;
            }
        }
        Some(first + 1)
    }

    /// Depth-first, children-first traversal of the subtree.
    pub fn iter_depth_first(&self, id: NodeId) -> std::vec::IntoIter<NodeId> {
        let mut order = Vec::new();
        self.collect_post_order(id, &mut order);
        order.into_iter()
    }

    fn collect_post_order(&self, id: NodeId, out: &mut Vec<NodeId>) {
        for &child in &self.node(id).children {
            self.collect_post_order(child, out);
        }
        out.push(id);
    }

    /// Number of live nodes.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Checks that every descendant's parent pointer agrees with the walk and
    /// that the structure is a tree.
    ///
    /// # Panics
    ///
    /// Panics when the structure is inconsistent.
    pub fn assert_integrity(&self, root: NodeId) {
        let mut seen = HashSet::new();
        self.assert_integrity_inner(root, &mut seen);
    }

    fn assert_integrity_inner(&self, id: NodeId, seen: &mut HashSet<NodeId>) {
        assert!(seen.insert(id), "node appears twice in the tree");
        for &child in &self.node(id).children {
            assert_eq!(
                self.node(child).parent,
                Some(id),
                "child parent pointer does not agree with the walk"
            );
            self.assert_integrity_inner(child, seen);
        }
    }
}

impl<T: Clone> Arena<T> {
    /// Deep structural copy of a subtree within this arena; the copy is
    /// detached.
    pub fn copy_subtree(&mut self, id: NodeId) -> NodeId {
        let value = self.value(id).clone();
        let children = self.node(id).children.clone();
        let copy = self.alloc(value);
        for child in children {
            let child_copy = self.copy_subtree(child);
            self.attach(copy, child_copy);
        }
        copy
    }

    /// Deep structural copy of a subtree into another arena.
    pub fn copy_subtree_into(&self, id: NodeId, dest: &mut Self) -> NodeId {
        let copy = dest.alloc(self.value(id).clone());
        for &child in &self.node(id).children {
            let child_copy = self.copy_subtree_into(child, dest);
            dest.attach(copy, child_copy);
        }
        copy
    }
}

impl<T> Arena<T> {
    /// Moves a subtree out of `source` into this arena and returns its new
    /// root id. The moved slots in `source` are freed.
    pub fn graft(&mut self, source: &mut Self, source_id: NodeId) -> NodeId {
        let node = source.take_node(source_id);
        let new_id = self.alloc(node.value);
        for child in node.children {
            let new_child = self.graft(source, child);
            self.attach(new_id, new_child);
        }
        new_id
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds the tree `root -> [a -> [c, d], b]` and returns its ids.
    fn sample() -> (Arena<&'static str>, NodeId, [NodeId; 4]) {
        let mut arena = Arena::new();
        let root = arena.alloc("root");
        let a = arena.alloc("a");
        let b = arena.alloc("b");
        let c = arena.alloc("c");
        let d = arena.alloc("d");
        arena.attach(root, a);
        arena.attach(root, b);
        arena.attach(a, c);
        arena.attach(a, d);
        (arena, root, [a, b, c, d])
    }

    #[test]
    fn wiring() {
        let (arena, root, [a, b, c, d]) = sample();
        assert_eq!(arena.parent(a), Some(root));
        assert_eq!(arena.parent(root), None);
        assert_eq!(arena.children(root), &[a, b]);
        assert_eq!(arena.parent_index(d), Some(1));
        assert_eq!(arena.parent_index(root), None);
        assert!(arena.is_leaf(c));
        assert!(!arena.is_leaf(a));
        arena.assert_integrity(root);
    }

    #[test]
    fn paths_round_trip() {
        let (arena, root, [a, _, _, d]) = sample();
        assert_eq!(arena.location(d), vec![0, 1]);
        assert_eq!(arena.locate(root, &[0, 1]), Some(d));
        assert_eq!(arena.locate(root, &[]), Some(root));
        assert_eq!(arena.locate(root, &[5]), None);
        assert_eq!(arena.locate(root, &arena.location(a)), Some(a));
    }

    #[test]
    fn depth_and_balance() {
        let (mut arena, root, [_, b, c, _]) = sample();
        assert_eq!(arena.depth(root), 2);
        assert_eq!(arena.depth(c), 0);
        // leaf `b` sits at depth 1 while c/d sit at depth 2
        assert!(!arena.is_balanced(root));
        let e = arena.alloc("e");
        arena.attach(b, e);
        assert!(arena.is_balanced(root));
    }

    #[test]
    fn depth_first_is_children_first() {
        let (arena, root, [a, b, c, d]) = sample();
        let order: Vec<_> = arena.iter_depth_first(root).collect();
        assert_eq!(order, vec![c, d, a, b, root]);
    }

    #[test]
    fn splice_replaces_and_detaches() {
        let (mut arena, root, [a, b, _, _]) = sample();
        let e = arena.alloc("e");
        let f = arena.alloc("f");
        let removed = arena.splice(root, 0..1, vec![e, f]);
        assert_eq!(removed, vec![a]);
        assert_eq!(arena.children(root), &[e, f, b]);
        assert_eq!(arena.parent(a), None);
        assert_eq!(arena.parent(e), Some(root));
        arena.assert_integrity(root);
    }

    #[test]
    fn copy_is_independent() {
        let (mut arena, _, [a, _, c, _]) = sample();
        let copy = arena.copy_subtree(a);
        assert_eq!(arena.parent(copy), None);
        assert_eq!(arena.child_count(copy), 2);
        let copied_child = arena.children(copy)[0];
        assert_ne!(copied_child, c);
        *arena.value_mut(copied_child) = "changed";
        assert_eq!(*arena.value(c), "c");
    }

    #[test]
    fn graft_moves_between_arenas() {
        let (mut source, root, _) = sample();
        let mut dest = Arena::new();
        let new_root = dest.graft(&mut source, root);
        assert_eq!(dest.live_count(), 5);
        assert_eq!(source.live_count(), 0);
        assert_eq!(*dest.value(new_root), "root");
        dest.assert_integrity(new_root);
    }

    #[test]
    fn freed_slots_are_recycled_with_new_generations() {
        let (mut arena, root, [a, _, _, _]) = sample();
        let removed = arena.splice(root, 0..1, Vec::new());
        arena.free_subtree(removed[0]);
        assert_eq!(arena.live_count(), 2);
        let fresh = arena.alloc("fresh");
        assert_ne!(fresh, a);
        assert_eq!(*arena.value(fresh), "fresh");
    }
}
