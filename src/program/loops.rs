//! The loop tree.
//!
//! A [`Loop`] is a hierarchical description of a repeated pulse schedule:
//! leaves carry waveforms, inner nodes carry a repetition count and optional
//! measurement windows. The tree lives in an arena; [`NodeId`] handles select
//! the node an operation applies to, with [`Loop::root`] as the usual entry
//! point.
//!
//! Body durations are memoized per node. Every mutating operation either
//! updates the affected caches incrementally or clears them along the path to
//! the root, so reads never observe a stale duration.

use std::{cell::Cell, fmt, fmt::Write as _, sync::Arc};

use hashbrown::HashMap;
use ndarray::Array1;

use crate::{
    diagnostics::{Diagnostic, DiagnosticSink, VolatileOperation},
    error::{Error, Result},
    parameter::MappedParameter,
    quant::{MeasurementId, MeasurementWindow, Time},
    tree::{Arena, NodeId},
    waveform::Waveform,
};

/// How often a loop body runs.
///
/// The integer count is always authoritative; a volatile repetition
/// additionally keeps the parameter it was computed from so the count can be
/// re-evaluated after compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Repetition {
    Fixed(u64),
    Volatile {
        count: u64,
        parameter: MappedParameter,
    },
}

/// Cleanup passes, applied in the order given to [`Loop::cleanup_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupAction {
    /// Drop leaves without a waveform and inner nodes that become empty.
    RemoveEmptyLoops,
    /// Lift an only child into its parent where that preserves semantics.
    MergeSingleChild,
}

/// Nested `(repetition count, duration | children)` shape of a tree, a cheap
/// structural fingerprint for comparing programs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DurationStructure {
    Leaf { repetition_count: u64, duration: Time },
    Node {
        repetition_count: u64,
        children: Vec<DurationStructure>,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct LoopData {
    waveform: Option<Waveform>,
    repetition: Repetition,
    measurements: Vec<MeasurementWindow>,
    cached_body_duration: Cell<Option<Time>>,
}

#[derive(Debug, Clone)]
pub struct Loop {
    arena: Arena<LoopData>,
    root: NodeId,
}

const MAX_DISPLAY_SIZE: usize = 2000;

impl Repetition {
    #[must_use]
    pub const fn count(&self) -> u64 {
        match self {
            Self::Fixed(count) | Self::Volatile { count, .. } => *count,
        }
    }

    #[must_use]
    pub fn parameter(&self) -> Option<&MappedParameter> {
        match self {
            Self::Fixed(_) => None,
            Self::Volatile { parameter, .. } => Some(parameter),
        }
    }

    #[must_use]
    pub const fn is_volatile(&self) -> bool {
        matches!(self, Self::Volatile { .. })
    }
}

impl LoopData {
    fn empty() -> Self {
        Self {
            waveform: None,
            repetition: Repetition::Fixed(1),
            measurements: Vec::new(),
            cached_body_duration: Cell::new(None),
        }
    }
}

impl Loop {
    /// An empty leaf with repetition count 1.
    #[must_use]
    pub fn new() -> Self {
        let mut arena = Arena::new();
        let root = arena.alloc(LoopData::empty());
        Self { arena, root }
    }

    #[must_use]
    pub fn with_waveform(mut self, waveform: Waveform) -> Self {
        self.arena.value_mut(self.root).waveform = Some(waveform);
        self.arena
            .value(self.root)
            .cached_body_duration
            .set(None);
        self
    }

    /// Sets a fixed repetition count.
    ///
    /// # Errors
    ///
    /// Returns an error if `count` is zero.
    pub fn with_repetition(mut self, count: u64) -> Result<Self> {
        if count == 0 {
            return Err(Error::ZeroRepetitionCount);
        }
        self.arena.value_mut(self.root).repetition = Repetition::Fixed(count);
        Ok(self)
    }

    /// Marks the repetition count as volatile, backed by `parameter`; the
    /// count is the parameter's current value.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameter does not evaluate to a positive
    /// integer.
    pub fn with_repetition_parameter(mut self, parameter: MappedParameter) -> Result<Self> {
        let count = evaluate_count(&parameter)?;
        self.arena.value_mut(self.root).repetition = Repetition::Volatile { count, parameter };
        Ok(self)
    }

    #[must_use]
    pub fn with_children(mut self, children: Vec<Self>) -> Self {
        for child in children {
            self.append_child(self.root, child);
        }
        self
    }

    /// Sets the measurement windows of the root, begins relative to its body
    /// start.
    #[must_use]
    pub fn with_measurements(mut self, measurements: Vec<MeasurementWindow>) -> Self {
        self.arena.value_mut(self.root).measurements = measurements;
        self
    }

    #[must_use]
    pub const fn root(&self) -> NodeId {
        self.root
    }

    // --- node access -----------------------------------------------------

    #[must_use]
    pub fn waveform(&self, node: NodeId) -> Option<&Waveform> {
        self.arena.value(node).waveform.as_ref()
    }

    pub fn set_waveform(&mut self, node: NodeId, waveform: Option<Waveform>) {
        self.arena.value_mut(node).waveform = waveform;
        self.invalidate_duration(node, None);
    }

    #[must_use]
    pub fn repetition(&self, node: NodeId) -> &Repetition {
        &self.arena.value(node).repetition
    }

    #[must_use]
    pub fn repetition_count(&self, node: NodeId) -> u64 {
        self.arena.value(node).repetition.count()
    }

    #[must_use]
    pub fn repetition_parameter(&self, node: NodeId) -> Option<&MappedParameter> {
        self.arena.value(node).repetition.parameter()
    }

    #[must_use]
    pub fn is_volatile(&self, node: NodeId) -> bool {
        self.arena.value(node).repetition.is_volatile()
    }

    /// Overwrites the integer repetition count, leaving a volatile marker and
    /// its parameter untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if `count` is zero.
    pub fn set_repetition_count(&mut self, node: NodeId, count: u64) -> Result<()> {
        if count == 0 {
            return Err(Error::ZeroRepetitionCount);
        }
        match &mut self.arena.value_mut(node).repetition {
            Repetition::Fixed(c) | Repetition::Volatile { count: c, .. } => *c = count,
        }
        self.invalidate_parent_duration(node);
        Ok(())
    }

    pub(crate) fn set_repetition(&mut self, node: NodeId, repetition: Repetition) {
        self.arena.value_mut(node).repetition = repetition;
        self.invalidate_parent_duration(node);
    }

    #[must_use]
    pub fn measurements(&self, node: NodeId) -> &[MeasurementWindow] {
        &self.arena.value(node).measurements
    }

    /// Appends measurement windows, each begin offset by the current body
    /// duration, i.e. the windows refer to the end of the body built so far.
    pub fn add_measurements(
        &mut self,
        node: NodeId,
        windows: impl IntoIterator<Item = MeasurementWindow>,
    ) {
        let body = self.body_duration(node);
        let data = self.arena.value_mut(node);
        data.measurements
            .extend(windows.into_iter().map(|w| w.shifted(body)));
    }

    /// Re-evaluates a volatile repetition count after updating constants in
    /// the parameter namespace. Does nothing on a fixed repetition.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameter no longer evaluates to a positive
    /// integer.
    pub fn update_volatile_repetition(
        &mut self,
        node: NodeId,
        values: &HashMap<Arc<str>, i64>,
    ) -> Result<()> {
        let changed = {
            let data = self.arena.value_mut(node);
            if let Repetition::Volatile { count, parameter } = &mut data.repetition {
                let mut updated = parameter.clone();
                updated.update_constants(values);
                let new_count = evaluate_count(&updated)?;
                *parameter = updated;
                *count = new_count;
                true
            } else {
                false
            }
        };
        if changed {
            self.invalidate_parent_duration(node);
        }
        Ok(())
    }

    // --- tree access -----------------------------------------------------

    #[must_use]
    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.arena.children(node)
    }

    #[must_use]
    pub fn child_count(&self, node: NodeId) -> usize {
        self.arena.child_count(node)
    }

    #[must_use]
    pub fn is_leaf(&self, node: NodeId) -> bool {
        self.arena.is_leaf(node)
    }

    #[must_use]
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.arena.parent(node)
    }

    #[must_use]
    pub fn parent_index(&self, node: NodeId) -> Option<usize> {
        self.arena.parent_index(node)
    }

    /// Follows a path of child indices from the root.
    ///
    /// # Errors
    ///
    /// Returns an error if the path leaves the tree.
    pub fn locate(&self, path: &[usize]) -> Result<NodeId> {
        self.arena
            .locate(self.root, path)
            .ok_or_else(|| Error::InvalidPath(path.to_vec()))
    }

    /// Path of child indices from the root down to `node`.
    #[must_use]
    pub fn location(&self, node: NodeId) -> Vec<usize> {
        self.arena.location(node)
    }

    #[must_use]
    pub fn depth(&self, node: NodeId) -> usize {
        self.arena.depth(node)
    }

    #[must_use]
    pub fn is_balanced(&self, node: NodeId) -> bool {
        self.arena.is_balanced(node)
    }

    /// Depth-first, children-first traversal.
    pub fn iter_depth_first(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.arena.iter_depth_first(node)
    }

    /// # Panics
    ///
    /// Panics if any descendant's parent pointer disagrees with the walk.
    pub fn assert_tree_integrity(&self) {
        self.arena.assert_integrity(self.root);
    }

    fn debug_assert_integrity(&self) {
        #[cfg(debug_assertions)]
        self.assert_tree_integrity();
    }

    // --- durations -------------------------------------------------------

    /// Duration of one run of the body: the waveform duration on a leaf,
    /// zero on an empty leaf, the sum of child durations otherwise.
    #[must_use]
    pub fn body_duration(&self, node: NodeId) -> Time {
        if let Some(cached) = self.arena.value(node).cached_body_duration.get() {
            return cached;
        }
        let duration = if self.arena.is_leaf(node) {
            self.arena
                .value(node)
                .waveform
                .as_ref()
                .map_or(Time::ZERO, Waveform::duration)
        } else {
            self.arena
                .children(node)
                .iter()
                .map(|&child| self.duration(child))
                .sum()
        };
        self.arena
            .value(node)
            .cached_body_duration
            .set(Some(duration));
        duration
    }

    #[must_use]
    pub fn duration(&self, node: NodeId) -> Time {
        self.body_duration(node) * self.repetition_count(node)
    }

    /// Walks to the root, applying an additive body-duration delta where the
    /// cache is warm, or clearing the caches when no delta is known.
    fn invalidate_duration(&self, node: NodeId, delta: Option<Time>) {
        let data = self.arena.value(node);
        match (data.cached_body_duration.get(), delta) {
            (Some(cached), Some(d)) => data.cached_body_duration.set(Some(cached + d)),
            (Some(_), None) => data.cached_body_duration.set(None),
            (None, _) => {}
        }
        if let Some(parent) = self.arena.parent(node) {
            let delta_up = delta.map(|d| d * self.repetition_count(node));
            self.invalidate_duration(parent, delta_up);
        }
    }

    /// Invalidation for mutations that change a node's duration without
    /// changing its body (repetition count updates).
    fn invalidate_parent_duration(&self, node: NodeId) {
        if let Some(parent) = self.arena.parent(node) {
            self.invalidate_duration(parent, None);
        }
    }

    // --- structural transforms -------------------------------------------

    /// Grafts `child` under `parent` and returns its id; the cached durations
    /// along the path to the root are updated incrementally.
    pub fn append_child(&mut self, parent: NodeId, child: Self) -> NodeId {
        let delta = child.duration(child.root);
        let mut child = child;
        let new = self.arena.graft(&mut child.arena, child.root);
        self.arena.attach(parent, new);
        self.invalidate_duration(parent, Some(delta));
        new
    }

    /// Replaces `node` in its parent's child list with `repetition_count`
    /// copies of its children.
    ///
    /// # Errors
    ///
    /// Fails on a leaf and on the root.
    pub fn unroll(&mut self, node: NodeId, sink: &mut dyn DiagnosticSink) -> Result<()> {
        if self.is_leaf(node) {
            return Err(Error::UnrollLeaf);
        }
        let parent = self.arena.parent(node).ok_or(Error::UnrollRoot)?;
        if self.is_volatile(node) {
            sink.emit(Diagnostic::VolatileModification(VolatileOperation::Unroll));
        }
        let index = self
            .arena
            .parent_index(node)
            .expect("attached node has an index");
        let count = self.repetition_count(node);
        let children = self.arena.children(node).to_vec();
        let mut replacement = Vec::new();
        for _ in 0..count {
            for &child in &children {
                replacement.push(self.arena.copy_subtree(child));
            }
        }
        self.arena.splice(parent, index..index + 1, replacement);
        self.arena.free_subtree(node);
        self.invalidate_duration(parent, None);
        self.debug_assert_integrity();
        Ok(())
    }

    /// Replaces the children with `repetition_count` copies of the current
    /// child sequence and resets the repetition to a fixed 1.
    pub fn unroll_children(&mut self, node: NodeId, sink: &mut dyn DiagnosticSink) {
        if self.is_volatile(node) {
            sink.emit(Diagnostic::VolatileModification(
                VolatileOperation::UnrollChildren,
            ));
        }
        let count = self.repetition_count(node);
        let children = self.arena.children(node).to_vec();
        let mut replacement = Vec::new();
        for _ in 0..count {
            for &child in &children {
                replacement.push(self.arena.copy_subtree(child));
            }
        }
        let removed = self.arena.splice(node, 0..children.len(), replacement);
        for old in removed {
            self.arena.free_subtree(old);
        }
        self.arena.value_mut(node).repetition = Repetition::Fixed(1);
        self.invalidate_duration(node, None);
        self.debug_assert_integrity();
    }

    /// Adds one nesting level: the node's former payload moves into a single
    /// new child, the node itself becomes a plain repetition-1 wrapper.
    pub fn encapsulate(&mut self, node: NodeId) {
        let children = self.arena.take_children(node);
        let inner = {
            let data = self.arena.value_mut(node);
            LoopData {
                waveform: data.waveform.take(),
                repetition: std::mem::replace(&mut data.repetition, Repetition::Fixed(1)),
                measurements: std::mem::take(&mut data.measurements),
                cached_body_duration: Cell::new(data.cached_body_duration.get()),
            }
        };
        let child = self.arena.alloc(inner);
        for grandchild in children {
            self.arena.attach(child, grandchild);
        }
        self.arena.attach(node, child);
        self.invalidate_duration(node, None);
        self.debug_assert_integrity();
    }

    /// Decrements one child's repetition count and inserts a structural copy
    /// with repetition count 1 right after it.
    ///
    /// Without an explicit index the last child with a count above 1 is
    /// chosen, preferring children whose count is not volatile.
    ///
    /// # Errors
    ///
    /// Fails if the indexed child has a count below 2, or if no child
    /// qualifies.
    pub fn split_one_child(
        &mut self,
        node: NodeId,
        index: Option<usize>,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<()> {
        let child_index = match index {
            Some(i) => {
                let child = self.arena.children(node)[i];
                let count = self.repetition_count(child);
                if count < 2 {
                    return Err(Error::SplitRepetition { index: i, count });
                }
                i
            }
            None => self.find_split_candidate(node)?,
        };
        let child = self.arena.children(node)[child_index];
        if self.is_volatile(child) {
            sink.emit(Diagnostic::VolatileModification(VolatileOperation::Split));
            if let Repetition::Volatile { parameter, .. } =
                &mut self.arena.value_mut(child).repetition
            {
                *parameter = parameter.decremented();
            }
        }
        let copy = self.arena.copy_subtree(child);
        self.arena.value_mut(copy).repetition = Repetition::Fixed(1);
        let count = self.repetition_count(child);
        match &mut self.arena.value_mut(child).repetition {
            Repetition::Fixed(c) | Repetition::Volatile { count: c, .. } => *c = count - 1,
        }
        self.arena
            .splice(node, child_index + 1..child_index + 1, vec![copy]);
        self.invalidate_duration(node, None);
        self.debug_assert_integrity();
        Ok(())
    }

    fn find_split_candidate(&self, node: NodeId) -> Result<usize> {
        let mut volatile_fallback = None;
        for (i, &child) in self.arena.children(node).iter().enumerate().rev() {
            if self.repetition_count(child) > 1 {
                if !self.is_volatile(child) {
                    return Ok(i);
                }
                if volatile_fallback.is_none() {
                    volatile_fallback = Some(i);
                }
            }
        }
        volatile_fallback.ok_or(Error::NoSplitCandidate)
    }

    /// Rewrites the subtree so every leaf sits at exactly `depth` below
    /// `node`.
    ///
    /// # Errors
    ///
    /// Propagates failures of the unroll steps it performs.
    pub fn flatten_and_balance(
        &mut self,
        node: NodeId,
        depth: usize,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<()> {
        self.flatten_and_balance_inner(node, i64::try_from(depth).unwrap_or(i64::MAX), sink)
    }

    fn flatten_and_balance_inner(
        &mut self,
        node: NodeId,
        depth: i64,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<()> {
        let mut i = 0;
        while i < self.child_count(node) {
            let child = self.arena.children(node)[i];
            let child_depth = i64::try_from(self.depth(child)).unwrap_or(i64::MAX);

            if child_depth < depth - 1 {
                // not deep enough: wrap and look at the same index again
                self.encapsulate(child);
            } else if !self.is_balanced(child) {
                // balancing may modify this node's child list, so the same
                // index is examined again afterwards
                self.flatten_and_balance_inner(child, depth - 1, sink)?;
            } else if child_depth == depth - 1 {
                i += 1;
            } else if self.has_single_child_that_can_be_merged(child) {
                self.merge_single_child(child);
            } else if !self.is_leaf(child) {
                self.unroll(child, sink)?;
            } else {
                // a leaf at depth == 0
                i += 1;
            }
        }
        Ok(())
    }

    /// Runs both cleanup actions.
    pub fn cleanup(&mut self, sink: &mut dyn DiagnosticSink) {
        self.cleanup_with(
            &[CleanupAction::RemoveEmptyLoops, CleanupAction::MergeSingleChild],
            sink,
        );
    }

    pub fn cleanup_with(&mut self, actions: &[CleanupAction], sink: &mut dyn DiagnosticSink) {
        self.cleanup_node(self.root, actions, sink);
    }

    fn cleanup_node(
        &mut self,
        node: NodeId,
        actions: &[CleanupAction],
        sink: &mut dyn DiagnosticSink,
    ) {
        if actions.contains(&CleanupAction::RemoveEmptyLoops) {
            let children = self.arena.children(node).to_vec();
            let mut kept = Vec::new();
            let mut dropped = Vec::new();
            for child in children {
                if self.is_leaf(child) {
                    if self.waveform(child).is_none() {
                        self.emit_dropped(child, sink);
                        dropped.push(child);
                    } else {
                        kept.push(child);
                    }
                } else {
                    self.cleanup_node(child, actions, sink);
                    if self.waveform(child).is_some() || !self.is_leaf(child) {
                        kept.push(child);
                    } else {
                        self.emit_dropped(child, sink);
                        dropped.push(child);
                    }
                }
            }
            if !dropped.is_empty() {
                self.arena.take_children(node);
                for child in kept {
                    self.arena.attach(node, child);
                }
                for child in dropped {
                    self.arena.free_subtree(child);
                }
                self.invalidate_duration(node, None);
            }
        } else {
            for child in self.arena.children(node).to_vec() {
                self.cleanup_node(child, actions, sink);
            }
        }
        if actions.contains(&CleanupAction::MergeSingleChild)
            && self.has_single_child_that_can_be_merged(node)
        {
            self.merge_single_child(node);
        }
    }

    fn emit_dropped(&self, node: NodeId, sink: &mut dyn DiagnosticSink) {
        let dropped = self.measurements(node).len();
        if dropped > 0 {
            sink.emit(Diagnostic::DroppedMeasurement { dropped });
        }
    }

    pub(crate) fn has_single_child_that_can_be_merged(&self, node: NodeId) -> bool {
        if self.child_count(node) != 1 {
            return false;
        }
        let child = self.arena.children(node)[0];
        self.measurements(node).is_empty()
            || (self.repetition_count(child) == 1 && !self.is_volatile(child))
    }

    /// Lifts the single child into `node`. Requires
    /// [`Self::has_single_child_that_can_be_merged`].
    pub(crate) fn merge_single_child(&mut self, node: NodeId) {
        assert_eq!(self.child_count(node), 1, "merge requires exactly one child");
        let child = self.arena.children(node)[0];
        let mergeable_measurements =
            self.repetition_count(child) == 1 && !self.is_volatile(child);
        assert!(
            self.measurements(node).is_empty() || mergeable_measurements,
            "cannot lift a repeated child over measurements"
        );
        assert!(
            self.waveform(node).is_none(),
            "a node with children cannot carry a waveform"
        );

        let node_count = self.repetition_count(node);
        let node_parameter = self.repetition_parameter(node).cloned();
        let grandchildren = self.arena.take_children(child);
        self.arena.splice(node, 0..1, grandchildren);
        let child_data = self.arena.take_value(child);

        let child_count = child_data.repetition.count();
        let child_parameter = child_data.repetition.parameter().cloned();
        let count = node_count * child_count;
        let repetition = match (node_parameter, child_parameter) {
            (None, None) => Repetition::Fixed(count),
            (Some(p), None) => Repetition::Volatile {
                count,
                parameter: p.scaled(to_i64(child_count)),
            },
            (None, Some(c)) => Repetition::Volatile {
                count,
                parameter: c.scaled(to_i64(node_count)),
            },
            (Some(p), Some(c)) => Repetition::Volatile {
                count,
                parameter: MappedParameter::product(&p, &c),
            },
        };

        let data = self.arena.value_mut(node);
        let mut measurements = child_data.measurements;
        measurements.append(&mut data.measurements);
        data.measurements = measurements;
        data.waveform = child_data.waveform;
        data.repetition = repetition;
        self.invalidate_duration(node, None);
        self.debug_assert_integrity();
    }

    /// Removes and frees all children of `node`.
    pub(crate) fn remove_children(&mut self, node: NodeId) {
        for child in self.arena.take_children(node) {
            self.arena.free_subtree(child);
        }
        self.invalidate_duration(node, None);
    }

    /// Deep structural copy of the subtree at `node` as a detached tree.
    #[must_use]
    pub fn copy_tree_structure(&self, node: NodeId) -> Self {
        let mut arena = Arena::new();
        let root = self.arena.copy_subtree_into(node, &mut arena);
        Self { arena, root }
    }

    // --- measurement materialization --------------------------------------

    /// Collects all measurement windows of the subtree into per-name arrays
    /// of absolute begins and lengths, the whole tree repeated
    /// `repetition_count` times.
    #[must_use]
    pub fn measurement_windows(
        &self,
        node: NodeId,
    ) -> HashMap<MeasurementId, (Array1<f64>, Array1<f64>)> {
        self.collect_windows(node)
            .into_iter()
            .map(|(name, pairs)| {
                let begins = pairs.iter().map(|&[begin, _]| begin).collect();
                let lengths = pairs.iter().map(|&[_, length]| length).collect();
                (name, (begins, lengths))
            })
            .collect()
    }

    fn collect_windows(&self, node: NodeId) -> HashMap<MeasurementId, Vec<[f64; 2]>> {
        let mut windows: HashMap<MeasurementId, Vec<[f64; 2]>> = HashMap::new();
        for w in self.measurements(node) {
            windows
                .entry(w.name().clone())
                .or_default()
                .push([w.begin().to_f64(), w.length().to_f64()]);
        }

        let body_duration = if self.is_leaf(node) {
            self.body_duration(node).to_f64()
        } else {
            let mut offset = Time::ZERO;
            for &child in self.arena.children(node) {
                let shift = offset.to_f64();
                for (name, pairs) in self.collect_windows(child) {
                    windows
                        .entry(name)
                        .or_default()
                        .extend(pairs.into_iter().map(|[b, l]| [b + shift, l]));
                }
                offset += self.duration(child);
            }
            offset.to_f64()
        };

        let count = self.repetition_count(node);
        if count > 1 {
            for pairs in windows.values_mut() {
                let base = pairs.len();
                for k in 1..count {
                    let shift = body_duration * k as f64;
                    for i in 0..base {
                        let [b, l] = pairs[i];
                        pairs.push([b + shift, l]);
                    }
                }
            }
        }
        windows
    }

    /// Nested `(repetition count, duration | children)` view of the subtree.
    #[must_use]
    pub fn duration_structure(&self, node: NodeId) -> DurationStructure {
        let repetition_count = self.repetition_count(node);
        if self.is_leaf(node) {
            DurationStructure::Leaf {
                repetition_count,
                duration: self.body_duration(node),
            }
        } else {
            DurationStructure::Node {
                repetition_count,
                children: self
                    .arena
                    .children(node)
                    .iter()
                    .map(|&child| self.duration_structure(child))
                    .collect(),
            }
        }
    }

    fn node_eq(&self, node: NodeId, other: &Self, other_node: NodeId) -> bool {
        let a = self.arena.value(node);
        let b = other.arena.value(other_node);
        a.repetition == b.repetition
            && a.waveform == b.waveform
            && a.measurements == b.measurements
            && self.child_count(node) == other.child_count(other_node)
            && self
                .arena
                .children(node)
                .iter()
                .zip(other.arena.children(other_node))
                .all(|(&x, &y)| self.node_eq(x, other, y))
    }

    fn render(&self, node: NodeId, first_prefix: &str, other_prefix: &str, out: &mut String) -> bool {
        if out.len() > MAX_DISPLAY_SIZE {
            return false;
        }
        let count = self.repetition_count(node);
        if self.is_leaf(node) {
            match self.waveform(node) {
                Some(w) => {
                    let _ = writeln!(out, "{first_prefix}EXEC {w} {count} times");
                }
                None => {
                    let _ = writeln!(out, "{first_prefix}EXEC <empty> {count} times");
                }
            }
        } else {
            let _ = writeln!(out, "{first_prefix}LOOP {count} times:");
            let child_first = format!("{other_prefix}  ->");
            let child_other = format!("{other_prefix}    ");
            for &child in self.arena.children(node) {
                if !self.render(child, &child_first, &child_other, out) {
                    return false;
                }
            }
        }
        true
    }
}

fn evaluate_count(parameter: &MappedParameter) -> Result<u64> {
    let value = parameter.get_value()?;
    u64::try_from(value)
        .ok()
        .filter(|&count| count >= 1)
        .ok_or(Error::InvalidRepetitionValue(value))
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl Default for Loop {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Loop {
    fn eq(&self, other: &Self) -> bool {
        self.node_eq(self.root, other, other.root)
    }
}

impl fmt::Display for Loop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut rendered = String::new();
        if !self.render(self.root, "", "", &mut rendered) {
            rendered.push_str("...");
        }
        f.write_str(rendered.trim_end_matches('\n'))
    }
}
