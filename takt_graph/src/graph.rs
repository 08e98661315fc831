//! # Graph
//!
//! The node arena, connection management, and the per-block driver.
//!
//! A [`Graph`] owns its nodes and is edited between audio blocks;
//! [`Graph::process_block`] takes `&mut self`, so the borrow checker
//! already serializes connection changes against the driver. Worker
//! threads share the runtime core through an [`Arc`] and only run
//! between the driver's block-start signal and block completion.

use crate::node::{self, RtInput, RtNode};
use crate::queue::ReadyQueue;
use crate::sync::{SpinLock, SpinLockHolder};
use crate::thread::{Priority, TriggerableThreadSet};
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};
use ecow::EcoString;
use slotmap::{SecondaryMap, SlotMap, new_key_type};
use smallvec::SmallVec;
use std::sync::Arc;
use takt_core::{FrameOp, ScratchPool};
use takt_primitives::FrameTime;

new_key_type! {
    /// Identifier of a node within a [`Graph`].
    pub struct NodeKey;
}

/// Errors surfaced to the host at configuration time.
#[derive(thiserror::Error, Debug)]
pub enum GraphError {
    #[allow(missing_docs)]
    #[error("node cannot be found in the graph")]
    NodeNotFound,
    #[allow(missing_docs)]
    #[error("tried to use a node input that doesn't exist: `{0}`")]
    InputOutOfBounds(usize),
    #[allow(missing_docs)]
    #[error("tried to use a node output that doesn't exist: `{0}`")]
    OutputOutOfBounds(usize),
    #[allow(missing_docs)]
    #[error("connection would create a circular dependency")]
    CircularConnection,
}

/// Options for a new [`Graph`].
#[derive(Clone, Debug)]
pub struct GraphOptions {
    /// Display name of the graph.
    pub name: EcoString,
    /// Sampling rate in Hz; non-positive values fall back to 44100.
    pub sampling_rate: f64,
    /// Worker threads assisting the audio thread inside each block. Zero
    /// is valid: the audio thread then drains the queue alone.
    pub workers: usize,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            name: EcoString::new(),
            sampling_rate: 44100.0,
            workers: 0,
        }
    }
}

/// Shared runtime state: the ready queue, the engine lock guarding
/// scheduling metadata, and the block window.
///
/// # Safety
///
/// - `order` is rebuilt only from `&mut Graph` while no block is running
///   and no worker is awake.
/// - `block_start`/`block_end`/`sampling_rate` are written only from
///   `&mut Graph` between blocks and read during blocks.
/// - All node metadata reached through `order` follows the protocol
///   described in the `node` module.
pub(crate) struct RtCore {
    pub lock: SpinLock,
    pub queue: ReadyQueue,
    pub pending: AtomicUsize,
    order: UnsafeCell<Vec<*mut RtNode>>,
    block_start: UnsafeCell<FrameTime>,
    block_end: UnsafeCell<FrameTime>,
    sampling_rate: UnsafeCell<f64>,
    pool: ScratchPool,
}

unsafe impl Send for RtCore {}
unsafe impl Sync for RtCore {}

impl RtCore {
    fn new(sampling_rate: f64) -> Self {
        Self {
            lock: SpinLock::new(),
            queue: ReadyQueue::new(),
            pending: AtomicUsize::new(0),
            order: UnsafeCell::new(Vec::new()),
            block_start: UnsafeCell::new(FrameTime::ZERO),
            block_end: UnsafeCell::new(FrameTime::ZERO),
            sampling_rate: UnsafeCell::new(sampling_rate),
            pool: ScratchPool::new(),
        }
    }

    pub fn block_start(&self) -> FrameTime {
        // Safety: written only between blocks, see struct docs.
        unsafe { *self.block_start.get() }
    }
    pub fn block_end(&self) -> FrameTime {
        // Safety: as `block_start`.
        unsafe { *self.block_end.get() }
    }
    pub fn sampling_rate(&self) -> f64 {
        // Safety: as `block_start`.
        unsafe { *self.sampling_rate.get() }
    }
    pub fn pool(&self) -> &ScratchPool {
        &self.pool
    }

    /// The execution table.
    ///
    /// # Safety
    ///
    /// Only valid during a block or from `&mut Graph`.
    unsafe fn order(&self) -> &[*mut RtNode] {
        unsafe { &*self.order.get() }
    }

    /// Pop and run nodes until the queue is transiently empty.
    ///
    /// # Safety
    ///
    /// Only call while a block is being driven.
    unsafe fn drain(&self) {
        loop {
            let Some(index) = self.queue.pop() else {
                return;
            };
            // Safety: indices in the queue point into the live table.
            unsafe {
                let ptr = self.order()[index as usize];
                node::run_ready(ptr, self);
            }
        }
    }
}

/// Frame-processing engine: an arena of nodes, their dependency edges,
/// and the per-block scheduling driver.
pub struct Graph {
    // Workers are declared first so they are joined (via drop) before
    // the arena and the core can go away.
    workers: Option<TriggerableThreadSet>,
    nodes: SlotMap<NodeKey, Box<RtNode>>,
    /// Nodes taking part in per-block audio handling, in insertion
    /// order. This order is the serialization chain for block
    /// bookkeeping.
    audio_order: Vec<NodeKey>,
    total_audio_ins: usize,
    total_audio_outs: usize,
    recalculation_required: bool,
    rt: Arc<RtCore>,
    name: EcoString,
}

impl Graph {
    /// Create an empty graph, spawning the configured worker pool.
    pub fn new(options: GraphOptions) -> Self {
        let GraphOptions {
            name,
            sampling_rate,
            workers,
        } = options;
        let sampling_rate = if sampling_rate > 0.0 {
            sampling_rate
        } else {
            log::warn!("non-positive sampling rate, falling back to 44100");
            44100.0
        };
        let rt = Arc::new(RtCore::new(sampling_rate));
        let workers = (workers > 0).then(|| {
            let core = rt.clone();
            TriggerableThreadSet::new(Priority::Audio, workers, move |_index| {
                // Safety: workers are only woken while a block is being
                // driven.
                unsafe { core.drain() };
            })
        });
        Self {
            workers,
            nodes: SlotMap::with_key(),
            audio_order: Vec::new(),
            total_audio_ins: 0,
            total_audio_outs: 0,
            recalculation_required: true,
            rt,
            name,
        }
    }

    /// Display name of the graph.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Add a node driving the given operator.
    pub fn push(&mut self, op: impl FrameOp + 'static) -> NodeKey {
        self.push_named(EcoString::new(), op)
    }

    /// Add a named node driving the given operator.
    pub fn push_named(&mut self, name: impl Into<EcoString>, op: impl FrameOp + 'static) -> NodeKey {
        let node = RtNode::new(name.into(), Box::new(op));
        let handles_audio = node.op.handles_audio();
        let key = self.nodes.insert(Box::new(node));
        if handles_audio {
            self.audio_order.push(key);
        }
        self.recalculation_required = true;
        key
    }

    /// Remove a node, detaching every connection from and to it.
    pub fn remove(&mut self, key: NodeKey) -> Result<(), GraphError> {
        let mut node = self.nodes.remove(key).ok_or(GraphError::NodeNotFound)?;
        node.outputs.free(self.rt.pool());
        self.audio_order.retain(|k| *k != key);
        for (_, other) in self.nodes.iter_mut() {
            for input in &mut other.inputs {
                if matches!(input.source, Some((src, _)) if src == key) {
                    input.source = None;
                }
            }
        }
        self.recalculation_required = true;
        Ok(())
    }

    /// Connect `source`'s output `out_idx` to `sink`'s input `in_idx`,
    /// replacing any previous connection on that input.
    pub fn add_connection(
        &mut self,
        source: NodeKey,
        out_idx: usize,
        sink: NodeKey,
        in_idx: usize,
    ) -> Result<(), GraphError> {
        let source_node = self.nodes.get(source).ok_or(GraphError::NodeNotFound)?;
        if out_idx >= source_node.outputs.len() {
            return Err(GraphError::OutputOutOfBounds(out_idx));
        }
        let sink_node = self.nodes.get(sink).ok_or(GraphError::NodeNotFound)?;
        if in_idx >= sink_node.inputs.len() {
            return Err(GraphError::InputOutOfBounds(in_idx));
        }
        if source == sink || self.reaches(source, sink) {
            return Err(GraphError::CircularConnection);
        }
        let sink_node = self.nodes.get_mut(sink).expect("checked above");
        sink_node.inputs[in_idx].source = Some((source, out_idx as u16));
        self.recalculation_required = true;
        Ok(())
    }

    /// Detach `sink`'s input `in_idx`.
    pub fn delete_connection(&mut self, sink: NodeKey, in_idx: usize) -> Result<(), GraphError> {
        let node = self.nodes.get_mut(sink).ok_or(GraphError::NodeNotFound)?;
        if in_idx >= node.inputs.len() {
            return Err(GraphError::InputOutOfBounds(in_idx));
        }
        node.inputs[in_idx].source = None;
        self.recalculation_required = true;
        Ok(())
    }

    /// Detach every input of `key`.
    pub fn clear_connections(&mut self, key: NodeKey) -> Result<(), GraphError> {
        let node = self.nodes.get_mut(key).ok_or(GraphError::NodeNotFound)?;
        for input in &mut node.inputs {
            input.source = None;
        }
        self.recalculation_required = true;
        Ok(())
    }

    /// Whether `key`'s input `in_idx` has an upstream connection.
    pub fn is_connected(&self, key: NodeKey, in_idx: usize) -> Result<bool, GraphError> {
        let node = self.nodes.get(key).ok_or(GraphError::NodeNotFound)?;
        node.inputs
            .get(in_idx)
            .map(|i| i.source.is_some())
            .ok_or(GraphError::InputOutOfBounds(in_idx))
    }

    /// Give `key`'s input `in_idx` a fixed buffer, read whenever the
    /// input is disconnected.
    pub fn set_fixed_input(
        &mut self,
        key: NodeKey,
        in_idx: usize,
        values: &[f64],
    ) -> Result<(), GraphError> {
        let node = self.nodes.get_mut(key).ok_or(GraphError::NodeNotFound)?;
        if in_idx >= node.inputs.len() {
            return Err(GraphError::InputOutOfBounds(in_idx));
        }
        node.inputs[in_idx].fixed = Some(values.into());
        Ok(())
    }

    /// Set the sampling rate; non-positive values fall back to 44100.
    pub fn set_sampling_rate(&mut self, sampling_rate: f64) {
        let sampling_rate = if sampling_rate > 0.0 {
            sampling_rate
        } else {
            log::warn!("non-positive sampling rate, falling back to 44100");
            44100.0
        };
        // Safety: `&mut self` means no block is running.
        unsafe { *self.rt.sampling_rate.get() = sampling_rate };
    }

    #[allow(missing_docs)]
    pub fn sampling_rate(&self) -> f64 {
        self.rt.sampling_rate()
    }

    /// Zero all runtime state: every node returns to time zero with its
    /// output memory freed.
    pub fn reset(&mut self) {
        // Rebuild first so the dependency pointers below are current.
        if self.recalculation_required {
            self.commit();
        }
        // Safety: `&mut self`, so workers are idle.
        unsafe {
            *self.rt.block_start.get() = FrameTime::ZERO;
            *self.rt.block_end.get() = FrameTime::ZERO;
        }
        self.rt.pending.store(0, Ordering::Release);
        for (_, node) in self.nodes.iter_mut() {
            node.reset(self.rt.pool());
        }
        // Re-initialize frame claims against the (unchanged) serials.
        for (_, node) in self.nodes.iter_mut() {
            let node: *mut RtNode = &mut **node;
            // Safety: exclusive access; the pointers in `in_deps` are
            // into the same arena.
            unsafe {
                for i in 0..(*node).in_deps.len() {
                    let u = (&(*node).in_deps)[i].node;
                    (&mut (*node).in_deps)[i].released_serial = (*u).outputs.serial();
                }
            }
        }
    }

    /// Frame time of a node (timestamp of its most recent frame).
    pub fn frame_time(&self, key: NodeKey) -> Option<FrameTime> {
        self.nodes.get(key).map(|n| n.frame_time)
    }

    /// Valid-until time of a node.
    pub fn valid_time(&self, key: NodeKey) -> Option<FrameTime> {
        self.nodes.get(key).map(|n| n.valid_time)
    }

    /// Time up to which a node has consumed its inputs.
    pub fn input_time(&self, key: NodeKey) -> Option<FrameTime> {
        self.nodes.get(key).map(|n| n.input_time)
    }

    /// Scratch blocks currently held by node outputs; zero between
    /// blocks when every frame has been consumed.
    pub fn live_scratch_blocks(&self) -> usize {
        self.rt.pool().live_blocks()
    }

    /// End of the last processed block (the engine's current time).
    pub fn time(&self) -> FrameTime {
        self.rt.block_end()
    }

    /// Host audio input channels the graph consumes.
    pub fn audio_ins(&self) -> usize {
        self.total_audio_ins
    }
    /// Host audio output channels the graph produces.
    pub fn audio_outs(&self) -> usize {
        self.total_audio_outs
    }

    /// Drive every node across one audio block of `vec_size` samples.
    ///
    /// `ins` and `outs` carry one slice per audio channel, assigned to
    /// audio-capable nodes in their insertion order; each slice must
    /// hold at least `vec_size` samples. Returns once every node's valid
    /// time has reached block end.
    pub fn process_block(&mut self, ins: &[&[f64]], outs: &mut [&mut [f64]], vec_size: usize) {
        assert!(vec_size > 0, "the block size must not be 0");
        if self.recalculation_required {
            self.commit();
        }
        assert!(
            ins.len() >= self.total_audio_ins,
            "host supplied {} audio input channels, graph needs {}",
            ins.len(),
            self.total_audio_ins
        );
        assert!(
            outs.len() >= self.total_audio_outs,
            "host supplied {} audio output channels, graph needs {}",
            outs.len(),
            self.total_audio_outs
        );
        for o in outs.iter_mut() {
            o[..vec_size].fill(0.0);
        }

        let core = &*self.rt;
        // Safety: `&mut self` and idle workers; the writes below happen
        // before any node runs.
        unsafe {
            *core.block_start.get() = core.block_end();
            *core.block_end.get() = core.block_start() + FrameTime::from_samples(vec_size as u64);
        }

        // Arm every node for the block. Nodes that already ran ahead of
        // this block (schedulers are free to overshoot) sit it out.
        let mut participating = 0usize;
        // Safety: nothing is running yet.
        unsafe {
            for &ptr in core.order() {
                if node::arm_for_block(ptr, core.block_end()) {
                    participating += 1;
                }
            }
        }
        if participating == 0 {
            return;
        }
        core.pending.store(participating, Ordering::Release);

        // Seed the queue with nodes that wait on nothing.
        let mut initial_depth = 0usize;
        // Safety: as above.
        unsafe {
            let _h = SpinLockHolder::new(&core.lock);
            for &ptr in core.order() {
                if (*ptr).armed && (*ptr).dep_count == 0 {
                    core.queue.push((*ptr).queue_index);
                    initial_depth += 1;
                }
            }
        }

        // Audio pre-pass: walk the audio set in chain order, handing each
        // node its channel range and delivering the block notification.
        let mut out_slices: SmallVec<[&mut [f64]; 8]> = outs
            .iter_mut()
            .map(|s| &mut s[..vec_size])
            .collect();
        for key in &self.audio_order {
            let Some(boxed) = self.nodes.get_mut(*key) else {
                continue;
            };
            let ptr: *mut RtNode = &mut **boxed;
            // Safety: exclusive access until workers are signalled.
            unsafe {
                let n_ins = (*ptr).op.audio_ins();
                let n_outs = (*ptr).op.audio_outs();
                if n_ins > 0 || n_outs > 0 {
                    let in_off = (*ptr).audio_in_offset;
                    let node_ins: SmallVec<[&[f64]; 4]> = ins[in_off..in_off + n_ins]
                        .iter()
                        .map(|s| &s[..vec_size])
                        .collect();
                    let out_off = (*ptr).audio_out_offset;
                    let node_outs = &mut out_slices[out_off..out_off + n_outs];
                    (*ptr).op.block_process(&node_ins, node_outs);
                }
                if (*ptr).requires_audio_notification() && (*ptr).armed {
                    let _h = SpinLockHolder::new(&core.lock);
                    node::dependency_decrement(ptr, core);
                    if (*ptr).dep_count == 0 {
                        initial_depth += 1;
                    }
                }
            }
        }

        // Fan out to the workers, then drain as one of them until every
        // node has reached block end.
        if let Some(workers) = &self.workers {
            workers.signal(initial_depth.min(workers.size()));
        }
        // Safety: this thread drives the block.
        unsafe {
            core.drain();
            while core.pending.load(Ordering::Acquire) > 0 {
                core.drain();
                core::hint::spin_loop();
            }
        }

        if cfg!(debug_assertions) {
            // Safety: the block is complete, nothing is running.
            unsafe {
                for &ptr in core.order() {
                    debug_assert!((*ptr).valid_time >= core.block_end());
                }
            }
        }
    }

    /// Rebuild the execution table and runtime wiring after edits.
    fn commit(&mut self) {
        let mut order: Vec<*mut RtNode> = Vec::with_capacity(self.nodes.len());
        let mut ptrs: SecondaryMap<NodeKey, *mut RtNode> = SecondaryMap::new();
        for (key, boxed) in self.nodes.iter_mut() {
            let ptr: *mut RtNode = &mut **boxed;
            ptrs.insert(key, ptr);
            order.push(ptr);
        }

        // Safety: `&mut self` gives exclusive access to every node; the
        // raw pointers all point into the arena boxes above.
        unsafe {
            for (i, &ptr) in order.iter().enumerate() {
                (*ptr).queue_index = i as u32;
                (*ptr).rt_inputs.clear();
                (*ptr).in_deps.clear();
                (*ptr).out_deps.clear();
            }
            for &ptr in &order {
                for i in 0..(*ptr).inputs.len() {
                    let rt_input = match (&(*ptr).inputs)[i].source {
                        None => RtInput {
                            source: core::ptr::null_mut(),
                            out_idx: 0,
                            dep: u32::MAX,
                        },
                        Some((src_key, out_idx)) => {
                            let u = ptrs[src_key];
                            let dep = match (*ptr).in_deps.iter().position(|d| d.node == u) {
                                Some(j) => {
                                    (&mut (*ptr).in_deps)[j].connections += 1;
                                    j
                                }
                                None => {
                                    (*ptr).in_deps.push(node::InDep {
                                        node: u,
                                        connections: 1,
                                        released_serial: (*u).outputs.serial(),
                                    });
                                    (*ptr).in_deps.len() - 1
                                }
                            };
                            match (*u).out_deps.iter().position(|d| d.node == ptr) {
                                Some(j) => (&mut (*u).out_deps)[j].connections += 1,
                                None => (*u).out_deps.push(node::OutDep {
                                    node: ptr,
                                    connections: 1,
                                }),
                            }
                            RtInput {
                                source: u,
                                out_idx,
                                dep: dep as u32,
                            }
                        }
                    };
                    (*ptr).rt_inputs.push(rt_input);
                }
            }
        }

        let mut in_off = 0;
        let mut out_off = 0;
        for key in &self.audio_order {
            let Some(&ptr) = ptrs.get(*key) else { continue };
            // Safety: as above.
            unsafe {
                (*ptr).audio_in_offset = in_off;
                (*ptr).audio_out_offset = out_off;
                in_off += (*ptr).op.audio_ins();
                out_off += (*ptr).op.audio_outs();
            }
        }
        self.total_audio_ins = in_off;
        self.total_audio_outs = out_off;

        // Safety: workers are idle and the queue is empty between blocks.
        unsafe {
            self.rt.queue.resize(order.len());
            *self.rt.order.get() = order;
        }
        self.recalculation_required = false;
    }

    /// True if `to` is reachable downstream from `from`.
    fn reaches(&self, to: NodeKey, from: NodeKey) -> bool {
        let mut visited: SecondaryMap<NodeKey, ()> = SecondaryMap::new();
        let mut frontier = vec![from];
        while let Some(current) = frontier.pop() {
            if current == to {
                return true;
            }
            if visited.insert(current, ()).is_some() {
                continue;
            }
            for (key, nd) in self.nodes.iter() {
                for input in &nd.inputs {
                    if matches!(input.source, Some((src, _)) if src == current)
                        && !visited.contains_key(key)
                    {
                        frontier.push(key);
                    }
                }
            }
        }
        false
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        // Return all held output memory before the pool is dropped. The
        // workers field drops (and joins) before the arena.
        for (_, nd) in self.nodes.iter_mut() {
            nd.outputs.free(self.rt.pool());
        }
    }
}

// Safety: the raw node pointers inside RtCore/RtNode are only used
// following the protocol in the `node` module; moving the Graph between
// threads moves ownership of the whole arena.
unsafe impl Send for Graph {}
