//! The per-node timing state machine.
//!
//! A node popped from the ready queue runs iterations until it either
//! completes the block (`VT >= block_end`) or must wait. Frame payload
//! work (`update`/`process`/`schedule`) runs outside the engine lock;
//! every read or write of cross-thread metadata (times, counters,
//! arming, output records) happens under it.
//!
//! # Locking and aliasing protocol
//!
//! - A node is run by exactly one thread at a time: its dependency count
//!   reaches zero exactly once per arming.
//! - Other threads touch a node only through raw-pointer field
//!   projections, under the engine lock, and only the metadata fields.
//!   No reference to a whole `RtNode` is ever created while it may be
//!   running.
//! - A node's output records are mutated either by its runner between
//!   `producing = true/false` markers, or by the last consumer freeing
//!   them under the lock. Consumers skip metadata of a producing node.
//! - Payload pointers captured from an upstream stay valid through the
//!   consumer's processing because the consumer holds an unreleased
//!   claim on that frame (`released_serial`), which keeps the upstream's
//!   memory count above zero.

use crate::graph::{NodeKey, RtCore};
use crate::sync::SpinLockHolder;
use core::sync::atomic::Ordering;
use ecow::EcoString;
use smallvec::SmallVec;
use takt_core::{
    FrameOp, InputFlags, InputFrame, IoTiming, NodeKind, OutputMode, OutputSet, ProcessIo,
    ScratchPool, UpdateIo,
};
use takt_primitives::FrameTime;

/// Edit-level record of one input.
pub(crate) struct Input {
    pub source: Option<(NodeKey, u16)>,
    pub fixed: Option<Box<[f64]>>,
    pub flags: InputFlags,
}

/// Runtime-resolved input connection. Rebuilt whenever the graph
/// changes.
pub(crate) struct RtInput {
    /// Null when the input is disconnected.
    pub source: *mut RtNode,
    pub out_idx: u16,
    /// Index into the owning node's `in_deps`; `u32::MAX` when
    /// disconnected.
    pub dep: u32,
}

/// One distinct upstream node, with the number of connections from it.
pub(crate) struct InDep {
    pub node: *mut RtNode,
    pub connections: u32,
    /// Serial of the last upstream frame this node has released.
    pub released_serial: u64,
}

/// One distinct downstream node, with the number of connections to it.
pub(crate) struct OutDep {
    pub node: *mut RtNode,
    pub connections: u32,
}

pub(crate) struct RtNode {
    pub name: EcoString,
    pub kind: NodeKind,
    pub op: Box<dyn FrameOp>,

    // Edit-side I/O state.
    pub inputs: Vec<Input>,
    /// Live trigger flags; `update` may reclassify them and the change
    /// persists, as with the construction-time flags.
    pub triggers: Vec<bool>,
    pub outputs: OutputSet,

    // Runtime wiring, rebuilt on commit.
    pub rt_inputs: Vec<RtInput>,
    pub in_deps: SmallVec<[InDep; 4]>,
    pub out_deps: SmallVec<[OutDep; 4]>,
    pub queue_index: u32,
    pub audio_in_offset: usize,
    pub audio_out_offset: usize,

    // Timing and dependency state (cross-thread: engine lock only).
    pub frame_time: FrameTime,
    pub valid_time: FrameTime,
    pub input_time: FrameTime,
    pub dep_count: i32,
    pub memory_count: u32,
    pub armed: bool,
    pub producing: bool,
    /// Armed waiting for consumers to catch up to `valid_time`.
    pub waiting_acks: bool,
    pub produced_frame: bool,
    pub output_done: bool,
}

impl RtNode {
    pub fn new(name: EcoString, op: Box<dyn FrameOp>) -> Self {
        let kind = op.kind();
        let inputs: Vec<Input> = (0..op.inputs())
            .map(|i| Input {
                source: None,
                fixed: None,
                flags: op.input_flags(i),
            })
            .collect();
        let triggers = inputs.iter().map(|i| i.flags.trigger).collect();
        let outputs = OutputSet::new((0..op.outputs()).map(|i| op.output_mode(i)));
        Self {
            name,
            kind,
            inputs,
            triggers,
            outputs,
            op,
            rt_inputs: Vec::new(),
            in_deps: SmallVec::new(),
            out_deps: SmallVec::new(),
            queue_index: 0,
            audio_in_offset: 0,
            audio_out_offset: 0,
            frame_time: FrameTime::ZERO,
            valid_time: FrameTime::ZERO,
            input_time: FrameTime::ZERO,
            dep_count: 0,
            memory_count: 0,
            armed: false,
            producing: false,
            waiting_acks: false,
            produced_frame: false,
            output_done: false,
        }
    }

    /// Schedulers and audio-input nodes are notified from the audio
    /// thread at each block start.
    pub fn requires_audio_notification(&self) -> bool {
        self.kind == NodeKind::Scheduler || self.op.audio_ins() > 0
    }

    /// Zero all timing state and free held output memory.
    pub fn reset(&mut self, pool: &ScratchPool) {
        self.frame_time = FrameTime::ZERO;
        self.valid_time = FrameTime::ZERO;
        self.input_time = FrameTime::ZERO;
        self.dep_count = 0;
        self.memory_count = 0;
        self.armed = false;
        self.producing = false;
        self.waiting_acks = false;
        self.produced_frame = false;
        self.output_done = false;
        self.outputs.free(pool);
        for (i, input) in self.inputs.iter().enumerate() {
            self.triggers[i] = input.flags.trigger;
        }
        self.op.object_reset();
    }
}

// Safety: RtNode is moved between threads only as part of the execution
// table; all concurrent access follows the protocol in the module docs.
unsafe impl Send for RtNode {}

/// Run a node popped from the ready queue (or seeded by the driver)
/// until it blocks or completes the block.
///
/// # Safety
///
/// `node` must point into the live execution table and the caller must
/// be its exclusive runner. The engine lock must not be held.
pub(crate) unsafe fn run_ready(node: *mut RtNode, core: &RtCore) {
    unsafe {
        {
            let _h = SpinLockHolder::new(&core.lock);
            (*node).armed = false;
        }
        loop {
            match (*node).kind {
                NodeKind::Scheduler => scheduler_iteration(node, core),
                NodeKind::Processor | NodeKind::Output => processor_iteration(node, core),
            }
            if rearm(node, core) {
                return;
            }
        }
    }
}

/// One scheduler step: let `schedule` pick the advance, produce a frame
/// at the current valid time if requested, then publish.
unsafe fn scheduler_iteration(node: *mut RtNode, core: &RtCore) {
    unsafe {
        let frames = capture_inputs(node, core);
        {
            let mut io = UpdateIo::new(&frames, &mut (*node).triggers);
            (*node).op.update(&mut io);
        }
        let (timing, produced_last) = {
            let _h = SpinLockHolder::new(&core.lock);
            (*node).producing = true;
            (
                IoTiming {
                    sampling_rate: core.sampling_rate(),
                    frame_time: (*node).frame_time,
                    valid_time: (*node).valid_time,
                    block_start: core.block_start(),
                    block_end: core.block_end(),
                },
                (*node).produced_frame,
            )
        };
        let no_output = (*node).outputs.is_empty();
        let info = {
            let mut io = ProcessIo::new(timing, &frames, &mut (*node).outputs, core.pool());
            (*node).op.schedule(&mut io, produced_last, no_output)
        };
        // The advance is not clipped to the block: a scheduler may run
        // ahead, and resumes from there in later blocks, keeping
        // fractional intervals on their exact grid.
        let mut advance = info.time_advance;
        let new_frame = info.new_frame;
        if advance.is_zero() {
            // A zero advance would stall the block; park until its end.
            log::debug!(
                "scheduler `{}` advanced zero time, parking until block end",
                (*node).name
            );
            advance = timing.block_end.saturating_sub(timing.valid_time);
        }
        let frame_at = timing.valid_time;
        if new_frame {
            let timing = IoTiming {
                frame_time: frame_at,
                ..timing
            };
            let mut io = ProcessIo::new(timing, &frames, &mut (*node).outputs, core.pool());
            (*node).op.process(&mut io);
        }
        (*node).produced_frame = new_frame;

        let _h = SpinLockHolder::new(&core.lock);
        let prev_vt = (*node).valid_time;
        if new_frame {
            (*node).frame_time = frame_at;
        }
        (*node).valid_time = prev_vt + advance;
        (*node).output_done = info.output_done;
        (*node).producing = false;
        if new_frame {
            publish_memory(node, core);
        }
        release_and_ack(node, prev_vt, core);
        notify_dependents(node, prev_vt, (*node).valid_time, core);
    }
}

/// One processor step: advance the valid time to the minimum over
/// connected inputs, fire `process` when a triggering frame falls in the
/// newly valid span.
unsafe fn processor_iteration(node: *mut RtNode, core: &RtCore) {
    unsafe {
        let frames = capture_inputs(node, core);
        {
            let mut io = UpdateIo::new(&frames, &mut (*node).triggers);
            (*node).op.update(&mut io);
        }

        // Fire decision and a fresh input capture under one lock so the
        // decision and the captured frames agree.
        let (prev_vt, vt_new, fire) = {
            let _h = SpinLockHolder::new(&core.lock);
            let prev_vt = (*node).valid_time;
            let mut vt_new = core.block_end();
            for dep in &(*node).in_deps {
                vt_new = vt_new.min((*dep.node).valid_time);
            }
            debug_assert!(vt_new > prev_vt, "node ran without any progress possible");

            // The frame time is the minimum over triggering upstream
            // frame times, restricted to frames not yet consumed
            // (earlier ones fired in a previous window). A candidate at
            // or past the window end is an upstream running ahead;
            // skipped for this iteration.
            let mut any_trigger = false;
            let mut candidate: Option<FrameTime> = None;
            for (i, ri) in (*node).rt_inputs.iter().enumerate() {
                if ri.source.is_null() || !(&(*node).triggers)[i] {
                    continue;
                }
                any_trigger = true;
                let ft = (*ri.source).frame_time;
                if ft < prev_vt {
                    continue;
                }
                candidate = Some(match candidate {
                    Some(c) => c.min(ft),
                    None => ft,
                });
            }
            // With no connected trigger at all the node's own frame time
            // stands: a constant source fires once, when time zero is in
            // the window.
            let frame_at = match candidate {
                Some(ft) => Some(ft),
                None if !any_trigger && (*node).frame_time >= prev_vt => {
                    Some((*node).frame_time)
                }
                None => None,
            };
            let fire = match frame_at {
                Some(at) if at < vt_new => {
                    (*node).producing = true;
                    Some((at, capture_inputs_locked(node)))
                }
                _ => None,
            };
            (prev_vt, vt_new, fire)
        };

        let fired = if let Some((frame_at, frames)) = fire {
            let timing = IoTiming {
                sampling_rate: core.sampling_rate(),
                frame_time: frame_at,
                valid_time: prev_vt,
                block_start: core.block_start(),
                block_end: core.block_end(),
            };
            {
                let mut io = ProcessIo::new(timing, &frames, &mut (*node).outputs, core.pool());
                (*node).op.process(&mut io);
            }
            Some(frame_at)
        } else {
            None
        };

        let _h = SpinLockHolder::new(&core.lock);
        if let Some(frame_at) = fired {
            (*node).frame_time = frame_at;
            (*node).producing = false;
            publish_memory(node, core);
        }
        (*node).valid_time = vt_new;
        (*node).input_time = vt_new;
        release_and_ack(node, prev_vt, core);
        notify_dependents(node, prev_vt, vt_new, core);
    }
}

/// The events a node must wait for before its next iteration: producers
/// still behind it (input waits), consumers still behind it (pending
/// acknowledgements), and the per-block audio notification.
///
/// The acknowledgement waits are what pace a producer to its consumers:
/// no frame is replaced before every dependent has moved past the frame
/// before it.
///
/// Caller holds the engine lock (or is the driver between blocks).
unsafe fn waiting_set(node: *mut RtNode, with_audio: bool) -> i32 {
    unsafe {
        let vt = (*node).valid_time;
        let mut waits = 0;
        if with_audio && (*node).requires_audio_notification() {
            waits += 1;
        }
        let mut pending_acks = 0;
        for dep in &(*node).out_deps {
            if (*dep.node).valid_time < vt {
                pending_acks += 1;
            }
        }
        (*node).waiting_acks = pending_acks > 0;
        waits += pending_acks;
        if (*node).kind != NodeKind::Scheduler {
            for dep in &(*node).in_deps {
                if (*dep.node).valid_time <= vt {
                    waits += 1;
                }
            }
        }
        waits
    }
}

/// Arm a node for a new block. Returns false when the node is already
/// past block end and sits this block out.
///
/// # Safety
///
/// Driver only, between the block window update and the worker signal.
pub(crate) unsafe fn arm_for_block(node: *mut RtNode, block_end: FrameTime) -> bool {
    unsafe {
        if (*node).valid_time >= block_end {
            (*node).armed = false;
            (*node).waiting_acks = false;
            return false;
        }
        (*node).dep_count = waiting_set(node, true);
        (*node).armed = true;
        true
    }
}

/// Recompute the waiting set after an iteration. Returns true when the
/// node blocked or completed the block; false when it can iterate again
/// immediately.
unsafe fn rearm(node: *mut RtNode, core: &RtCore) -> bool {
    unsafe {
        let _h = SpinLockHolder::new(&core.lock);
        let vt = (*node).valid_time;
        if vt >= core.block_end() {
            (*node).armed = false;
            core.pending.fetch_sub(1, Ordering::AcqRel);
            return true;
        }
        // The audio notification arrived before this run.
        let waits = waiting_set(node, false);
        if waits == 0 {
            return false;
        }
        (*node).dep_count = waits;
        (*node).armed = true;
        true
    }
}

/// Set the memory count of a freshly produced frame; frames nobody will
/// consume are freed immediately.
unsafe fn publish_memory(node: *mut RtNode, core: &RtCore) {
    unsafe {
        if !(*node).outputs.has_memory() {
            (*node).memory_count = 0;
            return;
        }
        let consumers = (*node).out_deps.len() as u32;
        if consumers == 0 {
            (*node).outputs.free(core.pool());
            (*node).memory_count = 0;
        } else {
            (*node).memory_count = consumers;
        }
    }
}

/// After an advance from `prev_vt` to `vt`: release every upstream
/// frame this node has fully consumed, and acknowledge each producer
/// whose valid time the advance just crossed so a waiting producer can
/// move on. Memory release rides the same crossing: the last consumer
/// to cross frees the upstream's scratch block.
unsafe fn release_and_ack(node: *mut RtNode, prev_vt: FrameTime, core: &RtCore) {
    unsafe {
        let vt = (*node).valid_time;
        for i in 0..(*node).in_deps.len() {
            let u = (&(*node).in_deps)[i].node;
            if (*u).producing {
                // Mid-production metadata is unstable; a producing
                // upstream is not armed and holds no claim of ours.
                continue;
            }
            let uvt = (*u).valid_time;
            let serial = (*u).outputs.serial();
            if (&(*node).in_deps)[i].released_serial != serial && vt >= uvt {
                (&mut (*node).in_deps)[i].released_serial = serial;
                if (*u).outputs.has_memory() {
                    debug_assert!((*u).memory_count > 0);
                    (*u).memory_count -= 1;
                    if (*u).memory_count == 0 {
                        (*u).outputs.free(core.pool());
                    }
                }
            }
            if prev_vt < uvt && vt >= uvt && (*u).armed && (*u).waiting_acks {
                dependency_decrement(u, core);
            }
        }
    }
}

/// Wake armed dependents whose valid time the advance just crossed.
unsafe fn notify_dependents(
    node: *mut RtNode,
    prev_vt: FrameTime,
    new_vt: FrameTime,
    core: &RtCore,
) {
    unsafe {
        if prev_vt == new_vt {
            return;
        }
        for dep in &(*node).out_deps {
            let d = dep.node;
            // Schedulers never wait on upstream advances.
            if (*d).kind == NodeKind::Scheduler || !(*d).armed {
                continue;
            }
            let dvt = (*d).valid_time;
            if dvt >= prev_vt && dvt < new_vt {
                dependency_decrement(d, core);
            }
        }
    }
}

/// Decrement a waiter's dependency count, pushing it when it reaches
/// zero. Caller holds the engine lock and has established that the
/// waiter counted this event.
pub(crate) unsafe fn dependency_decrement(node: *mut RtNode, core: &RtCore) {
    unsafe {
        (*node).dep_count -= 1;
        debug_assert!((*node).dep_count >= 0);
        if (*node).dep_count == 0 {
            core.queue.push((*node).queue_index);
        }
    }
}

/// Capture the currently valid input frames under the engine lock.
unsafe fn capture_inputs(node: *mut RtNode, core: &RtCore) -> SmallVec<[InputFrame; 4]> {
    unsafe {
        let _h = SpinLockHolder::new(&core.lock);
        capture_inputs_locked(node)
    }
}

/// As [`capture_inputs`], with the lock already held.
unsafe fn capture_inputs_locked(node: *mut RtNode) -> SmallVec<[InputFrame; 4]> {
    unsafe {
        let mut frames = SmallVec::with_capacity((*node).rt_inputs.len());
        for (i, ri) in (*node).rt_inputs.iter().enumerate() {
            if ri.source.is_null() {
                frames.push(match &(&(*node).inputs)[i].fixed {
                    // Safety: the fixed buffer is owned by the node and
                    // only replaced while the driver is quiescent.
                    Some(buf) => InputFrame::from_raw(
                        buf.as_ptr() as *const u8,
                        buf.len() * 8,
                        OutputMode::Vector,
                    ),
                    None => InputFrame::empty(),
                });
                continue;
            }
            let u = ri.source;
            let frame = if (*u).producing {
                InputFrame::empty()
            } else {
                let serial = (*u).outputs.serial();
                if (&(*node).in_deps)[ri.dep as usize].released_serial == serial {
                    // Claim already spent: the frame is gone for us.
                    InputFrame::empty()
                } else {
                    let (ptr, bytes, mode) = (*u).outputs.raw(ri.out_idx as usize);
                    // Safety: our unreleased claim keeps the upstream's
                    // memory count above zero until we release after
                    // processing.
                    InputFrame::from_raw(ptr, bytes, mode)
                }
            };
            frames.push(frame);
        }
        frames
    }
}
