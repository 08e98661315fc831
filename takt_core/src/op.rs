//! The operator contract.
//!
//! Every leaf operator implements [`FrameOp`]: a kind tag, an I/O shape,
//! and up to four optional behaviours (`object_reset`, `update`,
//! `process`, `schedule`) plus `block_process` for audio-capable kinds.
//! The runtime drives these through [`ProcessIo`] / [`UpdateIo`] views
//! that carry the currently valid input frames and the node's outputs.

use crate::alloc::ScratchPool;
use crate::output::{OutputMode, OutputSet};
use takt_primitives::tagged::{TaggedRef, TaggedWriter};
use takt_primitives::time::FrameTime;

/// What drives a node's timing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// Produces frames when triggered by its inputs.
    Processor,
    /// Decides its own frame times through `schedule`.
    Scheduler,
    /// Terminal node writing to host audio outputs.
    Output,
}

/// Result of one `schedule` call.
#[derive(Copy, Clone, Debug)]
pub struct SchedInfo {
    /// Relative advance to the next frame boundary.
    pub time_advance: FrameTime,
    /// Whether a frame should be produced now.
    pub new_frame: bool,
    /// Whether the current frame is final.
    pub output_done: bool,
}

impl SchedInfo {
    #[allow(missing_docs)]
    pub fn new(time_advance: FrameTime, new_frame: bool, output_done: bool) -> Self {
        Self {
            time_advance,
            new_frame,
            output_done,
        }
    }
    /// No advance, no frame.
    pub fn nothing() -> Self {
        Self::new(FrameTime::ZERO, false, false)
    }
}

/// Construction-time flags of one input.
#[derive(Copy, Clone, Debug)]
pub struct InputFlags {
    /// The input participates in the update pass.
    pub update: bool,
    /// The input's frames trigger the node.
    pub trigger: bool,
    /// The input may be re-pointed between frames.
    pub switchable: bool,
}

impl Default for InputFlags {
    fn default() -> Self {
        Self {
            update: false,
            trigger: true,
            switchable: false,
        }
    }
}

impl InputFlags {
    /// A non-triggering input (parameter-style).
    pub fn no_trigger() -> Self {
        Self {
            trigger: false,
            ..Self::default()
        }
    }
}

/// Raw descriptor of one currently valid input frame, captured by the
/// runtime before an operator runs.
#[derive(Copy, Clone, Debug)]
pub struct InputFrame {
    ptr: *const u8,
    bytes: usize,
    mode: OutputMode,
}

impl InputFrame {
    /// An absent frame.
    pub fn empty() -> Self {
        Self {
            ptr: core::ptr::NonNull::dangling().as_ptr(),
            bytes: 0,
            mode: OutputMode::Vector,
        }
    }

    /// Describe a frame by raw pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must stay valid for reads of `bytes` bytes, 8-aligned for
    /// vector mode, for as long as this descriptor is read through.
    pub unsafe fn from_raw(ptr: *const u8, bytes: usize, mode: OutputMode) -> Self {
        Self { ptr, bytes, mode }
    }

    /// Read the frame as f64s with a caller-chosen lifetime.
    ///
    /// Safety relies on the `from_raw` contract: the io views only hand
    /// out lifetimes bounded by the invocation the descriptor was
    /// captured for.
    fn vector<'b>(&self) -> &'b [f64] {
        if self.mode != OutputMode::Vector || self.bytes == 0 {
            return &[];
        }
        unsafe { core::slice::from_raw_parts(self.ptr as *const f64, self.bytes / 8) }
    }

    fn tagged<'b>(&self) -> Option<TaggedRef<'b>> {
        if self.mode != OutputMode::Tagged || self.bytes == 0 {
            return None;
        }
        Some(TaggedRef::new(unsafe {
            core::slice::from_raw_parts(self.ptr, self.bytes)
        }))
    }
}

/// Timing context for one operator invocation.
#[derive(Copy, Clone, Debug)]
pub struct IoTiming {
    #[allow(missing_docs)]
    pub sampling_rate: f64,
    /// The node's frame time for this invocation.
    pub frame_time: FrameTime,
    /// The node's valid-until time before this invocation.
    pub valid_time: FrameTime,
    #[allow(missing_docs)]
    pub block_start: FrameTime,
    #[allow(missing_docs)]
    pub block_end: FrameTime,
}

/// View handed to `process` and `schedule`.
pub struct ProcessIo<'a> {
    timing: IoTiming,
    inputs: &'a [InputFrame],
    outputs: &'a mut OutputSet,
    pool: &'a ScratchPool,
}

impl<'a> ProcessIo<'a> {
    /// Assemble a view for one invocation. Used by the runtime and by
    /// operator unit tests.
    pub fn new(
        timing: IoTiming,
        inputs: &'a [InputFrame],
        outputs: &'a mut OutputSet,
        pool: &'a ScratchPool,
    ) -> Self {
        Self {
            timing,
            inputs,
            outputs,
            pool,
        }
    }

    #[allow(missing_docs)]
    pub fn sampling_rate(&self) -> f64 {
        self.timing.sampling_rate
    }
    #[allow(missing_docs)]
    pub fn frame_time(&self) -> FrameTime {
        self.timing.frame_time
    }
    #[allow(missing_docs)]
    pub fn valid_time(&self) -> FrameTime {
        self.timing.valid_time
    }
    #[allow(missing_docs)]
    pub fn block_start(&self) -> FrameTime {
        self.timing.block_start
    }
    #[allow(missing_docs)]
    pub fn block_end(&self) -> FrameTime {
        self.timing.block_end
    }

    #[allow(missing_docs)]
    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    /// The vector payload of input `idx`; empty when absent or tagged.
    /// The slice outlives `&self` borrows so inputs can be read while
    /// outputs are written.
    pub fn input(&self, idx: usize) -> &'a [f64] {
        self.inputs[idx].vector()
    }

    /// Number of values in input `idx`.
    pub fn input_len(&self, idx: usize) -> usize {
        self.input(idx).len()
    }

    /// The tagged payload of input `idx`, if present.
    pub fn input_tagged(&self, idx: usize) -> Option<TaggedRef<'a>> {
        self.inputs[idx].tagged()
    }

    /// Request `values` f64s for vector output `idx`.
    pub fn request_output(&mut self, idx: usize, values: usize) {
        self.outputs.request_bytes(idx, values * 8);
    }

    /// Request `bytes` for tagged output `idx`.
    pub fn request_output_bytes(&mut self, idx: usize, bytes: usize) {
        self.outputs.request_bytes(idx, bytes);
    }

    /// Perform the single scratch allocation for all requested outputs.
    /// On failure the outputs are zero-sized and processing should be
    /// skipped.
    #[must_use]
    pub fn allocate_outputs(&mut self) -> bool {
        self.outputs.allocate(self.pool)
    }

    /// Mutable access to vector output `idx` after allocation.
    pub fn output(&mut self, idx: usize) -> &mut [f64] {
        self.outputs.vector_mut(idx)
    }

    /// Write tagged output `idx` after allocation.
    pub fn with_tagged<R>(&mut self, idx: usize, f: impl FnOnce(&mut TaggedWriter) -> R) -> R {
        self.outputs.with_tagged(idx, f)
    }
}

/// View handed to `update`: read access to inputs plus trigger
/// reclassification for the coming frame.
pub struct UpdateIo<'a> {
    inputs: &'a [InputFrame],
    triggers: &'a mut [bool],
}

impl<'a> UpdateIo<'a> {
    #[allow(missing_docs)]
    pub fn new(inputs: &'a [InputFrame], triggers: &'a mut [bool]) -> Self {
        Self { inputs, triggers }
    }

    /// The vector payload of input `idx`; empty when absent or tagged.
    pub fn input(&self, idx: usize) -> &'a [f64] {
        self.inputs[idx].vector()
    }

    /// The tagged payload of input `idx`, if present.
    pub fn input_tagged(&self, idx: usize) -> Option<TaggedRef<'a>> {
        self.inputs[idx].tagged()
    }

    /// Whether input `idx` currently triggers the node.
    pub fn is_trigger(&self, idx: usize) -> bool {
        self.triggers[idx]
    }

    /// Reclassify input `idx` for this frame.
    pub fn set_trigger(&mut self, idx: usize, trigger: bool) {
        self.triggers[idx] = trigger;
    }
}

/// The behaviours a node exposes to the runtime.
///
/// `process` is the frame hook for processor and output kinds; `schedule`
/// for schedulers. The unused hook keeps its default. `block_process` is
/// only called on operators reporting audio channels.
pub trait FrameOp: Send {
    /// The node kind this operator drives.
    fn kind(&self) -> NodeKind {
        NodeKind::Processor
    }
    /// Number of frame inputs.
    fn inputs(&self) -> usize;
    /// Number of frame outputs.
    fn outputs(&self) -> usize;
    /// Mode of output `idx`.
    fn output_mode(&self, _idx: usize) -> OutputMode {
        OutputMode::Vector
    }
    /// Construction-time flags of input `idx`.
    fn input_flags(&self, _idx: usize) -> InputFlags {
        InputFlags::default()
    }
    /// Host audio input channels consumed by `block_process`.
    fn audio_ins(&self) -> usize {
        0
    }
    /// Host audio output channels written by `block_process`.
    fn audio_outs(&self) -> usize {
        0
    }
    /// Whether the operator takes part in per-block audio handling.
    fn handles_audio(&self) -> bool {
        self.kind() == NodeKind::Scheduler || self.audio_ins() > 0 || self.audio_outs() > 0
    }

    /// Zero internal state on engine reset.
    fn object_reset(&mut self) {}

    /// Pre-pass before `process`/`schedule`; may reclassify triggers.
    fn update(&mut self, _io: &mut UpdateIo) {}

    /// Produce one output frame from the currently valid input frames.
    fn process(&mut self, _io: &mut ProcessIo) {}

    /// Decide the advance to the next frame boundary. `new_frame` reports
    /// whether the previous iteration emitted a frame; `no_output` that
    /// output production is suppressed for this node.
    fn schedule(&mut self, _io: &mut ProcessIo, _new_frame: bool, _no_output: bool) -> SchedInfo {
        SchedInfo::nothing()
    }

    /// Per-block audio hook for audio-capable operators. Slices are the
    /// node's own channel ranges of the host block.
    fn block_process(&mut self, _ins: &[&[f64]], _outs: &mut [&mut [f64]]) {}
}
