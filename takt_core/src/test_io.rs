//! Minimal harness for driving a [`FrameOp`] outside the engine, for
//! operator unit tests.

use crate::alloc::ScratchPool;
use crate::op::{FrameOp, InputFrame, IoTiming, ProcessIo, SchedInfo, UpdateIo};
use crate::output::{OutputMode, OutputSet};
use takt_primitives::tagged::TaggedRef;
use takt_primitives::time::FrameTime;

pub(crate) struct TestIo {
    pool: ScratchPool,
    inputs: Vec<Vec<f64>>,
    pub triggers: Vec<bool>,
    outputs: OutputSet,
    pub timing: IoTiming,
}

impl TestIo {
    pub fn new(op: &dyn FrameOp) -> Self {
        Self {
            pool: ScratchPool::new(),
            inputs: vec![Vec::new(); op.inputs()],
            triggers: (0..op.inputs()).map(|i| op.input_flags(i).trigger).collect(),
            outputs: OutputSet::new((0..op.outputs()).map(|i| op.output_mode(i))),
            timing: IoTiming {
                sampling_rate: 44100.0,
                frame_time: FrameTime::ZERO,
                valid_time: FrameTime::ZERO,
                block_start: FrameTime::ZERO,
                block_end: FrameTime::from_samples(64),
            },
        }
    }

    pub fn set_input(&mut self, idx: usize, values: &[f64]) {
        self.inputs[idx] = values.to_vec();
    }

    fn frames(&self) -> Vec<InputFrame> {
        self.inputs
            .iter()
            .map(|v| {
                if v.is_empty() {
                    InputFrame::empty()
                } else {
                    // Safety: the Vec outlives every use of the frame
                    // within this harness call.
                    unsafe {
                        InputFrame::from_raw(v.as_ptr() as *const u8, v.len() * 8, OutputMode::Vector)
                    }
                }
            })
            .collect()
    }

    pub fn update(&mut self, op: &mut impl FrameOp) {
        let frames = self.frames();
        let mut io = UpdateIo::new(&frames, &mut self.triggers);
        op.update(&mut io);
    }

    pub fn process(&mut self, op: &mut impl FrameOp) {
        let frames = self.frames();
        let mut io = ProcessIo::new(self.timing, &frames, &mut self.outputs, &self.pool);
        op.process(&mut io);
    }

    pub fn schedule(&mut self, op: &mut impl FrameOp, new_frame: bool, no_output: bool) -> SchedInfo {
        let frames = self.frames();
        let mut io = ProcessIo::new(self.timing, &frames, &mut self.outputs, &self.pool);
        op.schedule(&mut io, new_frame, no_output)
    }

    pub fn output(&self, idx: usize) -> &[f64] {
        self.outputs.vector(idx)
    }

    pub fn output_tagged(&self, idx: usize) -> Option<TaggedRef<'_>> {
        self.outputs.tagged(idx)
    }
}

impl Drop for TestIo {
    fn drop(&mut self) {
        self.outputs.free(&self.pool);
    }
}
