//! Once-per-block scheduler.

use crate::op::{FrameOp, NodeKind, ProcessIo, SchedInfo};

/// Schedules one empty frame at the start of each host audio block.
pub struct PerBlock;

impl FrameOp for PerBlock {
    fn kind(&self) -> NodeKind {
        NodeKind::Scheduler
    }
    fn inputs(&self) -> usize {
        0
    }
    fn outputs(&self) -> usize {
        1
    }

    fn schedule(&mut self, io: &mut ProcessIo, _new_frame: bool, _no_output: bool) -> SchedInfo {
        SchedInfo::new(
            io.block_end().saturating_sub(io.valid_time()),
            true,
            true,
        )
    }
}
