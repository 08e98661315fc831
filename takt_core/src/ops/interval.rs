//! Regular-interval scheduler.

use crate::op::{FrameOp, NodeKind, ProcessIo, SchedInfo};
use takt_primitives::time::FrameTime;

/// Unit of an [`Interval`]'s period.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum TimeUnit {
    #[allow(missing_docs)]
    #[default]
    Samples,
    #[allow(missing_docs)]
    Milliseconds,
    #[allow(missing_docs)]
    Seconds,
}

/// Schedules one empty trigger frame every `interval`.
pub struct Interval {
    interval: f64,
    unit: TimeUnit,
}

impl Interval {
    #[allow(missing_docs)]
    pub fn new(interval: f64, unit: TimeUnit) -> Self {
        Self { interval, unit }
    }
}

impl FrameOp for Interval {
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
        let sr = io.sampling_rate();
        let advance = match self.unit {
            TimeUnit::Samples => FrameTime::from_samples_f64(self.interval),
            TimeUnit::Milliseconds => FrameTime::from_ms_f64(self.interval, sr),
            TimeUnit::Seconds => FrameTime::from_secs_f64(self.interval, sr),
        };
        // A non-positive interval would stall the clock.
        let advance = if advance.is_zero() {
            FrameTime::from_samples(1)
        } else {
            advance
        };
        SchedInfo::new(advance, true, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_io::TestIo;

    #[test]
    fn advances_by_its_interval() {
        let mut op = Interval::new(32.0, TimeUnit::Samples);
        let mut io = TestIo::new(&op);
        let info = io.schedule(&mut op, false, false);
        assert_eq!(info.time_advance, FrameTime::from_samples(32));
        assert!(info.new_frame);
        assert!(info.output_done);
    }

    #[test]
    fn converts_units_at_the_sampling_rate() {
        let mut op = Interval::new(250.0, TimeUnit::Milliseconds);
        let mut io = TestIo::new(&op);
        io.timing.sampling_rate = 48000.0;
        let info = io.schedule(&mut op, false, false);
        assert_eq!(info.time_advance, FrameTime::from_samples(12000));
    }

    #[test]
    fn zero_interval_is_clamped() {
        let mut op = Interval::new(0.0, TimeUnit::Samples);
        let mut io = TestIo::new(&op);
        let info = io.schedule(&mut op, false, false);
        assert_eq!(info.time_advance, FrameTime::from_samples(1));
    }
}
