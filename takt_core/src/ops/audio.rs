//! Audio boundary operators: capture from and playback to the host block.

use crate::op::{FrameOp, NodeKind, ProcessIo};

/// Captures host audio and emits, on each trigger, the most recent
/// `length` samples as a frame.
///
/// The capture ring is filled during the block pre-pass, so a frame
/// triggered at time `t` within a block sees the block's own samples.
pub struct AudioIn {
    ring: Vec<f64>,
    /// Total samples captured; the ring holds the last `ring.len()` of them.
    written: u64,
    length: usize,
}

impl AudioIn {
    /// `length` is the emitted frame size in samples; the internal ring
    /// is sized to the next power of two of at least twice that.
    pub fn new(length: usize) -> Self {
        let cap = (length.max(1) * 2).next_power_of_two();
        Self {
            ring: vec![0.0; cap],
            written: 0,
            length,
        }
    }
}

impl FrameOp for AudioIn {
    fn inputs(&self) -> usize {
        1
    }
    fn outputs(&self) -> usize {
        1
    }
    fn audio_ins(&self) -> usize {
        1
    }

    fn block_process(&mut self, ins: &[&[f64]], _outs: &mut [&mut [f64]]) {
        let mask = self.ring.len() - 1;
        for &sample in ins[0] {
            self.ring[(self.written as usize) & mask] = sample;
            self.written += 1;
        }
    }

    fn process(&mut self, io: &mut ProcessIo) {
        io.request_output(0, self.length);
        if !io.allocate_outputs() {
            return;
        }
        let mask = self.ring.len() - 1;
        let out = io.output(0);
        for i in 0..self.length {
            // Distance back from the capture head; the frame ends at the
            // most recently captured sample.
            let back = (self.length - i) as u64;
            out[i] = if self.written >= back {
                self.ring[((self.written - back) as usize) & mask]
            } else {
                // Positions before capture began read as silence.
                0.0
            };
        }
    }

    fn object_reset(&mut self) {
        self.ring.fill(0.0);
        self.written = 0;
    }
}

/// Plays incoming frames to a host audio output channel with one block of
/// latency: frames produced during block `k` sound during block `k + 1`.
pub struct AudioOut {
    ring: Vec<f64>,
    /// Absolute sample index of the start of the current block.
    clock: u64,
    /// Length of the previous host block, for the latency window.
    last_block: usize,
}

impl AudioOut {
    /// `capacity` bounds how far ahead of the playback head a frame may
    /// reach, in samples; rounded up to a power of two.
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: vec![0.0; capacity.max(2).next_power_of_two()],
            clock: 0,
            last_block: 0,
        }
    }

    fn take(&mut self, pos: u64) -> f64 {
        let idx = (pos as usize) & (self.ring.len() - 1);
        core::mem::take(&mut self.ring[idx])
    }
}

impl FrameOp for AudioOut {
    fn kind(&self) -> NodeKind {
        NodeKind::Output
    }
    fn inputs(&self) -> usize {
        1
    }
    fn outputs(&self) -> usize {
        0
    }
    fn audio_outs(&self) -> usize {
        1
    }

    fn block_process(&mut self, _ins: &[&[f64]], outs: &mut [&mut [f64]]) {
        let len = outs[0].len();
        // Drain the previous block's positions; the first block is silent.
        let start = self.clock.saturating_sub(self.last_block as u64);
        if self.last_block > 0 {
            for i in 0..len.min(self.last_block) {
                outs[0][i] = self.take(start + i as u64);
            }
        } else {
            outs[0].fill(0.0);
        }
        self.clock += len as u64;
        self.last_block = len;
    }

    fn process(&mut self, io: &mut ProcessIo) {
        let at = io.frame_time().to_samples_round();
        let input = io.input(0);
        let horizon = self.ring.len() as u64;
        for (i, &v) in input.iter().enumerate() {
            let pos = at + i as u64;
            if pos >= self.clock + horizon {
                log::trace!("audio out frame reaches {} samples past the ring", pos - self.clock);
                break;
            }
            let idx = (pos as usize) & (self.ring.len() - 1);
            self.ring[idx] += v;
        }
    }

    fn object_reset(&mut self) {
        self.ring.fill(0.0);
        self.clock = 0;
        self.last_block = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_io::TestIo;
    use takt_primitives::time::FrameTime;

    #[test]
    fn capture_emits_recent_samples() {
        let mut op = AudioIn::new(4);
        let block: Vec<f64> = (1..=8).map(|v| v as f64).collect();
        op.block_process(&[&block], &mut []);
        let mut io = TestIo::new(&op);
        io.process(&mut op);
        assert_eq!(io.output(0), &[5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn capture_pads_with_silence_before_start() {
        let mut op = AudioIn::new(4);
        op.block_process(&[&[1.0, 2.0]], &mut []);
        let mut io = TestIo::new(&op);
        io.process(&mut op);
        assert_eq!(io.output(0), &[0.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn playback_is_one_block_late() {
        let mut op = AudioOut::new(64);
        let mut out = vec![0.0; 4];
        {
            let mut outs = [out.as_mut_slice()];
            op.block_process(&[], &mut outs);
        }
        assert_eq!(out, vec![0.0; 4]);

        // A frame at time 1 within the first block...
        let mut io = TestIo::new(&op);
        io.timing.frame_time = FrameTime::from_samples(1);
        io.set_input(0, &[0.5, 0.25]);
        io.process(&mut op);

        // ...sounds in the second block at offset 1.
        {
            let mut outs = [out.as_mut_slice()];
            op.block_process(&[], &mut outs);
        }
        assert_eq!(out, vec![0.0, 0.5, 0.25, 0.0]);
    }
}
