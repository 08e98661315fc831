//! Host-to-graph frame injection.

use crate::op::{FrameOp, InputFlags, ProcessIo, UpdateIo};
use crate::output::OutputMode;
use takt_primitives::tagged::TaggedBuf;

/// A frame owned by the host side of the channel.
#[derive(Clone, Debug)]
pub enum HostFrame {
    #[allow(missing_docs)]
    Vector(Vec<f64>),
    #[allow(missing_docs)]
    Tagged(TaggedBuf),
}

/// Error returned when the inlet's ring is full.
#[derive(Debug, thiserror::Error)]
#[error("host inlet channel is full")]
pub struct InletFull(pub HostFrame);

/// Host-side sender half. May be used from any thread; sends never block.
pub struct HostInletSender {
    tx: rtrb::Producer<HostFrame>,
}

impl HostInletSender {
    /// Queue a vector frame for the next trigger.
    pub fn send_vector(&mut self, values: Vec<f64>) -> Result<(), InletFull> {
        self.send(HostFrame::Vector(values))
    }
    /// Queue a tagged frame for the next trigger.
    pub fn send_tagged(&mut self, frame: TaggedBuf) -> Result<(), InletFull> {
        self.send(HostFrame::Tagged(frame))
    }

    fn send(&mut self, frame: HostFrame) -> Result<(), InletFull> {
        self.tx.push(frame).map_err(|e| match e {
            rtrb::PushError::Full(f) => InletFull(f),
        })
    }
}

/// Emits the most recently received host frame each time it is triggered.
///
/// Frames travel over a wait-free ring; the update pass drains it on the
/// audio thread, keeping only the newest frame.
pub struct HostInlet {
    rx: rtrb::Consumer<HostFrame>,
    latest: Option<HostFrame>,
    mode: OutputMode,
}

impl HostInlet {
    /// Create an inlet emitting in the given output mode, with room for
    /// `capacity` in-flight frames.
    pub fn new(mode: OutputMode, capacity: usize) -> (Self, HostInletSender) {
        let (tx, rx) = rtrb::RingBuffer::new(capacity.max(1));
        (
            Self {
                rx,
                latest: None,
                mode,
            },
            HostInletSender { tx },
        )
    }
}

impl FrameOp for HostInlet {
    fn inputs(&self) -> usize {
        1
    }
    fn outputs(&self) -> usize {
        1
    }
    fn output_mode(&self, _idx: usize) -> OutputMode {
        self.mode
    }
    fn input_flags(&self, _idx: usize) -> InputFlags {
        InputFlags::default()
    }

    fn update(&mut self, _io: &mut UpdateIo) {
        while let Ok(frame) = self.rx.pop() {
            self.latest = Some(frame);
        }
    }

    fn process(&mut self, io: &mut ProcessIo) {
        match (&self.latest, self.mode) {
            (Some(HostFrame::Vector(values)), OutputMode::Vector) => {
                io.request_output(0, values.len());
                if !io.allocate_outputs() {
                    return;
                }
                io.output(0).copy_from_slice(values);
            }
            (Some(HostFrame::Tagged(frame)), OutputMode::Tagged) => {
                io.request_output_bytes(0, frame.len_bytes());
                if !io.allocate_outputs() {
                    return;
                }
                io.with_tagged(0, |w| {
                    if let Err(e) = w.write_all(frame.as_ref()) {
                        log::debug!("host inlet frame dropped: {e}");
                    }
                });
            }
            _ => {
                // Nothing received yet, or a frame of the wrong mode:
                // emit an empty frame.
                io.request_output(0, 0);
                let _ = io.allocate_outputs();
            }
        }
    }

    fn object_reset(&mut self) {
        self.latest = None;
        while self.rx.pop().is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_io::TestIo;

    #[test]
    fn emits_latest_received_vector() {
        let (mut op, mut tx) = HostInlet::new(OutputMode::Vector, 8);
        tx.send_vector(vec![1.0]).unwrap();
        tx.send_vector(vec![2.0, 3.0]).unwrap();
        let mut io = TestIo::new(&op);
        io.update(&mut op);
        io.process(&mut op);
        assert_eq!(io.output(0), &[2.0, 3.0]);
    }

    #[test]
    fn full_ring_reports_error() {
        let (_op, mut tx) = HostInlet::new(OutputMode::Vector, 1);
        tx.send_vector(vec![1.0]).unwrap();
        assert!(tx.send_vector(vec![2.0]).is_err());
    }

    #[test]
    fn empty_before_any_frame() {
        let (mut op, _tx) = HostInlet::new(OutputMode::Vector, 4);
        let mut io = TestIo::new(&op);
        io.update(&mut op);
        io.process(&mut op);
        assert!(io.output(0).is_empty());
    }
}
