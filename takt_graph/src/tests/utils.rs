//! Shared operators and helpers for the graph tests.

use std::sync::{Arc, Mutex};
use takt_core::{FrameOp, ProcessIo};
use takt_primitives::FrameTime;

/// A frame observed by a [`Capture`] node.
#[derive(Clone, Debug, PartialEq)]
pub struct CapturedFrame {
    pub time: FrameTime,
    pub values: Vec<f64>,
}

/// Log shared between a [`Capture`] node and the test.
pub type CaptureLog = Arc<Mutex<Vec<CapturedFrame>>>;

/// Terminal test node recording every frame it is triggered with.
pub struct Capture {
    log: CaptureLog,
}

impl Capture {
    pub fn new() -> (Self, CaptureLog) {
        let log: CaptureLog = Arc::new(Mutex::new(Vec::new()));
        (Self { log: log.clone() }, log)
    }
}

impl FrameOp for Capture {
    fn inputs(&self) -> usize {
        1
    }
    fn outputs(&self) -> usize {
        0
    }

    fn process(&mut self, io: &mut ProcessIo) {
        self.log.lock().unwrap().push(CapturedFrame {
            time: io.frame_time(),
            values: io.input(0).to_vec(),
        });
    }
}

/// Frame times of every captured frame, in capture order.
pub fn times(log: &CaptureLog) -> Vec<FrameTime> {
    log.lock().unwrap().iter().map(|f| f.time).collect()
}

/// Values of the only captured frame; panics unless exactly one frame
/// was captured.
pub fn single_frame(log: &CaptureLog) -> CapturedFrame {
    let frames = log.lock().unwrap();
    assert_eq!(frames.len(), 1, "expected exactly one captured frame");
    frames[0].clone()
}
