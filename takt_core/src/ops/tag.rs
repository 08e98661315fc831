//! Wraps a vector frame into a tagged parameter frame.

use crate::op::{FrameOp, ProcessIo};
use crate::output::OutputMode;
use takt_primitives::tagged::vector_entry_size;

/// Emits its input vector as a single-entry tagged frame under a
/// configured tag.
pub struct Tag {
    tag: String,
}

impl Tag {
    #[allow(missing_docs)]
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }
}

impl FrameOp for Tag {
    fn inputs(&self) -> usize {
        1
    }
    fn outputs(&self) -> usize {
        1
    }
    fn output_mode(&self, _idx: usize) -> OutputMode {
        OutputMode::Tagged
    }

    fn process(&mut self, io: &mut ProcessIo) {
        let input = io.input(0);
        io.request_output_bytes(0, vector_entry_size(&self.tag, input.len()));
        if !io.allocate_outputs() {
            return;
        }
        let tag = &self.tag;
        io.with_tagged(0, |w| {
            if let Err(e) = w.write_vector(tag, input) {
                log::debug!("tag output dropped: {e}");
            }
        });
    }
}
