//! Ramp generator.

use crate::op::{FrameOp, ProcessIo};

/// Where a [`Count`] takes its output length from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CountLength {
    /// A fixed number of values.
    Requested(usize),
    /// The length of the triggering input frame.
    Input,
}

/// Outputs the values `0..n-1` each time it is triggered.
pub struct Count {
    length: CountLength,
}

impl Count {
    #[allow(missing_docs)]
    pub fn new(length: CountLength) -> Self {
        Self { length }
    }
}

impl FrameOp for Count {
    fn inputs(&self) -> usize {
        1
    }
    fn outputs(&self) -> usize {
        1
    }

    fn process(&mut self, io: &mut ProcessIo) {
        let size = match self.length {
            CountLength::Requested(n) => n,
            CountLength::Input => io.input_len(0),
        };
        io.request_output(0, size);
        if !io.allocate_outputs() {
            return;
        }
        for (i, v) in io.output(0).iter_mut().enumerate() {
            *v = i as f64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_io::TestIo;

    #[test]
    fn counts_to_requested_length() {
        let mut op = Count::new(CountLength::Requested(4));
        let mut io = TestIo::new(&op);
        io.process(&mut op);
        assert_eq!(io.output(0), &[0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn follows_input_length() {
        let mut op = Count::new(CountLength::Input);
        let mut io = TestIo::new(&op);
        io.set_input(0, &[9.0, 9.0]);
        io.process(&mut op);
        assert_eq!(io.output(0), &[0.0, 1.0]);
    }
}
