//! Element-wise binary operators over two input frames.

use crate::op::{FrameOp, ProcessIo, UpdateIo};

/// How input frames of unequal length are combined.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum MismatchMode {
    /// Output the length of the longer frame; the shorter frame repeats
    /// cyclically.
    #[default]
    Wrap,
    /// Output the length of the shorter frame.
    Shrink,
    /// Output the length of the longer frame; the shorter frame's final
    /// value repeats.
    Extend,
}

/// Which inputs trigger the node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum TriggerMode {
    #[allow(missing_docs)]
    #[default]
    Both,
    #[allow(missing_docs)]
    Left,
    #[allow(missing_docs)]
    Right,
}

/// The element function of a [`Binary`] operator.
pub trait BinaryVectorOp: Send + Default + 'static {
    #[allow(missing_docs)]
    fn apply(a: f64, b: f64) -> f64;
}

macro_rules! binary_ops {
    ($($name:ident => |$a:ident, $b:ident| $body:expr, $doc:literal;)*) => {
        paste::paste! {
            $(
                #[doc = $doc]
                #[derive(Default)]
                pub struct $name;
                impl BinaryVectorOp for $name {
                    fn apply($a: f64, $b: f64) -> f64 {
                        $body
                    }
                }

                #[doc = "A [`Binary`] node applying [`" $name "`]."]
                pub type [<$name Op>] = Binary<$name>;
            )*
        }
    };
}

binary_ops! {
    Add => |a, b| a + b, "Adds values in the two input frames.";
    Subtract => |a, b| a - b, "Subtracts the right input values from the left.";
    Multiply => |a, b| a * b, "Multiplies values in the two input frames.";
    Divide => |a, b| a / b, "Divides the left input values by the right.";
    Minimum => |a, b| a.min(b), "Minimum of each pair of input values.";
    Maximum => |a, b| a.max(b), "Maximum of each pair of input values.";
    Power => |a, b| a.powf(b), "Left values raised to the right values.";
    AbsDiff => |a, b| (a - b).abs(), "Absolute differences between the input frames.";
}

/// Element-wise binary operator with configurable length-mismatch and
/// trigger behaviour.
pub struct Binary<O: BinaryVectorOp> {
    mismatch: MismatchMode,
    triggers: TriggerMode,
    _op: core::marker::PhantomData<O>,
}

impl<O: BinaryVectorOp> Binary<O> {
    #[allow(missing_docs)]
    pub fn new(mismatch: MismatchMode) -> Self {
        Self {
            mismatch,
            triggers: TriggerMode::Both,
            _op: core::marker::PhantomData,
        }
    }

    /// Restrict which inputs trigger the node.
    pub fn with_triggers(mut self, triggers: TriggerMode) -> Self {
        self.triggers = triggers;
        self
    }
}

impl<O: BinaryVectorOp> Default for Binary<O> {
    fn default() -> Self {
        Self::new(MismatchMode::default())
    }
}

impl<O: BinaryVectorOp> FrameOp for Binary<O> {
    fn inputs(&self) -> usize {
        2
    }
    fn outputs(&self) -> usize {
        1
    }

    fn update(&mut self, io: &mut UpdateIo) {
        io.set_trigger(0, self.triggers != TriggerMode::Right);
        io.set_trigger(1, self.triggers != TriggerMode::Left);
    }

    fn process(&mut self, io: &mut ProcessIo) {
        let (a_len, b_len) = (io.input_len(0), io.input_len(1));
        let size = if a_len == 0 || b_len == 0 {
            0
        } else {
            match self.mismatch {
                MismatchMode::Wrap | MismatchMode::Extend => a_len.max(b_len),
                MismatchMode::Shrink => a_len.min(b_len),
            }
        };
        io.request_output(0, size);
        if !io.allocate_outputs() || size == 0 {
            return;
        }
        for i in 0..size {
            let a = pick(io.input(0), i, self.mismatch);
            let b = pick(io.input(1), i, self.mismatch);
            io.output(0)[i] = O::apply(a, b);
        }
    }
}

fn pick(frame: &[f64], i: usize, mismatch: MismatchMode) -> f64 {
    if i < frame.len() {
        frame[i]
    } else {
        match mismatch {
            MismatchMode::Wrap => frame[i % frame.len()],
            MismatchMode::Extend => frame[frame.len() - 1],
            // Shrink never indexes past the shorter frame.
            MismatchMode::Shrink => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_io::TestIo;

    #[test]
    fn wrap_repeats_the_shorter_frame() {
        let mut op = MultiplyOp::new(MismatchMode::Wrap);
        let mut io = TestIo::new(&op);
        io.set_input(0, &[1.0, 2.0, 3.0, 4.0, 5.0]);
        io.set_input(1, &[10.0, 100.0]);
        io.process(&mut op);
        assert_eq!(io.output(0), &[10.0, 200.0, 30.0, 400.0, 50.0]);
    }

    #[test]
    fn shrink_and_extend() {
        let mut op = AddOp::new(MismatchMode::Shrink);
        let mut io = TestIo::new(&op);
        io.set_input(0, &[1.0, 2.0, 3.0]);
        io.set_input(1, &[10.0, 20.0]);
        io.process(&mut op);
        assert_eq!(io.output(0), &[11.0, 22.0]);

        let mut op = AddOp::new(MismatchMode::Extend);
        let mut io = TestIo::new(&op);
        io.set_input(0, &[1.0, 2.0, 3.0]);
        io.set_input(1, &[10.0, 20.0]);
        io.process(&mut op);
        assert_eq!(io.output(0), &[11.0, 22.0, 23.0]);
    }

    #[test]
    fn empty_input_gives_empty_output() {
        let mut op = SubtractOp::default();
        let mut io = TestIo::new(&op);
        io.set_input(0, &[1.0]);
        io.process(&mut op);
        assert!(io.output(0).is_empty());
    }

    #[test]
    fn trigger_mode_reclassifies_inputs() {
        let mut op = AddOp::default().with_triggers(TriggerMode::Left);
        let mut io = TestIo::new(&op);
        io.update(&mut op);
        assert!(io.triggers[0]);
        assert!(!io.triggers[1]);
    }
}
