//! Example operators exercising the node contract.

pub mod audio;
pub mod binary;
pub mod count;
pub mod host_inlet;
pub mod interval;
pub mod per_block;
pub mod source;
pub mod tag;

pub use audio::{AudioIn, AudioOut};
pub use binary::{
    AbsDiffOp, AddOp, Binary, DivideOp, MaximumOp, MinimumOp, MismatchMode, MultiplyOp, PowerOp,
    SubtractOp, TriggerMode,
};
pub use count::{Count, CountLength};
pub use host_inlet::{HostFrame, HostInlet, HostInletSender, InletFull};
pub use interval::{Interval, TimeUnit};
pub use per_block::PerBlock;
pub use source::VectorSource;
pub use tag::Tag;
