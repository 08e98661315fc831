//! # Takt Primitives
//!
//! Foundation types for the takt frame engine: exact sample-domain time
//! and the tagged parameter frame format. This crate has no engine
//! dependencies and can be used by hosts that only need to build or read
//! frames.

pub mod tagged;
pub mod time;

pub use tagged::{TaggedBuf, TaggedEntry, TaggedRef, TaggedValue, TaggedWriter};
pub use time::{FALLBACK_SAMPLING_RATE, FrameTime};
