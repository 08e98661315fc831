//! # Takt
//!
//! A frame-based signal processing engine for audio hosts. Nodes
//! exchange variable-length frames of f64 samples stamped with exact
//! sample-domain times; for every host audio block the engine drives
//! each node to produce exactly the frames falling inside the block, in
//! dependency order.
//!
//! This crate re-exports the full public API:
//!
//! - [`Graph`]: the engine. Push operators, connect them, call
//!   [`Graph::process_block`] from the audio callback.
//! - [`FrameOp`]: the contract every operator implements.
//! - [`FrameTime`]: exact 64.64 fixed-point sample time.
//! - [`ops`]: the bundled operators (arithmetic, schedulers, audio
//!   capture/playback, host inlet).
//!
//! ```
//! use takt::{Graph, GraphOptions, ops};
//!
//! let mut graph = Graph::new(GraphOptions::default());
//! let clock = graph.push(ops::Interval::new(250.0, ops::TimeUnit::Milliseconds));
//! let ramp = graph.push(ops::Count::new(ops::CountLength::Requested(8)));
//! graph.add_connection(clock, 0, ramp, 0).unwrap();
//! // In the audio callback:
//! graph.process_block(&[], &mut [], 64);
//! ```

pub use takt_graph::*;
