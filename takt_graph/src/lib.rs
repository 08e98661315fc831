#![allow(clippy::new_without_default)]
//! # Takt Graph
//!
//! The scheduling runtime of the takt frame engine: a dependency-driven
//! graph of frame operators, driven block by block from a host audio
//! callback, optionally fanned out over a pool of audio-priority worker
//! threads.
//!
//! Build a [`Graph`], [`Graph::push`] operators into it, wire them with
//! [`Graph::add_connection`], then call [`Graph::process_block`] from
//! the audio callback. Every node's valid time reaches block end before
//! the call returns.

pub mod graph;
mod node;
mod queue;
pub mod sync;
#[cfg(test)]
mod tests;
pub mod thread;

pub use graph::{Graph, GraphError, GraphOptions, NodeKey};
pub use takt_core::*;
