//! # Frame printer
//!
//! Builds a small chain, an interval clock triggering a ramp generator,
//! and prints every frame the chain produces together with its exact
//! sample time.

use anyhow::Result;
use takt::{FrameOp, Graph, GraphOptions, ProcessIo, ops};

struct Printer;

impl FrameOp for Printer {
    fn inputs(&self) -> usize {
        1
    }
    fn outputs(&self) -> usize {
        0
    }

    fn process(&mut self, io: &mut ProcessIo) {
        println!(
            "frame at {:>8.2} samples: {:?}",
            io.frame_time().to_samples_f64(),
            io.input(0)
        );
    }
}

fn main() -> Result<()> {
    let mut graph = Graph::new(GraphOptions::default());
    let clock = graph.push(ops::Interval::new(32.0, ops::TimeUnit::Samples));
    let ramp = graph.push(ops::Count::new(ops::CountLength::Requested(4)));
    let printer = graph.push(Printer);
    graph.add_connection(clock, 0, ramp, 0)?;
    graph.add_connection(ramp, 0, printer, 0)?;

    for _ in 0..4 {
        graph.process_block(&[], &mut [], 64);
    }
    println!(
        "engine time after 4 blocks: {} samples",
        graph.time().to_samples_floor()
    );
    Ok(())
}
