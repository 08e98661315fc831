mod utils;

use crate::graph::{Graph, GraphError, GraphOptions};
use takt_core::ops::{
    AddOp, AudioIn, AudioOut, Count, CountLength, HostInlet, Interval, MismatchMode, MultiplyOp,
    PerBlock, TimeUnit, VectorSource,
};
use takt_core::output::OutputMode;
use takt_primitives::FrameTime;
use utils::{Capture, single_frame, times};

fn graph_with_workers(workers: usize) -> Graph {
    let _ = env_logger::builder().is_test(true).try_init();
    Graph::new(GraphOptions {
        workers,
        ..Default::default()
    })
}

#[test]
fn constant_times_constant() {
    let mut g = graph_with_workers(0);
    let a = g.push(VectorSource::new(vec![2.0, 3.0, 5.0]));
    let b = g.push(VectorSource::new(vec![2.0, 3.0, 5.0]));
    let m = g.push(MultiplyOp::new(MismatchMode::Wrap));
    let (cap, log) = Capture::new();
    let c = g.push(cap);
    g.add_connection(a, 0, m, 0).unwrap();
    g.add_connection(b, 0, m, 1).unwrap();
    g.add_connection(m, 0, c, 0).unwrap();

    g.process_block(&[], &mut [], 64);

    let frame = single_frame(&log);
    assert_eq!(frame.time, FrameTime::ZERO);
    assert_eq!(frame.values, vec![4.0, 9.0, 25.0]);
    assert_eq!(g.valid_time(m), Some(FrameTime::from_samples(64)));
    // Every frame was consumed and returned to the allocator.
    assert_eq!(g.live_scratch_blocks(), 0);
}

#[test]
fn scheduler_every_32_samples() {
    let mut g = graph_with_workers(0);
    let s = g.push(Interval::new(32.0, TimeUnit::Samples));
    let (cap, log) = Capture::new();
    let c = g.push(cap);
    g.add_connection(s, 0, c, 0).unwrap();

    g.process_block(&[], &mut [], 128);

    // Four frames, one downstream process call each.
    assert_eq!(
        times(&log),
        [0, 32, 64, 96].map(FrameTime::from_samples).to_vec()
    );
    assert_eq!(g.valid_time(s), Some(FrameTime::from_samples(128)));

    // Successive frame times keep differing by exactly the advance in
    // the next block.
    g.process_block(&[], &mut [], 128);
    assert_eq!(
        times(&log),
        [0, 32, 64, 96, 128, 160, 192, 224]
            .map(FrameTime::from_samples)
            .to_vec()
    );
}

#[test]
fn wrap_mode_through_the_graph() {
    let mut g = graph_with_workers(0);
    let a = g.push(VectorSource::new(vec![1.0, 2.0, 3.0, 4.0, 5.0]));
    let b = g.push(VectorSource::new(vec![10.0, 100.0]));
    let m = g.push(MultiplyOp::new(MismatchMode::Wrap));
    let (cap, log) = Capture::new();
    let c = g.push(cap);
    g.add_connection(a, 0, m, 0).unwrap();
    g.add_connection(b, 0, m, 1).unwrap();
    g.add_connection(m, 0, c, 0).unwrap();

    g.process_block(&[], &mut [], 64);

    assert_eq!(
        single_frame(&log).values,
        vec![10.0, 200.0, 30.0, 400.0, 50.0]
    );
}

#[test]
fn fixed_inputs_act_as_constant_sources() {
    let mut g = graph_with_workers(0);
    let m = g.push(MultiplyOp::new(MismatchMode::Wrap));
    g.set_fixed_input(m, 0, &[2.0, 4.0]).unwrap();
    g.set_fixed_input(m, 1, &[10.0]).unwrap();
    let (cap, log) = Capture::new();
    let c = g.push(cap);
    g.add_connection(m, 0, c, 0).unwrap();

    g.process_block(&[], &mut [], 64);

    let frame = single_frame(&log);
    assert_eq!(frame.time, FrameTime::ZERO);
    assert_eq!(frame.values, vec![20.0, 40.0]);
}

/// Two disjoint interval-driven chains, run serially and with a worker
/// pool; the captured frames must be identical.
#[test]
fn parallel_subgraphs_match_serial_run() {
    let run = |workers: usize| {
        let mut g = graph_with_workers(workers);
        let mut logs = Vec::new();
        for _ in 0..2 {
            let i = g.push(Interval::new(16.0, TimeUnit::Samples));
            let n = g.push(Count::new(CountLength::Requested(3)));
            let (cap, log) = Capture::new();
            let c = g.push(cap);
            g.add_connection(i, 0, n, 0).unwrap();
            g.add_connection(n, 0, c, 0).unwrap();
            logs.push(log);
        }
        for _ in 0..50 {
            g.process_block(&[], &mut [], 64);
        }
        assert_eq!(g.live_scratch_blocks(), 0);
        logs.iter()
            .map(|log| log.lock().unwrap().clone())
            .collect::<Vec<_>>()
    };

    let serial = run(0);
    let parallel = run(2);
    // 50 blocks of 64 samples with a frame every 16: 200 frames a chain.
    assert_eq!(serial[0].len(), 200);
    assert_eq!(serial, parallel);
}

/// A linear chain of eight nodes each passing on a 1024-sample frame;
/// after the block every scratch block has been returned.
#[test]
fn chain_memory_release() {
    let mut g = graph_with_workers(0);
    let source = g.push(VectorSource::new(vec![1.5; 1024]));
    let mut prev = source;
    for _ in 0..7 {
        let n = g.push(AddOp::new(MismatchMode::Wrap));
        g.set_fixed_input(n, 1, &[0.0]).unwrap();
        g.add_connection(prev, 0, n, 0).unwrap();
        prev = n;
    }
    let (cap, log) = Capture::new();
    let c = g.push(cap);
    g.add_connection(prev, 0, c, 0).unwrap();

    g.process_block(&[], &mut [], 64);

    let frame = single_frame(&log);
    assert_eq!(frame.values.len(), 1024);
    assert!(frame.values.iter().all(|&v| v == 1.5));
    assert_eq!(g.live_scratch_blocks(), 0);
}

#[test]
fn reset_restarts_time_and_is_idempotent() {
    let mut g = graph_with_workers(0);
    let s = g.push(Interval::new(32.0, TimeUnit::Samples));
    let (cap, log) = Capture::new();
    let c = g.push(cap);
    g.add_connection(s, 0, c, 0).unwrap();

    g.process_block(&[], &mut [], 128);
    assert_eq!(times(&log).len(), 4);

    g.reset();
    let snapshot = |g: &Graph| {
        (
            g.time(),
            g.frame_time(s),
            g.valid_time(s),
            g.input_time(c),
            g.live_scratch_blocks(),
        )
    };
    let once = snapshot(&g);
    g.reset();
    assert_eq!(snapshot(&g), once);
    assert_eq!(g.time(), FrameTime::ZERO);

    // The next block schedules from time zero again.
    log.lock().unwrap().clear();
    g.process_block(&[], &mut [], 64);
    assert_eq!(times(&log), [0, 32].map(FrameTime::from_samples).to_vec());
}

#[test]
fn every_node_reaches_block_end() {
    let mut g = graph_with_workers(0);
    let s = g.push(Interval::new(7.3, TimeUnit::Samples));
    let n = g.push(Count::new(CountLength::Requested(2)));
    let (cap, _log) = Capture::new();
    let c = g.push(cap);
    g.add_connection(s, 0, n, 0).unwrap();
    g.add_connection(n, 0, c, 0).unwrap();

    let mut block_end = FrameTime::ZERO;
    for vec_size in [64usize, 17, 128, 1] {
        g.process_block(&[], &mut [], vec_size);
        block_end += FrameTime::from_samples(vec_size as u64);
        for key in [s, n, c] {
            assert!(g.valid_time(key).unwrap() >= block_end);
        }
    }
}

#[test]
fn configuration_errors() {
    let mut g = graph_with_workers(0);
    let a = g.push(VectorSource::new(vec![1.0]));
    let b = g.push(AddOp::new(MismatchMode::Wrap));
    let c = g.push(AddOp::new(MismatchMode::Wrap));
    g.add_connection(a, 0, b, 0).unwrap();
    g.add_connection(b, 0, c, 0).unwrap();

    assert!(matches!(
        g.add_connection(c, 0, b, 1),
        Err(GraphError::CircularConnection)
    ));
    assert!(matches!(
        g.add_connection(b, 0, b, 1),
        Err(GraphError::CircularConnection)
    ));
    assert!(matches!(
        g.add_connection(a, 3, b, 1),
        Err(GraphError::OutputOutOfBounds(3))
    ));
    assert!(matches!(
        g.add_connection(a, 0, b, 9),
        Err(GraphError::InputOutOfBounds(9))
    ));

    assert!(g.is_connected(b, 0).unwrap());
    g.delete_connection(b, 0).unwrap();
    assert!(!g.is_connected(b, 0).unwrap());
    g.clear_connections(c).unwrap();
    assert!(!g.is_connected(c, 0).unwrap());
}

#[test]
fn removing_a_node_detaches_its_consumers() {
    let mut g = graph_with_workers(0);
    let a = g.push(VectorSource::new(vec![1.0]));
    let (cap, log) = Capture::new();
    let c = g.push(cap);
    g.add_connection(a, 0, c, 0).unwrap();
    g.remove(a).unwrap();
    assert!(!g.is_connected(c, 0).unwrap());
    g.process_block(&[], &mut [], 64);
    // The capture node is a constant-less processor now: it fires once
    // at time zero with an empty frame.
    assert_eq!(single_frame(&log).values, Vec::<f64>::new());
}

#[test]
fn host_inlet_emits_latest_frame_per_trigger() {
    let mut g = graph_with_workers(0);
    let s = g.push(PerBlock);
    let (inlet, mut tx) = HostInlet::new(OutputMode::Vector, 8);
    let h = g.push(inlet);
    let (cap, log) = Capture::new();
    let c = g.push(cap);
    g.add_connection(s, 0, h, 0).unwrap();
    g.add_connection(h, 0, c, 0).unwrap();

    tx.send_vector(vec![7.0, 8.0]).unwrap();
    g.process_block(&[], &mut [], 64);
    // No new frame from the host: the latest one repeats.
    g.process_block(&[], &mut [], 64);

    let frames = log.lock().unwrap().clone();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].time, FrameTime::ZERO);
    assert_eq!(frames[0].values, vec![7.0, 8.0]);
    assert_eq!(frames[1].time, FrameTime::from_samples(64));
    assert_eq!(frames[1].values, vec![7.0, 8.0]);
}

#[test]
fn audio_capture_to_audio_output() {
    let mut g = graph_with_workers(0);
    let s = g.push(PerBlock);
    let a = g.push(AudioIn::new(4));
    let o = g.push(AudioOut::new(64));
    g.add_connection(s, 0, a, 0).unwrap();
    g.add_connection(a, 0, o, 0).unwrap();

    let input: Vec<f64> = (1..=8).map(|v| v as f64).collect();
    let mut out = vec![0.0; 8];
    {
        let mut outs = [out.as_mut_slice()];
        g.process_block(&[input.as_slice()], &mut outs, 8);
    }
    // Playback runs one block late.
    assert_eq!(out, vec![0.0; 8]);

    let silence = vec![0.0; 8];
    {
        let mut outs = [out.as_mut_slice()];
        g.process_block(&[silence.as_slice()], &mut outs, 8);
    }
    // The frame triggered at block start held the last 4 samples
    // captured up to then.
    assert_eq!(out, vec![5.0, 6.0, 7.0, 8.0, 0.0, 0.0, 0.0, 0.0]);
}
