//! Tests that runs are reproducible.

mod common;

use common::assert_consistent;
use microflow::{
    NetworkConfig, RingRoadConfig, RoundaboutConfig, Seed, SimConfig, Simulation, Snapshot,
};

fn ring(seed: Seed) -> Simulation {
    Simulation::new(SimConfig {
        seed,
        network: NetworkConfig::RingRoad(RingRoadConfig::default()),
        noise_amplitude: 0.3,
        ..SimConfig::default()
    })
    .unwrap()
}

/// Runs for 30 s with a brake pulse after 10 s, returning a snapshot every second.
fn trajectory(sim: &mut Simulation) -> Vec<Snapshot> {
    let mut snapshots = vec![];
    for second in 0..30 {
        if second == 10 {
            sim.trigger_brake_pulse().unwrap();
        }
        sim.run_for(1.0);
        assert_consistent(sim);
        snapshots.push(sim.snapshot());
    }
    snapshots
}

#[test]
fn same_seed_same_trajectory() {
    let a = trajectory(&mut ring(Seed::from("demo")));
    let b = trajectory(&mut ring(Seed::from("demo")));
    assert_eq!(a, b);
    let c = trajectory(&mut ring(Seed::from(7_i64)));
    assert_ne!(a, c);
}

#[test]
fn reset_repeats_the_run() {
    let mut sim = ring(Seed::Default);
    let first = trajectory(&mut sim);
    sim.reset();
    assert_eq!(sim.time(), 0.0);
    let second = trajectory(&mut sim);
    assert_eq!(first, second);
}

#[test]
fn roundabout_is_reproducible() {
    let run = || {
        let mut sim = Simulation::new(SimConfig {
            seed: Seed::from(12345_i64),
            network: NetworkConfig::Roundabout(RoundaboutConfig::default()),
            ..SimConfig::default()
        })
        .unwrap();
        for entry in 0..4 {
            sim.set_inflow(entry, 400.0).unwrap();
        }
        for _ in 0..1200 {
            sim.step(0.05);
            assert_consistent(&sim);
        }
        sim.snapshot()
    };
    assert_eq!(run(), run());
}
