//! Tests of the signalized intersection.

mod common;

use assert_approx_eq::assert_approx_eq;
use common::assert_consistent;
use microflow::{
    Axis, ConflictTable, IntersectionConfig, NetworkConfig, SignalPhase, SimConfig, SimEvent,
    Simulation, TurnRatios,
};

fn intersection() -> Simulation {
    Simulation::new(SimConfig {
        network: NetworkConfig::Intersection(IntersectionConfig::default()),
        record_events: true,
        ..SimConfig::default()
    })
    .unwrap()
}

/// Test that conflicting movements never hold overlapping reservations.
#[test]
fn mutual_exclusion() {
    let mut sim = intersection();
    for entry in 0..4 {
        sim.set_inflow(entry, 700.0).unwrap();
    }
    let mut entries = vec![];
    for _ in 0..6000 {
        sim.step(0.05);
        assert_consistent(&sim);
        entries.extend(sim.drain_events().filter_map(|event| match event {
            SimEvent::EnteredJunction {
                movement,
                time,
                lock_until,
                ..
            } => Some((movement, time, lock_until)),
            _ => None,
        }));
    }
    assert!(!entries.is_empty());
    let table = ConflictTable::get();
    for (i, (a, start_a, end_a)) in entries.iter().enumerate() {
        for (b, start_b, _) in &entries[i + 1..] {
            if table.conflicts(*a, *b) {
                assert!(start_b >= end_a, "{a} ({start_a}..{end_a}) and {b} at {start_b}");
            }
        }
    }
}

/// Test that a vehicle driving straight through on green keeps its speed across the
/// stop line instead of stopping at it.
#[test]
fn green_through_keeps_speed() {
    let mut sim = Simulation::new(SimConfig {
        network: NetworkConfig::Intersection(IntersectionConfig {
            turn_ratios: TurnRatios {
                right: 0.0,
                through: 1.0,
            },
            ..IntersectionConfig::default()
        }),
        ..SimConfig::default()
    })
    .unwrap();
    sim.set_signal_override(Some(Axis::NorthSouth)).unwrap();
    let id = sim.try_spawn(0, 0).unwrap().unwrap();
    let approach = sim.get_vehicle(id).unwrap().segment_id();
    let length = sim.network().segment(approach).unwrap().length();
    let max_dec = sim.model_params().max_dec;

    let mut prev_vel = sim.get_vehicle(id).unwrap().vel();
    let mut min_vel = f64::INFINITY;
    let mut left_approach = false;
    for _ in 0..600 {
        sim.step(0.05);
        let Some(vehicle) = sim.get_vehicle(id) else {
            break;
        };
        assert!(
            prev_vel - vehicle.vel() <= max_dec * 0.05 + 1e-9,
            "braked from {prev_vel} to {} m/s at {} s",
            vehicle.vel(),
            sim.time()
        );
        prev_vel = vehicle.vel();
        if vehicle.segment_id() != approach {
            left_approach = true;
            min_vel = min_vel.min(vehicle.vel());
        } else if vehicle.pos_front() >= length - 40.0 {
            min_vel = min_vel.min(vehicle.vel());
        }
    }
    assert!(left_approach);
    assert!(sim.iter_vehicles().count() == 0, "vehicle never left the network");
    assert!(min_vel > 15.0, "slowed down to {min_vel} m/s");
}

/// Test that the signal runs through every phase once per cycle.
#[test]
fn signal_cycle() {
    let mut sim = intersection();
    let cycle = IntersectionConfig::default().signal.cycle_length();
    sim.run_for(cycle + 1.0);
    let phases: Vec<(f64, SignalPhase)> = sim
        .drain_events()
        .filter_map(|event| match event {
            SimEvent::SignalPhase { time, phase } => Some((time, phase)),
            _ => None,
        })
        .collect();
    let order: Vec<SignalPhase> = phases.iter().map(|(_, phase)| *phase).collect();
    assert_eq!(order.len(), SignalPhase::CYCLE.len());
    assert_eq!(order[..7], SignalPhase::CYCLE[1..]);
    assert_eq!(order[7], SignalPhase::NsGreen);
    assert_approx_eq!(phases[7].0, cycle, 0.051);
}
