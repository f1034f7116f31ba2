//! Helpers shared by the integration tests.

#![allow(dead_code)]

use microflow::{Segment, Simulation, VehicleAttributes, VehicleClass};

pub fn car() -> VehicleAttributes {
    VehicleAttributes {
        class: VehicleClass::Car,
        length: 4.5,
        speed_mult: 1.0,
    }
}

/// The bumper-to-bumper gaps between consecutive vehicles in every lane of a segment.
/// On a ring the last vehicle of a lane follows the first.
pub fn lane_gaps(sim: &Simulation, segment: &Segment) -> Vec<f64> {
    let mut gaps = vec![];
    for lane in 0..segment.lane_count() {
        let ids = segment.lane(lane);
        let n = ids.len();
        let pairs = if segment.is_ring() && n > 1 { n } else { n.saturating_sub(1) };
        for i in 0..pairs {
            let follower = sim.get_vehicle(ids[i]).unwrap();
            let leader = sim.get_vehicle(ids[(i + 1) % n]).unwrap();
            gaps.push(
                segment.forward_distance(follower.pos_front(), leader.pos_front())
                    - leader.length(),
            );
        }
    }
    gaps
}

/// Checks that no two vehicles overlap and no vehicle reverses.
pub fn assert_consistent(sim: &Simulation) {
    for segment in sim.network().segments() {
        for gap in lane_gaps(sim, segment) {
            assert!(
                gap >= -1e-6,
                "overlap of {gap} m on `{}` at {} s",
                segment.name(),
                sim.time()
            );
        }
    }
    for vehicle in sim.iter_vehicles() {
        assert!(vehicle.vel() >= 0.0);
    }
}
