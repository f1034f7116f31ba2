use self::acceleration::{ModelParams, GAP_FLOOR};
use crate::conflict::MovementId;
use crate::{SegmentId, VehicleId};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub mod acceleration;
pub mod lane_change;

/// Below this speed a vehicle counts as waiting, in m/s.
const WAITING_SPEED: f64 = 0.5; // m/s

/// The class of a vehicle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum VehicleClass {
    Car,
    Truck,
}

/// A temporary braking command, on top of the car-following model.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BrakeOverride {
    /// The extra deceleration in m/s<sup>2</sup>, a positive number.
    pub decel: f64,
    /// The simulation time at which the command expires, in s.
    pub until: f64,
}

/// Where a vehicle is heading.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RouteIntent {
    /// The movement to take through a signalized junction.
    Movement(MovementId),
    /// The index of the roundabout arm to leave by.
    Exit(usize),
}

/// A simulated vehicle.
#[derive(Clone, Debug)]
pub struct Vehicle {
    /// The vehicle's ID
    pub(crate) id: VehicleId,
    /// The order in which the vehicle was created, starting at 1.
    serial: u64,
    /// The vehicle class.
    class: VehicleClass,
    /// The vehicle's length in m.
    length: f64,
    /// Scales the desired speed of the car-following model.
    speed_mult: f64,
    /// The segment the vehicle is travelling on.
    pub(crate) segment: SegmentId,
    /// The lane index on the segment.
    pub(crate) lane: usize,
    /// The position of the front bumper along the segment, in m.
    pub(crate) pos: f64,
    /// The velocity in m/s.
    pub(crate) vel: f64,
    /// The acceleration applied in the last integration, in m/s<sup>2</sup>.
    pub(crate) acc: f64,
    /// The position before the last integration.
    pub(crate) prev_pos: f64,
    /// The velocity before the last integration.
    pub(crate) prev_vel: f64,
    /// An active or expired braking command.
    pub(crate) brake: Option<BrakeOverride>,
    /// The lane the vehicle left with its last lane change.
    pub(crate) prev_lane: Option<usize>,
    /// The time of the last lane change or merge.
    pub(crate) last_lane_change: Option<f64>,
    /// Where the vehicle is heading, if it has a choice to make.
    pub(crate) intent: Option<RouteIntent>,
    /// The time the vehicle merged onto its current segment.
    pub(crate) merged_at: Option<f64>,
    /// The time the vehicle was created.
    spawned_at: f64,
    /// The total time spent below walking pace, in s.
    pub(crate) wait_time: f64,
    /// A virtual stop line set by an arbiter for the current tick.
    pub(crate) stop_line: Option<f64>,
}

/// The attributes of a new vehicle.
#[derive(Clone, Copy, Debug)]
pub struct VehicleAttributes {
    /// The vehicle class.
    pub class: VehicleClass,
    /// The vehicle length in m.
    pub length: f64,
    /// The desired-speed multiplier.
    pub speed_mult: f64,
}

impl Vehicle {
    /// Creates a new vehicle.
    pub(crate) fn new(
        id: VehicleId,
        serial: u64,
        attributes: &VehicleAttributes,
        segment: SegmentId,
        lane: usize,
        pos: f64,
        vel: f64,
        now: f64,
    ) -> Self {
        let vel = f64::max(vel, 0.0);
        Self {
            id,
            serial,
            class: attributes.class,
            length: attributes.length,
            speed_mult: attributes.speed_mult,
            segment,
            lane,
            pos,
            vel,
            acc: 0.0,
            prev_pos: pos,
            prev_vel: vel,
            brake: None,
            prev_lane: None,
            last_lane_change: None,
            intent: None,
            merged_at: None,
            spawned_at: now,
            wait_time: 0.0,
            stop_line: None,
        }
    }

    /// Gets the vehicle's ID.
    pub fn id(&self) -> VehicleId {
        self.id
    }

    /// Gets the vehicle's serial number, assigned in creation order.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn class(&self) -> VehicleClass {
        self.class
    }

    /// The vehicle's length in m.
    pub fn length(&self) -> f64 {
        self.length
    }

    /// The desired-speed multiplier.
    pub fn speed_mult(&self) -> f64 {
        self.speed_mult
    }

    pub(crate) fn set_speed_mult(&mut self, speed_mult: f64) {
        self.speed_mult = speed_mult;
    }

    /// The ID of the segment the vehicle is travelling on.
    pub fn segment_id(&self) -> SegmentId {
        self.segment
    }

    pub fn lane(&self) -> usize {
        self.lane
    }

    /// The longitudinal position of the front of the vehicle in m.
    pub fn pos_front(&self) -> f64 {
        self.pos
    }

    /// The longitudinal position of the rear of the vehicle in m.
    pub fn pos_rear(&self) -> f64 {
        self.pos - self.length
    }

    /// The front position before the last integration step.
    pub fn prev_pos(&self) -> f64 {
        self.prev_pos
    }

    /// The vehicle's velocity in m/s.
    pub fn vel(&self) -> f64 {
        self.vel
    }

    /// The velocity before the last integration step.
    pub fn prev_vel(&self) -> f64 {
        self.prev_vel
    }

    /// The acceleration used in the last integration step.
    pub fn acc(&self) -> f64 {
        self.acc
    }

    pub fn brake(&self) -> Option<BrakeOverride> {
        self.brake
    }

    pub fn prev_lane(&self) -> Option<usize> {
        self.prev_lane
    }

    pub fn intent(&self) -> Option<RouteIntent> {
        self.intent
    }

    /// The simulation time at which the vehicle was created.
    pub fn spawned_at(&self) -> f64 {
        self.spawned_at
    }

    /// The total time the vehicle has spent waiting.
    pub fn wait_time(&self) -> f64 {
        self.wait_time
    }

    /// Whether the vehicle is stopped.
    pub fn has_stopped(&self) -> bool {
        self.vel < 0.1
    }

    /// The car-following parameters of this vehicle at a point where the speed limit
    /// is scaled by `speed_factor`.
    pub(crate) fn model_params(&self, base: &ModelParams, speed_factor: f64) -> ModelParams {
        let desired = f64::max(0.1, base.desired_speed * speed_factor * self.speed_mult);
        base.with_desired_speed(desired)
    }

    /// The acceleration the vehicle would choose at its current speed behind a leader.
    ///
    /// # Parameters
    /// * `params` - Parameters from [Vehicle::model_params]
    /// * `leader` - The gap, velocity and acceleration of the leader, or `None` on a free road
    pub(crate) fn projected_acc(&self, params: &ModelParams, leader: Option<Leader>) -> f64 {
        match leader {
            Some(leader) => params.acceleration(
                f64::max(leader.gap, GAP_FLOOR),
                self.vel,
                leader.vel,
                leader.acc,
            ),
            None => params.acceleration(acceleration::FREE_GAP, self.vel, self.vel, 0.0),
        }
    }

    /// The extra deceleration of an active braking command.
    pub(crate) fn brake_decel(&self, now: f64) -> f64 {
        match self.brake {
            Some(brake) if now < brake.until => brake.decel,
            _ => 0.0,
        }
    }

    /// Integrates the vehicle's velocity and position.
    ///
    /// # Parameters
    /// * `dt` - The time step in seconds
    pub(crate) fn integrate(&mut self, dt: f64) {
        self.prev_pos = self.pos;
        self.prev_vel = self.vel;
        let vel = f64::max(self.vel + self.acc * dt, 0.0);
        let dist = f64::max(self.vel * dt + 0.5 * self.acc * dt * dt, 0.0);
        self.vel = vel;
        self.pos += dist;
        if self.vel <= WAITING_SPEED {
            self.wait_time += dt;
        }
    }

    /// Moves the vehicle to a position on another segment.
    pub(crate) fn set_location(&mut self, segment: SegmentId, lane: usize, pos: f64) {
        self.segment = segment;
        self.lane = lane;
        self.pos = pos;
        self.prev_pos = pos;
        self.stop_line = None;
    }
}

/// What a vehicle sees of the vehicle or stop line ahead of it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Leader {
    /// The bumper-to-bumper gap in m.
    pub gap: f64,
    /// The leader's velocity in m/s.
    pub vel: f64,
    /// The leader's acceleration in m/s<sup>2</sup>.
    pub acc: f64,
}

impl Leader {
    /// A stationary obstacle `gap` metres ahead.
    pub fn stop_line(gap: f64) -> Self {
        Self {
            gap,
            vel: 0.0,
            acc: 0.0,
        }
    }

    /// Keeps whichever of the two is closer.
    pub fn nearest(a: Option<Leader>, b: Option<Leader>) -> Option<Leader> {
        match (a, b) {
            (Some(a), Some(b)) => Some(if b.gap < a.gap { b } else { a }),
            (a, None) => a,
            (None, b) => b,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use slotmap::KeyData;

    fn vehicle(vel: f64) -> Vehicle {
        let attributes = VehicleAttributes {
            class: VehicleClass::Car,
            length: 4.5,
            speed_mult: 1.0,
        };
        Vehicle::new(
            VehicleId::from(KeyData::from_ffi(1)),
            1,
            &attributes,
            SegmentId::from(KeyData::from_ffi(1)),
            0,
            10.0,
            vel,
            0.0,
        )
    }

    #[test]
    fn never_moves_backwards() {
        let mut veh = vehicle(0.5);
        veh.acc = -10.0;
        veh.integrate(0.1);
        assert_eq!(veh.vel(), 0.0);
        assert!(veh.pos_front() >= 10.0);
        veh.integrate(0.1);
        assert_eq!(veh.pos_front(), veh.prev_pos());
    }

    #[test]
    fn position_uses_pre_update_velocity() {
        let mut veh = vehicle(10.0);
        veh.acc = 1.0;
        veh.integrate(0.1);
        assert_approx_eq!(veh.vel(), 10.1);
        assert_approx_eq!(veh.pos_front(), 10.0 + 1.0 + 0.005);
    }

    #[test]
    fn brake_expires() {
        let mut veh = vehicle(10.0);
        veh.brake = Some(BrakeOverride {
            decel: 3.0,
            until: 5.0,
        });
        assert_approx_eq!(veh.brake_decel(4.9), 3.0);
        assert_approx_eq!(veh.brake_decel(5.0), 0.0);
    }

    #[test]
    fn nearest_leader() {
        let car = Leader {
            gap: 30.0,
            vel: 10.0,
            acc: 0.0,
        };
        let line = Leader::stop_line(12.0);
        assert_eq!(Leader::nearest(Some(car), Some(line)), Some(line));
        assert_eq!(Leader::nearest(Some(car), None), Some(car));
    }
}
