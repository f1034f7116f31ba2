//! Read-only views of the simulation handed to renderers and loggers.

use crate::conflict::{Axis, MovementId};
use crate::light::SignalPhase;
use crate::network::Network;
use crate::vehicle::{Vehicle, VehicleClass};
use crate::SegmentId;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The state of one vehicle at the end of a tick.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VehicleSnapshot {
    /// The vehicle's serial number.
    pub id: u64,
    pub segment: SegmentId,
    pub lane: usize,
    /// The front bumper position in m.
    pub pos: f64,
    pub vel: f64,
    pub acc: f64,
    pub class: VehicleClass,
    pub length: f64,
}

impl From<&Vehicle> for VehicleSnapshot {
    fn from(vehicle: &Vehicle) -> Self {
        Self {
            id: vehicle.serial(),
            segment: vehicle.segment_id(),
            lane: vehicle.lane(),
            pos: vehicle.pos_front(),
            vel: vehicle.vel(),
            acc: vehicle.acc(),
            class: vehicle.class(),
            length: vehicle.length(),
        }
    }
}

/// The reservation state of a junction movement.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MovementSnapshot {
    pub movement: MovementId,
    pub next_admissible: f64,
    pub lock_until: f64,
}

/// The state of a junction's signal.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SignalSnapshot {
    pub phase: SignalPhase,
    /// The time left in the phase; infinite under manual override.
    pub remaining: f64,
    pub manual: Option<Axis>,
}

/// Everything a renderer needs to draw one frame.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Snapshot {
    /// The simulation time in s.
    pub time: f64,
    /// Vehicles by segment, then lane, then position.
    pub vehicles: Vec<VehicleSnapshot>,
    pub movements: Vec<MovementSnapshot>,
    pub signal: Option<SignalSnapshot>,
}

impl Snapshot {
    pub(crate) fn capture(network: &Network) -> Self {
        let junction = network.junction();
        let movements = junction
            .into_iter()
            .flat_map(|junction| junction.movements())
            .map(|movement| MovementSnapshot {
                movement: movement.id(),
                next_admissible: movement.reservation().next_admissible,
                lock_until: movement.reservation().lock_until,
            })
            .collect();
        let signal = junction.map(|junction| SignalSnapshot {
            phase: junction.signal().phase(),
            remaining: junction.signal().remaining(),
            manual: junction.signal().manual_override(),
        });
        Self {
            time: network.time(),
            vehicles: network.vehicles().map(VehicleSnapshot::from).collect(),
            movements,
            signal,
        }
    }
}

/// Something notable that happened during a tick. Vehicles are identified by serial number.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SimEvent {
    Spawned {
        vehicle: u64,
        time: f64,
        segment: SegmentId,
        lane: usize,
        class: VehicleClass,
    },
    LaneChanged {
        vehicle: u64,
        time: f64,
        from: usize,
        to: usize,
    },
    /// A vehicle left a merge zone and joined the target lane.
    Merged {
        vehicle: u64,
        time: f64,
        segment: SegmentId,
        pos: f64,
        gap_ahead: f64,
        gap_behind: f64,
    },
    EnteredJunction {
        vehicle: u64,
        time: f64,
        movement: MovementId,
        /// Conflicting movements are locked out until this time.
        lock_until: f64,
    },
    ExitedRing {
        vehicle: u64,
        time: f64,
        arm: usize,
    },
    Despawned {
        vehicle: u64,
        time: f64,
        /// The time since the vehicle was created, in s.
        travel_time: f64,
        /// The time spent stopped or crawling, in s.
        wait_time: f64,
    },
    BrakePulse {
        vehicle: u64,
        time: f64,
        decel: f64,
        duration: f64,
    },
    SignalPhase {
        time: f64,
        phase: SignalPhase,
    },
}

impl SimEvent {
    /// The simulation time of the event.
    pub fn time(&self) -> f64 {
        match *self {
            SimEvent::Spawned { time, .. }
            | SimEvent::LaneChanged { time, .. }
            | SimEvent::Merged { time, .. }
            | SimEvent::EnteredJunction { time, .. }
            | SimEvent::ExitedRing { time, .. }
            | SimEvent::Despawned { time, .. }
            | SimEvent::BrakePulse { time, .. }
            | SimEvent::SignalPhase { time, .. } => time,
        }
    }
}
