//! A deterministic microscopic traffic simulation: vehicles follow each other and change
//! lanes on open roads, rings, signalized junctions and roundabouts.

pub use conflict::{Approach, Axis, ConflictTable, MovementId, Turn, MOVEMENT_COUNT};
pub use error::{Error, Result};
pub use junction::{
    GapThreshold, Junction, JunctionParams, LeftTurnGap, Movement, Reservation, TurnTimes,
};
pub use light::{LightState, SignalController, SignalPhase, SignalTiming};
pub use merge::{MergeSlot, MergeZone, PriorityRule};
pub use network::{
    BrakePulseConfig, Entry, Heterogeneity, IntersectionConfig, Network, NetworkConfig,
    OpenRoadConfig, RingExit, RingRoadConfig, RoundaboutConfig, TurnRatios, ROUNDABOUT_ARMS,
};
pub use probe::{
    density, headways, slow_cluster, Crossing, Detector, GlobalStats, Histogram, Jam, LaneHeadways,
    SpeedBins, Summary, TravelTimeProbe,
};
pub use rng::{Mulberry32, Seed};
pub use segment::{Segment, SegmentEnd, SpeedRegion};
pub use simulation::{SimConfig, Simulation};
pub use slotmap::{Key, KeyData};
use slotmap::{new_key_type, SlotMap};
pub use snapshot::{MovementSnapshot, SignalSnapshot, SimEvent, Snapshot, VehicleSnapshot};
pub use util::Interval;
pub use vehicle::acceleration::ModelParams;
pub use vehicle::lane_change::{LaneChangeCandidate, MobilParams, Side};
pub use vehicle::{BrakeOverride, RouteIntent, Vehicle, VehicleAttributes, VehicleClass};

mod conflict;
mod error;
mod junction;
mod light;
mod merge;
mod network;
mod probe;
mod rng;
mod segment;
mod simulation;
mod snapshot;
mod util;
mod vehicle;

new_key_type! {
    /// Unique ID of a [Segment].
    pub struct SegmentId;
    /// Unique ID of a [Vehicle].
    pub struct VehicleId;
}

type SegmentSet = SlotMap<SegmentId, Segment>;
type VehicleSet = SlotMap<VehicleId, Vehicle>;
