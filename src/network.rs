//! Road networks: scenario configuration, construction, and the state advanced by the stepper.

use crate::conflict::{Approach, MovementId, Turn, MOVEMENT_COUNT};
use crate::error::{require_fraction, require_non_negative, require_positive};
use crate::junction::{Junction, JunctionParams};
use crate::light::SignalTiming;
use crate::merge::{MergeZone, PriorityRule};
use crate::rng::Mulberry32;
use crate::segment::{Segment, SegmentAttributes, SegmentEnd, SpeedRegion};
use crate::util::Interval;
use crate::vehicle::acceleration::ModelParams;
use crate::vehicle::lane_change::MobilParams;
use crate::vehicle::{Leader, RouteIntent, Vehicle, VehicleAttributes, VehicleClass};
use crate::{Error, SegmentId, SegmentSet, VehicleId, VehicleSet};
use log::warn;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::f64::consts::{FRAC_PI_2, TAU};

/// The arms of a roundabout in the order traffic meets them going round the ring.
pub const ROUNDABOUT_ARMS: [Approach; 4] = [
    Approach::East,
    Approach::North,
    Approach::West,
    Approach::South,
];

/// The mix of vehicle classes and desired speeds in the traffic.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Heterogeneity {
    /// The probability that a new vehicle is a truck.
    pub truck_fraction: f64,
    /// The relative spread of desired speeds around the class mean.
    pub speed_spread: f64,
    /// The desired-speed multiplier of trucks.
    pub truck_speed_mult: f64,
    /// m
    pub truck_length: f64,
    /// m
    pub car_length: f64,
}

impl Default for Heterogeneity {
    fn default() -> Self {
        Self {
            truck_fraction: 0.12,
            speed_spread: 0.18,
            truck_speed_mult: 0.78,
            truck_length: 7.5,
            car_length: 4.5,
        }
    }
}

impl Heterogeneity {
    pub fn validate(&self) -> crate::Result<()> {
        require_fraction("truck_fraction", self.truck_fraction)?;
        require_fraction("speed_spread", self.speed_spread)?;
        require_positive("truck_speed_mult", self.truck_speed_mult)?;
        require_positive("truck_length", self.truck_length)?;
        require_positive("car_length", self.car_length)
    }

    /// The length of the longest vehicle class.
    pub fn max_length(&self) -> f64 {
        f64::max(self.truck_length, self.car_length)
    }

    /// Draws the class and desired-speed multiplier of a new vehicle.
    pub(crate) fn draw(&self, rng: &mut Mulberry32) -> VehicleAttributes {
        let (class, length, class_mult) = if rng.chance(self.truck_fraction) {
            (VehicleClass::Truck, self.truck_length, self.truck_speed_mult)
        } else {
            (VehicleClass::Car, self.car_length, 1.0)
        };
        let spread = 1.0 + self.speed_spread * (2.0 * rng.next_f64() - 1.0);
        VehicleAttributes {
            class,
            length,
            speed_mult: class_mult * spread,
        }
    }
}

/// Periodic braking of a random vehicle, used to trigger stop-and-go waves.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BrakePulseConfig {
    /// The interval between pulses, in s.
    pub every: f64,
    /// How long each pulse lasts, in s.
    pub duration: f64,
    /// The extra deceleration, in m/s<sup>2</sup>.
    pub decel: f64,
}

impl Default for BrakePulseConfig {
    fn default() -> Self {
        Self {
            every: 16.0,
            duration: 1.6,
            decel: 3.2,
        }
    }
}

impl BrakePulseConfig {
    pub fn validate(&self) -> crate::Result<()> {
        require_positive("brake_pulses.every", self.every)?;
        require_positive("brake_pulses.duration", self.duration)?;
        require_non_negative("brake_pulses.decel", self.decel)
    }
}

/// A multi-lane main road with a single-lane on-ramp and a bend.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OpenRoadConfig {
    /// m
    pub main_length: f64,
    pub lane_count: usize,
    /// m
    pub ramp_length: f64,
    /// The main road position the end of the merge zone maps to, in m.
    pub merge_pos: f64,
    /// The main road lane ramp vehicles merge into.
    pub merge_lane: usize,
    /// Ramp vehicles past this position look for a gap, in m.
    pub trigger: f64,
    pub curve_start: f64,
    pub curve_length: f64,
    pub curve_factor: f64,
    /// The stretch after the bend where vehicles are still slower.
    pub post_curve_length: f64,
    pub post_curve_factor: f64,
    pub merge_half_window: f64,
    pub merge_tries: usize,
    pub priority: PriorityRule,
    pub merge_min_gap: f64,
    pub merge_safety_relax: f64,
    pub despawn_buffer: f64,
    pub heterogeneity: Heterogeneity,
    pub brake_pulses: Option<BrakePulseConfig>,
    /// Vehicles placed on each main lane at start-up.
    pub initial_vehicles_per_lane: usize,
}

impl Default for OpenRoadConfig {
    fn default() -> Self {
        Self {
            main_length: 920.0,
            lane_count: 3,
            ramp_length: 140.0,
            merge_pos: 470.0,
            merge_lane: 2,
            trigger: 110.0,
            curve_start: 360.0,
            curve_length: 200.0,
            curve_factor: 0.70,
            post_curve_length: 80.0,
            post_curve_factor: 0.85,
            merge_half_window: 6.0,
            merge_tries: 5,
            priority: PriorityRule::Through,
            merge_min_gap: 2.0,
            merge_safety_relax: 1.5,
            despawn_buffer: 40.0,
            heterogeneity: Heterogeneity::default(),
            brake_pulses: None,
            initial_vehicles_per_lane: 0,
        }
    }
}

impl OpenRoadConfig {
    pub fn validate(&self) -> crate::Result<()> {
        require_length("main", self.main_length)?;
        require_length("ramp", self.ramp_length)?;
        require_lanes("main", self.lane_count)?;
        if self.merge_lane >= self.lane_count {
            return Err(Error::LaneOutOfRange {
                segment: "main".into(),
                lane: self.merge_lane,
                lane_count: self.lane_count,
            });
        }
        require_within("merge point", "main", self.merge_pos, self.main_length)?;
        require_within("merge trigger", "ramp", self.trigger, self.ramp_length)?;
        require_non_negative("curve_start", self.curve_start)?;
        require_non_negative("curve_length", self.curve_length)?;
        require_non_negative("post_curve_length", self.post_curve_length)?;
        let slow_end = self.curve_start + self.curve_length + self.post_curve_length;
        if slow_end > self.main_length {
            return Err(Error::PositionOutOfRange {
                what: "end of the bend",
                segment: "main".into(),
                pos: slow_end,
                length: self.main_length,
            });
        }
        require_positive("curve_factor", self.curve_factor)?;
        require_positive("post_curve_factor", self.post_curve_factor)?;
        require_non_negative("despawn_buffer", self.despawn_buffer)?;
        self.heterogeneity.validate()?;
        if let Some(pulses) = &self.brake_pulses {
            pulses.validate()?;
        }
        self.merge_zone(SegmentId::default(), SegmentId::default())
            .validate()
    }

    fn merge_zone(&self, ramp: SegmentId, main: SegmentId) -> MergeZone {
        MergeZone {
            source: ramp,
            trigger: self.trigger,
            target: main,
            target_lane: self.merge_lane,
            anchor: self.merge_pos,
            half_window: self.merge_half_window,
            tries: self.merge_tries,
            priority: self.priority,
            min_gap: self.merge_min_gap,
            safety_relax: self.merge_safety_relax,
        }
    }
}

/// A closed multi-lane ring.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RingRoadConfig {
    pub lane_count: usize,
    /// m
    pub inner_radius: f64,
    /// m
    pub lane_width: f64,
    pub vehicles_per_lane: usize,
    pub heterogeneity: Heterogeneity,
}

impl Default for RingRoadConfig {
    fn default() -> Self {
        Self {
            lane_count: 3,
            inner_radius: 95.0,
            lane_width: 5.8,
            vehicles_per_lane: 20,
            heterogeneity: Heterogeneity::default(),
        }
    }
}

impl RingRoadConfig {
    /// The length of the ring measured along its middle.
    pub fn length(&self) -> f64 {
        TAU * (self.inner_radius + 0.5 * self.lane_width * self.lane_count as f64)
    }

    pub fn validate(&self) -> crate::Result<()> {
        require_lanes("ring", self.lane_count)?;
        require_positive("inner_radius", self.inner_radius)?;
        require_positive("lane_width", self.lane_width)?;
        require_length("ring", self.length())?;
        self.heterogeneity.validate()
    }
}

/// How vehicles arriving at a junction split between the turns.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TurnRatios {
    pub right: f64,
    pub through: f64,
}

impl Default for TurnRatios {
    fn default() -> Self {
        Self {
            right: 0.18,
            through: 0.60,
        }
    }
}

impl TurnRatios {
    /// The share of vehicles turning left.
    pub fn left(&self) -> f64 {
        1.0 - self.right - self.through
    }

    fn validate(&self) -> crate::Result<()> {
        require_fraction("turn_ratios.right", self.right)?;
        require_fraction("turn_ratios.through", self.through)?;
        require_fraction("turn_ratios.left", self.left())
    }

    fn draw(&self, rng: &mut Mulberry32) -> Turn {
        let u = rng.next_f64();
        if u < self.right {
            Turn::Right
        } else if u < self.right + self.through {
            Turn::Through
        } else {
            Turn::Left
        }
    }
}

/// A signalized four-way junction with one inbound and one outbound lane per arm.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IntersectionConfig {
    /// The length of the inbound and outbound arms, in m.
    pub arm_length: f64,
    /// Half the width of the junction box, in m.
    pub box_half_width: f64,
    pub despawn_buffer: f64,
    pub signal: SignalTiming,
    pub junction: JunctionParams,
    pub turn_ratios: TurnRatios,
    pub heterogeneity: Heterogeneity,
}

impl Default for IntersectionConfig {
    fn default() -> Self {
        Self {
            arm_length: 140.0,
            box_half_width: 12.0,
            despawn_buffer: 80.0,
            signal: SignalTiming::default(),
            junction: JunctionParams::default(),
            turn_ratios: TurnRatios::default(),
            heterogeneity: Heterogeneity {
                truck_fraction: 0.08,
                speed_spread: 0.12,
                truck_speed_mult: 0.80,
                truck_length: 7.5,
                car_length: 4.5,
            },
        }
    }
}

impl IntersectionConfig {
    /// The length of the path through the junction box.
    pub fn connector_length(&self, turn: Turn) -> f64 {
        let w = self.box_half_width;
        match turn {
            Turn::Right => FRAC_PI_2 * 0.5 * w,
            Turn::Through => 2.0 * w,
            Turn::Left => FRAC_PI_2 * 1.5 * w,
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        require_length("arm", self.arm_length)?;
        require_positive("box_half_width", self.box_half_width)?;
        require_non_negative("despawn_buffer", self.despawn_buffer)?;
        self.signal.validate()?;
        self.junction.validate()?;
        self.turn_ratios.validate()?;
        self.heterogeneity.validate()
    }
}

/// A single-lane roundabout with four arms.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RoundaboutConfig {
    /// m
    pub inner_radius: f64,
    /// m
    pub lane_width: f64,
    pub arm_length: f64,
    pub exit_length: f64,
    /// The angle between an arm and its entry or exit point on the ring, in radians.
    pub entry_angle: f64,
    /// The length of the merge zone at the end of each arm, in m.
    pub merge_zone: f64,
    pub merge_half_window: f64,
    pub merge_tries: usize,
    pub priority: PriorityRule,
    pub merge_min_gap: f64,
    pub merge_safety_relax: f64,
    /// Vehicles do not leave the ring within this many seconds of joining it.
    pub exit_grace: f64,
    /// The turn every vehicle takes, or `None` for a uniformly random choice.
    pub exit_rule: Option<Turn>,
    pub initial_ring_vehicles: usize,
    pub despawn_buffer: f64,
    pub heterogeneity: Heterogeneity,
}

impl Default for RoundaboutConfig {
    fn default() -> Self {
        Self {
            inner_radius: 22.0,
            lane_width: 5.8,
            arm_length: 85.0,
            exit_length: 85.0,
            entry_angle: 0.38,
            merge_zone: 16.0,
            merge_half_window: 3.0,
            merge_tries: 3,
            priority: PriorityRule::Through,
            merge_min_gap: 2.0,
            merge_safety_relax: 1.5,
            exit_grace: 0.6,
            exit_rule: None,
            initial_ring_vehicles: 10,
            despawn_buffer: 40.0,
            heterogeneity: Heterogeneity {
                truck_fraction: 0.08,
                speed_spread: 0.10,
                truck_speed_mult: 0.85,
                truck_length: 8.8,
                car_length: 4.6,
            },
        }
    }
}

impl RoundaboutConfig {
    /// The radius of the centre line of the ring.
    pub fn radius(&self) -> f64 {
        self.inner_radius + 0.5 * self.lane_width
    }

    pub fn ring_length(&self) -> f64 {
        TAU * self.radius()
    }

    pub fn validate(&self) -> crate::Result<()> {
        require_positive("inner_radius", self.inner_radius)?;
        require_positive("lane_width", self.lane_width)?;
        require_length("arm", self.arm_length)?;
        require_length("exit", self.exit_length)?;
        require_positive("entry_angle", self.entry_angle)?;
        if self.entry_angle >= std::f64::consts::FRAC_PI_4 {
            return Err(Error::InvalidParameter {
                name: "entry_angle",
                reason: "entry and exit points of neighbouring arms would swap".into(),
            });
        }
        if !(self.merge_zone > 0.0 && self.merge_zone <= self.arm_length) {
            return Err(Error::PositionOutOfRange {
                what: "merge zone",
                segment: "arm".into(),
                pos: self.arm_length - self.merge_zone,
                length: self.arm_length,
            });
        }
        require_non_negative("exit_grace", self.exit_grace)?;
        require_non_negative("despawn_buffer", self.despawn_buffer)?;
        self.heterogeneity.validate()?;
        self.merge_zone(SegmentId::default(), SegmentId::default(), 0.0)
            .validate()
    }

    fn merge_zone(&self, arm: SegmentId, ring: SegmentId, entry: f64) -> MergeZone {
        MergeZone {
            source: arm,
            trigger: self.arm_length - self.merge_zone,
            target: ring,
            target_lane: 0,
            anchor: (entry - self.merge_zone).rem_euclid(self.ring_length()),
            half_window: self.merge_half_window,
            tries: self.merge_tries,
            priority: self.priority,
            min_gap: self.merge_min_gap,
            safety_relax: self.merge_safety_relax,
        }
    }
}

/// The road topology to simulate.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NetworkConfig {
    OpenRoad(OpenRoadConfig),
    RingRoad(RingRoadConfig),
    Intersection(IntersectionConfig),
    Roundabout(RoundaboutConfig),
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig::OpenRoad(OpenRoadConfig::default())
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> crate::Result<()> {
        match self {
            NetworkConfig::OpenRoad(config) => config.validate(),
            NetworkConfig::RingRoad(config) => config.validate(),
            NetworkConfig::Intersection(config) => config.validate(),
            NetworkConfig::Roundabout(config) => config.validate(),
        }
    }

    /// The car-following calibration suited to the topology.
    pub fn default_model(&self) -> ModelParams {
        let base = ModelParams::default();
        match self {
            NetworkConfig::OpenRoad(_) => base,
            NetworkConfig::RingRoad(_) => ModelParams {
                desired_speed: 110.0 / 3.6,
                time_headway: 1.4,
                max_acc: 1.0,
                comf_dec: 2.5,
                ..base
            },
            NetworkConfig::Intersection(_) => self.calibrate(base),
            NetworkConfig::Roundabout(_) => ModelParams {
                desired_speed: 17.0,
                time_headway: 1.3,
                max_acc: 0.9,
                comf_dec: 2.0,
                ..base
            },
        }
    }

    /// Applies the limits the topology puts on any car-following calibration. At an
    /// intersection `max_acc` is at least 1.6, `comf_dec` at least 2.2, and
    /// `time_headway` at most 1.1.
    pub fn calibrate(&self, model: ModelParams) -> ModelParams {
        match self {
            NetworkConfig::Intersection(_) => ModelParams {
                max_acc: f64::max(model.max_acc, 1.6),
                comf_dec: f64::max(model.comf_dec, 2.2),
                time_headway: f64::min(model.time_headway, 1.1),
                ..model
            },
            _ => model,
        }
    }

    /// The lane-change calibration suited to the topology.
    pub fn default_mobil(&self) -> MobilParams {
        match self {
            NetworkConfig::RingRoad(_) => MobilParams {
                politeness: 0.1,
                threshold: 0.35,
                ..MobilParams::default()
            },
            _ => MobilParams::default(),
        }
    }
}

fn require_length(segment: &str, length: f64) -> crate::Result<()> {
    if length.is_finite() && length > 0.0 {
        Ok(())
    } else {
        Err(Error::NonPositiveLength {
            segment: segment.into(),
            length,
        })
    }
}

fn require_lanes(segment: &str, lane_count: usize) -> crate::Result<()> {
    if lane_count == 0 {
        Err(Error::NoLanes {
            segment: segment.into(),
        })
    } else {
        Ok(())
    }
}

/// Requires `0 <= pos < length`.
fn require_within(what: &'static str, segment: &str, pos: f64, length: f64) -> crate::Result<()> {
    if pos >= 0.0 && pos < length {
        Ok(())
    } else {
        Err(Error::PositionOutOfRange {
            what,
            segment: segment.into(),
            pos,
            length,
        })
    }
}

/// Moves a vehicle to a position on another segment or lane.
pub(crate) fn move_vehicle(
    segments: &mut SegmentSet,
    vehicles: &mut VehicleSet,
    id: VehicleId,
    segment: SegmentId,
    lane: usize,
    pos: f64,
) {
    let vehicle = &vehicles[id];
    let (from, from_lane) = (vehicle.segment, vehicle.lane);
    segments[from].remove_vehicle(from_lane, id);
    vehicles[id].set_location(segment, lane, pos);
    segments[segment].insert_vehicle(vehicles, id);
}

/// How vehicles spawned at an entry choose their route.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum EntryRoute {
    /// There is nothing to choose.
    Straight,
    Junction { from: Approach, ratios: TurnRatios },
    Roundabout { arm: usize, rule: Option<Turn> },
}

impl EntryRoute {
    fn draw(&self, rng: &mut Mulberry32) -> Option<RouteIntent> {
        match *self {
            EntryRoute::Straight => None,
            EntryRoute::Junction { from, ratios } => {
                Some(RouteIntent::Movement(MovementId::new(from, ratios.draw(rng))))
            }
            EntryRoute::Roundabout { arm, rule } => {
                let turn = rule.unwrap_or_else(|| Turn::ALL[rng.index(Turn::ALL.len())]);
                Some(RouteIntent::Exit(roundabout_exit(arm, turn)))
            }
        }
    }
}

/// The arm a vehicle entering from `arm` leaves by.
fn roundabout_exit(arm: usize, turn: Turn) -> usize {
    let offset = match turn {
        Turn::Right => 1,
        Turn::Through => 2,
        Turn::Left => 3,
    };
    (arm + offset) % ROUNDABOUT_ARMS.len()
}

/// A place where vehicles enter the network.
#[derive(Clone, Debug)]
pub struct Entry {
    name: String,
    segment: SegmentId,
    lane_count: usize,
    /// Where new vehicles are placed, in m.
    spawn_pos: f64,
    /// The initial speed as a fraction of the desired speed.
    speed_range: Interval<f64>,
    /// The clear space needed around a new vehicle, in m.
    min_gap: f64,
    route: EntryRoute,
    /// The demand in vehicles per hour.
    pub(crate) inflow: f64,
    /// The fractional vehicles owed to each lane.
    pub(crate) pending: SmallVec<[f64; 4]>,
}

impl Entry {
    fn new(
        name: &str,
        segment: SegmentId,
        lane_count: usize,
        spawn_pos: f64,
        speed_range: Interval<f64>,
        min_gap: f64,
        route: EntryRoute,
    ) -> Self {
        Self {
            name: name.to_string(),
            segment,
            lane_count,
            spawn_pos,
            speed_range,
            min_gap,
            route,
            inflow: 0.0,
            pending: SmallVec::from_elem(0.0, lane_count),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn segment(&self) -> SegmentId {
        self.segment
    }

    pub fn lane_count(&self) -> usize {
        self.lane_count
    }

    /// The demand in vehicles per hour.
    pub fn inflow(&self) -> f64 {
        self.inflow
    }
}

/// Where vehicles leave a roundabout ring.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RingExit {
    pub ring: SegmentId,
    /// The ring position of the exit, in m.
    pub pos: f64,
    /// The index of the arm in [ROUNDABOUT_ARMS].
    pub arm: usize,
    /// The outbound segment.
    pub to: SegmentId,
}

/// The complete simulated state: roads, vehicles, arbiters and the clock.
#[derive(Clone, Debug)]
pub struct Network {
    pub(crate) segments: SegmentSet,
    /// Segment IDs in construction order.
    pub(crate) order: Vec<SegmentId>,
    pub(crate) vehicles: VehicleSet,
    pub(crate) merges: Vec<MergeZone>,
    pub(crate) ring_exits: Vec<RingExit>,
    pub(crate) exit_grace: f64,
    pub(crate) junction: Option<Junction>,
    pub(crate) entries: Vec<Entry>,
    pub(crate) heterogeneity: Heterogeneity,
    pub(crate) brake_pulses: Option<BrakePulseConfig>,
    pub(crate) next_pulse_at: f64,
    /// The simulation time in s.
    pub(crate) time: f64,
    /// The serial number of the last vehicle created.
    next_serial: u64,
}

impl Network {
    fn empty(heterogeneity: Heterogeneity) -> Self {
        Self {
            segments: SegmentSet::with_key(),
            order: vec![],
            vehicles: VehicleSet::with_key(),
            merges: vec![],
            ring_exits: vec![],
            exit_grace: 0.0,
            junction: None,
            entries: vec![],
            heterogeneity,
            brake_pulses: None,
            next_pulse_at: f64::INFINITY,
            time: 0.0,
            next_serial: 0,
        }
    }

    /// Builds the network described by a validated configuration.
    pub(crate) fn build(config: &NetworkConfig, model: &ModelParams, rng: &mut Mulberry32) -> Self {
        match config {
            NetworkConfig::OpenRoad(config) => Self::open_road(config, model, rng),
            NetworkConfig::RingRoad(config) => Self::ring_road(config, model, rng),
            NetworkConfig::Intersection(config) => Self::intersection(config),
            NetworkConfig::Roundabout(config) => Self::roundabout(config, model, rng),
        }
    }

    fn open_road(config: &OpenRoadConfig, model: &ModelParams, rng: &mut Mulberry32) -> Self {
        let mut net = Self::empty(config.heterogeneity);
        let main = net.add_segment(&SegmentAttributes {
            name: "main",
            length: config.main_length,
            lane_count: config.lane_count,
            end: SegmentEnd::Open {
                despawn_buffer: config.despawn_buffer,
            },
        });
        let curve_end = config.curve_start + config.curve_length;
        net.segments[main].add_speed_region(SpeedRegion {
            range: Interval::new(config.curve_start, curve_end),
            factor: config.curve_factor,
        });
        net.segments[main].add_speed_region(SpeedRegion {
            range: Interval::new(curve_end, curve_end + config.post_curve_length),
            factor: config.post_curve_factor,
        });
        let ramp = net.add_segment(&SegmentAttributes {
            name: "ramp",
            length: config.ramp_length,
            lane_count: 1,
            end: SegmentEnd::Hold,
        });
        net.merges.push(config.merge_zone(ramp, main));

        let truck = config.heterogeneity.truck_length;
        net.entries.push(Entry::new(
            "main",
            main,
            config.lane_count,
            10.0,
            Interval::new(0.85, 1.20),
            7.0,
            EntryRoute::Straight,
        ));
        net.entries.push(Entry::new(
            "ramp",
            ramp,
            1,
            0.0,
            Interval::new(0.55, 0.80),
            f64::max(9.0, truck),
            EntryRoute::Straight,
        ));

        net.brake_pulses = config.brake_pulses;
        if let Some(pulses) = &config.brake_pulses {
            net.next_pulse_at = pulses.every;
        }

        let n = config.initial_vehicles_per_lane;
        if n > 0 {
            let spacing = config.main_length / n as f64;
            for lane in 0..config.lane_count {
                net.populate_lane(main, lane, n, 0.5 * spacing, model, rng, |_| None);
            }
        }
        net
    }

    fn ring_road(config: &RingRoadConfig, model: &ModelParams, rng: &mut Mulberry32) -> Self {
        let mut net = Self::empty(config.heterogeneity);
        let ring = net.add_segment(&SegmentAttributes {
            name: "ring",
            length: config.length(),
            lane_count: config.lane_count,
            end: SegmentEnd::Ring,
        });
        let n = config.vehicles_per_lane;
        if n > 0 {
            let spacing = config.length() / n as f64;
            for lane in 0..config.lane_count {
                let phase = (lane as f64 / config.lane_count as f64) * 0.7 * spacing;
                net.populate_lane(ring, lane, n, phase, model, rng, |_| None);
            }
        }
        net
    }

    fn intersection(config: &IntersectionConfig) -> Self {
        let mut net = Self::empty(config.heterogeneity);
        let approaches = Approach::ALL.map(|approach| {
            net.add_segment(&SegmentAttributes {
                name: &format!("in_{approach}"),
                length: config.arm_length,
                lane_count: 1,
                end: SegmentEnd::Hold,
            })
        });
        let exits = Approach::ALL.map(|approach| {
            net.add_segment(&SegmentAttributes {
                name: &format!("out_{approach}"),
                length: config.arm_length,
                lane_count: 1,
                end: SegmentEnd::Open {
                    despawn_buffer: config.despawn_buffer,
                },
            })
        });
        let mut connectors = [SegmentId::default(); MOVEMENT_COUNT];
        for movement in MovementId::all() {
            connectors[movement.index()] = net.add_segment(&SegmentAttributes {
                name: &movement.to_string(),
                length: config.connector_length(movement.turn),
                lane_count: 1,
                end: SegmentEnd::Connect(exits[movement.to().index()]),
            });
        }
        net.junction = Some(Junction::new(
            approaches,
            exits,
            connectors,
            config.signal,
            config.junction,
        ));

        let gap = config.heterogeneity.truck_length + 6.0;
        for approach in Approach::ALL {
            net.entries.push(Entry::new(
                &approach.to_string(),
                approaches[approach.index()],
                1,
                6.0,
                Interval::new(0.90, 1.15),
                gap,
                EntryRoute::Junction {
                    from: approach,
                    ratios: config.turn_ratios,
                },
            ));
        }
        net
    }

    fn roundabout(config: &RoundaboutConfig, model: &ModelParams, rng: &mut Mulberry32) -> Self {
        let mut net = Self::empty(config.heterogeneity);
        let length = config.ring_length();
        let radius = config.radius();
        let ring = net.add_segment(&SegmentAttributes {
            name: "ring",
            length,
            lane_count: 1,
            end: SegmentEnd::Ring,
        });
        let gap = config.heterogeneity.truck_length + 12.0;
        for (arm, approach) in ROUNDABOUT_ARMS.into_iter().enumerate() {
            let theta = approach.angle();
            let entry_pos = ((theta + config.entry_angle) * radius).rem_euclid(length);
            let exit_pos = ((theta - config.entry_angle) * radius).rem_euclid(length);
            let inbound = net.add_segment(&SegmentAttributes {
                name: &format!("in_{approach}"),
                length: config.arm_length,
                lane_count: 1,
                end: SegmentEnd::Hold,
            });
            let outbound = net.add_segment(&SegmentAttributes {
                name: &format!("out_{approach}"),
                length: config.exit_length,
                lane_count: 1,
                end: SegmentEnd::Open {
                    despawn_buffer: config.despawn_buffer,
                },
            });
            net.merges.push(config.merge_zone(inbound, ring, entry_pos));
            net.ring_exits.push(RingExit {
                ring,
                pos: exit_pos,
                arm,
                to: outbound,
            });
            net.entries.push(Entry::new(
                &approach.to_string(),
                inbound,
                1,
                0.0,
                Interval::new(0.55, 0.80),
                gap,
                EntryRoute::Roundabout {
                    arm,
                    rule: config.exit_rule,
                },
            ));
        }
        net.exit_grace = config.exit_grace;

        let n = config.initial_ring_vehicles;
        if n > 0 {
            let arms = ROUNDABOUT_ARMS.len();
            net.populate_lane(ring, 0, n, 0.0, model, rng, |rng| {
                Some(RouteIntent::Exit(rng.index(arms)))
            });
        }
        net
    }

    fn add_segment(&mut self, attribs: &SegmentAttributes) -> SegmentId {
        let id = self
            .segments
            .insert_with_key(|id| Segment::new(id, attribs));
        self.order.push(id);
        id
    }

    /// Places `count` evenly spaced vehicles in a lane, starting at `phase`.
    /// Vehicles that do not fit are left out.
    #[allow(clippy::too_many_arguments)]
    fn populate_lane(
        &mut self,
        segment: SegmentId,
        lane: usize,
        count: usize,
        phase: f64,
        model: &ModelParams,
        rng: &mut Mulberry32,
        intent: impl Fn(&mut Mulberry32) -> Option<RouteIntent>,
    ) {
        let length = self.segments[segment].length();
        let spacing = length / count as f64;
        for i in 0..count {
            let pos = self.segments[segment].wrap(phase + i as f64 * spacing);
            let attributes = self.heterogeneity.draw(rng);
            let vel = 0.9 * model.desired_speed * (0.95 + 0.10 * rng.next_f64());
            let intent = intent(rng);
            let fits = self.segments[segment].has_room(
                &self.vehicles,
                lane,
                pos,
                attributes.length,
                1.0,
            );
            if !fits {
                warn!(
                    "no room for initial vehicle {} of lane {} on `{}`",
                    i,
                    lane,
                    self.segments[segment].name()
                );
                continue;
            }
            self.add_vehicle(&attributes, segment, lane, pos, vel, intent);
        }
    }

    /// Creates a vehicle without checking for room.
    pub(crate) fn add_vehicle(
        &mut self,
        attributes: &VehicleAttributes,
        segment: SegmentId,
        lane: usize,
        pos: f64,
        vel: f64,
        intent: Option<RouteIntent>,
    ) -> VehicleId {
        self.next_serial += 1;
        let serial = self.next_serial;
        let now = self.time;
        let id = self.vehicles.insert_with_key(|id| {
            Vehicle::new(id, serial, attributes, segment, lane, pos, vel, now)
        });
        self.vehicles[id].intent = intent;
        self.segments[segment].insert_vehicle(&self.vehicles, id);
        id
    }

    /// Places a vehicle at an entry if there is room. Returns `None` without drawing
    /// any random numbers otherwise.
    pub(crate) fn spawn(
        &mut self,
        entry: usize,
        lane: usize,
        desired_speed: f64,
        rng: &mut Mulberry32,
    ) -> Option<VehicleId> {
        let entry = self.entries.get(entry)?;
        let (segment, pos, speed_range, route) =
            (entry.segment, entry.spawn_pos, entry.speed_range, entry.route);
        if lane >= entry.lane_count {
            return None;
        }
        let room = self.segments[segment].has_room(
            &self.vehicles,
            lane,
            pos,
            self.heterogeneity.max_length(),
            entry.min_gap,
        );
        if !room {
            return None;
        }
        let vel = desired_speed * speed_range.lerp(rng.next_f64());
        let attributes = self.heterogeneity.draw(rng);
        let intent = route.draw(rng);
        Some(self.add_vehicle(&attributes, segment, lane, pos, vel, intent))
    }

    /// Removes a vehicle from the network.
    pub(crate) fn remove_vehicle(&mut self, id: VehicleId) -> Option<Vehicle> {
        let vehicle = self.vehicles.remove(id)?;
        if let Some(segment) = self.segments.get_mut(vehicle.segment) {
            segment.remove_vehicle(vehicle.lane, id);
        }
        Some(vehicle)
    }


    /// The simulation time in s.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// The segments in construction order.
    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.order.iter().map(|id| &self.segments[*id])
    }

    pub fn segment(&self, id: SegmentId) -> Option<&Segment> {
        self.segments.get(id)
    }

    pub fn segment_by_name(&self, name: &str) -> Option<&Segment> {
        self.segments().find(|segment| segment.name() == name)
    }

    pub fn vehicle(&self, id: VehicleId) -> Option<&Vehicle> {
        self.vehicles.get(id)
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    /// The IDs of all vehicles by segment, then lane, then position.
    pub fn vehicle_ids(&self) -> impl Iterator<Item = VehicleId> + '_ {
        self.segments().flat_map(Segment::vehicles)
    }

    /// All vehicles by segment, then lane, then position.
    pub fn vehicles(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicle_ids().map(|id| &self.vehicles[id])
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn merges(&self) -> &[MergeZone] {
        &self.merges
    }

    pub fn ring_exits(&self) -> &[RingExit] {
        &self.ring_exits
    }

    pub fn junction(&self) -> Option<&Junction> {
        self.junction.as_ref()
    }

    /// The segment a vehicle continues onto past the end of `segment`.
    pub(crate) fn downstream_of(&self, segment: &Segment, vehicle: &Vehicle) -> Option<SegmentId> {
        match segment.end() {
            SegmentEnd::Connect(next) => Some(next),
            SegmentEnd::Hold => {
                let junction = self.junction.as_ref()?;
                junction.approach_of(segment.id())?;
                match vehicle.intent {
                    Some(RouteIntent::Movement(movement)) => {
                        Some(junction.movement(movement).connector())
                    }
                    _ => None,
                }
            }
            SegmentEnd::Open { .. } | SegmentEnd::Ring => None,
        }
    }

    /// What the vehicle at index `idx` of a lane sees ahead of it.
    pub(crate) fn leader_of(&self, segment: &Segment, lane: usize, idx: usize) -> Option<Leader> {
        let ids = segment.lane(lane);
        let vehicle = &self.vehicles[ids[idx]];
        if let Some(next) = ids.get(idx + 1) {
            return segment.leader_at(&self.vehicles, vehicle.pos, Some(*next));
        }
        if segment.is_ring() {
            return match ids.len() {
                1 => None,
                _ => segment.leader_at(&self.vehicles, vehicle.pos, Some(ids[0])),
            };
        }
        let next = &self.segments[self.downstream_of(segment, vehicle)?];
        let next_lane = lane.min(next.lane_count() - 1);
        let leader = &self.vehicles[*next.lane(next_lane).first()?];
        Some(Leader {
            gap: (segment.length() - vehicle.pos) + leader.pos_rear(),
            vel: leader.vel,
            acc: leader.acc,
        })
    }
}
