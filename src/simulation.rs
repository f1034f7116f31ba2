use crate::conflict::{Approach, Axis};
use crate::error::{require_non_negative, require_positive};
use crate::junction::Junction;
use crate::network::{move_vehicle, Network, NetworkConfig};
use crate::rng::{Mulberry32, Seed};
use crate::segment::{Segment, SegmentEnd};
use crate::snapshot::{SimEvent, Snapshot};
use crate::vehicle::acceleration::ModelParams;
use crate::vehicle::lane_change::{LaneChangeCandidate, MobilParams, Side};
use crate::vehicle::{BrakeOverride, Leader, RouteIntent, Vehicle, VehicleAttributes};
use crate::{Error, SegmentId, SegmentSet, VehicleId, VehicleSet};
use log::{debug, trace, warn};
use rand_distr::{Distribution, Normal};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Vehicles this close to the end of a junction approach are at the stop line.
const STOP_LINE_TOLERANCE: f64 = 0.05; // m

/// Vehicles held at the end of a segment are kept this far short of it.
const HOLD_MARGIN: f64 = 0.01; // m

/// The range of desired-speed multipliers drawn by [Simulation::randomise_speed_multipliers].
const SPEED_MULT_MIN: f64 = 0.75;
const SPEED_MULT_MAX: f64 = 1.25;

/// The configuration of a simulation run.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SimConfig {
    pub seed: Seed,
    pub network: NetworkConfig,
    /// The fixed time step used by [Simulation::advance], in s.
    pub dt: f64,
    /// The longest frame accepted by [Simulation::advance], in s.
    pub max_frame: f64,
    /// The most steps [Simulation::advance] runs per call.
    pub max_substeps: usize,
    /// The amplitude of uniform acceleration noise, in m/s<sup>2</sup>.
    pub noise_amplitude: f64,
    /// The smallest bumper-to-bumper gap tolerated between vehicles in a lane, in m.
    pub min_spacing: f64,
    /// Overrides the car-following calibration of the topology.
    pub model: Option<ModelParams>,
    /// Overrides the lane-change calibration of the topology.
    pub mobil: Option<MobilParams>,
    /// Whether to keep [SimEvent]s for [Simulation::drain_events].
    pub record_events: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: Seed::Default,
            network: NetworkConfig::default(),
            dt: 0.05,
            max_frame: 0.25,
            max_substeps: 10,
            noise_amplitude: 0.0,
            min_spacing: 0.2,
            model: None,
            mobil: None,
            record_events: false,
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> crate::Result<()> {
        self.network.validate()?;
        require_positive("dt", self.dt)?;
        require_positive("max_frame", self.max_frame)?;
        require_positive("max_substeps", self.max_substeps as f64)?;
        require_non_negative("noise_amplitude", self.noise_amplitude)?;
        require_non_negative("min_spacing", self.min_spacing)?;
        if let Some(model) = &self.model {
            model.validate()?;
        }
        if let Some(mobil) = &self.mobil {
            mobil.validate()?;
        }
        Ok(())
    }
}

/// Events of the current run, kept only when asked for.
#[derive(Debug, Default)]
struct EventLog {
    enabled: bool,
    events: Vec<SimEvent>,
}

impl EventLog {
    fn push(&mut self, event: SimEvent) {
        if self.enabled {
            self.events.push(event);
        }
    }
}

/// A traffic simulation.
#[derive(Debug)]
pub struct Simulation {
    config: SimConfig,
    /// The roads, vehicles and arbiters.
    network: Network,
    /// The source of every random choice.
    rng: Mulberry32,
    /// The car-following calibration.
    model: ModelParams,
    /// The lane-change calibration.
    mobil: MobilParams,
    /// Wall-clock time not yet simulated by [Simulation::advance], in s.
    accumulator: f64,
    /// The number of steps since the start of the run.
    frame: usize,
    events: EventLog,
}

impl Simulation {
    /// Creates a new simulation, failing if the configuration is invalid.
    pub fn new(config: SimConfig) -> crate::Result<Self> {
        config.validate()?;
        let model = config.network.calibrate(
            config
                .model
                .unwrap_or_else(|| config.network.default_model()),
        );
        let mobil = config
            .mobil
            .unwrap_or_else(|| config.network.default_mobil());
        let mut rng = Mulberry32::from_seed_value(&config.seed);
        let network = Network::build(&config.network, &model, &mut rng);
        debug!(
            "created simulation with seed {:#010x} and {} vehicles",
            rng.seed(),
            network.vehicle_count()
        );
        Ok(Self {
            events: EventLog {
                enabled: config.record_events,
                events: vec![],
            },
            config,
            network,
            rng,
            model,
            mobil,
            accumulator: 0.0,
            frame: 0,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// The simulated network.
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// The simulation time in s.
    pub fn time(&self) -> f64 {
        self.network.time
    }

    /// Gets the current simulation frame index.
    pub fn frame(&self) -> usize {
        self.frame
    }

    /// The car-following calibration in use, after the topology's limits
    /// ([NetworkConfig::calibrate]) were applied.
    pub fn model_params(&self) -> &ModelParams {
        &self.model
    }

    /// The car-following calibration, which may be changed between steps. The
    /// topology's limits are applied again at the start of the next step.
    pub fn model_params_mut(&mut self) -> &mut ModelParams {
        &mut self.model
    }

    pub fn mobil_params(&self) -> &MobilParams {
        &self.mobil
    }

    /// The lane-change calibration, which may be changed between steps.
    pub fn mobil_params_mut(&mut self) -> &mut MobilParams {
        &mut self.mobil
    }

    /// Sets the demand at an entry in vehicles per hour, split evenly between its lanes.
    pub fn set_inflow(&mut self, entry: usize, veh_per_hour: f64) -> crate::Result<()> {
        require_non_negative("inflow", veh_per_hour)?;
        let entry = self
            .network
            .entries
            .get_mut(entry)
            .ok_or(Error::UnknownEntry(entry))?;
        entry.inflow = veh_per_hour;
        Ok(())
    }

    /// The index of the entry with the given name.
    pub fn entry_by_name(&self, name: &str) -> Option<usize> {
        self.network
            .entries()
            .iter()
            .position(|entry| entry.name() == name)
    }

    /// Returns an iterator over all the vehicles in the simulation,
    /// by segment, then lane, then position.
    pub fn iter_vehicles(&self) -> impl Iterator<Item = &Vehicle> {
        self.network.vehicles()
    }

    /// Gets a reference to the vehicle with the given ID, if it still exists.
    pub fn get_vehicle(&self, vehicle_id: VehicleId) -> Option<&Vehicle> {
        self.network.vehicle(vehicle_id)
    }

    pub fn segment_by_name(&self, name: &str) -> Option<&Segment> {
        self.network.segment_by_name(name)
    }

    /// A copy of the state for rendering or logging.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::capture(&self.network)
    }

    /// Takes the events recorded since the last call.
    pub fn drain_events(&mut self) -> impl Iterator<Item = SimEvent> + '_ {
        self.events.events.drain(..)
    }

    /// Restarts the run from the stored configuration. The generator is rewound, so the
    /// run repeats exactly as long as the inputs between steps do. Inflows and the current
    /// model parameters are kept.
    pub fn reset(&mut self) {
        self.rng.reset();
        let inflows: SmallVec<[f64; 4]> = self
            .network
            .entries()
            .iter()
            .map(|entry| entry.inflow())
            .collect();
        self.network = Network::build(&self.config.network, &self.model, &mut self.rng);
        for (entry, inflow) in self.network.entries.iter_mut().zip(inflows) {
            entry.inflow = inflow;
        }
        self.accumulator = 0.0;
        self.frame = 0;
        self.events.events.clear();
        debug!("simulation reset");
    }

    /// Advances the simulation by a variable wall-clock interval, in fixed steps of
    /// [SimConfig::dt]. Returns the number of steps taken.
    ///
    /// # Parameters
    /// * `elapsed` - The time since the last call in s, clamped to [SimConfig::max_frame]
    pub fn advance(&mut self, elapsed: f64) -> usize {
        let elapsed = if elapsed.is_finite() {
            elapsed.clamp(0.0, self.config.max_frame)
        } else {
            0.0
        };
        let dt = self.config.dt;
        self.accumulator += elapsed;
        let mut steps = 0;
        while self.accumulator >= dt && steps < self.config.max_substeps {
            self.step(dt);
            self.accumulator -= dt;
            steps += 1;
        }
        if self.accumulator >= dt {
            trace!("dropping {:.3} s of simulation time", self.accumulator);
            self.accumulator %= dt;
        }
        steps
    }

    /// Runs fixed steps of [SimConfig::dt] for `duration` seconds.
    pub fn run_for(&mut self, duration: f64) {
        let dt = self.config.dt;
        let steps = (duration / dt).round();
        if steps > 0.0 {
            for _ in 0..steps as usize {
                self.step(dt);
            }
        }
    }

    /// Advances the simulation by `dt` seconds.
    ///
    /// For a realistic simulation, do not use a time step greater than around 0.2.
    pub fn step(&mut self, dt: f64) {
        if !(dt > 0.0 && dt.is_finite()) {
            warn!("ignoring step of {dt} s");
            return;
        }
        let now = self.network.time;
        self.model = self.config.network.calibrate(self.model);
        self.apply_brake_pulses(now);
        self.spawn_vehicles(dt);
        self.calculate_lane_changes(now);
        self.clear_stop_lines();
        self.transfer_connections();
        self.exit_ring(now);
        self.merge_vehicles(now);
        self.hold_junction_approaches(now);
        self.apply_accelerations(now);
        self.integrate(dt);
        self.enter_junction(now);
        self.hold_at_segment_ends();
        self.correct_overlaps(dt);
        self.despawn_vehicles(now + dt);
        self.update_signal(dt, now + dt);
        self.network.time = now + dt;
        self.frame += 1;
    }

    /// Tries to place a vehicle at an entry, drawing its speed, class and route.
    /// Returns `Ok(None)` if there is no room.
    pub fn try_spawn(&mut self, entry: usize, lane: usize) -> crate::Result<Option<VehicleId>> {
        let found = self
            .network
            .entries()
            .get(entry)
            .ok_or(Error::UnknownEntry(entry))?;
        if lane >= found.lane_count() {
            let segment = self.network.segments[found.segment()].name().to_string();
            return Err(Error::LaneOutOfRange {
                segment,
                lane,
                lane_count: found.lane_count(),
            });
        }
        Ok(self.spawn_at(entry, lane))
    }

    /// Places a vehicle with the given attributes and no route, without drawing random
    /// numbers. Returns `Ok(None)` if it would come closer than [SimConfig::min_spacing]
    /// to another vehicle.
    pub fn insert_vehicle(
        &mut self,
        segment: SegmentId,
        lane: usize,
        pos: f64,
        vel: f64,
        attributes: &VehicleAttributes,
    ) -> crate::Result<Option<VehicleId>> {
        let seg = self
            .network
            .segments
            .get(segment)
            .ok_or(Error::UnknownSegment)?;
        if lane >= seg.lane_count() {
            return Err(Error::LaneOutOfRange {
                segment: seg.name().to_string(),
                lane,
                lane_count: seg.lane_count(),
            });
        }
        let inside = pos >= 0.0 && (pos < seg.length() || (!seg.is_ring() && pos <= seg.length()));
        if !inside {
            return Err(Error::PositionOutOfRange {
                what: "vehicle",
                segment: seg.name().to_string(),
                pos,
                length: seg.length(),
            });
        }
        require_positive("vehicle length", attributes.length)?;
        require_positive("speed_mult", attributes.speed_mult)?;
        require_non_negative("vehicle speed", vel)?;
        let min_spacing = self.config.min_spacing;
        if !seg.has_room(&self.network.vehicles, lane, pos, attributes.length, min_spacing) {
            return Ok(None);
        }
        let id = self
            .network
            .add_vehicle(attributes, segment, lane, pos, vel, None);
        self.record_spawn(id);
        Ok(Some(id))
    }

    /// Brakes a random vehicle for `2 + u` seconds at `6 + 2u` m/s<sup>2</sup>.
    /// Returns the vehicle, or `None` if the network is empty.
    pub fn trigger_brake_pulse(&mut self) -> Option<VehicleId> {
        let id = self.random_vehicle()?;
        let duration = 2.0 + self.rng.next_f64();
        let decel = 6.0 + 2.0 * self.rng.next_f64();
        self.apply_brake(id, decel, duration, self.network.time);
        Some(id)
    }

    /// Applies an extra deceleration to a vehicle for `duration` seconds.
    /// Returns `false` if the vehicle does not exist.
    pub fn brake_vehicle(&mut self, vehicle_id: VehicleId, decel: f64, duration: f64) -> bool {
        if self.network.vehicle(vehicle_id).is_none() {
            return false;
        }
        self.apply_brake(vehicle_id, decel, duration, self.network.time);
        true
    }

    /// Holds one axis of the junction signal green, or returns to the automatic cycle.
    pub fn set_signal_override(&mut self, axis: Option<Axis>) -> crate::Result<()> {
        let junction = self.network.junction.as_mut().ok_or(Error::NoJunction)?;
        let signal = junction.signal_mut();
        signal.set_override(axis);
        debug!("signal override {:?}, now {:?}", axis, signal.phase());
        let phase = signal.phase();
        self.events.push(SimEvent::SignalPhase {
            time: self.network.time,
            phase,
        });
        Ok(())
    }

    /// Randomly assigns a desired speed multiplier to each vehicle,
    /// which is sampled from a normal distribution with a mean of 1 (no adjustment)
    /// and standard deviation of `stddev`.
    pub fn randomise_speed_multipliers(&mut self, stddev: f64) -> crate::Result<()> {
        let distr = Normal::new(1.0, stddev).map_err(|err| Error::InvalidParameter {
            name: "stddev",
            reason: err.to_string(),
        })?;
        let ids: Vec<VehicleId> = self.network.vehicle_ids().collect();
        for id in ids {
            let factor = distr
                .sample(&mut self.rng)
                .clamp(SPEED_MULT_MIN, SPEED_MULT_MAX);
            self.network.vehicles[id].set_speed_mult(factor);
        }
        Ok(())
    }

    fn random_vehicle(&mut self) -> Option<VehicleId> {
        let ids: Vec<VehicleId> = self.network.vehicle_ids().collect();
        if ids.is_empty() {
            return None;
        }
        Some(ids[self.rng.index(ids.len())])
    }

    fn apply_brake(&mut self, id: VehicleId, decel: f64, duration: f64, now: f64) {
        let vehicle = &mut self.network.vehicles[id];
        vehicle.brake = Some(BrakeOverride {
            decel,
            until: now + duration,
        });
        debug!(
            "vehicle {} braking at {:.1} m/s2 for {:.1} s",
            vehicle.serial(),
            decel,
            duration
        );
        let serial = vehicle.serial();
        self.events.push(SimEvent::BrakePulse {
            vehicle: serial,
            time: now,
            decel,
            duration,
        });
    }

    /// Brakes a random vehicle whenever a periodic pulse is due.
    fn apply_brake_pulses(&mut self, now: f64) {
        let Some(pulses) = self.network.brake_pulses else {
            return;
        };
        if now < self.network.next_pulse_at {
            return;
        }
        self.network.next_pulse_at += pulses.every;
        if let Some(id) = self.random_vehicle() {
            self.apply_brake(id, pulses.decel, pulses.duration, now);
        }
    }

    fn record_spawn(&mut self, id: VehicleId) {
        let vehicle = &self.network.vehicles[id];
        trace!(
            "spawned vehicle {} at {:.1} m on lane {}",
            vehicle.serial(),
            vehicle.pos_front(),
            vehicle.lane()
        );
        self.events.push(SimEvent::Spawned {
            vehicle: vehicle.serial(),
            time: self.network.time,
            segment: vehicle.segment_id(),
            lane: vehicle.lane(),
            class: vehicle.class(),
        });
    }

    fn spawn_at(&mut self, entry: usize, lane: usize) -> Option<VehicleId> {
        let desired_speed = self.model.desired_speed;
        let id = self
            .network
            .spawn(entry, lane, desired_speed, &mut self.rng)?;
        self.record_spawn(id);
        Some(id)
    }

    /// Accumulates the demand at each entry and spawns the vehicles that are due.
    /// A lane that has no room keeps its demand for a later step.
    fn spawn_vehicles(&mut self, dt: f64) {
        for entry in 0..self.network.entries.len() {
            let lanes = self.network.entries[entry].lane_count();
            let per_lane = self.network.entries[entry].inflow / 3600.0 / lanes as f64 * dt;
            for lane in 0..lanes {
                self.network.entries[entry].pending[lane] += per_lane;
                while self.network.entries[entry].pending[lane] >= 1.0 {
                    if self.spawn_at(entry, lane).is_none() {
                        trace!(
                            "no room at entry `{}` lane {}",
                            self.network.entries[entry].name(),
                            lane
                        );
                        break;
                    }
                    self.network.entries[entry].pending[lane] -= 1.0;
                }
            }
        }
    }

    /// Performs lane changes. Decisions are made against the state at the start of
    /// the step and then applied one by one, each re-checked for room.
    fn calculate_lane_changes(&mut self, now: f64) {
        let Self {
            network,
            events,
            model,
            mobil,
            config,
            ..
        } = self;
        let mut decisions: Vec<(VehicleId, usize)> = vec![];
        for seg_id in &network.order {
            let segment = &network.segments[*seg_id];
            if segment.lane_count() < 2 || segment.end() == SegmentEnd::Hold {
                continue;
            }
            for lane in 0..segment.lane_count() {
                for &id in segment.lane(lane) {
                    let vehicle = &network.vehicles[id];
                    let cooling = vehicle
                        .last_lane_change
                        .map_or(false, |t| now - t < mobil.cooldown);
                    if cooling {
                        continue;
                    }
                    let target =
                        choose_lane(network, segment, vehicle, model, mobil, config.min_spacing);
                    if let Some(target) = target {
                        decisions.push((id, target));
                    }
                }
            }
        }

        let Network {
            segments, vehicles, ..
        } = network;
        for (id, target) in decisions {
            let vehicle = &vehicles[id];
            let (seg_id, from, pos) = (vehicle.segment, vehicle.lane, vehicle.pos);
            let room =
                segments[seg_id].has_room(vehicles, target, pos, vehicle.length(), config.min_spacing);
            if !room {
                continue;
            }
            move_vehicle(segments, vehicles, id, seg_id, target, pos);
            let vehicle = &mut vehicles[id];
            vehicle.prev_lane = Some(from);
            vehicle.last_lane_change = Some(now);
            trace!("vehicle {} changed from lane {} to {}", vehicle.serial(), from, target);
            events.push(SimEvent::LaneChanged {
                vehicle: vehicle.serial(),
                time: now,
                from,
                to: target,
            });
        }
    }

    /// Stop lines only last for one step; arbitration sets them again where still needed.
    fn clear_stop_lines(&mut self) {
        for vehicle in self.network.vehicles.values_mut() {
            vehicle.stop_line = None;
        }
    }

    /// Admits the approach heads that reached the stop line in this step and whose
    /// movement is clear. Admitted vehicles keep their speed and carry the distance
    /// driven past the line onto the connector.
    fn enter_junction(&mut self, now: f64) {
        let Self {
            network, events, ..
        } = self;
        let Network {
            segments,
            vehicles,
            junction,
            ..
        } = network;
        let Some(junction) = junction.as_mut() else {
            return;
        };
        for approach in Approach::ALL {
            let seg_id = junction.approach_segment(approach);
            let segment = &segments[seg_id];
            let Some(&head) = segment.lane(0).last() else {
                continue;
            };
            let vehicle = &vehicles[head];
            if vehicle.pos < segment.length() - STOP_LINE_TOLERANCE {
                continue;
            }
            let Some(RouteIntent::Movement(movement)) = vehicle.intent else {
                continue;
            };
            if !junction.admits(movement, now, segments, vehicles)
                || !has_entry_room(junction, segments, vehicles, movement, vehicle)
            {
                continue;
            }
            let length = segment.length();
            let pos = f64::max(0.0, vehicle.pos - length);
            let prev_pos = vehicle.prev_pos - length;
            let connector = junction.movement(movement).connector();
            let reservation = junction.reserve(movement, now);
            move_vehicle(segments, vehicles, head, connector, 0, pos);
            vehicles[head].prev_pos = prev_pos;
            let serial = vehicles[head].serial();
            debug!(
                "vehicle {} entered the junction on {} at {:.2} s",
                serial, movement, now
            );
            events.push(SimEvent::EnteredJunction {
                vehicle: serial,
                time: now,
                movement,
                lock_until: reservation.lock_until,
            });
        }
    }

    /// Moves vehicles past the end of a segment onto the segment it connects to.
    fn transfer_connections(&mut self) {
        let min_spacing = self.config.min_spacing;
        let Network {
            segments,
            vehicles,
            order,
            ..
        } = &mut self.network;
        for seg_id in order.iter() {
            let SegmentEnd::Connect(next) = segments[*seg_id].end() else {
                continue;
            };
            let length = segments[*seg_id].length();
            for lane in 0..segments[*seg_id].lane_count() {
                while let Some(&head) = segments[*seg_id].lane(lane).last() {
                    let vehicle = &vehicles[head];
                    if vehicle.pos < length {
                        break;
                    }
                    let next_lane = lane.min(segments[next].lane_count() - 1);
                    let pos = vehicle.pos - length;
                    if !segments[next].has_room(vehicles, next_lane, pos, vehicle.length(), min_spacing)
                    {
                        break;
                    }
                    move_vehicle(segments, vehicles, head, next, next_lane, pos);
                }
            }
        }
    }

    /// Moves ring vehicles that passed their exit in the last step onto the exit road.
    fn exit_ring(&mut self, now: f64) {
        let min_spacing = self.config.min_spacing;
        let Self {
            network, events, ..
        } = self;
        let Network {
            segments,
            vehicles,
            ring_exits,
            exit_grace,
            ..
        } = network;
        for exit in ring_exits.iter() {
            let ring = &segments[exit.ring];
            let mut leaving: SmallVec<[(VehicleId, f64); 4]> = SmallVec::new();
            for &id in ring.lane(0) {
                let vehicle = &vehicles[id];
                if vehicle.intent != Some(RouteIntent::Exit(exit.arm)) {
                    continue;
                }
                if vehicle.merged_at.map_or(false, |t| now - t < *exit_grace) {
                    continue;
                }
                let to_exit = ring.forward_distance(vehicle.prev_pos, exit.pos);
                let moved = ring.forward_distance(vehicle.prev_pos, vehicle.pos);
                if moved > 0.0 && to_exit > 0.0 && to_exit <= moved {
                    leaving.push((id, moved - to_exit));
                }
            }
            for (id, pos) in leaving {
                let length = vehicles[id].length();
                if !segments[exit.to].has_room(vehicles, 0, pos, length, min_spacing) {
                    continue;
                }
                move_vehicle(segments, vehicles, id, exit.to, 0, pos);
                let serial = vehicles[id].serial();
                debug!("vehicle {} left the ring at arm {}", serial, exit.arm);
                events.push(SimEvent::ExitedRing {
                    vehicle: serial,
                    time: now,
                    arm: exit.arm,
                });
            }
        }
    }

    /// Moves vehicles in merge zones into the target lane where there is an acceptable gap.
    /// A lead vehicle that cannot merge is stopped at the end of its segment.
    fn merge_vehicles(&mut self, now: f64) {
        let Self {
            network,
            events,
            model,
            mobil,
            ..
        } = self;
        let Network {
            segments,
            vehicles,
            merges,
            ..
        } = network;
        for zone in merges.iter() {
            let candidates: SmallVec<[VehicleId; 8]> = segments[zone.source]
                .lane(0)
                .iter()
                .rev()
                .copied()
                .take_while(|id| vehicles[*id].pos >= zone.trigger)
                .collect();
            let mut is_head = true;
            for id in candidates {
                let slot =
                    zone.find_slot(&vehicles[id], &segments[zone.target], vehicles, model, mobil);
                let Some(slot) = slot else {
                    if is_head {
                        vehicles[id].stop_line = Some(segments[zone.source].length());
                    }
                    is_head = false;
                    continue;
                };
                move_vehicle(segments, vehicles, id, zone.target, zone.target_lane, slot.pos);
                let vehicle = &mut vehicles[id];
                vehicle.merged_at = Some(now);
                vehicle.last_lane_change = Some(now);
                vehicle.prev_lane = None;
                debug!(
                    "vehicle {} merged at {:.1} m (gaps {:.1} m ahead, {:.1} m behind)",
                    vehicle.serial(),
                    slot.pos,
                    slot.gap_ahead,
                    slot.gap_behind
                );
                events.push(SimEvent::Merged {
                    vehicle: vehicle.serial(),
                    time: now,
                    segment: zone.target,
                    pos: slot.pos,
                    gap_ahead: slot.gap_ahead,
                    gap_behind: slot.gap_behind,
                });
            }
        }
    }

    /// Gives the lead vehicle of each approach a stop line when it may not enter the
    /// junction and is close enough to have to react.
    fn hold_junction_approaches(&mut self, now: f64) {
        let comf_dec = self.model.comf_dec;
        let Network {
            segments,
            vehicles,
            junction,
            ..
        } = &mut self.network;
        let Some(junction) = junction.as_ref() else {
            return;
        };
        for approach in Approach::ALL {
            let segment = &segments[junction.approach_segment(approach)];
            let Some(&head) = segment.lane(0).last() else {
                continue;
            };
            let vehicle = &vehicles[head];
            let blocked = match vehicle.intent {
                Some(RouteIntent::Movement(movement)) => {
                    !junction.admits(movement, now, segments, vehicles)
                        || !has_entry_room(junction, segments, vehicles, movement, vehicle)
                }
                _ => true,
            };
            let near = segment.length() - vehicle.pos <= junction.decision_distance(vehicle, comf_dec);
            if blocked && near {
                vehicles[head].stop_line = Some(segment.length());
            }
        }
    }

    /// Calculates the accelerations of the vehicles.
    fn apply_accelerations(&mut self, now: f64) {
        let Self {
            network,
            rng,
            model,
            config,
            ..
        } = self;
        let mut accs = Vec::with_capacity(network.vehicles.len());
        for seg_id in &network.order {
            let segment = &network.segments[*seg_id];
            for lane in 0..segment.lane_count() {
                for (idx, &id) in segment.lane(lane).iter().enumerate() {
                    let vehicle = &network.vehicles[id];
                    let stop = vehicle
                        .stop_line
                        .map(|line| Leader::stop_line(line - vehicle.pos));
                    let leader = Leader::nearest(network.leader_of(segment, lane, idx), stop);
                    let params = vehicle.model_params(model, segment.speed_factor(vehicle.pos));
                    let mut acc = vehicle.projected_acc(&params, leader) - vehicle.brake_decel(now);
                    if config.noise_amplitude > 0.0 {
                        acc += (rng.next_f64() - 0.5) * 2.0 * config.noise_amplitude;
                    }
                    accs.push((id, acc));
                }
            }
        }
        for (id, acc) in accs {
            network.vehicles[id].acc = acc;
        }
    }

    /// Integrates the velocities and positions of all vehicles. Positions wrap on rings.
    fn integrate(&mut self, dt: f64) {
        let Network {
            segments,
            vehicles,
            order,
            ..
        } = &mut self.network;
        for seg_id in order.iter() {
            let segment = &segments[*seg_id];
            for id in segment.vehicles() {
                let vehicle = &mut vehicles[id];
                vehicle.integrate(dt);
                if segment.is_ring() {
                    vehicle.pos = segment.wrap(vehicle.pos);
                }
            }
        }
    }

    /// Stops the vehicles that drove past the end of a segment that holds them,
    /// i.e. merge sources that found no slot and junction approaches that were refused.
    fn hold_at_segment_ends(&mut self) {
        let Network {
            segments,
            vehicles,
            order,
            ..
        } = &mut self.network;
        for seg_id in order.iter() {
            let segment = &segments[*seg_id];
            if segment.end() != SegmentEnd::Hold {
                continue;
            }
            for id in segment.vehicles() {
                let vehicle = &mut vehicles[id];
                if vehicle.pos >= segment.length() {
                    vehicle.pos = f64::max(segment.length() - HOLD_MARGIN, vehicle.prev_pos);
                    vehicle.vel = 0.0;
                    vehicle.acc = 0.0;
                }
            }
        }
    }

    /// Restores lane order and pulls back vehicles that came too close to their leader.
    fn correct_overlaps(&mut self, dt: f64) {
        let min_spacing = self.config.min_spacing;
        let Network {
            segments,
            vehicles,
            order,
            ..
        } = &mut self.network;
        for seg_id in order.iter() {
            let segment = &mut segments[*seg_id];
            segment.sort_lanes(vehicles);
            for lane in 0..segment.lane_count() {
                correct_lane(segment, lane, vehicles, dt, min_spacing);
            }
            if segment.is_ring() {
                segment.sort_lanes(vehicles);
            }
        }
    }

    /// Removes vehicles that have driven off the end of the network.
    fn despawn_vehicles(&mut self, end_time: f64) {
        let vehicles = &self.network.vehicles;
        let gone: Vec<VehicleId> = self
            .network
            .segments()
            .filter_map(|segment| match segment.end() {
                SegmentEnd::Open { despawn_buffer } => {
                    Some((segment, segment.length() + despawn_buffer))
                }
                _ => None,
            })
            .flat_map(|(segment, limit)| {
                segment
                    .vehicles()
                    .filter(move |id| vehicles[*id].pos > limit)
            })
            .collect();
        for id in gone {
            let Some(vehicle) = self.network.remove_vehicle(id) else {
                continue;
            };
            trace!("vehicle {} left the network", vehicle.serial());
            self.events.push(SimEvent::Despawned {
                vehicle: vehicle.serial(),
                time: end_time,
                travel_time: end_time - vehicle.spawned_at(),
                wait_time: vehicle.wait_time(),
            });
        }
    }

    /// Updates the junction signal.
    fn update_signal(&mut self, dt: f64, end_time: f64) {
        let Self {
            network, events, ..
        } = self;
        let Some(junction) = network.junction.as_mut() else {
            return;
        };
        for phase in junction.signal_mut().step(dt) {
            debug!("signal entered {:?} at {:.2} s", phase, end_time);
            events.push(SimEvent::SignalPhase {
                time: end_time,
                phase,
            });
        }
    }
}

/// Whether the start of a movement's path has room for the vehicle.
fn has_entry_room(
    junction: &Junction,
    segments: &SegmentSet,
    vehicles: &VehicleSet,
    movement: crate::conflict::MovementId,
    vehicle: &Vehicle,
) -> bool {
    let connector = &segments[junction.movement(movement).connector()];
    let pos = f64::max(0.0, vehicle.pos - segments[vehicle.segment].length());
    connector.has_room(
        vehicles,
        0,
        pos,
        vehicle.length(),
        junction.params().entry_gap,
    )
}

/// Decides whether a vehicle wants to change lanes, and to which lane.
fn choose_lane(
    network: &Network,
    segment: &Segment,
    vehicle: &Vehicle,
    model: &ModelParams,
    mobil: &MobilParams,
    min_spacing: f64,
) -> Option<usize> {
    let vehicles = &network.vehicles;
    let params = vehicle.model_params(model, segment.speed_factor(vehicle.pos));
    let (own_leader, _) = segment.neighbours(vehicles, vehicle.lane, vehicle.pos, Some(vehicle.id));
    let acc_old = vehicle.projected_acc(&params, segment.leader_at(vehicles, vehicle.pos, own_leader));

    let mut candidates: SmallVec<[LaneChangeCandidate; 2]> = SmallVec::new();
    for side in [Side::Left, Side::Right] {
        let Some(target) = side.target(vehicle.lane, segment.lane_count()) else {
            continue;
        };
        let (ahead, behind) = segment.neighbours(vehicles, target, vehicle.pos, None);
        let gap_ahead = ahead.map(|id| segment.gap_to(vehicles, vehicle.pos, id));
        let gap_behind =
            behind.map(|id| segment.forward_distance(vehicles[id].pos, vehicle.pos) - vehicle.length());
        if gap_ahead.map_or(false, |gap| gap < min_spacing)
            || gap_behind.map_or(false, |gap| gap < min_spacing)
        {
            continue;
        }
        let acc_new = vehicle.projected_acc(&params, segment.leader_at(vehicles, vehicle.pos, ahead));
        let (follower_old, follower_new) = match (behind, gap_behind) {
            (Some(id), Some(gap)) => {
                let follower = &vehicles[id];
                let follower_params =
                    follower.model_params(model, segment.speed_factor(follower.pos));
                let current = ahead.filter(|leader| *leader != id);
                let old = follower.projected_acc(
                    &follower_params,
                    segment.leader_at(vehicles, follower.pos, current),
                );
                let new = follower.projected_acc(
                    &follower_params,
                    Some(Leader {
                        gap,
                        vel: vehicle.vel,
                        acc: vehicle.acc,
                    }),
                );
                (old, new)
            }
            _ => (0.0, 0.0),
        };
        candidates.push(LaneChangeCandidate {
            side,
            acc_old,
            acc_new,
            follower_old,
            follower_new,
        });
    }
    let side = mobil.choose(&candidates, vehicle.vel, params.desired_speed)?;
    side.target(vehicle.lane, segment.lane_count())
}

/// Pulls back the vehicles of a sorted lane that are closer than `min_spacing` to their
/// leader, front to back. On a ring the last vehicle follows the first.
fn correct_lane(
    segment: &Segment,
    lane: usize,
    vehicles: &mut VehicleSet,
    dt: f64,
    min_spacing: f64,
) {
    let ids = segment.lane(lane);
    let n = ids.len();
    if n < 2 {
        return;
    }
    let passes = if segment.is_ring() { 2 } else { 1 };
    for _ in 0..passes {
        for i in (0..n).rev() {
            let j = match i + 1 {
                j if j < n => j,
                _ if segment.is_ring() => 0,
                _ => continue,
            };
            let leader = &vehicles[ids[j]];
            let (leader_pos, leader_len) = (leader.pos, leader.length());
            let follower = &mut vehicles[ids[i]];
            let gap = segment.forward_distance(follower.pos, leader_pos) - leader_len - min_spacing;
            if gap >= 0.0 {
                continue;
            }
            let travelled = segment.forward_distance(follower.prev_pos, follower.pos);
            let allowed = f64::max(0.0, travelled + gap);
            follower.pos = segment.wrap(follower.prev_pos + allowed);
            follower.vel = if allowed > 0.0 {
                f64::min(follower.vel, allowed / dt)
            } else {
                0.0
            };
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::network::{IntersectionConfig, OpenRoadConfig, RingRoadConfig, RoundaboutConfig};
    use crate::vehicle::VehicleClass;
    use assert_approx_eq::assert_approx_eq;

    fn car() -> VehicleAttributes {
        VehicleAttributes {
            class: VehicleClass::Car,
            length: 4.5,
            speed_mult: 1.0,
        }
    }

    fn open_road() -> Simulation {
        Simulation::new(SimConfig {
            record_events: true,
            ..SimConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn rejects_bad_config() {
        let config = SimConfig {
            dt: 0.0,
            ..SimConfig::default()
        };
        assert!(matches!(
            Simulation::new(config),
            Err(Error::InvalidParameter { name: "dt", .. })
        ));
        let mut sim = open_road();
        assert_eq!(sim.set_inflow(7, 100.0), Err(Error::UnknownEntry(7)));
        assert!(sim.set_inflow(0, -1.0).is_err());
        assert_eq!(sim.set_signal_override(None), Err(Error::NoJunction));
    }

    #[test]
    fn spawns_at_configured_rate() {
        let mut sim = open_road();
        sim.set_inflow(0, 1800.0).unwrap();
        sim.run_for(10.0);
        // 1800 veh/h over three lanes is one vehicle per lane every 6 s.
        let spawned = sim
            .drain_events()
            .filter(|e| matches!(e, SimEvent::Spawned { .. }))
            .count();
        assert_eq!(spawned, 3);
    }

    #[test]
    fn spawn_needs_room() {
        let mut sim = open_road();
        let main = sim.segment_by_name("main").unwrap().id();
        sim.insert_vehicle(main, 0, 12.0, 0.0, &car()).unwrap().unwrap();
        assert_eq!(sim.try_spawn(0, 0).unwrap(), None);
        assert!(sim.try_spawn(0, 1).unwrap().is_some());
        assert!(matches!(
            sim.try_spawn(0, 3),
            Err(Error::LaneOutOfRange { lane: 3, .. })
        ));
    }

    #[test]
    fn advance_uses_fixed_steps() {
        let mut sim = open_road();
        assert_eq!(sim.advance(0.12), 2);
        assert_eq!(sim.advance(0.04), 1);
        assert_approx_eq!(sim.time(), 0.15);
        // Long frames are clamped.
        assert_eq!(sim.advance(10.0), 5);
        assert_eq!(sim.advance(f64::NAN), 0);
    }

    #[test]
    fn hold_segment_stops_vehicles() {
        // No gap is ever large enough, so ramp vehicles wait at the end of the ramp.
        let mut sim = Simulation::new(SimConfig {
            network: NetworkConfig::OpenRoad(OpenRoadConfig {
                merge_min_gap: 10_000.0,
                ..OpenRoadConfig::default()
            }),
            ..SimConfig::default()
        })
        .unwrap();
        let ramp = sim.segment_by_name("ramp").unwrap().id();
        let id = sim.insert_vehicle(ramp, 0, 100.0, 15.0, &car()).unwrap().unwrap();
        sim.run_for(30.0);
        let vehicle = sim.get_vehicle(id).unwrap();
        assert_eq!(vehicle.segment_id(), ramp);
        assert!(vehicle.pos_front() < 140.0);
        assert!(vehicle.pos_front() > 130.0);
        assert!(vehicle.vel() < 0.5);
    }

    #[test]
    fn ring_lane_changes_respect_cooldown() {
        let mut sim = Simulation::new(SimConfig {
            network: NetworkConfig::RingRoad(RingRoadConfig::default()),
            record_events: true,
            noise_amplitude: 0.3,
            ..SimConfig::default()
        })
        .unwrap();
        sim.run_for(60.0);
        let cooldown = sim.mobil_params().cooldown;
        let mut last: std::collections::HashMap<u64, f64> = Default::default();
        for event in sim.drain_events() {
            if let SimEvent::LaneChanged { vehicle, time, from, to } = event {
                assert_eq!(from.abs_diff(to), 1);
                if let Some(prev) = last.insert(vehicle, time) {
                    assert!(time - prev >= cooldown - 1e-9);
                }
            }
        }
        assert_eq!(sim.iter_vehicles().count(), 60);
    }

    #[test]
    fn junction_movements_do_not_conflict() {
        let mut sim = Simulation::new(SimConfig {
            network: NetworkConfig::Intersection(IntersectionConfig::default()),
            record_events: true,
            ..SimConfig::default()
        })
        .unwrap();
        for entry in 0..4 {
            sim.set_inflow(entry, 600.0).unwrap();
        }
        sim.run_for(200.0);
        let table = crate::conflict::ConflictTable::get();
        let entries: Vec<(crate::conflict::MovementId, f64, f64)> = sim
            .drain_events()
            .filter_map(|e| match e {
                SimEvent::EnteredJunction {
                    movement,
                    time,
                    lock_until,
                    ..
                } => Some((movement, time, lock_until)),
                _ => None,
            })
            .collect();
        assert!(entries.len() > 20);
        for (i, (a, t_a, lock_a)) in entries.iter().enumerate() {
            for (b, t_b, _) in &entries[i + 1..] {
                if table.conflicts(*a, *b) {
                    assert!(t_b >= lock_a, "{a} at {t_a} and {b} at {t_b}");
                }
            }
        }
    }

    #[test]
    fn roundabout_vehicles_leave() {
        let mut sim = Simulation::new(SimConfig {
            network: NetworkConfig::Roundabout(RoundaboutConfig::default()),
            record_events: true,
            ..SimConfig::default()
        })
        .unwrap();
        for entry in 0..4 {
            sim.set_inflow(entry, 300.0).unwrap();
        }
        sim.run_for(120.0);
        let events: Vec<SimEvent> = sim.drain_events().collect();
        let merged = events
            .iter()
            .filter(|e| matches!(e, SimEvent::Merged { .. }))
            .count();
        let exited = events
            .iter()
            .filter(|e| matches!(e, SimEvent::ExitedRing { .. }))
            .count();
        assert!(merged > 0);
        assert!(exited > 0);
    }

    #[test]
    fn intersection_limits_apply_to_any_model() {
        let mut sim = Simulation::new(SimConfig {
            network: NetworkConfig::Intersection(IntersectionConfig::default()),
            model: Some(ModelParams {
                max_acc: 0.5,
                comf_dec: 1.0,
                time_headway: 2.0,
                ..ModelParams::default()
            }),
            ..SimConfig::default()
        })
        .unwrap();
        let model = sim.model_params();
        assert_approx_eq!(model.max_acc, 1.6);
        assert_approx_eq!(model.comf_dec, 2.2);
        assert_approx_eq!(model.time_headway, 1.1);

        sim.model_params_mut().max_acc = 0.8;
        sim.model_params_mut().time_headway = 3.0;
        sim.model_params_mut().desired_speed = 20.0;
        sim.step(0.05);
        let model = sim.model_params();
        assert_approx_eq!(model.max_acc, 1.6);
        assert_approx_eq!(model.time_headway, 1.1);
        assert_approx_eq!(model.desired_speed, 20.0);

        // Other topologies take the calibration as given.
        let mut road = open_road();
        road.model_params_mut().max_acc = 0.5;
        road.step(0.05);
        assert_approx_eq!(road.model_params().max_acc, 0.5);
    }

    #[test]
    fn signal_override() {
        let mut sim = Simulation::new(SimConfig {
            network: NetworkConfig::Intersection(IntersectionConfig::default()),
            ..SimConfig::default()
        })
        .unwrap();
        sim.set_signal_override(Some(Axis::EastWest)).unwrap();
        sim.run_for(100.0);
        let signal = sim.snapshot().signal.unwrap();
        assert_eq!(signal.phase, crate::light::SignalPhase::EwGreen);
        assert_eq!(signal.manual, Some(Axis::EastWest));
        sim.set_signal_override(None).unwrap();
        assert_eq!(
            sim.snapshot().signal.unwrap().phase,
            crate::light::SignalPhase::NsGreen
        );
    }

    #[test]
    fn speed_multipliers_are_clamped() {
        let mut sim = Simulation::new(SimConfig {
            network: NetworkConfig::RingRoad(RingRoadConfig::default()),
            ..SimConfig::default()
        })
        .unwrap();
        sim.randomise_speed_multipliers(0.5).unwrap();
        assert!(sim
            .iter_vehicles()
            .all(|v| (SPEED_MULT_MIN..=SPEED_MULT_MAX).contains(&v.speed_mult())));
        assert!(sim.randomise_speed_multipliers(-1.0).is_err());
    }

    #[test]
    fn brake_pulses_are_periodic() {
        let mut sim = Simulation::new(SimConfig {
            network: NetworkConfig::OpenRoad(OpenRoadConfig {
                brake_pulses: Some(Default::default()),
                initial_vehicles_per_lane: 5,
                ..OpenRoadConfig::default()
            }),
            record_events: true,
            ..SimConfig::default()
        })
        .unwrap();
        sim.set_inflow(0, 1800.0).unwrap();
        sim.run_for(50.0);
        let pulses = sim
            .drain_events()
            .filter(|e| matches!(e, SimEvent::BrakePulse { .. }))
            .count();
        // Due at 16, 32 and 48 s.
        assert_eq!(pulses, 3);
    }
}
