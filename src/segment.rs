use crate::util::{forward_distance, Interval};
use crate::vehicle::Leader;
use crate::{SegmentId, VehicleId, VehicleSet};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// What happens to vehicles that reach the end of a segment.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SegmentEnd {
    /// Vehicles leave the network once they are `despawn_buffer` metres past the end.
    Open { despawn_buffer: f64 },
    /// Vehicles continue onto the start of another segment.
    Connect(SegmentId),
    /// Vehicles wait at the end until an arbiter admits them elsewhere.
    Hold,
    /// The segment is a closed loop.
    Ring,
}

/// A stretch of road on which the speed limit is scaled, e.g. a bend.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpeedRegion {
    /// The affected positions, `[min, max)`.
    pub range: Interval<f64>,
    /// The multiplier applied to the desired speed.
    pub factor: f64,
}

/// A road segment: a set of parallel lanes along a one-dimensional position axis.
#[derive(Clone, Debug)]
pub struct Segment {
    /// The segment ID.
    id: SegmentId,
    /// A human readable name.
    name: String,
    /// The length in m.
    length: f64,
    /// What happens at the end of the segment.
    end: SegmentEnd,
    /// Regions with a reduced speed limit.
    speed_regions: SmallVec<[SpeedRegion; 2]>,
    /// The vehicles in each lane, ordered by increasing position.
    lanes: Vec<Vec<VehicleId>>,
}

/// The attributes of a segment.
#[derive(Clone, Debug)]
pub struct SegmentAttributes<'a> {
    pub name: &'a str,
    /// The length in m.
    pub length: f64,
    pub lane_count: usize,
    pub end: SegmentEnd,
}

impl Segment {
    /// Creates a new segment.
    pub(crate) fn new(id: SegmentId, attribs: &SegmentAttributes) -> Self {
        Self {
            id,
            name: attribs.name.to_string(),
            length: attribs.length,
            end: attribs.end,
            speed_regions: SmallVec::new(),
            lanes: vec![vec![]; attribs.lane_count],
        }
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the length of the segment in m.
    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    pub fn end(&self) -> SegmentEnd {
        self.end
    }

    pub fn is_ring(&self) -> bool {
        self.end == SegmentEnd::Ring
    }

    /// The vehicles in a lane, ordered by increasing position.
    pub fn lane(&self, lane: usize) -> &[VehicleId] {
        self.lanes.get(lane).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The vehicles on the segment, lane by lane.
    pub fn vehicles(&self) -> impl Iterator<Item = VehicleId> + '_ {
        self.lanes.iter().flatten().copied()
    }

    pub(crate) fn add_speed_region(&mut self, region: SpeedRegion) {
        self.speed_regions.push(region);
    }

    /// The factor applied to the desired speed at `pos`.
    pub fn speed_factor(&self, pos: f64) -> f64 {
        self.speed_regions
            .iter()
            .find(|region| region.range.contains_half_open(pos))
            .map_or(1.0, |region| region.factor)
    }

    /// Maps a position onto the segment, wrapping on a ring.
    pub fn wrap(&self, pos: f64) -> f64 {
        if self.is_ring() {
            pos.rem_euclid(self.length)
        } else {
            pos
        }
    }

    /// The distance from `from` forward to `to`.
    pub fn forward_distance(&self, from: f64, to: f64) -> f64 {
        forward_distance(from, to, self.length, self.is_ring())
    }

    /// Inserts the vehicle with the given ID into its lane, keeping the lane sorted.
    pub(crate) fn insert_vehicle(&mut self, vehicles: &VehicleSet, id: VehicleId) {
        let vehicle = &vehicles[id];
        let veh_pos = vehicle.pos;
        let lane = &mut self.lanes[vehicle.lane];
        let idx = lane.partition_point(|id| vehicles[*id].pos <= veh_pos);
        lane.insert(idx, id);
    }

    /// Removes the vehicle with the given ID from a lane.
    pub(crate) fn remove_vehicle(&mut self, lane: usize, id: VehicleId) {
        if let Some(lane) = self.lanes.get_mut(lane) {
            if let Some(idx) = lane.iter().rposition(|v| *v == id) {
                lane.remove(idx);
            }
        }
    }

    /// Restores the position order of every lane.
    pub(crate) fn sort_lanes(&mut self, vehicles: &VehicleSet) {
        for lane in &mut self.lanes {
            lane.sort_by(|a, b| vehicles[*a].pos.total_cmp(&vehicles[*b].pos));
        }
    }

    /// The vehicles immediately ahead of and behind position `pos` in a lane,
    /// ignoring `exclude`. On a ring both searches wrap around.
    pub(crate) fn neighbours(
        &self,
        vehicles: &VehicleSet,
        lane: usize,
        pos: f64,
        exclude: Option<VehicleId>,
    ) -> (Option<VehicleId>, Option<VehicleId>) {
        let lane = self.lane(lane);
        let split = lane.partition_point(|id| vehicles[*id].pos < pos);
        let keep = |id: &&VehicleId| Some(**id) != exclude;

        let mut ahead = lane[split..].iter().find(keep).copied();
        let mut behind = lane[..split].iter().rev().find(keep).copied();
        if self.is_ring() {
            ahead = ahead.or_else(|| lane[..split].iter().find(keep).copied());
            behind = behind.or_else(|| lane[split..].iter().rev().find(keep).copied());
        }
        (ahead, behind)
    }

    /// The bumper-to-bumper gap between a vehicle whose front is at `pos` and the
    /// vehicle `leader` on this segment.
    pub(crate) fn gap_to(&self, vehicles: &VehicleSet, pos: f64, leader: VehicleId) -> f64 {
        let leader = &vehicles[leader];
        self.forward_distance(pos, leader.pos) - leader.length()
    }

    /// What a vehicle whose front is at `pos` sees of `leader`, if anything.
    pub(crate) fn leader_at(
        &self,
        vehicles: &VehicleSet,
        pos: f64,
        leader: Option<VehicleId>,
    ) -> Option<Leader> {
        leader.map(|id| Leader {
            gap: self.gap_to(vehicles, pos, id),
            vel: vehicles[id].vel,
            acc: vehicles[id].acc,
        })
    }

    /// Whether a vehicle of `length` could be placed with its front at `pos` in `lane`
    /// while keeping `min_gap` to the vehicles ahead of and behind it.
    pub(crate) fn has_room(
        &self,
        vehicles: &VehicleSet,
        lane: usize,
        pos: f64,
        length: f64,
        min_gap: f64,
    ) -> bool {
        let (ahead, behind) = self.neighbours(vehicles, lane, pos, None);
        let ahead_ok = ahead.map_or(true, |id| self.gap_to(vehicles, pos, id) >= min_gap);
        let behind_ok = behind.map_or(true, |id| {
            self.forward_distance(vehicles[id].pos, pos) - length >= min_gap
        });
        ahead_ok && behind_ok
    }
}
