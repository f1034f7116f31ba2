//! Virtual detectors, travel-time measurement and jam analysis.

use crate::network::Network;
use crate::snapshot::{Snapshot, VehicleSnapshot};
use crate::util::{quantile, Interval};
use crate::SegmentId;
use itertools::Itertools;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A vehicle passing a detector.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Crossing {
    /// The serial number of the vehicle.
    pub vehicle: u64,
    pub lane: usize,
    /// The time at the end of the tick in which the vehicle passed.
    pub time: f64,
    pub vel: f64,
}

/// A loop detector at a fixed position across all lanes of a segment.
#[derive(Clone, Debug)]
pub struct Detector {
    segment: SegmentId,
    pos: f64,
    crossings: Vec<Crossing>,
}

impl Detector {
    pub fn new(segment: SegmentId, pos: f64) -> Self {
        Self {
            segment,
            pos,
            crossings: vec![],
        }
    }

    pub fn segment(&self) -> SegmentId {
        self.segment
    }

    pub fn pos(&self) -> f64 {
        self.pos
    }

    /// Every crossing seen so far.
    pub fn crossings(&self) -> &[Crossing] {
        &self.crossings
    }

    /// Records the vehicles whose front passed the detector in the last tick,
    /// i.e. with `prev_pos < pos <= current position`. Returns how many there were.
    pub fn observe(&mut self, network: &Network) -> usize {
        let Some(segment) = network.segment(self.segment) else {
            return 0;
        };
        let before = self.crossings.len();
        for id in segment.vehicles() {
            let Some(vehicle) = network.vehicle(id) else {
                continue;
            };
            let to_detector = segment.forward_distance(vehicle.prev_pos(), self.pos);
            let moved = segment.forward_distance(vehicle.prev_pos(), vehicle.pos_front());
            let passed = if segment.is_ring() {
                to_detector > 0.0 && to_detector <= moved
            } else {
                vehicle.prev_pos() < self.pos && self.pos <= vehicle.pos_front()
            };
            if passed {
                self.crossings.push(Crossing {
                    vehicle: vehicle.serial(),
                    lane: vehicle.lane(),
                    time: network.time(),
                    vel: vehicle.vel(),
                });
            }
        }
        self.crossings.len() - before
    }

    fn recent(&self, now: f64, window: f64) -> impl Iterator<Item = &Crossing> {
        self.crossings
            .iter()
            .rev()
            .take_while(move |c| c.time > now - window)
    }

    /// The flow over the last `window` seconds, in vehicles per hour.
    pub fn flow(&self, now: f64, window: f64) -> f64 {
        if window <= 0.0 {
            return 0.0;
        }
        self.recent(now, window).count() as f64 * 3600.0 / window
    }

    /// The mean speed of the vehicles that passed in the last `window` seconds.
    pub fn mean_speed(&self, now: f64, window: f64) -> Option<f64> {
        let speeds = self.recent(now, window).map(|c| c.vel).collect_vec();
        if speeds.is_empty() {
            None
        } else {
            Some(speeds.iter().sum::<f64>() / speeds.len() as f64)
        }
    }

    pub fn clear(&mut self) {
        self.crossings.clear();
    }
}

/// The number of vehicles per km and lane whose fronts lie within `range` of a segment.
pub fn density(network: &Network, segment: SegmentId, range: Interval<f64>) -> Option<f64> {
    let seg = network.segment(segment)?;
    if range.length() <= 0.0 {
        return None;
    }
    let count = seg
        .vehicles()
        .filter_map(|id| network.vehicle(id))
        .filter(|vehicle| range.contains(vehicle.pos_front()))
        .count();
    Some(1000.0 * count as f64 / (range.length() * seg.lane_count() as f64))
}

/// Measures the time vehicles take between two detectors.
#[derive(Clone, Debug)]
pub struct TravelTimeProbe {
    upstream: Detector,
    downstream: Detector,
    /// When each vehicle between the detectors passed the upstream one.
    entered: HashMap<u64, f64>,
    samples: Vec<f64>,
}

impl TravelTimeProbe {
    pub fn new(upstream: Detector, downstream: Detector) -> Self {
        Self {
            upstream,
            downstream,
            entered: HashMap::new(),
            samples: vec![],
        }
    }

    /// A probe between two positions on the same segment.
    pub fn between(segment: SegmentId, from: f64, to: f64) -> Self {
        Self::new(Detector::new(segment, from), Detector::new(segment, to))
    }

    pub fn upstream(&self) -> &Detector {
        &self.upstream
    }

    pub fn downstream(&self) -> &Detector {
        &self.downstream
    }

    /// Call after every tick.
    pub fn observe(&mut self, network: &Network) {
        let passed_up = self.upstream.observe(network);
        let crossings = self.upstream.crossings();
        for crossing in &crossings[crossings.len() - passed_up..] {
            self.entered.insert(crossing.vehicle, crossing.time);
        }
        let passed_down = self.downstream.observe(network);
        let crossings = self.downstream.crossings();
        for crossing in &crossings[crossings.len() - passed_down..] {
            if let Some(start) = self.entered.remove(&crossing.vehicle) {
                self.samples.push(crossing.time - start);
            }
        }
    }

    /// The completed travel times in s, in order of arrival.
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn summary(&self) -> Option<Summary> {
        Summary::of(&self.samples)
    }
}

/// Order statistics of a sample.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Summary {
    pub count: usize,
    pub min: f64,
    pub mean: f64,
    pub median: f64,
    pub p90: f64,
    pub p95: f64,
    pub max: f64,
}

impl Summary {
    /// Summarises the finite values of a sample, or `None` if there are none.
    pub fn of(samples: &[f64]) -> Option<Self> {
        let sorted = samples
            .iter()
            .copied()
            .filter(|x| x.is_finite())
            .sorted_by(f64::total_cmp)
            .collect_vec();
        let count = sorted.len();
        Some(Self {
            count,
            min: *sorted.first()?,
            mean: sorted.iter().sum::<f64>() / count as f64,
            median: quantile(&sorted, 0.5)?,
            p90: quantile(&sorted, 0.9)?,
            p95: quantile(&sorted, 0.95)?,
            max: *sorted.last()?,
        })
    }
}

/// Vehicles slower than this, in m/s, count as part of a jam.
pub const JAM_SPEED: f64 = 10.0 / 3.6;

/// Bins whose mean speed is at most this, in m/s, count as jammed.
pub const JAM_BIN_SPEED: f64 = 25.0 / 3.6;

/// The length of a speed bin in m.
pub const BIN_SIZE: f64 = 10.0;

/// The fewest vehicles, over all lanes, a bin needs to count as jammed.
const JAM_BIN_MIN_COUNT: usize = 2;

/// The shortest run of jammed bins reported as a jam, in m.
const JAM_BIN_MIN_LENGTH: f64 = 20.0;

/// The shortest cluster of slow vehicles reported as a jam, in m.
const SLOW_CLUSTER_MIN_LENGTH: f64 = 5.0;

/// Vehicles slower than this, in m/s, count as stopped.
const STOPPED_SPEED: f64 = 0.5 / 3.6;

/// Accelerations at or below this, in m/s<sup>2</sup>, count as hard braking.
const HARD_BRAKE: f64 = -4.0;

/// A stretch of congested road on a ring.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Jam {
    /// Whether the stretch is long enough to call a jam.
    pub present: bool,
    /// The slow vehicles or jammed bins that make up the stretch.
    pub members: usize,
    /// Where the stretch starts, in m along the ring.
    pub start: f64,
    pub length: f64,
    /// The middle of the stretch, wrapped onto the ring.
    pub center: f64,
}

fn on_segment(snapshot: &Snapshot, segment: SegmentId) -> impl Iterator<Item = &VehicleSnapshot> {
    snapshot.vehicles.iter().filter(move |v| v.segment == segment)
}

/// Finds the tightest arc of a ring that holds every slow vehicle. The arc is the
/// complement of the widest gap between consecutive slow vehicles. Returns `None` when
/// fewer than three vehicles are slow.
pub fn slow_cluster(snapshot: &Snapshot, segment: SegmentId, ring_length: f64) -> Option<Jam> {
    let slow = on_segment(snapshot, segment)
        .filter(|v| v.vel < JAM_SPEED)
        .map(|v| v.pos)
        .sorted_by(f64::total_cmp)
        .collect_vec();
    let n = slow.len();
    if n < 3 {
        return None;
    }
    let (widest, after) = slow
        .iter()
        .tuple_windows()
        .enumerate()
        .map(|(i, (a, b))| (b - a, i + 1))
        .chain(std::iter::once((slow[0] + ring_length - slow[n - 1], 0)))
        .fold((f64::NEG_INFINITY, 0), |best, (gap, i)| {
            if gap > best.0 {
                (gap, i)
            } else {
                best
            }
        });
    let length = f64::max(0.0, ring_length - widest);
    let start = slow[after];
    Some(Jam {
        present: length > SLOW_CLUSTER_MIN_LENGTH,
        members: n,
        start,
        length,
        center: (start + 0.5 * length) % ring_length,
    })
}

/// Vehicle counts and mean speeds over fixed-length bins of a ring, per lane.
#[derive(Clone, Debug, PartialEq)]
pub struct SpeedBins {
    bin_size: f64,
    counts: Vec<Vec<usize>>,
    speed_sums: Vec<Vec<f64>>,
}

impl SpeedBins {
    /// Bins the vehicles of a ring by lane and position, using [BIN_SIZE] m bins.
    pub fn of(snapshot: &Snapshot, segment: SegmentId, ring_length: f64, lanes: usize) -> Self {
        let bin_count = usize::max(1, (ring_length / BIN_SIZE).ceil() as usize);
        let mut counts = vec![vec![0; bin_count]; lanes];
        let mut speed_sums = vec![vec![0.0; bin_count]; lanes];
        for vehicle in on_segment(snapshot, segment).filter(|v| v.lane < lanes) {
            let bin = ((vehicle.pos / BIN_SIZE).floor().max(0.0) as usize).min(bin_count - 1);
            counts[vehicle.lane][bin] += 1;
            speed_sums[vehicle.lane][bin] += vehicle.vel;
        }
        Self {
            bin_size: BIN_SIZE,
            counts,
            speed_sums,
        }
    }

    pub fn bin_count(&self) -> usize {
        self.counts.first().map_or(0, Vec::len)
    }

    pub fn bin_size(&self) -> f64 {
        self.bin_size
    }

    pub fn count(&self, lane: usize, bin: usize) -> usize {
        self.counts[lane][bin]
    }

    /// The mean speed in a bin of a lane, or `None` if it is empty.
    pub fn mean_speed(&self, lane: usize, bin: usize) -> Option<f64> {
        match self.counts[lane][bin] {
            0 => None,
            count => Some(self.speed_sums[lane][bin] / count as f64),
        }
    }

    /// Whether a bin holds enough vehicles over all lanes, slow enough on average,
    /// to count as jammed.
    fn is_jammed(&self, bin: usize) -> bool {
        let count: usize = self.counts.iter().map(|lane| lane[bin]).sum();
        let speed: f64 = self.speed_sums.iter().map(|lane| lane[bin]).sum();
        count >= JAM_BIN_MIN_COUNT && speed / count as f64 <= JAM_BIN_SPEED
    }

    /// Finds the longest run of jammed bins, wrapping around the ring.
    pub fn jam(&self) -> Option<Jam> {
        let n = self.bin_count();
        let jammed = (0..n).map(|bin| self.is_jammed(bin)).collect_vec();
        let (mut run, mut best, mut best_end) = (0, 0, 0);
        for i in 0..2 * n {
            if jammed[i % n] {
                run += 1;
                if run > best {
                    best = run;
                    best_end = i;
                }
            } else {
                run = 0;
            }
        }
        let best = best.min(n);
        if best == 0 {
            return None;
        }
        let ring_length = n as f64 * self.bin_size;
        let length = best as f64 * self.bin_size;
        let start = ((best_end + 1 + n - best) % n) as f64 * self.bin_size;
        Some(Jam {
            present: length >= JAM_BIN_MIN_LENGTH,
            members: best,
            start,
            length,
            center: (start + 0.5 * length) % ring_length,
        })
    }
}

/// A histogram over equal-width bins. Values outside the range go to the end bins.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Histogram {
    pub range: Interval<f64>,
    pub counts: Vec<usize>,
}

impl Histogram {
    pub fn new(range: Interval<f64>, bins: usize) -> Self {
        Self {
            range,
            counts: vec![0; bins.max(1)],
        }
    }

    pub fn add(&mut self, value: f64) {
        let last = self.counts.len() - 1;
        let t = (value - self.range.min) / self.range.length();
        let bin = if t <= 0.0 {
            0
        } else {
            ((t * self.counts.len() as f64) as usize).min(last)
        };
        self.counts[bin] += 1;
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }
}

/// The time and distance headways within one lane of a ring.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LaneHeadways {
    pub lane: usize,
    pub vehicles: usize,
    /// The mean time to reach the vehicle ahead at the current speed, in s.
    pub mean_time: f64,
    /// The mean front-to-front spacing, in m.
    pub mean_spacing: f64,
    /// Time headways over 0 to 6 s.
    pub time: Histogram,
    /// Spacings over 0 to 60 m.
    pub spacing: Histogram,
}

/// Time headways are capped at this, in s.
const MAX_TIME_HEADWAY: f64 = 10.0;

/// Collects the headways between consecutive vehicles in every lane of a ring. The last
/// vehicle of a lane follows the first. Speeds below 0.1 m/s count as 0.1 m/s.
pub fn headways(
    snapshot: &Snapshot,
    segment: SegmentId,
    ring_length: f64,
    lanes: usize,
) -> Vec<LaneHeadways> {
    let by_lane = on_segment(snapshot, segment)
        .filter(|v| v.lane < lanes)
        .into_group_map_by(|v| v.lane);
    (0..lanes)
        .map(|lane| {
            let vehicles = by_lane
                .get(&lane)
                .map(|vs| vs.iter().sorted_by(|a, b| a.pos.total_cmp(&b.pos)).collect_vec())
                .unwrap_or_default();
            let n = vehicles.len();
            let mut time = Histogram::new(Interval::new(0.0, 6.0), 30);
            let mut spacing = Histogram::new(Interval::new(0.0, 60.0), 30);
            let (mut time_sum, mut spacing_sum) = (0.0, 0.0);
            if n >= 2 {
                for (i, vehicle) in vehicles.iter().enumerate() {
                    let ahead = vehicles[(i + 1) % n];
                    let mut gap = ahead.pos - vehicle.pos;
                    if gap <= 0.0 {
                        gap += ring_length;
                    }
                    let headway = f64::min(MAX_TIME_HEADWAY, gap / vehicle.vel.max(0.1));
                    time_sum += headway;
                    spacing_sum += gap;
                    time.add(headway);
                    spacing.add(gap);
                }
            }
            let mean = |sum: f64| if n >= 2 { sum / n as f64 } else { 0.0 };
            LaneHeadways {
                lane,
                vehicles: n,
                mean_time: mean(time_sum),
                mean_spacing: mean(spacing_sum),
                time,
                spacing,
            }
        })
        .collect()
}

/// Aggregate state of the traffic on a ring.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GlobalStats {
    pub vehicles: usize,
    /// Vehicles per km over all lanes.
    pub density: f64,
    /// Vehicles per km and lane.
    pub density_per_lane: f64,
    pub speed: Option<Summary>,
    pub acc: Option<Summary>,
    /// The share of vehicles that are practically stopped.
    pub stopped_fraction: f64,
    /// The share of vehicles braking at 4 m/s<sup>2</sup> or harder.
    pub hard_brake_fraction: f64,
    /// The mean speed of each lane, 0 for empty lanes.
    pub lane_mean_speed: Vec<f64>,
}

impl GlobalStats {
    pub fn of(snapshot: &Snapshot, segment: SegmentId, ring_length: f64, lanes: usize) -> Self {
        let vehicles = on_segment(snapshot, segment).collect_vec();
        let n = vehicles.len();
        let speeds = vehicles.iter().map(|v| v.vel).collect_vec();
        let accs = vehicles.iter().map(|v| v.acc).collect_vec();
        let share = |count: usize| if n > 0 { count as f64 / n as f64 } else { 0.0 };
        let km = ring_length / 1000.0;
        let lane_mean_speed = (0..lanes)
            .map(|lane| {
                let speeds = vehicles
                    .iter()
                    .filter(|v| v.lane == lane)
                    .map(|v| v.vel)
                    .collect_vec();
                if speeds.is_empty() {
                    0.0
                } else {
                    speeds.iter().sum::<f64>() / speeds.len() as f64
                }
            })
            .collect();
        Self {
            vehicles: n,
            density: n as f64 / km,
            density_per_lane: if lanes > 0 { n as f64 / lanes as f64 / km } else { 0.0 },
            speed: Summary::of(&speeds),
            acc: Summary::of(&accs),
            stopped_fraction: share(speeds.iter().filter(|&&v| v < STOPPED_SPEED).count()),
            hard_brake_fraction: share(accs.iter().filter(|&&a| a <= HARD_BRAKE).count()),
            lane_mean_speed,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn summary_statistics() {
        let summary = Summary::of(&[4.0, 1.0, 3.0, 2.0, f64::NAN]).unwrap();
        assert_eq!(summary.count, 4);
        assert_approx_eq!(summary.min, 1.0);
        assert_approx_eq!(summary.mean, 2.5);
        assert_approx_eq!(summary.median, 2.5);
        assert_approx_eq!(summary.p90, 3.7);
        assert_approx_eq!(summary.max, 4.0);
        assert_eq!(Summary::of(&[]), None);
    }

    const RING: f64 = 1000.0;

    fn vehicle(lane: usize, pos: f64, vel: f64, acc: f64) -> VehicleSnapshot {
        VehicleSnapshot {
            id: 0,
            segment: SegmentId::default(),
            lane,
            pos,
            vel,
            acc,
            class: crate::VehicleClass::Car,
            length: 4.5,
        }
    }

    fn snapshot(vehicles: Vec<VehicleSnapshot>) -> Snapshot {
        Snapshot {
            time: 0.0,
            vehicles,
            movements: vec![],
            signal: None,
        }
    }

    /// Two lanes moving at 25 m/s, except for a queue of stopped vehicles between
    /// 500 m and 570 m when `jammed`.
    fn two_lane_ring(jammed: bool) -> Snapshot {
        let mut vehicles = vec![];
        for lane in 0..2 {
            for i in 0..20 {
                let pos = 50.0 * i as f64;
                if !(500.0..600.0).contains(&pos) {
                    vehicles.push(vehicle(lane, pos, 25.0, 0.0));
                }
            }
            for i in 0..8 {
                let pos = 500.0 + 10.0 * i as f64;
                if !jammed {
                    vehicles.push(vehicle(lane, pos, 25.0, 0.0));
                } else if lane == 0 {
                    vehicles.push(vehicle(lane, pos, 0.0, -5.0));
                } else {
                    vehicles.push(vehicle(lane, pos, 0.0, 0.0));
                }
            }
        }
        snapshot(vehicles)
    }

    #[test]
    fn jam_on_ring() {
        let ring = two_lane_ring(true);
        let seg = SegmentId::default();

        let cluster = slow_cluster(&ring, seg, RING).unwrap();
        assert!(cluster.present);
        assert_eq!(cluster.members, 16);
        assert_approx_eq!(cluster.start, 500.0);
        assert_approx_eq!(cluster.length, 70.0);
        assert_approx_eq!(cluster.center, 535.0);

        let bins = SpeedBins::of(&ring, seg, RING, 2);
        assert_eq!(bins.bin_count(), 100);
        assert_eq!(bins.count(0, 50), 1);
        assert_approx_eq!(bins.mean_speed(1, 0).unwrap(), 25.0);
        assert_eq!(bins.mean_speed(1, 1), None);
        let jam = bins.jam().unwrap();
        assert!(jam.present);
        assert_eq!(jam.members, 8);
        assert_approx_eq!(jam.start, 500.0);
        assert_approx_eq!(jam.length, 80.0);
        assert_approx_eq!(jam.center, 540.0);

        let stats = GlobalStats::of(&ring, seg, RING, 2);
        assert_eq!(stats.vehicles, 52);
        assert_approx_eq!(stats.density, 52.0);
        assert_approx_eq!(stats.density_per_lane, 26.0);
        assert_approx_eq!(stats.stopped_fraction, 16.0 / 52.0);
        assert_approx_eq!(stats.hard_brake_fraction, 8.0 / 52.0);
        assert_approx_eq!(stats.lane_mean_speed[0], 18.0 * 25.0 / 26.0);
        assert_approx_eq!(stats.speed.unwrap().max, 25.0);
    }

    #[test]
    fn free_ring_has_no_jam() {
        let ring = two_lane_ring(false);
        let seg = SegmentId::default();
        assert_eq!(slow_cluster(&ring, seg, RING), None);
        assert_eq!(SpeedBins::of(&ring, seg, RING, 2).jam(), None);
        let stats = GlobalStats::of(&ring, seg, RING, 2);
        assert_approx_eq!(stats.stopped_fraction, 0.0);
        assert_approx_eq!(stats.hard_brake_fraction, 0.0);
        assert_approx_eq!(stats.lane_mean_speed[1], 25.0);
    }

    #[test]
    fn jams_wrap_around_ring() {
        let seg = SegmentId::default();
        let slow = snapshot(
            [980.0, 990.0, 0.0, 10.0]
                .into_iter()
                .map(|pos| vehicle(0, pos, 1.0, 0.0))
                .collect(),
        );
        let cluster = slow_cluster(&slow, seg, RING).unwrap();
        assert_approx_eq!(cluster.start, 980.0);
        assert_approx_eq!(cluster.length, 30.0);
        assert_approx_eq!(cluster.center, 995.0);

        let queue = snapshot(
            (0..2)
                .flat_map(|lane| [vehicle(lane, 995.0, 0.0, 0.0), vehicle(lane, 5.0, 0.0, 0.0)])
                .collect(),
        );
        let jam = SpeedBins::of(&queue, seg, RING, 2).jam().unwrap();
        assert!(jam.present);
        assert_approx_eq!(jam.start, 990.0);
        assert_approx_eq!(jam.length, 20.0);
        assert_approx_eq!(jam.center, 0.0);

        // Two slow vehicles are not enough for a cluster.
        let pair = snapshot(vec![vehicle(0, 0.0, 0.0, 0.0), vehicle(0, 10.0, 0.0, 0.0)]);
        assert_eq!(slow_cluster(&pair, seg, RING), None);
    }

    #[test]
    fn lane_headways() {
        let seg = SegmentId::default();
        let ring = snapshot(
            [75.0, 0.0, 50.0, 25.0]
                .into_iter()
                .map(|pos| vehicle(0, pos, 5.0, 0.0))
                .collect(),
        );
        let lanes = headways(&ring, seg, 100.0, 2);
        assert_eq!(lanes.len(), 2);
        assert_eq!(lanes[0].vehicles, 4);
        assert_approx_eq!(lanes[0].mean_spacing, 25.0);
        assert_approx_eq!(lanes[0].mean_time, 5.0);
        assert_eq!(lanes[0].spacing.counts[12], 4);
        assert_eq!(lanes[0].time.total(), 4);
        assert_eq!(lanes[0].time.counts[24..=25].iter().sum::<usize>(), 4);
        assert_eq!(lanes[1].vehicles, 0);
        assert_eq!(lanes[1].time.total(), 0);
    }

    #[test]
    fn histogram_clamps_to_end_bins() {
        let mut histogram = Histogram::new(Interval::new(0.0, 6.0), 30);
        histogram.add(-1.0);
        histogram.add(0.0);
        histogram.add(6.0);
        histogram.add(100.0);
        assert_eq!(histogram.counts[0], 2);
        assert_eq!(histogram.counts[29], 2);
    }

    #[test]
    fn flow_over_window() {
        let mut detector = Detector::new(SegmentId::default(), 10.0);
        for i in 0..10 {
            detector.crossings.push(Crossing {
                vehicle: i,
                lane: 0,
                time: i as f64,
                vel: 10.0 + i as f64,
            });
        }
        // Crossings at 6, 7, 8 and 9 s lie within the last 4 s.
        assert_approx_eq!(detector.flow(9.0, 4.0), 3600.0);
        assert_approx_eq!(detector.mean_speed(9.0, 4.0).unwrap(), 17.5);
        assert_eq!(detector.mean_speed(100.0, 1.0), None);
    }
}
