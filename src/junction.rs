//! Reservation-based arbitration of a signalized four-way junction.

use crate::conflict::{Approach, ConflictTable, MovementId, Turn, MOVEMENT_COUNT};
use crate::error::{require_non_negative, require_positive};
use crate::light::{SignalController, SignalTiming};
use crate::vehicle::{RouteIntent, Vehicle};
use crate::{SegmentId, SegmentSet, VehicleSet};
use arrayvec::ArrayVec;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A duration for each kind of turn, in s.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TurnTimes {
    pub right: f64,
    pub through: f64,
    pub left: f64,
}

impl TurnTimes {
    pub fn get(&self, turn: Turn) -> f64 {
        match turn {
            Turn::Right => self.right,
            Turn::Through => self.through,
            Turn::Left => self.left,
        }
    }

    fn validate(&self, name: &'static str) -> crate::Result<()> {
        require_positive(name, self.right)?;
        require_positive(name, self.through)?;
        require_positive(name, self.left)
    }
}

/// An opposing vehicle closer than `distance` to its stop line, or
/// arriving there within `time`, forces a left-turning vehicle to wait.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GapThreshold {
    /// m
    pub distance: f64,
    /// s
    pub time: f64,
}

/// Gap acceptance of left-turning vehicles against opposing traffic.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LeftTurnGap {
    pub against_through: GapThreshold,
    pub against_right: GapThreshold,
}

/// The calibration of a junction.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct JunctionParams {
    /// Minimum time between two vehicles entering on the same movement.
    pub headway: TurnTimes,
    /// How long an entering vehicle locks out conflicting movements.
    pub occupancy: TurnTimes,
    pub left_turn_gap: LeftTurnGap,
    /// Vehicles closer than this to the stop line (m) obey a stop...
    pub decision_distance: f64,
    /// ...as do those within this many seconds of it at their current speed.
    pub decision_time: f64,
    /// The clear space needed at the start of a movement's path to enter it, in m.
    pub entry_gap: f64,
}

impl Default for JunctionParams {
    fn default() -> Self {
        Self {
            headway: TurnTimes {
                right: 0.80,
                through: 0.95,
                left: 1.25,
            },
            occupancy: TurnTimes {
                right: 0.95,
                through: 1.15,
                left: 1.85,
            },
            left_turn_gap: LeftTurnGap {
                against_through: GapThreshold {
                    distance: 18.0,
                    time: 1.7,
                },
                against_right: GapThreshold {
                    distance: 12.0,
                    time: 1.2,
                },
            },
            decision_distance: 18.0,
            decision_time: 1.2,
            entry_gap: 3.5,
        }
    }
}

impl JunctionParams {
    pub fn validate(&self) -> crate::Result<()> {
        self.headway.validate("headway")?;
        self.occupancy.validate("occupancy")?;
        for threshold in [
            self.left_turn_gap.against_through,
            self.left_turn_gap.against_right,
        ] {
            require_non_negative("left_turn_gap.distance", threshold.distance)?;
            require_non_negative("left_turn_gap.time", threshold.time)?;
        }
        require_non_negative("decision_distance", self.decision_distance)?;
        require_non_negative("decision_time", self.decision_time)?;
        require_non_negative("entry_gap", self.entry_gap)
    }
}

/// The reservation state of a movement.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reservation {
    /// The earliest time the next vehicle may enter on this movement.
    pub next_admissible: f64,
    /// Conflicting movements are locked out until this time.
    pub lock_until: f64,
}

/// A movement through the junction.
#[derive(Clone, Debug)]
pub struct Movement {
    id: MovementId,
    /// The segment vehicles follow through the junction.
    connector: SegmentId,
    reservation: Reservation,
}

impl Movement {
    pub fn id(&self) -> MovementId {
        self.id
    }

    pub fn connector(&self) -> SegmentId {
        self.connector
    }

    pub fn reservation(&self) -> Reservation {
        self.reservation
    }
}

/// A signalized four-way junction.
#[derive(Clone, Debug)]
pub struct Junction {
    /// The inbound segment of each approach, indexed by [Approach::index].
    approaches: [SegmentId; 4],
    /// The outbound segment of each approach.
    exits: [SegmentId; 4],
    /// The movements, indexed by [MovementId::index].
    movements: ArrayVec<Movement, MOVEMENT_COUNT>,
    signal: SignalController,
    params: JunctionParams,
}

impl Junction {
    /// Creates a junction. `connectors` lists the path segment of each movement
    /// in [MovementId::index] order.
    pub(crate) fn new(
        approaches: [SegmentId; 4],
        exits: [SegmentId; 4],
        connectors: [SegmentId; MOVEMENT_COUNT],
        timing: SignalTiming,
        params: JunctionParams,
    ) -> Self {
        let movements = MovementId::all()
            .zip(connectors)
            .map(|(id, connector)| Movement {
                id,
                connector,
                reservation: Reservation::default(),
            })
            .collect();
        Self {
            approaches,
            exits,
            movements,
            signal: SignalController::new(timing),
            params,
        }
    }

    pub fn approach_segment(&self, approach: Approach) -> SegmentId {
        self.approaches[approach.index()]
    }

    pub fn exit_segment(&self, approach: Approach) -> SegmentId {
        self.exits[approach.index()]
    }

    /// The approach whose inbound segment is `segment`.
    pub fn approach_of(&self, segment: SegmentId) -> Option<Approach> {
        Approach::ALL
            .into_iter()
            .find(|approach| self.approach_segment(*approach) == segment)
    }

    pub fn movement(&self, id: MovementId) -> &Movement {
        &self.movements[id.index()]
    }

    pub fn movements(&self) -> impl Iterator<Item = &Movement> {
        self.movements.iter()
    }

    pub fn signal(&self) -> &SignalController {
        &self.signal
    }

    pub(crate) fn signal_mut(&mut self) -> &mut SignalController {
        &mut self.signal
    }

    pub fn params(&self) -> &JunctionParams {
        &self.params
    }

    /// Whether the movement's own headway has elapsed and no conflicting movement
    /// currently occupies the junction.
    pub fn can_enter(&self, movement: MovementId, now: f64) -> bool {
        if now < self.movement(movement).reservation.next_admissible {
            return false;
        }
        ConflictTable::get()
            .conflicting(movement)
            .all(|other| self.movement(other).reservation.lock_until <= now)
    }

    /// Records a vehicle entering on a movement.
    pub(crate) fn reserve(&mut self, movement: MovementId, now: f64) -> Reservation {
        let turn = movement.turn;
        let reservation = Reservation {
            next_admissible: now + self.params.headway.get(turn),
            lock_until: now + self.params.occupancy.get(turn),
        };
        self.movements[movement.index()].reservation = reservation;
        reservation
    }

    /// Whether a vehicle on `movement` may enter the junction now.
    pub(crate) fn admits(
        &self,
        movement: MovementId,
        now: f64,
        segments: &SegmentSet,
        vehicles: &VehicleSet,
    ) -> bool {
        self.signal.light(movement.from).is_go()
            && self.can_enter(movement, now)
            && (movement.turn != Turn::Left || self.left_turn_clear(movement.from, segments, vehicles))
    }

    /// Gap acceptance of a left turn from `from` against the first vehicle waiting on
    /// or approaching the opposite stop line.
    pub(crate) fn left_turn_clear(
        &self,
        from: Approach,
        segments: &SegmentSet,
        vehicles: &VehicleSet,
    ) -> bool {
        let opposite = from.opposite();
        if !self.signal.light(opposite).is_go() {
            return true;
        }
        let segment = &segments[self.approach_segment(opposite)];
        let Some(lead) = segment.lane(0).last().map(|id| &vehicles[*id]) else {
            return true;
        };
        let threshold = match lead.intent() {
            Some(RouteIntent::Movement(m)) if m.turn == Turn::Through => {
                self.params.left_turn_gap.against_through
            }
            Some(RouteIntent::Movement(m)) if m.turn == Turn::Right => {
                self.params.left_turn_gap.against_right
            }
            _ => return true,
        };
        let dist = segment.length() - lead.pos_front();
        let arrival = dist / f64::max(lead.vel(), 0.1);
        !(dist < 0.0 || dist <= threshold.distance || arrival <= threshold.time)
    }

    /// How far before the stop line a vehicle starts obeying it.
    pub(crate) fn decision_distance(&self, vehicle: &Vehicle, comf_dec: f64) -> f64 {
        let vel = vehicle.vel();
        let braking = vel * vel / (2.0 * f64::max(1.5, comf_dec));
        f64::max(
            self.params.decision_distance,
            vel * self.params.decision_time + braking,
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use slotmap::{KeyData, SlotMap};

    fn junction() -> Junction {
        let mut keys: SlotMap<SegmentId, ()> = SlotMap::with_key();
        let mut key = || keys.insert(());
        let approaches = [key(), key(), key(), key()];
        let exits = [key(), key(), key(), key()];
        let connectors = [(); MOVEMENT_COUNT].map(|_| key());
        Junction::new(
            approaches,
            exits,
            connectors,
            SignalTiming::default(),
            JunctionParams::default(),
        )
    }

    #[test]
    fn headway_by_turn() {
        let mut junction = junction();
        let right = MovementId::new(Approach::North, Turn::Right);
        let left = MovementId::new(Approach::North, Turn::Left);
        let r = junction.reserve(right, 10.0);
        assert_approx_eq!(r.next_admissible, 10.8);
        assert!(!junction.can_enter(right, 10.5));
        assert!(junction.can_enter(right, 10.81));
        let l = junction.reserve(left, 20.0);
        assert_approx_eq!(l.lock_until, 21.85);
    }

    #[test]
    fn conflicting_movements_are_locked() {
        let mut junction = junction();
        let left = MovementId::new(Approach::North, Turn::Left);
        let opposing = MovementId::new(Approach::South, Turn::Through);
        let parallel = MovementId::new(Approach::South, Turn::Right);
        junction.reserve(left, 5.0);
        assert!(!junction.can_enter(opposing, 6.0));
        assert!(junction.can_enter(opposing, 6.9));
        assert!(junction.can_enter(MovementId::new(Approach::North, Turn::Through), 6.0));
        assert!(!junction.can_enter(parallel, 6.0));
    }

    #[test]
    fn finds_approaches() {
        let junction = junction();
        let south = junction.approach_segment(Approach::South);
        assert_eq!(junction.approach_of(south), Some(Approach::South));
        assert_eq!(
            junction.approach_of(SegmentId::from(KeyData::from_ffi(u64::MAX))),
            None
        );
    }
}
