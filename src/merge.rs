//! Gap-acceptance merging of a single-lane source segment into a lane of a target segment.

use crate::error::{require_non_negative, require_positive};
use crate::segment::Segment;
use crate::util::Interval;
use crate::vehicle::acceleration::{ModelParams, FREE_GAP};
use crate::vehicle::lane_change::MobilParams;
use crate::vehicle::{Leader, Vehicle};
use crate::{SegmentId, VehicleSet};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Which stream has to give way at a merge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PriorityRule {
    /// Merging vehicles yield to the through stream and need generous gaps.
    #[default]
    Through,
    /// Merging vehicles have right of way and accept tight gaps.
    Entry,
}

impl PriorityRule {
    /// The gaps ahead of and behind the merging vehicle (m) needed for a merge,
    /// given the base gap of the merging vehicle's car-following model.
    pub fn required_gaps(self, base: f64) -> (f64, f64) {
        let ahead = base;
        let behind = 0.75 * base;
        match self {
            PriorityRule::Through => (ahead + 4.0, behind + 6.0),
            PriorityRule::Entry => (f64::max(6.0, ahead - 2.0), f64::max(4.0, behind - 3.0)),
        }
    }
}

/// A place where vehicles leave the end of a source segment and join a target lane.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MergeZone {
    /// The single-lane segment vehicles merge from.
    pub source: SegmentId,
    /// Vehicles at or past this source position look for a gap.
    pub trigger: f64,
    pub target: SegmentId,
    pub target_lane: usize,
    /// The target position level with the trigger.
    pub anchor: f64,
    /// Candidate positions are searched within this distance of the projection, in m.
    pub half_window: f64,
    /// The number of candidate positions.
    pub tries: usize,
    pub priority: PriorityRule,
    /// No merge leaves less than this gap on either side, in m.
    pub min_gap: f64,
    /// Scales the deceleration the new follower may be forced into.
    pub safety_relax: f64,
}

/// An admissible merge position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MergeSlot {
    /// The target position of the merging vehicle's front bumper.
    pub pos: f64,
    pub gap_ahead: f64,
    pub gap_behind: f64,
    /// The merging vehicle's acceleration after the merge.
    pub acc: f64,
}

impl MergeZone {
    pub fn validate(&self) -> crate::Result<()> {
        require_non_negative("merge.trigger", self.trigger)?;
        require_non_negative("merge.half_window", self.half_window)?;
        require_positive("merge.tries", self.tries as f64)?;
        require_non_negative("merge.min_gap", self.min_gap)?;
        require_positive("merge.safety_relax", self.safety_relax)
    }

    /// The gaps ahead and behind needed by a vehicle merging with the given parameters.
    pub fn required_gaps(&self, vel: f64, params: &ModelParams) -> (f64, f64) {
        let base = params.min_gap + 0.65 * vel * params.time_headway;
        self.priority.required_gaps(base)
    }

    /// Where a vehicle at `source_pos` would land on the target.
    pub fn projected_pos(&self, source_pos: f64, target: &Segment) -> f64 {
        target.wrap(self.anchor + (source_pos - self.trigger))
    }

    /// Searches the window around the projected position for the admissible position that
    /// gives the merging vehicle the highest acceleration.
    pub(crate) fn find_slot(
        &self,
        vehicle: &Vehicle,
        target: &Segment,
        vehicles: &VehicleSet,
        model: &ModelParams,
        mobil: &MobilParams,
    ) -> Option<MergeSlot> {
        let centre = self.projected_pos(vehicle.pos_front(), target);
        let mut best: Option<MergeSlot> = None;
        for pos in Interval::disc(centre, self.half_window).samples_from_centre(self.tries) {
            let pos = target.wrap(pos);
            if !target.is_ring() && (pos < vehicle.length() || pos > target.length()) {
                continue;
            }
            let Some(slot) = self.evaluate(vehicle, target, vehicles, pos, model, mobil) else {
                continue;
            };
            if best.map_or(true, |best| slot.acc > best.acc) {
                best = Some(slot);
            }
        }
        best
    }

    fn evaluate(
        &self,
        vehicle: &Vehicle,
        target: &Segment,
        vehicles: &VehicleSet,
        pos: f64,
        model: &ModelParams,
        mobil: &MobilParams,
    ) -> Option<MergeSlot> {
        let (ahead, behind) = target.neighbours(vehicles, self.target_lane, pos, None);
        let gap_ahead = ahead.map_or(FREE_GAP, |id| target.gap_to(vehicles, pos, id));
        let gap_behind = behind.map_or(FREE_GAP, |id| {
            target.forward_distance(vehicles[id].pos, pos) - vehicle.length()
        });

        let params = vehicle.model_params(model, target.speed_factor(pos));
        let (need_ahead, need_behind) = self.required_gaps(vehicle.vel(), &params);
        if gap_ahead < f64::max(need_ahead, self.min_gap)
            || gap_behind < f64::max(need_behind, self.min_gap)
        {
            return None;
        }

        if let Some(id) = behind {
            let follower = &vehicles[id];
            let follower_params = follower.model_params(model, target.speed_factor(follower.pos));
            let follower_new = follower.projected_acc(
                &follower_params,
                Some(Leader {
                    gap: gap_behind,
                    vel: vehicle.vel(),
                    acc: vehicle.acc(),
                }),
            );
            let safe = mobil.is_safe(
                follower_new,
                vehicle.vel(),
                params.desired_speed,
                self.safety_relax,
            );
            if !safe {
                return None;
            }
        }

        let acc = vehicle.projected_acc(&params, target.leader_at(vehicles, pos, ahead));
        Some(MergeSlot {
            pos,
            gap_ahead,
            gap_behind,
            acc,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::segment::{SegmentAttributes, SegmentEnd};
    use crate::vehicle::{VehicleAttributes, VehicleClass};
    use crate::SegmentSet;
    use assert_approx_eq::assert_approx_eq;

    struct Fixture {
        segments: SegmentSet,
        vehicles: VehicleSet,
        zone: MergeZone,
    }

    fn fixture(main_positions: &[f64]) -> Fixture {
        let mut segments = SegmentSet::with_key();
        let target = segments.insert_with_key(|id| {
            Segment::new(
                id,
                &SegmentAttributes {
                    name: "main",
                    length: 500.0,
                    lane_count: 1,
                    end: SegmentEnd::Open {
                        despawn_buffer: 0.0,
                    },
                },
            )
        });
        let source = segments.insert_with_key(|id| {
            Segment::new(
                id,
                &SegmentAttributes {
                    name: "ramp",
                    length: 100.0,
                    lane_count: 1,
                    end: SegmentEnd::Hold,
                },
            )
        });
        let mut vehicles = VehicleSet::with_key();
        for (i, pos) in main_positions.iter().enumerate() {
            let id = vehicles.insert_with_key(|id| {
                Vehicle::new(id, i as u64, &car(), target, 0, *pos, 15.0, 0.0)
            });
            segments[target].insert_vehicle(&vehicles, id);
        }
        let zone = MergeZone {
            source,
            trigger: 80.0,
            target,
            target_lane: 0,
            anchor: 200.0,
            half_window: 6.0,
            tries: 5,
            priority: PriorityRule::Through,
            min_gap: 2.0,
            safety_relax: 1.5,
        };
        Fixture {
            segments,
            vehicles,
            zone,
        }
    }

    fn car() -> VehicleAttributes {
        VehicleAttributes {
            class: VehicleClass::Car,
            length: 4.5,
            speed_mult: 1.0,
        }
    }

    fn merging(fixture: &mut Fixture, pos: f64) -> Vehicle {
        let source = fixture.zone.source;
        let id = fixture
            .vehicles
            .insert_with_key(|id| Vehicle::new(id, 99, &car(), source, 0, pos, 12.0, 0.0));
        fixture.vehicles.remove(id).unwrap()
    }

    #[test]
    fn gap_rules() {
        let (ahead, behind) = PriorityRule::Through.required_gaps(10.0);
        assert_approx_eq!(ahead, 14.0);
        assert_approx_eq!(behind, 13.5);
        let (ahead, behind) = PriorityRule::Entry.required_gaps(10.0);
        assert_approx_eq!(ahead, 8.0);
        assert_approx_eq!(behind, 4.5);
        let (ahead, behind) = PriorityRule::Entry.required_gaps(2.0);
        assert_approx_eq!(ahead, 6.0);
        assert_approx_eq!(behind, 4.0);
    }

    #[test]
    fn projects_onto_target() {
        let fixture = fixture(&[]);
        let target = &fixture.segments[fixture.zone.target];
        assert_approx_eq!(fixture.zone.projected_pos(90.0, target), 210.0);
    }

    #[test]
    fn merges_into_empty_lane() {
        let mut fixture = fixture(&[]);
        let vehicle = merging(&mut fixture, 85.0);
        let target = &fixture.segments[fixture.zone.target];
        let model = ModelParams::default();
        let slot = fixture
            .zone
            .find_slot(&vehicle, target, &fixture.vehicles, &model, &MobilParams::default())
            .unwrap();
        assert!((199.0..=211.0).contains(&slot.pos));
        assert_eq!(slot.gap_ahead, FREE_GAP);
    }

    #[test]
    fn rejects_tight_gap() {
        // Vehicles just ahead of and just behind the projected position.
        let mut fixture = fixture(&[196.0, 222.0]);
        let vehicle = merging(&mut fixture, 85.0);
        let target = &fixture.segments[fixture.zone.target];
        let slot = fixture.zone.find_slot(
            &vehicle,
            target,
            &fixture.vehicles,
            &ModelParams::default(),
            &MobilParams::default(),
        );
        assert_eq!(slot, None);
    }

    #[test]
    fn accepted_gaps_meet_requirements() {
        let mut fixture = fixture(&[150.0, 260.0]);
        let vehicle = merging(&mut fixture, 85.0);
        let target = &fixture.segments[fixture.zone.target];
        let model = ModelParams::default();
        let slot = fixture
            .zone
            .find_slot(&vehicle, target, &fixture.vehicles, &model, &MobilParams::default())
            .unwrap();
        let (need_ahead, need_behind) = fixture.zone.required_gaps(vehicle.vel(), &model);
        assert!(slot.gap_ahead >= need_ahead);
        assert!(slot.gap_behind >= need_behind);
        assert!(slot.gap_behind >= fixture.zone.min_gap);
    }
}
