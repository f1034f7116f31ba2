//! The MOBIL discretionary lane-change model.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The parameters of the MOBIL lane-change model.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MobilParams {
    /// The safe deceleration imposed on the new follower at high speed, in m/s<sup>2</sup>.
    pub safe_dec: f64,
    /// The safe deceleration imposed on the new follower at standstill, in m/s<sup>2</sup>.
    pub safe_dec_max: f64,
    /// How much the vehicle cares about the acceleration of the new follower.
    pub politeness: f64,
    /// The minimum advantage needed to change lanes, in m/s<sup>2</sup>.
    pub threshold: f64,
    /// A bias towards the right-hand lanes (higher lane index), in m/s<sup>2</sup>.
    pub bias_right: f64,
    /// The minimum time between two lane changes of the same vehicle, in s.
    pub cooldown: f64,
}

impl Default for MobilParams {
    fn default() -> Self {
        Self {
            safe_dec: 2.0,
            safe_dec_max: 4.0,
            politeness: 0.3,
            threshold: 0.2,
            bias_right: 0.0,
            cooldown: 3.0,
        }
    }
}

/// The side of a lane change. Lane indices increase to the right.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// The target lane of a change from `lane`, if it exists on a road with `lane_count` lanes.
    pub fn target(self, lane: usize, lane_count: usize) -> Option<usize> {
        match self {
            Side::Left => lane.checked_sub(1),
            Side::Right => Some(lane + 1).filter(|lane| *lane < lane_count),
        }
    }

    fn bias_sign(self) -> f64 {
        match self {
            Side::Left => -1.0,
            Side::Right => 1.0,
        }
    }
}

/// The projected accelerations needed to judge one candidate lane.
#[derive(Clone, Copy, Debug)]
pub struct LaneChangeCandidate {
    /// The direction of the change.
    pub side: Side,
    /// The vehicle's acceleration if it stays in its lane.
    pub acc_old: f64,
    /// The vehicle's acceleration behind its prospective leader in the target lane.
    pub acc_new: f64,
    /// The prospective follower's current acceleration, or 0 without a follower.
    pub follower_old: f64,
    /// The prospective follower's acceleration with the vehicle ahead of it, or 0.
    pub follower_new: f64,
}

impl MobilParams {
    pub fn validate(&self) -> crate::Result<()> {
        use crate::error::{require_non_negative, require_positive};
        require_positive("safe_dec", self.safe_dec)?;
        require_positive("safe_dec_max", self.safe_dec_max)?;
        require_non_negative("politeness", self.politeness)?;
        require_non_negative("cooldown", self.cooldown)
    }

    /// The deceleration the new follower may be forced into, interpolated between
    /// [MobilParams::safe_dec_max] at standstill and [MobilParams::safe_dec] at the desired speed.
    pub fn safe_deceleration(&self, vel: f64, desired_speed: f64) -> f64 {
        let vrel = if desired_speed > 0.0 {
            (vel / desired_speed).clamp(0.0, 1.0)
        } else {
            0.0
        };
        vrel * self.safe_dec + (1.0 - vrel) * self.safe_dec_max
    }

    /// Whether forcing `follower_new` on the new follower is acceptable.
    /// `relax` scales the admissible deceleration; 1 for ordinary lane changes.
    pub fn is_safe(&self, follower_new: f64, vel: f64, desired_speed: f64, relax: f64) -> bool {
        let bound = relax * self.safe_deceleration(vel, desired_speed);
        follower_new >= f64::min(-bound, -self.bias_right.abs())
    }

    /// The utility of a lane change; positive values favour changing.
    pub fn incentive(&self, candidate: &LaneChangeCandidate) -> f64 {
        let own = candidate.acc_new - candidate.acc_old;
        let others = self.politeness * (candidate.follower_new - candidate.follower_old);
        own + others - self.threshold + self.bias_right * candidate.side.bias_sign()
    }

    /// Picks the safe candidate with the largest positive incentive.
    /// Ties go to the candidate evaluated first.
    pub fn choose(
        &self,
        candidates: &[LaneChangeCandidate],
        vel: f64,
        desired_speed: f64,
    ) -> Option<Side> {
        let mut best: Option<(Side, f64)> = None;
        for candidate in candidates {
            if !self.is_safe(candidate.follower_new, vel, desired_speed, 1.0) {
                continue;
            }
            let incentive = self.incentive(candidate);
            if incentive <= 0.0 {
                continue;
            }
            if best.map_or(true, |(_, value)| incentive > value) {
                best = Some((candidate.side, incentive));
            }
        }
        best.map(|(side, _)| side)
    }
}
