#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The smallest gap passed to the model, in m.
pub(crate) const GAP_FLOOR: f64 = 0.01; // m

/// The gap used when a vehicle has no leader, in m.
pub(crate) const FREE_GAP: f64 = 1e6; // m

/// Desired speeds below this are treated as "do not move".
const MIN_DESIRED_SPEED: f64 = 1e-5; // m/s

/// Beyond this magnitude `tanh` is taken as saturated.
const TANH_SATURATION: f64 = 50.0;

/// The parameters of the adaptive cruise control (ACC) car-following model:
/// the Intelligent Driver Model blended with the constant-acceleration heuristic.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ModelParams {
    /// The desired speed in m/s.
    pub desired_speed: f64,
    /// The desired time gap to the vehicle ahead in s.
    pub time_headway: f64,
    /// The minimum bumper-to-bumper gap at standstill in m.
    pub min_gap: f64,
    /// The maximum acceleration in m/s<sup>2</sup>.
    pub max_acc: f64,
    /// The comfortable deceleration in m/s<sup>2</sup>, a positive number.
    pub comf_dec: f64,
    /// The weight of the blended ACC term against plain IDM, in `[0, 1]`.
    pub coolness: f64,
    /// The hardest possible braking in m/s<sup>2</sup>, a positive number.
    pub max_dec: f64,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            desired_speed: 30.0,
            time_headway: 1.8,
            min_gap: 4.0,
            max_acc: 1.0,
            comf_dec: 1.5,
            coolness: 0.9,
            max_dec: 10.0,
        }
    }
}

impl ModelParams {
    /// Checks that the parameters are usable.
    pub fn validate(&self) -> crate::Result<()> {
        use crate::error::{require_fraction, require_non_negative, require_positive};
        require_non_negative("desired_speed", self.desired_speed)?;
        require_non_negative("time_headway", self.time_headway)?;
        require_non_negative("min_gap", self.min_gap)?;
        require_positive("max_acc", self.max_acc)?;
        require_positive("comf_dec", self.comf_dec)?;
        require_fraction("coolness", self.coolness)?;
        require_positive("max_dec", self.max_dec)
    }

    /// Returns a copy with the desired speed replaced.
    pub fn with_desired_speed(&self, desired_speed: f64) -> Self {
        Self {
            desired_speed,
            ..*self
        }
    }

    /// Computes the acceleration of a vehicle.
    ///
    /// # Arguments
    /// * `gap` - The bumper-to-bumper gap to the leader (m).
    /// * `vel` - The velocity of the simulated vehicle (m/s).
    /// * `lead_vel` - The leader's velocity (m/s).
    /// * `lead_acc` - The leader's acceleration (m/s<sup>2</sup>).
    pub fn acceleration(&self, gap: f64, vel: f64, lead_vel: f64, lead_acc: f64) -> f64 {
        if self.desired_speed < MIN_DESIRED_SPEED {
            return 0.0;
        }

        let gap = f64::max(gap, GAP_FLOOR);
        let acc_idm = self.idm(gap, vel, lead_vel);
        let acc_cah = self.cah(gap, vel, lead_vel, lead_acc);

        let acc_mix = if acc_idm > acc_cah {
            acc_idm
        } else {
            acc_cah + self.comf_dec * saturating_tanh((acc_idm - acc_cah) / self.comf_dec)
        };

        let acc = self.coolness * acc_mix + (1.0 - self.coolness) * acc_idm;
        acc.clamp(-self.max_dec, self.max_acc)
    }

    /// The free-road acceleration at the given velocity.
    pub fn free_acceleration(&self, vel: f64) -> f64 {
        self.max_acc * (1.0 - (vel / self.desired_speed).powi(4))
    }

    /// Computes an acceleration using the intelligent driver model.
    fn idm(&self, gap: f64, vel: f64, lead_vel: f64) -> f64 {
        let appr = vel - lead_vel;
        let factor = 1.0 / (2.0 * (self.max_acc * self.comf_dec).sqrt());
        let desired_gap =
            self.min_gap + f64::max(0.0, vel * self.time_headway + vel * appr * factor);
        let term = desired_gap / f64::max(gap, self.min_gap);
        let acc_int = -self.max_acc * term * term;
        f64::min(self.free_acceleration(vel), self.max_acc + acc_int)
    }

    /// The constant-acceleration heuristic: the acceleration that avoids a collision
    /// if the leader keeps its current acceleration.
    fn cah(&self, gap: f64, vel: f64, lead_vel: f64, lead_acc: f64) -> f64 {
        let acc = if lead_vel * (vel - lead_vel) < -2.0 * gap * lead_acc {
            vel * vel * lead_acc / (lead_vel * lead_vel - 2.0 * gap * lead_acc)
        } else {
            let closing = if vel > lead_vel { 1.0 } else { 0.0 };
            lead_acc - (vel - lead_vel).powi(2) / (2.0 * f64::max(gap, GAP_FLOOR)) * closing
        };
        f64::min(acc, self.max_acc)
    }
}

fn saturating_tanh(x: f64) -> f64 {
    if x > TANH_SATURATION {
        1.0
    } else if x < -TANH_SATURATION {
        -1.0
    } else {
        x.tanh()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn reference_values() {
        let params = ModelParams::default();
        assert_approx_eq!(params.acceleration(50.0, 20.0, 15.0, 0.0), -1.358996373825388, 1e-9);
        assert_approx_eq!(params.acceleration(30.0, 25.0, 20.0, -1.0), -3.636776209920412, 1e-9);
        assert_approx_eq!(params.acceleration(20.0, 10.0, 10.0, 0.0), -0.20877480463591855, 1e-9);
    }

    #[test]
    fn free_road() {
        let params = ModelParams::default();
        assert_approx_eq!(params.acceleration(FREE_GAP, 0.0, 0.0, 0.0), 1.0, 1e-9);
        assert_approx_eq!(params.acceleration(FREE_GAP, 30.0, 30.0, 0.0), 0.0, 1e-6);
    }

    #[test]
    fn zero_desired_speed() {
        let params = ModelParams::default().with_desired_speed(0.0);
        assert_eq!(params.acceleration(10.0, 5.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn braking_is_bounded() {
        let params = ModelParams::default();
        assert_approx_eq!(params.acceleration(0.5, 30.0, 0.0, 0.0), -10.0);
        assert_approx_eq!(params.acceleration(0.0, 30.0, 0.0, -9.0), -10.0);
        assert!(params.acceleration(-3.0, 10.0, 0.0, 0.0).is_finite());
    }

    #[test]
    fn continuous_across_regimes() {
        let params = ModelParams::default();
        let mut prev = params.acceleration(40.0, 15.0, 10.0, -0.5);
        for i in 1..=400 {
            let lead_acc = -0.5 + 0.0025 * i as f64;
            let acc = params.acceleration(40.0, 15.0, 10.0, lead_acc);
            assert!((acc - prev).abs() < 0.05);
            prev = acc;
        }
    }
}
