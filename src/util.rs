//! Miscellaneous utility structs and functions.

use std::fmt::Debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An interval on the real number line.
#[derive(Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Interval<T> {
    pub min: T,
    pub max: T,
}

impl<T> Interval<T> {
    /// Creates a new interval.
    pub const fn new(min: T, max: T) -> Self {
        Self { min, max }
    }
}

impl<T: std::cmp::PartialOrd> Interval<T> {
    /// Returns true if this interval overlaps with the other.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.max > other.min && other.max > self.min
    }

    /// Returns true if this interval contains the value.
    pub fn contains(&self, value: T) -> bool {
        value >= self.min && value <= self.max
    }
}

impl<T: std::ops::Sub<T, Output = T> + Copy> Interval<T> {
    /// Gets the magnitude of the interval.
    pub fn length(&self) -> T {
        self.max - self.min
    }
}

impl Interval<f64> {
    /// Creates an interval with the given centre and radius.
    pub fn disc(centre: f64, radius: f64) -> Self {
        Self {
            min: centre - radius,
            max: centre + radius,
        }
    }

    /// Returns true if the value lies in `[min, max)`.
    pub fn contains_half_open(&self, value: f64) -> bool {
        value >= self.min && value < self.max
    }

    /// Interpolates linearly from `min` at `t = 0` to `max` at `t = 1`.
    pub fn lerp(&self, t: f64) -> f64 {
        self.min + t * (self.max - self.min)
    }

    /// Clamps a value into the interval.
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    /// Returns `count` evenly spaced points spanning the interval, starting from its centre
    /// and alternating outwards so that earlier points lie closer to the centre.
    pub fn samples_from_centre(&self, count: usize) -> impl Iterator<Item = f64> {
        let centre = 0.5 * (self.min + self.max);
        let step = if count > 1 {
            self.length() / (count - 1) as f64
        } else {
            0.0
        };
        (0..count).map(move |i| {
            let k = ((i + 1) / 2) as f64;
            if i % 2 == 1 {
                centre - k * step
            } else {
                centre + k * step
            }
        })
    }
}

impl<T: Debug> Debug for Interval<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Interval({:?}, {:?})", &self.min, &self.max)
    }
}

/// The distance travelled going forwards from `from` to `to` along a road of the given
/// length. On a ring the result wraps into `[0, length)`.
pub fn forward_distance(from: f64, to: f64, length: f64, ring: bool) -> f64 {
    if ring {
        (to - from).rem_euclid(length)
    } else {
        to - from
    }
}

/// Linear-interpolated quantile of an ascending slice. Returns `None` for an empty slice.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let pos = last as f64 * q.clamp(0.0, 1.0);
    let base = pos.floor() as usize;
    let rest = pos - base as f64;
    match sorted.get(base + 1) {
        Some(next) => Some(sorted[base] + rest * (next - sorted[base])),
        None => Some(sorted[base]),
    }
}
