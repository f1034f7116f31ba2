use crate::conflict::{Approach, Axis};
use crate::error::require_positive;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// The phases of a two-axis traffic signal, in cycle order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SignalPhase {
    NsGreen,
    NsYellow,
    AllRed1,
    EwRedYellow,
    EwGreen,
    EwYellow,
    AllRed2,
    NsRedYellow,
}

/// The state of the signal shown to one approach.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LightState {
    Red,
    RedAmber,
    Amber,
    Green,
}

/// The durations of the signal phases, in s.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SignalTiming {
    pub ns_green: f64,
    pub ew_green: f64,
    pub yellow: f64,
    pub all_red: f64,
    pub red_yellow: f64,
}

impl Default for SignalTiming {
    fn default() -> Self {
        Self {
            ns_green: 28.0,
            ew_green: 28.0,
            yellow: 3.0,
            all_red: 1.0,
            red_yellow: 1.5,
        }
    }
}

impl SignalTiming {
    pub fn validate(&self) -> crate::Result<()> {
        require_positive("ns_green", self.ns_green)?;
        require_positive("ew_green", self.ew_green)?;
        require_positive("yellow", self.yellow)?;
        require_positive("all_red", self.all_red)?;
        require_positive("red_yellow", self.red_yellow)
    }

    /// The duration of a phase.
    pub fn duration(&self, phase: SignalPhase) -> f64 {
        use SignalPhase::*;
        match phase {
            NsGreen => self.ns_green,
            EwGreen => self.ew_green,
            NsYellow | EwYellow => self.yellow,
            AllRed1 | AllRed2 => self.all_red,
            EwRedYellow | NsRedYellow => self.red_yellow,
        }
    }

    /// The length of one full cycle.
    pub fn cycle_length(&self) -> f64 {
        SignalPhase::CYCLE.iter().map(|p| self.duration(*p)).sum()
    }
}

impl SignalPhase {
    /// The phases in cycle order, starting with [SignalPhase::NsGreen].
    pub const CYCLE: [SignalPhase; 8] = [
        SignalPhase::NsGreen,
        SignalPhase::NsYellow,
        SignalPhase::AllRed1,
        SignalPhase::EwRedYellow,
        SignalPhase::EwGreen,
        SignalPhase::EwYellow,
        SignalPhase::AllRed2,
        SignalPhase::NsRedYellow,
    ];

    /// The phase that follows this one.
    pub fn next(self) -> SignalPhase {
        use SignalPhase::*;
        match self {
            NsGreen => NsYellow,
            NsYellow => AllRed1,
            AllRed1 => EwRedYellow,
            EwRedYellow => EwGreen,
            EwGreen => EwYellow,
            EwYellow => AllRed2,
            AllRed2 => NsRedYellow,
            NsRedYellow => NsGreen,
        }
    }

    /// The green phase of an axis.
    pub fn green(axis: Axis) -> SignalPhase {
        match axis {
            Axis::NorthSouth => SignalPhase::NsGreen,
            Axis::EastWest => SignalPhase::EwGreen,
        }
    }

    /// The signal shown to approaches on the given axis.
    pub fn light(self, axis: Axis) -> LightState {
        use SignalPhase::*;
        match (self, axis) {
            (NsGreen, Axis::NorthSouth) | (EwGreen, Axis::EastWest) => LightState::Green,
            (NsYellow, Axis::NorthSouth) | (EwYellow, Axis::EastWest) => LightState::Amber,
            (NsRedYellow, Axis::NorthSouth) | (EwRedYellow, Axis::EastWest) => {
                LightState::RedAmber
            }
            _ => LightState::Red,
        }
    }
}

impl LightState {
    /// Whether vehicles may proceed into the junction.
    pub fn is_go(self) -> bool {
        self != LightState::Red
    }
}

/// A fixed-time two-axis traffic signal with manual override.
#[derive(Clone, Debug)]
pub struct SignalController {
    /// The phase durations.
    timing: SignalTiming,
    /// The current phase.
    phase: SignalPhase,
    /// The time left in the current phase, in s.
    remaining: f64,
    /// The axis held green by a manual override.
    manual: Option<Axis>,
}

impl SignalController {
    /// Creates a signal at the start of [SignalPhase::NsGreen].
    pub fn new(timing: SignalTiming) -> Self {
        Self {
            timing,
            phase: SignalPhase::NsGreen,
            remaining: timing.ns_green,
            manual: None,
        }
    }

    pub fn phase(&self) -> SignalPhase {
        self.phase
    }

    /// The time left in the current phase, in s. Infinite under manual override.
    pub fn remaining(&self) -> f64 {
        self.remaining
    }

    pub fn timing(&self) -> &SignalTiming {
        &self.timing
    }

    pub fn manual_override(&self) -> Option<Axis> {
        self.manual
    }

    /// The signal shown to an approach.
    pub fn light(&self, approach: Approach) -> LightState {
        self.phase.light(approach.axis())
    }

    /// Holds one axis green until [SignalController::set_override] is called with `None`,
    /// which restarts the automatic cycle at [SignalPhase::NsGreen].
    pub fn set_override(&mut self, axis: Option<Axis>) {
        self.manual = axis;
        match axis {
            Some(axis) => {
                self.phase = SignalPhase::green(axis);
                self.remaining = f64::INFINITY;
            }
            None => {
                self.phase = SignalPhase::NsGreen;
                self.remaining = self.timing.ns_green;
            }
        }
    }

    /// Advances the signal by `dt` seconds and returns the phases entered.
    /// Time left over at the end of a phase is carried into the next one.
    pub fn step(&mut self, dt: f64) -> SmallVec<[SignalPhase; 2]> {
        let mut entered = SmallVec::new();
        if self.manual.is_some() {
            return entered;
        }
        self.remaining -= dt;
        while self.remaining <= 0.0 {
            self.phase = self.phase.next();
            self.remaining += self.timing.duration(self.phase);
            entered.push(self.phase);
        }
        entered
    }
}
