use thiserror::Error;

/// Errors raised while building or driving a simulation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A segment was configured with a zero, negative or non-finite length.
    #[error("segment `{segment}` has non-positive length {length}")]
    NonPositiveLength { segment: String, length: f64 },

    /// A segment was configured without any lanes.
    #[error("segment `{segment}` must have at least one lane")]
    NoLanes { segment: String },

    /// A lane index does not exist on the segment it refers to.
    #[error("lane {lane} is out of range for segment `{segment}` with {lane_count} lane(s)")]
    LaneOutOfRange {
        segment: String,
        lane: usize,
        lane_count: usize,
    },

    /// A position (merge point, trigger, region) lies outside its segment.
    #[error("{what} at {pos} m lies outside segment `{segment}` of length {length} m")]
    PositionOutOfRange {
        what: &'static str,
        segment: String,
        pos: f64,
        length: f64,
    },

    /// A scalar parameter has a value the simulation cannot work with.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// The referenced segment does not exist in the network.
    #[error("unknown segment")]
    UnknownSegment,

    /// The referenced entry does not exist in the network.
    #[error("unknown entry index {0}")]
    UnknownEntry(usize),

    /// The operation needs a signalized junction but the network has none.
    #[error("the network has no signalized junction")]
    NoJunction,
}

/// Shorthand for results produced by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Fails with [Error::InvalidParameter] unless `value` is finite and strictly positive.
pub(crate) fn require_positive(name: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidParameter {
            name,
            reason: format!("expected a positive value, got {value}"),
        })
    }
}

/// Fails with [Error::InvalidParameter] unless `value` is finite and not negative.
pub(crate) fn require_non_negative(name: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidParameter {
            name,
            reason: format!("expected a non-negative value, got {value}"),
        })
    }
}

/// Fails with [Error::InvalidParameter] unless `value` lies in `[0, 1]`.
pub(crate) fn require_fraction(name: &'static str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::InvalidParameter {
            name,
            reason: format!("expected a value in [0, 1], got {value}"),
        })
    }
}
