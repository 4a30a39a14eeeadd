//! Timing calculator.
//!
//! Pure functions mapping a message count and a trickle policy to the ordered
//! send timestamps. Nothing here reads the clock, so identical inputs always
//! give identical output.
//!
//! Arithmetic is done on whole nanoseconds in `i128`. For a window the `i`-th
//! timestamp is `start + duration * i / (n - 1)`, which puts the last message
//! exactly at `start + duration`.

use chrono::{DateTime, TimeDelta, Utc};

use crate::messages::TricklePolicy;

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Timing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimingError {
    #[error("negative {what}: {value}")]
    Negative { what: &'static str, value: TimeDelta },

    #[error("fixed spacing must be positive")]
    ZeroSpacing,

    #[error("timestamp for message {index} is out of range")]
    Overflow { index: usize },
}

/// Spread `n` messages evenly over `[start, start + duration]`.
///
/// `n == 1` gives `[start]`, `n == 0` gives an empty sequence.
pub fn spread_over_window(
    start: DateTime<Utc>,
    duration: TimeDelta,
    n: usize,
) -> Result<Vec<DateTime<Utc>>, TimingError> {
    if duration < TimeDelta::zero() {
        return Err(TimingError::Negative {
            what: "duration",
            value: duration,
        });
    }

    match n {
        0 => Ok(Vec::new()),
        1 => Ok(vec![start]),
        _ => {
            let total = nanos(duration);
            let gaps = (n - 1) as i128;
            (0..n)
                .map(|i| offset(start, total * i as i128 / gaps, i))
                .collect()
        }
    }
}

/// Place `n` messages `spacing` apart, the first at `start`.
///
/// Zero spacing is rejected so the sequence is strictly increasing.
pub fn fixed_spacing(
    start: DateTime<Utc>,
    spacing: TimeDelta,
    n: usize,
) -> Result<Vec<DateTime<Utc>>, TimingError> {
    if spacing < TimeDelta::zero() {
        return Err(TimingError::Negative {
            what: "spacing",
            value: spacing,
        });
    }
    if spacing == TimeDelta::zero() {
        return Err(TimingError::ZeroSpacing);
    }

    let step = nanos(spacing);
    (0..n)
        .map(|i| offset(start, step * i as i128, i))
        .collect()
}

impl TricklePolicy {
    /// Send timestamps for `n` messages starting at `start`.
    pub fn timestamps(
        &self,
        start: DateTime<Utc>,
        n: usize,
    ) -> Result<Vec<DateTime<Utc>>, TimingError> {
        match *self {
            Self::SpreadOverWindow { duration } => spread_over_window(start, duration, n),
            Self::FixedSpacing { spacing } => fixed_spacing(start, spacing, n),
        }
    }
}

fn nanos(delta: TimeDelta) -> i128 {
    delta.num_seconds() as i128 * NANOS_PER_SEC + delta.subsec_nanos() as i128
}

fn offset(start: DateTime<Utc>, nanos: i128, index: usize) -> Result<DateTime<Utc>, TimingError> {
    let secs = i64::try_from(nanos.div_euclid(NANOS_PER_SEC))
        .map_err(|_| TimingError::Overflow { index })?;
    let sub = nanos.rem_euclid(NANOS_PER_SEC) as i64;

    TimeDelta::try_seconds(secs)
        .and_then(|d| d.checked_add(&TimeDelta::nanoseconds(sub)))
        .and_then(|d| start.checked_add_signed(d))
        .ok_or(TimingError::Overflow { index })
}
