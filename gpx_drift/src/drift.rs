//! The numeric stages of drift correction.
//!
//! Sequences that can contain gaps use `Option<f64>`; `None` marks an entry
//! for which no value can be reported.

use chrono::{DateTime, Duration, Utc};

use crate::DriftError;

/// Deviation of each timestamp from its ideal elapsed time, in seconds.
///
/// `error[i] = (timestamps[i] - timestamps[0]) - i * interval_s`.
pub fn timing_errors(timestamps: &[DateTime<Utc>], interval_s: f64) -> Vec<f64> {
    let Some(&origin) = timestamps.first() else {
        return Vec::new();
    };
    timestamps
        .iter()
        .enumerate()
        .map(|(i, &ts)| {
            elapsed_seconds(ts - origin) - i as f64 * interval_s
        })
        .collect()
}

/// Nanosecond resolution; spans past ~292 years fall back to milliseconds.
fn elapsed_seconds(elapsed: Duration) -> f64 {
    match elapsed.num_nanoseconds() {
        Some(nanos) => nanos as f64 / 1e9,
        None => elapsed.num_milliseconds() as f64 / 1000.0,
    }
}

/// Centered running average of width `window`.
///
/// Output position `k` holds the mean of `errors[k - lead ..= k - lead + window - 1]`
/// with `lead = (window - 1) / 2`, which for an even window is the range
/// `[k - window/2 + 1, k + window/2]`. The first `lead` and the last
/// `window / 2` positions are `None`; if the track is shorter than the window
/// every position is `None`. This is the same sequence a trailing buffer
/// produces when it withholds output until half full and pads the tail.
pub fn centered_moving_average(errors: &[f64], window: usize) -> Vec<Option<f64>> {
    let n = errors.len();
    let mut out = vec![None; n];
    if window == 0 || n < window {
        return out;
    }
    let lead = (window - 1) / 2;
    for (start, slot) in out[lead..lead + n - window + 1].iter_mut().enumerate() {
        let sum: f64 = errors[start..start + window].iter().sum();
        *slot = Some(sum / window as f64);
    }
    out
}

/// Quantises a smoothed error into an integer staircase.
///
/// The accumulator moves one unit toward the input whenever the two differ by
/// more than the threshold, and holds otherwise.
#[derive(Clone, Debug)]
pub struct HysteresisGate {
    threshold: f64,
    accumulator: f64,
}

impl HysteresisGate {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            accumulator: 0.0,
        }
    }

    pub fn step(&mut self, average: f64) -> f64 {
        let diff = self.accumulator - average;
        if diff > self.threshold {
            self.accumulator -= 1.0;
        } else if diff < -self.threshold {
            self.accumulator += 1.0;
        }
        self.accumulator
    }

    /// Run a fresh gate over a whole sequence. Gaps pass through untouched and
    /// leave the accumulator where it was.
    pub fn apply(threshold: f64, averages: &[Option<f64>]) -> Vec<Option<f64>> {
        let mut gate = Self::new(threshold);
        averages
            .iter()
            .map(|avg| avg.map(|avg| gate.step(avg)))
            .collect()
    }
}

/// Number of value changes between consecutive defined gated errors.
pub fn count_steps(gated: &[Option<f64>]) -> usize {
    let defined: Vec<f64> = gated.iter().flatten().copied().collect();
    defined.windows(2).filter(|w| w[0] != w[1]).count()
}

/// Rebuild timestamps as `origin + i * interval_s + correction[i]`.
///
/// The correction at each position is the most recent defined gated error.
/// Positions before the first defined value use that first value (the seed).
/// Returns `Ok(None)` when no gated error is defined at all.
pub fn correct_timestamps(
    timestamps: &[DateTime<Utc>],
    gated: &[Option<f64>],
    interval_s: f64,
) -> Result<Option<Vec<DateTime<Utc>>>, DriftError> {
    if gated.len() != timestamps.len() {
        return Err(DriftError::LengthMismatch {
            expected: timestamps.len(),
            actual: gated.len(),
        });
    }
    let Some(seed) = gated.iter().flatten().copied().next() else {
        return Ok(None);
    };
    let origin = timestamps[0];

    let mut carried = seed;
    let mut corrected = Vec::with_capacity(timestamps.len());
    for (i, value) in gated.iter().enumerate() {
        if let Some(value) = value {
            carried = *value;
        }
        let offset = i as f64 * interval_s + carried;
        let shifted = origin
            .checked_add_signed(seconds_to_duration(offset)?)
            .ok_or(DriftError::TimestampOutOfRange(offset))?;
        corrected.push(shifted);
    }
    Ok(Some(corrected))
}

fn seconds_to_duration(seconds: f64) -> Result<Duration, DriftError> {
    let nanos = (seconds * 1e9).round();
    if !nanos.is_finite() || nanos.abs() >= i64::MAX as f64 {
        return Err(DriftError::TimestampOutOfRange(seconds));
    }
    Ok(Duration::nanoseconds(nanos as i64))
}
