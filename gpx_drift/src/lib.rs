//! Timestamp drift analysis and correction for GPS tracks sampled at a fixed interval.
//!
//! The pipeline runs strictly forward: timestamps → errors → centered running
//! average → hysteresis-gated errors → corrected timestamps. [`TrackHandler`]
//! ties the stages together and caches each one until a fix invalidates them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod drift;
pub mod handler;
pub mod track;

pub use drift::{
    centered_moving_average, correct_timestamps, count_steps, timing_errors, HysteresisGate,
};
pub use handler::{FixReport, TrackHandler};
pub use track::{format_gpx_time, GpxTrack, TimestampSource, GPX_TIME_FORMAT};

#[derive(Error, Debug)]
pub enum DriftError {
    #[error("failed to parse GPX track: {0}")]
    GpxParse(String),
    #[error("failed to write GPX track: {0}")]
    GpxWrite(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("timestamp count mismatch: track has {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("corrected timestamp offset {0}s is out of range")]
    TimestampOutOfRange(f64),
}

/// Analysis parameters shared by every stage of one handler.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Params {
    /// Ideal sampling period in seconds.
    pub interval_s: f64,
    /// Running-average window in samples.
    pub window: usize,
    /// Hysteresis band in seconds.
    pub hysteresis: f64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            interval_s: 1.0,
            window: 60,
            hysteresis: 0.7,
        }
    }
}

impl Params {
    pub fn validate(&self) -> Result<(), DriftError> {
        if self.window == 0 {
            return Err(DriftError::InvalidParameter(
                "running-average window must be positive".into(),
            ));
        }
        if !self.hysteresis.is_finite() || self.hysteresis <= 0.0 {
            return Err(DriftError::InvalidParameter(format!(
                "hysteresis must be a positive number of seconds, got {}",
                self.hysteresis
            )));
        }
        if !self.interval_s.is_finite() || self.interval_s <= 0.0 {
            return Err(DriftError::InvalidParameter(format!(
                "sampling interval must be a positive number of seconds, got {}",
                self.interval_s
            )));
        }
        Ok(())
    }

    /// Round an odd window request up to the next even size.
    pub fn even_window(window: usize) -> usize {
        if window % 2 == 1 {
            window + 1
        } else {
            window
        }
    }
}
