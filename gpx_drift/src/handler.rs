use std::io::Write;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::drift::{centered_moving_average, correct_timestamps, timing_errors, HysteresisGate};
use crate::track::{GpxTrack, TimestampSource};
use crate::{DriftError, Params};

/// Outcome of [`TrackHandler::fix`].
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FixReport {
    /// Timestamp fields on the track.
    pub points: usize,
    /// First defined gated error; `None` when nothing could be corrected.
    pub seed: Option<f64>,
    /// Timestamps whose value changed.
    pub adjusted: usize,
}

impl FixReport {
    pub fn applied(&self) -> bool {
        self.seed.is_some()
    }
}

/// Owns a track and lazily derives errors, running average and gated errors.
///
/// Each stage is computed on first access and served from cache afterwards.
/// A successful [`fix`](Self::fix) or an explicit [`reset`](Self::reset)
/// drops every cached stage.
#[derive(Debug)]
pub struct TrackHandler<T> {
    track: T,
    params: Params,
    errors: Option<Vec<f64>>,
    running_average: Option<Vec<Option<f64>>>,
    gated_errors: Option<Vec<Option<f64>>>,
}

impl<T: TimestampSource> TrackHandler<T> {
    pub fn new(track: T, params: Params) -> Result<Self, DriftError> {
        params.validate()?;
        Ok(Self {
            track,
            params,
            errors: None,
            running_average: None,
            gated_errors: None,
        })
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn track(&self) -> &T {
        &self.track
    }

    pub fn into_track(self) -> T {
        self.track
    }

    pub fn errors(&mut self) -> Result<&[f64], DriftError> {
        if self.errors.is_none() {
            let timestamps = self.track.timestamps()?;
            let errors = timing_errors(&timestamps, self.params.interval_s);
            debug!(len = errors.len(), "computed timing errors");
            self.errors = Some(errors);
        }
        Ok(self.errors.as_deref().unwrap_or_default())
    }

    pub fn running_average(&mut self) -> Result<&[Option<f64>], DriftError> {
        if self.running_average.is_none() {
            let window = self.params.window;
            let averaged = centered_moving_average(self.errors()?, window);
            debug!(len = averaged.len(), window, "computed running average");
            self.running_average = Some(averaged);
        }
        Ok(self.running_average.as_deref().unwrap_or_default())
    }

    pub fn gated_errors(&mut self) -> Result<&[Option<f64>], DriftError> {
        if self.gated_errors.is_none() {
            let hysteresis = self.params.hysteresis;
            let gated = HysteresisGate::apply(hysteresis, self.running_average()?);
            debug!(len = gated.len(), hysteresis, "computed gated errors");
            self.gated_errors = Some(gated);
        }
        Ok(self.gated_errors.as_deref().unwrap_or_default())
    }

    /// Rewrite the track's timestamps from the gated errors.
    ///
    /// When no gated error is defined (empty or too-short track) the track and
    /// every cache are left as they were.
    pub fn fix(&mut self) -> Result<FixReport, DriftError> {
        let interval_s = self.params.interval_s;
        let gated = self.gated_errors()?.to_vec();
        let timestamps = self.track.timestamps()?;
        let mut report = FixReport {
            points: timestamps.len(),
            ..FixReport::default()
        };

        let Some(corrected) = correct_timestamps(&timestamps, &gated, interval_s)? else {
            info!(points = report.points, "no defined gated error, track left unchanged");
            return Ok(report);
        };

        report.seed = gated.iter().flatten().copied().next();
        report.adjusted = timestamps
            .iter()
            .zip(&corrected)
            .filter(|(before, after)| before != after)
            .count();
        self.track.replace_timestamps(&corrected)?;
        self.reset();
        info!(
            points = report.points,
            adjusted = report.adjusted,
            "rewrote track timestamps"
        );
        Ok(report)
    }

    /// Drop every cached stage so the next access recomputes from the track.
    pub fn reset(&mut self) {
        self.errors = None;
        self.running_average = None;
        self.gated_errors = None;
        debug!("derived sequences invalidated");
    }
}

impl TrackHandler<GpxTrack> {
    /// Serialise the (possibly corrected) GPX document.
    pub fn save<W: Write>(&self, writer: W) -> Result<(), DriftError> {
        self.track.write(writer)
    }
}
