use std::io::{Cursor, Read, Write};

use chrono::{DateTime, SecondsFormat, Utc};
use gpx::{Gpx, Time};
use time::OffsetDateTime;

use crate::DriftError;

/// strftime pattern of a whole-second GPX timestamp.
pub const GPX_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// An ordered sequence of mutable timestamp fields.
pub trait TimestampSource {
    /// All timestamps in recording order.
    fn timestamps(&self) -> Result<Vec<DateTime<Utc>>, DriftError>;

    /// Overwrite every timestamp, in recording order.
    fn replace_timestamps(&mut self, corrected: &[DateTime<Utc>]) -> Result<(), DriftError>;
}

impl TimestampSource for Vec<DateTime<Utc>> {
    fn timestamps(&self) -> Result<Vec<DateTime<Utc>>, DriftError> {
        Ok(self.clone())
    }

    fn replace_timestamps(&mut self, corrected: &[DateTime<Utc>]) -> Result<(), DriftError> {
        if corrected.len() != self.len() {
            return Err(DriftError::LengthMismatch {
                expected: self.len(),
                actual: corrected.len(),
            });
        }
        self.copy_from_slice(corrected);
        Ok(())
    }
}

/// A parsed GPX document whose track-point times are the timestamp fields.
///
/// Every `trk/trkseg/trkpt` carrying a `<time>` is a field, in document order.
/// Points without a time are carried through untouched.
#[derive(Clone, Debug)]
pub struct GpxTrack {
    gpx: Gpx,
}

impl GpxTrack {
    pub fn from_bytes(input: &[u8]) -> Result<Self, DriftError> {
        Self::from_reader(Cursor::new(input))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, DriftError> {
        let gpx = gpx::read(reader).map_err(|e| DriftError::GpxParse(e.to_string()))?;
        Ok(Self { gpx })
    }

    pub fn gpx(&self) -> &Gpx {
        &self.gpx
    }

    /// Number of timed track points.
    pub fn len(&self) -> usize {
        self.times().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialise the document with every `<time>` in [`GPX_TIME_FORMAT`].
    pub fn write<W: Write>(&self, mut writer: W) -> Result<(), DriftError> {
        let mut buffer = Vec::new();
        gpx::write(&self.gpx, &mut buffer).map_err(|e| DriftError::GpxWrite(e.to_string()))?;
        let xml = String::from_utf8(buffer).map_err(|e| DriftError::GpxWrite(e.to_string()))?;
        writer
            .write_all(normalise_time_elements(&xml)?.as_bytes())
            .map_err(|e| DriftError::GpxWrite(e.to_string()))
    }

    fn times(&self) -> impl Iterator<Item = &Time> {
        self.gpx
            .tracks
            .iter()
            .flat_map(|track| track.segments.iter())
            .flat_map(|segment| segment.points.iter())
            .filter_map(|point| point.time.as_ref())
    }

    fn times_mut(&mut self) -> impl Iterator<Item = &mut Time> {
        self.gpx
            .tracks
            .iter_mut()
            .flat_map(|track| track.segments.iter_mut())
            .flat_map(|segment| segment.points.iter_mut())
            .filter_map(|point| point.time.as_mut())
    }
}

impl TimestampSource for GpxTrack {
    fn timestamps(&self) -> Result<Vec<DateTime<Utc>>, DriftError> {
        self.times().map(gpx_time_to_utc).collect()
    }

    fn replace_timestamps(&mut self, corrected: &[DateTime<Utc>]) -> Result<(), DriftError> {
        let expected = self.len();
        if corrected.len() != expected {
            return Err(DriftError::LengthMismatch {
                expected,
                actual: corrected.len(),
            });
        }
        let converted = corrected
            .iter()
            .map(utc_to_gpx_time)
            .collect::<Result<Vec<_>, _>>()?;
        for (slot, time) in self.times_mut().zip(converted) {
            *slot = time;
        }
        Ok(())
    }
}

/// Render a time as `YYYY-MM-DDTHH:MM:SSZ`, keeping a fraction only when one exists.
pub fn format_gpx_time(utc: &DateTime<Utc>) -> String {
    if utc.timestamp_subsec_nanos() == 0 {
        utc.format(GPX_TIME_FORMAT).to_string()
    } else {
        utc.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }
}

/// The gpx serialiser pads every time to nanoseconds; rewrite each `<time>` body.
fn normalise_time_elements(xml: &str) -> Result<String, DriftError> {
    const OPEN: &str = "<time>";
    const CLOSE: &str = "</time>";

    let mut out = String::with_capacity(xml.len());
    let mut rest = xml;
    while let Some(start) = rest.find(OPEN) {
        let body = start + OPEN.len();
        let Some(len) = rest[body..].find(CLOSE) else {
            break;
        };
        let raw = rest[body..body + len].trim();
        let utc = DateTime::parse_from_rfc3339(raw)
            .map_err(|e| DriftError::GpxWrite(format!("{}: {}", raw, e)))?
            .with_timezone(&Utc);
        out.push_str(&rest[..body]);
        out.push_str(&format_gpx_time(&utc));
        rest = &rest[body + len..];
    }
    out.push_str(rest);
    Ok(out)
}

fn gpx_time_to_utc(time: &Time) -> Result<DateTime<Utc>, DriftError> {
    let iso = time
        .format()
        .map_err(|e| DriftError::GpxParse(e.to_string()))?;
    let utc = DateTime::parse_from_rfc3339(&iso)
        .map_err(|e| DriftError::GpxParse(format!("{}: {}", iso, e)))?
        .with_timezone(&Utc);
    Ok(utc)
}

fn utc_to_gpx_time(utc: &DateTime<Utc>) -> Result<Time, DriftError> {
    let nanos = utc
        .timestamp_nanos_opt()
        .ok_or_else(|| DriftError::GpxWrite(format!("{} is outside the GPX time range", utc)))?;
    let odt = OffsetDateTime::from_unix_timestamp_nanos(nanos as i128)
        .map_err(|e| DriftError::GpxWrite(e.to_string()))?;
    Ok(Time::from(odt))
}
