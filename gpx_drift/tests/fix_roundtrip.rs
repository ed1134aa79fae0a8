//! End-to-end drift correction on an in-memory GPX document: parse, analyse,
//! fix, serialise and parse the result again.

use chrono::{DateTime, Duration, TimeZone, Utc};
use gpx_drift::{count_steps, GpxTrack, Params, TimestampSource, TrackHandler, GPX_TIME_FORMAT};

fn origin() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
}

/// A 1 Hz track whose logger clock loses one second every 40 samples.
fn drifting_gpx(points: i64) -> String {
    let mut doc = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="gpx-drift-tests" xmlns="http://www.topografix.com/GPX/1/1">
  <trk>
    <name>drift</name>
    <trkseg>
"#,
    );
    for i in 0..points {
        let time = origin() + Duration::seconds(i + i / 40);
        doc.push_str(&format!(
            "      <trkpt lat=\"{:.5}\" lon=\"{:.5}\"><ele>{:.1}</ele><time>{}</time></trkpt>\n",
            46.5 + i as f64 * 1e-5,
            7.5 + i as f64 * 1e-5,
            1200.0 + (i % 7) as f64,
            time.format(GPX_TIME_FORMAT)
        ));
    }
    doc.push_str("    </trkseg>\n  </trk>\n</gpx>\n");
    doc
}

fn params() -> Params {
    Params {
        window: 10,
        ..Params::default()
    }
}

#[test]
fn corrected_track_survives_serialisation() {
    let input = drifting_gpx(130);
    let track = GpxTrack::from_bytes(input.as_bytes()).unwrap();
    let original = track.timestamps().unwrap();
    let mut handler = TrackHandler::new(track, params()).unwrap();

    let errors = handler.errors().unwrap().to_vec();
    assert_eq!(errors.len(), 130);
    assert_eq!(errors[39], 0.0);
    assert_eq!(errors[40], 1.0);
    assert_eq!(errors[129], 3.0);

    let gated = handler.gated_errors().unwrap().to_vec();
    assert_eq!(count_steps(&gated), 3);

    let report = handler.fix().unwrap();
    assert!(report.applied());
    assert_eq!(report.points, 130);
    assert_eq!(report.seed, Some(0.0));
    assert!(report.adjusted > 0);

    let mut out = Vec::new();
    handler.save(&mut out).unwrap();
    let reparsed = GpxTrack::from_bytes(&out).unwrap();
    let fixed = reparsed.timestamps().unwrap();

    assert_eq!(fixed, handler.track().timestamps().unwrap());
    assert_eq!(fixed.len(), original.len());
    assert_eq!(fixed[0], original[0]);
    assert_eq!(fixed[129], original[129]);
    assert!(fixed.windows(2).all(|w| w[1] > w[0]));

    let text = String::from_utf8(out).unwrap();
    let expected = format!("<time>{}</time>", fixed[64].format(GPX_TIME_FORMAT));
    assert!(text.contains(&expected));
    assert!(!text.contains(".000000000Z"));
    assert_eq!(text.matches("<time>").count(), 130);
}

#[test]
fn short_track_is_written_back_unchanged() {
    let input = drifting_gpx(8);
    let track = GpxTrack::from_bytes(input.as_bytes()).unwrap();
    let original = track.timestamps().unwrap();
    let mut handler = TrackHandler::new(track, params()).unwrap();

    let report = handler.fix().unwrap();
    assert!(!report.applied());

    let mut out = Vec::new();
    handler.save(&mut out).unwrap();
    let reparsed = GpxTrack::from_bytes(&out).unwrap();
    assert_eq!(reparsed.timestamps().unwrap(), original);
}

#[test]
fn second_fix_recomputes_from_corrected_times() {
    let input = drifting_gpx(130);
    let track = GpxTrack::from_bytes(input.as_bytes()).unwrap();
    let mut handler = TrackHandler::new(track, params()).unwrap();

    handler.fix().unwrap();
    let residual = handler.errors().unwrap().to_vec();
    let corrected = handler.track().timestamps().unwrap();
    let origin = corrected[0];
    for (i, (err, ts)) in residual.iter().zip(&corrected).enumerate() {
        let elapsed = (*ts - origin).num_milliseconds() as f64 / 1000.0;
        assert_eq!(*err, elapsed - i as f64);
    }

    let second = handler.fix().unwrap();
    assert!(second.applied());
}
