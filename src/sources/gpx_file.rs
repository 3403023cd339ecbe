//! GPX track integration

use std::io::Read;
use std::time::Duration;

use time::format_description::well_known;
use time::OffsetDateTime;

use super::{AcquisitionError, ReplayPoint};

/// Horizontal accuracy assumed per unit of HDOP, in meters
const HDOP_METERS: f64 = 5.0;

/// Read every timed waypoint of every track, ordered by time
///
/// Waypoints without a time are dropped: a replay needs the recorded pace.
pub fn read_gpx_track<R: Read>(reader: R) -> Result<Vec<ReplayPoint>, AcquisitionError> {
    let doc =
        gpx::read(reader).map_err(|e| source_error(format!("Failed on parse the GPX: {}", e)))?;

    let mut timed: Vec<(OffsetDateTime, ReplayPoint)> = vec![];
    let waypoints = doc
        .tracks
        .iter()
        .flat_map(|track| track.segments.iter())
        .flat_map(|segment| segment.points.iter());

    for wp in waypoints {
        let Some(time) = &wp.time else {
            continue;
        };

        let mut point = ReplayPoint::basic(wp.point(), Duration::ZERO);
        point.accuracy = wp.hdop.map(|hdop| hdop * HDOP_METERS);
        point.speed = wp.speed;

        // the gpx crate only hands its timestamps out as RFC3339 text
        let text = time
            .format()
            .map_err(|e| source_error(format!("Failed on format the GPX time: {}", e)))?;
        let time = OffsetDateTime::parse(&text, &well_known::Rfc3339)
            .map_err(|e| source_error(format!("Failed on parse the GPX time: {}", e)))?;

        timed.push((time, point));
    }

    timed.sort_by_key(|(time, _)| *time);

    let first = match timed.first() {
        Some((time, _)) => *time,
        None => return Ok(vec![]),
    };

    Ok(timed
        .into_iter()
        .map(|(time, mut point)| {
            point.offset = Duration::try_from(time - first).unwrap_or_default();
            point
        })
        .collect())
}

fn source_error(msg: String) -> AcquisitionError {
    AcquisitionError::Source(msg)
}
