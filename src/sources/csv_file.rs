//! CSV file track integration

use std::io::Read;
use std::time::Duration;

use csv::{Reader, StringRecord};
use geo::geometry::Point;
use serde::Deserialize;
use time::format_description::well_known;
use time::OffsetDateTime;

use super::{AcquisitionError, ReplayPoint};

/// Column names of a recorded track
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct CsvFields {
    pub coordinates: String,
    pub time: String,
    pub accuracy: String,
    pub speed: String,
    pub heading: String,
    /// Coordinates written as `lat, lng` instead of `lng, lat`
    pub flip_coordinates: bool,
}

impl Default for CsvFields {
    fn default() -> Self {
        Self {
            coordinates: "coordinates".to_string(),
            time: "time".to_string(),
            accuracy: "accuracy".to_string(),
            speed: "speed".to_string(),
            heading: "heading".to_string(),
            flip_coordinates: false,
        }
    }
}

/// Read a recorded track, ordered by time
///
/// Rows with unusable coordinates are skipped; a missing mandatory
/// column or an unparseable time fails the whole read.
pub fn read_csv_track<T>(
    mut rdr: Reader<T>,
    fields: &CsvFields,
) -> Result<Vec<ReplayPoint>, AcquisitionError>
where
    T: Read,
{
    let mut header = rdr
        .headers()
        .map_err(|e| source_error(format!("Failed on read the header: {}", e)))?
        .clone();
    let header_idx = parse_header(fields, &mut header)?;

    let mut rows = vec![];
    for row in rdr.records() {
        let mut rec = row.map_err(|e| source_error(format!("Failed on read some row: {}", e)))?;

        if rec.len() < 2 {
            continue;
        }

        let parsed = parse_row(&header_idx, fields, &mut rec)
            .map_err(|e| source_error(format!("Error with row {:?}: {}", rec, e)))?;

        if let Some(row) = parsed {
            rows.push(row);
        }
    }

    rows.sort_by_key(|(time, _)| *time);

    let first = match rows.first() {
        Some((time, _)) => *time,
        None => return Ok(vec![]),
    };

    Ok(rows
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

/// Field to index map
#[derive(Debug)]
struct FieldsIndex {
    coordinates: usize,
    time: usize,
    accuracy: Option<usize>,
    speed: Option<usize>,
    heading: Option<usize>,
}

fn parse_header(
    fields: &CsvFields,
    header: &mut StringRecord,
) -> Result<FieldsIndex, AcquisitionError> {
    header.trim();

    let position = |name: &str| header.iter().position(|h| h.to_lowercase() == name);

    let coordinates = position(&fields.coordinates)
        .ok_or_else(|| source_error("Coordinates header not found".to_string()))?;
    let time =
        position(&fields.time).ok_or_else(|| source_error("Time header not found".to_string()))?;

    Ok(FieldsIndex {
        coordinates,
        time,
        accuracy: position(&fields.accuracy),
        speed: position(&fields.speed),
        heading: position(&fields.heading),
    })
}

fn parse_row(
    header: &FieldsIndex,
    fields: &CsvFields,
    row: &mut StringRecord,
) -> Result<Option<(OffsetDateTime, ReplayPoint)>, String> {
    row.trim();

    let raw_coordinates = row
        .get(header.coordinates)
        .ok_or("Coordinates field not found")?;
    let separator = match raw_coordinates {
        s if s.contains(',') => ",",
        s if s.contains(';') => ";",
        _ => " ",
    };
    let scoordinates: Vec<&str> = raw_coordinates.split(separator).map(|s| s.trim()).collect();
    if scoordinates.len() != 2 {
        return Ok(None);
    }

    let (ilat, ilng) = if fields.flip_coordinates { (0, 1) } else { (1, 0) };

    let lat = scoordinates[ilat]
        .parse::<f64>()
        .map_err(|e| format!("Invalid latitude format: {}", e))?;
    let lng = scoordinates[ilng]
        .parse::<f64>()
        .map_err(|e| format!("Invalid longitude format: {}", e))?;

    let time = match row.get(header.time) {
        Some(d) => OffsetDateTime::parse(d, &well_known::Rfc3339)
            .map_err(|e| format!("Failed on parse the time: {}", e)),
        None => Err("Time field not found".to_string()),
    }?;

    let optional = |idx: Option<usize>| {
        idx.and_then(|i| row.get(i))
            .and_then(|d| d.parse::<f64>().ok())
    };

    let mut point = ReplayPoint::basic(Point::new(lng, lat), Duration::ZERO);
    point.accuracy = optional(header.accuracy);
    point.speed = optional(header.speed);
    point.heading = optional(header.heading);

    Ok(Some((time, point)))
}
