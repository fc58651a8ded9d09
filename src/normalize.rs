//! ==============================================================================
//! normalize.rs - source tables to canonical readings
//! ==============================================================================
//!
//! purpose:
//!     maps each source's column names onto `Field`, parses the cells and
//!     tags every reading with its provenance.
//!
//!     timestamps:
//!     - manual rows hold naive wall-clock values ("2023-01-08 17:32:00"),
//!       interpreted at the configured offset (UTC unless told otherwise)
//!     - device rows hold ISO-8601 instants; a missing offset means UTC
//!
//!     a bad row is skipped and reported; the rest of the table still loads.
//!
//! relationships:
//!     - used by: service.rs (before merge.rs)
//!     - uses: domain.rs, table.rs
//!
//! ==============================================================================

use crate::domain::{Dataset, Field, Measurements, Provenance, Reading};
use crate::table::Table;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};
use serde::Serialize;
use thiserror::Error;

/// row-level defect; `row` is the zero-based data row index
#[derive(Clone, Debug, Error, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizeError {
    #[error("row {row}: unreadable timestamp {value:?}")]
    BadTimestamp { row: usize, value: String },
    #[error("row {row}: {reason}")]
    BadSchema { row: usize, reason: String },
}

/// readings that parsed, plus the rows that did not
#[derive(Clone, Debug, PartialEq)]
pub struct Normalized {
    pub dataset: Dataset,
    pub rejected: Vec<NormalizeError>,
}

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// calendar years a reading may fall in; anything outside is a typo or junk
const YEARS: std::ops::RangeInclusive<i32> = 1..=9999;

fn parse_naive(text: &str) -> Option<NaiveDateTime> {
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
}

fn in_years(instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
    YEARS.contains(&instant.year()).then_some(instant)
}

/// parse a device timestamp; values without an offset are UTC
pub fn parse_automated_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(text) {
        return in_years(instant.with_timezone(&Utc));
    }
    parse_naive(text).and_then(|naive| in_years(naive.and_utc()))
}

/// parse a manual timestamp typed at wall-clock `offset`
pub fn parse_manual_timestamp(text: &str, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(text) {
        return in_years(instant.with_timezone(&Utc));
    }
    let naive = parse_naive(text)?;
    offset
        .from_local_datetime(&naive)
        .single()
        .and_then(|local| in_years(local.with_timezone(&Utc)))
}

/// empty and NaN cells are absent; anything else must be a finite number
fn parse_value(text: &str) -> Result<Option<f64>, ()> {
    let text = text.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    let value: f64 = text.parse().map_err(|_| ())?;
    if value.is_nan() {
        return Ok(None);
    }
    if value.is_infinite() {
        return Err(());
    }
    Ok(Some(value))
}

#[derive(Clone, Copy, Debug)]
pub struct Normalizer {
    manual_offset: FixedOffset,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self {
            manual_offset: Utc.fix(),
        }
    }
}

impl Normalizer {
    pub fn with_manual_offset(manual_offset: FixedOffset) -> Self {
        Self { manual_offset }
    }

    fn parse_timestamp(&self, text: &str, provenance: Provenance) -> Option<DateTime<Utc>> {
        match provenance {
            Provenance::Manual => parse_manual_timestamp(text, self.manual_offset),
            Provenance::Automated => parse_automated_timestamp(text),
        }
    }

    pub fn normalize(&self, table: &Table, provenance: Provenance) -> Normalized {
        let mut readings = Vec::with_capacity(table.len());
        let mut rejected = Vec::new();

        let timestamp_column = table.column_index(provenance.timestamp_column());
        // columns this source knows about that the table actually has
        let field_columns: Vec<(Field, usize)> = Field::ALL
            .iter()
            .filter_map(|&field| {
                let name = field.column(provenance)?;
                table.column_index(name).map(|index| (field, index))
            })
            .collect();

        for (row, cells) in table.rows.iter().enumerate() {
            let Some(timestamp_column) = timestamp_column else {
                rejected.push(NormalizeError::BadSchema {
                    row,
                    reason: format!("no {} column", provenance.timestamp_column()),
                });
                continue;
            };

            let raw_timestamp = &cells[timestamp_column];
            let Some(timestamp) = self.parse_timestamp(raw_timestamp, provenance) else {
                rejected.push(NormalizeError::BadTimestamp {
                    row,
                    value: raw_timestamp.clone(),
                });
                continue;
            };

            let mut values = Measurements::default();
            let mut bad_cell = None;
            for &(field, index) in &field_columns {
                match parse_value(&cells[index]) {
                    Ok(value) => values.set(field, value),
                    Err(()) => {
                        bad_cell = Some(NormalizeError::BadSchema {
                            row,
                            reason: format!("{} is not a number: {:?}", field.label(), cells[index]),
                        });
                        break;
                    }
                }
            }
            if let Some(error) = bad_cell {
                rejected.push(error);
                continue;
            }

            readings.push(Reading {
                timestamp,
                provenance,
                values,
            });
        }

        for error in &rejected {
            tracing::warn!(?provenance, "skipping row: {}", error);
        }

        Normalized {
            dataset: Dataset::new(provenance, readings),
            rejected,
        }
    }
}

/// normalize with manual timestamps taken as UTC
pub fn normalize(table: &Table, provenance: Provenance) -> Normalized {
    Normalizer::default().normalize(table, provenance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn automated_row_maps_to_canonical_fields() {
        let table = Table::parse(
            "timestamp,temperature,humidity,pressure,noise,pm1,pm2_5,pm10\n\
             2024-01-01T00:00:00Z,21,40,1012,30,1,5.5,3\n",
        )
        .unwrap();

        let normalized = normalize(&table, Provenance::Automated);
        assert!(normalized.rejected.is_empty());
        let reading = &normalized.dataset.readings[0];
        assert_eq!(reading.provenance, Provenance::Automated);
        assert_eq!(reading.value(Field::Pm2_5), Some(5.5));
        assert_eq!(reading.value(Field::Pressure), Some(1012.0));
        assert_eq!(
            reading.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn manual_timestamps_are_naive_wall_clock() {
        let table = Table::parse(
            "Timestamp,Temperature,Humidity\n2023-01-08 17:32:00,12,80\n2023-01-09T09:05,,\n",
        )
        .unwrap();

        let normalized = normalize(&table, Provenance::Manual);
        assert!(normalized.rejected.is_empty());
        let readings = &normalized.dataset.readings;
        assert_eq!(
            readings[0].timestamp,
            Utc.with_ymd_and_hms(2023, 1, 8, 17, 32, 0).unwrap()
        );
        assert_eq!(readings[1].value(Field::Temperature), None);
        assert_eq!(readings[1].provenance, Provenance::Manual);
    }

    #[test]
    fn manual_offset_shifts_to_utc() {
        let table = Table::parse("Timestamp,Temperature\n2023-06-01 12:00:00,20\n").unwrap();
        let bst = FixedOffset::east_opt(3600).unwrap();
        let normalized = Normalizer::with_manual_offset(bst).normalize(&table, Provenance::Manual);
        assert_eq!(
            normalized.dataset.readings[0].timestamp,
            Utc.with_ymd_and_hms(2023, 6, 1, 11, 0, 0).unwrap()
        );
    }

    #[test]
    fn zero_is_kept_and_nan_is_absent() {
        let table = Table::parse("Timestamp,AQI,TVOC\n2023-01-08 17:32:00,0,NaN\n").unwrap();
        let reading = &normalize(&table, Provenance::Manual).dataset.readings[0];
        assert_eq!(reading.value(Field::Aqi), Some(0.0));
        assert_eq!(reading.value(Field::Tvoc), None);
    }

    #[test]
    fn early_manual_revision_without_aqi_or_tvoc_loads() {
        let table = Table::parse("Timestamp,Temperature,Humidity,PM2.5,PM10\n2022-11-01 10:00:00,9,70,4,8\n")
            .unwrap();
        let normalized = normalize(&table, Provenance::Manual);
        let reading = &normalized.dataset.readings[0];
        assert_eq!(reading.value(Field::Aqi), None);
        assert_eq!(reading.value(Field::Pm10), Some(8.0));
    }

    #[test]
    fn bad_rows_are_isolated() {
        let table = Table::parse(
            "timestamp,temperature\n\
             2024-01-01T00:00:00Z,21\n\
             yesterday,22\n\
             2024-01-01T01:00:00Z,warm\n\
             2024-01-01T02:00:00Z,23\n",
        )
        .unwrap();

        let normalized = normalize(&table, Provenance::Automated);
        assert_eq!(normalized.dataset.readings.len(), 2);
        assert_eq!(
            normalized.rejected[0],
            NormalizeError::BadTimestamp {
                row: 1,
                value: "yesterday".to_string()
            }
        );
        assert!(matches!(normalized.rejected[1], NormalizeError::BadSchema { row: 2, .. }));
    }

    #[test]
    fn infinite_cells_are_rejected() {
        let table = Table::parse(
            "timestamp,pm10\n\
             2024-01-01T00:00:00Z,inf\n\
             2024-01-01T01:00:00Z,-Infinity\n\
             2024-01-01T02:00:00Z,7\n",
        )
        .unwrap();
        let normalized = normalize(&table, Provenance::Automated);
        assert_eq!(normalized.dataset.readings.len(), 1);
        assert_eq!(normalized.dataset.readings[0].value(Field::Pm10), Some(7.0));
        assert!(matches!(normalized.rejected[0], NormalizeError::BadSchema { row: 0, .. }));
        assert!(matches!(normalized.rejected[1], NormalizeError::BadSchema { row: 1, .. }));
    }

    #[test]
    fn timestamps_outside_the_calendar_are_rejected() {
        assert_eq!(parse_automated_timestamp("+262142-12-31T12:00:00"), None);
        assert_eq!(parse_automated_timestamp("+10000-01-01T00:00:00Z"), None);
        assert!(parse_automated_timestamp("9999-12-31T23:59:59Z").is_some());

        let table = Table::parse("Timestamp,Temperature\n+262142-12-31 12:00:00,4\n").unwrap();
        let normalized = normalize(&table, Provenance::Manual);
        assert!(normalized.dataset.readings.is_empty());
        assert!(matches!(normalized.rejected[0], NormalizeError::BadTimestamp { row: 0, .. }));
    }

    #[test]
    fn missing_timestamp_column_rejects_every_row() {
        let table = Table::parse("temperature\n21\n22\n").unwrap();
        let normalized = normalize(&table, Provenance::Automated);
        assert!(normalized.dataset.readings.is_empty());
        assert_eq!(normalized.rejected.len(), 2);
    }

    #[test]
    fn automated_timestamp_without_offset_is_utc() {
        assert_eq!(
            parse_automated_timestamp("2023-01-24 12:30:00"),
            Some(Utc.with_ymd_and_hms(2023, 1, 24, 12, 30, 0).unwrap())
        );
        assert_eq!(
            parse_automated_timestamp("2023-01-24T12:30:00+01:00"),
            Some(Utc.with_ymd_and_hms(2023, 1, 24, 11, 30, 0).unwrap())
        );
        assert_eq!(parse_automated_timestamp("not a time"), None);
    }
}
