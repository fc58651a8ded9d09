//! ==============================================================================
//! merge.rs - one timeline out of both sources
//! ==============================================================================
//!
//! purpose:
//!     concatenates normalized datasets and computes what every chart needs:
//!     - the overall time range, padded on both sides for framing
//!     - per-field maxima and the y-axis ceiling derived from them
//!
//!     rows keep their provenance so shared fields (temperature, humidity,
//!     pm2.5, pm10) can be drawn per source; source-only fields are filtered
//!     to the source that records them.
//!
//! relationships:
//!     - used by: service.rs, chart.rs
//!     - uses: domain.rs
//!
//! ==============================================================================

use crate::domain::{Dataset, Field, Provenance, Reading};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

pub const DEFAULT_AXIS_CEILING: f64 = 10.0;

/// y-axis upper bound for a field whose largest value is `max`.
/// absent, NaN and zero maxima fall back to `default`; anything else
/// rounds up to the next multiple of ten.
pub fn axis_ceiling(max: Option<f64>, default: f64) -> f64 {
    match max {
        // + 0.0 turns the -0.0 from small negative maxima into 0.0
        Some(max) if !max.is_nan() && max != 0.0 => 10.0 * (max / 10.0).ceil() + 0.0,
        _ => default,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug)]
pub struct MergeOptions {
    pub padding: TimeDelta,
    pub default_ceiling: f64,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            padding: TimeDelta::days(1),
            default_ceiling: DEFAULT_AXIS_CEILING,
        }
    }
}

/// one point of a field's series
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub provenance: Provenance,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MergedView {
    /// all rows, each source in storage order, sources one after another
    pub readings: Vec<Reading>,
    /// padded span of all timestamps; None when there are no readings
    pub range: Option<TimeRange>,
    /// largest value per field, only for fields with data
    pub maxima: BTreeMap<Field, f64>,
    /// y-axis ceiling per field
    pub ceilings: BTreeMap<Field, f64>,
    #[serde(skip)]
    pub default_ceiling: f64,
}

impl MergedView {
    /// readings carrying `field`, restricted to the sources that record it,
    /// in chronological order
    pub fn series(&self, field: Field) -> Vec<SeriesPoint> {
        let mut points: Vec<SeriesPoint> = self
            .readings
            .iter()
            .filter_map(|reading| {
                reading.value(field).map(|value| SeriesPoint {
                    timestamp: reading.timestamp,
                    value,
                    provenance: reading.provenance,
                })
            })
            .collect();
        points.sort_by_key(|point| point.timestamp);
        points
    }

    pub fn ceiling(&self, field: Field) -> f64 {
        self.ceilings
            .get(&field)
            .copied()
            .unwrap_or(self.default_ceiling)
    }
}

pub fn merge_with(datasets: &[Dataset], options: &MergeOptions) -> MergedView {
    let readings: Vec<Reading> = datasets
        .iter()
        .flat_map(|dataset| dataset.readings.iter().cloned())
        .collect();

    let range = readings
        .iter()
        .map(|r| r.timestamp)
        .fold(None, |acc: Option<(DateTime<Utc>, DateTime<Utc>)>, ts| match acc {
            None => Some((ts, ts)),
            Some((lo, hi)) => Some((lo.min(ts), hi.max(ts))),
        })
        .map(|(lo, hi)| TimeRange {
            // clamped at the ends of what chrono can represent
            start: lo
                .checked_sub_signed(options.padding)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            end: hi
                .checked_add_signed(options.padding)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        });

    let mut maxima = BTreeMap::new();
    for reading in &readings {
        for field in Field::ALL {
            let Some(value) = reading.value(field) else {
                continue;
            };
            if value.is_nan() {
                continue;
            }
            maxima
                .entry(field)
                .and_modify(|max: &mut f64| *max = max.max(value))
                .or_insert(value);
        }
    }

    let ceilings = Field::ALL
        .iter()
        .map(|&field| {
            let ceiling = axis_ceiling(maxima.get(&field).copied(), options.default_ceiling);
            (field, ceiling)
        })
        .collect();

    MergedView {
        readings,
        range,
        maxima,
        ceilings,
        default_ceiling: options.default_ceiling,
    }
}

pub fn merge(datasets: &[Dataset]) -> MergedView {
    merge_with(datasets, &MergeOptions::default())
}
