//! ==============================================================================
//! chart.rs - per-field chart framing
//! ==============================================================================
//!
//! purpose:
//!     turns a merged view into one tidy chart spec per field: title, colour,
//!     y-range and the chronologically ordered points. drawing is left to the
//!     renderer on the page.
//!
//!     temperature, humidity and tvoc have fixed physical ranges; every other
//!     field scales to the merged ceiling.
//!
//! relationships:
//!     - used by: http.rs (/api/charts and the summary page)
//!     - uses: merge.rs
//!
//! ==============================================================================

use crate::domain::Field;
use crate::merge::{MergedView, SeriesPoint, TimeRange};

use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChartSpec {
    pub field: Field,
    pub title: String,
    pub color: &'static str,
    pub x_range: Option<TimeRange>,
    pub y_range: [f64; 2],
    pub points: Vec<SeriesPoint>,
}

/// unit shown in the chart title
fn unit(field: Field) -> Option<&'static str> {
    match field {
        Field::Temperature => Some("C"),
        Field::Humidity => Some("%"),
        Field::Pressure => Some("hPa"),
        Field::Noise => Some("dB"),
        Field::Pm1 | Field::Pm2_5 | Field::Pm10 => Some("ug/m3"),
        Field::Tvoc => Some("mg/m3"),
        Field::Aqi => None,
    }
}

fn color(field: Field) -> &'static str {
    match field {
        Field::Temperature => "red",
        Field::Humidity => "blue",
        Field::Pressure => "purple",
        Field::Noise => "green",
        Field::Aqi => "orange",
        Field::Pm1 => "gray",
        Field::Pm2_5 => "darkgray",
        Field::Pm10 => "darkslategray",
        Field::Tvoc => "black",
    }
}

fn fixed_ceiling(field: Field) -> Option<f64> {
    match field {
        Field::Temperature => Some(50.0),
        Field::Humidity => Some(100.0),
        Field::Tvoc => Some(5.0),
        _ => None,
    }
}

pub fn chart_for(view: &MergedView, field: Field) -> ChartSpec {
    let title = match unit(field) {
        Some(unit) => format!("{} ({})", field.label(), unit),
        None => field.label().to_string(),
    };
    let ceiling = fixed_ceiling(field).unwrap_or_else(|| view.ceiling(field));
    ChartSpec {
        field,
        title,
        color: color(field),
        x_range: view.range,
        y_range: [0.0, ceiling],
        points: view.series(field),
    }
}

/// one chart per field, in display order
pub fn charts(view: &MergedView) -> Vec<ChartSpec> {
    Field::ALL.iter().map(|&field| chart_for(view, field)).collect()
}
