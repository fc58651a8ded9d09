//! ==============================================================================
//! domain.rs - canonical reading model
//! ==============================================================================
//!
//! purpose:
//!     one reading shape for both sources. the manual table and the enviro
//!     device table name their columns differently and carry different field
//!     sets; everything downstream of the normalizer only sees these types.
//!
//! relationships:
//!     - produced by: normalize.rs
//!     - consumed by: merge.rs, chart.rs
//!     - column names used by: ingest.rs, editor.rs (when building store rows)
//!
//! ==============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// which table a reading came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// typed in by a person through the editor
    Manual,
    /// posted by the enviro device
    Automated,
}

impl Provenance {
    /// header name of the timestamp column in this source's table
    pub fn timestamp_column(self) -> &'static str {
        match self {
            Provenance::Manual => "Timestamp",
            Provenance::Automated => "timestamp",
        }
    }

    /// full column set written by this source, in storage order
    pub fn columns(self) -> Vec<&'static str> {
        let mut columns = vec![self.timestamp_column()];
        columns.extend(
            Field::ALL
                .iter()
                .filter_map(|field| field.column(self)),
        );
        columns
    }
}

/// a measured quantity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Field {
    Temperature,
    Humidity,
    Pressure,
    Noise,
    #[serde(rename = "AQI")]
    Aqi,
    #[serde(rename = "PM1")]
    Pm1,
    #[serde(rename = "PM2.5")]
    Pm2_5,
    #[serde(rename = "PM10")]
    Pm10,
    #[serde(rename = "TVOC")]
    Tvoc,
}

impl Field {
    pub const ALL: [Field; 9] = [
        Field::Temperature,
        Field::Humidity,
        Field::Pressure,
        Field::Noise,
        Field::Aqi,
        Field::Pm1,
        Field::Pm2_5,
        Field::Pm10,
        Field::Tvoc,
    ];

    /// canonical display name
    pub fn label(self) -> &'static str {
        match self {
            Field::Temperature => "Temperature",
            Field::Humidity => "Humidity",
            Field::Pressure => "Pressure",
            Field::Noise => "Noise",
            Field::Aqi => "AQI",
            Field::Pm1 => "PM1",
            Field::Pm2_5 => "PM2.5",
            Field::Pm10 => "PM10",
            Field::Tvoc => "TVOC",
        }
    }

    /// the column this field is stored under in a source's table,
    /// or None when that source never records it
    pub fn column(self, source: Provenance) -> Option<&'static str> {
        match source {
            Provenance::Manual => match self {
                Field::Temperature => Some("Temperature"),
                Field::Humidity => Some("Humidity"),
                Field::Aqi => Some("AQI"),
                Field::Pm2_5 => Some("PM2.5"),
                Field::Pm10 => Some("PM10"),
                Field::Tvoc => Some("TVOC"),
                Field::Pressure | Field::Noise | Field::Pm1 => None,
            },
            Provenance::Automated => match self {
                Field::Temperature => Some("temperature"),
                Field::Humidity => Some("humidity"),
                Field::Pressure => Some("pressure"),
                Field::Noise => Some("noise"),
                Field::Pm1 => Some("pm1"),
                Field::Pm2_5 => Some("pm2_5"),
                Field::Pm10 => Some("pm10"),
                Field::Aqi | Field::Tvoc => None,
            },
        }
    }

    /// true when readings of this provenance may carry the field
    pub fn recorded_by(self, source: Provenance) -> bool {
        self.column(source).is_some()
    }
}

/// optional measurement values.
/// None means the field was not recorded; Some(0.0) is a real zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurements {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noise: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aqi: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pm1: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pm2_5: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pm10: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tvoc: Option<f64>,
}

impl Measurements {
    pub fn get(&self, field: Field) -> Option<f64> {
        match field {
            Field::Temperature => self.temperature,
            Field::Humidity => self.humidity,
            Field::Pressure => self.pressure,
            Field::Noise => self.noise,
            Field::Aqi => self.aqi,
            Field::Pm1 => self.pm1,
            Field::Pm2_5 => self.pm2_5,
            Field::Pm10 => self.pm10,
            Field::Tvoc => self.tvoc,
        }
    }

    pub fn set(&mut self, field: Field, value: Option<f64>) {
        let slot = match field {
            Field::Temperature => &mut self.temperature,
            Field::Humidity => &mut self.humidity,
            Field::Pressure => &mut self.pressure,
            Field::Noise => &mut self.noise,
            Field::Aqi => &mut self.aqi,
            Field::Pm1 => &mut self.pm1,
            Field::Pm2_5 => &mut self.pm2_5,
            Field::Pm10 => &mut self.pm10,
            Field::Tvoc => &mut self.tvoc,
        };
        *slot = value;
    }
}

/// a reading after normalization
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub provenance: Provenance,
    #[serde(flatten)]
    pub values: Measurements,
}

impl Reading {
    /// value of `field`, or None when absent or not recorded by this source
    pub fn value(&self, field: Field) -> Option<f64> {
        if !field.recorded_by(self.provenance) {
            return None;
        }
        self.values.get(field)
    }
}

/// normalized readings of one provenance, in storage order
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Dataset {
    pub provenance: Provenance,
    pub readings: Vec<Reading>,
}

impl Dataset {
    pub fn new(provenance: Provenance, readings: Vec<Reading>) -> Self {
        Self { provenance, readings }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_fields_exist_in_both_sources() {
        for field in [Field::Temperature, Field::Humidity, Field::Pm2_5, Field::Pm10] {
            assert!(field.recorded_by(Provenance::Manual), "{field:?}");
            assert!(field.recorded_by(Provenance::Automated), "{field:?}");
        }
        for field in [Field::Pressure, Field::Noise, Field::Pm1] {
            assert!(!field.recorded_by(Provenance::Manual), "{field:?}");
        }
        for field in [Field::Aqi, Field::Tvoc] {
            assert!(!field.recorded_by(Provenance::Automated), "{field:?}");
        }
    }

    #[test]
    fn source_columns_match_store_headers() {
        assert_eq!(
            Provenance::Manual.columns(),
            vec!["Timestamp", "Temperature", "Humidity", "AQI", "PM2.5", "PM10", "TVOC"]
        );
        assert_eq!(
            Provenance::Automated.columns(),
            vec!["timestamp", "temperature", "humidity", "pressure", "noise", "pm1", "pm2_5", "pm10"]
        );
    }

    #[test]
    fn value_ignores_fields_foreign_to_the_source() {
        let mut values = Measurements::default();
        values.set(Field::Aqi, Some(12.0));
        values.set(Field::Temperature, Some(0.0));
        let reading = Reading {
            timestamp: Utc::now(),
            provenance: Provenance::Automated,
            values,
        };
        assert_eq!(reading.value(Field::Aqi), None);
        assert_eq!(reading.value(Field::Temperature), Some(0.0));
    }
}
