//! ==============================================================================
//! editor.rs - manual reading edits
//! ==============================================================================
//!
//! purpose:
//!     the two things a person can do to the manual table:
//!     - append: one new row from the submit form (date + time + values)
//!     - replace: the whole edited grid, stored verbatim
//!
//!     both are pure table transforms here; service.rs does the load/save.
//!     numeric ranges are not checked, the form's min/max are only hints.
//!
//! relationships:
//!     - used by: service.rs, http.rs (request types)
//!     - uses: table.rs, domain.rs (manual column names)
//!
//! ==============================================================================

use crate::domain::{Field, Provenance};
use crate::store::{StoreError, Version};
use crate::table::Table;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// format manual timestamps are written in
pub const MANUAL_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum EditError {
    #[error("unreadable date {0:?} (expected YYYY-MM-DD)")]
    BadDate(String),
    #[error("unreadable time {0:?} (expected HH:MM)")]
    BadTime(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// the submit form
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManualEntry {
    pub date: String,
    pub time: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub aqi: Option<f64>,
    #[serde(default)]
    pub pm2_5: Option<f64>,
    #[serde(default)]
    pub pm10: Option<f64>,
    #[serde(default)]
    pub tvoc: Option<f64>,
}

impl ManualEntry {
    fn value(&self, field: Field) -> Option<f64> {
        match field {
            Field::Temperature => self.temperature,
            Field::Humidity => self.humidity,
            Field::Aqi => self.aqi,
            Field::Pm2_5 => self.pm2_5,
            Field::Pm10 => self.pm10,
            Field::Tvoc => self.tvoc,
            Field::Pressure | Field::Noise | Field::Pm1 => None,
        }
    }

    /// date and time of day combined into one wall-clock timestamp
    pub fn timestamp(&self) -> Result<NaiveDateTime, EditError> {
        let date = NaiveDate::parse_from_str(self.date.trim(), "%Y-%m-%d")
            .map_err(|_| EditError::BadDate(self.date.clone()))?;
        let time = ["%H:%M:%S%.f", "%H:%M"]
            .iter()
            .find_map(|format| NaiveTime::parse_from_str(self.time.trim(), format).ok())
            .ok_or_else(|| EditError::BadTime(self.time.clone()))?;
        Ok(date.and_time(time))
    }
}

/// `table` with `entry` added as its last row. existing rows are untouched.
pub fn append_entry(table: &Table, entry: &ManualEntry) -> Result<Table, EditError> {
    let timestamp = entry.timestamp()?;
    let source = Provenance::Manual;

    let mut table = if table.columns.is_empty() {
        Table::with_columns(source.columns())
    } else {
        table.clone()
    };

    let mut row = vec![(
        source.timestamp_column(),
        timestamp.format(MANUAL_TIMESTAMP_FORMAT).to_string(),
    )];
    for field in Field::ALL {
        let Some(column) = field.column(source) else {
            continue;
        };
        let cell = entry.value(field).map(|v| v.to_string()).unwrap_or_default();
        // an older table without this column only grows it when there is a value
        if cell.is_empty() && table.column_index(column).is_none() {
            continue;
        }
        row.push((column, cell));
    }
    table.push_record(row);
    Ok(table)
}

/// the edit grid as submitted: column order plus one object per row
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableEdit {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<serde_json::Map<String, Value>>,
    /// version the grid was loaded at; without it the save is unconditional
    #[serde(default)]
    pub version: Option<Version>,
}

fn grid_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl TableEdit {
    /// the grid as a table, cells verbatim. keys not listed in `columns`
    /// become extra columns in first-seen order.
    pub fn to_table(&self) -> Table {
        let mut table = Table::with_columns(self.columns.iter().cloned());
        for row in &self.rows {
            for key in row.keys() {
                table.ensure_column(key);
            }
        }
        for row in &self.rows {
            table.push_record(row.iter().map(|(key, value)| (key.as_str(), grid_cell(value))));
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MANUAL: &str = "Timestamp,Temperature,Humidity,AQI,PM2.5,PM10,TVOC\n\
                          2023-01-08 17:32:00,12,80,20,4.1,9,0.12\n\
                          2023-01-09 09:05:00,7,91,,,,\n";

    fn entry() -> ManualEntry {
        ManualEntry {
            date: "2023-02-01".to_string(),
            time: "14:30".to_string(),
            temperature: Some(11.0),
            humidity: None,
            aqi: Some(35.0),
            pm2_5: Some(5.5),
            pm10: None,
            tvoc: Some(0.05),
        }
    }

    #[test]
    fn append_adds_one_row_and_keeps_the_rest() {
        let table = Table::parse(MANUAL).unwrap();
        let appended = append_entry(&table, &entry()).unwrap();

        assert_eq!(appended.len(), table.len() + 1);
        assert_eq!(&appended.rows[..table.len()], &table.rows[..]);
        assert!(appended.render().starts_with(MANUAL));
        assert_eq!(
            appended.rows[2],
            vec!["2023-02-01 14:30:00", "11", "", "35", "5.5", "", "0.05"]
        );
    }

    #[test]
    fn append_to_empty_table_writes_the_manual_header() {
        let appended = append_entry(&Table::default(), &entry()).unwrap();
        assert_eq!(appended.columns, Provenance::Manual.columns());
        assert_eq!(appended.len(), 1);
    }

    #[test]
    fn append_to_early_revision_adds_only_columns_with_values() {
        let table = Table::parse("Timestamp,Temperature,Humidity,PM2.5,PM10\n").unwrap();
        let mut no_tvoc = entry();
        no_tvoc.tvoc = None;
        let appended = append_entry(&table, &no_tvoc).unwrap();
        assert_eq!(
            appended.columns,
            vec!["Timestamp", "Temperature", "Humidity", "PM2.5", "PM10", "AQI"]
        );
    }

    #[test]
    fn date_and_time_combine() {
        let mut e = entry();
        e.time = "07:05:09".to_string();
        assert_eq!(
            e.timestamp().unwrap().format(MANUAL_TIMESTAMP_FORMAT).to_string(),
            "2023-02-01 07:05:09"
        );
    }

    #[test]
    fn bad_date_or_time_is_rejected() {
        let mut e = entry();
        e.date = "01/02/2023".to_string();
        assert!(matches!(append_entry(&Table::default(), &e), Err(EditError::BadDate(_))));

        let mut e = entry();
        e.time = "half two".to_string();
        assert!(matches!(append_entry(&Table::default(), &e), Err(EditError::BadTime(_))));
    }

    #[test]
    fn grid_becomes_table_verbatim() {
        let edit: TableEdit = serde_json::from_value(json!({
            "columns": ["Timestamp", "Temperature", "AQI"],
            "rows": [
                {"Timestamp": "2023-01-08 17:32:00", "Temperature": 12, "AQI": null},
                {"Timestamp": "2023-01-10 10:00:00", "Temperature": "13.5", "AQI": 40, "Note": "rain"}
            ]
        }))
        .unwrap();

        let table = edit.to_table();
        assert_eq!(table.columns, vec!["Timestamp", "Temperature", "AQI", "Note"]);
        assert_eq!(table.rows[0], vec!["2023-01-08 17:32:00", "12", "", ""]);
        assert_eq!(table.rows[1], vec!["2023-01-10 10:00:00", "13.5", "40", "rain"]);
        assert!(edit.version.is_none());
    }

    #[test]
    fn grid_without_columns_keeps_key_order() {
        let edit: TableEdit = serde_json::from_value(json!({
            "rows": [
                {"Timestamp": "2023-01-08 17:32:00", "Temperature": 12, "AQI": 20},
                {"Timestamp": "2023-01-09 09:00:00", "Note": "frost", "Humidity": 90}
            ]
        }))
        .unwrap();

        let table = edit.to_table();
        assert_eq!(
            table.columns,
            vec!["Timestamp", "Temperature", "AQI", "Note", "Humidity"]
        );
        assert_eq!(table.rows[1], vec!["2023-01-09 09:00:00", "", "", "frost", "90"]);
    }
}
