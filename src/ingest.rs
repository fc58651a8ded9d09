//! ==============================================================================
//! ingest.rs - enviro device posts
//! ==============================================================================
//!
//! purpose:
//!     turns an untrusted POST body into rows for the automated table.
//!
//!     flow:
//!         Received -> Validated -> Appended -> Acknowledged
//!         Received -> Rejected
//!
//!     - the body is one reading object or a list of them
//!     - entries from another device (nickname, and uid when configured)
//!       are dropped with a warning; the rest of the batch still lands
//!     - entries whose timestamp or values cannot be read are dropped the
//!       same way, so they never reach the stored table
//!
//! relationships:
//!     - used by: service.rs (which does the load/append/save)
//!     - uses: table.rs, domain.rs (automated column names)
//!
//! ==============================================================================

use crate::config::DeviceConfig;
use crate::domain::{Field, Provenance};
use crate::normalize::parse_automated_timestamp;
use crate::store::StoreError;
use crate::table::Table;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// the seven values the device reports, in store column order
const DEVICE_FIELDS: [Field; 7] = [
    Field::Temperature,
    Field::Humidity,
    Field::Pressure,
    Field::Noise,
    Field::Pm1,
    Field::Pm2_5,
    Field::Pm10,
];

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("empty body")]
    Empty,
    #[error("unparsable body: {0}")]
    Unparsable(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// one reading object as posted by the device
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceEntry {
    pub nickname: String,
    pub timestamp: String,
    #[serde(default)]
    pub readings: serde_json::Map<String, Value>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub uid: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Batch {
    Many(Vec<DeviceEntry>),
    One(DeviceEntry),
}

/// parse a POST body into candidate entries
pub fn parse_batch(body: &[u8]) -> Result<Vec<DeviceEntry>, IngestError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(IngestError::Empty);
    }
    let batch = match serde_json::from_slice::<Batch>(body) {
        Ok(batch) => batch,
        // untagged errors say nothing useful; reparse for a real message
        Err(_) => {
            let value: Value = serde_json::from_slice(body)?;
            serde_json::from_value::<Batch>(value.clone())
                .or_else(|_| serde_json::from_value::<DeviceEntry>(value).map(Batch::One))?
        }
    };
    Ok(match batch {
        Batch::Many(entries) => entries,
        Batch::One(entry) => vec![entry],
    })
}

/// why an entry did not make it into the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dropped {
    /// posted by a device other than ours
    ForeignDevice { nickname: String },
    /// the timestamp cannot be read as an instant
    BadTimestamp { value: String },
    /// a reading value is neither a number nor a numeric string
    BadValue { field: &'static str, value: String },
}

/// store cell for one posted value: numbers as written, finite numeric
/// strings trimmed, null or missing as empty
fn cell(value: Option<&Value>) -> Result<String, String> {
    match value {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() || s.parse::<f64>().is_ok_and(f64::is_finite) {
                Ok(s.to_string())
            } else {
                Err(s.to_string())
            }
        }
        Some(other) => Err(other.to_string()),
    }
}

/// checks entries against the configured device and shapes accepted ones
/// into automated-table rows
pub struct Ingestor {
    device: DeviceConfig,
}

impl Ingestor {
    pub fn new(device: DeviceConfig) -> Self {
        Self { device }
    }

    fn is_our_device(&self, entry: &DeviceEntry) -> bool {
        if entry.nickname != self.device.nickname {
            return false;
        }
        match &self.device.uid {
            Some(uid) => entry.uid.as_deref() == Some(uid.as_str()),
            None => true,
        }
    }

    /// (column, cell) pairs for an accepted entry
    pub fn row(&self, entry: &DeviceEntry) -> Result<Vec<(&'static str, String)>, Dropped> {
        if !self.is_our_device(entry) {
            return Err(Dropped::ForeignDevice {
                nickname: entry.nickname.clone(),
            });
        }
        if parse_automated_timestamp(&entry.timestamp).is_none() {
            return Err(Dropped::BadTimestamp {
                value: entry.timestamp.clone(),
            });
        }

        let source = Provenance::Automated;
        let mut row = vec![(source.timestamp_column(), entry.timestamp.trim().to_string())];
        for field in DEVICE_FIELDS {
            let Some(column) = field.column(source) else {
                continue;
            };
            let value = cell(entry.readings.get(column)).map_err(|value| Dropped::BadValue {
                field: column,
                value,
            })?;
            row.push((column, value));
        }
        Ok(row)
    }

    /// append every accepted entry to `table` in arrival order.
    /// returns the number appended and what was dropped.
    pub fn append(&self, table: &mut Table, entries: &[DeviceEntry]) -> (usize, Vec<Dropped>) {
        if table.columns.is_empty() {
            *table = Table::with_columns(Provenance::Automated.columns());
        }
        let mut appended = 0;
        let mut dropped = Vec::new();
        for entry in entries {
            match self.row(entry) {
                Ok(row) => {
                    table.push_record(row);
                    appended += 1;
                }
                Err(reason) => {
                    tracing::warn!(nickname = %entry.nickname, ?reason, "dropping enviro entry");
                    dropped.push(reason);
                }
            }
        }
        (appended, dropped)
    }
}
