//! ==============================================================================
//! service.rs - reading pipeline handle
//! ==============================================================================
//!
//! purpose:
//!     ties the store to the pure parts of the pipeline:
//!
//!         view:    load both -> normalize -> merge
//!         ingest:  parse body -> load automated -> append -> save
//!         append:  load manual -> append entry -> save
//!         replace: save edited grid over manual
//!
//!     every mutation is a whole-table read-modify-write. saves carry the
//!     version the table was loaded at, so a concurrent external writer makes
//!     the save fail with Conflict instead of losing rows. writers inside this
//!     process are queued per table, so they never conflict with each other.
//!
//! relationships:
//!     - used by: http.rs, main.rs
//!     - uses: store.rs, normalize.rs, merge.rs, ingest.rs, editor.rs
//!
//! ==============================================================================

use crate::config::HostConfig;
use crate::editor::{self, EditError, ManualEntry, TableEdit};
use crate::ingest::{self, Dropped, IngestError, Ingestor};
use crate::merge::{self, MergeOptions, MergedView};
use crate::normalize::{NormalizeError, Normalizer};
use crate::store::{DatasetId, ReadingStore, Snapshot, StoreError, Version};

use chrono::{FixedOffset, Offset, TimeDelta, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

/// merged readings plus the rows that could not be read
#[derive(Clone, Debug, Serialize)]
pub struct ReadingView {
    #[serde(flatten)]
    pub merged: MergedView,
    pub rejected: Vec<RejectedRow>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RejectedRow {
    pub dataset: DatasetId,
    #[serde(flatten)]
    pub error: NormalizeError,
}

/// result of an accepted ingestion call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngestReceipt {
    pub appended: usize,
    pub dropped: Vec<Dropped>,
}

/// clone-able handle to the store and pipeline settings
#[derive(Clone)]
pub struct ReadingService {
    store: Arc<dyn ReadingStore>,
    ingestor: Arc<Ingestor>,
    normalizer: Normalizer,
    merge_options: MergeOptions,
    show_readings: bool,
    manual_writes: Arc<Mutex<()>>,
    automated_writes: Arc<Mutex<()>>,
}

impl ReadingService {
    pub fn new(store: Arc<dyn ReadingStore>, config: &HostConfig) -> Self {
        let offset_seconds = config.chart.manual_utc_offset_minutes.saturating_mul(60);
        let manual_offset = FixedOffset::east_opt(offset_seconds).unwrap_or_else(|| {
            tracing::warn!(
                minutes = config.chart.manual_utc_offset_minutes,
                "manual utc offset out of range, using UTC"
            );
            Utc.fix()
        });
        let padding = TimeDelta::try_days(config.chart.padding_days)
            .filter(|padding| *padding >= TimeDelta::zero())
            .unwrap_or_else(|| {
                tracing::warn!(days = config.chart.padding_days, "padding out of range, using 1 day");
                TimeDelta::days(1)
            });

        Self {
            store,
            ingestor: Arc::new(Ingestor::new(config.device.clone())),
            normalizer: Normalizer::with_manual_offset(manual_offset),
            merge_options: MergeOptions {
                padding,
                default_ceiling: config.chart.default_ceiling,
            },
            show_readings: config.logging.show_readings,
            manual_writes: Arc::new(Mutex::new(())),
            automated_writes: Arc::new(Mutex::new(())),
        }
    }

    fn write_lock(&self, dataset: DatasetId) -> &Mutex<()> {
        match dataset {
            DatasetId::Manual => &self.manual_writes,
            DatasetId::Automated => &self.automated_writes,
        }
    }

    /// load both tables and merge them into one timeline
    pub async fn view(&self) -> Result<ReadingView, StoreError> {
        let (manual, automated) = tokio::try_join!(
            self.store.load(DatasetId::Manual),
            self.store.load(DatasetId::Automated),
        )?;

        let mut datasets = Vec::with_capacity(2);
        let mut rejected = Vec::new();
        for (dataset, snapshot) in [(DatasetId::Manual, manual), (DatasetId::Automated, automated)] {
            let normalized = self
                .normalizer
                .normalize(&snapshot.table, dataset.provenance());
            rejected.extend(
                normalized
                    .rejected
                    .into_iter()
                    .map(|error| RejectedRow { dataset, error }),
            );
            datasets.push(normalized.dataset);
        }

        Ok(ReadingView {
            merged: merge::merge_with(&datasets, &self.merge_options),
            rejected,
        })
    }

    /// the manual table as stored, for the edit grid
    pub async fn manual_table(&self) -> Result<Snapshot, StoreError> {
        self.store.load(DatasetId::Manual).await
    }

    /// handle one enviro POST body
    pub async fn ingest(&self, body: &[u8]) -> Result<IngestReceipt, IngestError> {
        let entries = ingest::parse_batch(body)?;

        let _guard = self.write_lock(DatasetId::Automated).lock().await;
        let Snapshot { mut table, version } = self.store.load(DatasetId::Automated).await?;
        let before = table.len();
        let (appended, dropped) = self.ingestor.append(&mut table, &entries);

        if appended > 0 {
            self.store
                .save(DatasetId::Automated, &table, Some(&version))
                .await?;
        }

        if self.show_readings {
            for row in &table.rows[before..] {
                tracing::info!(row = %row.join(","), "enviro reading stored");
            }
        }
        tracing::info!(
            received = entries.len(),
            appended,
            dropped = dropped.len(),
            "enviro batch ingested"
        );
        Ok(IngestReceipt { appended, dropped })
    }

    /// add one row from the submit form
    pub async fn append_manual(&self, entry: &ManualEntry) -> Result<Version, EditError> {
        // reject a bad form before touching the store
        entry.timestamp()?;

        let _guard = self.write_lock(DatasetId::Manual).lock().await;
        let snapshot = self.store.load(DatasetId::Manual).await?;
        let table = editor::append_entry(&snapshot.table, entry)?;
        let version = self
            .store
            .save(DatasetId::Manual, &table, Some(&snapshot.version))
            .await?;
        tracing::info!(rows = table.len(), %version, "manual reading appended");
        Ok(version)
    }

    /// store the edited grid as the whole manual table
    pub async fn replace_manual(&self, edit: &TableEdit) -> Result<Version, EditError> {
        let table = edit.to_table();
        let _guard = self.write_lock(DatasetId::Manual).lock().await;
        let version = self
            .store
            .save(DatasetId::Manual, &table, edit.version.as_ref())
            .await?;
        tracing::info!(rows = table.len(), %version, "manual table replaced");
        Ok(version)
    }
}
