//! garden reading hub: manual and enviro-device readings, stored as two csv
//! tables, merged into one timeline for the charts.

pub mod chart;
pub mod config;
pub mod domain;
pub mod editor;
pub mod http;
pub mod ingest;
pub mod merge;
pub mod normalize;
pub mod service;
pub mod store;
pub mod table;

pub use config::HostConfig;
pub use http::build_router;
pub use service::ReadingService;
pub use store::{DatasetId, GistStore, MemoryStore, ReadingStore, StoreError};
