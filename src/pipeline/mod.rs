//! # Vitals monitoring pipeline
//!
//! In-process core of the monitor: samples arrive from producers, are kept
//! in bounded per-subject buffers, bucketed into minute records, checked
//! against clinical thresholds and turned into notifications.
//!
//! ## Data flow
//!
//! ```text
//! producers ─ mpsc ─→ ingestion ─→ VitalsEngine::process_sample()
//!                        │              │
//!                        │              └─→ NotificationDispatcher ─→ sinks
//!                        │                   (email, cloud upload, audible)
//!                        └─ flush tick ─→ VitalsDbWriter (SQLite)
//!                                     └─→ DailyDigestAccumulator
//! ```
//!
//! ## Module Organization
//!
//! - `types` - Samples, signal types, severities, records and events
//! - `buffer` - Bounded per-subject sample history
//! - `windows` - Per-subject one-minute aggregation
//! - `thresholds` - Runtime-adjustable threshold table
//! - `cooldown` - Duplicate alert suppression
//! - `sinks` / `audible` - Delivery targets
//! - `dispatcher` - Rate-limited bounded notification queue
//! - `digest` - Daily abnormal-minute summaries
//! - `engine` - Per-sample orchestration
//! - `ingestion` - Channel loop with periodic persistence
//! - `db` - SQLite writer and schema migrations (`/sql/`)
//! - `config` - Environment configuration
//! - `simulator` - Random-walk stand-in for a bedside device

pub mod types;
pub mod buffer;
pub mod windows;
pub mod thresholds;
pub mod cooldown;
pub mod sinks;
pub mod audible;
pub mod dispatcher;
pub mod digest;
pub mod engine;
pub mod ingestion;
pub mod db;
pub mod config;
pub mod simulator;

// Re-export commonly used types
pub use types::{AbnormalEvent, MinuteRecord, Severity, SignalMap, SignalType, UnknownSignal, VitalSample, Vitals};
pub use buffer::BoundedSeriesBuffer;
pub use windows::MinuteAggregator;
pub use thresholds::{Threshold, ThresholdTable};
pub use cooldown::{AlertCooldownTracker, CooldownKey};
pub use sinks::{DeliveryError, DeliveryItem, DeliverySink};
pub use dispatcher::{EnqueueOutcome, NotificationDispatcher, RecipientClass, SinkSet};
pub use digest::{DailyDigestAccumulator, DailySummary};
pub use engine::{SampleOutcome, VitalsEngine};
pub use ingestion::start_vitals_ingestion;
pub use db::{SqliteVitalsWriter, VitalsDbWriter};
pub use config::{ConfigError, PipelineConfig};
pub use simulator::run_simulated_producer;
