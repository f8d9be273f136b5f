//! Pipeline ingestion - async channel processor for vital samples

use super::db::VitalsDbWriter;
use super::engine::VitalsEngine;
use super::types::{AbnormalEvent, MinuteRecord, VitalSample};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Start pipeline ingestion from the sample channel
///
/// Main loop:
/// 1. Receives samples from producers via mpsc channel
/// 2. Runs each sample through `VitalsEngine` inline
/// 3. On every flush tick, writes the buffered minute records and abnormal
///    events, then emits the daily digest if the day changed
///
/// The engine lock is released before any database write. Database errors
/// are logged and the batch is dropped. Runs until every sender is dropped,
/// then closes open minute buckets and performs a final write.
pub async fn start_vitals_ingestion(
    mut rx: mpsc::Receiver<VitalSample>,
    engine: Arc<Mutex<VitalsEngine>>,
    db_writer: Arc<dyn VitalsDbWriter>,
    flush_interval_ms: u64,
) {
    log::info!("🚀 Starting vitals ingestion");
    log::info!("   ├─ Flush interval: {}ms", flush_interval_ms);
    log::info!("   └─ Waiting for samples...");

    let mut flush_timer = interval(Duration::from_millis(flush_interval_ms.max(1)));
    flush_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let channel_capacity = rx.max_capacity();
    let mut pending_records: Vec<MinuteRecord> = Vec::new();
    let mut pending_events: Vec<AbnormalEvent> = Vec::new();
    let mut sample_count = 0u64;
    let mut last_log_time = std::time::Instant::now();

    loop {
        tokio::select! {
            maybe_sample = rx.recv() => {
                // Every sender dropped: close open minutes, write everything, exit
                let Some(sample) = maybe_sample else {
                    log::warn!("⚠️  Sample channel closed, stopping ingestion");
                    log::info!("🔄 Performing final flush...");

                    let closed = {
                        let mut engine_guard = engine.lock().unwrap_or_else(PoisonError::into_inner);
                        engine_guard.flush_open_buckets()
                    };
                    pending_records.extend(closed);

                    write_batch(
                        db_writer.as_ref(),
                        std::mem::take(&mut pending_records),
                        std::mem::take(&mut pending_events),
                    )
                    .await;

                    log::info!("✅ Final flush complete");
                    break;
                };

                let outcome = {
                    let mut engine_guard = engine.lock().unwrap_or_else(PoisonError::into_inner);
                    engine_guard.process_sample(sample)
                };

                pending_records.extend(outcome.closed_record);
                pending_events.extend(outcome.events);
                sample_count += 1;

                if last_log_time.elapsed().as_secs() >= 10 {
                    let per_sec = sample_count as f64 / last_log_time.elapsed().as_secs_f64();
                    log::info!("📊 Ingestion rate: {:.1} samples/sec (total: {})", per_sec, sample_count);
                    last_log_time = std::time::Instant::now();
                    sample_count = 0;
                }
            }

            _ = flush_timer.tick() => {
                let flush_start = std::time::Instant::now();
                let records = std::mem::take(&mut pending_records);
                let events = std::mem::take(&mut pending_events);
                let (record_count, event_count) = (records.len(), events.len());

                write_batch(db_writer.as_ref(), records, events).await;

                let (subjects, digests) = {
                    let mut engine_guard = engine.lock().unwrap_or_else(PoisonError::into_inner);
                    let digests = engine_guard.flush_digest(&chrono::Local::now());
                    (engine_guard.active_subjects().len(), digests.len())
                };
                if digests > 0 {
                    log::info!("📧 Queued {} daily digests", digests);
                }

                let channel_usage = rx.len();
                if record_count > 0 || event_count > 0 {
                    log::info!(
                        "📊 Flush complete: {} subjects, {} minutes, {} events | channel: {}/{} | {}ms",
                        subjects,
                        record_count,
                        event_count,
                        channel_usage,
                        channel_capacity,
                        flush_start.elapsed().as_millis()
                    );
                }

                if channel_usage > channel_capacity / 2 {
                    log::warn!(
                        "⚠️  Channel usage high: {}/{} ({}%)",
                        channel_usage,
                        channel_capacity,
                        (channel_usage * 100) / channel_capacity
                    );
                }
            }
        }
    }

    log::info!("✅ Vitals ingestion stopped");
}

async fn write_batch(
    db_writer: &dyn VitalsDbWriter,
    records: Vec<MinuteRecord>,
    events: Vec<AbnormalEvent>,
) {
    if !records.is_empty() {
        let count = records.len();
        match db_writer.write_minute_records(records).await {
            Ok(()) => log::debug!("✅ Wrote {} minute records", count),
            Err(e) => log::error!("❌ Failed to write minute records: {}", e),
        }
    }

    if !events.is_empty() {
        let count = events.len();
        match db_writer.write_abnormal_events(events).await {
            Ok(()) => log::debug!("✅ Wrote {} abnormal events", count),
            Err(e) => log::error!("❌ Failed to write abnormal events: {}", e),
        }
    }
}
