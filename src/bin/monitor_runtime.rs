//! Monitor Runtime
//!
//! Wires the vitals pipeline together:
//! - Initializes SQLite database with schema
//! - Starts the notification dispatcher with its sinks
//! - Spawns one simulated producer per monitored subject
//! - Runs ingestion (with periodic persistence and daily digest)
//!
//! Usage:
//!   cargo run --release --bin monitor_runtime
//!
//! See `PipelineConfig::from_env` for environment variables.

use dotenv::dotenv;
use log::{error, info, warn};
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use vitalflow::pipeline::{
    audible::{AudibleSink, HeartbeatTone, TerminalBeeper},
    config::PipelineConfig,
    cooldown::AlertCooldownTracker,
    db::{run_schema_migrations, SqliteVitalsWriter, VitalsDbWriter},
    dispatcher::{DispatcherConfig, NotificationDispatcher, RecipientClass, SinkSet},
    engine::VitalsEngine,
    ingestion::start_vitals_ingestion,
    simulator::run_simulated_producer,
    sinks::{CloudUploadSink, DeliverySink, HttpEmailRelay, JsonlOutbox},
    types::VitalSample,
};

type RuntimeResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[tokio::main]
async fn main() -> RuntimeResult<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 Vitals Monitor Runtime");

    let config = PipelineConfig::from_env()?;
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Subjects: {}", config.monitored_subjects.join(", "));
    info!("   ├─ Sampling: {} Hz, {}s retained", config.sample_hz, config.retention_seconds);
    info!("   ├─ Flush interval: {}ms", config.flush_interval_ms);
    info!("   ├─ Alert cooldown: {}ms", config.alert_cooldown_ms);
    info!("   └─ Audible: {}", if config.enable_audible { "on" } else { "off" });

    info!("🔧 Initializing database...");
    let mut conn = Connection::open(&config.db_path)?;
    run_schema_migrations(&mut conn, "sql")?;
    drop(conn);
    let db_writer: Arc<dyn VitalsDbWriter> = Arc::new(SqliteVitalsWriter::new(&config.db_path)?);
    info!("✅ Database initialized");

    let dispatcher = Arc::new(NotificationDispatcher::new(DispatcherConfig {
        queue_capacity: config.dispatch_queue_capacity,
        poll_timeout: Duration::from_millis(config.dispatch_poll_timeout_ms),
        delivery_timeout: Duration::from_millis(config.delivery_timeout_ms),
        rate_limits_ms: HashMap::from([(RecipientClass::CloudUpload, config.upload_rate_limit_ms)]),
    })?);
    let dispatcher_handle = dispatcher.start(build_sinks(&config)?);
    info!("✅ Notification dispatcher started (queue: {})", config.dispatch_queue_capacity);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut engine = VitalsEngine::new(
        config.buffer_capacity(),
        Arc::new(config.threshold_table()),
        Arc::new(AlertCooldownTracker::new(config.alert_cooldown_ms)),
        dispatcher.clone(),
    )?
    .with_audible_alarms(config.enable_audible);

    match &config.doctor_email {
        Some(email) => engine = engine.with_doctor_email(email.clone()),
        None => warn!("⚠️  DOCTOR_EMAIL not set, alerts and digests will not be mailed"),
    }

    let mut tone_handle = None;
    if let (true, Some(first)) = (config.enable_audible, config.monitored_subjects.first()) {
        let tone = HeartbeatTone::new();
        engine = engine.with_heartbeat_tone(first.clone(), tone.clone());
        tone_handle = Some(tone.spawn(Arc::new(TerminalBeeper), shutdown_rx.clone()));
        info!("💓 Heartbeat tone follows {}", first);
    }

    let engine = Arc::new(Mutex::new(engine));

    let (tx, rx) = mpsc::channel::<VitalSample>(config.channel_buffer);
    let ingestion_handle = tokio::spawn(start_vitals_ingestion(
        rx,
        engine.clone(),
        db_writer,
        config.flush_interval_ms,
    ));
    info!("✅ Ingestion task spawned");

    let period = Duration::from_millis(1_000 / config.sample_hz.max(1) as u64);
    for subject_id in &config.monitored_subjects {
        tokio::spawn(run_simulated_producer(
            subject_id.clone(),
            period,
            tx.clone(),
            shutdown_rx.clone(),
        ));
    }
    drop(tx);
    info!("✅ {} producers spawned", config.monitored_subjects.len());
    info!("🔄 Press CTRL+C to shutdown gracefully");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
        Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
    }

    // Producers stop and drop their senders, which lets ingestion do its final flush
    shutdown_tx.send_replace(true);
    if let Err(e) = tokio::time::timeout(Duration::from_secs(5), ingestion_handle).await {
        warn!("⚠️  Ingestion did not finish in time: {}", e);
    }

    dispatcher.shutdown();
    if let Some(handle) = dispatcher_handle {
        let _ = handle.await;
    }
    if let Some(handle) = tone_handle {
        let _ = handle.await;
    }

    let stats = dispatcher.stats();
    info!(
        "📨 Dispatch totals: {} delivered, {} failed, {} dropped, {} rate-limited",
        stats.delivered, stats.failed, stats.dropped, stats.rate_limited
    );
    info!("✅ Monitor runtime stopped");
    Ok(())
}

/// HTTP sinks where endpoints are configured, the JSONL outbox otherwise
fn build_sinks(config: &PipelineConfig) -> RuntimeResult<SinkSet> {
    let timeout = Duration::from_millis(config.delivery_timeout_ms);
    let mut outbox: Option<Arc<dyn DeliverySink>> = None;
    let mut outbox_sink = || -> RuntimeResult<Arc<dyn DeliverySink>> {
        if let Some(sink) = &outbox {
            return Ok(sink.clone());
        }
        let sink: Arc<dyn DeliverySink> = Arc::new(JsonlOutbox::open(&config.outbox_path)?);
        outbox = Some(sink.clone());
        Ok(sink)
    };

    let email: Arc<dyn DeliverySink> = match &config.mail_relay_url {
        Some(url) => Arc::new(HttpEmailRelay::new(url.as_str(), timeout)?),
        None => outbox_sink()?,
    };
    let cloud_upload: Arc<dyn DeliverySink> = match &config.cloud_upload_url {
        Some(url) => Arc::new(CloudUploadSink::new(url.as_str(), timeout)?),
        None => outbox_sink()?,
    };
    let audible: Option<Arc<dyn DeliverySink>> = config.enable_audible.then(|| {
        Arc::new(AudibleSink::new(Arc::new(TerminalBeeper), Duration::from_millis(150)))
            as Arc<dyn DeliverySink>
    });

    info!("   ├─ Email sink: {}", email.sink_type());
    info!("   └─ Upload sink: {}", cloud_upload.sink_type());

    Ok(SinkSet {
        email: Some(email),
        cloud_upload: Some(cloud_upload),
        audible,
    })
}
