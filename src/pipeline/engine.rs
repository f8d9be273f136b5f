//! Vitals engine - inline per-sample pipeline
//!
//! ```text
//! VitalSample
//!     ↓
//! VitalsEngine::process_sample()
//!     ├─ BoundedSeriesBuffer (per subject, shared with readers)
//!     ├─ HeartbeatTone pace
//!     ├─ cloud upload → NotificationDispatcher (rate-limited)
//!     ├─ MinuteAggregator → closed MinuteRecord → DailyDigestAccumulator
//!     └─ ThresholdTable → AbnormalEvent → AlertCooldownTracker
//!                                          ↓
//!                              email + beep → NotificationDispatcher
//! ```
//!
//! Nothing on this path waits on I/O: the dispatcher only `try_send`s, and
//! persistence happens in the ingestion loop's flush.

use super::audible::HeartbeatTone;
use super::buffer::BoundedSeriesBuffer;
use super::config::ConfigError;
use super::cooldown::{AlertCooldownTracker, CooldownKey};
use super::digest::{DailyDigestAccumulator, DailySummary};
use super::dispatcher::NotificationDispatcher;
use super::sinks::DeliveryItem;
use super::thresholds::ThresholdTable;
use super::types::{AbnormalEvent, MinuteRecord, Severity, VitalSample};
use super::windows::MinuteAggregator;
use chrono::{DateTime, TimeZone};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// What one sample produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleOutcome {
    /// The minute this sample closed, if it started a new one
    pub closed_record: Option<MinuteRecord>,
    /// Every non-NORMAL signal of the sample, whether or not it was notified
    pub events: Vec<AbnormalEvent>,
}

/// Beeps played for an alert of `severity`
pub fn beep_count(severity: Severity) -> u32 {
    match severity {
        Severity::Normal => 0,
        Severity::Warning => 1,
        Severity::Urgent => 3,
    }
}

pub struct VitalsEngine {
    buffers: HashMap<String, Arc<BoundedSeriesBuffer>>,
    aggregators: HashMap<String, MinuteAggregator>,
    /// Capacity for buffers created from now on
    buffer_capacity: NonZeroUsize,
    thresholds: Arc<ThresholdTable>,
    cooldown: Arc<AlertCooldownTracker>,
    dispatcher: Arc<NotificationDispatcher>,
    digest: DailyDigestAccumulator,
    /// Tone paced by one subject's heart rate
    tone: Option<(String, HeartbeatTone)>,
    doctor_email: Option<String>,
    audible_alarms: bool,
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl VitalsEngine {
    /// Create an engine using wall-clock milliseconds for cooldowns and rate limits
    pub fn new(
        buffer_capacity: usize,
        thresholds: Arc<ThresholdTable>,
        cooldown: Arc<AlertCooldownTracker>,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Result<Self, ConfigError> {
        Self::new_with_timestamp_fn(
            buffer_capacity,
            thresholds,
            cooldown,
            dispatcher,
            Box::new(|| chrono::Utc::now().timestamp_millis()),
        )
    }

    /// Create an engine with a custom millisecond clock (for testing)
    pub fn new_with_timestamp_fn(
        buffer_capacity: usize,
        thresholds: Arc<ThresholdTable>,
        cooldown: Arc<AlertCooldownTracker>,
        dispatcher: Arc<NotificationDispatcher>,
        now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
    ) -> Result<Self, ConfigError> {
        let buffer_capacity = non_zero_capacity(buffer_capacity)?;
        let today = chrono::Local::now().date_naive();
        Ok(Self {
            buffers: HashMap::new(),
            aggregators: HashMap::new(),
            buffer_capacity,
            digest: DailyDigestAccumulator::new(thresholds.clone(), today),
            thresholds,
            cooldown,
            dispatcher,
            tone: None,
            doctor_email: None,
            audible_alarms: true,
            now_fn,
        })
    }

    /// Count the digest from `day` instead of today
    pub fn with_digest_day(mut self, day: chrono::NaiveDate) -> Self {
        self.digest = DailyDigestAccumulator::new(self.thresholds.clone(), day);
        self
    }

    /// Send alert and digest emails to `recipient`
    pub fn with_doctor_email(mut self, recipient: impl Into<String>) -> Self {
        self.doctor_email = Some(recipient.into());
        self
    }

    /// Pace `tone` from the heart rate of `subject_id`
    pub fn with_heartbeat_tone(mut self, subject_id: impl Into<String>, tone: HeartbeatTone) -> Self {
        self.tone = Some((subject_id.into(), tone));
        self
    }

    /// Enqueue beeps alongside alert emails (on by default)
    pub fn with_audible_alarms(mut self, enabled: bool) -> Self {
        self.audible_alarms = enabled;
        self
    }

    /// Run one sample through the whole pipeline
    pub fn process_sample(&mut self, sample: VitalSample) -> SampleOutcome {
        let now = (self.now_fn)();
        let subject_id = sample.subject_id.clone();

        self.buffer_for(&subject_id).add(sample.clone());

        if let Some((paced_by, tone)) = &self.tone {
            if *paced_by == subject_id {
                tone.set_bpm(sample.vitals.heart_rate);
            }
        }

        self.dispatcher.enqueue_at(
            DeliveryItem::CloudUpload {
                subject_id: subject_id.clone(),
                sample: sample.clone(),
            },
            now,
        );

        let closed_record = self
            .aggregators
            .entry(subject_id.clone())
            .or_insert_with(|| MinuteAggregator::new(subject_id.clone()))
            .on_sample(&sample);
        if let Some(record) = &closed_record {
            self.digest.on_minute_record(&subject_id, record);
        }

        let events: Vec<AbnormalEvent> = self
            .thresholds
            .evaluate_all(&sample.vitals.to_map())
            .into_iter()
            .map(|(signal_type, severity, value)| AbnormalEvent {
                subject_id: subject_id.clone(),
                timestamp_ms: sample.timestamp_ms,
                signal_type,
                severity,
                value,
            })
            .collect();

        for event in &events {
            let key = CooldownKey::new(event.subject_id.clone(), event.signal_type, event.severity);
            if self.cooldown.should_send(&key, now) {
                self.notify(event, now);
            }
        }

        SampleOutcome {
            closed_record,
            events,
        }
    }

    fn buffer_for(&mut self, subject_id: &str) -> &Arc<BoundedSeriesBuffer> {
        let capacity = self.buffer_capacity;
        self.buffers
            .entry(subject_id.to_string())
            .or_insert_with(|| {
                log::info!("🆕 Tracking subject {} ({} samples retained)", subject_id, capacity);
                Arc::new(BoundedSeriesBuffer::with_capacity(capacity))
            })
    }

    fn notify(&self, event: &AbnormalEvent, now: i64) {
        log::warn!(
            "🚨 {} {} for {}: {:.1} {}",
            event.severity,
            event.signal_type.label(),
            event.subject_id,
            event.value,
            event.signal_type.unit()
        );

        match &self.doctor_email {
            Some(recipient) => {
                self.dispatcher.enqueue_at(alert_email(recipient, event), now);
            }
            None => log::debug!("No doctor email configured, alert not mailed"),
        }

        if self.audible_alarms {
            self.dispatcher.enqueue_at(
                DeliveryItem::Beep {
                    subject_id: event.subject_id.clone(),
                    count: beep_count(event.severity),
                },
                now,
            );
        }
    }

    /// Shared history buffer of `subject_id`, if it has sent any sample
    pub fn buffer(&self, subject_id: &str) -> Option<Arc<BoundedSeriesBuffer>> {
        self.buffers.get(subject_id).cloned()
    }

    /// Subjects seen so far, sorted
    pub fn active_subjects(&self) -> Vec<String> {
        let mut subjects: Vec<String> = self.buffers.keys().cloned().collect();
        subjects.sort();
        subjects
    }

    /// Close every open minute bucket (shutdown path)
    ///
    /// The partial minutes also count towards the daily digest.
    pub fn flush_open_buckets(&mut self) -> Vec<MinuteRecord> {
        let mut records: Vec<MinuteRecord> = self
            .aggregators
            .values_mut()
            .filter_map(|aggregator| aggregator.flush())
            .collect();
        records.sort_by(|a, b| a.subject_id.cmp(&b.subject_id));

        for record in &records {
            self.digest.on_minute_record(&record.subject_id, record);
        }
        records
    }

    /// Emit yesterday's digest if the day changed, mailing one email per subject
    pub fn flush_digest<Tz: TimeZone>(&mut self, now: &DateTime<Tz>) -> Vec<DailySummary> {
        let summaries = self.digest.flush_if_due(now);
        if summaries.is_empty() {
            return summaries;
        }

        match &self.doctor_email {
            Some(recipient) => {
                let now_ms = (self.now_fn)();
                for summary in &summaries {
                    self.dispatcher.enqueue_at(
                        DeliveryItem::Email {
                            recipient: recipient.clone(),
                            subject_line: summary.subject_line(),
                            body: summary.render_body(),
                        },
                        now_ms,
                    );
                }
            }
            None => log::debug!("No doctor email configured, {} digests not mailed", summaries.len()),
        }
        summaries
    }

    /// Capacity for subjects first seen after this call; existing buffers keep theirs
    pub fn set_buffer_capacity(&mut self, capacity: usize) -> Result<(), ConfigError> {
        self.buffer_capacity = non_zero_capacity(capacity)?;
        Ok(())
    }

    pub fn thresholds(&self) -> &Arc<ThresholdTable> {
        &self.thresholds
    }

    pub fn cooldown(&self) -> &Arc<AlertCooldownTracker> {
        &self.cooldown
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    pub fn digest(&self) -> &DailyDigestAccumulator {
        &self.digest
    }
}

fn non_zero_capacity(capacity: usize) -> Result<NonZeroUsize, ConfigError> {
    NonZeroUsize::new(capacity).ok_or_else(|| {
        ConfigError::InvalidValue("buffer capacity must be greater than zero".to_string())
    })
}

fn alert_email(recipient: &str, event: &AbnormalEvent) -> DeliveryItem {
    let at = DateTime::from_timestamp_millis(event.timestamp_ms)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| event.timestamp_ms.to_string());

    DeliveryItem::Email {
        recipient: recipient.to_string(),
        subject_line: format!(
            "[{}] {} alert for {}",
            event.severity,
            event.signal_type.label(),
            event.subject_id
        ),
        body: format!(
            "Subject: {}\nSignal: {}\nValue: {:.1} {}\nSeverity: {}\nTime: {}\n",
            event.subject_id,
            event.signal_type.label(),
            event.value,
            event.signal_type.unit(),
            event.severity,
            at
        ),
    }
}
