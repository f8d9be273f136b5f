//! Audible alarms and the heartbeat tone
//!
//! Alarm beeps are `DeliveryItem::Beep` items played by `AudibleSink` on the
//! dispatcher's consumer task. The heartbeat tone runs as its own task and
//! only reads the latest bpm, so neither ever sleeps on the sampling path.

use super::sinks::{DeliveryError, DeliveryItem, DeliverySink};
use async_trait::async_trait;
use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};

/// Something that can emit one short tone
pub trait Beeper: Send + Sync {
    fn beep(&self) -> std::io::Result<()>;
}

/// Rings the terminal bell on stdout
pub struct TerminalBeeper;

impl Beeper for TerminalBeeper {
    fn beep(&self) -> std::io::Result<()> {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(b"\x07")?;
        stdout.flush()
    }
}

/// Plays `count` beeps per `Beep` item, spaced by `gap`
pub struct AudibleSink {
    beeper: Arc<dyn Beeper>,
    gap: Duration,
}

impl AudibleSink {
    pub fn new(beeper: Arc<dyn Beeper>, gap: Duration) -> Self {
        Self { beeper, gap }
    }
}

#[async_trait]
impl DeliverySink for AudibleSink {
    async fn deliver(&self, item: &DeliveryItem) -> Result<(), DeliveryError> {
        let DeliveryItem::Beep { count, .. } = item else {
            return Err(DeliveryError::Unsupported(item.kind()));
        };

        for i in 0..*count {
            self.beeper.beep()?;
            if i + 1 < *count {
                sleep(self.gap).await;
            }
        }
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "audible"
    }
}

/// Poll period while the tone is silent
const IDLE_POLL: Duration = Duration::from_millis(250);

/// Fastest pace the tone plays; higher rates are sensor noise
pub const MAX_BPM: u32 = 300;

/// Interval between two beats at `bpm`, capped at `MAX_BPM`; `None` silences the tone
pub fn beat_interval(bpm: u32) -> Option<Duration> {
    (bpm > 0).then(|| Duration::from_millis(60_000 / bpm.min(MAX_BPM) as u64))
}

/// Heart-rate paced tone, one beat every `60000 / bpm` ms
///
/// Clones share the same bpm, so the engine can update it while the task
/// plays. The next beat is always scheduled from the instant the current
/// one played, so a late wake-up shifts the rhythm instead of bunching up
/// catch-up beats.
#[derive(Clone, Default)]
pub struct HeartbeatTone {
    bpm: Arc<AtomicU32>,
}

impl HeartbeatTone {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the pace; non-finite or non-positive rates silence the tone,
    /// anything above `MAX_BPM` plays at `MAX_BPM`
    pub fn set_bpm(&self, heart_rate: f64) {
        let bpm = if heart_rate.is_finite() && heart_rate >= 1.0 {
            heart_rate.round().min(MAX_BPM as f64) as u32
        } else {
            0
        };
        self.bpm.store(bpm, Ordering::Relaxed);
    }

    pub fn bpm(&self) -> u32 {
        self.bpm.load(Ordering::Relaxed)
    }

    /// Run the tone until `shutdown` flips to true (or its sender is dropped)
    pub fn spawn(&self, beeper: Arc<dyn Beeper>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let bpm = self.bpm.clone();
        tokio::spawn(async move {
            log::info!("💓 Heartbeat tone started");
            loop {
                if *shutdown.borrow() {
                    break;
                }

                let wake_at = match beat_interval(bpm.load(Ordering::Relaxed)) {
                    Some(interval) => {
                        if let Err(e) = beeper.beep() {
                            log::warn!("⚠️  Heartbeat tone failed to play: {}", e);
                        }
                        Instant::now() + interval
                    }
                    None => Instant::now() + IDLE_POLL,
                };

                tokio::select! {
                    _ = sleep_until(wake_at) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            log::info!("💓 Heartbeat tone stopped");
        })
    }
}
