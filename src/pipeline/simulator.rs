//! Simulated bedside producer
//!
//! Stand-in for a real device feed: one sample per period, a mean-reverting
//! random walk around resting vitals, a sine ECG trace and the occasional
//! tachycardia episode so alerts get exercised.

use super::types::{VitalSample, Vitals};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

/// Baseline resting vitals the random walk reverts to
pub const BASELINE: Vitals = Vitals {
    temperature: 36.8,
    heart_rate: 72.0,
    resp_rate: 14.0,
    systolic_bp: 118.0,
    diastolic_bp: 76.0,
};

/// Emit samples for `subject_id` every `period` until `shutdown` flips to true
///
/// Never blocks on a full channel: the sample is dropped instead. Returns
/// (dropping its sender) on shutdown or when the channel closes.
pub async fn run_simulated_producer(
    subject_id: String,
    period: Duration,
    tx: mpsc::Sender<VitalSample>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut rng = StdRng::from_entropy();
    let mut vitals = BASELINE;
    let mut ticker = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        vitals = next_vitals(&mut rng, vitals);

        // Occasional tachycardia episode
        if rng.gen_bool(0.001) {
            vitals.heart_rate += 45.0;
        }

        let now_ms = chrono::Utc::now().timestamp_millis();
        let ecg = ((now_ms % 1_000) as f64 / 1_000.0 * std::f64::consts::TAU).sin();
        let sample = VitalSample::new(subject_id.clone(), now_ms, vitals, ecg);

        match tx.try_send(sample) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => log::debug!("⚠️  Sample channel full, dropping sample for {}", subject_id),
            Err(TrySendError::Closed(_)) => break,
        }
    }

    log::debug!("Producer for {} stopped", subject_id);
}

fn next_vitals(rng: &mut StdRng, vitals: Vitals) -> Vitals {
    Vitals {
        temperature: step(rng, vitals.temperature, BASELINE.temperature, 0.02),
        heart_rate: step(rng, vitals.heart_rate, BASELINE.heart_rate, 1.5),
        resp_rate: step(rng, vitals.resp_rate, BASELINE.resp_rate, 0.4),
        systolic_bp: step(rng, vitals.systolic_bp, BASELINE.systolic_bp, 1.5),
        diastolic_bp: step(rng, vitals.diastolic_bp, BASELINE.diastolic_bp, 1.0),
    }
}

fn step(rng: &mut StdRng, value: f64, baseline: f64, jitter: f64) -> f64 {
    value + 0.05 * (baseline - value) + rng.gen_range(-jitter..=jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_reverts_towards_baseline() {
        // Test: Without jitter the walk moves 5% of the way back each step
        let mut rng = StdRng::seed_from_u64(7);
        assert!((step(&mut rng, 100.0, 72.0, 0.0) - 98.6).abs() < 1e-9);

        let mut vitals = Vitals {
            heart_rate: 150.0,
            ..BASELINE
        };
        for _ in 0..500 {
            vitals = next_vitals(&mut rng, vitals);
        }
        assert!((vitals.heart_rate - BASELINE.heart_rate).abs() < 20.0);
    }

    #[tokio::test]
    async fn test_producer_emits_until_shutdown() {
        let (tx, mut rx) = mpsc::channel(100);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_simulated_producer(
            "patient-1".to_string(),
            Duration::from_millis(10),
            tx,
            shutdown_rx,
        ));

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(first.subject_id, "patient-1");
        assert!((-1.0..=1.0).contains(&first.ecg));

        shutdown_tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();

        // The sender went with the task, so the channel drains and closes
        while rx.recv().await.is_some() {}
    }

    #[tokio::test]
    async fn test_producer_stops_when_channel_closes() {
        let (tx, rx) = mpsc::channel(1);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_simulated_producer(
            "patient-1".to_string(),
            Duration::from_millis(5),
            tx,
            shutdown_rx,
        ));

        drop(rx);
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_full_channel_drops_instead_of_blocking() {
        // Edge case: nobody reads, the producer keeps ticking and still stops promptly
        let (tx, rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_simulated_producer(
            "patient-1".to_string(),
            Duration::from_millis(2),
            tx,
            shutdown_rx,
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(rx.len(), 1);

        shutdown_tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
