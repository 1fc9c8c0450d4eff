//! Tick scheduler
//!
//! Drives [`OracleService::run_tick`] on a fixed interval with random jitter.
//! Ticks never overlap: the next wait starts only after the previous tick
//! returned. Stopping lets the in-flight tick finish.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::tick::OracleService;
use crate::types::{CollectorConfig, ProviderObservation};

/// Source of the observations for one tick
#[async_trait]
pub trait Collector: Send + Sync {
    async fn collect(&self, assets: &[String]) -> Vec<ProviderObservation>;
}

/// Replays a fixed observation set, re-stamped with the collection time
pub struct StaticCollector {
    observations: Vec<ProviderObservation>,
}

impl StaticCollector {
    pub fn new(observations: Vec<ProviderObservation>) -> Self {
        Self { observations }
    }
}

#[async_trait]
impl Collector for StaticCollector {
    async fn collect(&self, assets: &[String]) -> Vec<ProviderObservation> {
        let now = Utc::now();
        self.observations
            .iter()
            .filter(|o| assets.contains(&o.asset))
            .cloned()
            .map(|mut o| {
                o.observed_at = now;
                o
            })
            .collect()
    }
}

pub struct TickScheduler {
    interval: Duration,
    jitter: Duration,
}

impl TickScheduler {
    pub fn new(interval: Duration, jitter: Duration) -> Self {
        Self { interval, jitter }
    }

    pub fn from_config(config: &CollectorConfig) -> Self {
        Self::new(
            Duration::from_secs(config.interval_secs),
            Duration::from_secs(config.jitter_secs),
        )
    }

    /// Spawn the tick loop. The first tick runs immediately.
    pub fn start(
        &self,
        collector: Arc<dyn Collector>,
        service: Arc<OracleService>,
    ) -> SchedulerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let interval = self.interval;
        let jitter = self.jitter;

        let join = tokio::spawn(async move {
            info!(
                interval_ms = interval.as_millis() as u64,
                jitter_ms = jitter.as_millis() as u64,
                "Tick scheduler started"
            );
            loop {
                let assets = service.config().assets.clone();
                let observations =
                    match tokio::time::timeout(interval.max(Duration::from_secs(1)), collector.collect(&assets)).await {
                        Ok(observations) => observations,
                        Err(_) => {
                            warn!("Collector timed out, tick runs without observations");
                            Vec::new()
                        }
                    };
                let tick_id = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
                service.run_tick(&tick_id, observations).await;

                let delay = interval + sample_jitter(jitter);
                debug!(delay_ms = delay.as_millis() as u64, "Waiting for next tick");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    changed = stop_rx.changed() => {
                        // Sender dropped counts as stop
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
                if *stop_rx.borrow() {
                    break;
                }
            }
            info!("Tick scheduler stopped");
        });

        SchedulerHandle { stop_tx, join }
    }
}

fn sample_jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

pub struct SchedulerHandle {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn is_running(&self) -> bool {
        !self.join.is_finished()
    }

    /// Request a stop and wait for the loop to exit
    pub async fn stop(self) -> anyhow::Result<()> {
        let _ = self.stop_tx.send(true);
        self.join.await?;
        Ok(())
    }
}
