use crate::coordinator::Coordinator;
use crate::entity::{DeviceInfo, EntityDescriptor, EntitySet};
use crate::error::Result;
use crate::snapshot::Snapshot;
use crate::value::{extract_all, Reading};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Whatever owns the entities: registry, state store, UI.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EntityHost: Send + Sync {
    async fn register_device(&self, device: &DeviceInfo) -> Result<()>;
    async fn register_entities(
        &self,
        device: &DeviceInfo,
        entities: &[EntityDescriptor],
    ) -> Result<()>;
    async fn publish_readings(&self, readings: &[Reading]) -> Result<()>;
}

/// Drives a coordinator on a fixed interval and hands results to a host.
pub struct Bridge<H> {
    coordinator: Coordinator,
    host: H,
    decimal_separator: Option<char>,
    entities: Option<EntitySet>,
}

impl<H: EntityHost> Bridge<H> {
    pub fn new(coordinator: Coordinator, host: H, decimal_separator: Option<char>) -> Self {
        Self {
            coordinator,
            host,
            decimal_separator,
            entities: None,
        }
    }

    pub fn entities(&self) -> Option<&EntitySet> {
        self.entities.as_ref()
    }

    /// First refresh, entity registration and the initial states.
    pub async fn setup(&mut self) -> Result<()> {
        let (snapshot, entities) = self.coordinator.setup().await?;
        self.host.register_device(&entities.device).await?;
        self.host
            .register_entities(&entities.device, &entities.descriptors)
            .await?;
        info!(
            host = %self.coordinator.host(),
            entities = entities.descriptors.len(),
            "registered entities"
        );
        self.publish(&entities, &snapshot).await?;
        self.entities = Some(entities);
        Ok(())
    }

    /// One poll cycle. Nothing is published unless the whole cycle succeeded.
    pub async fn poll_once(&mut self) -> Result<usize> {
        if self.entities.is_none() {
            self.setup().await?;
            return Ok(self.entities.as_ref().map_or(0, |e| e.descriptors.len()));
        }
        let snapshot = self.coordinator.refresh().await?;
        match &self.entities {
            Some(entities) => self.publish(entities, &snapshot).await,
            None => Ok(0),
        }
    }

    async fn publish(&self, entities: &EntitySet, snapshot: &Snapshot) -> Result<usize> {
        let readings = extract_all(&entities.descriptors, snapshot, self.decimal_separator);
        self.host.publish_readings(&readings).await?;
        debug!(
            readings = readings.len(),
            fetched_at = %snapshot.fetched_at,
            "published readings"
        );
        Ok(readings.len())
    }

    /// Poll every `interval` until `shutdown` resolves. Failed cycles are
    /// logged and retried on the next tick.
    pub async fn run(mut self, interval: Duration, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!(
                            host = %self.coordinator.host(),
                            error = %e,
                            transient = e.is_transient(),
                            "poll cycle failed"
                        );
                    }
                }
            }
        }
    }
}
