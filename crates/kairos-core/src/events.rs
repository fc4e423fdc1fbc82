//! Events - Lifecycle notifications for the pool
//!
//! Configuration changes arrive as [`PoolEvent`]s on a broadcast
//! [`PoolEventBus`]. [`spawn_event_listener`] applies them to the pool:
//!
//! - `Load`: bring the instance into Hot, skipped when it is already Hot with
//!   the store's current config hash
//! - `Reload`: rebuild in place, skipped when the announced hash is current
//! - `Unload`: tear the instance down
//! - `GlobalSettingsChanged`: rebuild every materialized instance
//!
//! Handling errors are logged; the listener keeps running.

use crate::error::{Error, Result};
use crate::instance::InstanceKey;
use crate::pool::{InstancePool, Tier};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default event bus capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Pool lifecycle event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PoolEvent {
    /// Make an instance ready
    Load {
        /// Target instance
        key: InstanceKey,
    },
    /// An instance's configuration changed
    Reload {
        /// Target instance
        key: InstanceKey,
        /// Hash of the new configuration, when the publisher knows it
        #[serde(default, skip_serializing_if = "Option::is_none")]
        config_hash: Option<String>,
    },
    /// An instance was deleted
    Unload {
        /// Target instance
        key: InstanceKey,
    },
    /// Settings shared by every instance changed
    GlobalSettingsChanged,
}

impl PoolEvent {
    /// Target instance, `None` for global events
    #[must_use]
    pub fn key(&self) -> Option<&InstanceKey> {
        match self {
            Self::Load { key } | Self::Reload { key, .. } | Self::Unload { key } => Some(key),
            Self::GlobalSettingsChanged => None,
        }
    }

    /// Event type name
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Load { .. } => "load",
            Self::Reload { .. } => "reload",
            Self::Unload { .. } => "unload",
            Self::GlobalSettingsChanged => "global_settings_changed",
        }
    }
}

/// What handling an event did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// The pool changed
    Applied,
    /// Nothing to do
    Skipped,
}

/// Broadcast channel for pool events
#[derive(Debug, Clone)]
pub struct PoolEventBus {
    sender: broadcast::Sender<PoolEvent>,
}

impl PoolEventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Receiver for every future event
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.sender.subscribe()
    }

    /// Publish to every subscriber; returns how many received it
    pub fn publish(&self, event: PoolEvent) -> usize {
        // No receivers is not an error
        self.sender.send(event).unwrap_or(0)
    }

    /// Active subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for PoolEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// Apply one event to the pool
pub async fn handle_event(pool: &InstancePool, event: &PoolEvent) -> Result<EventOutcome> {
    match event {
        PoolEvent::Load { key } => load(pool, key).await,
        PoolEvent::Reload { key, config_hash } => {
            if let Some(hash) = config_hash {
                if pool.config_hash(key).as_ref() == Some(hash) {
                    debug!(instance = %key, "Reload skipped, configuration unchanged");
                    return Ok(EventOutcome::Skipped);
                }
            }
            Ok(if pool.reload(key).await? {
                EventOutcome::Applied
            } else {
                EventOutcome::Skipped
            })
        }
        PoolEvent::Unload { key } => {
            pool.remove(key).await?;
            Ok(EventOutcome::Applied)
        }
        PoolEvent::GlobalSettingsChanged => {
            let materialized: Vec<InstanceKey> = pool
                .list_instances()
                .into_iter()
                .filter(|(_, tier)| *tier != Tier::Cold)
                .map(|(key, _)| key)
                .collect();

            let mut rebuilt = 0;
            for key in &materialized {
                match pool.reload(key).await {
                    Ok(true) => rebuilt += 1,
                    Ok(false) => {}
                    Err(e) => warn!(instance = %key, error = %e, "Rebuild after settings change failed"),
                }
            }
            info!(rebuilt, total = materialized.len(), "Rebuilt instances after global settings change");
            Ok(EventOutcome::Applied)
        }
    }
}

async fn load(pool: &InstancePool, key: &InstanceKey) -> Result<EventOutcome> {
    let record = pool
        .store()
        .get(key)
        .await?
        .ok_or_else(|| Error::NotFound(format!("instance {}", key)))?;
    let hash = record.config_hash();
    let current = pool.config_hash(key);

    match pool.tier(key) {
        Some(Tier::Hot) if current.as_ref() == Some(&hash) => {
            debug!(instance = %key, "Load skipped, instance already hot");
            return Ok(EventOutcome::Skipped);
        }
        Some(Tier::Hot | Tier::Warm) if current.as_ref() != Some(&hash) => {
            pool.reload_with(record).await?;
        }
        _ => {}
    }
    pool.get(key).await?;
    Ok(EventOutcome::Applied)
}

/// Apply events from `events` until the bus closes or `token` is cancelled
pub fn spawn_event_listener(
    pool: Arc<InstancePool>,
    mut events: broadcast::Receiver<PoolEvent>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Pool event listener started");
        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => match handle_event(&pool, &event).await {
                        Ok(outcome) => {
                            debug!(event = event.event_type(), outcome = ?outcome, "Pool event handled");
                        }
                        Err(e) => {
                            warn!(event = event.event_type(), key = ?event.key(), error = %e, "Pool event failed");
                        }
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Pool event listener lagged, events dropped");
                    }
                    Err(RecvError::Closed) => {
                        info!("Pool event bus closed");
                        break;
                    }
                },
                _ = token.cancelled() => {
                    info!("Pool event listener shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests;
