//! Diagnostics event stream
//!
//! Publishes runtime diagnostics (container loads, provider registrations,
//! version shadowing) to subscribers and keeps a bounded history.

use semver::Version;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::federation::scope::VersionShadowingEvent;

/// Default number of events retained in history
pub const DEFAULT_EVENT_HISTORY: usize = 1024;

/// Runtime diagnostic event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FederationEvent {
    /// Container reached `Loaded`
    ContainerLoaded { container_id: String },
    /// Container reached `Failed`
    ContainerFailed { container_id: String, reason: String },
    /// A new provider was appended to the shared scope
    ProviderRegistered {
        name: String,
        version: Version,
        registered_by: String,
        singleton: bool,
    },
    /// A provider's instance was produced
    ProviderLoaded { name: String, version: Version },
    /// A singleton lock forced an out-of-range version on a requester
    VersionShadowing(VersionShadowingEvent),
}

struct EventState {
    subscribers: Vec<mpsc::UnboundedSender<FederationEvent>>,
    history: VecDeque<FederationEvent>,
}

/// Event fan-out for one session
pub struct EventManager {
    state: Mutex<EventState>,
    history_limit: usize,
}

impl EventManager {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_EVENT_HISTORY)
    }

    /// Keep at most `history_limit` events (0 disables history)
    pub fn with_history_limit(history_limit: usize) -> Self {
        Self {
            state: Mutex::new(EventState {
                subscribers: Vec::new(),
                history: VecDeque::new(),
            }),
            history_limit,
        }
    }

    /// Receive every event published from now on
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<FederationEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().await.subscribers.push(tx);
        rx
    }

    /// Deliver `event` to all live subscribers
    pub async fn publish(&self, event: FederationEvent) {
        debug!("Publishing federation event: {:?}", event);
        let mut state = self.state.lock().await;

        // Dropped receivers are pruned on send failure
        state.subscribers.retain(|tx| tx.send(event.clone()).is_ok());

        if self.history_limit > 0 {
            if state.history.len() == self.history_limit {
                state.history.pop_front();
            }
            state.history.push_back(event);
        }
    }

    /// Retained events, oldest first
    pub async fn history(&self) -> Vec<FederationEvent> {
        self.state.lock().await.history.iter().cloned().collect()
    }

    /// Retained shadowing events, oldest first
    pub async fn shadowing_events(&self) -> Vec<VersionShadowingEvent> {
        self.state
            .lock()
            .await
            .history
            .iter()
            .filter_map(|event| match event {
                FederationEvent::VersionShadowing(shadowing) => Some(shadowing.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.state.lock().await.subscribers.len()
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new()
    }
}
