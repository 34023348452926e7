//! Subscription Manager: tracks subscribe intents, matches a re-appearing
//! device by DUID first and its identity triple second, and drives
//! resubscribe-on-restore. Delivered to exactly one listener over an
//! `mpsc` channel, handed out once at construction.

use crate::error::PeError;
use crate::ids::{DeviceIdentity, Duid};
use crate::transport::DiscoveryEvent;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubscriptionStatus {
    Pending,
    Active,
    Suspended,
    Failed,
}

#[derive(Debug, Clone)]
struct SubscriptionState {
    resource: String,
    target: Duid,
    identity: Option<DeviceIdentity>,
    subscribe_id: Option<String>,
    status: SubscriptionStatus,
}

/// Emitted to the single registered listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    Subscribed { id: SubscriptionId, subscribe_id: String },
    Suspended { id: SubscriptionId, reason: String },
    Restored { id: SubscriptionId, new_subscribe_id: String },
    Failed { id: SubscriptionId, reason: String },
    Notification { id: SubscriptionId, header: Vec<u8>, body: Vec<u8> },
}

#[derive(Debug, Clone)]
pub struct SubscriptionManagerConfig {
    /// Wait applied before the first resubscribe attempt after a device is
    /// rediscovered. Default 500ms.
    pub resubscribe_delay: Duration,
    /// Maximum resubscribe attempts before the subscription is marked
    /// `Failed`. Default 3.
    pub max_retry_attempts: u32,
    /// Wait between resubscribe attempts. Default 1s.
    pub retry_wait: Duration,
}

impl Default for SubscriptionManagerConfig {
    fn default() -> Self {
        SubscriptionManagerConfig {
            resubscribe_delay: Duration::from_millis(500),
            max_retry_attempts: 3,
            retry_wait: Duration::from_secs(1),
        }
    }
}

pub struct SubscriptionManager {
    config: SubscriptionManagerConfig,
    subscriptions: HashMap<SubscriptionId, SubscriptionState>,
    next_id: u64,
    sender: mpsc::UnboundedSender<SubscriptionEvent>,
}

impl SubscriptionManager {
    /// Construct the manager along with the single channel its events are
    /// delivered over. The receiver half should be taken by exactly one
    /// listener; a second subscriber would simply never observe anything
    /// since this is not a broadcast channel.
    pub fn new(config: SubscriptionManagerConfig) -> (Self, mpsc::UnboundedReceiver<SubscriptionEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            SubscriptionManager {
                config,
                subscriptions: HashMap::new(),
                next_id: 0,
                sender,
            },
            receiver,
        )
    }

    fn emit(&self, event: SubscriptionEvent) {
        // No listener is not an error here -- the manager keeps tracking
        // subscription state regardless of whether anyone is watching.
        let _ = self.sender.send(event);
    }

    /// Register an intent, pending until [`Self::confirm_subscribed`].
    pub fn subscribe(&mut self, resource: impl Into<String>, target: Duid, identity: Option<DeviceIdentity>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscriptions.insert(
            id,
            SubscriptionState {
                resource: resource.into(),
                target,
                identity,
                subscribe_id: None,
                status: SubscriptionStatus::Pending,
            },
        );
        id
    }

    /// Remove a subscription locally. The caller is responsible for sending
    /// the wire-level Unsubscribe message; this only returns the last known
    /// subscribe ID so the caller can address it.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> Option<String> {
        self.subscriptions.remove(&id).and_then(|s| s.subscribe_id)
    }

    pub fn confirm_subscribed(&mut self, id: SubscriptionId, subscribe_id: impl Into<String>) {
        let subscribe_id = subscribe_id.into();
        if let Some(state) = self.subscriptions.get_mut(&id) {
            state.subscribe_id = Some(subscribe_id.clone());
            state.status = SubscriptionStatus::Active;
            self.emit(SubscriptionEvent::Subscribed { id, subscribe_id });
        }
    }

    pub fn mark_suspended(&mut self, id: SubscriptionId, reason: impl Into<String>) {
        let reason = reason.into();
        if let Some(state) = self.subscriptions.get_mut(&id) {
            state.status = SubscriptionStatus::Suspended;
            self.emit(SubscriptionEvent::Suspended { id, reason });
        }
    }

    fn mark_failed(&mut self, id: SubscriptionId, reason: String) {
        if let Some(state) = self.subscriptions.get_mut(&id) {
            state.status = SubscriptionStatus::Failed;
            self.emit(SubscriptionEvent::Failed { id, reason });
        }
    }

    /// Deliver a Notify body to the subscription, if active. Returns `false`
    /// (and emits nothing) for an unknown or non-active subscription; the
    /// caller should log-and-drop in that case.
    pub fn notify(&self, id: SubscriptionId, header: Vec<u8>, body: Vec<u8>) -> bool {
        match self.subscriptions.get(&id) {
            Some(state) if state.status == SubscriptionStatus::Active => {
                self.emit(SubscriptionEvent::Notification { id, header, body });
                true
            }
            _ => false,
        }
    }

    /// Subscriptions on a suspended device that a rediscovery event matches,
    /// by DUID first and the device identity triple second.
    pub fn find_restorable(&self, event: &DiscoveryEvent) -> Vec<SubscriptionId> {
        let DiscoveryEvent::DeviceDiscovered(device) = event else {
            return Vec::new();
        };
        self.subscriptions
            .iter()
            .filter(|(_, state)| state.status == SubscriptionStatus::Suspended)
            .filter(|(_, state)| state.target == device.duid || state.identity == Some(device.identity))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Drive the resubscribe flow: wait `resubscribe_delay`, then retry
    /// `resend` up to `max_retry_attempts` times with `retry_wait` between
    /// attempts. `resend` is given the (possibly new) target DUID and the
    /// subscription's resource name, and returns the new subscribe ID.
    pub async fn attempt_restore<F, Fut>(&mut self, id: SubscriptionId, new_target: Duid, mut resend: F) -> Result<(), PeError>
    where
        F: FnMut(Duid, String) -> Fut,
        Fut: Future<Output = Result<String, PeError>>,
    {
        let resource = match self.subscriptions.get(&id) {
            Some(state) => state.resource.clone(),
            None => return Err(PeError::Cancelled),
        };

        tokio::time::sleep(self.config.resubscribe_delay).await;

        let mut last_err = PeError::Cancelled;
        for attempt in 0..self.config.max_retry_attempts {
            match resend(new_target, resource.clone()).await {
                Ok(new_subscribe_id) => {
                    if let Some(state) = self.subscriptions.get_mut(&id) {
                        state.target = new_target;
                        state.subscribe_id = Some(new_subscribe_id.clone());
                        state.status = SubscriptionStatus::Active;
                    }
                    self.emit(SubscriptionEvent::Restored { id, new_subscribe_id });
                    return Ok(());
                }
                Err(err) => {
                    last_err = err;
                    if attempt + 1 < self.config.max_retry_attempts {
                        tokio::time::sleep(self.config.retry_wait).await;
                    }
                }
            }
        }
        let reason = last_err.to_string();
        self.mark_failed(id, reason);
        Err(last_err)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
