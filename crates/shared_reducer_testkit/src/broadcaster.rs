//! In-process authority for shared resources.
//!
//! Holds the confirmed state of each resource, applies client changes in
//! arrival order and fans the result out: an acknowledgement carrying the
//! correlation id to the sender, the bare delta to every other subscriber.

use crate::error::{TestkitError, TestkitResult};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use shared_reducer::Context;
use shared_reducer_protocol::{ClientMessage, ServerMessage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Reason given to writes on a read-only subscription.
pub const READ_ONLY_REJECTION: &str = "Cannot modify data";

/// Identifies one subscriber of one resource.
pub type SubscriberId = u64;

/// What a subscriber may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// May read and write.
    ReadWrite,
    /// Every write is rejected.
    ReadOnly,
}

/// A live subscription. Messages arrive encoded, baseline first.
#[derive(Debug)]
pub struct Subscription {
    /// Subscriber id, unique per broadcaster.
    pub id: SubscriberId,
    /// Subscribed resource.
    pub resource: String,
    /// Outgoing messages for this subscriber.
    pub receiver: mpsc::UnboundedReceiver<Value>,
}

struct Topic<C: Context> {
    state: Arc<C::State>,
    subscribers: HashMap<SubscriberId, mpsc::UnboundedSender<Value>>,
    applied: Vec<C::Delta>,
}

/// Authoritative model for any number of resources.
pub struct Broadcaster<C: Context> {
    context: C,
    topics: Mutex<HashMap<String, Topic<C>>>,
    next_subscriber: AtomicU64,
}

impl<C> Broadcaster<C>
where
    C: Context,
    C::State: Serialize,
    C::Delta: Serialize + DeserializeOwned,
{
    /// Creates a broadcaster with no resources.
    pub fn new(context: C) -> Self {
        Self {
            context,
            topics: Mutex::new(HashMap::new()),
            next_subscriber: AtomicU64::new(1),
        }
    }

    /// Sets the state of a resource, creating it if needed.
    ///
    /// Existing subscribers are not notified.
    pub fn set(&self, resource: &str, state: C::State) {
        let mut topics = self.topics.lock();
        match topics.get_mut(resource) {
            Some(topic) => topic.state = Arc::new(state),
            None => {
                topics.insert(
                    resource.to_string(),
                    Topic {
                        state: Arc::new(state),
                        subscribers: HashMap::new(),
                        applied: Vec::new(),
                    },
                );
            }
        }
    }

    /// Returns the confirmed state of a resource.
    pub fn get(&self, resource: &str) -> Option<Arc<C::State>> {
        self.topics
            .lock()
            .get(resource)
            .map(|topic| Arc::clone(&topic.state))
    }

    /// Every delta applied to a resource, in order.
    pub fn applied(&self, resource: &str) -> Vec<C::Delta> {
        self.topics
            .lock()
            .get(resource)
            .map(|topic| topic.applied.clone())
            .unwrap_or_default()
    }

    /// Number of current subscribers of a resource.
    pub fn subscriber_count(&self, resource: &str) -> usize {
        self.topics
            .lock()
            .get(resource)
            .map_or(0, |topic| topic.subscribers.len())
    }

    /// Subscribes to a resource; the baseline is queued immediately.
    pub fn subscribe(&self, resource: &str) -> TestkitResult<Subscription> {
        let mut topics = self.topics.lock();
        let topic = topics
            .get_mut(resource)
            .ok_or_else(|| TestkitError::UnknownResource(resource.to_string()))?;

        let init = ServerMessage::<&C::State, C::Delta>::init(topic.state.as_ref()).encode()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(init);

        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        topic.subscribers.insert(id, sender);
        debug!("subscriber {} joined {}", id, resource);

        Ok(Subscription {
            id,
            resource: resource.to_string(),
            receiver,
        })
    }

    /// Removes a subscriber.
    pub fn unsubscribe(&self, resource: &str, subscriber: SubscriberId) {
        if let Some(topic) = self.topics.lock().get_mut(resource) {
            topic.subscribers.remove(&subscriber);
        }
    }

    /// Applies a change that did not come from a subscriber.
    pub fn update(&self, resource: &str, delta: C::Delta) -> TestkitResult<()> {
        let mut topics = self.topics.lock();
        let topic = topics
            .get_mut(resource)
            .ok_or_else(|| TestkitError::UnknownResource(resource.to_string()))?;
        self.apply(topic, None, delta)
    }

    /// Handles one decoded message from a subscriber.
    pub fn handle(
        &self,
        resource: &str,
        subscriber: SubscriberId,
        permission: Permission,
        message: Value,
    ) -> TestkitResult<()> {
        let mut topics = self.topics.lock();
        let topic = topics
            .get_mut(resource)
            .ok_or_else(|| TestkitError::UnknownResource(resource.to_string()))?;

        let ClientMessage { delta, id } = match ClientMessage::<C::Delta>::decode(message) {
            Ok(message) => message,
            Err(e) => {
                let reply = ServerMessage::<(), ()>::rejection(e.to_string(), None).encode()?;
                send(topic, subscriber, reply);
                return Err(e.into());
            }
        };

        if permission == Permission::ReadOnly {
            let reply = ServerMessage::<(), ()>::rejection(READ_ONLY_REJECTION, Some(id)).encode()?;
            send(topic, subscriber, reply);
            return Ok(());
        }

        self.apply(topic, Some((subscriber, id)), delta)
    }

    fn apply(
        &self,
        topic: &mut Topic<C>,
        origin: Option<(SubscriberId, u64)>,
        delta: C::Delta,
    ) -> TestkitResult<()> {
        topic.state = self.context.update(&topic.state, &delta);

        let change = ServerMessage::<(), &C::Delta>::change(&delta).encode()?;
        let ack = match origin {
            Some((_, id)) => Some(ServerMessage::<(), &C::Delta>::ack(&delta, id).encode()?),
            None => None,
        };

        for (subscriber, sender) in &topic.subscribers {
            let message = match (&ack, origin) {
                (Some(ack), Some((origin, _))) if origin == *subscriber => ack.clone(),
                _ => change.clone(),
            };
            let _ = sender.send(message);
        }
        topic.applied.push(delta);
        Ok(())
    }
}

fn send<C: Context>(topic: &Topic<C>, subscriber: SubscriberId, message: Value) {
    if let Some(sender) = topic.subscribers.get(&subscriber) {
        let _ = sender.send(message);
    }
}
