//! Cross-instance change broadcast.
//!
//! Several instances may open the same database in one process. After a
//! write commits, its change sets are published to every other instance
//! subscribed under the same database name, which replay them through their
//! own watchers without touching storage.
//!
//! # Usage
//!
//! ```rust,ignore
//! let hub = BroadcastHub::new();
//! let a = Instance::open_in(env.clone(), hub.clone(), "app", schemas.clone(), Config::default())?;
//! let b = Instance::open_in(env, hub, "app", schemas, Config::default())?;
//!
//! a.write_txn(|txn| users_a.put_all(txn, vec![user]))?;
//!
//! // Watchers registered on `b` fire here.
//! b.process_external_changes()?;
//! ```

use crate::error::{CoreError, CoreResult};
use crate::transaction::{ChangeSet, Changes};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;
use weave_codec::{from_cbor, to_canonical_cbor, Value};

const CHANGE_MESSAGE: &str = "change";

/// Messages a subscriber may have queued before further ones are dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// A decoded broadcast message.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeMessage {
    /// Database the changes were committed to.
    pub instance_name: String,
    /// Change sets by collection.
    pub changes: Changes,
}

impl ChangeMessage {
    /// Encodes the message as canonical CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error if a record holds a value CBOR cannot carry.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let changes = Value::object(
            self.changes
                .iter()
                .map(|(name, set)| (name.clone(), set.to_value())),
        );
        let message = Value::object([
            ("type", Value::from(CHANGE_MESSAGE)),
            ("instanceName", Value::from(self.instance_name.as_str())),
            ("changes", changes),
        ]);
        Ok(to_canonical_cbor(&message)?)
    }

    /// Decodes a message. Returns `Ok(None)` for well-formed messages of
    /// other types.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed messages.
    pub fn decode(bytes: &[u8]) -> CoreResult<Option<Self>> {
        let malformed = || CoreError::invalid_operation("malformed broadcast message");
        let message = from_cbor(bytes)?;
        if message.get("type").and_then(Value::as_text) != Some(CHANGE_MESSAGE) {
            return Ok(None);
        }
        let instance_name = message
            .get("instanceName")
            .and_then(Value::as_text)
            .ok_or_else(malformed)?
            .to_string();
        let mut changes = Changes::new();
        for (name, set) in message.get("changes").and_then(Value::as_map).ok_or_else(malformed)? {
            let name = name.as_text().ok_or_else(malformed)?;
            changes.insert(name.to_string(), ChangeSet::from_value(set)?);
        }
        Ok(Some(Self {
            instance_name,
            changes,
        }))
    }
}

struct Subscriber {
    context: Uuid,
    sender: SyncSender<Vec<u8>>,
}

/// Process-local publish/subscribe registry keyed by database name.
///
/// Delivery is best effort. Each subscriber has a bounded queue and
/// messages published while it is full are dropped. Subscribers whose
/// receiver was dropped are removed on the next publish.
pub struct BroadcastHub {
    channels: RwLock<HashMap<String, Vec<Subscriber>>>,
    capacity: usize,
}

static GLOBAL: Lazy<Arc<BroadcastHub>> = Lazy::new(BroadcastHub::new);

impl BroadcastHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Creates an empty hub whose subscribers queue at most `capacity`
    /// undrained messages.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        })
    }

    /// The process-wide hub.
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    /// Subscribes `context` to messages published for `database`.
    pub fn subscribe(&self, database: &str, context: Uuid) -> Receiver<Vec<u8>> {
        let (sender, receiver) = mpsc::sync_channel(self.capacity);
        self.channels
            .write()
            .entry(database.to_string())
            .or_default()
            .push(Subscriber { context, sender });
        receiver
    }

    /// Removes the subscription of `context`.
    pub fn unsubscribe(&self, database: &str, context: Uuid) {
        let mut channels = self.channels.write();
        if let Some(subscribers) = channels.get_mut(database) {
            subscribers.retain(|s| s.context != context);
            if subscribers.is_empty() {
                channels.remove(database);
            }
        }
    }

    /// Publishes `message` to every subscriber of `database` except
    /// `sender`. Returns the number of subscribers reached. Never blocks:
    /// a subscriber with a full queue misses the message.
    pub fn publish(&self, database: &str, sender: Uuid, message: &[u8]) -> usize {
        let mut channels = self.channels.write();
        let Some(subscribers) = channels.get_mut(database) else {
            return 0;
        };
        let mut delivered = 0;
        subscribers.retain(|s| {
            if s.context == sender {
                return true;
            }
            match s.sender.try_send(message.to_vec()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!(database, context = %s.context, "subscriber queue full, dropping message");
                    true
                }
                Err(TrySendError::Disconnected(_)) => {
                    warn!(database, context = %s.context, "dropping disconnected subscriber");
                    false
                }
            }
        });
        delivered
    }

    /// Number of subscribers of `database`.
    #[must_use]
    pub fn subscriber_count(&self, database: &str) -> usize {
        self.channels.read().get(database).map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("databases", &self.channels.read().len())
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;

    fn message() -> ChangeMessage {
        let mut set = ChangeSet::new();
        set.register_change(1, Some(Record::with_id(1).set("name", "a")));
        set.register_change(2, None);
        ChangeMessage {
            instance_name: "db".into(),
            changes: Changes::from([("users".to_string(), set)]),
        }
    }

    #[test]
    fn message_encoding() {
        let msg = message();
        let bytes = msg.encode().unwrap();
        assert_eq!(ChangeMessage::decode(&bytes).unwrap(), Some(msg));

        let other = to_canonical_cbor(&Value::object([("type", "ping")])).unwrap();
        assert_eq!(ChangeMessage::decode(&other).unwrap(), None);
        let bad = to_canonical_cbor(&Value::object([("type", "change")])).unwrap();
        assert!(ChangeMessage::decode(&bad).is_err());
    }

    #[test]
    fn publish_skips_sender_and_other_databases() {
        let hub = BroadcastHub::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let rx_a = hub.subscribe("db", a);
        let rx_b = hub.subscribe("db", b);
        let rx_c = hub.subscribe("other", c);

        assert_eq!(hub.publish("db", a, b"hello"), 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), b"hello".to_vec());
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn disconnected_subscribers_are_dropped() {
        let hub = BroadcastHub::new();
        let sender = Uuid::new_v4();
        drop(hub.subscribe("db", Uuid::new_v4()));
        let _keep = hub.subscribe("db", sender);
        assert_eq!(hub.subscriber_count("db"), 2);

        assert_eq!(hub.publish("db", sender, b"x"), 0);
        assert_eq!(hub.subscriber_count("db"), 1);

        hub.unsubscribe("db", sender);
        assert_eq!(hub.subscriber_count("db"), 0);
    }

    #[test]
    fn full_queue_drops_instead_of_growing() {
        let hub = BroadcastHub::with_capacity(3);
        let (sender, slow) = (Uuid::new_v4(), Uuid::new_v4());
        let rx = hub.subscribe("db", slow);

        let delivered: usize = (0..8u8).map(|i| hub.publish("db", sender, &[i])).sum();
        assert_eq!(delivered, 3);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![vec![0], vec![1], vec![2]]);
        // Still subscribed, and draining makes room again.
        assert_eq!(hub.subscriber_count("db"), 1);
        assert_eq!(hub.publish("db", sender, b"next"), 1);
        assert_eq!(rx.try_recv().unwrap(), b"next".to_vec());
    }
}
