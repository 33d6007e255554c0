//! The per-connection subscription registry.

use std::collections::HashMap;

use crate::ack::decide;
use crate::{AckDecision, AckMode, SubscriptionError};

/// What the dispatcher needs to hand a MESSAGE to its subscriber.
#[derive(Debug, Clone)]
pub struct Delivery<H> {
    /// Arrival position of this message within its subscription, from 1.
    pub ordinal: u64,
    pub ack_mode: AckMode,
    pub handler: H,
}

struct Entry<H> {
    destination: String,
    ack_mode: AckMode,
    /// Ordinal the next delivered message gets.
    next_ordinal: u64,
    /// Largest ordinal covered by a cumulative ack.
    highest_acked: Option<u64>,
    handler: H,
}

/// Tracks subscriptions for one connection.
///
/// Maps subscription id → (ack mode, handler, ack progress). The handler
/// type is left to the caller; the client stores its message callback here.
///
/// Not thread-safe by itself. The owning connection keeps it behind one
/// mutex and never calls handlers while holding it, which is why
/// [`deliver`](Self::deliver) hands back a clone of the handler instead of
/// invoking it.
///
/// ## Lifecycle
///
/// ```text
/// next_id() → register() → deliver()* / acknowledge()* → remove()
///                                                  └──→ clear() (connection gone)
/// ```
pub struct SubscriptionRegistry<H> {
    next_id: u64,
    entries: HashMap<String, Entry<H>>,
}

impl<H: Clone> SubscriptionRegistry<H> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            entries: HashMap::new(),
        }
    }

    /// Allocates a connection-unique subscription id, skipping ids a
    /// caller has already registered by hand.
    pub fn next_id(&mut self) -> String {
        loop {
            let id = format!("sub-{}", self.next_id);
            self.next_id += 1;
            if !self.entries.contains_key(&id) {
                return id;
            }
        }
    }

    /// Registers a subscription.
    ///
    /// # Errors
    /// [`SubscriptionError::DuplicateId`] if the id is already in use.
    pub fn register(
        &mut self,
        id: impl Into<String>,
        destination: impl Into<String>,
        ack_mode: AckMode,
        handler: H,
    ) -> Result<(), SubscriptionError> {
        let id = id.into();
        if self.entries.contains_key(&id) {
            return Err(SubscriptionError::DuplicateId(id));
        }
        let destination = destination.into();
        tracing::debug!(%id, %destination, %ack_mode, "subscription registered");
        self.entries.insert(
            id,
            Entry {
                destination,
                ack_mode,
                next_ordinal: 1,
                highest_acked: None,
                handler,
            },
        );
        Ok(())
    }

    /// Removes a subscription. Messages still in flight for it will find
    /// nothing in [`deliver`](Self::deliver) and get dropped.
    ///
    /// # Errors
    /// [`SubscriptionError::NotFound`] if the id isn't registered.
    pub fn remove(&mut self, id: &str) -> Result<(), SubscriptionError> {
        self.entries
            .remove(id)
            .map(|entry| {
                tracing::debug!(id, destination = %entry.destination, "subscription removed");
            })
            .ok_or_else(|| SubscriptionError::NotFound(id.to_string()))
    }

    /// Assigns the next ordinal to an arriving message.
    ///
    /// Returns `None` for unknown subscriptions.
    pub fn deliver(&mut self, id: &str) -> Option<Delivery<H>> {
        let entry = self.entries.get_mut(id)?;
        let ordinal = entry.next_ordinal;
        entry.next_ordinal += 1;
        Some(Delivery {
            ordinal,
            ack_mode: entry.ack_mode,
            handler: entry.handler.clone(),
        })
    }

    /// Decides whether an ack/nack of the message at `ordinal` goes on the
    /// wire, and records it if so.
    ///
    /// # Errors
    /// - [`SubscriptionError::NotFound`] — subscription is gone
    /// - [`SubscriptionError::UnknownOrdinal`] — no such message was
    ///   delivered
    pub fn acknowledge(&mut self, id: &str, ordinal: u64) -> Result<AckDecision, SubscriptionError> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| SubscriptionError::NotFound(id.to_string()))?;
        if ordinal == 0 || ordinal >= entry.next_ordinal {
            return Err(SubscriptionError::UnknownOrdinal {
                id: id.to_string(),
                ordinal,
            });
        }
        let decision = decide(entry.ack_mode, &mut entry.highest_acked, ordinal);
        tracing::trace!(id, ordinal, ?decision, "ack decision");
        Ok(decision)
    }

    /// Largest ordinal covered by a cumulative ack, if any.
    pub fn highest_acked(&self, id: &str) -> Option<u64> {
        self.entries.get(id).and_then(|e| e.highest_acked)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Drops every subscription, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<H: Clone> Default for SubscriptionRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}
