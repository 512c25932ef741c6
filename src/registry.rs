//! # Subscriber registry.
//!
//! [`SubscriberRegistry`] is the only state shared between the ingestion path
//! and the command path (join/leave requests). It is a set of opaque subscriber
//! ids behind a lock; callers never see the set itself, only point-in-time
//! copies.
//!
//! ## Rules
//! - `subscribe` / `unsubscribe` are idempotent: repeating them is a no-op
//! - `snapshot` returns a copy; later changes do not affect it
//! - No call waits on delivery; the lock is held only to copy or mutate the set

use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;

use parking_lot::RwLock;

/// Requirements for a subscriber identifier.
pub trait SubscriberId: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T> SubscriberId for T where T: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

/// Concurrency-safe set of subscriber ids.
///
/// # Example
/// ```
/// use eventrelay::SubscriberRegistry;
///
/// let reg = SubscriberRegistry::new();
/// assert!(reg.subscribe(42_i64));
/// assert!(!reg.subscribe(42_i64));
/// assert!(reg.unsubscribe(&42));
/// assert!(!reg.unsubscribe(&42));
/// assert!(reg.snapshot().is_empty());
/// ```
#[derive(Debug)]
pub struct SubscriberRegistry<Id> {
    ids: RwLock<HashSet<Id>>,
}

impl<Id: SubscriberId> SubscriberRegistry<Id> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            ids: RwLock::new(HashSet::new()),
        }
    }

    /// Adds `id`. Returns `true` if it was not present.
    pub fn subscribe(&self, id: Id) -> bool {
        let added = self.ids.write().insert(id.clone());
        if added {
            tracing::info!(subscriber = ?id, "subscribed");
        }
        added
    }

    /// Removes `id`. Returns `true` if it was present; absent ids are a no-op.
    pub fn unsubscribe(&self, id: &Id) -> bool {
        let removed = self.ids.write().remove(id);
        if removed {
            tracing::info!(subscriber = ?id, "unsubscribed");
        }
        removed
    }

    /// Point-in-time copy of the current members.
    pub fn snapshot(&self) -> HashSet<Id> {
        self.ids.read().clone()
    }

    /// Whether `id` is currently a member.
    pub fn contains(&self, id: &Id) -> bool {
        self.ids.read().contains(id)
    }

    /// Number of subscribers.
    pub fn len(&self) -> usize {
        self.ids.read().len()
    }

    /// True when nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.ids.read().is_empty()
    }
}

impl<Id: SubscriberId> Default for SubscriberRegistry<Id> {
    fn default() -> Self {
        Self::new()
    }
}
