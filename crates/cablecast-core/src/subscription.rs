//! Channel Subscription registry.
//!
//! The caller owns [`Subscription`] handles. The registry only keeps a weak
//! liveness reference per entry plus the generated [`SubscriptionId`], so it
//! never keeps a subscription alive after the caller releases every clone of
//! its handle. Released entries are pruned lazily when a lookup misses, or by
//! [`SubscriptionRegistry::sweep`].
//!
//! # State Machine
//!
//! ```text
//! ┌─────────┐  confirm  ┌────────────┐  unsubscribe  ┌──────────────┐
//! │ Pending │──────────>│ Subscribed │──────────────>│ Unsubscribed │
//! └─────────┘<──────────└────────────┘               └──────────────┘
//!    │  │   transport lost                                  ↑
//!    │  └───────────────────────────────────────────────────┘
//!    │ reject   ┌──────────┐
//!    └─────────>│ Rejected │
//!               └──────────┘
//! ```

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Weak},
};

use cablecast_proto::ChannelIdentifier;

use crate::{connection::AttemptId, router::Decoder};

/// Generated identity of one registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Raw id value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Subscription state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionState {
    /// Requested (or waiting to be re-requested), not yet confirmed
    Pending,
    /// Confirmed by the server on the current connection
    Subscribed,
    /// Closed by the caller
    Unsubscribed,
    /// Refused by the server
    Rejected,
}

impl SubscriptionState {
    /// Unsubscribed and Rejected are final.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Unsubscribed | Self::Rejected)
    }
}

#[derive(Debug)]
struct Liveness;

/// Caller-owned handle to a channel subscription.
///
/// Cheap to clone. When the last clone is dropped the subscription is
/// released.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: SubscriptionId,
    identifier: ChannelIdentifier,
    _live: Arc<Liveness>,
}

impl Subscription {
    /// Registry identity of this subscription.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Canonical channel identity.
    #[must_use]
    pub fn identifier(&self) -> &ChannelIdentifier {
        &self.identifier
    }
}

impl PartialEq for Subscription {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Subscription {}

/// Entry whose handles were all dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Released {
    /// Id of the pruned entry
    pub id: SubscriptionId,
    /// Channel identity of the pruned entry
    pub identifier: ChannelIdentifier,
    /// Attempt on which the server was last asked to subscribe
    pub requested_on: Option<AttemptId>,
}

/// Result of looking up a channel identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// A caller still holds a handle
    Live(SubscriptionId),
    /// Every handle was dropped; the entry has just been pruned
    Released(Released),
    /// No open subscription for this identity
    Missing,
}

struct Entry<P> {
    identifier: ChannelIdentifier,
    state: SubscriptionState,
    requested_on: Option<AttemptId>,
    decoder: Decoder<P>,
    live: Weak<Liveness>,
}

impl<P> Entry<P> {
    fn is_live(&self) -> bool {
        self.live.strong_count() > 0
    }

    fn is_awaiting(&self, attempt: AttemptId) -> bool {
        self.state == SubscriptionState::Pending && self.requested_on == Some(attempt)
    }
}

/// Token-to-weak-handle registry.
///
/// # Invariants
///
/// - `by_identifier` only indexes non-terminal entries, so at most one open
///   subscription exists per channel identity
/// - Terminal entries stay queryable by id until their handles are dropped
pub struct SubscriptionRegistry<P> {
    entries: HashMap<SubscriptionId, Entry<P>>,
    by_identifier: HashMap<ChannelIdentifier, SubscriptionId>,
    last_id: u64,
}

impl<P> fmt::Debug for SubscriptionRegistry<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("entries", &self.entries.len())
            .field("open", &self.by_identifier.len())
            .finish()
    }
}

impl<P> Default for SubscriptionRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> SubscriptionRegistry<P> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { entries: HashMap::new(), by_identifier: HashMap::new(), last_id: 0 }
    }

    /// Number of tracked entries, including terminal ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the open subscription for `identifier`, pruning it if released.
    pub fn lookup(&mut self, identifier: &ChannelIdentifier) -> Lookup {
        let Some(&id) = self.by_identifier.get(identifier) else {
            return Lookup::Missing;
        };

        match self.entries.get(&id) {
            Some(entry) if entry.is_live() => Lookup::Live(id),
            _ => {
                self.by_identifier.remove(identifier);
                match self.entries.remove(&id) {
                    Some(entry) => Lookup::Released(Released {
                        id,
                        identifier: entry.identifier,
                        requested_on: entry.requested_on,
                    }),
                    None => Lookup::Missing,
                }
            },
        }
    }

    /// Register a new Pending subscription and return its first handle.
    pub fn insert(&mut self, identifier: ChannelIdentifier, decoder: Decoder<P>) -> Subscription {
        self.last_id += 1;
        let id = SubscriptionId(self.last_id);
        let live = Arc::new(Liveness);

        self.entries.insert(id, Entry {
            identifier: identifier.clone(),
            state: SubscriptionState::Pending,
            requested_on: None,
            decoder,
            live: Arc::downgrade(&live),
        });
        self.by_identifier.insert(identifier.clone(), id);

        Subscription { id, identifier, _live: live }
    }

    /// Another handle to a live entry.
    #[must_use]
    pub fn handle(&self, id: SubscriptionId) -> Option<Subscription> {
        let entry = self.entries.get(&id)?;
        let live = entry.live.upgrade()?;
        Some(Subscription { id, identifier: entry.identifier.clone(), _live: live })
    }

    /// True if `subscription` was issued by this registry and its entry is
    /// still tracked.
    ///
    /// Ids are only unique per registry, so a handle from another client can
    /// carry an id that exists here too. The liveness pointer tells them apart.
    #[must_use]
    pub fn owns(&self, subscription: &Subscription) -> bool {
        self.entries
            .get(&subscription.id)
            .is_some_and(|e| std::ptr::eq(e.live.as_ptr(), Arc::as_ptr(&subscription._live)))
    }

    /// Current state of an entry.
    #[must_use]
    pub fn state(&self, id: SubscriptionId) -> Option<SubscriptionState> {
        self.entries.get(&id).map(|e| e.state)
    }

    /// Attempt on which the entry was last requested.
    #[must_use]
    pub fn requested_on(&self, id: SubscriptionId) -> Option<AttemptId> {
        self.entries.get(&id).and_then(|e| e.requested_on)
    }

    /// Decoder declared for an entry.
    #[must_use]
    pub fn decoder(&self, id: SubscriptionId) -> Option<Decoder<P>> {
        self.entries.get(&id).map(|e| e.decoder)
    }

    /// Record that a `subscribe` command was sent on `attempt`.
    pub fn mark_requested(&mut self, id: SubscriptionId, attempt: AttemptId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.requested_on = Some(attempt);
        }
    }

    /// Pending → Subscribed.
    ///
    /// Returns false unless the entry is Pending and was requested on
    /// `attempt`. A confirmation for a request that was never sent on the
    /// current connection is stale.
    pub fn confirm(&mut self, id: SubscriptionId, attempt: AttemptId) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) if entry.is_awaiting(attempt) => {
                entry.state = SubscriptionState::Subscribed;
                true
            },
            _ => false,
        }
    }

    /// Pending → Rejected. Same preconditions as [`Self::confirm`].
    pub fn reject(&mut self, id: SubscriptionId, attempt: AttemptId) -> bool {
        let identifier = match self.entries.get_mut(&id) {
            Some(entry) if entry.is_awaiting(attempt) => {
                entry.state = SubscriptionState::Rejected;
                entry.requested_on = None;
                entry.identifier.clone()
            },
            _ => return false,
        };
        self.by_identifier.remove(&identifier);
        true
    }

    /// Move an open entry to Unsubscribed.
    ///
    /// Returns the attempt the server was asked on, so the caller can decide
    /// whether an `unsubscribe` command is needed. `None` if already terminal.
    pub fn close(&mut self, id: SubscriptionId) -> Option<Option<AttemptId>> {
        let entry = self.entries.get_mut(&id)?;
        if entry.state.is_terminal() {
            return None;
        }

        entry.state = SubscriptionState::Unsubscribed;
        let requested_on = entry.requested_on.take();
        let identifier = entry.identifier.clone();
        self.by_identifier.remove(&identifier);
        Some(requested_on)
    }

    /// Transport lost: every open entry goes back to Pending and must be
    /// requested again on the next connection.
    pub fn transport_lost(&mut self) {
        for entry in self.entries.values_mut() {
            if !entry.state.is_terminal() {
                entry.state = SubscriptionState::Pending;
                entry.requested_on = None;
            }
        }
    }

    /// Drop every entry whose handles are gone.
    ///
    /// Released open entries are returned so the caller can tell the server.
    pub fn sweep(&mut self) -> Vec<Released> {
        let dead: Vec<SubscriptionId> =
            self.entries.iter().filter(|(_, e)| !e.is_live()).map(|(id, _)| *id).collect();

        let mut released = Vec::new();
        for id in dead {
            let Some(entry) = self.entries.remove(&id) else { continue };
            if entry.state.is_terminal() {
                continue;
            }
            self.by_identifier.remove(&entry.identifier);
            released.push(Released {
                id,
                identifier: entry.identifier,
                requested_on: entry.requested_on,
            });
        }
        released.sort_by_key(|r| r.id);
        released
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::router::decode_json;

    fn room(id: &str) -> ChannelIdentifier {
        let params = json!({ "room_id": id }).as_object().cloned().unwrap();
        ChannelIdentifier::new("ChatChannel", params).unwrap()
    }

    fn registry() -> SubscriptionRegistry<Value> {
        SubscriptionRegistry::new()
    }

    #[test]
    fn insert_starts_pending() {
        let mut reg = registry();
        let sub = reg.insert(room("a"), decode_json::<Value>);

        assert_eq!(reg.state(sub.id()), Some(SubscriptionState::Pending));
        assert_eq!(reg.lookup(&room("a")), Lookup::Live(sub.id()));
        assert_eq!(reg.lookup(&room("b")), Lookup::Missing);
    }

    #[test]
    fn confirm_and_reject_only_from_pending() {
        let mut reg = registry();
        let attempt = AttemptId(1);
        let a = reg.insert(room("a"), decode_json::<Value>);
        let b = reg.insert(room("b"), decode_json::<Value>);
        reg.mark_requested(a.id(), attempt);
        reg.mark_requested(b.id(), attempt);

        assert!(reg.confirm(a.id(), attempt));
        assert!(!reg.confirm(a.id(), attempt));
        assert!(!reg.reject(a.id(), attempt));

        assert!(reg.reject(b.id(), attempt));
        assert_eq!(reg.state(b.id()), Some(SubscriptionState::Rejected));
        assert_eq!(reg.lookup(&room("b")), Lookup::Missing);
    }

    #[test]
    fn confirmation_requires_request_on_same_attempt() {
        let mut reg = registry();
        let sub = reg.insert(room("a"), decode_json::<Value>);

        assert!(!reg.confirm(sub.id(), AttemptId(1)));

        reg.mark_requested(sub.id(), AttemptId(1));
        reg.transport_lost();
        assert!(!reg.confirm(sub.id(), AttemptId(2)));
        assert!(!reg.reject(sub.id(), AttemptId(2)));
        assert_eq!(reg.state(sub.id()), Some(SubscriptionState::Pending));

        reg.mark_requested(sub.id(), AttemptId(2));
        assert!(!reg.confirm(sub.id(), AttemptId(1)));
        assert!(reg.confirm(sub.id(), AttemptId(2)));
    }

    #[test]
    fn foreign_handle_with_same_id_is_not_owned() {
        let mut ours = registry();
        let mut theirs = registry();
        let mine = ours.insert(room("a"), decode_json::<Value>);
        let foreign = theirs.insert(room("b"), decode_json::<Value>);

        assert_eq!(mine.id(), foreign.id());
        assert!(ours.owns(&mine));
        assert!(!ours.owns(&foreign));
        assert!(ours.owns(&ours.handle(mine.id()).unwrap()));
    }

    #[test]
    fn dropped_handle_is_pruned_on_lookup() {
        let mut reg = registry();
        let attempt = AttemptId(1);
        let sub = reg.insert(room("a"), decode_json::<Value>);
        let id = sub.id();
        reg.mark_requested(id, attempt);
        drop(sub);

        assert_eq!(
            reg.lookup(&room("a")),
            Lookup::Released(Released { id, identifier: room("a"), requested_on: Some(attempt) })
        );
        assert_eq!(reg.lookup(&room("a")), Lookup::Missing);
        assert!(reg.is_empty());
    }

    #[test]
    fn clones_keep_entry_alive() {
        let mut reg = registry();
        let sub = reg.insert(room("a"), decode_json::<Value>);
        let clone = sub.clone();
        drop(sub);

        assert_eq!(reg.lookup(&room("a")), Lookup::Live(clone.id()));
        assert_eq!(reg.handle(clone.id()), Some(clone));
    }

    #[test]
    fn close_is_terminal_and_idempotent() {
        let mut reg = registry();
        let sub = reg.insert(room("a"), decode_json::<Value>);
        reg.mark_requested(sub.id(), AttemptId(1));
        reg.confirm(sub.id(), AttemptId(1));

        assert_eq!(reg.close(sub.id()), Some(Some(AttemptId(1))));
        assert_eq!(reg.close(sub.id()), None);
        assert_eq!(reg.state(sub.id()), Some(SubscriptionState::Unsubscribed));
        assert_eq!(reg.lookup(&room("a")), Lookup::Missing);
    }

    #[test]
    fn transport_loss_returns_open_entries_to_pending() {
        let mut reg = registry();
        let a = reg.insert(room("a"), decode_json::<Value>);
        let b = reg.insert(room("b"), decode_json::<Value>);
        reg.mark_requested(a.id(), AttemptId(1));
        reg.mark_requested(b.id(), AttemptId(1));
        reg.confirm(a.id(), AttemptId(1));
        reg.reject(b.id(), AttemptId(1));

        reg.transport_lost();

        assert_eq!(reg.state(a.id()), Some(SubscriptionState::Pending));
        assert_eq!(reg.state(b.id()), Some(SubscriptionState::Rejected));
    }

    #[test]
    fn sweep_reports_released_open_entries() {
        let mut reg = registry();
        let a = reg.insert(room("a"), decode_json::<Value>);
        let b = reg.insert(room("b"), decode_json::<Value>);
        let kept = reg.insert(room("c"), decode_json::<Value>);
        reg.mark_requested(b.id(), AttemptId(1));
        reg.reject(b.id(), AttemptId(1));
        let a_id = a.id();
        drop(a);
        drop(b);

        let released = reg.sweep();

        assert_eq!(released.len(), 1);
        assert_eq!(released[0].id, a_id);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.state(kept.id()), Some(SubscriptionState::Pending));
    }
}
