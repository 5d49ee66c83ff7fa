// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Publish/subscribe channels and hierarchical enable switches.
//!
//! Subscribers are plain closures. A channel delivers synchronously by
//! default; [`PublishMode::Deferred`] parks the payload until the owner calls
//! [`Event::flush_deferred`] (the manager exposes this as
//! `run_deferred_notifications`).
use std::collections::VecDeque;
use std::fmt;
use std::hash::Hash;

use rustc_hash::FxHashMap;

/// Opaque handle returned by [`Event::subscribe`].
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SubscriptionToken(u64);

/// Delivery mode for a publication.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum PublishMode {
    /// Invoke subscribers before `publish` returns.
    #[default]
    Sync,
    /// Queue until the next flush.
    Deferred,
}

type Callback<T> = Box<dyn FnMut(&T) + Send>;

/// A named notification channel.
pub struct Event<T> {
    name: &'static str,
    next_token: u64,
    subscribers: Vec<(SubscriptionToken, Callback<T>)>,
    deferred: VecDeque<T>,
}

impl<T> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("subscribers", &self.subscribers.len())
            .field("deferred", &self.deferred.len())
            .finish()
    }
}

impl<T> Event<T> {
    /// Creates a channel with no subscribers.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            next_token: 1,
            subscribers: Vec::new(),
            deferred: VecDeque::new(),
        }
    }

    /// Channel name (used by enable switches).
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Registers `callback`; the returned token unsubscribes it.
    pub fn subscribe(&mut self, callback: impl FnMut(&T) + Send + 'static) -> SubscriptionToken {
        let token = SubscriptionToken(self.next_token);
        self.next_token += 1;
        self.subscribers.push((token, Box::new(callback)));
        token
    }

    /// Removes a subscription. Returns `false` for unknown tokens.
    pub fn unsubscribe(&mut self, token: SubscriptionToken) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(t, _)| *t != token);
        self.subscribers.len() != before
    }

    /// True when at least one subscriber is registered.
    #[must_use]
    pub fn has_subscribers(&self) -> bool {
        !self.subscribers.is_empty()
    }

    /// Delivers (or queues) `data`. Returns `false` when nobody listens.
    pub fn publish(&mut self, data: T, mode: PublishMode) -> bool {
        if self.subscribers.is_empty() {
            return false;
        }
        match mode {
            PublishMode::Sync => self.deliver(&data),
            PublishMode::Deferred => self.deferred.push_back(data),
        }
        true
    }

    /// Delivers queued publications in FIFO order; returns how many ran.
    pub fn flush_deferred(&mut self) -> usize {
        let mut delivered = 0;
        while let Some(data) = self.deferred.pop_front() {
            self.deliver(&data);
            delivered += 1;
        }
        delivered
    }

    fn deliver(&mut self, data: &T) {
        for (_, cb) in &mut self.subscribers {
            cb(data);
        }
    }
}

/// Enablement of a channel at one scope: a flat flag or a predicate over
/// the scope it is evaluated at.
pub enum Enablement<S> {
    /// Fixed on/off.
    Flag(bool),
    /// Evaluated per query.
    When(Box<dyn Fn(&S) -> bool + Send>),
}

impl<S> fmt::Debug for Enablement<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag(b) => f.debug_tuple("Flag").field(b).finish(),
            Self::When(_) => f.write_str("When(..)"),
        }
    }
}

/// Per-scope enable switches. A scope without an explicit switch defers to
/// its parent (as computed by the caller-supplied lookup); the root default
/// is enabled.
pub struct EventSwitches<S> {
    entries: FxHashMap<(&'static str, S), Enablement<S>>,
    parent_of: fn(&S) -> Option<S>,
}

impl<S> fmt::Debug for EventSwitches<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSwitches")
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl<S: Clone + Eq + Hash> EventSwitches<S> {
    /// Creates an empty switch table using `parent_of` to walk scopes.
    #[must_use]
    pub fn new(parent_of: fn(&S) -> Option<S>) -> Self {
        Self {
            entries: FxHashMap::default(),
            parent_of,
        }
    }

    /// Sets the switch for `name` at `scope`.
    pub fn enable(&mut self, name: &'static str, scope: S, enablement: Enablement<S>) {
        self.entries.insert((name, scope), enablement);
    }

    /// Removes an explicit switch so `scope` defers to its parent again.
    pub fn clear(&mut self, name: &'static str, scope: &S) -> bool {
        self.entries.remove(&(name, scope.clone())).is_some()
    }

    /// Resolves the switch for `name` starting at `scope`.
    #[must_use]
    pub fn is_enabled(&self, name: &'static str, scope: &S) -> bool {
        let mut current = Some(scope.clone());
        while let Some(s) = current {
            if let Some(e) = self.entries.get(&(name, s.clone())) {
                return match e {
                    Enablement::Flag(b) => *b,
                    Enablement::When(pred) => pred(&s),
                };
            }
            current = (self.parent_of)(&s);
        }
        true
    }
}
