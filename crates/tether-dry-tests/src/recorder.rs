// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Notification capture.

use std::sync::{Arc, Mutex, MutexGuard};

use tether_core::{
    CollectionChangedArgs, EntityAction, EntityChangedArgs, EntityManager, EntityRef,
    PropertyChangedArgs, ValidationErrorsChangedArgs,
};

/// One captured notification, tagged by channel.
#[derive(Clone, PartialEq, Debug)]
pub enum Recorded {
    /// `entity_changed`.
    Entity(EntityChangedArgs),
    /// `property_changed`.
    Property(PropertyChangedArgs),
    /// `has_changes_changed`.
    HasChanges(bool),
    /// `validation_errors_changed`.
    Validation(ValidationErrorsChangedArgs),
    /// `collection_changed` (cache-wide channel).
    Collection(CollectionChangedArgs),
}

/// Subscribes to every cache-wide channel of a manager and keeps what
/// arrives, in arrival order.
#[derive(Clone, Default)]
pub struct EventRecorder {
    log: Arc<Mutex<Vec<Recorded>>>,
}

impl EventRecorder {
    /// Starts recording everything `em` publishes.
    pub fn attach(em: &mut EntityManager) -> Self {
        let recorder = Self::default();
        let events = em.events_mut();
        let log = Arc::clone(&recorder.log);
        events
            .entity_changed
            .subscribe(move |a| push(&log, Recorded::Entity(a.clone())));
        let log = Arc::clone(&recorder.log);
        events
            .property_changed
            .subscribe(move |a| push(&log, Recorded::Property(a.clone())));
        let log = Arc::clone(&recorder.log);
        events
            .has_changes_changed
            .subscribe(move |a| push(&log, Recorded::HasChanges(a.has_changes)));
        let log = Arc::clone(&recorder.log);
        events
            .validation_errors_changed
            .subscribe(move |a| push(&log, Recorded::Validation(a.clone())));
        let log = Arc::clone(&recorder.log);
        events
            .collection_changed
            .subscribe(move |a| push(&log, Recorded::Collection(a.clone())));
        recorder
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Recorded>> {
        self.log.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Everything recorded so far.
    pub fn all(&self) -> Vec<Recorded> {
        self.lock().clone()
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// `entity_changed` actions with their entity.
    pub fn entity_actions(&self) -> Vec<(EntityAction, Option<EntityRef>)> {
        self.lock()
            .iter()
            .filter_map(|r| match r {
                Recorded::Entity(a) => Some((a.action, a.entity)),
                _ => None,
            })
            .collect()
    }

    /// `entity_changed` actions reported for `e`.
    pub fn actions_for(&self, e: EntityRef) -> Vec<EntityAction> {
        self.entity_actions()
            .into_iter()
            .filter(|(_, entity)| *entity == Some(e))
            .map(|(action, _)| action)
            .collect()
    }

    /// `property_changed` payloads.
    pub fn property_changes(&self) -> Vec<PropertyChangedArgs> {
        self.lock()
            .iter()
            .filter_map(|r| match r {
                Recorded::Property(a) => Some(a.clone()),
                _ => None,
            })
            .collect()
    }

    /// Cache-wide `collection_changed` payloads.
    pub fn collection_changes(&self) -> Vec<CollectionChangedArgs> {
        self.lock()
            .iter()
            .filter_map(|r| match r {
                Recorded::Collection(a) => Some(a.clone()),
                _ => None,
            })
            .collect()
    }

    /// `has_changes_changed` values in order.
    pub fn has_changes_flips(&self) -> Vec<bool> {
        self.lock()
            .iter()
            .filter_map(|r| match r {
                Recorded::HasChanges(v) => Some(*v),
                _ => None,
            })
            .collect()
    }

    /// `validation_errors_changed` payloads.
    pub fn validation_changes(&self) -> Vec<ValidationErrorsChangedArgs> {
        self.lock()
            .iter()
            .filter_map(|r| match r {
                Recorded::Validation(a) => Some(a.clone()),
                _ => None,
            })
            .collect()
    }
}

fn push(log: &Arc<Mutex<Vec<Recorded>>>, event: Recorded) {
    log.lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .push(event);
}
