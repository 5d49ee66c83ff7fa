// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Entity lifecycle states and the actions reported on `entity_changed`.

/// Change-tracking state of an entity.
///
/// Transitions:
/// - Detached → Added | Unchanged (attach)
/// - Unchanged → Modified (first property write outside bulk load)
/// - Unchanged | Modified → Deleted (set_deleted)
/// - Added → Detached (set_deleted)
/// - Added | Modified | Deleted → Unchanged (accept / set_unchanged)
/// - any attached state → Detached (detach)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EntityState {
    /// Tracked with no pending changes.
    Unchanged,
    /// New; will be inserted on save.
    Added,
    /// Tracked with pending changes.
    Modified,
    /// Marked for deletion on save.
    Deleted,
    /// Not tracked by any cache.
    #[default]
    Detached,
}

impl EntityState {
    /// [`EntityState::Unchanged`].
    #[must_use]
    pub fn is_unchanged(self) -> bool {
        self == Self::Unchanged
    }

    /// [`EntityState::Added`].
    #[must_use]
    pub fn is_added(self) -> bool {
        self == Self::Added
    }

    /// [`EntityState::Modified`].
    #[must_use]
    pub fn is_modified(self) -> bool {
        self == Self::Modified
    }

    /// [`EntityState::Deleted`].
    #[must_use]
    pub fn is_deleted(self) -> bool {
        self == Self::Deleted
    }

    /// [`EntityState::Detached`].
    #[must_use]
    pub fn is_detached(self) -> bool {
        self == Self::Detached
    }

    /// Unchanged or Modified: states in which original values are captured.
    #[must_use]
    pub fn is_unchanged_or_modified(self) -> bool {
        matches!(self, Self::Unchanged | Self::Modified)
    }

    /// Added, Modified or Deleted: the entity has pending changes.
    #[must_use]
    pub fn needs_save(self) -> bool {
        matches!(self, Self::Added | Self::Modified | Self::Deleted)
    }
}

/// What happened to an entity, as reported on `entity_changed`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EntityAction {
    /// Attached by the caller.
    Attach,
    /// Attached while merging a query result.
    AttachOnQuery,
    /// Attached while importing.
    AttachOnImport,
    /// Detached.
    Detach,
    /// Updated while merging a query result.
    MergeOnQuery,
    /// Updated while importing.
    MergeOnImport,
    /// Updated while merging a save result.
    MergeOnSave,
    /// A property changed.
    PropertyChange,
    /// The entity state changed.
    EntityStateChange,
    /// Pending changes were accepted.
    AcceptChanges,
    /// Pending changes were rolled back.
    RejectChanges,
    /// The cache was cleared.
    Clear,
}

impl EntityAction {
    /// True for the actions produced by attaching.
    #[must_use]
    pub fn is_attach(self) -> bool {
        matches!(
            self,
            Self::Attach | Self::AttachOnQuery | Self::AttachOnImport
        )
    }

    /// True for the actions produced by merging.
    #[must_use]
    pub fn is_modification(self) -> bool {
        matches!(
            self,
            Self::MergeOnQuery
                | Self::MergeOnImport
                | Self::MergeOnSave
                | Self::PropertyChange
                | Self::EntityStateChange
                | Self::AcceptChanges
                | Self::RejectChanges
        )
    }
}
