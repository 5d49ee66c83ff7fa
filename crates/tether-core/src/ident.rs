// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Handles and type identifiers.
//!
//! Entities and nested (complex) values live in arenas owned by an
//! [`crate::EntityManager`]. Callers hold small `Copy` handles instead of
//! references, which keeps the object graph (cyclic through navigation
//! properties) free of shared ownership.
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_CACHE_ID: AtomicU32 = AtomicU32::new(1);

/// Identity of one cache instance. Handles carry it so a handle from one
/// manager is rejected by another.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct CacheId(u32);

impl CacheId {
    /// Allocates a process-unique cache id.
    pub(crate) fn fresh() -> Self {
        Self(NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id.
    #[must_use]
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

/// Handle to an entity record owned by an [`crate::EntityManager`].
///
/// Handles stay valid after the entity is detached. They stop resolving once
/// the record is released; a later entity reusing the slot gets a new
/// generation, so an old handle never aliases it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityRef {
    pub(crate) cache: CacheId,
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl EntityRef {
    /// Cache that issued this handle.
    #[must_use]
    pub fn cache(&self) -> CacheId {
        self.cache
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity#{}.{}", self.cache.0, self.index)?;
        if self.generation > 0 {
            write!(f, "@{}", self.generation)?;
        }
        Ok(())
    }
}

/// Handle to a nested value object (complex value) owned by a manager.
/// Generations work as for [`EntityRef`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComplexRef {
    pub(crate) cache: CacheId,
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl ComplexRef {
    /// Cache that issued this handle.
    #[must_use]
    pub fn cache(&self) -> CacheId {
        self.cache
    }
}

impl fmt::Debug for ComplexRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Complex#{}.{}", self.cache.0, self.index)?;
        if self.generation > 0 {
            write!(f, "@{}", self.generation)?;
        }
        Ok(())
    }
}

/// Either kind of structural object: anything that owns data properties.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum StructuralRef {
    /// An entity.
    Entity(EntityRef),
    /// A nested value object.
    Complex(ComplexRef),
}

impl StructuralRef {
    /// Cache that issued the handle.
    #[must_use]
    pub fn cache(&self) -> CacheId {
        match self {
            Self::Entity(e) => e.cache,
            Self::Complex(c) => c.cache,
        }
    }

    /// Returns the entity handle when this is an entity.
    #[must_use]
    pub fn as_entity(&self) -> Option<EntityRef> {
        match self {
            Self::Entity(e) => Some(*e),
            Self::Complex(_) => None,
        }
    }
}

impl From<EntityRef> for StructuralRef {
    fn from(value: EntityRef) -> Self {
        Self::Entity(value)
    }
}

impl From<ComplexRef> for StructuralRef {
    fn from(value: ComplexRef) -> Self {
        Self::Complex(value)
    }
}

/// Index of an entity type within a [`crate::Schema`].
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct EntityTypeId(pub(crate) u32);

/// Index of a complex type within a [`crate::Schema`].
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ComplexTypeId(pub(crate) u32);

/// Either kind of structural type.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum StructuralTypeId {
    /// Keyed, independently tracked type.
    Entity(EntityTypeId),
    /// Keyless value type, owned by its parent.
    Complex(ComplexTypeId),
}

/// A property slot on a structural type: data properties and navigation
/// properties are indexed separately.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum PropertyRef {
    /// Index into the type's data properties.
    Data(usize),
    /// Index into the entity type's navigation properties.
    Navigation(usize),
}
