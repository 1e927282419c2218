// Copyright 2026 The SDV Core Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Capability negotiation between component objects.
//!
//! Every negotiable interface carries a stable 64-bit identifier. An object
//! publishes the interfaces it implements in an [`InterfaceMap`] built once
//! at construction time; callers query the map by interface type and receive
//! a shared handle, or nothing when the capability is absent. The map is
//! immutable after construction and needs no locking.
//!
//! [`InterfaceMap`]: struct.InterfaceMap.html

use std::{any::Any, collections::BTreeMap, fmt, sync::Arc};

/// Stable identifier of a negotiable interface.
///
/// Identifiers are assigned by the interface definitions and are globally
/// unique across capability definitions; equality is bit-wise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InterfaceId(pub u64);

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Associates an interface type with its stable identifier.
///
/// Implemented for the trait-object type of each negotiable interface, e.g.
///
/// ```
/// use sdv_core::{InterfaceId, InterfaceSpec};
///
/// pub trait Odometer: Send + Sync {
///     fn mileage_km(&self) -> u64;
/// }
///
/// impl InterfaceSpec for dyn Odometer {
///     const ID: InterfaceId = InterfaceId(0x4f64_6f6d_0000_0001);
/// }
/// ```
pub trait InterfaceSpec: Send + Sync + 'static {
    /// The stable identifier of the interface.
    const ID: InterfaceId;
}

type ErasedHandle = Box<dyn Any + Send + Sync>;

/// Immutable per-object table of exposed capabilities.
///
/// A returned handle keeps the implementation alive for as long as the
/// caller holds it; destroying the object cannot invalidate a handle that
/// was handed out before.
#[derive(Clone, Default)]
pub struct InterfaceMap {
    entries: Arc<BTreeMap<InterfaceId, ErasedHandle>>,
}

impl InterfaceMap {
    /// Starts building a new interface map.
    pub fn builder() -> InterfaceMapBuilder {
        InterfaceMapBuilder::default()
    }

    /// Negotiates access to the interface `T`.
    ///
    /// Returns the implementation handle when the object exposes the
    /// capability and `None` otherwise. Total; never blocks.
    pub fn query<T>(&self) -> Option<Arc<T>>
    where
        T: InterfaceSpec + ?Sized,
    {
        self.entries
            .get(&T::ID)
            .and_then(|handle| handle.downcast_ref::<Arc<T>>())
            .map(Arc::clone)
    }

    /// Checks whether a capability with the given identifier is present.
    pub fn contains(&self, id: InterfaceId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Enumerates the identifiers of all exposed capabilities.
    pub fn ids(&self) -> impl Iterator<Item = InterfaceId> + '_ {
        self.entries.keys().copied()
    }

    /// Returns the number of exposed capabilities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the object exposes no capabilities.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for InterfaceMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

/// Builder collecting the capabilities of an object under construction.
#[derive(Default)]
pub struct InterfaceMapBuilder {
    entries: BTreeMap<InterfaceId, ErasedHandle>,
}

impl InterfaceMapBuilder {
    /// Adds an implementation handle for the interface `T`.
    ///
    /// A later entry with the same identifier replaces an earlier one.
    pub fn with<T>(mut self, handle: Arc<T>) -> Self
    where
        T: InterfaceSpec + ?Sized,
    {
        self.entries.insert(T::ID, Box::new(handle));
        self
    }

    /// Freezes the collected entries into an immutable map.
    pub fn build(self) -> InterfaceMap {
        InterfaceMap {
            entries: Arc::new(self.entries),
        }
    }
}

impl fmt::Debug for InterfaceMapBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}
