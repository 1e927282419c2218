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

//! Catalog of loaded modules and the component classes they register.

use log::trace;
use serde_derive::{Deserialize, Serialize};

use std::{
    collections::HashMap,
    fmt,
    path::PathBuf,
    sync::{Arc, RwLock},
};

use crate::{component::ObjectFactory, error::CoreError};

/// Identifier of a registered module, assigned by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModuleId(pub u32);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Description of an externally loaded module.
///
/// The catalog does not load anything itself; module discovery and binary
/// loading are the host's concern. The catalog merely records what was
/// loaded and which classes it contributed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleInfo {
    /// File name of the module.
    pub filename: String,
    /// Version string reported by the module.
    pub version: String,
    /// Whether the module takes part in object creation.
    pub active: bool,
    /// Location the module was loaded from.
    pub path: PathBuf,
}

/// The kind of component a class produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectKind {
    /// Infrastructure object of the runtime itself.
    SystemObject,
    /// Abstraction of a vehicle device.
    Device,
    /// Service with a single concern.
    BasicService,
    /// Service composed of other services.
    ComplexService,
    /// Application-level component.
    Application,
    /// Client-side representation of a remote object.
    Proxy,
    /// Server-side representation of a remote client.
    Stub,
    /// Helper object outside the service taxonomy.
    Utility,
}

/// Behavioral flags of a class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassFlags {
    /// At most one live instance of the class may exist.
    pub singleton: bool,
}

/// Immutable description of a registered component class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassDescriptor {
    /// Unique class name.
    pub class_name: String,
    /// Alternative names the class can be resolved by.
    pub aliases: Vec<String>,
    /// Object name used when `create` is called without one.
    pub default_object_name: Option<String>,
    /// Component kind.
    pub kind: ObjectKind,
    /// Behavioral flags.
    pub flags: ClassFlags,
    /// Module the class was registered from.
    pub module_id: ModuleId,
    /// Class names this class depends on. Instances of every dependency
    /// must exist before an instance of this class can be created.
    pub dependencies: Vec<String>,
}

impl ClassDescriptor {
    /// Creates a descriptor with the given name and kind and no aliases,
    /// default name, flags or dependencies.
    pub fn new(class_name: impl Into<String>, kind: ObjectKind, module_id: ModuleId) -> Self {
        Self {
            class_name: class_name.into(),
            aliases: Vec::new(),
            default_object_name: None,
            kind,
            flags: ClassFlags::default(),
            module_id,
            dependencies: Vec::new(),
        }
    }

    /// Adds an alias.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Sets the default object name.
    pub fn with_default_object_name(mut self, name: impl Into<String>) -> Self {
        self.default_object_name = Some(name.into());
        self
    }

    /// Marks the class as singleton.
    pub fn singleton(mut self) -> Self {
        self.flags.singleton = true;
        self
    }

    /// Adds a class-name dependency.
    pub fn with_dependency(mut self, class_name: impl Into<String>) -> Self {
        self.dependencies.push(class_name.into());
        self
    }

    fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.class_name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

struct ClassRecord {
    descriptor: Arc<ClassDescriptor>,
    factory: ObjectFactory,
}

#[derive(Default)]
struct CatalogInner {
    modules: Vec<ModuleInfo>,
    classes: Vec<ClassRecord>,
}

impl CatalogInner {
    fn find(&self, name: &str) -> Option<&ClassRecord> {
        // Class names take precedence over aliases; the registration-time
        // collision check keeps ties impossible.
        self.classes
            .iter()
            .find(|record| record.descriptor.class_name == name)
            .or_else(|| {
                self.classes
                    .iter()
                    .find(|record| record.descriptor.aliases.iter().any(|alias| alias == name))
            })
    }
}

/// Ordered tables of registered modules and classes.
#[derive(Default)]
pub struct Catalog {
    inner: RwLock<CatalogInner>,
}

impl Catalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an externally loaded module and returns its identifier.
    pub fn register_module(&self, info: ModuleInfo) -> ModuleId {
        let mut inner = self.inner.write().expect("catalog poisoned");
        trace!("registering module `{}` ({})", info.filename, info.version);
        inner.modules.push(info);
        ModuleId(inner.modules.len() as u32)
    }

    /// Registers a class with the factory producing its instances.
    ///
    /// # Errors
    ///
    /// - `DuplicateClass` when the class name or any alias collides with an
    ///   already registered name or alias.
    /// - `CircularDependency` when the declared dependencies close a cycle
    ///   among the registered classes.
    pub fn register_class(
        &self,
        descriptor: ClassDescriptor,
        factory: ObjectFactory,
    ) -> Result<(), CoreError> {
        let mut inner = self.inner.write().expect("catalog poisoned");

        for name in descriptor.names() {
            if inner.find(name).is_some() {
                return Err(CoreError::DuplicateClass(name.to_owned()));
            }
        }
        if let Some(through) = find_cycle(&inner, &descriptor) {
            return Err(CoreError::CircularDependency {
                class: descriptor.class_name.clone(),
                through,
            });
        }

        trace!(
            "registering class `{}` from module {}",
            descriptor.class_name,
            descriptor.module_id
        );
        inner.classes.push(ClassRecord {
            descriptor: Arc::new(descriptor),
            factory,
        });
        Ok(())
    }

    /// Resolves a class by name or alias (case-sensitive, names first).
    pub fn resolve(&self, name: &str) -> Option<Arc<ClassDescriptor>> {
        let inner = self.inner.read().expect("catalog poisoned");
        inner.find(name).map(|record| Arc::clone(&record.descriptor))
    }

    /// Resolves a class together with its factory.
    pub(crate) fn resolve_with_factory(
        &self,
        name: &str,
    ) -> Option<(Arc<ClassDescriptor>, ObjectFactory)> {
        let inner = self.inner.read().expect("catalog poisoned");
        inner
            .find(name)
            .map(|record| (Arc::clone(&record.descriptor), Arc::clone(&record.factory)))
    }

    /// Lists the registered modules in registration order.
    pub fn list_modules(&self) -> Vec<(ModuleId, ModuleInfo)> {
        let inner = self.inner.read().expect("catalog poisoned");
        inner
            .modules
            .iter()
            .enumerate()
            .map(|(index, info)| (ModuleId(index as u32 + 1), info.clone()))
            .collect()
    }

    /// Lists registered classes, optionally restricted to one module.
    pub fn list_classes(&self, module: Option<ModuleId>) -> Vec<Arc<ClassDescriptor>> {
        let inner = self.inner.read().expect("catalog poisoned");
        inner
            .classes
            .iter()
            .filter(|record| module.map_or(true, |id| record.descriptor.module_id == id))
            .map(|record| Arc::clone(&record.descriptor))
            .collect()
    }

    /// Assigns every registered class a rank such that a class always ranks
    /// strictly higher than all of its dependencies. Classes without
    /// registered dependencies rank 0.
    ///
    /// The registration-time cycle check guarantees termination.
    pub(crate) fn dependency_ranks(&self) -> HashMap<String, u32> {
        let inner = self.inner.read().expect("catalog poisoned");
        let mut ranks = HashMap::new();
        for record in &inner.classes {
            rank_of(&inner, &record.descriptor.class_name, &mut ranks);
        }
        ranks
    }
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read().expect("catalog poisoned");
        f.debug_struct("Catalog")
            .field("modules", &inner.modules.len())
            .field("classes", &inner.classes.len())
            .finish()
    }
}

fn rank_of(inner: &CatalogInner, class_name: &str, ranks: &mut HashMap<String, u32>) -> u32 {
    if let Some(rank) = ranks.get(class_name) {
        return *rank;
    }
    let rank = match inner.find(class_name) {
        Some(record) => {
            let descriptor = Arc::clone(&record.descriptor);
            descriptor
                .dependencies
                .iter()
                .map(|dep| rank_of(inner, dep, ranks).saturating_add(1))
                .max()
                .unwrap_or(0)
        }
        // Unregistered dependencies cannot order anything.
        None => 0,
    };
    ranks.insert(class_name.to_owned(), rank);
    rank
}

/// Searches for a dependency path from `candidate` back to itself through
/// the already registered classes. Returns the first class on such a path.
fn find_cycle(inner: &CatalogInner, candidate: &ClassDescriptor) -> Option<String> {
    fn reaches(inner: &CatalogInner, from: &str, target: &ClassDescriptor, seen: &mut Vec<String>) -> bool {
        if target.names().any(|name| name == from) {
            return true;
        }
        if seen.iter().any(|s| s == from) {
            return false;
        }
        seen.push(from.to_owned());
        match inner.find(from) {
            Some(record) => record
                .descriptor
                .dependencies
                .iter()
                .any(|dep| reaches(inner, dep, target, seen)),
            None => false,
        }
    }

    let mut seen = Vec::new();
    candidate
        .dependencies
        .iter()
        .find(|dep| reaches(inner, dep, candidate, &mut seen))
        .cloned()
}
