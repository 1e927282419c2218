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

//! Object repository: instantiates, names, owns and destroys component
//! objects.

use log::{error, trace};
use serde_derive::{Deserialize, Serialize};

use std::{
    collections::HashMap,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, RwLock},
};

use crate::{
    catalog::{Catalog, ClassDescriptor, ObjectKind},
    component::{BuiltObject, Component},
    error::CoreError,
    interfaces::{InterfaceMap, InterfaceSpec},
    lifecycle::ObjectStatus,
};

/// Identifier of an object, unique and monotonically assigned for the life
/// of the repository. Identifiers are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Flags of an object record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectFlags {
    /// The object takes part in lifecycle control.
    pub controlled: bool,
    /// The object was registered from outside the repository.
    pub foreign: bool,
    /// The object lives in an isolated environment.
    pub isolated: bool,
}

/// Snapshot of an object record, as reported by [`Repository::list`].
///
/// [`Repository::list`]: struct.Repository.html#method.list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Object identifier.
    pub id: ObjectId,
    /// Object name, unique within the repository.
    pub name: String,
    /// Name of the class the object was created from.
    pub class_name: String,
    /// Kind of the component.
    pub kind: ObjectKind,
    /// Current lifecycle status.
    pub status: ObjectStatus,
    /// Record flags.
    pub flags: ObjectFlags,
}

/// Non-owning access to a live object.
///
/// The handle shares ownership of the implementation, so capabilities
/// negotiated through it stay valid even if the repository releases the
/// object concurrently.
#[derive(Clone)]
pub struct ObjectHandle {
    id: ObjectId,
    name: String,
    class: Arc<ClassDescriptor>,
    implementation: Arc<dyn Component>,
    interfaces: InterfaceMap,
}

impl ObjectHandle {
    /// Object identifier.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Object name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Descriptor of the object's class.
    pub fn class(&self) -> &ClassDescriptor {
        &self.class
    }

    /// Negotiates access to the interface `T` of the object.
    pub fn query<T>(&self) -> Option<Arc<T>>
    where
        T: InterfaceSpec + ?Sized,
    {
        self.interfaces.query::<T>()
    }

    /// The capability table of the object.
    pub fn interfaces(&self) -> &InterfaceMap {
        &self.interfaces
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("class", &self.class.class_name)
            .finish()
    }
}

pub(crate) struct ObjectEntry {
    pub id: ObjectId,
    pub name: String,
    pub class: Arc<ClassDescriptor>,
    pub flags: ObjectFlags,
    pub status: ObjectStatus,
    pub config: String,
    pub built: BuiltObject,
}

/// Snapshot of an entry used by the orchestrator to call hooks without
/// holding the repository lock.
pub(crate) struct ObjectSnapshot {
    pub id: ObjectId,
    pub name: String,
    pub class: Arc<ClassDescriptor>,
    pub status: ObjectStatus,
    pub config: String,
    pub implementation: Arc<dyn Component>,
}

#[derive(Default)]
struct RepositoryInner {
    objects: Vec<ObjectEntry>,
    next_id: u64,
    instance_counters: HashMap<String, u64>,
}

impl RepositoryInner {
    fn has_live_instance(&self, class_name: &str) -> bool {
        self.objects
            .iter()
            .any(|entry| entry.class.class_name == class_name && entry.status.is_live())
    }
}

/// Owner of the live component objects.
///
/// Object construction is driven by the lifecycle orchestrator; lookups are
/// read-mostly. The repository holds the single strong reference to every
/// implementation; destruction releases objects in reverse creation order.
pub struct Repository {
    catalog: Arc<Catalog>,
    inner: RwLock<RepositoryInner>,
}

impl Repository {
    /// Creates an empty repository resolving classes from `catalog`.
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            inner: RwLock::new(RepositoryInner::default()),
        }
    }

    /// The catalog this repository resolves classes from.
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Creates an object of the given class.
    ///
    /// When `object_name` is `None`, the class's default object name is
    /// used; when that is absent as well, a deterministic unique name of
    /// the form `<class_name>#<n>` is generated. The new object starts in
    /// `InitPending`; initialization is the orchestrator's job.
    ///
    /// # Errors
    ///
    /// `UnknownClass`, `DuplicateObjectName`, `SingletonViolation` and
    /// `DependencyMissing` as described in the crate-level error taxonomy.
    pub fn create(
        &self,
        class_name: &str,
        object_name: Option<&str>,
        config: &str,
    ) -> Result<ObjectId, CoreError> {
        let (class, factory) = self
            .catalog
            .resolve_with_factory(class_name)
            .ok_or_else(|| CoreError::UnknownClass(class_name.to_owned()))?;

        // Construct outside the lock; the factory is user code and may well
        // look other objects up.
        let built = (*factory)(config);

        let mut inner = self.inner.write().expect("repository poisoned");

        for dependency in &class.dependencies {
            if !inner.has_live_instance(dependency) {
                return Err(CoreError::DependencyMissing {
                    class: class.class_name.clone(),
                    dependency: dependency.clone(),
                });
            }
        }

        // Singleton check and insertion share this critical section.
        if class.flags.singleton && inner.has_live_instance(&class.class_name) {
            return Err(CoreError::SingletonViolation(class.class_name.clone()));
        }

        let name = match object_name
            .map(str::to_owned)
            .or_else(|| class.default_object_name.clone())
        {
            Some(name) => {
                if inner.objects.iter().any(|entry| entry.name == name) {
                    return Err(CoreError::DuplicateObjectName(name));
                }
                name
            }
            None => loop {
                let counter = inner
                    .instance_counters
                    .entry(class.class_name.clone())
                    .or_insert(0);
                *counter += 1;
                let candidate = format!("{}#{}", class.class_name, counter);
                if !inner.objects.iter().any(|entry| entry.name == candidate) {
                    break candidate;
                }
            },
        };

        inner.next_id += 1;
        let id = ObjectId(inner.next_id);
        trace!("creating object `{}` {} of class `{}`", name, id, class.class_name);
        inner.objects.push(ObjectEntry {
            id,
            name,
            class,
            flags: ObjectFlags {
                controlled: true,
                foreign: false,
                isolated: false,
            },
            status: ObjectStatus::InitPending,
            config: config.to_owned(),
            built,
        });
        Ok(id)
    }

    /// Looks an object up by name. Total; never blocks beyond the registry
    /// lock.
    pub fn get(&self, object_name: &str) -> Option<ObjectHandle> {
        let inner = self.inner.read().expect("repository poisoned");
        inner
            .objects
            .iter()
            .find(|entry| entry.name == object_name)
            .map(handle_of)
    }

    /// Looks an object up by identifier.
    pub fn get_by_id(&self, id: ObjectId) -> Option<ObjectHandle> {
        let inner = self.inner.read().expect("repository poisoned");
        inner.objects.iter().find(|entry| entry.id == id).map(handle_of)
    }

    /// Lists all objects in creation order.
    pub fn list(&self) -> Vec<ObjectInfo> {
        let inner = self.inner.read().expect("repository poisoned");
        inner.objects.iter().map(info_of).collect()
    }

    /// Destroys a single object: drives it through `shutting_down` and
    /// `destruction_pending`, then releases the strong reference.
    ///
    /// Returns `false` when no object with the given identifier exists.
    pub fn destroy(&self, id: ObjectId) -> bool {
        let implementation = {
            let mut inner = self.inner.write().expect("repository poisoned");
            let entry = match inner.objects.iter_mut().find(|entry| entry.id == id) {
                Some(entry) => entry,
                None => return false,
            };
            entry.status = ObjectStatus::ShuttingDown;
            Arc::clone(&entry.built.implementation)
        };

        run_shutdown_hook(&*implementation, id);

        let mut inner = self.inner.write().expect("repository poisoned");
        if let Some(index) = inner.objects.iter().position(|entry| entry.id == id) {
            inner.objects[index].status = ObjectStatus::DestructionPending;
            inner.objects.remove(index);
        }
        true
    }

    /// Destroys every object in reverse creation order. Used by the
    /// orchestrator after the shutdown pass.
    pub(crate) fn clear(&self) {
        loop {
            let id = {
                let inner = self.inner.read().expect("repository poisoned");
                match inner.objects.last() {
                    Some(entry) => entry.id,
                    None => return,
                }
            };
            self.destroy(id);
        }
    }

    /// Snapshots all entries in creation order.
    pub(crate) fn snapshot(&self) -> Vec<ObjectSnapshot> {
        let inner = self.inner.read().expect("repository poisoned");
        inner
            .objects
            .iter()
            .map(|entry| ObjectSnapshot {
                id: entry.id,
                name: entry.name.clone(),
                class: Arc::clone(&entry.class),
                status: entry.status,
                config: entry.config.clone(),
                implementation: Arc::clone(&entry.built.implementation),
            })
            .collect()
    }

    /// Updates the status of an object, if it still exists.
    pub(crate) fn set_status(&self, id: ObjectId, status: ObjectStatus) {
        let mut inner = self.inner.write().expect("repository poisoned");
        if let Some(entry) = inner.objects.iter_mut().find(|entry| entry.id == id) {
            trace!("object `{}` {}: {} -> {}", entry.name, id, entry.status, status);
            entry.status = status;
        }
    }

    /// Reads the status of an object.
    pub fn status(&self, id: ObjectId) -> Option<ObjectStatus> {
        let inner = self.inner.read().expect("repository poisoned");
        inner
            .objects
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.status)
    }

    /// Whether a class has at least one instance whose initialization
    /// succeeded and which has not failed since.
    pub(crate) fn has_operational_instance(&self, class_name: &str) -> bool {
        let inner = self.inner.read().expect("repository poisoned");
        inner
            .objects
            .iter()
            .any(|entry| entry.class.class_name == class_name && entry.status.is_operational())
    }
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read().expect("repository poisoned");
        f.debug_struct("Repository")
            .field("objects", &inner.objects.len())
            .field("next_id", &inner.next_id)
            .finish()
    }
}

fn handle_of(entry: &ObjectEntry) -> ObjectHandle {
    ObjectHandle {
        id: entry.id,
        name: entry.name.clone(),
        class: Arc::clone(&entry.class),
        implementation: Arc::clone(&entry.built.implementation),
        interfaces: entry.built.interfaces.clone(),
    }
}

fn info_of(entry: &ObjectEntry) -> ObjectInfo {
    ObjectInfo {
        id: entry.id,
        name: entry.name.clone(),
        class_name: entry.class.class_name.clone(),
        kind: entry.class.kind,
        status: entry.status,
        flags: entry.flags,
    }
}

fn run_shutdown_hook(implementation: &dyn Component, id: ObjectId) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| implementation.shutdown()));
    if result.is_err() {
        error!("shutdown hook of object {} panicked", id);
    }
}
