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

//! The component contract between hosted objects and the runtime.

use std::{fmt, sync::Arc};

use crate::{interfaces::InterfaceMap, lifecycle::OperationMode};

/// Lifecycle hooks of a hosted component object.
///
/// All hooks take `&self`: objects are shared behind `Arc` and manage their
/// internal state with interior mutability. Every hook has a default no-op
/// implementation so that passive objects only implement what they need.
/// The authoritative object status lives on the repository record and is
/// advanced by the lifecycle orchestrator around these hooks.
pub trait Component: Send + Sync + 'static {
    /// Initializes the object with its (opaque) configuration string.
    ///
    /// Returning an error records `InitFailure` on the object record;
    /// dependent objects are subsequently marked failed as well.
    fn initialize(&self, _config: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// Notifies the object of an operation mode change.
    ///
    /// Called in dependency order for forward transitions and in reverse
    /// order for backward transitions. A mode that contradicts the object's
    /// current state is never delivered.
    fn operation_mode(&self, _mode: OperationMode) {}

    /// Called before the object is destroyed.
    ///
    /// Any threads or callbacks that could reach other objects must be
    /// stopped here; the object itself must keep answering interface calls
    /// until the shutdown pass has completed.
    fn shutdown(&self) {}
}

/// A freshly constructed object together with its capability table.
///
/// This is what an [`ObjectFactory`] hands back to the repository: the
/// implementation (which the repository will own) and the immutable map of
/// interfaces the object exposes for negotiation.
///
/// [`ObjectFactory`]: type.ObjectFactory.html
#[derive(Clone)]
pub struct BuiltObject {
    /// The implementation handle. The repository holds the single strong
    /// reference for the lifetime of the object.
    pub implementation: Arc<dyn Component>,
    /// Capabilities exposed by the object.
    pub interfaces: InterfaceMap,
}

impl BuiltObject {
    /// Bundles an implementation with its capability table.
    pub fn new(implementation: Arc<dyn Component>, interfaces: InterfaceMap) -> Self {
        Self {
            implementation,
            interfaces,
        }
    }
}

impl fmt::Debug for BuiltObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltObject")
            .field("interfaces", &self.interfaces)
            .finish()
    }
}

/// Factory constructing a component instance from its configuration blob.
///
/// Registered with the class in the catalog; invoked by the repository on
/// `create`. The configuration string is opaque to the runtime and is also
/// passed to the object's `initialize` hook later on.
pub type ObjectFactory = Arc<dyn Fn(&str) -> BuiltObject + Send + Sync>;
