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

//! Errors reported by the catalog and the object repository.

use thiserror::Error;

/// Errors surfaced by registry operations.
///
/// Registry errors always propagate to the caller; none of them is fatal to
/// the process. Failures inside component hooks are not errors in this sense:
/// they are recorded on the object record as `InitFailure` / `RuntimeError`
/// statuses instead.
#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum CoreError {
    /// The requested class is not registered in the catalog.
    #[error("unknown class `{0}`")]
    UnknownClass(String),

    /// A class name or alias collides with an already registered one.
    #[error("class name or alias `{0}` is already registered")]
    DuplicateClass(String),

    /// The requested object name is already in use in the repository.
    #[error("object name `{0}` is already in use")]
    DuplicateObjectName(String),

    /// The class is flagged singleton and a live instance already exists.
    #[error("class `{0}` is a singleton and already has a live instance")]
    SingletonViolation(String),

    /// The declared dependencies of a class close a cycle.
    #[error("dependencies of class `{class}` form a cycle through `{through}`")]
    CircularDependency {
        /// Class whose registration was rejected.
        class: String,
        /// First class on the cycle reported back to the caller.
        through: String,
    },

    /// A declared dependency class has no live instance.
    #[error("class `{class}` depends on `{dependency}` which has no live instance")]
    DependencyMissing {
        /// Class of the object that was to be created.
        class: String,
        /// The dependency that is not satisfied.
        dependency: String,
    },
}
