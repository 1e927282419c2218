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

//! Errors reported by the dispatch service.

use thiserror::Error;

use sdv_core::ObjectStatus;

use crate::signal::SignalDirection;

/// Errors of signal, transaction and trigger operations.
///
/// These are all recovered locally by the caller; the dispatch service never
/// aborts. Writes and reads on existing handles are infallible and do not
/// appear here.
#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum DispatchError {
    /// No signal with the given name exists in the requested direction.
    #[error("no {direction} signal named `{name}` is registered")]
    NotFound {
        /// Requested signal name.
        name: String,
        /// Direction map that was searched.
        direction: SignalDirection,
    },

    /// The trigger parameters describe a trigger that would never fire.
    #[error("the trigger has no cycle time and no spontaneous behavior")]
    InvalidTrigger,

    /// The operation is not permitted in the service's current state.
    #[error("operation not available while the dispatch service is `{0}`")]
    InvalidMode(ObjectStatus),
}

impl DispatchError {
    pub(crate) fn not_found(name: &str, direction: SignalDirection) -> Self {
        DispatchError::NotFound {
            name: name.to_owned(),
            direction,
        }
    }
}
