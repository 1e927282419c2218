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

//! Assorted utilities shared across the runtime crates.

use env_logger::Builder;
use log::SetLoggerError;

/// A span of time expressed in milliseconds.
pub type Milliseconds = u64;

/// Performs the logger initialization from the `RUST_LOG` environment
/// variable. Repeated calls are harmless.
pub fn init_logger() -> Result<(), SetLoggerError> {
    Builder::from_default_env().try_init()
}
