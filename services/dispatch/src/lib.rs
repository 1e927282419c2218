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

//! Signal dispatch service of the SDV runtime.
//!
//! The service transports vehicle signal values between components with
//! three cooperating mechanisms:
//!
//! - a multi-version **signal store**: every signal keeps a small ring of
//!   `(transaction id, value)` pairs, so that readers observe a consistent
//!   snapshot even while writers make progress;
//! - **transactions** that defer a group of writes until finalization and
//!   apply them with one shared transaction id (readers see all of them or
//!   none), or pin a read snapshot against concurrent direct writes;
//! - **transmission triggers**: callback-bearing timing specifications
//!   attached to tx signals, fired periodically, spontaneously on writes,
//!   or deferred through a 1 ms scheduler when a minimum delay between
//!   firings is configured.
//!
//! The [`DispatchService`] is itself a hosted component: it registers into
//! the `sdv-core` catalog as the singleton class `DataDispatchService` and
//! exposes its API through three negotiable capabilities
//! ([`SignalTransmission`], [`SignalAccess`] and [`DispatchTransaction`]).
//! Signal and trigger registration is only permitted while the service is
//! in the configuration phase; value transport only happens while it is
//! running.
//!
//! [`DispatchService`]: struct.DispatchService.html
//! [`SignalTransmission`]: trait.SignalTransmission.html
//! [`SignalAccess`]: trait.SignalAccess.html
//! [`DispatchTransaction`]: trait.DispatchTransaction.html

#![warn(
    missing_debug_implementations,
    missing_docs,
    unsafe_code,
    bare_trait_objects
)]

pub use crate::{
    error::DispatchError,
    service::{
        DispatchService, DispatchTransaction, SignalAccess, SignalTransmission,
        DISPATCH_TRANSACTION_ID, SIGNAL_ACCESS_ID, SIGNAL_TRANSMISSION_ID,
    },
    signal::{
        SignalCallback, SignalDirection, SignalReader, SignalRegistration, SignalWriter,
        Subscription, RING_CAPACITY,
    },
    transaction::Transaction,
    trigger::{TriggerBehavior, TriggerCallback, TriggerHandle},
    value::Value,
};

mod error;
mod service;
mod signal;
mod timer;
mod transaction;
mod trigger;
mod value;
