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

//! Signal records, their multi-version value ring and the access handles.

use log::error;
use serde_derive::{Deserialize, Serialize};

use std::{
    collections::BTreeMap,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, Weak},
};

use sdv_core::ObjectStatus;

use crate::{
    service::ServiceCore,
    transaction::Transaction,
    trigger::{ExecutionReason, Trigger},
    value::Value,
};

/// Number of `(transaction id, value)` slots each signal keeps.
///
/// When more distinct transaction ids than slots are written, the oldest
/// slot is evicted; a read through a transaction at least as old as the
/// evicted id yields the signal's default value.
pub const RING_CAPACITY: usize = 16;

/// Direction of a signal.
///
/// Signal names are unique within one direction; an rx and a tx signal may
/// share a name without being related.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalDirection {
    /// Received from the vehicle, consumed by components.
    Rx,
    /// Produced by components, transmitted to the vehicle.
    Tx,
}

impl fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalDirection::Rx => f.write_str("rx"),
            SignalDirection::Tx => f.write_str("tx"),
        }
    }
}

/// One entry of the signal enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalRegistration {
    /// Signal name.
    pub name: String,
    /// Signal direction.
    pub direction: SignalDirection,
}

/// Push callback of a subscription, invoked with every distributed value.
pub type SignalCallback = Arc<dyn Fn(&Value) + Send + Sync>;

struct Slot {
    transaction_id: u64,
    value: Value,
}

struct ValueRing {
    slots: Vec<Slot>,
    newest: usize,
}

impl ValueRing {
    fn new(default: &Value) -> Self {
        let slots = (0..RING_CAPACITY)
            .map(|_| Slot {
                transaction_id: 0,
                value: default.clone(),
            })
            .collect();
        Self { slots, newest: 0 }
    }
}

#[derive(Default)]
struct Endpoints {
    next_id: u64,
    providers: Vec<u64>,
    consumers: BTreeMap<u64, Option<SignalCallback>>,
}

/// A named value channel with multi-version storage.
///
/// The record lives in one of the service's two direction maps and is
/// removed when the last provider and the last consumer endpoint are gone.
pub(crate) struct Signal {
    core: Weak<ServiceCore>,
    name: String,
    direction: SignalDirection,
    default: Value,
    ring: Mutex<ValueRing>,
    endpoints: Mutex<Endpoints>,
    triggers: Mutex<BTreeMap<u64, Weak<Trigger>>>,
}

impl Signal {
    pub fn new(
        core: Weak<ServiceCore>,
        name: impl Into<String>,
        direction: SignalDirection,
        default: Value,
    ) -> Self {
        let ring = ValueRing::new(&default);
        Self {
            core,
            name: name.into(),
            direction,
            default,
            ring: Mutex::new(ring),
            endpoints: Mutex::new(Endpoints::default()),
            triggers: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> SignalDirection {
        self.direction
    }

    /// Stores a value and collects the triggers to fire.
    ///
    /// `transaction_id` is `None` for direct writes, which use the service's
    /// current direct transaction id. A slot is only advanced for an id
    /// strictly newer than the newest slot; writes with the newest id
    /// coalesce in place (this is what makes a finalized write transaction
    /// atomic). Values are dropped unless the service is running.
    ///
    /// The collected triggers are executed by the caller once all locks are
    /// released.
    pub fn write_from_provider(
        &self,
        value: &Value,
        transaction_id: Option<u64>,
        fired: &mut BTreeMap<u64, Arc<Trigger>>,
    ) {
        let core = match self.core.upgrade() {
            Some(core) => core,
            None => return,
        };
        if core.status() != ObjectStatus::Running {
            return;
        }
        let transaction_id = transaction_id.unwrap_or_else(|| core.direct_transaction_id());

        {
            let mut ring = self.ring.lock().expect("value ring poisoned");
            let newest = ring.newest;
            if ring.slots[newest].transaction_id < transaction_id {
                let advanced = (newest + 1) % RING_CAPACITY;
                ring.slots[advanced].transaction_id = transaction_id;
                ring.newest = advanced;
            }
            let newest = ring.newest;
            ring.slots[newest].value = value.clone();
        }

        {
            let triggers = self.triggers.lock().expect("trigger set poisoned");
            for (id, trigger) in triggers.iter() {
                if let Some(trigger) = trigger.upgrade() {
                    fired.entry(*id).or_insert(trigger);
                }
            }
        }

        self.distribute(value);
    }

    /// Returns the value visible at the given transaction id (`None` reads
    /// the most recent value).
    ///
    /// The ring is scanned from the newest slot towards older ones; the
    /// first slot at most as new as the requested id wins. When even the
    /// oldest retained slot is newer, the transaction is too old and the
    /// default value is returned.
    pub fn read(&self, transaction_id: Option<u64>) -> Value {
        let ring = self.ring.lock().expect("value ring poisoned");
        let target = transaction_id.unwrap_or_else(|| ring.slots[ring.newest].transaction_id);
        let mut index = ring.newest;
        loop {
            if ring.slots[index].transaction_id <= target {
                return ring.slots[index].value.clone();
            }
            index = (index + RING_CAPACITY - 1) % RING_CAPACITY;
            if index == ring.newest {
                return self.default.clone();
            }
        }
    }

    /// Whether the currently visible value equals the default value.
    pub fn equals_default(&self) -> bool {
        self.read(None) == self.default
    }

    /// Pushes a value to every subscribed consumer. Runs on the writer's
    /// thread with no signal lock held; a panicking callback is contained
    /// and logged.
    fn distribute(&self, value: &Value) {
        if let Some(core) = self.core.upgrade() {
            if core.status() != ObjectStatus::Running {
                return;
            }
        } else {
            return;
        }

        let callbacks: Vec<SignalCallback> = {
            let endpoints = self.endpoints.lock().expect("endpoint table poisoned");
            endpoints
                .consumers
                .values()
                .filter_map(|callback| callback.clone())
                .collect()
        };
        for callback in callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| (*callback)(value))).is_err() {
                error!(
                    "subscriber callback of signal `{}` ({}) panicked",
                    self.name, self.direction
                );
            }
        }
    }

    pub fn add_provider(&self) -> u64 {
        let mut endpoints = self.endpoints.lock().expect("endpoint table poisoned");
        endpoints.next_id += 1;
        let id = endpoints.next_id;
        endpoints.providers.push(id);
        id
    }

    pub fn remove_provider(&self, id: u64) {
        let unregister = {
            let mut endpoints = self.endpoints.lock().expect("endpoint table poisoned");
            endpoints.providers.retain(|provider| *provider != id);
            endpoints.providers.is_empty() && endpoints.consumers.is_empty()
        };
        if unregister {
            self.unregister();
        }
    }

    pub fn add_consumer(&self, callback: Option<SignalCallback>) -> u64 {
        let mut endpoints = self.endpoints.lock().expect("endpoint table poisoned");
        endpoints.next_id += 1;
        let id = endpoints.next_id;
        endpoints.consumers.insert(id, callback);
        id
    }

    pub fn remove_consumer(&self, id: u64) {
        let consumers_left = {
            let mut endpoints = self.endpoints.lock().expect("endpoint table poisoned");
            endpoints.consumers.remove(&id);
            !endpoints.consumers.is_empty()
        };

        if !consumers_left {
            // Nobody reads this signal any more; detach it from every
            // trigger that still references it.
            let attached: Vec<Arc<Trigger>> = {
                let triggers = self.triggers.lock().expect("trigger set poisoned");
                triggers.values().filter_map(Weak::upgrade).collect()
            };
            for trigger in attached {
                trigger.remove_signal(&self.name);
            }
        }

        let unregister = {
            let endpoints = self.endpoints.lock().expect("endpoint table poisoned");
            endpoints.providers.is_empty() && endpoints.consumers.is_empty()
        };
        if unregister {
            self.unregister();
        }
    }

    pub fn add_trigger(&self, id: u64, trigger: Weak<Trigger>) {
        let mut triggers = self.triggers.lock().expect("trigger set poisoned");
        triggers.insert(id, trigger);
    }

    pub fn remove_trigger(&self, id: u64) {
        let mut triggers = self.triggers.lock().expect("trigger set poisoned");
        triggers.remove(&id);
    }

    fn unregister(&self) {
        if let Some(core) = self.core.upgrade() {
            core.unregister_signal(&self.name, self.direction);
        }
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .finish()
    }
}

fn read_with(signal: &Signal, transaction: Option<&Transaction>) -> Value {
    let transaction_id = transaction.and_then(Transaction::read_transaction_id);
    signal.read(transaction_id)
}

/// Reading side of a registered tx signal.
///
/// Returned by `register_tx_signal`: the transmitting transport reads what
/// the publishers wrote. Dropping the handle releases the endpoint; the
/// signal itself disappears with its last endpoint.
pub struct SignalReader {
    signal: Arc<Signal>,
    endpoint: u64,
}

impl SignalReader {
    pub(crate) fn new(signal: Arc<Signal>) -> Self {
        let endpoint = signal.add_consumer(None);
        Self { signal, endpoint }
    }

    /// The signal name.
    pub fn name(&self) -> &str {
        self.signal.name()
    }

    /// Reads the signal value, optionally pinned to a read transaction.
    pub fn read(&self, transaction: Option<&Transaction>) -> Value {
        read_with(&self.signal, transaction)
    }
}

impl Drop for SignalReader {
    fn drop(&mut self) {
        self.signal.remove_consumer(self.endpoint);
    }
}

impl fmt::Debug for SignalReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalReader")
            .field("signal", &self.signal.name())
            .finish()
    }
}

/// Writing side of a signal.
///
/// Returned by `register_rx_signal` (the receiving transport writes what
/// the vehicle delivered) and by `request_publisher` (components write tx
/// signals).
pub struct SignalWriter {
    signal: Arc<Signal>,
    endpoint: u64,
}

impl SignalWriter {
    pub(crate) fn new(signal: Arc<Signal>) -> Self {
        let endpoint = signal.add_provider();
        Self { signal, endpoint }
    }

    /// The signal name.
    pub fn name(&self) -> &str {
        self.signal.name()
    }

    /// Writes a value directly: it becomes visible immediately, subscribers
    /// are notified on this thread and spontaneous triggers fire.
    pub fn write(&self, value: impl Into<Value>) {
        self.write_with(value, None);
    }

    /// Writes a value, deferring it when a transaction is supplied.
    ///
    /// Deferred values take effect together when the transaction finishes.
    pub fn write_with(&self, value: impl Into<Value>, transaction: Option<&Transaction>) {
        let value = value.into();
        if let Some(transaction) = transaction {
            transaction.defer_write(&self.signal, value);
            return;
        }

        let mut fired = BTreeMap::new();
        self.signal.write_from_provider(&value, None, &mut fired);
        for trigger in fired.values() {
            Arc::clone(trigger).execute(ExecutionReason::Spontaneous);
        }
    }
}

impl Drop for SignalWriter {
    fn drop(&mut self) {
        self.signal.remove_provider(self.endpoint);
    }
}

impl fmt::Debug for SignalWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalWriter")
            .field("signal", &self.signal.name())
            .finish()
    }
}

/// A subscription to an rx signal.
///
/// Carries the push callback registered with `add_subscription` and also
/// allows direct reads.
pub struct Subscription {
    signal: Arc<Signal>,
    endpoint: u64,
}

impl Subscription {
    pub(crate) fn new(signal: Arc<Signal>, callback: SignalCallback) -> Self {
        let endpoint = signal.add_consumer(Some(callback));
        Self { signal, endpoint }
    }

    /// The signal name.
    pub fn name(&self) -> &str {
        self.signal.name()
    }

    /// Reads the signal value, optionally pinned to a read transaction.
    pub fn read(&self, transaction: Option<&Transaction>) -> Value {
        read_with(&self.signal, transaction)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.signal.remove_consumer(self.endpoint);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("signal", &self.signal.name())
            .finish()
    }
}
