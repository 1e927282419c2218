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

//! Transactions bracketing a group of writes or a read snapshot.

use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Mutex, Weak},
};

use crate::{
    service::ServiceCore,
    signal::{Signal, SignalDirection},
    trigger::ExecutionReason,
    value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionMode {
    Undefined,
    Read,
    Write,
}

struct TransactionState {
    mode: TransactionMode,
    deferred: BTreeMap<(SignalDirection, String), (Arc<Signal>, Value)>,
    discarded: bool,
}

/// A transaction created by the dispatch service.
///
/// A fresh transaction is of undefined kind; the first read through it
/// makes it a read transaction, the first deferred write makes it a write
/// transaction. The other kind of operation is ignored from then on.
///
/// - A **read transaction** observes the values that were current when the
///   transaction was created: repeated reads return equal values no matter
///   what direct writes happen in between.
/// - A **write transaction** collects its writes (last write per signal
///   wins) and applies them all with one freshly allocated transaction id
///   when it finishes, so readers observe either all of its writes or none.
///
/// Dropping the transaction finishes it; use [`discard`](#method.discard)
/// to abandon the collected writes instead. Transactions may be created
/// and finished in any operation mode.
pub struct Transaction {
    core: Weak<ServiceCore>,
    read_id: u64,
    state: Mutex<TransactionState>,
}

impl Transaction {
    pub(crate) fn new(core: Weak<ServiceCore>, read_id: u64) -> Self {
        Self {
            core,
            read_id,
            state: Mutex::new(TransactionState {
                mode: TransactionMode::Undefined,
                deferred: BTreeMap::new(),
                discarded: false,
            }),
        }
    }

    /// The transaction id reads through this transaction observe, or `None`
    /// for a transaction already committed to writing.
    ///
    /// The first call latches the transaction as a read transaction and
    /// refreshes the service's direct transaction id, so that later direct
    /// writes cannot land under the pinned snapshot.
    pub fn read_transaction_id(&self) -> Option<u64> {
        let mut state = self.state.lock().expect("transaction state poisoned");
        match state.mode {
            TransactionMode::Read => Some(self.read_id),
            TransactionMode::Undefined => {
                state.mode = TransactionMode::Read;
                if let Some(core) = self.core.upgrade() {
                    core.refresh_direct_transaction_id();
                }
                Some(self.read_id)
            }
            TransactionMode::Write => None,
        }
    }

    /// Records a deferred write. Ignored on a read transaction; a repeated
    /// write to the same signal replaces the earlier value.
    pub(crate) fn defer_write(&self, signal: &Arc<Signal>, value: Value) {
        let mut state = self.state.lock().expect("transaction state poisoned");
        match state.mode {
            TransactionMode::Undefined => state.mode = TransactionMode::Write,
            TransactionMode::Write => {}
            TransactionMode::Read => return,
        }
        state.deferred.insert(
            (signal.direction(), signal.name().to_owned()),
            (Arc::clone(signal), value),
        );
    }

    /// Finishes the transaction, applying any deferred writes atomically.
    ///
    /// Equivalent to dropping the transaction; provided for call sites that
    /// want to make the point explicit.
    pub fn finish(self) {}

    /// Abandons the transaction: deferred writes are not applied.
    pub fn discard(self) {
        self.state
            .lock()
            .expect("transaction state poisoned")
            .discarded = true;
    }

    fn apply_deferred(&self) {
        let deferred = {
            let mut state = self.state.lock().expect("transaction state poisoned");
            if state.discarded || state.mode != TransactionMode::Write {
                return;
            }
            std::mem::replace(&mut state.deferred, BTreeMap::new())
        };
        let core = match self.core.upgrade() {
            Some(core) => core,
            None => return,
        };

        // One fresh id shared by every deferred write: this is what makes
        // the transaction atomic for readers.
        let write_id = core.next_transaction_id();
        let mut fired = BTreeMap::new();
        for (signal, value) in deferred.values() {
            signal.write_from_provider(value, Some(write_id), &mut fired);
        }
        for trigger in fired.values() {
            Arc::clone(trigger).execute(ExecutionReason::Spontaneous);
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.apply_deferred();
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().expect("transaction state poisoned");
        f.debug_struct("Transaction")
            .field("read_id", &self.read_id)
            .field("mode", &state.mode)
            .field("deferred", &state.deferred.len())
            .finish()
    }
}
