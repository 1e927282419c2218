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

//! Transmission triggers and the deferred-execution scheduler.

use log::error;
use serde_derive::{Deserialize, Serialize};

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, Weak,
    },
    time::{Duration, Instant},
};

use sdv_core::ObjectStatus;

use crate::{service::ServiceCore, signal::Signal, timer::TaskTimer};

/// Why a trigger execution was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExecutionReason {
    /// The trigger's own periodic timer elapsed.
    Periodic,
    /// A value was written to an attached signal.
    Spontaneous,
}

/// Behavior flags of a transmission trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerBehavior {
    /// Fire when an attached signal is written.
    pub spontaneous: bool,
    /// Suppress periodic firings while every attached signal has kept its
    /// default value for more than one period.
    pub periodic_if_active: bool,
}

impl TriggerBehavior {
    /// Behavior firing on writes to attached signals.
    pub fn spontaneous() -> Self {
        Self {
            spontaneous: true,
            periodic_if_active: false,
        }
    }

    /// Behavior firing periodically only while attached signals carry
    /// non-default values.
    pub fn periodic_if_active() -> Self {
        Self {
            spontaneous: false,
            periodic_if_active: true,
        }
    }
}

/// Callback invoked when a trigger fires.
pub type TriggerCallback = Arc<dyn Fn() + Send + Sync>;

struct TriggerTiming {
    last_execution: Option<Instant>,
    inactive_repetitions: u32,
}

/// Trigger record owned by the dispatch service.
pub(crate) struct Trigger {
    id: u64,
    core: Weak<ServiceCore>,
    min_delay: Option<Duration>,
    behavior: TriggerBehavior,
    callback: TriggerCallback,
    /// Periodic timer; present while the trigger is alive and cyclic.
    timer: Mutex<Option<TaskTimer>>,
    timing: Mutex<TriggerTiming>,
    signals: Mutex<BTreeMap<String, Weak<Signal>>>,
}

impl Trigger {
    pub fn new(
        id: u64,
        core: Weak<ServiceCore>,
        min_delay: Option<Duration>,
        behavior: TriggerBehavior,
        callback: TriggerCallback,
    ) -> Self {
        Self {
            id,
            core,
            min_delay,
            behavior,
            callback,
            timer: Mutex::new(None),
            timing: Mutex::new(TriggerTiming {
                last_execution: None,
                inactive_repetitions: 0,
            }),
            signals: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn set_timer(&self, timer: TaskTimer) {
        *self.timer.lock().expect("trigger timer poisoned") = Some(timer);
    }

    pub fn remove_signal(&self, name: &str) {
        let signal = {
            let mut signals = self.signals.lock().expect("trigger signal map poisoned");
            signals.remove(name).and_then(|weak| weak.upgrade())
        };
        if let Some(signal) = signal {
            signal.remove_trigger(self.id);
        }
    }

    /// Runs one trigger execution request.
    ///
    /// The minimum-delay contract defers too-early requests through the
    /// scheduler; `periodic_if_active` suppresses periodic firings once the
    /// attached signals have rested at their defaults for more than one
    /// period.
    pub fn execute(self: Arc<Self>, reason: ExecutionReason) {
        let core = match self.core.upgrade() {
            Some(core) => core,
            None => return,
        };
        if core.status() != ObjectStatus::Running {
            return;
        }
        if reason == ExecutionReason::Spontaneous && !self.behavior.spontaneous {
            return;
        }

        // Evaluated outside the timing lock; takes the signal value locks.
        let all_default = self.behavior.periodic_if_active && {
            let signals = self.signals.lock().expect("trigger signal map poisoned");
            signals
                .values()
                .filter_map(Weak::upgrade)
                .all(|signal| signal.equals_default())
        };

        let now = Instant::now();
        {
            let mut timing = self.timing.lock().expect("trigger timing poisoned");

            // Delay check and execution stamp are atomic: a concurrent
            // request inside the window always takes the deferred path.
            if let Some(min_delay) = self.min_delay {
                if let Some(last) = timing.last_execution {
                    let earliest = last + min_delay;
                    if now < earliest {
                        drop(timing);
                        core.scheduler().schedule(self, reason, earliest);
                        return;
                    }
                }
            }

            if self.behavior.periodic_if_active {
                timing.inactive_repetitions = if all_default {
                    timing.inactive_repetitions + 1
                } else {
                    0
                };
                // The threshold of one tolerated inactive repetition is
                // fixed.
                if reason == ExecutionReason::Periodic && timing.inactive_repetitions > 1 {
                    return;
                }
            }

            timing.last_execution = Some(now);
        }

        if panic::catch_unwind(AssertUnwindSafe(|| (*self.callback)())).is_err() {
            error!("callback of trigger #{} panicked", self.id);
        }
    }

    /// Stops the periodic timer, detaches every signal and removes pending
    /// schedule entries. Called when the owning handle is dropped.
    pub fn destroy(&self) {
        let timer = self.timer.lock().expect("trigger timer poisoned").take();
        drop(timer);

        let attached: Vec<Arc<Signal>> = {
            let mut signals = self.signals.lock().expect("trigger signal map poisoned");
            let upgraded = signals.values().filter_map(Weak::upgrade).collect();
            signals.clear();
            upgraded
        };
        for signal in attached {
            signal.remove_trigger(self.id);
        }

        if let Some(core) = self.core.upgrade() {
            core.remove_trigger(self.id);
        }
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("id", &self.id)
            .field("behavior", &self.behavior)
            .field("min_delay", &self.min_delay)
            .finish()
    }
}

/// Owning handle of a transmission trigger.
///
/// Dropping the handle destroys the trigger: the periodic timer stops, the
/// trigger is detached from every attached signal and pending deferred
/// executions are cancelled. An execution already in flight is allowed to
/// complete.
pub struct TriggerHandle {
    trigger: Arc<Trigger>,
}

impl TriggerHandle {
    pub(crate) fn new(trigger: Arc<Trigger>) -> Self {
        Self { trigger }
    }

    /// Attaches a registered tx signal to the trigger.
    ///
    /// Subsequent writes to the signal request a spontaneous execution (for
    /// triggers with the spontaneous behavior), and `periodic_if_active`
    /// evaluates the signal's value. Returns `false` when no tx signal with
    /// this name is registered.
    pub fn attach_signal(&self, name: &str) -> bool {
        let core = match self.trigger.core.upgrade() {
            Some(core) => core,
            None => return false,
        };
        let signal = match core.find_tx_signal(name) {
            Some(signal) => signal,
            None => return false,
        };
        signal.add_trigger(self.trigger.id(), Arc::downgrade(&self.trigger));
        self.trigger
            .signals
            .lock()
            .expect("trigger signal map poisoned")
            .insert(name.to_owned(), Arc::downgrade(&signal));
        true
    }

    /// Detaches a signal from the trigger again.
    pub fn detach_signal(&self, name: &str) {
        self.trigger.remove_signal(name);
    }
}

impl Drop for TriggerHandle {
    fn drop(&mut self) {
        self.trigger.destroy();
    }
}

impl fmt::Debug for TriggerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerHandle")
            .field("trigger", &self.trigger)
            .finish()
    }
}

#[derive(Default)]
struct ScheduleQueue {
    /// Triggers with a deferred execution, with the strongest requested
    /// reason. Prevents scheduling the same trigger twice.
    pending: HashMap<u64, ExecutionReason>,
    /// Due times in ascending order. The sequence number keeps equal due
    /// times apart.
    by_due: BTreeMap<(Instant, u64), Arc<Trigger>>,
    next_seq: u64,
}

struct SchedulerInner {
    active: AtomicBool,
    queue: Mutex<ScheduleQueue>,
}

/// Defers trigger executions that undercut their minimum delay.
///
/// A 1 ms timer tick drains all entries that have become due. A trigger can
/// have at most one deferred execution; a spontaneous request upgrades a
/// pending periodic one but never the other way around.
pub(crate) struct Scheduler {
    inner: Arc<SchedulerInner>,
    timer: Mutex<Option<TaskTimer>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                active: AtomicBool::new(false),
                queue: Mutex::new(ScheduleQueue::default()),
            }),
            timer: Mutex::new(None),
        }
    }

    /// Starts the 1 ms scheduler tick.
    pub fn start(&self) {
        let mut timer = self.timer.lock().expect("scheduler timer poisoned");
        if timer.is_some() {
            return;
        }
        self.inner.active.store(true, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        *timer = Some(TaskTimer::spawn(Duration::from_millis(1), move || {
            inner.drain_due();
        }));
    }

    /// Stops the tick and clears all pending deferred executions.
    pub fn stop(&self) {
        self.inner.active.store(false, Ordering::SeqCst);
        let timer = self.timer.lock().expect("scheduler timer poisoned").take();
        drop(timer);
        let mut queue = self.inner.queue.lock().expect("schedule poisoned");
        queue.pending.clear();
        queue.by_due.clear();
    }

    /// Schedules a deferred execution of `trigger` at `due`.
    ///
    /// When the trigger already has a deferred execution, only the reason
    /// may be upgraded from periodic to spontaneous; the earlier due time
    /// stands.
    pub fn schedule(&self, trigger: Arc<Trigger>, reason: ExecutionReason, due: Instant) {
        if !self.inner.active.load(Ordering::SeqCst) {
            return;
        }
        let mut queue = self.inner.queue.lock().expect("schedule poisoned");
        if let Some(pending) = queue.pending.get_mut(&trigger.id()) {
            if reason == ExecutionReason::Spontaneous {
                *pending = ExecutionReason::Spontaneous;
            }
            return;
        }
        queue.pending.insert(trigger.id(), reason);
        queue.next_seq += 1;
        let seq = queue.next_seq;
        queue.by_due.insert((due, seq), trigger);
    }

    /// Removes all deferred executions of one trigger.
    pub fn remove(&self, trigger_id: u64) {
        let mut queue = self.inner.queue.lock().expect("schedule poisoned");
        queue.pending.remove(&trigger_id);
        let stale: Vec<(Instant, u64)> = queue
            .by_due
            .iter()
            .filter(|(_, trigger)| trigger.id() == trigger_id)
            .map(|(key, _)| *key)
            .collect();
        for key in stale {
            queue.by_due.remove(&key);
        }
    }
}

impl SchedulerInner {
    /// Executes every schedule entry that has become due, earliest first.
    fn drain_due(&self) {
        loop {
            let (trigger, reason) = {
                let mut queue = self.queue.lock().expect("schedule poisoned");
                let key = match queue.by_due.keys().next() {
                    Some((due, seq)) if *due <= Instant::now() => (*due, *seq),
                    _ => return,
                };
                let trigger = queue.by_due.remove(&key).expect("entry vanished");
                let reason = queue.pending.remove(&trigger.id());
                match reason {
                    Some(reason) => (trigger, reason),
                    // Cancelled concurrently.
                    None => continue,
                }
            };
            trigger.execute(reason);
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.inner.queue.lock().expect("schedule poisoned");
        f.debug_struct("Scheduler")
            .field("active", &self.inner.active.load(Ordering::SeqCst))
            .field("pending", &queue.pending.len())
            .finish()
    }
}
