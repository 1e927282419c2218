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

//! A periodic task timer backed by a dedicated thread.

use std::{
    fmt,
    sync::{Arc, Condvar, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

/// Runs a task at a fixed period on its own thread until dropped.
///
/// Used for the 1 ms scheduler tick and for the periodic firing path of
/// individual triggers. Dropping the timer stops the thread promptly (the
/// wait is interruptible, no full period has to elapse) and joins it.
pub(crate) struct TaskTimer {
    shared: Arc<(Mutex<bool>, Condvar)>,
    worker: Option<JoinHandle<()>>,
}

impl TaskTimer {
    /// Spawns the timer thread. The task runs once per `period`, starting
    /// one period from now.
    pub fn spawn<F>(period: Duration, task: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let shared = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("sdv-task-timer".to_owned())
            .spawn(move || {
                let (stopped, wakeup) = &*thread_shared;
                let mut guard = stopped.lock().expect("timer state poisoned");
                loop {
                    let (next, timeout) = wakeup
                        .wait_timeout(guard, period)
                        .expect("timer state poisoned");
                    guard = next;
                    if *guard {
                        break;
                    }
                    if timeout.timed_out() {
                        drop(guard);
                        task();
                        guard = stopped.lock().expect("timer state poisoned");
                        if *guard {
                            break;
                        }
                    }
                }
            })
            .expect("failed to spawn the timer thread");
        Self {
            shared,
            worker: Some(worker),
        }
    }
}

impl Drop for TaskTimer {
    fn drop(&mut self) {
        {
            let (stopped, wakeup) = &*self.shared;
            *stopped.lock().expect("timer state poisoned") = true;
            wakeup.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            // A task still in flight is allowed to complete.
            let _ = worker.join();
        }
    }
}

impl fmt::Debug for TaskTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskTimer").finish()
    }
}
