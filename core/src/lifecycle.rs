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

//! Lifecycle state machinery: per-object statuses, process-level operation
//! states and the event plumbing between the orchestrator and its host.

use serde_derive::{Deserialize, Serialize};

use std::{
    fmt,
    sync::{
        mpsc::{self, Receiver, Sender},
        Mutex, RwLock,
    },
};

/// Status of a single object record.
///
/// The observed status sequence of every object is a path through
///
/// ```text
/// init_pending -> initializing -> { initialized, init_failure }
/// initialized <-> configuring <-> running
/// (any non-terminal) -> shutting_down -> destruction_pending
/// ```
///
/// with `runtime_error` recorded when a hook of the object panics while the
/// process keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectStatus {
    /// Created, not yet initialized.
    InitPending,
    /// The initialize hook is running.
    Initializing,
    /// Initialization completed.
    Initialized,
    /// The object is in the configuration phase.
    Configuring,
    /// The object takes part in normal operation.
    Running,
    /// The shutdown hook is running.
    ShuttingDown,
    /// Shutdown completed; the object is about to be released.
    DestructionPending,
    /// The initialize hook reported failure or a dependency failed.
    InitFailure,
    /// A hook of the object panicked at runtime.
    RuntimeError,
}

impl ObjectStatus {
    /// Whether the object still takes part in lifecycle transitions.
    pub fn is_live(self) -> bool {
        !matches!(
            self,
            ObjectStatus::ShuttingDown
                | ObjectStatus::DestructionPending
                | ObjectStatus::InitFailure
        )
    }

    /// Whether the object completed initialization successfully and has not
    /// failed since.
    pub fn is_operational(self) -> bool {
        matches!(
            self,
            ObjectStatus::Initialized | ObjectStatus::Configuring | ObjectStatus::Running
        )
    }
}

impl fmt::Display for ObjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectStatus::InitPending => "init_pending",
            ObjectStatus::Initializing => "initializing",
            ObjectStatus::Initialized => "initialized",
            ObjectStatus::Configuring => "configuring",
            ObjectStatus::Running => "running",
            ObjectStatus::ShuttingDown => "shutting_down",
            ObjectStatus::DestructionPending => "destruction_pending",
            ObjectStatus::InitFailure => "init_failure",
            ObjectStatus::RuntimeError => "runtime_error",
        };
        f.write_str(name)
    }
}

/// Operation mode delivered to the per-object mode hook.
///
/// Only the configuration/running boundary is ever communicated to objects;
/// initialization and shutdown have their own dedicated hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    /// Objects may register signals, subscriptions and triggers.
    Configuring,
    /// Normal operation; the data paths are live.
    Running,
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationMode::Configuring => f.write_str("configuring"),
            OperationMode::Running => f.write_str("running"),
        }
    }
}

/// Process-level operation state of the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// No startup has happened (or a shutdown has completed).
    NotStarted,
    /// Objects are being created and initialized.
    Initializing,
    /// All objects were driven through initialization.
    Initialized,
    /// The configuration phase is active.
    Configuring,
    /// Normal operation.
    Running,
    /// A shutdown pass is in progress.
    ShuttingDown,
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationState::NotStarted => "not_started",
            OperationState::Initializing => "initializing",
            OperationState::Initialized => "initialized",
            OperationState::Configuring => "configuring",
            OperationState::Running => "running",
            OperationState::ShuttingDown => "shutting_down",
        };
        f.write_str(name)
    }
}

/// Events published by the lifecycle orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEvent {
    /// The process-level operation state changed.
    OperationStateChanged(OperationState),
    /// One pass of the running loop completed.
    LoopTick,
}

/// Callback receiving [`AppEvent`]s.
///
/// [`AppEvent`]: enum.AppEvent.html
pub type AppEventHandler = Box<dyn Fn(&AppEvent) + Send + Sync>;

/// Fan-out of lifecycle events to the registered handlers.
#[derive(Default)]
pub(crate) struct EventHub {
    handlers: RwLock<Vec<AppEventHandler>>,
}

impl EventHub {
    pub fn subscribe(&self, handler: AppEventHandler) {
        self.handlers
            .write()
            .expect("event handler list poisoned")
            .push(handler);
    }

    pub fn emit(&self, event: AppEvent) {
        let handlers = self.handlers.read().expect("event handler list poisoned");
        for handler in handlers.iter() {
            handler(&event);
        }
    }
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.handlers.read().map(|h| h.len()).unwrap_or(0);
        f.debug_struct("EventHub").field("handlers", &count).finish()
    }
}

/// Handle used to request a shutdown of a running loop from another thread
/// (for instance from a control channel or a signal handler).
///
/// Handles are cheap to clone. Requesting a shutdown is idempotent; the
/// request is honoured by the next pass of [`Runtime::run_loop`].
///
/// [`Runtime::run_loop`]: struct.Runtime.html#method.run_loop
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Sender<()>,
}

impl ShutdownHandle {
    /// Requests the running loop to return.
    pub fn request_shutdown(&self) {
        // A closed channel means the loop is already gone.
        let _ = self.sender.send(());
    }
}

/// Receiving side of the shutdown channel, owned by the runtime.
pub(crate) struct ShutdownChannel {
    sender: Sender<()>,
    pub receiver: Mutex<Receiver<()>>,
}

impl ShutdownChannel {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            sender: self.sender.clone(),
        }
    }

    /// Drops any shutdown requests left over from a previous run.
    pub fn drain(&self) {
        let receiver = self.receiver.lock().expect("shutdown channel poisoned");
        while receiver.try_recv().is_ok() {}
    }
}

impl fmt::Debug for ShutdownChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownChannel").finish()
    }
}
