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

//! The per-process runtime: owns the catalog, the repository and the
//! lifecycle state, and orchestrates the operating modes of every object.

use anyhow::{bail, ensure, format_err};
use log::{error, info, warn};
use serde_derive::{Deserialize, Serialize};

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};

use crate::{
    catalog::Catalog,
    error::CoreError,
    helpers::Milliseconds,
    lifecycle::{
        AppEvent, AppEventHandler, EventHub, ObjectStatus, OperationMode, OperationState,
        ShutdownChannel, ShutdownHandle,
    },
    repository::{ObjectId, ObjectSnapshot, Repository},
};

/// Configuration of a single object to create during startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectConfig {
    /// Class name (or alias) to instantiate.
    pub class: String,
    /// Explicit object name; the class default or a generated name is used
    /// when absent.
    #[serde(default)]
    pub name: Option<String>,
    /// Opaque configuration string handed to the object's factory and
    /// initialize hook. The core imposes no schema on it.
    #[serde(default)]
    pub config: String,
}

fn default_loop_tick() -> Milliseconds {
    100
}

/// Startup configuration of the runtime.
///
/// The runtime consumes this already parsed; loading and parsing the
/// configuration file is the host's concern. The structure derives `serde`,
/// so a TOML or similar frontend maps onto it directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Instance identifier of this runtime process. Control channels are
    /// keyed by it.
    #[serde(default)]
    pub instance_id: u32,
    /// Period of the running-loop tick in milliseconds.
    #[serde(default = "default_loop_tick")]
    pub loop_tick_ms: Milliseconds,
    /// Objects to create and initialize during startup.
    #[serde(default)]
    pub objects: Vec<ObjectConfig>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            instance_id: 0,
            loop_tick_ms: default_loop_tick(),
            objects: Vec::new(),
        }
    }
}

/// The per-process component runtime.
///
/// There is no global instance: hosting code constructs a `Runtime`,
/// registers classes with its [`catalog`](#method.catalog), starts it up
/// and passes it to collaborators. All methods take `&self`; the runtime is
/// freely shareable across threads.
pub struct Runtime {
    catalog: Arc<Catalog>,
    repository: Arc<Repository>,
    state: RwLock<OperationState>,
    events: EventHub,
    shutdown: ShutdownChannel,
    loop_tick: Mutex<Duration>,
    instance_id: Mutex<u32>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Creates a runtime with an empty catalog and repository.
    pub fn new() -> Self {
        let catalog = Arc::new(Catalog::new());
        let repository = Arc::new(Repository::new(Arc::clone(&catalog)));
        Self {
            catalog,
            repository,
            state: RwLock::new(OperationState::NotStarted),
            events: EventHub::default(),
            shutdown: ShutdownChannel::new(),
            loop_tick: Mutex::new(Duration::from_millis(default_loop_tick())),
            instance_id: Mutex::new(0),
        }
    }

    /// The module and class catalog.
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// The object repository.
    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    /// Current process-level operation state.
    pub fn operation_state(&self) -> OperationState {
        *self.state.read().expect("runtime state poisoned")
    }

    /// Instance identifier assigned by the last startup.
    pub fn instance_id(&self) -> u32 {
        *self.instance_id.lock().expect("runtime state poisoned")
    }

    /// Registers a lifecycle event handler.
    ///
    /// Handlers receive operation-state changes and, while running, the
    /// periodic loop tick.
    pub fn on_event(&self, handler: AppEventHandler) {
        self.events.subscribe(handler);
    }

    /// Returns a handle that requests [`run_loop`](#method.run_loop) to
    /// return from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.handle()
    }

    /// Starts the runtime: creates the configured objects in dependency
    /// order, initializes them, and drives everything through the
    /// configuration phase into normal operation.
    ///
    /// On failure the runtime rolls back to `NotStarted`, destroying any
    /// objects created so far, and reports the cause. A failed initialize
    /// hook of an individual object is not a startup failure: the object
    /// (and its dependents) are recorded as `InitFailure` and the host
    /// decides by inspecting the object list.
    pub fn startup(&self, config: &RuntimeConfig) -> anyhow::Result<()> {
        {
            let state = self.state.read().expect("runtime state poisoned");
            ensure!(
                *state == OperationState::NotStarted,
                "startup requested in state `{}`",
                state
            );
        }
        info!("starting runtime instance #{}", config.instance_id);
        *self.instance_id.lock().expect("runtime state poisoned") = config.instance_id;
        *self.loop_tick.lock().expect("runtime state poisoned") =
            Duration::from_millis(config.loop_tick_ms.max(1));
        self.shutdown.drain();
        self.change_state(OperationState::Initializing);

        if let Err(err) = self.create_configured_objects(config) {
            error!("startup failed: {}", err);
            self.change_state(OperationState::ShuttingDown);
            self.repository.clear();
            self.change_state(OperationState::NotStarted);
            return Err(err.into());
        }

        self.initialize_all();
        self.change_state(OperationState::Initialized);

        self.apply_mode(OperationMode::Configuring);
        self.change_state(OperationState::Configuring);

        self.apply_mode(OperationMode::Running);
        self.change_state(OperationState::Running);
        Ok(())
    }

    /// Switches between the configuration phase and normal operation.
    ///
    /// Forward transitions (into `Running`) deliver the mode in dependency
    /// order; backward transitions (into `Configuring`) in reverse order.
    pub fn set_mode(&self, mode: OperationMode) -> anyhow::Result<()> {
        let state = self.operation_state();
        let target = match (state, mode) {
            (OperationState::Running, OperationMode::Configuring) => OperationState::Configuring,
            (OperationState::Configuring, OperationMode::Running)
            | (OperationState::Initialized, OperationMode::Running) => OperationState::Running,
            (OperationState::Initialized, OperationMode::Configuring) => {
                OperationState::Configuring
            }
            (state, mode) => bail!("cannot enter mode `{}` from state `{}`", mode, state),
        };
        self.apply_mode(mode);
        self.change_state(target);
        Ok(())
    }

    /// Creates an object after startup and brings it to the current mode.
    ///
    /// Before startup (and during it) objects are created in `InitPending`
    /// and picked up by the initialization pass instead.
    pub fn create_object(
        &self,
        class_name: &str,
        object_name: Option<&str>,
        config: &str,
    ) -> Result<ObjectId, CoreError> {
        let id = self.repository.create(class_name, object_name, config)?;
        match self.operation_state() {
            OperationState::NotStarted | OperationState::Initializing => {}
            state => {
                let snapshot = self
                    .repository
                    .snapshot()
                    .into_iter()
                    .find(|object| object.id == id);
                if let Some(object) = snapshot {
                    self.initialize_object(&object);
                    match state {
                        OperationState::Configuring => {
                            self.deliver_mode(&object, OperationMode::Configuring);
                        }
                        OperationState::Running => {
                            self.deliver_mode(&object, OperationMode::Running);
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(id)
    }

    /// Runs the loop of the running phase on the calling thread.
    ///
    /// Emits a [`AppEvent::LoopTick`] per pass and returns once a shutdown
    /// is requested through a [`ShutdownHandle`]. The runtime stays in
    /// `Running`; call [`shutdown`](#method.shutdown) afterwards.
    ///
    /// [`AppEvent::LoopTick`]: enum.AppEvent.html#variant.LoopTick
    /// [`ShutdownHandle`]: struct.ShutdownHandle.html
    pub fn run_loop(&self) -> anyhow::Result<()> {
        ensure!(
            self.operation_state() == OperationState::Running,
            "the running loop requires the `running` state"
        );
        let tick = *self.loop_tick.lock().expect("runtime state poisoned");
        let receiver = self
            .shutdown
            .receiver
            .try_lock()
            .map_err(|_| format_err!("the running loop is already driven by another thread"))?;
        info!("entering running loop (tick {:?})", tick);
        loop {
            self.events.emit(AppEvent::LoopTick);
            match receiver.recv_timeout(tick) {
                Ok(()) => break,
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    if self.operation_state() != OperationState::Running {
                        break;
                    }
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        info!("running loop left");
        Ok(())
    }

    /// Shuts the runtime down: drives every object through `shutting_down`
    /// and `destruction_pending` in reverse dependency order and releases
    /// them, returning to `NotStarted`.
    pub fn shutdown(&self) {
        if self.operation_state() == OperationState::NotStarted {
            return;
        }
        info!("shutting down runtime instance #{}", self.instance_id());
        self.change_state(OperationState::ShuttingDown);

        let mut objects = self.ordered_snapshot();
        objects.reverse();
        for object in &objects {
            self.repository.destroy(object.id);
        }
        // Objects created concurrently with the pass above.
        self.repository.clear();
        self.change_state(OperationState::NotStarted);
    }

    fn change_state(&self, state: OperationState) {
        *self.state.write().expect("runtime state poisoned") = state;
        self.events.emit(AppEvent::OperationStateChanged(state));
    }

    /// Creates all configured objects, ordered so that dependency classes
    /// come first regardless of their position in the configuration.
    fn create_configured_objects(&self, config: &RuntimeConfig) -> Result<(), CoreError> {
        let ranks = self.catalog.dependency_ranks();
        let mut entries: Vec<(usize, &ObjectConfig)> = config.objects.iter().enumerate().collect();
        entries.sort_by_key(|(index, object)| {
            let class = self
                .catalog
                .resolve(&object.class)
                .map(|descriptor| descriptor.class_name.clone())
                .unwrap_or_else(|| object.class.clone());
            (ranks.get(&class).copied().unwrap_or(0), *index)
        });

        for (_, object) in entries {
            self.repository
                .create(&object.class, object.name.as_deref(), &object.config)?;
        }
        Ok(())
    }

    /// Drives every pending object through initialization in dependency
    /// order. Objects whose dependencies did not come up operational are
    /// marked `InitFailure` without running their hook.
    fn initialize_all(&self) {
        for object in self.ordered_snapshot() {
            if object.status != ObjectStatus::InitPending {
                continue;
            }
            let unsatisfied = object
                .class
                .dependencies
                .iter()
                .find(|dependency| !self.repository.has_operational_instance(dependency));
            if let Some(dependency) = unsatisfied {
                warn!(
                    "object `{}` not initialized: dependency `{}` failed",
                    object.name, dependency
                );
                self.repository.set_status(object.id, ObjectStatus::InitFailure);
                continue;
            }
            self.initialize_object(&object);
        }
    }

    fn initialize_object(&self, object: &ObjectSnapshot) {
        self.repository.set_status(object.id, ObjectStatus::Initializing);
        let implementation = Arc::clone(&object.implementation);
        let config = object.config.clone();
        let outcome =
            panic::catch_unwind(AssertUnwindSafe(move || implementation.initialize(&config)));
        let status = match outcome {
            Ok(Ok(())) => ObjectStatus::Initialized,
            Ok(Err(err)) => {
                error!("object `{}` failed to initialize: {:#}", object.name, err);
                ObjectStatus::InitFailure
            }
            Err(_) => {
                error!("initialize hook of object `{}` panicked", object.name);
                ObjectStatus::InitFailure
            }
        };
        self.repository.set_status(object.id, status);
    }

    /// Delivers a mode change to all objects, honouring dependency order.
    fn apply_mode(&self, mode: OperationMode) {
        let mut objects = self.ordered_snapshot();
        if mode == OperationMode::Configuring
            && self.operation_state() == OperationState::Running
        {
            // Backward transition.
            objects.reverse();
        }
        for object in &objects {
            self.deliver_mode(object, mode);
        }
    }

    /// Delivers a mode change to one object, if its current status permits
    /// the transition; contradicting calls are ignored.
    fn deliver_mode(&self, object: &ObjectSnapshot, mode: OperationMode) {
        let status = match self.repository.status(object.id) {
            Some(status) => status,
            None => return,
        };
        let next = match (mode, status) {
            (OperationMode::Configuring, ObjectStatus::Initialized)
            | (OperationMode::Configuring, ObjectStatus::Running) => ObjectStatus::Configuring,
            (OperationMode::Running, ObjectStatus::Initialized)
            | (OperationMode::Running, ObjectStatus::Configuring) => ObjectStatus::Running,
            _ => return,
        };
        let implementation = Arc::clone(&object.implementation);
        let outcome =
            panic::catch_unwind(AssertUnwindSafe(move || implementation.operation_mode(mode)));
        match outcome {
            Ok(()) => self.repository.set_status(object.id, next),
            Err(_) => {
                error!("mode hook of object `{}` panicked", object.name);
                self.repository.set_status(object.id, ObjectStatus::RuntimeError);
            }
        }
    }

    /// Snapshot of all objects, stably ordered by class dependency rank
    /// first and creation order second.
    fn ordered_snapshot(&self) -> Vec<ObjectSnapshot> {
        let ranks = self.catalog.dependency_ranks();
        let mut objects = self.repository.snapshot();
        objects.sort_by_key(|object| {
            (
                ranks.get(&object.class.class_name).copied().unwrap_or(0),
                object.id,
            )
        });
        objects
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("state", &self.operation_state())
            .field("repository", &self.repository)
            .finish()
    }
}
