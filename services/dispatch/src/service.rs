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

//! The dispatch service object and its negotiable capabilities.

use log::trace;

use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, RwLock,
    },
    time::Duration,
};

use sdv_core::{
    helpers::Milliseconds, BuiltObject, Catalog, ClassDescriptor, Component, CoreError,
    InterfaceId, InterfaceMap, InterfaceSpec, ModuleId, ObjectKind, ObjectStatus, OperationMode,
};

use crate::{
    error::DispatchError,
    signal::{
        Signal, SignalCallback, SignalDirection, SignalReader, SignalRegistration, SignalWriter,
        Subscription,
    },
    timer::TaskTimer,
    transaction::Transaction,
    trigger::{ExecutionReason, Scheduler, Trigger, TriggerBehavior, TriggerCallback, TriggerHandle},
    value::Value,
};

/// Interface id of [`SignalTransmission`](trait.SignalTransmission.html).
pub const SIGNAL_TRANSMISSION_ID: InterfaceId = InterfaceId(0x4453_5643_0000_0001);
/// Interface id of [`SignalAccess`](trait.SignalAccess.html).
pub const SIGNAL_ACCESS_ID: InterfaceId = InterfaceId(0x4453_5643_0000_0002);
/// Interface id of [`DispatchTransaction`](trait.DispatchTransaction.html).
pub const DISPATCH_TRANSACTION_ID: InterfaceId = InterfaceId(0x4453_5643_0000_0003);

/// Capability for registering the transported signals and their
/// transmission triggers. Used by transport bindings during the
/// configuration phase.
pub trait SignalTransmission: Send + Sync {
    /// Registers a signal for transmission to the vehicle and returns the
    /// reading side the transport consumes.
    fn register_tx_signal(
        &self,
        name: &str,
        default_value: Value,
    ) -> Result<SignalReader, DispatchError>;

    /// Registers a signal received from the vehicle and returns the writing
    /// side the transport feeds.
    fn register_rx_signal(&self, name: &str) -> Result<SignalWriter, DispatchError>;

    /// Creates a transmission trigger.
    ///
    /// `cycle_time` of zero disables periodic firing; `min_delay` of zero
    /// disables the minimum spacing between firings. A trigger that is
    /// neither cyclic nor spontaneous is rejected as `InvalidTrigger`.
    fn create_tx_trigger(
        &self,
        cycle_time: Milliseconds,
        min_delay: Milliseconds,
        behavior: TriggerBehavior,
        callback: TriggerCallback,
    ) -> Result<TriggerHandle, DispatchError>;
}

impl InterfaceSpec for dyn SignalTransmission {
    const ID: InterfaceId = SIGNAL_TRANSMISSION_ID;
}

/// Capability for attaching to already registered signals: additional
/// publishers on the tx side, subscriptions on the rx side.
pub trait SignalAccess: Send + Sync {
    /// Attaches an additional writer to a registered tx signal.
    fn request_publisher(&self, name: &str) -> Result<SignalWriter, DispatchError>;

    /// Attaches a push-callback reader to a registered rx signal.
    fn add_subscription(
        &self,
        name: &str,
        callback: SignalCallback,
    ) -> Result<Subscription, DispatchError>;

    /// Enumerates the registered signals (rx first, then tx).
    fn registered_signals(&self) -> Vec<SignalRegistration>;
}

impl InterfaceSpec for dyn SignalAccess {
    const ID: InterfaceId = SIGNAL_ACCESS_ID;
}

/// Capability for creating dispatch transactions.
pub trait DispatchTransaction: Send + Sync {
    /// Creates a transaction of still-undefined kind. See [`Transaction`].
    ///
    /// Transactions are available in every operation mode.
    ///
    /// [`Transaction`]: struct.Transaction.html
    fn create_transaction(&self) -> Transaction;
}

impl InterfaceSpec for dyn DispatchTransaction {
    const ID: InterfaceId = DISPATCH_TRANSACTION_ID;
}

/// Shared state of the dispatch service.
pub(crate) struct ServiceCore {
    status: RwLock<ObjectStatus>,
    rx_signals: RwLock<BTreeMap<String, Arc<Signal>>>,
    tx_signals: RwLock<BTreeMap<String, Arc<Signal>>>,
    next_transaction_id: AtomicU64,
    direct_transaction_id: AtomicU64,
    scheduler: Scheduler,
    triggers: Mutex<BTreeMap<u64, Arc<Trigger>>>,
    next_trigger_id: AtomicU64,
}

impl ServiceCore {
    fn new() -> Self {
        let core = Self {
            status: RwLock::new(ObjectStatus::InitPending),
            rx_signals: RwLock::new(BTreeMap::new()),
            tx_signals: RwLock::new(BTreeMap::new()),
            next_transaction_id: AtomicU64::new(1),
            direct_transaction_id: AtomicU64::new(0),
            scheduler: Scheduler::new(),
            triggers: Mutex::new(BTreeMap::new()),
            next_trigger_id: AtomicU64::new(0),
        };
        core.refresh_direct_transaction_id();
        core
    }

    pub fn status(&self) -> ObjectStatus {
        *self.status.read().expect("service status poisoned")
    }

    fn set_status(&self, status: ObjectStatus) {
        *self.status.write().expect("service status poisoned") = status;
    }

    /// Allocates the next transaction id. Strictly increasing for the life
    /// of the process, never reused.
    pub fn next_transaction_id(&self) -> u64 {
        self.next_transaction_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Allocates a fresh direct transaction id. Called when a read
    /// transaction is latched, so that later direct writes cannot disturb
    /// the pinned snapshot.
    pub fn refresh_direct_transaction_id(&self) {
        let id = self.next_transaction_id();
        self.direct_transaction_id.store(id, Ordering::SeqCst);
    }

    /// The transaction id direct (non-transactional) writes land under.
    pub fn direct_transaction_id(&self) -> u64 {
        self.direct_transaction_id.load(Ordering::SeqCst)
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    fn signal_map(&self, direction: SignalDirection) -> &RwLock<BTreeMap<String, Arc<Signal>>> {
        match direction {
            SignalDirection::Rx => &self.rx_signals,
            SignalDirection::Tx => &self.tx_signals,
        }
    }

    pub fn find_tx_signal(&self, name: &str) -> Option<Arc<Signal>> {
        self.tx_signals
            .read()
            .expect("signal map poisoned")
            .get(name)
            .map(Arc::clone)
    }

    /// Removes a signal record once its last endpoint is gone.
    pub fn unregister_signal(&self, name: &str, direction: SignalDirection) {
        let mut map = self.signal_map(direction).write().expect("signal map poisoned");
        if map.remove(name).is_some() {
            trace!("unregistered {} signal `{}`", direction, name);
        }
    }

    pub fn remove_trigger(&self, id: u64) {
        self.scheduler.remove(id);
        self.triggers.lock().expect("trigger map poisoned").remove(&id);
    }
}

impl fmt::Debug for ServiceCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceCore")
            .field("status", &self.status())
            .finish()
    }
}

/// The signal dispatch service.
///
/// One instance per process, hosted as the singleton class
/// `DataDispatchService` in the runtime's repository. Signal and trigger
/// registration is only available while the service is configuring; value
/// transport only while it is running. Cloning shares the same service.
#[derive(Clone)]
pub struct DispatchService {
    core: Arc<ServiceCore>,
}

impl Default for DispatchService {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchService {
    /// Class name under which the service registers in the catalog.
    pub const CLASS_NAME: &'static str = "DataDispatchService";

    /// Creates a dispatch service. The service stays inert until it is
    /// initialized and brought into an operation mode through its
    /// [`Component`] hooks.
    ///
    /// [`Component`]: ../sdv_core/trait.Component.html
    pub fn new() -> Self {
        Self {
            core: Arc::new(ServiceCore::new()),
        }
    }

    /// Registers the service's class in a catalog.
    ///
    /// The class is a singleton of kind `SystemObject`; the factory wires
    /// the three capabilities into the object's interface map.
    pub fn register(catalog: &Catalog, module: ModuleId) -> Result<(), CoreError> {
        catalog.register_class(
            ClassDescriptor::new(Self::CLASS_NAME, ObjectKind::SystemObject, module)
                .with_default_object_name(Self::CLASS_NAME)
                .singleton(),
            Arc::new(|_config| {
                let service = Arc::new(DispatchService::new());
                let interfaces = InterfaceMap::builder()
                    .with::<dyn SignalTransmission>(
                        Arc::clone(&service) as Arc<dyn SignalTransmission>
                    )
                    .with::<dyn SignalAccess>(Arc::clone(&service) as Arc<dyn SignalAccess>)
                    .with::<dyn DispatchTransaction>(
                        Arc::clone(&service) as Arc<dyn DispatchTransaction>
                    )
                    .build();
                BuiltObject::new(service, interfaces)
            }),
        )
    }

    /// The service's own lifecycle status.
    pub fn status(&self) -> ObjectStatus {
        self.core.status()
    }

    /// Subscribes to a registered rx signal with a plain closure. See
    /// [`SignalAccess::add_subscription`].
    ///
    /// [`SignalAccess::add_subscription`]: trait.SignalAccess.html#tymethod.add_subscription
    pub fn subscribe<F>(&self, name: &str, callback: F) -> Result<Subscription, DispatchError>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.add_subscription(name, Arc::new(callback))
    }

    /// Creates a transmission trigger with a plain closure. See
    /// [`SignalTransmission::create_tx_trigger`].
    ///
    /// [`SignalTransmission::create_tx_trigger`]: trait.SignalTransmission.html#tymethod.create_tx_trigger
    pub fn create_trigger<F>(
        &self,
        cycle_time: Milliseconds,
        min_delay: Milliseconds,
        behavior: TriggerBehavior,
        callback: F,
    ) -> Result<TriggerHandle, DispatchError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.create_tx_trigger(cycle_time, min_delay, behavior, Arc::new(callback))
    }

    fn ensure_configuring(&self) -> Result<(), DispatchError> {
        let status = self.core.status();
        if status == ObjectStatus::Configuring {
            Ok(())
        } else {
            Err(DispatchError::InvalidMode(status))
        }
    }

    fn register_signal(
        &self,
        name: &str,
        direction: SignalDirection,
        default_value: Value,
    ) -> Result<Arc<Signal>, DispatchError> {
        self.ensure_configuring()?;
        let mut map = self
            .core
            .signal_map(direction)
            .write()
            .expect("signal map poisoned");
        let signal = map
            .entry(name.to_owned())
            .or_insert_with(|| {
                trace!("registered {} signal `{}`", direction, name);
                Arc::new(Signal::new(
                    Arc::downgrade(&self.core),
                    name,
                    direction,
                    default_value,
                ))
            });
        Ok(Arc::clone(signal))
    }

    fn find_signal(
        &self,
        name: &str,
        direction: SignalDirection,
    ) -> Result<Arc<Signal>, DispatchError> {
        self.ensure_configuring()?;
        self.core
            .signal_map(direction)
            .read()
            .expect("signal map poisoned")
            .get(name)
            .map(Arc::clone)
            .ok_or_else(|| DispatchError::not_found(name, direction))
    }
}

impl SignalTransmission for DispatchService {
    fn register_tx_signal(
        &self,
        name: &str,
        default_value: Value,
    ) -> Result<SignalReader, DispatchError> {
        let signal = self.register_signal(name, SignalDirection::Tx, default_value)?;
        Ok(SignalReader::new(signal))
    }

    fn register_rx_signal(&self, name: &str) -> Result<SignalWriter, DispatchError> {
        let signal = self.register_signal(name, SignalDirection::Rx, Value::Empty)?;
        Ok(SignalWriter::new(signal))
    }

    fn create_tx_trigger(
        &self,
        cycle_time: Milliseconds,
        min_delay: Milliseconds,
        behavior: TriggerBehavior,
        callback: TriggerCallback,
    ) -> Result<TriggerHandle, DispatchError> {
        self.ensure_configuring()?;
        if cycle_time == 0 && !behavior.spontaneous {
            return Err(DispatchError::InvalidTrigger);
        }

        let id = self.core.next_trigger_id.fetch_add(1, Ordering::SeqCst) + 1;
        let min_delay = if min_delay > 0 {
            Some(Duration::from_millis(min_delay))
        } else {
            None
        };
        let trigger = Arc::new(Trigger::new(
            id,
            Arc::downgrade(&self.core),
            min_delay,
            behavior,
            callback,
        ));

        if cycle_time > 0 {
            let cyclic = Arc::downgrade(&trigger);
            trigger.set_timer(TaskTimer::spawn(
                Duration::from_millis(cycle_time),
                move || {
                    if let Some(trigger) = cyclic.upgrade() {
                        trigger.execute(ExecutionReason::Periodic);
                    }
                },
            ));
        }

        self.core
            .triggers
            .lock()
            .expect("trigger map poisoned")
            .insert(id, Arc::clone(&trigger));
        Ok(TriggerHandle::new(trigger))
    }
}

impl SignalAccess for DispatchService {
    fn request_publisher(&self, name: &str) -> Result<SignalWriter, DispatchError> {
        let signal = self.find_signal(name, SignalDirection::Tx)?;
        Ok(SignalWriter::new(signal))
    }

    fn add_subscription(
        &self,
        name: &str,
        callback: SignalCallback,
    ) -> Result<Subscription, DispatchError> {
        let signal = self.find_signal(name, SignalDirection::Rx)?;
        Ok(Subscription::new(signal, callback))
    }

    fn registered_signals(&self) -> Vec<SignalRegistration> {
        let mut registrations = Vec::new();
        for map in &[&self.core.rx_signals, &self.core.tx_signals] {
            let signals = map.read().expect("signal map poisoned");
            registrations.extend(signals.values().map(|signal| SignalRegistration {
                name: signal.name().to_owned(),
                direction: signal.direction(),
            }));
        }
        registrations
    }
}

impl DispatchTransaction for DispatchService {
    fn create_transaction(&self) -> Transaction {
        Transaction::new(Arc::downgrade(&self.core), self.core.next_transaction_id())
    }
}

impl Component for DispatchService {
    fn initialize(&self, _config: &str) -> anyhow::Result<()> {
        self.core.set_status(ObjectStatus::Initializing);
        self.core.scheduler.start();
        self.core.set_status(ObjectStatus::Initialized);
        Ok(())
    }

    fn operation_mode(&self, mode: OperationMode) {
        let status = self.core.status();
        match mode {
            OperationMode::Configuring => {
                if status == ObjectStatus::Running || status == ObjectStatus::Initialized {
                    self.core.set_status(ObjectStatus::Configuring);
                }
            }
            OperationMode::Running => {
                if status == ObjectStatus::Configuring || status == ObjectStatus::Initialized {
                    self.core.set_status(ObjectStatus::Running);
                }
            }
        }
    }

    fn shutdown(&self) {
        self.core.set_status(ObjectStatus::ShuttingDown);
        self.core.scheduler.stop();
        self.core.set_status(ObjectStatus::InitPending);
    }
}

impl fmt::Debug for DispatchService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchService")
            .field("status", &self.core.status())
            .field(
                "rx_signals",
                &self.core.rx_signals.read().expect("signal map poisoned").len(),
            )
            .field(
                "tx_signals",
                &self.core.tx_signals.read().expect("signal map poisoned").len(),
            )
            .finish()
    }
}
