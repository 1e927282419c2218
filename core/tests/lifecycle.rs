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

//! High-level tests for startup, mode transitions, the running loop and
//! shutdown.

use pretty_assertions::assert_eq;

use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use sdv_core::{
    AppEvent, BuiltObject, ClassDescriptor, Component, InterfaceMap, ModuleInfo, ObjectConfig,
    ObjectKind, ObjectStatus, OperationMode, OperationState, Runtime, RuntimeConfig,
};

type Journal = Arc<Mutex<Vec<String>>>;

/// Component recording every hook invocation into a shared journal.
struct Probe {
    name: String,
    journal: Journal,
    fail_init: bool,
}

impl Component for Probe {
    fn initialize(&self, config: &str) -> anyhow::Result<()> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("init:{}:{}", self.name, config));
        if self.fail_init {
            anyhow::bail!("refusing to initialize");
        }
        Ok(())
    }

    fn operation_mode(&self, mode: OperationMode) {
        self.journal
            .lock()
            .unwrap()
            .push(format!("mode:{}:{}", self.name, mode));
    }

    fn shutdown(&self) {
        self.journal.lock().unwrap().push(format!("down:{}", self.name));
    }
}

fn register_probe(runtime: &Runtime, descriptor: ClassDescriptor, journal: &Journal, fail_init: bool) {
    let journal = Arc::clone(journal);
    let class_name = descriptor.class_name.clone();
    runtime
        .catalog()
        .register_class(
            descriptor,
            Arc::new(move |_config| {
                BuiltObject::new(
                    Arc::new(Probe {
                        name: class_name.clone(),
                        journal: Arc::clone(&journal),
                        fail_init,
                    }),
                    InterfaceMap::default(),
                )
            }),
        )
        .expect("class registration");
}

fn collect_states(runtime: &Runtime) -> Arc<Mutex<Vec<OperationState>>> {
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    runtime.on_event(Box::new(move |event| {
        if let AppEvent::OperationStateChanged(state) = event {
            sink.lock().unwrap().push(*state);
        }
    }));
    states
}

fn testbed(journal: &Journal) -> Runtime {
    let runtime = Runtime::new();
    let module = runtime.catalog().register_module(ModuleInfo {
        filename: "libprobe.so".to_owned(),
        version: "0.9.0".to_owned(),
        active: true,
        path: "/opt/sdv/modules/libprobe.so".into(),
    });
    register_probe(
        &runtime,
        ClassDescriptor::new("Bus", ObjectKind::BasicService, module),
        journal,
        false,
    );
    register_probe(
        &runtime,
        ClassDescriptor::new("Gauge", ObjectKind::Application, module).with_dependency("Bus"),
        journal,
        false,
    );
    runtime
}

fn config_with(objects: Vec<ObjectConfig>) -> RuntimeConfig {
    RuntimeConfig {
        instance_id: 1000,
        loop_tick_ms: 5,
        objects,
    }
}

fn object(class: &str) -> ObjectConfig {
    ObjectConfig {
        class: class.to_owned(),
        name: None,
        config: String::new(),
    }
}

#[test]
fn startup_emits_the_full_state_sequence() {
    let journal: Journal = Default::default();
    let runtime = testbed(&journal);
    let states = collect_states(&runtime);

    runtime
        .startup(&config_with(vec![object("Gauge"), object("Bus")]))
        .expect("startup");

    assert_eq!(
        *states.lock().unwrap(),
        vec![
            OperationState::Initializing,
            OperationState::Initialized,
            OperationState::Configuring,
            OperationState::Running,
        ]
    );
    assert_eq!(runtime.operation_state(), OperationState::Running);
    for info in runtime.repository().list() {
        assert_eq!(info.status, ObjectStatus::Running);
    }
}

#[test]
fn startup_orders_hooks_by_dependencies() {
    let journal: Journal = Default::default();
    let runtime = testbed(&journal);

    // The configuration lists the dependent object first on purpose.
    runtime
        .startup(&config_with(vec![object("Gauge"), object("Bus")]))
        .expect("startup");

    assert_eq!(
        *journal.lock().unwrap(),
        vec![
            "init:Bus:",
            "init:Gauge:",
            "mode:Bus:configuring",
            "mode:Gauge:configuring",
            "mode:Bus:running",
            "mode:Gauge:running",
        ]
    );
}

#[test]
fn failed_startup_rolls_back_and_reports() {
    let journal: Journal = Default::default();
    let runtime = testbed(&journal);
    let states = collect_states(&runtime);

    let result = runtime.startup(&config_with(vec![object("NoSuchClass")]));
    assert!(result.is_err());

    assert_eq!(
        *states.lock().unwrap(),
        vec![
            OperationState::Initializing,
            OperationState::ShuttingDown,
            OperationState::NotStarted,
        ]
    );
    assert_eq!(runtime.operation_state(), OperationState::NotStarted);
    assert!(runtime.repository().list().is_empty());
}

#[test]
fn init_failure_marks_dependents_without_running_their_hook() {
    let journal: Journal = Default::default();
    let runtime = Runtime::new();
    let module = runtime.catalog().register_module(ModuleInfo::default());
    register_probe(
        &runtime,
        ClassDescriptor::new("Bus", ObjectKind::BasicService, module),
        &journal,
        true,
    );
    register_probe(
        &runtime,
        ClassDescriptor::new("Gauge", ObjectKind::Application, module).with_dependency("Bus"),
        &journal,
        false,
    );

    runtime
        .startup(&config_with(vec![object("Bus"), object("Gauge")]))
        .expect("partial initialization is not a startup failure");

    let info = runtime.repository().list();
    assert_eq!(info[0].status, ObjectStatus::InitFailure);
    assert_eq!(info[1].status, ObjectStatus::InitFailure);
    assert!(!journal.lock().unwrap().iter().any(|line| line == "init:Gauge:"));
}

#[test]
fn set_mode_reverses_order_on_backward_transitions() {
    let journal: Journal = Default::default();
    let runtime = testbed(&journal);
    runtime
        .startup(&config_with(vec![object("Bus"), object("Gauge")]))
        .expect("startup");
    journal.lock().unwrap().clear();

    runtime.set_mode(OperationMode::Configuring).expect("running -> configuring");
    runtime.set_mode(OperationMode::Running).expect("configuring -> running");

    assert_eq!(
        *journal.lock().unwrap(),
        vec![
            "mode:Gauge:configuring",
            "mode:Bus:configuring",
            "mode:Bus:running",
            "mode:Gauge:running",
        ]
    );
}

#[test]
fn shutdown_releases_objects_in_reverse_order() {
    let journal: Journal = Default::default();
    let runtime = testbed(&journal);
    let states = collect_states(&runtime);
    runtime
        .startup(&config_with(vec![object("Bus"), object("Gauge")]))
        .expect("startup");
    journal.lock().unwrap().clear();

    runtime.shutdown();

    assert_eq!(*journal.lock().unwrap(), vec!["down:Gauge", "down:Bus"]);
    assert!(runtime.repository().list().is_empty());
    assert_eq!(runtime.operation_state(), OperationState::NotStarted);
    let observed = states.lock().unwrap();
    assert_eq!(
        observed[observed.len() - 2..],
        [OperationState::ShuttingDown, OperationState::NotStarted]
    );
}

#[test]
fn run_loop_ticks_until_shutdown_is_requested() {
    let journal: Journal = Default::default();
    let runtime = Arc::new(testbed(&journal));
    runtime
        .startup(&config_with(vec![object("Bus")]))
        .expect("startup");

    let ticks = Arc::new(Mutex::new(0u32));
    let counter = Arc::clone(&ticks);
    runtime.on_event(Box::new(move |event| {
        if let AppEvent::LoopTick = event {
            *counter.lock().unwrap() += 1;
        }
    }));

    let handle = runtime.shutdown_handle();
    let worker = {
        let runtime = Arc::clone(&runtime);
        thread::spawn(move || runtime.run_loop())
    };

    thread::sleep(Duration::from_millis(40));
    handle.request_shutdown();
    worker.join().unwrap().expect("loop returns cleanly");

    assert!(*ticks.lock().unwrap() > 0);
    assert_eq!(runtime.operation_state(), OperationState::Running);
    runtime.shutdown();
}

#[test]
fn objects_created_at_runtime_join_the_current_mode() {
    let journal: Journal = Default::default();
    let runtime = testbed(&journal);
    runtime
        .startup(&config_with(vec![object("Bus")]))
        .expect("startup");
    journal.lock().unwrap().clear();

    let id = runtime
        .create_object("Gauge", Some("LateGauge"), "tuned")
        .expect("creation while running");

    assert_eq!(runtime.repository().status(id), Some(ObjectStatus::Running));
    assert_eq!(
        *journal.lock().unwrap(),
        vec!["init:Gauge:tuned", "mode:Gauge:running"]
    );
}

#[test]
fn runtime_config_deserializes_from_toml() {
    let raw = r#"
        instance_id = 1000
        loop_tick_ms = 50

        [[objects]]
        class = "Bus"

        [[objects]]
        class = "Gauge"
        name = "MainGauge"
        config = "limit = 7"
    "#;
    let config: RuntimeConfig = toml::from_str(raw).expect("valid configuration");
    assert_eq!(config.instance_id, 1000);
    assert_eq!(config.loop_tick_ms, 50);
    assert_eq!(config.objects.len(), 2);
    assert_eq!(config.objects[1].name.as_deref(), Some("MainGauge"));
    assert_eq!(config.objects[1].config, "limit = 7");
}
