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

//! Tests for transmission triggers, their scheduler and timing contracts.
//!
//! The timing assertions use generous windows; they check the contracts
//! (coalescing, suppression, minimum spacing), not precise latencies.

use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use sdv_core::{Component, ObjectStatus, OperationMode};
use sdv_dispatch::{
    DispatchError, DispatchService, DispatchTransaction, SignalAccess, SignalTransmission,
    TriggerBehavior, Value,
};

fn configuring_service() -> DispatchService {
    let service = DispatchService::new();
    service.initialize("").expect("initialization");
    service.operation_mode(OperationMode::Configuring);
    service
}

fn start(service: &DispatchService) {
    service.operation_mode(OperationMode::Running);
}

fn counting() -> (Arc<AtomicU32>, impl Fn() + Send + Sync + 'static) {
    let count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&count);
    (count, move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

fn sleep_ms(ms: u64) {
    thread::sleep(Duration::from_millis(ms));
}

#[test]
fn triggers_that_would_never_fire_are_rejected() {
    let service = configuring_service();
    let (_count, callback) = counting();
    assert_eq!(
        service
            .create_trigger(0, 0, TriggerBehavior::default(), callback)
            .unwrap_err(),
        DispatchError::InvalidTrigger
    );
}

#[test]
fn trigger_creation_is_gated_on_the_configuration_phase() {
    let service = configuring_service();
    start(&service);
    let (_count, callback) = counting();
    assert_eq!(
        service
            .create_trigger(10, 0, TriggerBehavior::spontaneous(), callback)
            .unwrap_err(),
        DispatchError::InvalidMode(ObjectStatus::Running)
    );
}

#[test]
fn spontaneous_triggers_fire_per_write() {
    let service = configuring_service();
    let _reader = service.register_tx_signal("s", Value::from(0u32)).unwrap();
    let publisher = service.request_publisher("s").unwrap();
    let (count, callback) = counting();
    let trigger = service
        .create_trigger(0, 0, TriggerBehavior::spontaneous(), callback)
        .unwrap();
    assert!(trigger.attach_signal("s"));
    start(&service);

    publisher.write(1u32);
    publisher.write(2u32);
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[test]
fn triggers_do_not_fire_while_configuring() {
    let service = configuring_service();
    let _reader = service.register_tx_signal("s", Value::from(0u32)).unwrap();
    let publisher = service.request_publisher("s").unwrap();
    let (count, callback) = counting();
    let trigger = service
        .create_trigger(0, 0, TriggerBehavior::spontaneous(), callback)
        .unwrap();
    assert!(trigger.attach_signal("s"));

    publisher.write(1u32);
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn writes_do_not_reach_triggers_without_spontaneous_behavior() {
    let service = configuring_service();
    let _reader = service.register_tx_signal("s", Value::from(0u32)).unwrap();
    let publisher = service.request_publisher("s").unwrap();
    let (count, callback) = counting();
    // Periodic-only trigger with a long cycle.
    let trigger = service
        .create_trigger(60_000, 0, TriggerBehavior::default(), callback)
        .unwrap();
    assert!(trigger.attach_signal("s"));
    start(&service);

    publisher.write(1u32);
    publisher.write(2u32);
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn attaching_requires_a_registered_tx_signal() {
    let service = configuring_service();
    let _writer = service.register_rx_signal("incoming").unwrap();
    let (_count, callback) = counting();
    let trigger = service
        .create_trigger(0, 0, TriggerBehavior::spontaneous(), callback)
        .unwrap();

    assert!(!trigger.attach_signal("unknown"));
    // Rx signals are not eligible.
    assert!(!trigger.attach_signal("incoming"));
}

// Spec scenario: five writes inside the minimum-delay window coalesce into
// the immediate firing plus at most one deferred firing.
#[test]
fn min_delay_coalesces_bursts() {
    let service = configuring_service();
    let _reader = service.register_tx_signal("s", Value::from(0u32)).unwrap();
    let publisher = service.request_publisher("s").unwrap();
    let (count, callback) = counting();
    let trigger = service
        .create_trigger(0, 200, TriggerBehavior::spontaneous(), callback)
        .unwrap();
    assert!(trigger.attach_signal("s"));
    start(&service);

    for value in 0..5u32 {
        publisher.write(value);
        sleep_ms(2);
    }
    assert_eq!(count.load(Ordering::SeqCst), 1);

    // The deferred, coalesced firing arrives once the delay has passed.
    sleep_ms(400);
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[test]
fn consecutive_firings_respect_the_minimum_delay() {
    let service = configuring_service();
    let _reader = service.register_tx_signal("s", Value::from(0u32)).unwrap();
    let publisher = service.request_publisher("s").unwrap();

    let stamps: Arc<Mutex<Vec<Instant>>> = Default::default();
    let sink = Arc::clone(&stamps);
    let trigger = service
        .create_trigger(0, 40, TriggerBehavior::spontaneous(), move || {
            sink.lock().unwrap().push(Instant::now());
        })
        .unwrap();
    assert!(trigger.attach_signal("s"));
    start(&service);

    let deadline = Instant::now() + Duration::from_millis(200);
    let mut value = 0u32;
    while Instant::now() < deadline {
        publisher.write(value);
        value += 1;
        sleep_ms(5);
    }
    sleep_ms(100);

    let stamps = stamps.lock().unwrap();
    assert!(stamps.len() >= 2, "only {} firings observed", stamps.len());
    for pair in stamps.windows(2) {
        let spacing = pair[1] - pair[0];
        // 40 ms contract, 1 ms scheduler granularity plus thread wakeup
        // jitter.
        assert!(
            spacing >= Duration::from_millis(35),
            "firings only {:?} apart",
            spacing
        );
    }
}

#[test]
fn periodic_triggers_fire_on_their_own_timer() {
    let service = configuring_service();
    let (count, callback) = counting();
    let _trigger = service
        .create_trigger(15, 0, TriggerBehavior::default(), callback)
        .unwrap();
    start(&service);

    sleep_ms(120);
    let fired = count.load(Ordering::SeqCst);
    assert!(fired >= 3, "only {} firings in 120 ms at a 15 ms cycle", fired);
}

// Spec scenario: periodic_if_active suppresses periodic firings after one
// all-default evaluation, and writing a non-default value revives them.
#[test]
fn periodic_if_active_suppresses_idle_signals() {
    let service = configuring_service();
    let _reader = service.register_tx_signal("u", Value::from(0u32)).unwrap();
    let publisher = service.request_publisher("u").unwrap();
    let (count, callback) = counting();
    let trigger = service
        .create_trigger(15, 0, TriggerBehavior::periodic_if_active(), callback)
        .unwrap();
    assert!(trigger.attach_signal("u"));
    start(&service);

    sleep_ms(100);
    let while_idle = count.load(Ordering::SeqCst);
    assert!(
        while_idle <= 1,
        "{} firings although the signal rested at its default",
        while_idle
    );

    publisher.write(7u32);
    sleep_ms(60);
    assert!(count.load(Ordering::SeqCst) > while_idle);
}

#[test]
fn one_transaction_fires_an_attached_trigger_once() {
    let service = configuring_service();
    let _x = service.register_tx_signal("x", Value::from(0u32)).unwrap();
    let _y = service.register_tx_signal("y", Value::from(0u32)).unwrap();
    let x_publisher = service.request_publisher("x").unwrap();
    let y_publisher = service.request_publisher("y").unwrap();
    let (count, callback) = counting();
    let trigger = service
        .create_trigger(0, 0, TriggerBehavior::spontaneous(), callback)
        .unwrap();
    assert!(trigger.attach_signal("x"));
    assert!(trigger.attach_signal("y"));
    start(&service);

    let txn = service.create_transaction();
    x_publisher.write_with(1u32, Some(&txn));
    y_publisher.write_with(2u32, Some(&txn));
    txn.finish();

    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn dropping_the_handle_destroys_the_trigger() {
    let service = configuring_service();
    let _reader = service.register_tx_signal("s", Value::from(0u32)).unwrap();
    let publisher = service.request_publisher("s").unwrap();
    let (count, callback) = counting();
    let trigger = service
        .create_trigger(10, 0, TriggerBehavior::spontaneous(), callback)
        .unwrap();
    assert!(trigger.attach_signal("s"));
    start(&service);

    publisher.write(1u32);
    let before = count.load(Ordering::SeqCst);
    assert!(before >= 1);

    drop(trigger);
    sleep_ms(50);
    let after_drop = count.load(Ordering::SeqCst);
    publisher.write(2u32);
    sleep_ms(30);
    assert_eq!(count.load(Ordering::SeqCst), after_drop);
}

#[test]
fn detached_signals_no_longer_fire_the_trigger() {
    let service = configuring_service();
    let _reader = service.register_tx_signal("s", Value::from(0u32)).unwrap();
    let publisher = service.request_publisher("s").unwrap();
    let (count, callback) = counting();
    let trigger = service
        .create_trigger(0, 0, TriggerBehavior::spontaneous(), callback)
        .unwrap();
    assert!(trigger.attach_signal("s"));
    start(&service);

    publisher.write(1u32);
    assert_eq!(count.load(Ordering::SeqCst), 1);

    trigger.detach_signal("s");
    publisher.write(2u32);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}
