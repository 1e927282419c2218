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

//! Tests for signal registration, the value store and transactions.

use pretty_assertions::assert_eq;

use std::sync::{Arc, Mutex};

use sdv_core::{Component, ObjectStatus, OperationMode};
use sdv_dispatch::{
    DispatchError, DispatchService, DispatchTransaction, SignalAccess, SignalDirection,
    SignalRegistration, SignalTransmission, Value,
};

/// Brings a fresh service into the configuration phase.
fn configuring_service() -> DispatchService {
    let service = DispatchService::new();
    service.initialize("").expect("initialization");
    service.operation_mode(OperationMode::Configuring);
    service
}

fn start(service: &DispatchService) {
    service.operation_mode(OperationMode::Running);
    assert_eq!(service.status(), ObjectStatus::Running);
}

fn collector() -> (Arc<Mutex<Vec<Value>>>, impl Fn(&Value) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |value: &Value| {
        sink.lock().unwrap().push(value.clone())
    })
}

#[test]
fn registration_is_gated_on_the_configuration_phase() {
    let service = DispatchService::new();
    assert_eq!(
        service
            .register_tx_signal("too.early", Value::from(0u32))
            .unwrap_err(),
        DispatchError::InvalidMode(ObjectStatus::InitPending)
    );

    let service = configuring_service();
    let _reader = service
        .register_tx_signal("on.time", Value::from(0u32))
        .expect("registration while configuring");

    start(&service);
    assert_eq!(
        service
            .register_rx_signal("too.late")
            .unwrap_err(),
        DispatchError::InvalidMode(ObjectStatus::Running)
    );
}

#[test]
fn subscribing_while_running_fails() {
    let service = configuring_service();
    let _writer = service.register_rx_signal("vehicle.speed").unwrap();
    start(&service);

    let (_seen, callback) = collector();
    assert_eq!(
        service.subscribe("vehicle.speed", callback).unwrap_err(),
        DispatchError::InvalidMode(ObjectStatus::Running)
    );
}

#[test]
fn unknown_signals_are_reported_per_direction() {
    let service = configuring_service();
    assert_eq!(
        service.request_publisher("missing").unwrap_err(),
        DispatchError::NotFound {
            name: "missing".to_owned(),
            direction: SignalDirection::Tx,
        }
    );
    let (_seen, callback) = collector();
    assert_eq!(
        service.subscribe("missing", callback).unwrap_err(),
        DispatchError::NotFound {
            name: "missing".to_owned(),
            direction: SignalDirection::Rx,
        }
    );
}

// Rx and tx signals of the same name are unrelated channels.
#[test]
fn direction_isolation() {
    let service = configuring_service();
    let speed_reader = service
        .register_tx_signal("speed", Value::from(0u32))
        .unwrap();
    let speed_in_writer = service.register_rx_signal("speed_in").unwrap();
    let _publisher = service.request_publisher("speed").unwrap();
    let (seen, callback) = collector();
    let _subscription = service.subscribe("speed_in", callback).unwrap();
    start(&service);

    speed_in_writer.write(100u32);

    assert_eq!(*seen.lock().unwrap(), vec![Value::from(100u32)]);
    assert_eq!(speed_reader.read(None), Value::from(0u32));
}

// A subscriber callback may feed another signal's publisher.
#[test]
fn cross_wired_bridge() {
    let service = configuring_service();
    let a_reader = service.register_tx_signal("a", Value::from(0u32)).unwrap();
    let b_writer = service.register_rx_signal("b").unwrap();
    let a_publisher = service.request_publisher("a").unwrap();
    let _bridge = service
        .subscribe("b", move |value: &Value| a_publisher.write(value.clone()))
        .unwrap();
    start(&service);

    assert_eq!(a_reader.read(None), Value::from(0u32));
    b_writer.write(42u32);
    assert_eq!(a_reader.read(None), Value::from(42u32));
}

#[test]
fn transactional_writes_are_atomic() {
    let service = configuring_service();
    let x_reader = service.register_tx_signal("x", Value::from(10i64)).unwrap();
    let y_reader = service.register_tx_signal("y", Value::from(20i64)).unwrap();
    let x_publisher = service.request_publisher("x").unwrap();
    let y_publisher = service.request_publisher("y").unwrap();
    start(&service);

    let write_txn = service.create_transaction();
    x_publisher.write_with(100i64, Some(&write_txn));
    y_publisher.write_with(200i64, Some(&write_txn));

    // A reader that started before finalization never sees the writes.
    let snapshot = service.create_transaction();
    assert_eq!(x_reader.read(Some(&snapshot)), Value::from(10i64));
    assert_eq!(y_reader.read(Some(&snapshot)), Value::from(20i64));

    write_txn.finish();

    assert_eq!(x_reader.read(Some(&snapshot)), Value::from(10i64));
    assert_eq!(y_reader.read(Some(&snapshot)), Value::from(20i64));

    // A reader starting after finalization sees all of them.
    let later = service.create_transaction();
    assert_eq!(x_reader.read(Some(&later)), Value::from(100i64));
    assert_eq!(y_reader.read(Some(&later)), Value::from(200i64));
}

#[test]
fn deferred_writes_to_one_signal_coalesce_to_the_last() {
    let service = configuring_service();
    let reader = service.register_tx_signal("x", Value::from(0i64)).unwrap();
    let publisher = service.request_publisher("x").unwrap();
    start(&service);

    let txn = service.create_transaction();
    publisher.write_with(1i64, Some(&txn));
    publisher.write_with(2i64, Some(&txn));
    publisher.write_with(3i64, Some(&txn));
    txn.finish();

    assert_eq!(reader.read(None), Value::from(3i64));
}

#[test]
fn discarded_transactions_apply_nothing() {
    let service = configuring_service();
    let reader = service.register_tx_signal("x", Value::from(7i64)).unwrap();
    let publisher = service.request_publisher("x").unwrap();
    start(&service);

    let txn = service.create_transaction();
    publisher.write_with(99i64, Some(&txn));
    txn.discard();

    assert_eq!(reader.read(None), Value::from(7i64));
}

#[test]
fn read_transactions_are_repeatable() {
    let service = configuring_service();
    let reader = service.register_tx_signal("s", Value::from(0i64)).unwrap();
    let publisher = service.request_publisher("s").unwrap();
    start(&service);

    publisher.write(1i64);
    let snapshot = service.create_transaction();
    assert_eq!(reader.read(Some(&snapshot)), Value::from(1i64));

    // Direct writes after the snapshot was pinned are not observed.
    publisher.write(2i64);
    assert_eq!(reader.read(Some(&snapshot)), Value::from(1i64));
    assert_eq!(reader.read(None), Value::from(2i64));
}

#[test]
fn a_transaction_commits_to_one_kind() {
    let service = configuring_service();
    let reader = service.register_tx_signal("s", Value::from(5i64)).unwrap();
    let publisher = service.request_publisher("s").unwrap();
    start(&service);

    publisher.write(6i64);

    // First use makes it a write transaction; reads through it fall back
    // to the most recent value.
    let txn = service.create_transaction();
    publisher.write_with(7i64, Some(&txn));
    assert_eq!(reader.read(Some(&txn)), Value::from(6i64));
    txn.finish();
    assert_eq!(reader.read(None), Value::from(7i64));

    // And the other way round: a read transaction ignores deferred writes.
    let snapshot = service.create_transaction();
    assert_eq!(reader.read(Some(&snapshot)), Value::from(7i64));
    publisher.write_with(8i64, Some(&snapshot));
    snapshot.finish();
    assert_eq!(reader.read(None), Value::from(7i64));
}

#[test]
fn reads_before_the_first_write_yield_the_default() {
    let service = configuring_service();
    let reader = service
        .register_tx_signal("fresh", Value::from(123u32))
        .unwrap();
    let publisher = service.request_publisher("fresh").unwrap();
    start(&service);

    let early = service.create_transaction();
    assert_eq!(reader.read(Some(&early)), Value::from(123u32));
    assert_eq!(reader.read(None), Value::from(123u32));

    publisher.write(5u32);
    // The early snapshot predates the write.
    assert_eq!(reader.read(Some(&early)), Value::from(123u32));
}

#[test]
fn seventeen_transactions_evict_the_oldest_slot() {
    let service = configuring_service();
    let reader = service.register_tx_signal("r", Value::from(0i64)).unwrap();
    let publisher = service.request_publisher("r").unwrap();
    start(&service);

    let write = |value: i64| {
        let txn = service.create_transaction();
        publisher.write_with(value, Some(&txn));
        txn.finish();
    };

    write(1);
    let pinned = service.create_transaction();
    assert_eq!(reader.read(Some(&pinned)), Value::from(1i64));

    // Fifteen more writes keep the first slot in the ring.
    for value in 2..=16 {
        write(value);
    }
    assert_eq!(reader.read(Some(&pinned)), Value::from(1i64));

    // The seventeenth write evicts it; the pinned snapshot now predates
    // every retained slot and falls back to the default.
    write(17);
    assert_eq!(reader.read(Some(&pinned)), Value::from(0i64));
    assert_eq!(reader.read(None), Value::from(17i64));
}

#[test]
fn writes_outside_the_running_state_are_dropped() {
    let service = configuring_service();
    let reader = service.register_tx_signal("s", Value::from(0u32)).unwrap();
    let publisher = service.request_publisher("s").unwrap();

    publisher.write(9u32);
    assert_eq!(reader.read(None), Value::from(0u32));

    start(&service);
    publisher.write(9u32);
    assert_eq!(reader.read(None), Value::from(9u32));
}

#[test]
fn several_publishers_may_write_one_signal() {
    let service = configuring_service();
    let reader = service.register_tx_signal("s", Value::from(0u32)).unwrap();
    let first = service.request_publisher("s").unwrap();
    let second = service.request_publisher("s").unwrap();
    start(&service);

    first.write(1u32);
    second.write(2u32);
    assert_eq!(reader.read(None), Value::from(2u32));
}

#[test]
fn signals_live_until_the_last_endpoint_is_gone() {
    let service = configuring_service();
    let reader = service.register_tx_signal("gone", Value::from(5u32)).unwrap();
    let publisher = service.request_publisher("gone").unwrap();

    drop(publisher);
    assert_eq!(
        service.registered_signals(),
        vec![SignalRegistration {
            name: "gone".to_owned(),
            direction: SignalDirection::Tx,
        }]
    );

    drop(reader);
    assert_eq!(service.registered_signals(), Vec::new());
    assert!(matches!(
        service.request_publisher("gone"),
        Err(DispatchError::NotFound { .. })
    ));
}

#[test]
fn enumeration_lists_rx_before_tx() {
    let service = configuring_service();
    let _writer = service.register_rx_signal("b_in").unwrap();
    let _reader = service.register_tx_signal("a_out", Value::Empty).unwrap();

    assert_eq!(
        service.registered_signals(),
        vec![
            SignalRegistration {
                name: "b_in".to_owned(),
                direction: SignalDirection::Rx,
            },
            SignalRegistration {
                name: "a_out".to_owned(),
                direction: SignalDirection::Tx,
            },
        ]
    );
}

#[test]
fn panicking_subscribers_do_not_poison_the_writer() {
    let service = configuring_service();
    let writer = service.register_rx_signal("s").unwrap();
    let _bomb = service
        .subscribe("s", |_value: &Value| panic!("subscriber bug"))
        .unwrap();
    let (seen, callback) = collector();
    let _tail = service.subscribe("s", callback).unwrap();
    start(&service);

    writer.write(1u32);
    writer.write(2u32);

    assert_eq!(
        *seen.lock().unwrap(),
        vec![Value::from(1u32), Value::from(2u32)]
    );
}

#[test]
fn shutdown_resets_the_service() {
    let service = configuring_service();
    let reader = service.register_tx_signal("s", Value::from(0u32)).unwrap();
    let publisher = service.request_publisher("s").unwrap();
    start(&service);
    publisher.write(3u32);

    service.shutdown();
    assert_eq!(service.status(), ObjectStatus::InitPending);

    // Values written after shutdown are dropped.
    publisher.write(4u32);
    assert_eq!(reader.read(None), Value::from(3u32));
}
