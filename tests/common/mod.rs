/*
 * Shared helpers for the kernel scenario tests.
 *
 * Processes under test record labeled events into a global journal; the
 * driving test (running as the null process) asserts on the resulting
 * order. The journal mutex is never held across a blocking kernel call,
 * so it is safe to touch from any process on the shared OS thread.
 */

#![allow(dead_code)]

use std::sync::Mutex;

pub static EVENTS: Mutex<Vec<(&'static str, u64)>> = Mutex::new(Vec::new());

/// Append one labeled event to the journal.
pub fn record(label: &'static str, value: u64) {
    EVENTS.lock().unwrap().push((label, value));
}

/// Snapshot the journal.
pub fn events() -> Vec<(&'static str, u64)> {
    EVENTS.lock().unwrap().clone()
}

/// Snapshot only the labels, for order assertions.
pub fn labels() -> Vec<&'static str> {
    EVENTS.lock().unwrap().iter().map(|e| e.0).collect()
}

/// Values recorded under one label, in order.
pub fn values_of(label: &str) -> Vec<u64> {
    EVENTS
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.0 == label)
        .map(|e| e.1)
        .collect()
}
