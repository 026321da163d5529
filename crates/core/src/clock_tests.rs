// SPDX-License-Identifier: MIT

use super::*;

#[test]
fn system_clock_monotonic() {
    let clock = SystemClock;
    let a = clock.now();
    let b = clock.now();
    assert!(b >= a);
}

#[test]
fn fake_clock_advance() {
    let clock = FakeClock::new();
    let start = clock.now();
    let start_ms = clock.epoch_ms();

    clock.advance(Duration::from_secs(90));

    assert_eq!(clock.now().duration_since(start), Duration::from_secs(90));
    assert_eq!(clock.epoch_ms(), start_ms + 90_000);
}

#[test]
fn fake_clock_set_epoch() {
    let clock = FakeClock::new();
    clock.set_epoch_ms(42);
    assert_eq!(clock.epoch_ms(), 42);
}

#[test]
fn fake_clock_clones_share_state() {
    let clock = FakeClock::new();
    let other = clock.clone();
    clock.advance(Duration::from_secs(5));
    assert_eq!(other.epoch_ms(), clock.epoch_ms());
}
