use super::backoff::Backoff;
use super::logging;
use std::time::Duration;

#[test]
fn logging_init_accepts_levels() {
    // Should not panic
    logging::init("info", "text");
    logging::init("debug", "json");
    logging::init("warn", "text");
    logging::init("bogus", "bogus");
}

#[test]
fn backoff_doubles_until_capped() {
    let backoff = Backoff::from_millis(1000, 60_000, 2.0);

    assert_eq!(backoff.delay(0), Duration::from_millis(1000));
    assert_eq!(backoff.delay(1), Duration::from_millis(2000));
    assert_eq!(backoff.delay(2), Duration::from_millis(4000));
    assert_eq!(backoff.delay(5), Duration::from_millis(32_000));
    assert_eq!(backoff.delay(6), Duration::from_millis(60_000));
    assert_eq!(backoff.delay(7), Duration::from_millis(60_000));
}

#[test]
fn backoff_survives_huge_retry_counts() {
    let backoff = Backoff::from_millis(500, 30_000, 2.0);
    assert_eq!(backoff.delay(u32::MAX), Duration::from_millis(30_000));
}

#[test]
fn backoff_clamps_degenerate_parameters() {
    // multiplier below 1 would shrink delays; max below initial would invert the cap
    let backoff = Backoff::from_millis(200, 100, 0.5);
    assert_eq!(backoff.delay(0), Duration::from_millis(200));
    assert_eq!(backoff.delay(3), Duration::from_millis(200));
    assert_eq!(backoff.max(), Duration::from_millis(200));
}
