use super::*;

#[test]
fn fake_clock_advances_both_instant_and_epoch() {
    let clock = FakeClock::new();
    let start = clock.now();
    let start_epoch = clock.epoch_ms();

    clock.advance(Duration::from_secs(5));

    assert_eq!(clock.now() - start, Duration::from_secs(5));
    assert_eq!(clock.epoch_ms() - start_epoch, 5_000);
}

#[test]
fn system_clock_epoch_ms_is_plausible() {
    let clock = SystemClock;
    assert!(clock.epoch_ms() > 1_700_000_000_000);
}
