use cs_ranging_core::filter::{
    AmplitudeLimiter, DistanceFilter, FilterBank, FilterSettings, MAX_DISTANCE_CHANNELS,
};

fn close(left: f32, right: f32) -> bool {
    (left - right).abs() < 1e-5
}

#[test]
fn limiter_matches_reference_samples() {
    assert_eq!(AmplitudeLimiter::primed(10.0).apply(13.0), Some(11.0));
    assert_eq!(AmplitudeLimiter::primed(10.0).apply(10.5), Some(10.5));
    assert_eq!(AmplitudeLimiter::primed(10.0).apply(200.0), Some(10.0));
    assert_eq!(AmplitudeLimiter::primed(10.0).apply(0.001), Some(10.0));
    assert_eq!(AmplitudeLimiter::new().apply(200.0), None);
}

#[test]
fn limited_value_becomes_the_next_reference() {
    let mut limiter = AmplitudeLimiter::primed(10.0);
    assert_eq!(limiter.apply(20.0), Some(11.0));
    assert_eq!(limiter.apply(20.0), Some(12.0));
    assert_eq!(limiter.last(), Some(12.0));
}

#[test]
fn constant_input_converges_monotonically() {
    let mut filter = DistanceFilter::new(FilterSettings::DEFAULT);
    let target = 5.0;
    let mut previous_error = f32::INFINITY;
    for _ in 0..200 {
        let output = filter.apply(target).expect("plausible sample");
        let error = (target - output).abs();
        assert!(error <= previous_error, "error grew from {previous_error} to {error}");
        assert!(output <= target);
        previous_error = error;
    }
    assert!(previous_error < 0.05);
}

#[test]
fn non_finite_input_never_reaches_the_output() {
    let mut filter = DistanceFilter::default();
    assert_eq!(filter.apply(f32::NAN), None);

    let first = filter.apply(4.0).expect("plausible sample");
    for poison in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
        let output = filter.apply(poison).expect("substituted sample");
        assert!(output.is_finite());
        assert!(output >= first);
    }
    assert_eq!(filter.last_raw(), Some(4.0));
}

#[test]
fn degenerate_tuning_holds_the_last_output() {
    let mut filter = DistanceFilter::new(FilterSettings::new(f32::INFINITY, 0.1, 1.0));
    assert_eq!(filter.apply(3.0), None);

    let mut filter = DistanceFilter::new(FilterSettings::DEFAULT);
    let first = filter.apply(3.0).expect("plausible sample");
    assert!(first.is_finite());
    assert!(close(filter.last_output().unwrap_or_default(), first));
}

#[test]
fn channels_filter_independently_and_reset_together() {
    let mut bank = FilterBank::default();
    bank.apply(0, 2.0);
    bank.apply(1, 40.0);
    assert_eq!(bank.apply(MAX_DISTANCE_CHANNELS, 1.0), None);

    let near = bank.channel(0).and_then(DistanceFilter::last_output).expect("channel 0");
    let far = bank.channel(1).and_then(DistanceFilter::last_output).expect("channel 1");
    assert!(near < 2.0);
    assert!(far > near);
    assert_eq!(bank.channel(2).and_then(DistanceFilter::last_output), None);

    bank.reset();
    assert!((0..MAX_DISTANCE_CHANNELS).all(|index| {
        bank.channel(index)
            .is_some_and(|filter| filter.last_output().is_none() && filter.last_raw().is_none())
    }));
}
