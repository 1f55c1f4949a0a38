//! Two-stage smoothing applied to raw Channel Sounding distance estimates.
//!
//! Stage one is an amplitude limiter that rejects implausible samples and
//! rate-limits large jumps. Stage two is a scalar Kalman filter. Each logical
//! distance channel owns an independent [`DistanceFilter`]; a ranging session
//! holds up to [`MAX_DISTANCE_CHANNELS`] of them in a [`FilterBank`].
//!
//! Consumers never observe NaN or infinity: non-finite inputs are replaced by
//! the last valid raw sample and non-finite outputs by the last valid filtered
//! value.

/// Maximum number of concurrent distance estimates a single procedure yields.
pub const MAX_DISTANCE_CHANNELS: usize = 3;

/// Shortest distance considered a real measurement (meters).
pub const MIN_PLAUSIBLE_DISTANCE_M: f32 = 0.01;
/// Longest distance considered a real measurement (meters).
pub const MAX_PLAUSIBLE_DISTANCE_M: f32 = 150.0;
/// Jump size above which a sample is rate-limited (meters).
pub const JUMP_THRESHOLD_M: f32 = 2.0;
/// Largest step applied to a rate-limited sample (meters).
pub const MAX_STEP_M: f32 = 1.0;

/// Tuning for the scalar Kalman stage.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FilterSettings {
    pub process_noise: f32,
    pub measurement_noise: f32,
    pub initial_error_cov: f32,
}

impl FilterSettings {
    pub const DEFAULT: Self = Self {
        process_noise: 0.01,
        measurement_noise: 0.1,
        initial_error_cov: 1.0,
    };

    #[must_use]
    pub const fn new(process_noise: f32, measurement_noise: f32, initial_error_cov: f32) -> Self {
        Self {
            process_noise,
            measurement_noise,
            initial_error_cov,
        }
    }
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Stage one: holds out-of-range samples and clamps large jumps.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct AmplitudeLimiter {
    last: Option<f32>,
}

impl AmplitudeLimiter {
    #[must_use]
    pub const fn new() -> Self {
        Self { last: None }
    }

    /// Creates a limiter that already holds `previous` as its last output.
    #[must_use]
    pub const fn primed(previous: f32) -> Self {
        Self {
            last: Some(previous),
        }
    }

    /// Last amplitude-filtered value, if any sample has been accepted.
    #[must_use]
    pub const fn last(&self) -> Option<f32> {
        self.last
    }

    /// Limits `raw` against the previous output.
    ///
    /// Returns `None` only while no plausible sample has ever been seen.
    pub fn apply(&mut self, raw: f32) -> Option<f32> {
        if !(MIN_PLAUSIBLE_DISTANCE_M..=MAX_PLAUSIBLE_DISTANCE_M).contains(&raw) {
            return self.last;
        }

        let limited = match self.last {
            Some(previous) if raw - previous > JUMP_THRESHOLD_M => previous + MAX_STEP_M,
            Some(previous) if previous - raw > JUMP_THRESHOLD_M => previous - MAX_STEP_M,
            _ => raw,
        };

        self.last = Some(limited);
        Some(limited)
    }
}

/// Stage two: discrete scalar Kalman filter.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ScalarKalman {
    estimate: f32,
    error_cov: f32,
    process_noise: f32,
    measurement_noise: f32,
    gain: f32,
}

impl ScalarKalman {
    #[must_use]
    pub const fn new(settings: FilterSettings) -> Self {
        Self {
            estimate: 0.0,
            error_cov: settings.initial_error_cov,
            process_noise: settings.process_noise,
            measurement_noise: settings.measurement_noise,
            gain: 0.0,
        }
    }

    #[must_use]
    pub const fn estimate(&self) -> f32 {
        self.estimate
    }

    #[must_use]
    pub const fn error_cov(&self) -> f32 {
        self.error_cov
    }

    #[must_use]
    pub const fn gain(&self) -> f32 {
        self.gain
    }

    /// Folds `measurement` into the estimate and returns the new state.
    pub fn update(&mut self, measurement: f32) -> f32 {
        self.error_cov += self.process_noise;
        self.gain = self.error_cov / (self.error_cov + self.measurement_noise);
        self.estimate += self.gain * (measurement - self.estimate);
        self.error_cov *= 1.0 - self.gain;
        self.estimate
    }

    /// Restores the estimate after a degenerate update.
    fn restore(&mut self, estimate: f32, error_cov: f32) {
        self.estimate = estimate;
        self.error_cov = error_cov;
        self.gain = 0.0;
    }
}

impl Default for ScalarKalman {
    fn default() -> Self {
        Self::new(FilterSettings::DEFAULT)
    }
}

/// Complete filter pipeline for one logical distance channel.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DistanceFilter {
    settings: FilterSettings,
    last_raw: Option<f32>,
    limiter: AmplitudeLimiter,
    kalman: ScalarKalman,
    last_output: Option<f32>,
}

impl DistanceFilter {
    #[must_use]
    pub const fn new(settings: FilterSettings) -> Self {
        Self {
            settings,
            last_raw: None,
            limiter: AmplitudeLimiter::new(),
            kalman: ScalarKalman::new(settings),
            last_output: None,
        }
    }

    /// Clears all history ahead of a new ranging session.
    pub fn reset(&mut self) {
        *self = Self::new(self.settings);
    }

    #[must_use]
    pub const fn last_raw(&self) -> Option<f32> {
        self.last_raw
    }

    #[must_use]
    pub const fn last_limited(&self) -> Option<f32> {
        self.limiter.last()
    }

    #[must_use]
    pub const fn last_output(&self) -> Option<f32> {
        self.last_output
    }

    #[must_use]
    pub const fn kalman(&self) -> &ScalarKalman {
        &self.kalman
    }

    /// Runs one raw sample through both stages.
    ///
    /// Returns `None` until the channel has produced its first finite output.
    pub fn apply(&mut self, raw: f32) -> Option<f32> {
        let raw = if raw.is_finite() {
            self.last_raw = Some(raw);
            raw
        } else {
            match self.last_raw {
                Some(previous) => previous,
                None => return self.last_output,
            }
        };

        let Some(limited) = self.limiter.apply(raw) else {
            return self.last_output;
        };

        let error_cov = self.kalman.error_cov();
        let filtered = self.kalman.update(limited);
        if filtered.is_finite() {
            self.last_output = Some(filtered);
        } else if let Some(previous) = self.last_output {
            self.kalman.restore(previous, error_cov);
        } else {
            self.kalman = ScalarKalman::new(self.settings);
        }

        self.last_output
    }
}

impl Default for DistanceFilter {
    fn default() -> Self {
        Self::new(FilterSettings::DEFAULT)
    }
}

/// Filters for every distance channel of a ranging session.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FilterBank {
    channels: [DistanceFilter; MAX_DISTANCE_CHANNELS],
}

impl FilterBank {
    #[must_use]
    pub const fn new(settings: FilterSettings) -> Self {
        Self {
            channels: [DistanceFilter::new(settings); MAX_DISTANCE_CHANNELS],
        }
    }

    pub fn reset(&mut self) {
        for channel in &mut self.channels {
            channel.reset();
        }
    }

    /// Returns the filter for `index`, if it names a supported channel.
    #[must_use]
    pub fn channel(&self, index: usize) -> Option<&DistanceFilter> {
        self.channels.get(index)
    }

    /// Filters `raw` on channel `index`.
    pub fn apply(&mut self, index: usize, raw: f32) -> Option<f32> {
        self.channels.get_mut(index)?.apply(raw)
    }
}

impl Default for FilterBank {
    fn default() -> Self {
        Self::new(FilterSettings::DEFAULT)
    }
}
