//! Synthetic point detector.
//!
//! Each trigger produces `base_counts * gain * exposure_time` counts plus
//! Gaussian noise with `sigma = sqrt(base) * noise_fraction`, clamped at
//! zero. Acquisition is instantaneous, so the returned status is already
//! resolved.
//!
//! | component       | kind   | units  |
//! |-----------------|--------|--------|
//! | `intensity`     | hinted | counts |
//! | `exposure_time` | config | s      |
//! | `gain`          | config |        |

use parking_lot::Mutex;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use simdaq_core::sim::{check_sigma, gaussian, seeded_rng};
use simdaq_core::{Device, DeviceResult, FailureInjector, Kind, Signal, SignalSet, Status};

/// Configuration for [`SynDetector`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Counts per second at unit gain
    pub base_counts: f64,
    /// Intensity reported before the first trigger
    pub initial_intensity: f64,
    /// Exposure time in seconds
    pub exposure_time: f64,
    pub gain: f64,
    /// Noise sigma as a fraction of `sqrt(base)`
    pub noise_fraction: f64,
    /// Probability in `[0, 1]` that a trigger fails
    pub failure_probability: f64,
    /// Seed for reproducible noise; entropy when absent
    pub seed: Option<u64>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            base_counts: 1000.0,
            initial_intensity: 1000.0,
            exposure_time: 1.0,
            gain: 1.0,
            noise_fraction: 0.1,
            failure_probability: 0.0,
            seed: None,
        }
    }
}

/// Simulated counting detector.
#[derive(Debug)]
pub struct SynDetector {
    name: String,
    signals: SignalSet,
    intensity: Signal,
    exposure_time: Signal,
    gain: Signal,
    base_counts: f64,
    noise_fraction: f64,
    rng: Mutex<ChaCha8Rng>,
    failures: FailureInjector,
}

impl SynDetector {
    pub fn new(name: impl Into<String>, config: DetectorConfig) -> DeviceResult<Self> {
        let name = name.into();
        let mut signals = SignalSet::new(&name);
        let intensity = signals.add("intensity", config.initial_intensity, |s| {
            s.with_kind(Kind::Hinted).with_units("counts").read_only()
        })?;
        let exposure_time = signals.add("exposure_time", config.exposure_time, |s| {
            s.with_kind(Kind::Config)
                .with_units("s")
                .with_range(0.0, f64::INFINITY)
        })?;
        let gain = signals.add("gain", config.gain, |s| {
            s.with_kind(Kind::Config).with_range(0.0, f64::INFINITY)
        })?;

        check_sigma(&name, config.noise_fraction)?;
        let failures = FailureInjector::new(&name, config.failure_probability, config.seed)?;

        Ok(Self {
            name,
            signals,
            intensity,
            exposure_time,
            gain,
            base_counts: config.base_counts,
            noise_fraction: config.noise_fraction,
            // Offset so noise and failure draws are independent streams
            rng: Mutex::new(seeded_rng(config.seed.map(|s| s.wrapping_add(1)))),
            failures,
        })
    }

    pub fn intensity(&self) -> &Signal {
        &self.intensity
    }

    pub fn exposure_time(&self) -> &Signal {
        &self.exposure_time
    }

    pub fn gain(&self) -> &Signal {
        &self.gain
    }

    fn acquire(&self) -> DeviceResult<f64> {
        let base = self.base_counts * self.gain.get_f64()? * self.exposure_time.get_f64()?;
        let sigma = base.abs().sqrt() * self.noise_fraction;
        let counts = gaussian(&mut *self.rng.lock(), base, sigma)?.max(0.0);
        self.intensity.put(counts.into())?;
        Ok(counts)
    }
}

impl Device for SynDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn signals(&self) -> &SignalSet {
        &self.signals
    }

    fn trigger(&self) -> DeviceResult<Status> {
        let label = format!("{}.trigger", self.name);
        if let Err(err) = self.failures.roll() {
            warn!(device = %self.name, "injected trigger failure");
            return Ok(Status::failed(label, err));
        }
        match self.acquire() {
            Ok(counts) => {
                info!(device = %self.name, counts, "detector triggered");
                Ok(Status::finished(label))
            }
            Err(err) => Ok(Status::failed(label, err)),
        }
    }
}
