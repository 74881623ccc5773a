//! Simulated optical spectrometer.
//!
//! Each acquisition samples `num_pixels` wavelengths evenly over
//! `[wavelength_min, wavelength_max]` nm and produces a normalised Planck
//! spectrum of a source at `source_temperature` K, multiplied by Gaussian
//! absorption dips and perturbed by additive noise.
//!
//! `trigger()` drifts the detector `temperature` reading, then completes
//! after `integration_time` seconds on the executor. The spectrum is only
//! replaced when the acquisition commits.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info};

use simdaq_core::limits::validate_array_len;
use simdaq_core::sim::{check_sigma, gaussian, seeded_rng};
use simdaq_core::{
    ActionSlot, Device, DeviceError, DeviceResult, Executor, FailureInjector, Kind, Signal,
    SignalSet, Status,
};

const PLANCK: f64 = 6.626e-34;
const LIGHT_SPEED: f64 = 3e8;
const BOLTZMANN: f64 = 1.381e-23;

/// Configuration for [`Spectrometer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrometerConfig {
    /// Seconds
    pub integration_time: f64,
    /// nm
    pub wavelength_min: f64,
    /// nm
    pub wavelength_max: f64,
    pub num_pixels: i64,
    /// Detector temperature reading, degC
    pub temperature: f64,
    /// Blackbody source temperature, K
    pub source_temperature: f64,
    /// Centres of the absorption dips, nm
    pub absorption_lines: Vec<f64>,
    pub noise_level: f64,
    /// Sigma of the per-trigger temperature drift, degC
    pub temperature_drift: f64,
    pub failure_probability: f64,
    pub seed: Option<u64>,
}

impl Default for SpectrometerConfig {
    fn default() -> Self {
        Self {
            integration_time: 0.1,
            wavelength_min: 400.0,
            wavelength_max: 700.0,
            num_pixels: 1024,
            temperature: 25.0,
            source_temperature: 5800.0,
            absorption_lines: vec![500.0, 550.0, 600.0],
            noise_level: 0.01,
            temperature_drift: 1.0,
            failure_probability: 0.0,
            seed: None,
        }
    }
}

/// Evenly spaced samples over `[min, max]`, both ends included.
pub fn linspace(min: f64, max: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![min],
        _ => {
            let step = (max - min) / (n - 1) as f64;
            (0..n).map(|i| min + step * i as f64).collect()
        }
    }
}

/// Planck spectrum over `wavelengths` (nm), scaled so its peak is 1.
pub fn blackbody(wavelengths: &[f64], temperature_k: f64) -> Vec<f64> {
    let raw: Vec<f64> = wavelengths
        .iter()
        .map(|nm| {
            let wl = nm * 1e-9;
            let exponent = PLANCK * LIGHT_SPEED / (wl * BOLTZMANN * temperature_k);
            1.0 / (wl.powi(5) * exponent.exp_m1())
        })
        .collect();
    let peak = raw
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(0.0_f64, f64::max);
    if peak > 0.0 {
        raw.into_iter().map(|v| v / peak).collect()
    } else {
        vec![0.0; raw.len()]
    }
}

#[derive(Debug)]
struct Acquisition {
    name: String,
    spectrum: Signal,
    wavelengths: Signal,
    temperature: Signal,
    integration_time: Signal,
    wavelength_min: Signal,
    wavelength_max: Signal,
    num_pixels: Signal,
    source_temperature: Signal,
    absorption_lines: Vec<f64>,
    noise_level: f64,
    temperature_drift: f64,
    rng: Mutex<ChaCha8Rng>,
    failures: FailureInjector,
}

fn check_wavelength_range(name: &str, min: f64, max: f64) -> DeviceResult<()> {
    if !(min < max) || min <= 0.0 {
        return Err(DeviceError::InvalidArgument(format!(
            "wavelength range [{min}, {max}] for '{name}' must be positive and increasing"
        )));
    }
    Ok(())
}

impl Acquisition {
    fn wavelength_range(&self) -> DeviceResult<(f64, f64)> {
        let min = self.wavelength_min.get_f64()?;
        let max = self.wavelength_max.get_f64()?;
        check_wavelength_range(&self.name, min, max)?;
        Ok((min, max))
    }

    fn wavelength_axis(&self) -> DeviceResult<Vec<f64>> {
        let (min, max) = self.wavelength_range()?;
        let pixels = self.num_pixels.get_raw().as_i64().unwrap_or(0);
        let pixels = validate_array_len(&self.name, usize::try_from(pixels).unwrap_or(0))?;
        Ok(linspace(min, max, pixels))
    }

    /// Compute a fresh spectrum and publish it with its wavelength axis.
    fn acquire(&self) -> DeviceResult<()> {
        let wavelengths = self.wavelength_axis()?;
        let mut spectrum = blackbody(&wavelengths, self.source_temperature.get_f64()?);
        {
            let mut rng = self.rng.lock();
            for &centre in &self.absorption_lines {
                let strength: f64 = rng.gen_range(0.1..0.3);
                let width: f64 = rng.gen_range(2.0..5.0);
                for (value, wl) in spectrum.iter_mut().zip(&wavelengths) {
                    let dip = (-(wl - centre).powi(2) / (2.0 * width * width)).exp();
                    *value *= 1.0 - strength * dip;
                }
            }
            for value in spectrum.iter_mut() {
                *value = gaussian(&mut *rng, *value, self.noise_level)?;
            }
        }
        self.wavelengths.put(wavelengths.into())?;
        self.spectrum.put(spectrum.into())
    }

    fn drift_temperature(&self) -> DeviceResult<f64> {
        let current = self.temperature.get_f64()?;
        let next = gaussian(&mut *self.rng.lock(), current, self.temperature_drift)?;
        self.temperature.put(next.into())?;
        Ok(next)
    }
}

/// Array detector producing a wavelength-resolved spectrum.
#[derive(Debug)]
pub struct Spectrometer {
    signals: SignalSet,
    state: Arc<Acquisition>,
    slot: ActionSlot,
    executor: Executor,
}

impl Spectrometer {
    pub fn new(
        name: impl Into<String>,
        config: SpectrometerConfig,
        executor: Executor,
    ) -> DeviceResult<Self> {
        let name = name.into();
        check_wavelength_range(&name, config.wavelength_min, config.wavelength_max)?;
        check_sigma(&name, config.noise_level)?;
        check_sigma(&name, config.temperature_drift)?;
        if !(config.integration_time >= 0.0) {
            return Err(DeviceError::InvalidArgument(format!(
                "integration time {} s for '{}' must be >= 0",
                config.integration_time, name
            )));
        }
        if !(config.source_temperature > 0.0) {
            return Err(DeviceError::InvalidArgument(format!(
                "source temperature {} K for '{}' must be > 0",
                config.source_temperature, name
            )));
        }
        let pixels = usize::try_from(config.num_pixels).unwrap_or(0);
        validate_array_len(&name, pixels)?;

        let mut signals = SignalSet::new(&name);
        let integration_time = signals.add("integration_time", config.integration_time, |s| {
            s.with_kind(Kind::Config)
                .with_units("s")
                .with_range(0.0, f64::INFINITY)
        })?;
        let wavelength_min = signals.add("wavelength_min", config.wavelength_min, |s| {
            s.with_kind(Kind::Config)
                .with_units("nm")
                .with_range(f64::MIN_POSITIVE, f64::INFINITY)
        })?;
        let wavelength_max = signals.add("wavelength_max", config.wavelength_max, |s| {
            s.with_kind(Kind::Config)
                .with_units("nm")
                .with_range(f64::MIN_POSITIVE, f64::INFINITY)
        })?;
        let context = name.clone();
        let num_pixels = signals.add("num_pixels", config.num_pixels, move |s| {
            s.with_kind(Kind::Config).with_validator(move |value| {
                let len = value.as_i64().and_then(|n| usize::try_from(n).ok()).unwrap_or(0);
                validate_array_len(&context, len).map(|_| ())
            })
        })?;
        let source_temperature =
            signals.add("source_temperature", config.source_temperature, |s| {
                s.with_kind(Kind::Config)
                    .with_units("K")
                    .with_range(f64::MIN_POSITIVE, f64::INFINITY)
            })?;
        let spectrum = signals.add("spectrum", vec![0.0; pixels], |s| {
            s.with_kind(Kind::Hinted).read_only()
        })?;
        let axis = linspace(config.wavelength_min, config.wavelength_max, pixels);
        let wavelengths = signals.add("wavelengths", axis, |s| s.with_units("nm").read_only())?;
        let temperature = signals.add("temperature", config.temperature, |s| {
            s.with_units("degC").read_only()
        })?;

        let state = Acquisition {
            failures: FailureInjector::new(&name, config.failure_probability, config.seed)?,
            name: name.clone(),
            spectrum,
            wavelengths,
            temperature,
            integration_time,
            wavelength_min,
            wavelength_max,
            num_pixels,
            source_temperature,
            absorption_lines: config.absorption_lines,
            noise_level: config.noise_level,
            temperature_drift: config.temperature_drift,
            rng: Mutex::new(seeded_rng(config.seed.map(|s| s.wrapping_add(1)))),
        };
        state.acquire()?;

        Ok(Self {
            slot: ActionSlot::new(&name),
            signals,
            state: Arc::new(state),
            executor,
        })
    }

    pub fn spectrum(&self) -> &Signal {
        &self.state.spectrum
    }

    pub fn wavelengths(&self) -> &Signal {
        &self.state.wavelengths
    }

    pub fn temperature(&self) -> &Signal {
        &self.state.temperature
    }

    pub fn integration_time(&self) -> &Signal {
        &self.state.integration_time
    }

    pub fn num_pixels(&self) -> &Signal {
        &self.state.num_pixels
    }
}

impl Device for Spectrometer {
    fn name(&self) -> &str {
        &self.state.name
    }

    fn signals(&self) -> &SignalSet {
        &self.signals
    }

    fn trigger(&self) -> DeviceResult<Status> {
        let integration = Duration::try_from_secs_f64(self.state.integration_time.get_f64()?)
            .map_err(|e| DeviceError::InvalidArgument(format!("integration time: {e}")))?;
        self.state.wavelength_range()?;
        let status = self.slot.begin(format!("{}.trigger", self.state.name))?;
        let temperature = match self.state.drift_temperature() {
            Ok(t) => t,
            Err(err) => {
                status.resolve_pending(Err(err.clone()));
                return Err(err);
            }
        };
        info!(
            device = %self.state.name,
            integration_s = integration.as_secs_f64(),
            temperature,
            "spectrum acquisition started"
        );

        let state = Arc::clone(&self.state);
        let committer = status.clone();
        self.executor.submit(&status, async move {
            sleep(integration).await;
            state.failures.roll()?;
            match committer.commit_with(|| state.acquire()) {
                Ok(()) => debug!(device = %state.name, "spectrum committed"),
                Err(err) => debug!(device = %state.name, error = %err, "spectrum not committed"),
            }
            Ok(())
        });
        Ok(status)
    }

    fn stop(&self) -> DeviceResult<()> {
        if self.slot.stop() {
            info!(device = %self.state.name, "acquisition stopped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simdaq_core::{SignalValue, StatusState};

    fn spectrometer(config: SpectrometerConfig) -> Spectrometer {
        Spectrometer::new("spec", config, Executor::new(2).unwrap()).unwrap()
    }

    fn seeded() -> SpectrometerConfig {
        SpectrometerConfig {
            integration_time: 0.02,
            seed: Some(5),
            ..SpectrometerConfig::default()
        }
    }

    #[test]
    fn test_linspace_endpoints() {
        let axis = linspace(400.0, 700.0, 4);
        assert_eq!(axis, vec![400.0, 500.0, 600.0, 700.0]);
        assert_eq!(linspace(1.0, 2.0, 1), vec![1.0]);
        assert!(linspace(1.0, 2.0, 0).is_empty());
    }

    #[test]
    fn test_blackbody_is_finite_and_normalised() {
        let axis = linspace(400.0, 700.0, 64);
        let spectrum = blackbody(&axis, 5800.0);
        assert!(spectrum.iter().all(|v| v.is_finite() && *v >= 0.0));
        let peak = spectrum.iter().copied().fold(0.0, f64::max);
        assert!((peak - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_initial_arrays_match_pixels() {
        let spec = spectrometer(seeded());
        let wavelengths = spec.wavelengths().get_raw();
        let wavelengths = wavelengths.as_array().unwrap();
        assert_eq!(wavelengths.len(), 1024);
        assert_eq!(wavelengths[0], 400.0);
        assert!((wavelengths[1023] - 700.0).abs() < 1e-9);
        assert_eq!(spec.spectrum().get_raw().shape(), vec![1024]);

        let desc = spec.describe();
        assert_eq!(desc["spec_spectrum"].shape, vec![1024]);
        assert_eq!(desc["spec_spectrum"].dtype, "array");
        assert_eq!(spec.hints(), vec!["spec_spectrum".to_string()]);
    }

    #[test]
    fn test_absorption_line_visible_without_noise() {
        let spec = spectrometer(SpectrometerConfig {
            absorption_lines: vec![550.0],
            noise_level: 0.0,
            num_pixels: 301,
            ..seeded()
        });
        // 1 nm per pixel, index 150 is the line centre
        let clean = blackbody(&linspace(400.0, 700.0, 301), 5800.0);
        let spectrum = spec.spectrum().get_raw();
        let spectrum = spectrum.as_array().unwrap();
        assert!(spectrum[150] <= clean[150] * 0.9 + 1e-12);
        assert!(spectrum[150] >= clean[150] * 0.7 - 1e-12);
        assert!((spectrum[0] - clean[0]).abs() < 1e-9);
    }

    #[test]
    fn test_trigger_completes_after_integration() {
        let spec = spectrometer(seeded());
        let before = spec.temperature().get_f64().unwrap();
        let status = spec.trigger().unwrap();
        assert_eq!(status.state(), StatusState::Pending);
        assert!(matches!(spec.trigger(), Err(DeviceError::Busy(_))));
        status.wait(Some(Duration::from_secs(5))).unwrap();
        assert!(status.elapsed() >= Duration::from_millis(20));
        assert_ne!(spec.temperature().get_f64().unwrap(), before);
    }

    #[test]
    fn test_pixel_change_applies_on_next_trigger() {
        let spec = spectrometer(seeded());
        spec.num_pixels().set(SignalValue::Int(16)).unwrap();
        assert_eq!(spec.spectrum().get_raw().shape(), vec![1024]);
        spec.trigger()
            .unwrap()
            .wait(Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(spec.spectrum().get_raw().shape(), vec![16]);
        assert_eq!(spec.wavelengths().get_raw().shape(), vec![16]);

        assert!(spec.num_pixels().set(SignalValue::Int(0)).is_err());
        assert!(spec.num_pixels().set(SignalValue::Int(1 << 24)).is_err());
    }

    #[test]
    fn test_stop_discards_acquisition() {
        let spec = spectrometer(SpectrometerConfig {
            integration_time: 5.0,
            ..seeded()
        });
        let before = spec.spectrum().get_raw();
        let status = spec.trigger().unwrap();
        spec.stop().unwrap();
        assert_eq!(
            status.wait(Some(Duration::from_secs(1))),
            Err(DeviceError::Stopped("spec".into()))
        );
        assert_eq!(spec.spectrum().get_raw(), before);
    }

    #[test]
    fn test_wavelength_range_guarded_at_runtime() {
        let spec = spectrometer(seeded());
        let min = spec.signal("wavelength_min").unwrap();
        let max = spec.signal("wavelength_max").unwrap();
        assert!(matches!(
            min.set((-5.0).into()),
            Err(DeviceError::OutOfBounds { .. })
        ));
        assert!(max.set(0.0.into()).is_err());

        // Each bound is positive on its own but the pair is descending
        min.set(800.0.into()).unwrap();
        let before = spec.wavelengths().get_raw();
        assert!(matches!(
            spec.trigger(),
            Err(DeviceError::InvalidArgument(_))
        ));
        assert!(!spec.slot.is_busy());
        assert_eq!(spec.wavelengths().get_raw(), before);

        max.set(900.0.into()).unwrap();
        spec.trigger()
            .unwrap()
            .wait(Some(Duration::from_secs(5)))
            .unwrap();
        let wavelengths = spec.wavelengths().get_raw();
        let wavelengths = wavelengths.as_array().unwrap();
        assert_eq!(wavelengths[0], 800.0);
        assert!((wavelengths[wavelengths.len() - 1] - 900.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_construction() {
        let executor = Executor::new(1).unwrap();
        for config in [
            SpectrometerConfig {
                num_pixels: 0,
                ..SpectrometerConfig::default()
            },
            SpectrometerConfig {
                wavelength_min: 700.0,
                wavelength_max: 400.0,
                ..SpectrometerConfig::default()
            },
            SpectrometerConfig {
                source_temperature: 0.0,
                ..SpectrometerConfig::default()
            },
            SpectrometerConfig {
                noise_level: f64::NAN,
                ..SpectrometerConfig::default()
            },
        ] {
            assert!(Spectrometer::new("spec", config, executor.clone()).is_err());
        }
    }
}
