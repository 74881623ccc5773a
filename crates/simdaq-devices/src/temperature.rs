//! Simulated temperature controller.
//!
//! `set(target)` ramps the temperature linearly from its current value,
//! using `heating_rate` when warming and `cooling_rate` when cooling (both
//! in deg/min). Intermediate values are published every
//! `update_interval_ms` with a little control noise; the final value lands
//! within `tolerance` of the target and resolves the status.
//!
//! Stopping a ramp leaves the temperature at the last published value. A
//! ramp still running `deadline_margin_ms` past its expected duration
//! fails with `Timeout`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use simdaq_core::sim::{check_sigma, gaussian, seeded_rng};
use simdaq_core::{
    ActionSlot, Device, DeviceError, DeviceResult, Executor, FailureInjector, Kind, Limits,
    Movable, Signal, SignalSet, Status, DEFAULT_DEADLINE_MARGIN_MS,
};

/// Configuration for [`TemperatureController`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemperatureConfig {
    pub initial_temperature: f64,
    /// deg/min
    pub heating_rate: f64,
    /// deg/min
    pub cooling_rate: f64,
    /// Maximum deviation of the settled temperature from the setpoint
    pub tolerance: f64,
    pub min: f64,
    pub max: f64,
    pub update_interval_ms: u64,
    /// Sigma of the noise added to intermediate ramp values
    pub ramp_noise: f64,
    pub failure_probability: f64,
    pub seed: Option<u64>,
    /// Slack past the ramp time before a ramp fails with `Timeout`
    pub deadline_margin_ms: u64,
}

impl Default for TemperatureConfig {
    fn default() -> Self {
        Self {
            initial_temperature: 20.0,
            heating_rate: 5.0,
            cooling_rate: 3.0,
            tolerance: 0.1,
            min: -50.0,
            max: 500.0,
            update_interval_ms: 100,
            ramp_noise: 0.05,
            failure_probability: 0.0,
            seed: None,
            deadline_margin_ms: DEFAULT_DEADLINE_MARGIN_MS,
        }
    }
}

#[derive(Debug)]
struct Ramp {
    start: f64,
    target: f64,
    duration: Duration,
    tolerance: f64,
}

impl Ramp {
    fn at(&self, elapsed: Duration) -> f64 {
        let progress = if self.duration.is_zero() {
            1.0
        } else {
            (elapsed.as_secs_f64() / self.duration.as_secs_f64()).min(1.0)
        };
        self.start + (self.target - self.start) * progress
    }
}

/// Heater/cooler driving a single temperature readback.
#[derive(Debug)]
pub struct TemperatureController {
    name: String,
    signals: SignalSet,
    temperature: Signal,
    setpoint: Signal,
    heating_rate: Signal,
    cooling_rate: Signal,
    tolerance: Signal,
    limits: Limits,
    update_interval: Duration,
    deadline_margin: Duration,
    ramp_noise: f64,
    slot: ActionSlot,
    executor: Executor,
    rng: Arc<Mutex<ChaCha8Rng>>,
    failures: Arc<FailureInjector>,
}

impl TemperatureController {
    pub fn new(
        name: impl Into<String>,
        config: TemperatureConfig,
        executor: Executor,
    ) -> DeviceResult<Self> {
        let name = name.into();
        let limits = Limits::new(config.min, config.max)?;
        limits.check(&name, config.initial_temperature)?;
        if config.update_interval_ms == 0 {
            return Err(DeviceError::InvalidArgument(format!(
                "update interval for '{name}' must be > 0 ms"
            )));
        }

        let mut signals = SignalSet::new(&name);
        let temperature = signals.add("temperature", config.initial_temperature, |s| {
            s.with_kind(Kind::Hinted).with_units("degC").read_only()
        })?;
        let setpoint = signals.add("setpoint", config.initial_temperature, |s| {
            s.with_units("degC").read_only()
        })?;
        let heating_rate = signals.add("heating_rate", config.heating_rate, |s| {
            s.with_kind(Kind::Config)
                .with_units("degC/min")
                .with_range(f64::MIN_POSITIVE, f64::INFINITY)
        })?;
        let cooling_rate = signals.add("cooling_rate", config.cooling_rate, |s| {
            s.with_kind(Kind::Config)
                .with_units("degC/min")
                .with_range(f64::MIN_POSITIVE, f64::INFINITY)
        })?;
        let tolerance = signals.add("tolerance", config.tolerance, |s| {
            s.with_kind(Kind::Config)
                .with_units("degC")
                .with_range(0.0, f64::INFINITY)
        })?;
        for (rate, label) in [(config.heating_rate, "heating"), (config.cooling_rate, "cooling")] {
            if !(rate > 0.0) {
                return Err(DeviceError::InvalidArgument(format!(
                    "{label} rate {rate} for '{name}' must be > 0"
                )));
            }
        }

        check_sigma(&name, config.ramp_noise)?;
        let failures = Arc::new(FailureInjector::new(
            &name,
            config.failure_probability,
            config.seed,
        )?);

        Ok(Self {
            slot: ActionSlot::new(&name),
            name,
            signals,
            temperature,
            setpoint,
            heating_rate,
            cooling_rate,
            tolerance,
            limits,
            update_interval: Duration::from_millis(config.update_interval_ms),
            deadline_margin: Duration::from_millis(config.deadline_margin_ms),
            ramp_noise: config.ramp_noise,
            executor,
            rng: Arc::new(Mutex::new(seeded_rng(
                config.seed.map(|s| s.wrapping_add(1)),
            ))),
            failures,
        })
    }

    pub fn temperature(&self) -> &Signal {
        &self.temperature
    }

    pub fn setpoint(&self) -> &Signal {
        &self.setpoint
    }

    pub fn heating_rate(&self) -> &Signal {
        &self.heating_rate
    }

    pub fn cooling_rate(&self) -> &Signal {
        &self.cooling_rate
    }

    pub fn tolerance(&self) -> &Signal {
        &self.tolerance
    }

    /// Time to ramp from the current temperature to `target`.
    pub fn ramp_time(&self, target: f64) -> DeviceResult<Duration> {
        let current = self.position();
        let rate = if target > current {
            self.heating_rate.get_f64()?
        } else {
            self.cooling_rate.get_f64()?
        };
        let span = (target - current).abs();
        Duration::try_from_secs_f64(span / rate * 60.0).map_err(|e| {
            DeviceError::InvalidArgument(format!(
                "ramp of {span} deg at {rate} deg/min for '{}': {e}",
                self.name
            ))
        })
    }
}

impl Device for TemperatureController {
    fn name(&self) -> &str {
        &self.name
    }

    fn signals(&self) -> &SignalSet {
        &self.signals
    }

    fn stop(&self) -> DeviceResult<()> {
        if self.slot.stop() {
            info!(device = %self.name, temperature = self.position(), "ramp stopped");
        }
        Ok(())
    }
}

impl Movable for TemperatureController {
    fn set(&self, target: f64) -> DeviceResult<Status> {
        self.limits.check(&self.name, target)?;
        let ramp = Ramp {
            start: self.position(),
            target,
            duration: self.ramp_time(target)?,
            tolerance: self.tolerance.get_f64()?,
        };
        let status = self.slot.begin(format!("{}.set", self.name))?;

        if let Err(err) = self.setpoint.put(target.into()) {
            status.resolve_pending(Err(err.clone()));
            return Err(err);
        }

        info!(
            device = %self.name,
            from = ramp.start,
            to = target,
            ramp_s = ramp.duration.as_secs_f64(),
            "temperature ramp started"
        );

        let deadline = ramp.duration.saturating_add(self.deadline_margin);
        let name = self.name.clone();
        let temperature = self.temperature.clone();
        let rng = Arc::clone(&self.rng);
        let failures = Arc::clone(&self.failures);
        let interval = self.update_interval;
        let noise = self.ramp_noise;
        let committer = status.clone();
        self.executor.submit(&status, async move {
            let started = Instant::now();
            while started.elapsed() < ramp.duration {
                if committer.is_done() {
                    return Ok(());
                }
                let value = {
                    let mut rng = rng.lock();
                    gaussian(&mut *rng, ramp.at(started.elapsed()), noise)?
                };
                temperature.put(value.into())?;
                sleep(interval.min(ramp.duration)).await;
            }

            failures.roll()?;
            let settled = {
                let mut rng = rng.lock();
                let offset = gaussian(&mut *rng, 0.0, ramp.tolerance / 3.0)?;
                ramp.target + offset.clamp(-ramp.tolerance, ramp.tolerance)
            };
            match committer.commit_with(|| temperature.put(settled.into())) {
                Ok(()) => debug!(device = %name, temperature = settled, "temperature settled"),
                Err(err) => debug!(device = %name, error = %err, "ramp not committed"),
            }
            Ok(())
        });
        self.executor.watchdog(&status, deadline);

        Ok(status)
    }

    fn position(&self) -> f64 {
        self.temperature.get_raw().as_f64().unwrap_or(f64::NAN)
    }

    fn limits(&self) -> Limits {
        self.limits
    }
}
