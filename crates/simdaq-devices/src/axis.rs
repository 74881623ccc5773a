//! Synthetic motion axis
//!
//! A single-axis positioner with bounded travel and constant velocity.
//! `set(target)`:
//!
//! 1. Rejects targets outside `[min, max]` with `OutOfBounds` (no state change)
//! 2. Rejects a new move while one is pending with `Busy`
//! 3. Writes the setpoint and schedules the move on the executor
//! 4. After `|target - position| / velocity` seconds commits the new
//!    position and resolves the status
//!
//! A stopped or cancelled move never commits, so the readback stays at the
//! start position.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info};

use simdaq_core::{
    ActionSlot, Device, DeviceError, DeviceResult, Executor, FailureInjector, Kind, Limits,
    Movable, Noise, Signal, SignalSet, Status, DEFAULT_DEADLINE_MARGIN_MS,
};

/// Configuration for [`SynAxis`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisConfig {
    pub initial_position: f64,
    /// Units per second, must be > 0
    pub velocity: f64,
    pub min: f64,
    pub max: f64,
    pub units: Option<String>,
    /// Optional read noise on the readback
    pub readback_noise: Option<Noise>,
    /// Probability in `[0, 1]` that a move fails before committing
    pub failure_probability: f64,
    pub seed: Option<u64>,
    /// Slack past the travel time before a move fails with `Timeout`
    pub deadline_margin_ms: u64,
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            initial_position: 0.0,
            velocity: 1.0,
            min: -100.0,
            max: 100.0,
            units: None,
            readback_noise: None,
            failure_probability: 0.0,
            seed: None,
            deadline_margin_ms: DEFAULT_DEADLINE_MARGIN_MS,
        }
    }
}

/// Simulated positioner.
#[derive(Debug)]
pub struct SynAxis {
    name: String,
    signals: SignalSet,
    position: Signal,
    setpoint: Signal,
    velocity: Signal,
    limits: Limits,
    deadline_margin: Duration,
    slot: ActionSlot,
    executor: Executor,
    failures: Arc<FailureInjector>,
}

impl SynAxis {
    pub fn new(name: impl Into<String>, config: AxisConfig, executor: Executor) -> DeviceResult<Self> {
        let name = name.into();
        let limits = Limits::new(config.min, config.max)?;
        limits.check(&name, config.initial_position)?;
        if !(config.velocity > 0.0) {
            return Err(DeviceError::InvalidArgument(format!(
                "velocity {} for '{}' must be > 0",
                config.velocity, name
            )));
        }

        let units = config.units.clone();
        let with_units = move |s: Signal| match &units {
            Some(u) => s.with_units(u.clone()),
            None => s,
        };

        let mut signals = SignalSet::new(&name);
        let position = signals.add("position", config.initial_position, |s| {
            let s = with_units(s.with_kind(Kind::Hinted).read_only());
            match config.readback_noise {
                Some(noise) => s.with_noise(noise),
                None => s,
            }
        })?;
        let setpoint = signals.add("setpoint", config.initial_position, |s| {
            with_units(s.read_only())
        })?;
        let velocity = signals.add("velocity", config.velocity, |s| {
            s.with_kind(Kind::Config)
                .with_range(f64::MIN_POSITIVE, f64::INFINITY)
        })?;
        signals.add("low_limit", limits.min, |s| {
            s.with_kind(Kind::Config).read_only()
        })?;
        signals.add("high_limit", limits.max, |s| {
            s.with_kind(Kind::Config).read_only()
        })?;

        let failures = Arc::new(FailureInjector::new(
            &name,
            config.failure_probability,
            config.seed,
        )?);

        Ok(Self {
            slot: ActionSlot::new(&name),
            name,
            signals,
            position,
            setpoint,
            velocity,
            limits,
            deadline_margin: Duration::from_millis(config.deadline_margin_ms),
            executor,
            failures,
        })
    }

    pub fn setpoint(&self) -> &Signal {
        &self.setpoint
    }

    pub fn velocity(&self) -> &Signal {
        &self.velocity
    }

    /// Status of the pending move, if any.
    pub fn in_flight(&self) -> Option<Status> {
        self.slot.current()
    }

    /// Time a move to `target` would take at the current velocity.
    pub fn travel_time(&self, target: f64) -> DeviceResult<Duration> {
        let velocity = self.velocity.get_f64()?;
        let distance = (target - self.position()).abs();
        Duration::try_from_secs_f64(distance / velocity).map_err(|e| {
            DeviceError::InvalidArgument(format!(
                "travel of {distance} at velocity {velocity} for '{}': {e}",
                self.name
            ))
        })
    }
}

impl Device for SynAxis {
    fn name(&self) -> &str {
        &self.name
    }

    fn signals(&self) -> &SignalSet {
        &self.signals
    }

    fn stop(&self) -> DeviceResult<()> {
        if self.slot.stop() {
            info!(axis = %self.name, position = self.position(), "move stopped");
        }
        Ok(())
    }
}

impl Movable for SynAxis {
    fn set(&self, target: f64) -> DeviceResult<Status> {
        self.limits.check(&self.name, target)?;
        let travel = self.travel_time(target)?;
        let status = self.slot.begin(format!("{}.set", self.name))?;

        if let Err(err) = self.setpoint.put(target.into()) {
            status.resolve_pending(Err(err.clone()));
            return Err(err);
        }

        info!(
            axis = %self.name,
            from = self.position(),
            to = target,
            travel_ms = travel.as_millis() as u64,
            "move started"
        );

        let name = self.name.clone();
        let position = self.position.clone();
        let failures = Arc::clone(&self.failures);
        let committer = status.clone();
        self.executor.submit(&status, async move {
            sleep(travel).await;
            failures.roll()?;
            match committer.commit_with(|| position.put(target.into())) {
                Ok(()) => debug!(axis = %name, position = target, "move committed"),
                Err(err) => debug!(axis = %name, error = %err, "move not committed"),
            }
            Ok(())
        });
        self.executor
            .watchdog(&status, travel.saturating_add(self.deadline_margin));

        Ok(status)
    }

    fn position(&self) -> f64 {
        self.position.get_raw().as_f64().unwrap_or(f64::NAN)
    }

    fn limits(&self) -> Limits {
        self.limits
    }
}
