//! Builds the configured devices and dispatches actions by device id.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use indexmap::IndexMap;
use tracing::info;

use simdaq_core::{Device, DeviceError, DeviceResult, Executor, Movable, Reading, Status};
use simdaq_devices::{
    EnergySelector, PvDerivedDevice, Spectrometer, SynAxis, SynDetector, TemperatureController,
    TripleAxis,
};

use crate::config::{DeviceDefinition, DeviceSettings, SimConfig};

/// A constructed simulated device.
#[derive(Debug)]
pub enum SimDevice {
    Detector(SynDetector),
    Axis(SynAxis),
    TemperatureController(TemperatureController),
    Spectrometer(Spectrometer),
    EnergySelector(EnergySelector),
    PvDerived(PvDerivedDevice),
    TripleAxis(TripleAxis),
}

impl SimDevice {
    /// Construct the device described by `definition`.
    pub fn build(definition: &DeviceDefinition, executor: &Executor) -> DeviceResult<Self> {
        let id = definition.id.clone();
        Ok(match &definition.device {
            DeviceSettings::Detector(c) => SimDevice::Detector(SynDetector::new(id, c.clone())?),
            DeviceSettings::Axis(c) => {
                SimDevice::Axis(SynAxis::new(id, c.clone(), executor.clone())?)
            }
            DeviceSettings::TemperatureController(c) => SimDevice::TemperatureController(
                TemperatureController::new(id, c.clone(), executor.clone())?,
            ),
            DeviceSettings::Spectrometer(c) => {
                SimDevice::Spectrometer(Spectrometer::new(id, c.clone(), executor.clone())?)
            }
            DeviceSettings::EnergySelector(c) => {
                SimDevice::EnergySelector(EnergySelector::new(id, c.clone())?)
            }
            DeviceSettings::PvDerived(c) => {
                SimDevice::PvDerived(PvDerivedDevice::polynomial(id, c.clone())?)
            }
            DeviceSettings::TripleAxis(c) => {
                let mono = EnergySelector::new(format!("{id}_mono"), c.monochromator.clone())?;
                let ana = EnergySelector::new(format!("{id}_ana"), c.analyzer.clone())?;
                SimDevice::TripleAxis(TripleAxis::new(id, mono, ana))
            }
        })
    }

    /// The device as a plain [`Device`]; `None` for composite instruments.
    pub fn as_device(&self) -> Option<&dyn Device> {
        match self {
            SimDevice::Detector(d) => Some(d),
            SimDevice::Axis(d) => Some(d),
            SimDevice::TemperatureController(d) => Some(d),
            SimDevice::Spectrometer(d) => Some(d),
            SimDevice::EnergySelector(d) => Some(d),
            SimDevice::PvDerived(d) => Some(d),
            SimDevice::TripleAxis(_) => None,
        }
    }

    pub fn as_movable(&self) -> Option<&dyn Movable> {
        match self {
            SimDevice::Axis(d) => Some(d),
            SimDevice::TemperatureController(d) => Some(d),
            SimDevice::EnergySelector(d) => Some(d),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            SimDevice::Detector(_) => "detector",
            SimDevice::Axis(_) => "axis",
            SimDevice::TemperatureController(_) => "temperature_controller",
            SimDevice::Spectrometer(_) => "spectrometer",
            SimDevice::EnergySelector(_) => "energy_selector",
            SimDevice::PvDerived(_) => "pv_derived",
            SimDevice::TripleAxis(_) => "triple_axis",
        }
    }

    pub fn read(&self) -> Reading {
        match self {
            SimDevice::TripleAxis(tas) => tas.read(),
            other => other.as_device().map(|d| d.read()).unwrap_or_default(),
        }
    }

    pub fn read_configuration(&self) -> Reading {
        match self {
            SimDevice::TripleAxis(tas) => tas.read_configuration(),
            other => other
                .as_device()
                .map(|d| d.read_configuration())
                .unwrap_or_default(),
        }
    }

    /// Trigger an acquisition. Instruments without one finish immediately.
    pub fn trigger(&self) -> DeviceResult<Status> {
        match self.as_device() {
            Some(device) => device.trigger(),
            None => Ok(Status::finished(format!("{}.trigger", self.name()))),
        }
    }

    /// Move to `targets`: one value for positioners, `(E_i, E_f)` for a
    /// triple-axis instrument.
    pub fn move_to(&self, targets: &[f64]) -> DeviceResult<Status> {
        match (self, targets) {
            (SimDevice::TripleAxis(tas), [ei, ef]) => tas.move_to(*ei, *ef),
            (SimDevice::TripleAxis(_), _) => Err(DeviceError::InvalidArgument(format!(
                "'{}' expects two targets (E_i E_f), got {}",
                self.name(),
                targets.len()
            ))),
            (_, [target]) => match self.as_movable() {
                Some(movable) => movable.set(*target),
                None => Err(DeviceError::InvalidArgument(format!(
                    "'{}' ({}) cannot be moved",
                    self.name(),
                    self.type_name()
                ))),
            },
            _ => Err(DeviceError::InvalidArgument(format!(
                "'{}' expects one target, got {}",
                self.name(),
                targets.len()
            ))),
        }
    }

    pub fn stop(&self) -> DeviceResult<()> {
        match self {
            SimDevice::TripleAxis(tas) => tas.stop(),
            other => other.as_device().map_or(Ok(()), |d| d.stop()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            SimDevice::TripleAxis(tas) => tas.name(),
            other => other.as_device().map_or("", |d| d.name()),
        }
    }
}

/// Devices of one configuration, keyed by id in declaration order.
#[derive(Debug)]
pub struct DeviceRegistry {
    executor: Executor,
    action_timeout: Duration,
    devices: IndexMap<String, SimDevice>,
}

impl DeviceRegistry {
    /// Start an executor and build every enabled device.
    pub fn from_config(config: &SimConfig) -> Result<Self> {
        let executor = Executor::new(config.application.worker_threads)
            .context("failed to start device executor")?;
        Self::with_executor(config, executor)
    }

    /// Build every enabled device on an existing executor.
    pub fn with_executor(config: &SimConfig, executor: Executor) -> Result<Self> {
        let mut devices = IndexMap::new();
        for definition in config.enabled_devices() {
            let device = SimDevice::build(definition, &executor).with_context(|| {
                format!(
                    "failed to build {} '{}'",
                    definition.device.type_name(),
                    definition.id
                )
            })?;
            info!(id = %definition.id, kind = device.type_name(), "device ready");
            devices.insert(definition.id.clone(), device);
        }
        Ok(Self {
            executor,
            action_timeout: Duration::from_millis(config.application.action_timeout_ms),
            devices,
        })
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn action_timeout(&self) -> Duration {
        self.action_timeout
    }

    pub fn get(&self, id: &str) -> Result<&SimDevice> {
        self.devices.get(id).ok_or_else(|| {
            let known: Vec<&str> = self.devices.keys().map(String::as_str).collect();
            anyhow!("unknown device '{id}' (configured: {})", known.join(", "))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SimDevice)> {
        self.devices.iter().map(|(id, device)| (id.as_str(), device))
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Block on `status` with the configured action timeout.
    pub fn wait(&self, status: &Status) -> Result<()> {
        status
            .wait(Some(self.action_timeout))
            .with_context(|| format!("action '{}' did not succeed", status.label()))
    }

    /// Trigger device `id` and wait for the acquisition.
    pub fn trigger(&self, id: &str) -> Result<Reading> {
        let device = self.get(id)?;
        let status = device.trigger()?;
        self.wait(&status)?;
        Ok(device.read())
    }

    /// Move device `id` and wait for it to arrive.
    pub fn move_to(&self, id: &str, targets: &[f64]) -> Result<Reading> {
        if targets.is_empty() {
            bail!("no target given for '{id}'");
        }
        let device = self.get(id)?;
        let status = device.move_to(targets)?;
        self.wait(&status)?;
        Ok(device.read())
    }

    /// Stop every device, returning the first failure.
    pub fn stop_all(&self) -> Result<()> {
        for (id, device) in self.iter() {
            device
                .stop()
                .with_context(|| format!("failed to stop '{id}'"))?;
        }
        Ok(())
    }
}
