//! Triple-axis spectrometer built from a monochromator and an analyzer.
//!
//! Both energy selectors stay independent devices; the instrument only
//! coordinates them. A scan point `(E_i, E_f)` is validated on both
//! selectors before either one moves.

use tracing::info;

use simdaq_core::{Device, DeviceResult, Movable, Reading, Status};

use crate::energy::EnergySelector;

/// Monochromator + analyzer pair.
#[derive(Debug)]
pub struct TripleAxis {
    name: String,
    monochromator: EnergySelector,
    analyzer: EnergySelector,
}

impl TripleAxis {
    pub fn new(
        name: impl Into<String>,
        monochromator: EnergySelector,
        analyzer: EnergySelector,
    ) -> Self {
        Self {
            name: name.into(),
            monochromator,
            analyzer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn monochromator(&self) -> &EnergySelector {
        &self.monochromator
    }

    pub fn analyzer(&self) -> &EnergySelector {
        &self.analyzer
    }

    /// Move to incident energy `ei` and final energy `ef` (meV).
    ///
    /// Returns `OutOfBounds` without moving anything if either energy is
    /// unreachable. The status succeeds once both selectors have.
    pub fn move_to(&self, ei: f64, ef: f64) -> DeviceResult<Status> {
        self.monochromator.angles_for(ei)?;
        self.analyzer.angles_for(ef)?;

        let mono = self.monochromator.set(ei)?;
        let ana = self.analyzer.set(ef)?;
        info!(instrument = %self.name, ei, ef, "scan point requested");
        Ok(Status::all(format!("{}.move_to", self.name), [mono, ana]))
    }

    /// `E_i - E_f` in meV.
    pub fn energy_transfer(&self) -> f64 {
        self.monochromator.position() - self.analyzer.position()
    }

    /// Readings of both selectors, monochromator first.
    pub fn read(&self) -> Reading {
        let mut reading = self.monochromator.read();
        reading.extend(self.analyzer.read());
        reading
    }

    pub fn read_configuration(&self) -> Reading {
        let mut reading = self.monochromator.read_configuration();
        reading.extend(self.analyzer.read_configuration());
        reading
    }

    pub fn stop(&self) -> DeviceResult<()> {
        self.monochromator.stop()?;
        self.analyzer.stop()
    }
}
