//! Energy selector: a monochromator or analyzer driven by two angle PVs.
//!
//! `energy` is derived from the first angle (`pv_a1`) through the Bragg
//! relation of the configured crystal. Setting an energy writes
//! `pv_a1 = θ` and `pv_a2 = 2θ`. The PV suffixes are configurable so the
//! same device models `mono:theta`/`mono:two_theta` and
//! `analyzer:angle`/`analyzer:detector_angle` style installations.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use simdaq_core::{
    input_f64, Derivation, Device, DeviceError, DeviceResult, Kind, Limits, Movable, Signal,
    SignalSet, SignalValue, Status,
};

use crate::bragg::{Crystal, MonoAna, Sense};

/// Configuration for [`EnergySelector`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergySelectorConfig {
    /// PV prefix prepended to both suffixes
    pub prefix: String,
    pub pv_a1_suffix: String,
    pub pv_a2_suffix: String,
    pub crystal: Crystal,
    pub sense: Sense,
}

impl Default for EnergySelectorConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            pv_a1_suffix: "A1".into(),
            pv_a2_suffix: "A2".into(),
            crystal: Crystal::Pg002,
            sense: Sense::Negative,
        }
    }
}

/// Device mapping crystal angles to neutron energy (meV).
#[derive(Debug)]
pub struct EnergySelector {
    name: String,
    signals: SignalSet,
    params: MonoAna,
    pv_a1: Signal,
    pv_a2: Signal,
    energy: Signal,
    derivation: Derivation,
}

impl EnergySelector {
    pub fn new(name: impl Into<String>, config: EnergySelectorConfig) -> DeviceResult<Self> {
        let name = name.into();
        let params = MonoAna::new(config.crystal, config.sense)?;

        let mut signals = SignalSet::new(&name);
        signals.add("d_spacing", params.d_spacing(), |s| {
            s.with_kind(Kind::Config)
                .with_units("angstrom")
                .with_description(params.crystal.label())
                .read_only()
        })?;
        signals.add("sense", params.sense.as_str(), |s| {
            s.with_kind(Kind::Config).read_only()
        })?;
        let pv_a1 = signals.add("pv_a1", 0.0, |s| {
            s.with_kind(Kind::Config)
                .with_units("deg")
                .with_source(format!("{}{}", config.prefix, config.pv_a1_suffix))
        })?;
        let pv_a2 = signals.add("pv_a2", 0.0, |s| {
            s.with_kind(Kind::Config)
                .with_units("deg")
                .with_source(format!("{}{}", config.prefix, config.pv_a2_suffix))
        })?;
        let energy = signals.add("energy", 0.0, |s| {
            s.with_kind(Kind::Hinted).with_units("meV").read_only()
        })?;

        // Angles of the wrong sense or without a reflection read as zero energy
        let derivation = Derivation::new(energy.clone(), vec![pv_a1.clone()], move |values| {
            let angle = input_f64(values, 0)?;
            Ok(SignalValue::Float(
                params.energy_for_angle(angle).unwrap_or(0.0),
            ))
        })
        .bind()?;

        debug!(
            device = %name,
            crystal = %params.crystal.label(),
            sense = %params.sense,
            a1 = ?pv_a1.metadata().source,
            "energy selector created"
        );

        Ok(Self {
            name,
            signals,
            params,
            pv_a1,
            pv_a2,
            energy,
            derivation,
        })
    }

    pub fn params(&self) -> &MonoAna {
        &self.params
    }

    pub fn d_spacing(&self) -> f64 {
        self.params.d_spacing()
    }

    pub fn pv_a1(&self) -> &Signal {
        &self.pv_a1
    }

    pub fn pv_a2(&self) -> &Signal {
        &self.pv_a2
    }

    pub fn energy(&self) -> &Signal {
        &self.energy
    }

    /// Recompute `energy` from the current `pv_a1`.
    pub fn recompute(&self) -> DeviceResult<f64> {
        let value = self.derivation.recompute()?;
        value
            .as_f64()
            .ok_or_else(|| DeviceError::Computation("energy is not numeric".into()))
    }

    /// Angles `(θ, 2θ)` for `energy`, or `OutOfBounds` when unreachable.
    pub fn angles_for(&self, energy: f64) -> DeviceResult<(f64, f64)> {
        match self.params.bragg_angle(energy) {
            Some(theta) => Ok((theta, 2.0 * theta)),
            None => Err(DeviceError::OutOfBounds {
                target: self.name.clone(),
                value: energy,
                min: self.params.min_energy(),
                max: f64::INFINITY,
            }),
        }
    }

    fn apply(&self, energy: f64, theta: f64, two_theta: f64) -> DeviceResult<()> {
        self.pv_a1.set(theta.into())?;
        self.pv_a2.set(two_theta.into())?;
        self.energy.put(energy.into())
    }
}

impl Device for EnergySelector {
    fn name(&self) -> &str {
        &self.name
    }

    fn signals(&self) -> &SignalSet {
        &self.signals
    }
}

impl Movable for EnergySelector {
    /// Angles are written immediately; the status is already resolved.
    fn set(&self, energy: f64) -> DeviceResult<Status> {
        let (theta, two_theta) = self.angles_for(energy)?;
        let label = format!("{}.set", self.name);
        match self.apply(energy, theta, two_theta) {
            Ok(()) => {
                info!(device = %self.name, energy, theta, two_theta, "energy set");
                Ok(Status::finished(label))
            }
            Err(err) => Ok(Status::failed(label, err)),
        }
    }

    fn position(&self) -> f64 {
        self.energy.get_raw().as_f64().unwrap_or(f64::NAN)
    }

    fn limits(&self) -> Limits {
        Limits {
            min: self.params.min_energy(),
            max: f64::INFINITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono() -> EnergySelector {
        EnergySelector::new(
            "mono",
            EnergySelectorConfig {
                prefix: "HB1:".into(),
                pv_a1_suffix: "mono:theta".into(),
                pv_a2_suffix: "mono:two_theta".into(),
                ..EnergySelectorConfig::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_set_energy_writes_angles() {
        let mono = mono();
        assert_eq!(mono.params().sense, Sense::Negative);
        let status = mono.set(14.45).unwrap();
        assert!(status.success());
        assert_eq!(mono.read()["mono_energy"].value, SignalValue::Float(14.45));

        let theta = mono.pv_a1().get_f64().unwrap();
        assert!((theta + 20.768).abs() < 0.02, "theta {theta}");
        assert_eq!(mono.pv_a2().get_f64().unwrap(), 2.0 * theta);
    }

    #[test]
    fn test_unreachable_energy_leaves_state() {
        let mono = mono();
        mono.set(14.45).unwrap();
        let err = mono.set(1.0).unwrap_err();
        assert!(matches!(err, DeviceError::OutOfBounds { .. }));
        assert_eq!(mono.position(), 14.45);
        assert!(mono.limits().min > 1.0);
    }

    #[test]
    fn test_angle_change_updates_energy() {
        let mono = mono();
        mono.pv_a1().set((-41.5367 / 2.0).into()).unwrap();
        let energy = mono.energy().get_f64().unwrap();
        assert!((energy - 14.45).abs() < 0.02, "energy {energy}");

        // Wrong sense reads as zero
        mono.pv_a1().set(20.0.into()).unwrap();
        assert_eq!(mono.energy().get_f64().unwrap(), 0.0);
        assert_eq!(mono.recompute().unwrap(), 0.0);
    }

    #[test]
    fn test_surfaces_and_sources() {
        let mono = mono();
        let read = mono.read();
        assert_eq!(read.keys().collect::<Vec<_>>(), vec!["mono_energy"]);

        let config = mono.read_configuration();
        let keys: Vec<&str> = config.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["mono_d_spacing", "mono_sense", "mono_pv_a1", "mono_pv_a2"]
        );
        assert_eq!(config["mono_d_spacing"].value, SignalValue::Float(3.35416));
        assert_eq!(config["mono_sense"].value, SignalValue::Text("-".into()));

        let desc = mono.describe_configuration();
        assert_eq!(desc["mono_pv_a1"].source, "HB1:mono:theta");
        assert_eq!(desc["mono_pv_a2"].source, "HB1:mono:two_theta");
    }

    #[test]
    fn test_energy_is_read_only() {
        let mono = mono();
        assert!(matches!(
            mono.energy().set(5.0.into()),
            Err(DeviceError::ReadOnly(_))
        ));
    }

    #[test]
    fn test_analyzer_with_positive_sense() {
        let ana = EnergySelector::new(
            "ana",
            EnergySelectorConfig {
                pv_a1_suffix: "analyzer:angle".into(),
                pv_a2_suffix: "analyzer:detector_angle".into(),
                sense: Sense::Positive,
                ..EnergySelectorConfig::default()
            },
        )
        .unwrap();
        ana.set(14.7).unwrap().wait(None).unwrap();
        assert!(ana.pv_a1().get_f64().unwrap() > 0.0);
        assert_eq!(ana.describe_configuration()["ana_pv_a1"].source, "analyzer:angle");
    }
}
