//! Device whose hinted output is a pure function of simulated PV inputs,
//! e.g. `E_i = PV1² + 3·PV2`.
//!
//! Inputs are config-kind signals backed by `<prefix><suffix>` sources.
//! The output follows every input set through a [`Derivation`] and can be
//! recomputed on demand with `recompute()` or `trigger()`.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use simdaq_core::{
    input_f64, Derivation, Device, DeviceError, DeviceResult, FailureInjector, Kind, Signal,
    SignalSet, SignalValue, Status,
};

/// One simulated PV feeding the derived output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PvInput {
    /// Component name inside the device (`pv1`)
    pub component: String,
    /// Address suffix appended to the device prefix
    pub suffix: String,
    #[serde(default)]
    pub initial: f64,
    /// Polynomial coefficients `c0 + c1·x + c2·x² + ...` used by
    /// [`PvDerivedDevice::polynomial`]
    #[serde(default)]
    pub coefficients: Vec<f64>,
}

impl PvInput {
    pub fn new(component: impl Into<String>, suffix: impl Into<String>, initial: f64) -> Self {
        Self {
            component: component.into(),
            suffix: suffix.into(),
            initial,
            coefficients: Vec::new(),
        }
    }

    pub fn with_coefficients(mut self, coefficients: Vec<f64>) -> Self {
        self.coefficients = coefficients;
        self
    }

    fn term(&self, x: f64) -> f64 {
        // Horner, highest order first
        self.coefficients.iter().rev().fold(0.0, |acc, c| acc * x + c)
    }
}

/// Configuration for [`PvDerivedDevice`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PvDerivedConfig {
    pub prefix: String,
    pub inputs: Vec<PvInput>,
    /// Component name of the derived output
    pub output: String,
    pub units: Option<String>,
    pub failure_probability: f64,
    pub seed: Option<u64>,
}

impl Default for PvDerivedConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            inputs: Vec::new(),
            output: "value".into(),
            units: None,
            failure_probability: 0.0,
            seed: None,
        }
    }
}

/// Derived-quantity device.
#[derive(Debug)]
pub struct PvDerivedDevice {
    name: String,
    signals: SignalSet,
    inputs: Vec<Signal>,
    output: Signal,
    derivation: Derivation,
    failures: FailureInjector,
}

impl PvDerivedDevice {
    /// Build the device with an arbitrary pure function of the inputs
    /// (values in declaration order).
    pub fn new<F>(name: impl Into<String>, config: PvDerivedConfig, compute: F) -> DeviceResult<Self>
    where
        F: Fn(&[SignalValue]) -> DeviceResult<SignalValue> + Send + Sync + 'static,
    {
        let name = name.into();
        if config.inputs.is_empty() {
            return Err(DeviceError::InvalidArgument(format!(
                "derived device '{name}' needs at least one input"
            )));
        }

        let mut signals = SignalSet::new(&name);
        let mut inputs = Vec::with_capacity(config.inputs.len());
        for input in &config.inputs {
            let source = format!("{}{}", config.prefix, input.suffix);
            inputs.push(signals.add(&input.component, input.initial, |s| {
                s.with_kind(Kind::Config).with_source(source)
            })?);
        }
        let output = signals.add(&config.output, 0.0, |s| {
            let s = s.with_kind(Kind::Hinted).read_only();
            match &config.units {
                Some(units) => s.with_units(units.clone()),
                None => s,
            }
        })?;

        let derivation = Derivation::new(output.clone(), inputs.clone(), compute).bind()?;
        let failures = FailureInjector::new(&name, config.failure_probability, config.seed)?;

        Ok(Self {
            name,
            signals,
            inputs,
            output,
            derivation,
            failures,
        })
    }

    /// Output is the sum of each input's polynomial `Σ cₖ·xᵏ`.
    pub fn polynomial(name: impl Into<String>, config: PvDerivedConfig) -> DeviceResult<Self> {
        let terms = config.inputs.clone();
        Self::new(name, config, move |values| {
            let mut total = 0.0;
            for (idx, input) in terms.iter().enumerate() {
                total += input.term(input_f64(values, idx)?);
            }
            Ok(SignalValue::Float(total))
        })
    }

    pub fn input(&self, component: &str) -> DeviceResult<&Signal> {
        let signal = self.signals.get(component)?;
        if self.inputs.iter().any(|s| s.name() == signal.name()) {
            Ok(signal)
        } else {
            Err(DeviceError::UnknownSignal {
                device: self.name.clone(),
                signal: component.to_string(),
            })
        }
    }

    pub fn inputs(&self) -> &[Signal] {
        &self.inputs
    }

    pub fn output(&self) -> &Signal {
        &self.output
    }

    /// Recompute the output from the current inputs.
    pub fn recompute(&self) -> DeviceResult<SignalValue> {
        self.derivation.recompute()
    }
}

impl Device for PvDerivedDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn signals(&self) -> &SignalSet {
        &self.signals
    }

    fn trigger(&self) -> DeviceResult<Status> {
        let label = format!("{}.trigger", self.name);
        let outcome = self.failures.roll().and_then(|()| self.recompute());
        match outcome {
            Ok(value) => {
                info!(device = %self.name, value = %value, "derived value recomputed");
                Ok(Status::finished(label))
            }
            Err(err) => {
                warn!(device = %self.name, error = %err, "derived recompute failed");
                Ok(Status::failed(label, err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incident_energy() -> PvDerivedDevice {
        PvDerivedDevice::polynomial(
            "ei",
            PvDerivedConfig {
                prefix: "HB1:".into(),
                inputs: vec![
                    PvInput::new("pv1", "m1", 0.0).with_coefficients(vec![0.0, 0.0, 1.0]),
                    PvInput::new("pv2", "m2", 0.0).with_coefficients(vec![0.0, 3.0]),
                ],
                output: "energy".into(),
                units: Some("meV".into()),
                ..PvDerivedConfig::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_output_follows_inputs() {
        let dev = incident_energy();
        dev.input("pv1").unwrap().set(2.0.into()).unwrap();
        dev.input("pv2").unwrap().set(5.0.into()).unwrap();
        assert_eq!(dev.read()["ei_energy"].value, SignalValue::Float(19.0));

        dev.input("pv2").unwrap().set(1.0.into()).unwrap();
        assert_eq!(dev.output().get_f64().unwrap(), 7.0);
    }

    #[test]
    fn test_surfaces_and_sources() {
        let dev = incident_energy();
        let config = dev.read_configuration();
        let keys: Vec<&str> = config.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["ei_pv1", "ei_pv2"]);
        assert_eq!(dev.describe_configuration()["ei_pv1"].source, "HB1:m1");
        assert_eq!(dev.hints(), vec!["ei_energy".to_string()]);
        assert!(dev.input("energy").is_err());
    }

    #[test]
    fn test_custom_closure_and_trigger() {
        let dev = PvDerivedDevice::new(
            "ratio",
            PvDerivedConfig {
                inputs: vec![PvInput::new("num", "N", 6.0), PvInput::new("den", "D", 3.0)],
                ..PvDerivedConfig::default()
            },
            |v| {
                let den = input_f64(v, 1)?;
                if den == 0.0 {
                    return Err(DeviceError::Computation("zero denominator".into()));
                }
                Ok(SignalValue::Float(input_f64(v, 0)? / den))
            },
        )
        .unwrap();
        assert_eq!(dev.output().get_f64().unwrap(), 2.0);
        assert!(dev.trigger().unwrap().success());

        assert!(dev.input("den").unwrap().set(0.0.into()).is_err());
        let status = dev.trigger().unwrap();
        assert!(matches!(
            status.wait(None),
            Err(DeviceError::Computation(_))
        ));
    }

    #[test]
    fn test_injected_trigger_failure() {
        let dev = PvDerivedDevice::polynomial(
            "flaky",
            PvDerivedConfig {
                inputs: vec![PvInput::new("x", "X", 1.0).with_coefficients(vec![0.0, 1.0])],
                failure_probability: 1.0,
                seed: Some(3),
                ..PvDerivedConfig::default()
            },
        )
        .unwrap();
        assert_eq!(
            dev.trigger().unwrap().error(),
            Some(DeviceError::SimulatedFailure("flaky".into()))
        );
    }

    #[test]
    fn test_requires_inputs() {
        assert!(PvDerivedDevice::polynomial("empty", PvDerivedConfig::default()).is_err());
    }
}
