//! Device composition and read surfaces.
//!
//! A device owns an ordered [`SignalSet`] built explicitly at construction
//! time. Signals are looked up by component name (`gain`) and reported under
//! their full name (`det_gain`).
//!
//! ## Consistency
//!
//! `read()` samples each signal in turn without locking the whole device.
//! A read taken while an action is in flight may mix values from before and
//! after an update (torn read). Each individual value is always a complete,
//! previously stored value.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{DeviceError, DeviceResult};
use crate::kind::Kind;
use crate::limits::Limits;
use crate::signal::{Sample, Signal, SignalDescriptor};
use crate::status::Status;
use crate::value::SignalValue;

/// Ordered mapping from full signal name to its sampled value.
pub type Reading = IndexMap<String, Sample>;

/// Ordered mapping from full signal name to its descriptor.
pub type Description = IndexMap<String, SignalDescriptor>;

/// Ordered arena of the signals owned by one device.
#[derive(Debug, Clone)]
pub struct SignalSet {
    device: String,
    signals: Vec<Signal>,
    components: HashMap<String, usize>,
}

impl SignalSet {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            signals: Vec::new(),
            components: HashMap::new(),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Full name of component `component` on this device.
    pub fn full_name(&self, component: &str) -> String {
        if self.device.is_empty() {
            component.to_string()
        } else {
            format!("{}_{}", self.device, component)
        }
    }

    /// Create and register a signal named `<device>_<component>`.
    ///
    /// `build` receives the fresh signal to attach kind, units, noise, etc.
    pub fn add<F>(
        &mut self,
        component: &str,
        initial: impl Into<SignalValue>,
        build: F,
    ) -> DeviceResult<Signal>
    where
        F: FnOnce(Signal) -> Signal,
    {
        if self.components.contains_key(component) {
            return Err(DeviceError::InvalidArgument(format!(
                "device '{}' already has a signal named '{}'",
                self.device, component
            )));
        }
        let signal = build(Signal::new(self.full_name(component), initial));
        if let Some(noise) = signal.noise() {
            noise.validate(signal.name())?;
        }
        self.components
            .insert(component.to_string(), self.signals.len());
        self.signals.push(signal.clone());
        Ok(signal)
    }

    /// Look up a signal by component name or full name.
    pub fn get(&self, name: &str) -> DeviceResult<&Signal> {
        self.components
            .get(name)
            .map(|&idx| &self.signals[idx])
            .or_else(|| self.signals.iter().find(|s| s.name() == name))
            .ok_or_else(|| DeviceError::UnknownSignal {
                device: self.device.clone(),
                signal: name.to_string(),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Signal> {
        self.signals.iter()
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Sample every signal whose kind passes `filter`, in declaration order.
    pub fn read_where(&self, filter: impl Fn(Kind) -> bool) -> Reading {
        self.signals
            .iter()
            .filter(|s| filter(s.kind()))
            .map(|s| (s.name().to_string(), s.read()))
            .collect()
    }

    pub fn describe_where(&self, filter: impl Fn(Kind) -> bool) -> Description {
        self.signals
            .iter()
            .filter(|s| filter(s.kind()))
            .map(|s| (s.name().to_string(), s.describe()))
            .collect()
    }
}

/// A named group of signals with kind-partitioned reads and actions.
pub trait Device: Send + Sync {
    fn name(&self) -> &str;

    /// Every signal owned by the device, in declaration order.
    fn signals(&self) -> &SignalSet;

    fn signal(&self, component: &str) -> DeviceResult<&Signal> {
        self.signals().get(component)
    }

    /// Values of `normal` and `hinted` signals.
    fn read(&self) -> Reading {
        self.signals().read_where(Kind::is_read)
    }

    /// Values of `config` signals.
    fn read_configuration(&self) -> Reading {
        self.signals().read_where(Kind::is_config)
    }

    fn describe(&self) -> Description {
        self.signals().describe_where(Kind::is_read)
    }

    fn describe_configuration(&self) -> Description {
        self.signals().describe_where(Kind::is_config)
    }

    /// Full names of hinted signals (primary display quantities).
    fn hints(&self) -> Vec<String> {
        self.signals()
            .iter()
            .filter(|s| s.kind() == Kind::Hinted)
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Acquire new data. Devices without acquisition finish immediately.
    fn trigger(&self) -> DeviceResult<Status> {
        Ok(Status::finished(format!("{}.trigger", self.name())))
    }

    /// Halt any in-flight action, failing its status with `Stopped`.
    fn stop(&self) -> DeviceResult<()> {
        Ok(())
    }

    /// Simulated devices are always connected.
    fn connected(&self) -> bool {
        true
    }
}

/// A device that can be moved to a numeric target.
pub trait Movable: Device {
    /// Move to `target`.
    ///
    /// # Errors
    /// - `OutOfBounds` if `target` lies outside [`Movable::limits`]
    /// - `Busy` if a previous move is still pending
    ///
    /// Failures after the move starts are reported through the status.
    fn set(&self, target: f64) -> DeviceResult<Status>;

    /// Current readback position.
    fn position(&self) -> f64;

    fn limits(&self) -> Limits;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::Noise;

    struct Probe {
        signals: SignalSet,
    }

    impl Probe {
        fn new() -> Self {
            let mut signals = SignalSet::new("probe");
            signals
                .add("value", 1.0, |s| s.with_kind(Kind::Hinted))
                .unwrap();
            signals.add("raw", 2.0, |s| s).unwrap();
            signals
                .add("gain", 3.0, |s| s.with_kind(Kind::Config))
                .unwrap();
            signals
                .add("debug", 4.0, |s| s.with_kind(Kind::Omitted))
                .unwrap();
            Self { signals }
        }
    }

    impl Device for Probe {
        fn name(&self) -> &str {
            "probe"
        }

        fn signals(&self) -> &SignalSet {
            &self.signals
        }
    }

    #[test]
    fn test_read_partitions_by_kind() {
        let probe = Probe::new();
        let reading = probe.read();
        let keys: Vec<&str> = reading.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["probe_value", "probe_raw"]);

        let config = probe.read_configuration();
        let keys: Vec<&str> = config.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["probe_gain"]);

        assert!(!reading.contains_key("probe_debug"));
        assert!(!config.contains_key("probe_debug"));
    }

    #[test]
    fn test_lookup_by_component_and_full_name() {
        let probe = Probe::new();
        assert_eq!(probe.signal("gain").unwrap().name(), "probe_gain");
        assert_eq!(probe.signal("probe_gain").unwrap().name(), "probe_gain");
        assert!(matches!(
            probe.signal("missing"),
            Err(DeviceError::UnknownSignal { .. })
        ));
    }

    #[test]
    fn test_duplicate_component_rejected() {
        let mut signals = SignalSet::new("dup");
        signals.add("x", 0.0, |s| s).unwrap();
        assert!(signals.add("x", 1.0, |s| s).is_err());
        assert_eq!(signals.len(), 1);
    }

    #[test]
    fn test_invalid_noise_rejected() {
        let mut signals = SignalSet::new("det");
        let err = signals
            .add("intensity", 1.0, |s| s.with_noise(Noise::new(f64::NAN, 3)))
            .unwrap_err();
        assert!(matches!(err, DeviceError::InvalidArgument(_)));
        assert!(signals.is_empty());
    }

    #[test]
    fn test_default_lifecycle() {
        let probe = Probe::new();
        assert!(probe.connected());
        assert!(probe.trigger().unwrap().success());
        assert!(probe.stop().is_ok());
        assert_eq!(probe.hints(), vec!["probe_value".to_string()]);
        assert_eq!(probe.describe().len(), 2);
    }
}
