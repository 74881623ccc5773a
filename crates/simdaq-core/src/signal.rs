//! Signals
//!
//! A `Signal` is a single named, typed value cell. It builds on
//! `tokio::sync::watch` for async observers and adds synchronous callback
//! subscriptions, kinds, optional noise and validation.
//!
//! # Features
//!
//! - Declared value type fixed at construction (`set` rejects mismatches)
//! - Kind tag deciding which device read surface exposes the signal
//! - Callback subscribers invoked with `(new, old)` after every set
//! - Optional Gaussian read noise and range/custom validation
//! - Source address for simulated PVs (`HFIR:mono:theta`)
//!
//! # Example
//!
//! ```rust,ignore
//! let gain = Signal::new("det_gain", 1.0)
//!     .with_kind(Kind::Config)
//!     .with_range(0.0, 100.0);
//!
//! let id = gain.subscribe(|new, old| {
//!     println!("gain {old} -> {new}");
//!     Ok(())
//! });
//!
//! gain.set(2.0.into())?;
//! gain.unsubscribe(id);
//! ```
//!
//! Clones share the same value cell and subscriber list.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{trace, warn};

use crate::error::{DeviceError, DeviceResult};
use crate::kind::Kind;
use crate::sim::Noise;
use crate::value::{SignalValue, ValueType};

/// Callback invoked with `(new_value, old_value)` after a set completes.
pub type SubscriberFn = Arc<dyn Fn(&SignalValue, &SignalValue) -> DeviceResult<()> + Send + Sync>;

type Validator = Arc<dyn Fn(&SignalValue) -> DeviceResult<()> + Send + Sync>;

/// Handle returned by [`Signal::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A value together with the time it was stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub value: SignalValue,
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    fn now(value: SignalValue) -> Self {
        Self {
            value,
            timestamp: Utc::now(),
        }
    }
}

/// Metadata for a signal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalMetadata {
    /// Full signal name (`<device>_<component>`)
    pub name: String,
    pub kind: Kind,
    pub value_type: ValueType,
    pub description: Option<String>,
    /// Physical units (e.g., "degC", "meV", "nm")
    pub units: Option<String>,
    /// Address of the simulated PV backing this signal
    pub source: Option<String>,
    /// Whether external `set` calls are rejected
    pub read_only: bool,
}

/// Descriptor entry reported by `Device::describe`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDescriptor {
    pub source: String,
    pub dtype: String,
    pub shape: Vec<usize>,
    pub units: Option<String>,
    pub kind: Kind,
}

struct Shared {
    sender: watch::Sender<Sample>,
    subscribers: Mutex<Vec<(SubscriptionId, SubscriberFn)>>,
    next_subscription: AtomicU64,
    reads: AtomicU64,
}

/// A thread-safe, typed, observable value cell.
#[derive(Clone)]
pub struct Signal {
    metadata: SignalMetadata,
    noise: Option<Noise>,
    validator: Option<Validator>,
    shared: Arc<Shared>,
}

impl Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("metadata", &self.metadata)
            .field("noise", &self.noise)
            .field("has_validator", &self.validator.is_some())
            .finish()
    }
}

impl Signal {
    /// Create a signal whose declared type is the type of `initial`.
    pub fn new(name: impl Into<String>, initial: impl Into<SignalValue>) -> Self {
        let initial = initial.into();
        let value_type = initial.value_type();
        let (sender, _) = watch::channel(Sample::now(initial));
        Self {
            metadata: SignalMetadata {
                name: name.into(),
                kind: Kind::Normal,
                value_type,
                description: None,
                units: None,
                source: None,
                read_only: false,
            },
            noise: None,
            validator: None,
            shared: Arc::new(Shared {
                sender,
                subscribers: Mutex::new(Vec::new()),
                next_subscription: AtomicU64::new(0),
                reads: AtomicU64::new(0),
            }),
        }
    }

    pub fn with_kind(mut self, kind: Kind) -> Self {
        self.metadata.kind = kind;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = Some(description.into());
        self
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.metadata.units = Some(units.into());
        self
    }

    /// Record the simulated PV address backing this signal.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.metadata.source = Some(source.into());
        self
    }

    /// Reject external `set`; the owning device still writes through `put`.
    pub fn read_only(mut self) -> Self {
        self.metadata.read_only = true;
        self
    }

    /// Perturb every `get()` with Gaussian noise.
    pub fn with_noise(mut self, noise: Noise) -> Self {
        self.noise = Some(noise);
        self
    }

    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&SignalValue) -> DeviceResult<()> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Add inclusive min/max validation for numeric values.
    pub fn with_range(self, min: f64, max: f64) -> Self {
        let target = self.metadata.name.clone();
        self.with_validator(move |value| match value.as_f64() {
            Some(v) if v >= min && v <= max => Ok(()),
            Some(v) => Err(DeviceError::OutOfBounds {
                target: target.clone(),
                value: v,
                min,
                max,
            }),
            None => Ok(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn kind(&self) -> Kind {
        self.metadata.kind
    }

    pub fn value_type(&self) -> ValueType {
        self.metadata.value_type
    }

    pub fn metadata(&self) -> &SignalMetadata {
        &self.metadata
    }

    pub fn noise(&self) -> Option<&Noise> {
        self.noise.as_ref()
    }

    pub fn is_noisy(&self) -> bool {
        self.noise.is_some()
    }

    /// Current value, perturbed when the signal is noisy.
    ///
    /// Two calls without an intervening set may differ for noisy signals.
    pub fn get(&self) -> SignalValue {
        self.read().value
    }

    /// Current value without noise.
    pub fn get_raw(&self) -> SignalValue {
        self.shared.sender.borrow().value.clone()
    }

    /// Current value as `f64` (noisy if configured).
    pub fn get_f64(&self) -> DeviceResult<f64> {
        self.get().as_f64().ok_or_else(|| self.mismatch(ValueType::Float))
    }

    /// Stored value and timestamp without noise.
    pub fn sample(&self) -> Sample {
        self.shared.sender.borrow().clone()
    }

    /// Value (noisy if configured) and timestamp, as reported by device reads.
    pub fn read(&self) -> Sample {
        let mut sample = self.sample();
        if let Some(noise) = &self.noise {
            let call = self.shared.reads.fetch_add(1, Ordering::Relaxed);
            sample.value = noise.apply(sample.value, call);
        }
        sample
    }

    /// Set a new value from outside the owning device.
    ///
    /// Returns error if:
    /// - Signal is read-only
    /// - Value type differs from the declared type
    /// - Validation fails
    /// - One or more subscribers failed (the value is stored regardless)
    pub fn set(&self, value: SignalValue) -> DeviceResult<()> {
        if self.metadata.read_only {
            return Err(DeviceError::ReadOnly(self.metadata.name.clone()));
        }
        self.put(value)
    }

    /// Store a value, bypassing the read-only flag (device-internal writes).
    pub fn put(&self, value: SignalValue) -> DeviceResult<()> {
        if value.value_type() != self.metadata.value_type {
            return Err(self.mismatch(value.value_type()));
        }
        if let Some(validator) = &self.validator {
            validator(&value)?;
        }

        trace!(signal = %self.metadata.name, value = %value, "signal updated");
        let old = self.shared.sender.send_replace(Sample::now(value.clone()));
        self.notify(&value, &old.value)
    }

    fn notify(&self, new: &SignalValue, old: &SignalValue) -> DeviceResult<()> {
        // Snapshot so callbacks may subscribe/unsubscribe or set other signals
        let subscribers: Vec<SubscriberFn> = self
            .shared
            .subscribers
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        let mut errors = Vec::new();
        for callback in subscribers {
            if let Err(err) = callback(new, old) {
                warn!(signal = %self.metadata.name, error = %err, "subscriber failed");
                errors.push(err);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DeviceError::Subscribers(errors))
        }
    }

    fn mismatch(&self, actual: ValueType) -> DeviceError {
        DeviceError::TypeMismatch {
            signal: self.metadata.name.clone(),
            expected: self.metadata.value_type,
            actual,
        }
    }

    /// Register a callback run after every successful set, in registration order.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&SignalValue, &SignalValue) -> DeviceResult<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(
            self.shared
                .next_subscription
                .fetch_add(1, Ordering::Relaxed),
        );
        self.shared.subscribers.lock().push((id, Arc::new(callback)));
        id
    }

    /// Remove a callback. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.shared.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(sub, _)| *sub != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.lock().len()
    }

    /// Receiver for async observers; `changed().await` fires on every store.
    pub fn watch(&self) -> watch::Receiver<Sample> {
        self.shared.sender.subscribe()
    }

    pub fn describe(&self) -> SignalDescriptor {
        let source = self
            .metadata
            .source
            .clone()
            .unwrap_or_else(|| format!("SIM:{}", self.metadata.name));
        SignalDescriptor {
            source,
            dtype: self.metadata.value_type.dtype().to_string(),
            shape: self.sample().value.shape(),
            units: self.metadata.units.clone(),
            kind: self.metadata.kind,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_signal_basic() {
        let sig = Signal::new("det_intensity", 1000.0);
        assert_eq!(sig.get(), SignalValue::Float(1000.0));
        assert_eq!(sig.name(), "det_intensity");
        assert_eq!(sig.kind(), Kind::Normal);

        sig.set(SignalValue::Float(250.0)).unwrap();
        assert_eq!(sig.get_f64().unwrap(), 250.0);
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let sig = Signal::new("det_gain", 1.0);
        let err = sig.set(SignalValue::Text("high".into())).unwrap_err();
        assert!(matches!(
            err,
            DeviceError::TypeMismatch {
                expected: ValueType::Float,
                actual: ValueType::Text,
                ..
            }
        ));
        assert_eq!(sig.get(), SignalValue::Float(1.0));

        // Integers are not silently widened
        assert!(sig.set(SignalValue::Int(2)).is_err());
    }

    #[test]
    fn test_read_only_allows_put() {
        let sig = Signal::new("mono_energy", 0.0).read_only();
        assert!(matches!(
            sig.set(5.0.into()),
            Err(DeviceError::ReadOnly(_))
        ));
        sig.put(5.0.into()).unwrap();
        assert_eq!(sig.get_f64().unwrap(), 5.0);
    }

    #[test]
    fn test_range_validation() {
        let sig = Signal::new("tc_setpoint", 20.0).with_range(-50.0, 150.0);
        assert!(sig.set(100.0.into()).is_ok());
        assert!(matches!(
            sig.set(200.0.into()),
            Err(DeviceError::OutOfBounds { .. })
        ));
        assert_eq!(sig.get_f64().unwrap(), 100.0);
    }

    #[test]
    fn test_subscribers_receive_new_and_old() {
        let sig = Signal::new("pv1", 1.0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        sig.subscribe(move |new, old| {
            log.lock().push((new.clone(), old.clone()));
            Ok(())
        });

        sig.set(2.0.into()).unwrap();
        sig.set(3.0.into()).unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (SignalValue::Float(2.0), SignalValue::Float(1.0)));
        assert_eq!(seen[1], (SignalValue::Float(3.0), SignalValue::Float(2.0)));
    }

    #[test]
    fn test_failing_subscriber_does_not_block_others() {
        let sig = Signal::new("pv1", 0.0);
        let calls = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&calls);
        sig.subscribe(move |_, _| {
            c1.fetch_add(1, Ordering::SeqCst);
            Err(DeviceError::Computation("first".into()))
        });
        let c2 = Arc::clone(&calls);
        sig.subscribe(move |_, _| {
            c2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let c3 = Arc::clone(&calls);
        sig.subscribe(move |_, _| {
            c3.fetch_add(1, Ordering::SeqCst);
            Err(DeviceError::Computation("third".into()))
        });

        let err = sig.set(4.0.into()).unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            DeviceError::Subscribers(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {other:?}"),
        }
        // Value is committed even though subscribers failed
        assert_eq!(sig.get_f64().unwrap(), 4.0);
    }

    #[test]
    fn test_unsubscribe() {
        let sig = Signal::new("pv1", 0.0);
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let id = sig.subscribe(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(sig.subscriber_count(), 1);
        assert!(sig.unsubscribe(id));
        assert!(!sig.unsubscribe(id));

        sig.set(1.0.into()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_clones_share_value() {
        let sig = Signal::new("pv1", 0.0);
        let other = sig.clone();
        other.set(9.0.into()).unwrap();
        assert_eq!(sig.get_f64().unwrap(), 9.0);
    }

    #[test]
    fn test_noisy_get_varies_but_raw_does_not() {
        let sig = Signal::new("det_intensity", 100.0).with_noise(Noise::new(1.0, 11));
        let a = sig.get_f64().unwrap();
        let b = sig.get_f64().unwrap();
        assert_ne!(a, b);
        assert!((a - 100.0).abs() < 10.0);
        assert_eq!(sig.get_raw(), SignalValue::Float(100.0));
    }

    #[test]
    fn test_describe() {
        let sig = Signal::new("spec_wavelengths", vec![400.0, 500.0, 600.0])
            .with_units("nm")
            .with_source("SPEC:wavelengths");
        let desc = sig.describe();
        assert_eq!(desc.dtype, "array");
        assert_eq!(desc.shape, vec![3]);
        assert_eq!(desc.source, "SPEC:wavelengths");
        assert_eq!(desc.units.as_deref(), Some("nm"));
    }

    #[tokio::test]
    async fn test_watch_subscription() {
        let sig = Signal::new("value", 0.0);
        let mut rx = sig.watch();
        assert_eq!(rx.borrow().value, SignalValue::Float(0.0));

        sig.set(42.0.into()).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().value, SignalValue::Float(42.0));
    }
}
