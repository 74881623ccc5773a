//! Derived signals: an output recomputed from declared inputs.
//!
//! A [`Derivation`] holds an explicit dependency list and a pure function
//! of the current input values. Binding subscribes to every input, so any
//! input set recomputes the output before that set returns; `recompute()`
//! does the same on demand.
//!
//! ```rust,ignore
//! let e_i = Derivation::new(energy.clone(), vec![pv1.clone(), pv2.clone()], |v| {
//!     let (a, b) = (v[0].as_f64().unwrap_or(0.0), v[1].as_f64().unwrap_or(0.0));
//!     Ok(SignalValue::Float(a * a + 3.0 * b))
//! })
//! .bind();
//! ```

use std::sync::{Arc, Weak};

use crate::error::{DeviceError, DeviceResult};
use crate::signal::{Signal, SubscriptionId};
use crate::value::SignalValue;

/// Pure function from input values (in declaration order) to the output value.
pub type DeriveFn = Arc<dyn Fn(&[SignalValue]) -> DeviceResult<SignalValue> + Send + Sync>;

struct Inner {
    output: Signal,
    inputs: Vec<Signal>,
    compute: DeriveFn,
}

impl Inner {
    fn recompute(&self) -> DeviceResult<SignalValue> {
        // Raw values: derivations ignore read noise on their inputs
        let values: Vec<SignalValue> = self.inputs.iter().map(Signal::get_raw).collect();
        let value = (self.compute)(&values)?;
        self.output.put(value.clone())?;
        Ok(value)
    }
}

/// An output signal kept equal to `compute(inputs)`.
///
/// Dropping the derivation removes its input subscriptions.
pub struct Derivation {
    inner: Arc<Inner>,
    subscriptions: Vec<(Signal, SubscriptionId)>,
}

impl std::fmt::Debug for Derivation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Derivation")
            .field("output", &self.inner.output.name())
            .field(
                "inputs",
                &self.inner.inputs.iter().map(Signal::name).collect::<Vec<_>>(),
            )
            .field("bound", &!self.subscriptions.is_empty())
            .finish()
    }
}

impl Derivation {
    pub fn new<F>(output: Signal, inputs: Vec<Signal>, compute: F) -> Self
    where
        F: Fn(&[SignalValue]) -> DeviceResult<SignalValue> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                output,
                inputs,
                compute: Arc::new(compute),
            }),
            subscriptions: Vec::new(),
        }
    }

    /// Subscribe to every input and compute the initial output.
    pub fn bind(mut self) -> DeviceResult<Self> {
        if self.inner.inputs.is_empty() {
            return Err(DeviceError::InvalidArgument(format!(
                "derived signal '{}' declares no inputs",
                self.inner.output.name()
            )));
        }
        for input in &self.inner.inputs {
            let weak: Weak<Inner> = Arc::downgrade(&self.inner);
            let id = input.subscribe(move |_, _| match weak.upgrade() {
                Some(inner) => inner.recompute().map(|_| ()),
                None => Ok(()),
            });
            self.subscriptions.push((input.clone(), id));
        }
        self.inner.recompute()?;
        Ok(self)
    }

    /// Recompute the output from the current inputs.
    pub fn recompute(&self) -> DeviceResult<SignalValue> {
        self.inner.recompute()
    }

    pub fn output(&self) -> &Signal {
        &self.inner.output
    }

    pub fn inputs(&self) -> &[Signal] {
        &self.inner.inputs
    }
}

impl Drop for Derivation {
    fn drop(&mut self) {
        for (input, id) in self.subscriptions.drain(..) {
            input.unsubscribe(id);
        }
    }
}

/// Read input `idx` as `f64`, for use inside derive functions.
pub fn input_f64(values: &[SignalValue], idx: usize) -> DeviceResult<f64> {
    values
        .get(idx)
        .and_then(SignalValue::as_f64)
        .ok_or_else(|| DeviceError::Computation(format!("input {idx} is not numeric")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn e_i(values: &[SignalValue]) -> DeviceResult<SignalValue> {
        let pv1 = input_f64(values, 0)?;
        let pv2 = input_f64(values, 1)?;
        Ok(SignalValue::Float(pv1 * pv1 + 3.0 * pv2))
    }

    #[test]
    fn test_output_tracks_inputs() {
        let pv1 = Signal::new("pv1", 0.0);
        let pv2 = Signal::new("pv2", 0.0);
        let out = Signal::new("e_i", 0.0);
        let derivation = Derivation::new(out.clone(), vec![pv1.clone(), pv2.clone()], e_i)
            .bind()
            .unwrap();

        pv1.set(2.0.into()).unwrap();
        pv2.set(5.0.into()).unwrap();
        assert_eq!(out.get_f64().unwrap(), 19.0);

        pv1.set(3.0.into()).unwrap();
        assert_eq!(out.get_f64().unwrap(), 24.0);
        assert_eq!(derivation.recompute().unwrap(), SignalValue::Float(24.0));
    }

    #[test]
    fn test_drop_unsubscribes() {
        let pv1 = Signal::new("pv1", 1.0);
        let out = Signal::new("double", 0.0);
        let derivation = Derivation::new(out.clone(), vec![pv1.clone()], |v| {
            Ok(SignalValue::Float(2.0 * input_f64(v, 0)?))
        })
        .bind()
        .unwrap();
        assert_eq!(out.get_f64().unwrap(), 2.0);
        assert_eq!(pv1.subscriber_count(), 1);

        drop(derivation);
        assert_eq!(pv1.subscriber_count(), 0);
        pv1.set(10.0.into()).unwrap();
        assert_eq!(out.get_f64().unwrap(), 2.0);
    }

    #[test]
    fn test_compute_error_reported_to_setter() {
        let pv1 = Signal::new("pv1", 1.0);
        let out = Signal::new("inverse", 1.0);
        let _derivation = Derivation::new(out.clone(), vec![pv1.clone()], |v| {
            let x = input_f64(v, 0)?;
            if x == 0.0 {
                return Err(DeviceError::Computation("division by zero".into()));
            }
            Ok(SignalValue::Float(1.0 / x))
        })
        .bind()
        .unwrap();

        let err = pv1.set(0.0.into()).unwrap_err();
        assert!(matches!(err, DeviceError::Subscribers(_)));
        assert_eq!(pv1.get_f64().unwrap(), 0.0);
        assert_eq!(out.get_f64().unwrap(), 1.0);
    }

    #[test]
    fn test_bind_requires_inputs() {
        let out = Signal::new("constant", 0.0);
        let result = Derivation::new(out, Vec::new(), |_| Ok(SignalValue::Float(1.0))).bind();
        assert!(result.is_err());
    }
}
