//! Randomness for simulated devices: Gaussian noise and failure injection.
//!
//! Every generator is a `ChaCha8Rng`, so a fixed seed reproduces a run.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::error::{DeviceError, DeviceResult};
use crate::value::SignalValue;

/// Build a generator from an optional seed (entropy when `None`).
pub fn seeded_rng(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    }
}

/// Draw from `N(mean, sigma²)`. A negative or NaN `sigma` is rejected.
pub fn gaussian<R: Rng + ?Sized>(rng: &mut R, mean: f64, sigma: f64) -> DeviceResult<f64> {
    let normal = Normal::new(mean, sigma)
        .map_err(|err| DeviceError::InvalidArgument(format!("noise sigma {sigma}: {err}")))?;
    Ok(normal.sample(rng))
}

/// Reject a `sigma` that [`gaussian`] would refuse.
pub fn check_sigma(context: &str, sigma: f64) -> DeviceResult<()> {
    Normal::new(0.0, sigma).map(|_| ()).map_err(|err| {
        DeviceError::InvalidArgument(format!("{context}: noise sigma {sigma}: {err}"))
    })
}

/// Additive Gaussian noise applied on every `get()` of a noisy signal.
///
/// The generator is rebuilt per call from `seed` and the call index, so no
/// RNG state is stored between reads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Noise {
    /// Standard deviation of the perturbation
    pub sigma: f64,
    /// Base seed mixed with the read counter
    #[serde(default)]
    pub seed: u64,
}

impl Noise {
    pub fn new(sigma: f64, seed: u64) -> Self {
        Self { sigma, seed }
    }

    pub fn validate(&self, context: &str) -> DeviceResult<()> {
        check_sigma(context, self.sigma)
    }

    /// Perturb `value` for read number `call`. Non-numeric values pass through.
    pub fn apply(&self, value: SignalValue, call: u64) -> SignalValue {
        let mut rng =
            ChaCha8Rng::seed_from_u64(self.seed ^ call.wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let mut perturb = |v: f64| {
            let z: f64 = StandardNormal.sample(&mut rng);
            v + self.sigma * z
        };
        match value {
            SignalValue::Float(v) => SignalValue::Float(perturb(v)),
            SignalValue::Array(values) => {
                SignalValue::Array(values.into_iter().map(&mut perturb).collect())
            }
            other => other,
        }
    }
}

/// Injects `SimulatedFailure` with a fixed probability.
#[derive(Debug)]
pub struct FailureInjector {
    device: String,
    probability: f64,
    rng: Mutex<ChaCha8Rng>,
}

impl FailureInjector {
    /// `probability` must lie in `[0, 1]`.
    pub fn new(device: &str, probability: f64, seed: Option<u64>) -> DeviceResult<Self> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(DeviceError::InvalidArgument(format!(
                "failure probability {probability} for '{device}' must be within [0, 1]"
            )));
        }
        Ok(Self {
            device: device.to_string(),
            probability,
            rng: Mutex::new(seeded_rng(seed)),
        })
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    /// Err(`SimulatedFailure`) with the configured probability.
    pub fn roll(&self) -> DeviceResult<()> {
        if self.probability <= 0.0 {
            return Ok(());
        }
        let draw: f64 = self.rng.lock().gen();
        if draw < self.probability {
            Err(DeviceError::SimulatedFailure(self.device.clone()))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gaussian_statistics() {
        let mut rng = seeded_rng(Some(7));
        let n = 20_000;
        let samples: Vec<f64> = (0..n)
            .map(|_| gaussian(&mut rng, 5.0, 2.0).unwrap())
            .collect();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let var = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n as f64;
        assert!((mean - 5.0).abs() < 0.1, "mean {mean}");
        assert!((var.sqrt() - 2.0).abs() < 0.1, "sigma {}", var.sqrt());
    }

    #[test]
    fn test_gaussian_rejects_bad_sigma() {
        let mut rng = seeded_rng(Some(7));
        assert_eq!(gaussian(&mut rng, 3.0, 0.0).unwrap(), 3.0);
        assert!(matches!(
            gaussian(&mut rng, 3.0, -1.0),
            Err(DeviceError::InvalidArgument(_))
        ));
        assert!(gaussian(&mut rng, 3.0, f64::NAN).is_err());
        assert!(check_sigma("det", f64::NAN).is_err());
        assert!(Noise::new(-0.5, 1).validate("det_position").is_err());
        assert!(Noise::new(0.5, 1).validate("det_position").is_ok());
    }

    #[test]
    fn test_noise_is_reproducible_per_call() {
        let noise = Noise::new(0.5, 42);
        let a = noise.apply(SignalValue::Float(1.0), 3);
        let b = noise.apply(SignalValue::Float(1.0), 3);
        let c = noise.apply(SignalValue::Float(1.0), 4);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(
            noise.apply(SignalValue::Text("idle".into()), 1),
            SignalValue::Text("idle".into())
        );
    }

    #[test]
    fn test_failure_injector_extremes() {
        let always = FailureInjector::new("det", 1.0, Some(1)).unwrap();
        let never = FailureInjector::new("det", 0.0, Some(1)).unwrap();
        for _ in 0..100 {
            assert!(matches!(
                always.roll(),
                Err(DeviceError::SimulatedFailure(_))
            ));
            assert!(never.roll().is_ok());
        }
    }

    #[test]
    fn test_failure_probability_validated() {
        assert!(FailureInjector::new("det", 1.5, None).is_err());
        assert!(FailureInjector::new("det", -0.1, None).is_err());
    }
}
