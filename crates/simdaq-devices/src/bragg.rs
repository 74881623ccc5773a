//! Bragg reflection geometry for monochromator and analyzer crystals.
//!
//! Neutron energy and wavelength are related by `E = 81.804 / λ²`
//! (meV, Å); the reflecting angle satisfies `λ = 2 d sin θ`. The sign of
//! the angle encodes the scattering sense of the crystal.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use simdaq_core::{DeviceError, DeviceResult};

/// `E[meV] * λ[Å]²` for neutrons.
pub const ENERGY_WAVELENGTH_FACTOR: f64 = 81.804;

/// Scattering sense: `+` for counter-clockwise, `-` for clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sense {
    #[serde(rename = "+")]
    Positive,
    #[serde(rename = "-")]
    Negative,
}

impl Sense {
    pub fn sign(self) -> f64 {
        match self {
            Sense::Positive => 1.0,
            Sense::Negative => -1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Sense::Positive => "+",
            Sense::Negative => "-",
        }
    }
}

impl fmt::Display for Sense {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sense {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "+" => Ok(Sense::Positive),
            "-" => Ok(Sense::Negative),
            other => Err(DeviceError::InvalidArgument(format!(
                "unknown scattering sense '{other}', expected '+' or '-'"
            ))),
        }
    }
}

/// Reflection used by a monochromator or analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Crystal {
    #[serde(rename = "PG002")]
    Pg002,
    #[serde(rename = "PG004")]
    Pg004,
    #[serde(rename = "Si111")]
    Si111,
    #[serde(rename = "Ge111")]
    Ge111,
    #[serde(rename = "Cu220")]
    Cu220,
    /// Arbitrary d-spacing in Å
    Custom(f64),
}

impl Crystal {
    /// Lattice plane spacing in Å.
    pub fn d_spacing(self) -> f64 {
        match self {
            Crystal::Pg002 => 3.35416,
            Crystal::Pg004 => 1.67708,
            Crystal::Si111 => 3.1356,
            Crystal::Ge111 => 3.2664,
            Crystal::Cu220 => 1.2781,
            Crystal::Custom(d) => d,
        }
    }

    pub fn label(self) -> String {
        match self {
            Crystal::Pg002 => "PG002".into(),
            Crystal::Pg004 => "PG004".into(),
            Crystal::Si111 => "Si111".into(),
            Crystal::Ge111 => "Ge111".into(),
            Crystal::Cu220 => "Cu220".into(),
            Crystal::Custom(d) => format!("d={d}"),
        }
    }
}

/// Monochromator/analyzer parameters: crystal and scattering sense.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonoAna {
    pub crystal: Crystal,
    pub sense: Sense,
}

impl MonoAna {
    pub fn new(crystal: Crystal, sense: Sense) -> DeviceResult<Self> {
        let d = crystal.d_spacing();
        if !(d.is_finite() && d > 0.0) {
            return Err(DeviceError::InvalidArgument(format!(
                "d-spacing {d} must be a positive number"
            )));
        }
        Ok(Self { crystal, sense })
    }

    pub fn d_spacing(&self) -> f64 {
        self.crystal.d_spacing()
    }

    /// Signed Bragg angle θ in degrees for energy `energy` (meV).
    ///
    /// `None` when `λ > 2d` (energy below [`MonoAna::min_energy`]) or the
    /// energy is not positive.
    pub fn bragg_angle(&self, energy: f64) -> Option<f64> {
        if !(energy > 0.0) || !energy.is_finite() {
            return None;
        }
        let wavelength = (ENERGY_WAVELENGTH_FACTOR / energy).sqrt();
        let ratio = wavelength / (2.0 * self.d_spacing());
        // Tolerate rounding at exactly backscattering
        if ratio > 1.0 + 1e-12 {
            return None;
        }
        Some(self.sense.sign() * ratio.min(1.0).asin().to_degrees())
    }

    /// Energy (meV) reflected at angle `theta` (degrees), ignoring its sign.
    pub fn energy_from_angle(&self, theta: f64) -> Option<f64> {
        let sin = theta.to_radians().sin().abs();
        if sin == 0.0 || !sin.is_finite() {
            return None;
        }
        let wavelength = 2.0 * self.d_spacing() * sin;
        Some(ENERGY_WAVELENGTH_FACTOR / (wavelength * wavelength))
    }

    /// Like [`MonoAna::energy_from_angle`] but `None` unless `theta` has
    /// this crystal's sense.
    pub fn energy_for_angle(&self, theta: f64) -> Option<f64> {
        if theta.signum() != self.sense.sign() || theta == 0.0 {
            return None;
        }
        self.energy_from_angle(theta)
    }

    /// Lowest reachable energy (θ = 90°).
    pub fn min_energy(&self) -> f64 {
        let wavelength = 2.0 * self.d_spacing();
        ENERGY_WAVELENGTH_FACTOR / (wavelength * wavelength)
    }
}
