//! Simulated instrument devices built on `simdaq-core`.
//!
//! | device | module | actions |
//! |---|---|---|
//! | [`SynDetector`] | `detector` | instantaneous `trigger` |
//! | [`SynAxis`] | `axis` | timed `set`, `stop` |
//! | [`TemperatureController`] | `temperature` | ramped `set`, `stop` |
//! | [`Spectrometer`] | `spectrometer` | timed `trigger`, `stop` |
//! | [`PvDerivedDevice`] | `pv_derived` | `trigger` recomputes |
//! | [`EnergySelector`] | `energy` | instantaneous `set` |
//! | [`TripleAxis`] | `triple_axis` | `move_to(ei, ef)` |
//!
//! Devices with timed actions run them on a shared [`simdaq_core::Executor`]
//! and reject a second action while one is pending.

pub mod axis;
pub mod bragg;
pub mod detector;
pub mod energy;
pub mod pv_derived;
pub mod spectrometer;
pub mod temperature;
pub mod triple_axis;

pub use axis::{AxisConfig, SynAxis};
pub use bragg::{Crystal, MonoAna, Sense};
pub use detector::{DetectorConfig, SynDetector};
pub use energy::{EnergySelector, EnergySelectorConfig};
pub use pv_derived::{PvDerivedConfig, PvDerivedDevice, PvInput};
pub use spectrometer::{Spectrometer, SpectrometerConfig};
pub use temperature::{TemperatureConfig, TemperatureController};
pub use triple_axis::TripleAxis;
