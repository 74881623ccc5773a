//! Core types and traits for simdaq.
//!
//! - **`value`**: `SignalValue` and the declared `ValueType` of a signal.
//! - **`kind`**: `Kind`, deciding which read surface exposes a signal.
//! - **`signal`**: `Signal`, a typed value cell with subscribers and noise.
//! - **`derived`**: `Derivation`, an output signal recomputed from inputs.
//! - **`status`**: `Status`, the one-shot completion handle of an action.
//! - **`executor`**: `Executor` worker pool and the `ActionSlot` busy policy.
//! - **`device`**: `SignalSet`, and the `Device`/`Movable` traits.
//! - **`limits`**: travel limits and array size caps.
//! - **`sim`**: Gaussian noise and failure injection.
//! - **`error`**: `DeviceError`, shared by everything above.

pub mod derived;
pub mod device;
pub mod error;
pub mod executor;
pub mod kind;
pub mod limits;
pub mod signal;
pub mod sim;
pub mod status;
pub mod value;

pub use derived::{input_f64, Derivation, DeriveFn};
pub use device::{Description, Device, Movable, Reading, SignalSet};
pub use error::{DeviceError, DeviceResult};
pub use executor::{ActionSlot, Executor, DEFAULT_DEADLINE_MARGIN_MS};
pub use kind::Kind;
pub use limits::Limits;
pub use signal::{Sample, Signal, SignalDescriptor, SignalMetadata, SubscriptionId};
pub use sim::{FailureInjector, Noise};
pub use status::{Outcome, Status, StatusState};
pub use value::{SignalValue, ValueType};
