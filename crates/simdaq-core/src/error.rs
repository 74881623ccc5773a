//! Error types shared by signals, devices and statuses.
//!
//! `DeviceError` is the single error enum for the simulation core. It is
//! `Clone` because a failed [`Status`](crate::status::Status) hands the same
//! error to every waiter and every completion callback.
//!
//! ## Propagation
//!
//! - **Synchronous validation** (`TypeMismatch`, `OutOfBounds`, `Busy`,
//!   `ReadOnly`): returned directly from the action method.
//! - **Asynchronous failures** (`SimulatedFailure`, `Stopped`, `Cancelled`,
//!   `Timeout` of a status deadline): delivered only through the failed
//!   status of the action.
//! - **Subscriber failures**: collected into `Subscribers` after every
//!   subscriber of a signal has run.

use std::time::Duration;

use thiserror::Error;

use crate::value::ValueType;

/// Convenience alias for results using the device error type.
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("Signal '{signal}' expects {expected} but got {actual}")]
    TypeMismatch {
        signal: String,
        expected: ValueType,
        actual: ValueType,
    },

    #[error("Value {value} for '{target}' out of range [{min}, {max}]")]
    OutOfBounds {
        target: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Device '{0}' is busy with an action in flight")]
    Busy(String),

    #[error("Timed out after {0:?} waiting for completion")]
    Timeout(Duration),

    #[error("Operation cancelled before completion")]
    Cancelled,

    #[error("Device '{0}' stopped mid-action")]
    Stopped(String),

    #[error("Simulated failure injected by device '{0}'")]
    SimulatedFailure(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Signal '{0}' is read-only")]
    ReadOnly(String),

    #[error("Device '{device}' has no signal named '{signal}'")]
    UnknownSignal { device: String, signal: String },

    #[error("{} subscriber callback(s) failed: {}", .0.len(), summarize(.0))]
    Subscribers(Vec<DeviceError>),

    #[error("Computation failed: {0}")]
    Computation(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Executor error: {0}")]
    Executor(String),
}

fn summarize(errors: &[DeviceError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl DeviceError {
    /// True for errors raised synchronously by argument validation.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DeviceError::TypeMismatch { .. }
                | DeviceError::OutOfBounds { .. }
                | DeviceError::Busy(_)
                | DeviceError::ReadOnly(_)
                | DeviceError::InvalidArgument(_)
        )
    }
}
