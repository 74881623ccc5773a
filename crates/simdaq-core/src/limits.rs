//! Travel limits for positioners and hard caps on simulated array sizes.

use serde::{Deserialize, Serialize};

use crate::error::{DeviceError, DeviceResult};

/// Maximum number of samples a simulated array signal may hold.
pub const MAX_ARRAY_LEN: usize = 1 << 20;

/// Inclusive `[min, max]` range a positioner may be commanded to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub min: f64,
    pub max: f64,
}

impl Limits {
    pub fn new(min: f64, max: f64) -> DeviceResult<Self> {
        if min.is_nan() || max.is_nan() || min > max {
            return Err(DeviceError::InvalidArgument(format!(
                "invalid limits [{min}, {max}]"
            )));
        }
        Ok(Self { min, max })
    }

    /// No travel restriction.
    pub fn unbounded() -> Self {
        Self {
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Validate a target for `target`, rejecting NaN and out-of-range values.
    pub fn check(&self, target: &str, value: f64) -> DeviceResult<()> {
        if self.contains(value) {
            Ok(())
        } else {
            Err(DeviceError::OutOfBounds {
                target: target.to_string(),
                value,
                min: self.min,
                max: self.max,
            })
        }
    }
}

/// Validate a requested array length against [`MAX_ARRAY_LEN`].
pub fn validate_array_len(context: &str, len: usize) -> DeviceResult<usize> {
    if len == 0 {
        return Err(DeviceError::InvalidArgument(format!(
            "{context}: array length must be > 0"
        )));
    }
    if len > MAX_ARRAY_LEN {
        return Err(DeviceError::InvalidArgument(format!(
            "{context}: array length {len} exceeds {MAX_ARRAY_LEN}"
        )));
    }
    Ok(len)
}
