//! Application library for the `simdaq` binary.
//!
//! This library loads the device configuration, sets up logging and builds
//! the configured simulated devices. Device behaviour lives in
//! `simdaq-core` and `simdaq-devices`, re-exported here.

pub mod config;
pub mod logging;
pub mod registry;

pub use simdaq_core;
pub use simdaq_devices;

pub use config::{ConfigError, SimConfig};
pub use registry::{DeviceRegistry, SimDevice};
