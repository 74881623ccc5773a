//! `simdaq` command-line entry point.
//!
//! Loads a device configuration, builds every enabled device and runs one
//! command against them. Readings are printed as JSON on stdout; logs go
//! to stderr.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use simdaq::config::{SimConfig, DEFAULT_CONFIG_PATH};
use simdaq::logging;
use simdaq::registry::{DeviceRegistry, SimDevice};
use simdaq_core::Device;

#[derive(Parser)]
#[command(name = "simdaq")]
#[command(about = "Simulated scientific-instrument devices", long_about = None)]
struct Cli {
    /// Path to the TOML device configuration
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,
    /// Emit logs as JSON lines
    #[arg(long)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trigger, move and read every configured device once
    Demo,
    /// List configured devices
    List,
    /// Print the read and configuration surfaces of a device
    Read {
        /// Device id
        id: String,
    },
    /// Print signal descriptors of a device
    Describe {
        /// Device id
        id: String,
    },
    /// Trigger an acquisition and print the resulting reading
    Trigger {
        /// Device id
        id: String,
    },
    /// Move a positioner, or a triple-axis instrument to (E_i, E_f)
    Move {
        /// Device id
        id: String,
        /// One target, or two energies in meV for a triple-axis instrument
        #[arg(required = true, num_args = 1.., allow_negative_numbers = true)]
        targets: Vec<f64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = SimConfig::load_from(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    let level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.application.log_level);
    logging::init(level, cli.json)?;
    info!(
        application = %config.application.name,
        config = %cli.config.display(),
        "configuration loaded"
    );

    let registry = DeviceRegistry::from_config(&config)?;
    let result = run(&registry, cli.command);
    if let Err(err) = registry.stop_all() {
        warn!(error = %err, "failed to stop devices");
    }
    result
}

fn run(registry: &DeviceRegistry, command: Commands) -> Result<()> {
    match command {
        Commands::Demo => demo(registry),
        Commands::List => {
            for (id, device) in registry.iter() {
                println!("{id:<16} {}", device.type_name());
            }
            Ok(())
        }
        Commands::Read { id } => {
            let device = registry.get(&id)?;
            print_json(&Surfaces {
                read: device.read(),
                configuration: device.read_configuration(),
            })
        }
        Commands::Describe { id } => describe(registry.get(&id)?),
        Commands::Trigger { id } => print_json(&registry.trigger(&id)?),
        Commands::Move { id, targets } => print_json(&registry.move_to(&id, &targets)?),
    }
}

#[derive(Serialize)]
struct Surfaces<T> {
    read: T,
    configuration: T,
}

fn describe(device: &SimDevice) -> Result<()> {
    match device {
        SimDevice::TripleAxis(tas) => {
            let mut read = tas.monochromator().describe();
            read.extend(tas.analyzer().describe());
            let mut configuration = tas.monochromator().describe_configuration();
            configuration.extend(tas.analyzer().describe_configuration());
            print_json(&Surfaces {
                read,
                configuration,
            })
        }
        other => match other.as_device() {
            Some(device) => print_json(&Surfaces {
                read: device.describe(),
                configuration: device.describe_configuration(),
            }),
            None => bail!("'{}' has no signal descriptors", other.name()),
        },
    }
}

/// Walk every device: print its configuration, trigger it, nudge movables
/// a short way and print the final reading.
fn demo(registry: &DeviceRegistry) -> Result<()> {
    for (id, device) in registry.iter() {
        println!("== {id} ({})", device.type_name());
        print_json(&device.read_configuration())?;

        let status = device.trigger()?;
        registry.wait(&status)?;

        if let Some(movable) = device.as_movable() {
            let limits = movable.limits();
            let target = demo_target(movable.position(), limits.min, limits.max);
            info!(device = %id, target, "demo move");
            let status = movable.set(target)?;
            registry.wait(&status)?;
        } else if let SimDevice::TripleAxis(tas) = device {
            let status = tas.move_to(DEMO_ENERGY_MEV, DEMO_ENERGY_MEV)?;
            registry.wait(&status)?;
        }

        print_json(&device.read())?;
    }
    Ok(())
}

/// Elastic scan point used by the demo for triple-axis instruments
const DEMO_ENERGY_MEV: f64 = 14.7;

/// A short hop inside `[min, max]`, avoiding infinite bounds.
fn demo_target(position: f64, min: f64, max: f64) -> f64 {
    let position = position.clamp(min, max);
    let step = if max.is_finite() && min.is_finite() {
        ((max - min) * 0.01).min(5.0)
    } else {
        1.0
    };
    if position + step <= max {
        position + step
    } else {
        position - step
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
