//! IMU driver starter
//!
//! Loads the driver configuration, tares every sensor and runs one
//! streaming session, printing each joint's final reading. Ctrl-C stops the
//! session early.
//!
//! ```text
//! imudriver [CONFIG] [--demo] [--port NAME] [--list-ports]
//! ```

use anyhow::{bail, Context, Result};
use imudriver_core::prelude::*;
use imudriver_core::protocol::list_ports;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    port: Option<String>,
    demo: bool,
    list_ports: bool,
}

impl Args {
    fn parse<I: Iterator<Item = String>>(mut args: I) -> Result<Self> {
        let mut parsed = Args::default();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--demo" => parsed.demo = true,
                "--list-ports" => parsed.list_ports = true,
                "--port" => {
                    parsed.port = Some(args.next().context("--port needs a port name")?);
                }
                flag if flag.starts_with("--") => bail!("unknown option {}", flag),
                path => parsed.config = Some(PathBuf::from(path)),
            }
        }
        Ok(parsed)
    }
}

fn load_config(args: &Args) -> Result<DriverConfig> {
    let mut config = match &args.config {
        Some(path) => DriverConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => DriverConfig::default(),
    };
    if let Some(port) = &args.port {
        config.port_name = port.clone();
    }
    if args.demo && config.port_name.is_empty() {
        config.port_name = "demo".to_string();
    }
    Ok(config)
}

fn start_driver(config: DriverConfig, demo: bool) -> Result<Driver> {
    let builder = Driver::builder(config.clone());
    if !demo {
        return Ok(builder.start_serial()?);
    }

    let addresses: Vec<String> = config
        .validate()?
        .chain()
        .into_iter()
        .map(|node| node.address)
        .collect();
    let layout = config.frame_layout;
    let driver = builder.start(move || {
        let imu = SimulatedImu::new(addresses)
            .with_layout(layout)
            .with_garbage_rate(0.05);
        Ok(Box::new(imu) as Box<dyn Link>)
    })?;
    Ok(driver)
}

/// Tare, then stream once
fn run_session(driver: &Driver) -> Result<Vec<SensorFrame>> {
    driver.tare().context("tare failed")?;
    info!("all sensors tared");
    driver.start_streaming().context("streaming failed")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse(std::env::args().skip(1))?;

    if args.list_ports {
        for port in list_ports() {
            match port.product {
                Some(product) => println!("{}\t{}", port.name, product),
                None => println!("{}", port.name),
            }
        }
        return Ok(());
    }

    let config = load_config(&args)?;
    let driver = Arc::new(start_driver(config, args.demo)?);

    let mut session = tokio::task::spawn_blocking({
        let driver = Arc::clone(&driver);
        move || run_session(&driver)
    });

    let result = tokio::select! {
        joined = &mut session => joined?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, stopping stream");
            if !driver.stop_streaming() {
                warn!("no stream running");
            }
            session.await?
        }
    };

    driver.shutdown();

    let readings = result?;
    println!("{}", serde_json::to_string_pretty(&readings)?);
    Ok(())
}
