//! # IMU Driver Core Library
//!
//! Serial driver for a chain of inertial measurement units behind a single
//! USB dongle.
//!
//! This library provides:
//! - The dongle's ASCII command and frame format
//! - Node addressing for one- and three-sensor setups
//! - A single worker thread that owns the serial link
//! - Request/response correlation for concurrent callers
//! - Move and stream notifications for registered listeners
//!
//! ## Example
//!
//! ```rust,ignore
//! use imudriver_core::prelude::*;
//!
//! let config = DriverConfig::load("driver.properties")?;
//! let driver = Driver::builder(config).start_serial()?;
//!
//! driver.tare()?;
//! let angles = driver.get_euler_angles()?;
//! println!("moved by ({}, {}, {})", angles.angle_x, angles.angle_y, angles.angle_z);
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod addressing;
pub mod config;
pub mod demo;
pub mod driver;
pub mod listeners;
pub mod protocol;
pub mod vector;

pub use protocol::SensorFrame;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::addressing::{AddressMap, NodeAddress, NodeName, Topology};
    pub use crate::config::{DriverConfig, Properties};
    pub use crate::demo::SimulatedImu;
    pub use crate::driver::{Driver, DriverBuilder, DriverError, EulerAngles};
    pub use crate::listeners::{Endpoint, EventSink, ListenerRegistry, Notification};
    pub use crate::protocol::{
        FailureKind, Link, Operation, Outcome, Response, SensorFrame, WorkerState,
    };
    pub use crate::vector::Vector3;
}

/// Name under which the driver publishes its notifications
pub const DRIVER_NAME: &str = "org.unbiquitous.ubihealth.IMODriver";

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
