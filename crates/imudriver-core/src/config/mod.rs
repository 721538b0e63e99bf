//! Driver configuration
//!
//! Settings come either from a JSON file or from the middleware's
//! `.properties` file, where every key lives under `ubihealth.imodriver.`.
//! Only the serial port is required.

mod properties;

pub use properties::Properties;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::addressing::{AddressError, AddressMap, Topology};
use crate::protocol::{
    FrameLayout, LinkSettings, ShutdownPolicy, StreamMode, WorkerConfig, DEFAULT_BAUD_RATE,
    DEFAULT_READ_TIMEOUT_MS, DEFAULT_REQUEST_TIMEOUT_MS,
};

/// Prefix of every driver key in a properties file
pub const PROPERTY_PREFIX: &str = "ubihealth.imodriver.";

/// Key holding the serial port name
pub const SERIAL_PORT_PROP_KEY: &str = "ubihealth.imodriver.serialport";

/// Prefix of per-node address overrides, e.g. `ubihealth.imodriver.node.trunk=2`
pub const NODE_PROP_PREFIX: &str = "ubihealth.imodriver.node.";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no serial port configured")]
    MissingPortName,

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error("config file error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON config error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Complete driver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Serial port name (required)
    pub port_name: String,

    /// Line speed. The dongle runs at 115200; other values only suit bench
    /// adapters, so the properties file cannot change it.
    pub baud_rate: u32,

    /// Which sensors are connected
    pub topology: Topology,

    /// Node name → wire address overrides
    pub addresses: BTreeMap<String, String>,

    /// How long a caller waits for a result
    pub request_timeout_ms: u64,

    /// How long a caller waits for a whole streaming session
    pub stream_timeout_ms: u64,

    /// Optional bound on one command's read-until-decoded loop
    pub exchange_timeout_ms: Option<u64>,

    /// Serial read timeout
    pub read_timeout_ms: u64,

    /// Cycles per streaming session
    pub stream_cycles: u32,

    pub stream_mode: StreamMode,

    pub frame_layout: FrameLayout,

    pub shutdown_policy: ShutdownPolicy,

    /// Squared movement that triggers a move event
    pub move_threshold: f64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            topology: Topology::SingleNode,
            addresses: BTreeMap::new(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            stream_timeout_ms: 120_000,
            exchange_timeout_ms: None,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            stream_cycles: 100,
            stream_mode: StreamMode::Polled,
            frame_layout: FrameLayout::Plain,
            shutdown_policy: ShutdownPolicy::Abandon,
            move_threshold: 0.1,
        }
    }
}

impl DriverConfig {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }

    /// Load from `.json` or `.properties`, chosen by extension
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_file(path),
            _ => Self::from_properties(&Properties::load(path)?),
        }
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Build from middleware properties; unknown keys are ignored
    pub fn from_properties(props: &Properties) -> Result<Self, ConfigError> {
        let mut config = Self {
            port_name: props.get(SERIAL_PORT_PROP_KEY).unwrap_or_default().trim().to_string(),
            ..Self::default()
        };

        if let Some(v) = parsed(props, "requesttimeout")? {
            config.request_timeout_ms = v;
        }
        if let Some(v) = parsed(props, "streamtimeout")? {
            config.stream_timeout_ms = v;
        }
        if let Some(v) = parsed(props, "exchangetimeout")? {
            config.exchange_timeout_ms = Some(v);
        }
        if let Some(v) = parsed(props, "readtimeout")? {
            config.read_timeout_ms = v;
        }
        if let Some(v) = parsed(props, "streamcycles")? {
            config.stream_cycles = v;
        }
        if let Some(v) = parsed(props, "movethreshold")? {
            config.move_threshold = v;
        }
        if let Some(v) = enum_value(props, "topology")? {
            config.topology = v;
        }
        if let Some(v) = enum_value(props, "streammode")? {
            config.stream_mode = v;
        }
        if let Some(v) = enum_value(props, "framelayout")? {
            config.frame_layout = v;
        }
        if let Some(v) = enum_value(props, "shutdownpolicy")? {
            config.shutdown_policy = v;
        }

        config.addresses = props
            .with_prefix(NODE_PROP_PREFIX)
            .map(|(node, address)| (node.to_string(), address.trim().to_string()))
            .collect();

        Ok(config)
    }

    /// Check everything that would otherwise fail later, and resolve the
    /// node address table
    pub fn validate(&self) -> Result<AddressMap, ConfigError> {
        if self.port_name.trim().is_empty() {
            return Err(ConfigError::MissingPortName);
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::InvalidValue {
                key: "baud_rate".to_string(),
                value: "0".to_string(),
            });
        }
        if self.stream_mode == StreamMode::Continuous && self.topology != Topology::SingleNode {
            return Err(ConfigError::InvalidValue {
                key: "stream_mode".to_string(),
                value: "continuous".to_string(),
            });
        }
        Ok(AddressMap::new(self.topology, &self.addresses)?)
    }

    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            port_name: self.port_name.clone(),
            baud_rate: self.baud_rate,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            frame_layout: self.frame_layout,
            exchange_timeout: self.exchange_timeout_ms.map(Duration::from_millis),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            stream_mode: self.stream_mode,
            shutdown_policy: self.shutdown_policy,
            move_threshold: self.move_threshold,
            ..WorkerConfig::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_timeout_ms)
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: format!("{}{}", PROPERTY_PREFIX, key),
        value: value.to_string(),
    }
}

fn parsed<T: std::str::FromStr>(props: &Properties, key: &str) -> Result<Option<T>, ConfigError> {
    let full = format!("{}{}", PROPERTY_PREFIX, key);
    match props.get_parsed::<T>(&full) {
        None => Ok(None),
        Some(Ok(v)) => Ok(Some(v)),
        Some(Err(_)) => Err(invalid(key, props.get(&full).unwrap_or_default())),
    }
}

/// Enum settings use their serde names, e.g. `three_node`
fn enum_value<T: serde::de::DeserializeOwned>(
    props: &Properties,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    let full = format!("{}{}", PROPERTY_PREFIX, key);
    let Some(raw) = props.get(&full) else {
        return Ok(None);
    };
    serde_json::from_value(serde_json::Value::String(raw.trim().to_string()))
        .map(Some)
        .map_err(|_| invalid(key, raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::NodeName;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = DriverConfig::default();
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.stream_cycles, 100);
        assert_eq!(config.topology, Topology::SingleNode);
        assert!(matches!(config.validate(), Err(ConfigError::MissingPortName)));
    }

    #[test]
    fn test_from_properties() {
        let props = Properties::parse(
            "ubihealth.imodriver.serialport=/dev/ttyACM0\n\
             ubihealth.imodriver.topology=three_node\n\
             ubihealth.imodriver.streamcycles=25\n\
             ubihealth.imodriver.exchangetimeout=750\n\
             ubihealth.imodriver.node.trunk=5\n",
        );
        let config = DriverConfig::from_properties(&props).unwrap();
        assert_eq!(config.port_name, "/dev/ttyACM0");
        assert_eq!(config.topology, Topology::ThreeNode);
        assert_eq!(config.stream_cycles, 25);
        assert_eq!(config.exchange_timeout_ms, Some(750));

        let map = config.validate().unwrap();
        assert_eq!(map.address_of(NodeName::Trunk), Ok("5"));
        assert_eq!(map.address_of(NodeName::Forearm), Ok("1"));
    }

    #[test]
    fn test_line_speed_is_not_a_property() {
        let props = Properties::parse(
            "ubihealth.imodriver.serialport=COM3\nubihealth.imodriver.baudrate=9600\n",
        );
        let config = DriverConfig::from_properties(&props).unwrap();
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.link_settings().baud_rate, 115200);
    }

    #[test]
    fn test_continuous_mode_needs_single_node() {
        let mut config = DriverConfig::new("COM3");
        config.stream_mode = StreamMode::Continuous;
        assert!(config.validate().is_ok());

        config.topology = Topology::ThreeNode;
        match config.validate() {
            Err(ConfigError::InvalidValue { key, value }) => {
                assert_eq!(key, "stream_mode");
                assert_eq!(value, "continuous");
            }
            other => panic!("expected invalid value, got {:?}", other),
        }
    }

    #[test]
    fn test_read_timeout_reaches_worker() {
        let mut config = DriverConfig::new("COM3");
        config.read_timeout_ms = 40;
        assert_eq!(config.worker_config().read_timeout, Duration::from_millis(40));
        assert_eq!(config.link_settings().read_timeout, Duration::from_millis(40));
    }

    #[test]
    fn test_bad_property_value() {
        let props = Properties::parse(
            "ubihealth.imodriver.serialport=COM3\nubihealth.imodriver.topology=octopus\n",
        );
        match DriverConfig::from_properties(&props) {
            Err(ConfigError::InvalidValue { key, value }) => {
                assert_eq!(key, "ubihealth.imodriver.topology");
                assert_eq!(value, "octopus");
            }
            other => panic!("expected invalid value, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_node_is_fatal_at_validation() {
        let mut config = DriverConfig::new("COM3");
        config.addresses.insert("leg".to_string(), "4".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Address(AddressError::UnknownNode(_)))
        ));
    }

    #[test]
    fn test_load_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"port_name": "/dev/ttyUSB0", "topology": "three_node", "frame_layout": "headed"}}"#
        )
        .unwrap();

        let config = DriverConfig::load(file.path()).unwrap();
        assert_eq!(config.port_name, "/dev/ttyUSB0");
        assert_eq!(config.topology, Topology::ThreeNode);
        assert_eq!(config.frame_layout, FrameLayout::Headed);
        assert_eq!(config.request_timeout_ms, DEFAULT_REQUEST_TIMEOUT_MS);
    }

    #[test]
    fn test_load_properties_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".properties")
            .tempfile()
            .unwrap();
        writeln!(file, "{}=/dev/tty.usbmodemfa131", SERIAL_PORT_PROP_KEY).unwrap();

        let config = DriverConfig::load(file.path()).unwrap();
        assert_eq!(config.port_name, "/dev/tty.usbmodemfa131");
        assert!(config.validate().is_ok());
    }
}
