//! Serial port handling
//!
//! Opens the IMU dongle at the fixed 8N1 line configuration.

use serialport::{DataBits, FlowControl, Parity, SerialPortInfo, SerialPortType, StopBits};
use std::time::Duration;
use tracing::{debug, info};

use super::{Link, ProtocolError, SerialLink, DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT_MS};

/// Line parameters for the sensor link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    /// Port name (e.g., "/dev/ttyACM0" or "COM3")
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// How long a single read may block
    pub read_timeout: Duration,
}

impl LinkSettings {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
        }
    }
}

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name
    pub name: String,
    /// Product name (if available)
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let product = match info.port_type {
            SerialPortType::UsbPort(usb_info) => usb_info.product,
            _ => None,
        };
        Self {
            name: info.port_name,
            product,
        }
    }
}

/// List the serial ports the OS reports, sorted by name
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: Vec<PortInfo> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(PortInfo::from)
        .collect();
    ports.sort_by(|a, b| a.name.cmp(&b.name));
    ports
}

/// Open and configure the sensor link (8 data bits, 1 stop bit, no parity)
pub fn open_link(settings: &LinkSettings) -> Result<SerialLink, ProtocolError> {
    debug!(
        port = %settings.port_name,
        baud = settings.baud_rate,
        "opening serial link"
    );
    let port = serialport::new(&settings.port_name, settings.baud_rate)
        .data_bits(DataBits::Eight)
        .stop_bits(StopBits::One)
        .parity(Parity::None)
        .flow_control(FlowControl::None)
        .timeout(settings.read_timeout)
        .open()?;

    let mut link = SerialLink::new(port);
    link.clear_input_buffer()?;
    info!(port = %settings.port_name, "serial link open");
    Ok(link)
}
