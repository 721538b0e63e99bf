//! Protocol commands
//!
//! Defines the opcodes understood by the IMU firmware and the ASCII command
//! line that carries them: `>{address},{opcode}\n`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix byte that starts every outbound command
pub const COMMAND_PREFIX: char = '>';

/// Separator between address and opcode
pub const COMMAND_SEPARATOR: char = ',';

/// Firmware opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    /// Read the current tared Euler angles once
    Query,

    /// Begin gyroscope auto-calibration
    Calibrate,

    /// Tare the sensor with its current orientation
    Tare,

    /// Start free-running streaming of frames
    StartContinuous,
}

impl Opcode {
    /// Numeric code sent on the wire
    pub fn code(&self) -> u8 {
        match self {
            Opcode::Query => 1,
            Opcode::Calibrate => 165,
            Opcode::Tare => 96,
            Opcode::StartContinuous => 85,
        }
    }

    /// Look up an opcode by its wire code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Opcode::Query),
            165 => Some(Opcode::Calibrate),
            96 => Some(Opcode::Tare),
            85 => Some(Opcode::StartContinuous),
            _ => None,
        }
    }
}

/// Encode a command line for `address`
pub fn encode_command(address: &str, opcode: Opcode) -> Vec<u8> {
    format!(
        "{}{}{}{}\n",
        COMMAND_PREFIX,
        address,
        COMMAND_SEPARATOR,
        opcode.code()
    )
    .into_bytes()
}

/// A single addressed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Wire address of the target node
    pub address: String,
    /// Opcode to execute
    pub opcode: Opcode,
}

impl Command {
    pub fn new(address: impl Into<String>, opcode: Opcode) -> Self {
        Self {
            address: address.into(),
            opcode,
        }
    }

    /// Bytes to transmit, including the trailing newline
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_command(&self.address, self.opcode)
    }

    /// Parse a command line as written by [`Command::to_bytes`].
    ///
    /// Used by device simulators; returns `None` for anything that is not a
    /// well-formed command with a known opcode.
    pub fn parse(line: &str) -> Option<Self> {
        let body = line.trim_end().strip_prefix(COMMAND_PREFIX)?;
        let (address, code) = body.split_once(COMMAND_SEPARATOR)?;
        if address.is_empty() {
            return None;
        }
        let opcode = Opcode::from_code(code.trim().parse().ok()?)?;
        Some(Self::new(address, opcode))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            COMMAND_PREFIX,
            self.address,
            COMMAND_SEPARATOR,
            self.opcode.code()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_table() {
        assert_eq!(Opcode::Query.code(), 1);
        assert_eq!(Opcode::Calibrate.code(), 165);
        assert_eq!(Opcode::Tare.code(), 96);
        assert_eq!(Opcode::StartContinuous.code(), 85);
    }

    #[test]
    fn test_encode_command() {
        assert_eq!(encode_command("0", Opcode::Query), b">0,1\n".to_vec());
        assert_eq!(encode_command("1", Opcode::Calibrate), b">1,165\n".to_vec());
        assert_eq!(Command::new("2", Opcode::Tare).to_bytes(), b">2,96\n".to_vec());
    }

    #[test]
    fn test_parse_command() {
        let cmd = Command::parse(">0,85\n").unwrap();
        assert_eq!(cmd, Command::new("0", Opcode::StartContinuous));
        assert_eq!(cmd.to_string(), ">0,85");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Command::parse("0,1").is_none());
        assert!(Command::parse(">,1").is_none());
        assert!(Command::parse(">0,7").is_none());
        assert!(Command::parse(">0").is_none());
    }
}
