use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;

use super::{ProtocolError, MAX_LINE_LENGTH};

/// Byte-stream link to the sensor chain.
///
/// A read that times out must return `ErrorKind::TimedOut` (or `WouldBlock`);
/// `Ok(0)` means the link is gone.
pub trait Link: Read + Write + Send {
    /// Set timeout for read/write operations
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Discard anything the device sent that was not read yet
    fn clear_input_buffer(&mut self) -> io::Result<()>;
}

/// Serial port wrapper implementing [`Link`]
pub struct SerialLink {
    port: Box<dyn SerialPort>,
}

impl SerialLink {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl Link for SerialLink {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port
            .set_timeout(timeout)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

/// Splits the inbound byte stream into lines.
///
/// Partial data is kept between calls, so a line may arrive over several
/// reads. A line longer than [`MAX_LINE_LENGTH`] is cut and returned as is;
/// it will fail decoding like any other noise.
#[derive(Debug, Default)]
pub struct LineReader {
    pending: Vec<u8>,
}

impl LineReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read until a complete line is buffered.
    ///
    /// Returns `Ok(None)` when the link timed out before a newline arrived.
    pub fn read_line<L: Link + ?Sized>(
        &mut self,
        link: &mut L,
    ) -> Result<Option<String>, ProtocolError> {
        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }

            let mut buf = [0u8; 64];
            match link.read(&mut buf) {
                Ok(0) => return Err(ProtocolError::Disconnected),
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::WouldBlock =>
                {
                    return Ok(None)
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Drop buffered partial data
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    fn take_line(&mut self) -> Option<String> {
        let end = match self.pending.iter().position(|&b| b == b'\n') {
            Some(pos) => pos + 1,
            None if self.pending.len() >= MAX_LINE_LENGTH => MAX_LINE_LENGTH,
            None => return None,
        };
        let raw: Vec<u8> = self.pending.drain(..end).collect();
        let line = String::from_utf8_lossy(&raw);
        Some(line.trim_end_matches(['\r', '\n']).to_string())
    }
}
