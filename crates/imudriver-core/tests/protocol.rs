use imudriver_core::protocol::{
    decode_frame, encode_command, Command, DecodeError, FrameLayout, LineReader, Link, Opcode,
    ProtocolError,
};
use std::io::{self, Read, Write};
use std::time::Duration;

/// Mock serial port for testing
struct MockSerial {
    send_buffer: Vec<u8>,
    recv_buffer: Vec<u8>,
    recv_idx: usize,
    fail_on_send: bool,
}

impl MockSerial {
    fn new() -> Self {
        Self::with_response(&[])
    }

    fn with_response(response: &[u8]) -> Self {
        Self {
            send_buffer: Vec::new(),
            recv_buffer: response.to_vec(),
            recv_idx: 0,
            fail_on_send: false,
        }
    }
}

impl Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // One byte per read, like a slow UART
        if self.recv_idx < self.recv_buffer.len() && !buf.is_empty() {
            buf[0] = self.recv_buffer[self.recv_idx];
            self.recv_idx += 1;
            Ok(1)
        } else {
            Err(io::ErrorKind::TimedOut.into())
        }
    }
}

impl Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail_on_send {
            return Err(io::Error::new(io::ErrorKind::Other, "Serial write failed"));
        }
        self.send_buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Link for MockSerial {
    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.recv_idx = self.recv_buffer.len();
        Ok(())
    }
}

#[test]
fn test_protocol_error_display() {
    let err = ProtocolError::PortNotFound("/dev/ttyACM0".to_string());
    assert!(err.to_string().contains("/dev/ttyACM0"));
    assert!(!ProtocolError::Disconnected.to_string().is_empty());
}

#[test]
fn test_io_error_converts() {
    let err: ProtocolError = io::Error::new(io::ErrorKind::BrokenPipe, "gone").into();
    assert!(matches!(err, ProtocolError::IoError(_)));
}

#[test]
fn test_command_bytes_on_the_wire() {
    let mut mock = MockSerial::new();
    mock.write_all(&Command::new("0", Opcode::Tare).to_bytes())
        .unwrap();
    mock.write_all(&encode_command("1", Opcode::StartContinuous))
        .unwrap();
    assert_eq!(mock.send_buffer, b">0,96\n>1,85\n".to_vec());
}

#[test]
fn test_serial_write_failure() {
    let mut mock = MockSerial::new();
    mock.fail_on_send = true;
    assert!(mock.write_all(b">0,1\n").is_err());
}

#[test]
fn test_byte_at_a_time_frame() {
    let mut mock = MockSerial::with_response(b"0,1.5707963,-3.1415926\r\n");
    let mut reader = LineReader::new();
    let line = reader.read_line(&mut mock).unwrap().unwrap();
    let frame = decode_frame(&line, FrameLayout::Plain).unwrap();
    assert_eq!(frame.x, 0.0);
    assert!((frame.y - 0.5).abs() < 1e-6);
    assert!((frame.z + 1.0).abs() < 1e-6);
}

#[test]
fn test_noise_then_frame() {
    let mut mock = MockSerial::with_response(b"\xff\xfe\n12,ab,3\n0,0,0\n");
    let mut reader = LineReader::new();

    let first = reader.read_line(&mut mock).unwrap().unwrap();
    assert!(decode_frame(&first, FrameLayout::Plain).is_err());

    let second = reader.read_line(&mut mock).unwrap().unwrap();
    assert_eq!(
        decode_frame(&second, FrameLayout::Plain),
        Err(DecodeError::InvalidNumber {
            field: 1,
            value: "ab".to_string()
        })
    );

    let third = reader.read_line(&mut mock).unwrap().unwrap();
    assert!(decode_frame(&third, FrameLayout::Plain).is_ok());
    assert_eq!(reader.read_line(&mut mock).unwrap(), None);
}

#[test]
fn test_overlong_line_is_cut() {
    let mut long = vec![b'9'; 600];
    long.push(b'\n');
    let mut mock = MockSerial::with_response(&long);
    let mut reader = LineReader::new();
    let line = reader.read_line(&mut mock).unwrap().unwrap();
    assert_eq!(line.len(), imudriver_core::protocol::MAX_LINE_LENGTH);
    assert!(decode_frame(&line, FrameLayout::Plain).is_err());
}
