//! Serial Protocol Communication
//!
//! Implements the IMU dongle's ASCII protocol: `>{address},{opcode}\n` out,
//! comma separated angle lines back. A single worker thread owns the link;
//! callers talk to it through a request queue and the [`Correlator`].

pub mod commands;
mod correlator;
mod error;
mod frame;
mod request;
pub mod serial;
mod stream;
mod worker;

pub use commands::{encode_command, Command, Opcode};
pub use correlator::{AwaitError, Correlator, Delivery, PublishError};
pub use error::ProtocolError;
pub use frame::{decode_frame, orientation_delta, DecodeError, FrameLayout, SensorFrame};
pub use request::{FailureKind, Operation, Outcome, Request, Response};
pub use serial::{list_ports, open_link, LinkSettings, PortInfo};
pub use stream::{LineReader, Link, SerialLink};
pub use worker::{
    SerialWorker, ShutdownPolicy, StateCell, StreamControl, StreamMode, WorkerConfig, WorkerState,
};

/// Baud rate of the IMU dongle
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Serial read timeout; bounds how long the worker blocks between
/// cancellation checks
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

/// How long a caller waits for its result by default
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

/// Lines longer than this are cut and treated as noise
pub const MAX_LINE_LENGTH: usize = 256;
