//! Scripted fake sensor link shared by the integration tests

#![allow(dead_code)]

use imudriver_core::driver::{Driver, DriverBuilder, DriverError};
use imudriver_core::listeners::{EventSink, Notification, NotifyError};
use imudriver_core::prelude::*;
use imudriver_core::protocol::{Command, ProtocolError};
use std::collections::VecDeque;
use std::f64::consts::PI;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Maps each command the worker writes to the lines the device answers with
pub type Responder = Box<dyn FnMut(&Command) -> Vec<String> + Send>;

struct FakeState {
    responder: Responder,
    /// Every command written, without the newline
    written: Vec<String>,
    inbound: Vec<u8>,
    /// Lines and the instant they become readable
    outbound: VecDeque<(Instant, Vec<u8>)>,
    reply_delay: Duration,
    fail_writes: bool,
    disconnected: bool,
    /// Last timeout the worker applied
    read_timeout: Option<Duration>,
}

/// Test-side handle of a fake device. Clones share the same device.
#[derive(Clone)]
pub struct FakeDevice {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDevice {
    pub fn new<F>(responder: F) -> Self
    where
        F: FnMut(&Command) -> Vec<String> + Send + 'static,
    {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                responder: Box::new(responder),
                written: Vec::new(),
                inbound: Vec::new(),
                outbound: VecDeque::new(),
                reply_delay: Duration::ZERO,
                fail_writes: false,
                disconnected: false,
                read_timeout: None,
            })),
        }
    }

    /// Answers every command with the same frame
    pub fn constant(line: &str) -> Self {
        let line = line.to_string();
        Self::new(move |_| vec![line.clone()])
    }

    /// Never answers
    pub fn silent() -> Self {
        Self::new(|_| vec![])
    }

    pub fn with_reply_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().reply_delay = delay;
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().written.clone()
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.state.lock().unwrap().read_timeout
    }

    pub fn fail_writes(&self) {
        self.state.lock().unwrap().fail_writes = true;
    }

    pub fn disconnect(&self) {
        self.state.lock().unwrap().disconnected = true;
    }

    pub fn link(&self) -> FakeLink {
        FakeLink {
            state: Arc::clone(&self.state),
        }
    }

    /// Start a driver over this device
    pub fn start(&self, config: DriverConfig) -> Driver {
        self.start_builder(Driver::builder(config))
    }

    pub fn start_with_sink(&self, config: DriverConfig, sink: Arc<dyn EventSink>) -> Driver {
        self.start_builder(Driver::builder(config).event_sink(sink))
    }

    fn start_builder(&self, builder: DriverBuilder) -> Driver {
        let link = self.link();
        builder
            .start(move || Ok(Box::new(link) as Box<dyn Link>))
            .unwrap()
    }
}

/// The worker-side end of a [`FakeDevice`]
pub struct FakeLink {
    state: Arc<Mutex<FakeState>>,
}

impl Read for FakeLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        {
            let mut state = self.state.lock().unwrap();
            if state.disconnected {
                return Ok(0);
            }
            let ready = state
                .outbound
                .front()
                .is_some_and(|(at, _)| *at <= Instant::now());
            if ready {
                let (at, mut line) = state.outbound.pop_front().unwrap();
                let n = buf.len().min(line.len());
                buf[..n].copy_from_slice(&line[..n]);
                if n < line.len() {
                    line.drain(..n);
                    state.outbound.push_front((at, line));
                }
                return Ok(n);
            }
        }
        thread::sleep(Duration::from_millis(2));
        Err(io::ErrorKind::TimedOut.into())
    }
}

impl Write for FakeLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        state.inbound.extend_from_slice(buf);
        while let Some(pos) = state.inbound.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = state.inbound.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&raw).trim_end().to_string();
            state.written.push(text.clone());
            if let Some(command) = Command::parse(&text) {
                let at = Instant::now() + state.reply_delay;
                let lines = (state.responder)(&command);
                for line in lines {
                    state.outbound.push_back((at, format!("{}\r\n", line).into_bytes()));
                }
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Link for FakeLink {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.state.lock().unwrap().read_timeout = Some(timeout);
        Ok(())
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.state.lock().unwrap().outbound.clear();
        Ok(())
    }
}

/// Collects every delivered notification
#[derive(Default)]
pub struct RecordingSink {
    pub delivered: Mutex<Vec<(Notification, String)>>,
}

impl RecordingSink {
    pub fn events(&self, event: &str) -> Vec<Notification> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n.event == event)
            .map(|(n, _)| n.clone())
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn deliver(&self, notification: &Notification, device: &str) -> Result<(), NotifyError> {
        self.delivered
            .lock()
            .unwrap()
            .push((notification.clone(), device.to_string()));
        Ok(())
    }
}

/// A frame line whose decoded angles are `(x, y, z)` fractions of π
pub fn frame_line(x: f64, y: f64, z: f64) -> String {
    format!("{:.9},{:.9},{:.9}", x * PI, y * PI, z * PI)
}

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

/// Short timeouts so failing tests fail fast
pub fn test_config() -> DriverConfig {
    let mut config = DriverConfig::new("fake0");
    config.request_timeout_ms = 2000;
    config.stream_timeout_ms = 5000;
    config
}

pub fn three_node_config() -> DriverConfig {
    let mut config = test_config();
    config.topology = Topology::ThreeNode;
    config
}

pub fn wait_for_state(driver: &Driver, state: WorkerState) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if driver.state() == state {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("imudriver_core=debug")
        .try_init();
}

pub fn open_error() -> Result<Box<dyn Link>, ProtocolError> {
    Err(ProtocolError::PortNotFound("fake0".to_string()))
}

pub fn expect_timeout<T: std::fmt::Debug>(result: Result<T, DriverError>) {
    match result {
        Err(DriverError::Timeout(_)) => {}
        other => panic!("expected timeout, got {:?}", other),
    }
}
