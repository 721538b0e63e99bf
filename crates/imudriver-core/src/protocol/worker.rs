//! Serial protocol worker
//!
//! One thread owns the link for its whole life and services queued requests
//! strictly one at a time: the firmware has no request tagging, so a second
//! command on the wire before the first one's answer would corrupt both.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    decode_frame, orientation_delta, Command, Correlator, Delivery, FailureKind, FrameLayout,
    LineReader, Link, Opcode, Operation, Outcome, ProtocolError, Request, Response, SensorFrame,
    DEFAULT_READ_TIMEOUT_MS,
};
use crate::addressing::NodeAddress;
use crate::listeners::{ListenerRegistry, Notification, MOVE_EVENT_KEY, STREAM_EVENT_KEY};
use crate::DRIVER_NAME;

/// Lifecycle of the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    /// Not started, or shut down cleanly
    Stopped,
    /// Opening the link
    Opening,
    /// Servicing requests
    Running,
    /// Link failure; no further requests will be answered
    Faulted,
}

/// Shared view of the worker's state
#[derive(Debug, Clone)]
pub struct StateCell(Arc<Mutex<WorkerState>>);

impl Default for StateCell {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(WorkerState::Stopped)))
    }
}

impl StateCell {
    pub fn get(&self) -> WorkerState {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, state: WorkerState) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

/// What happens to the in-flight request when shutdown is requested
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Stop retrying reads at once and fail the request as cancelled
    #[default]
    Abandon,
    /// Let the request run to completion, then stop
    Finish,
}

/// How a streaming session reads the sensors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMode {
    /// Query every node of the chain once per cycle
    #[default]
    Polled,
    /// Put the only node of a single-node chain in free-running mode and
    /// read its frames
    Continuous,
}

/// Worker tuning
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub frame_layout: FrameLayout,
    /// Upper bound on one write/read-until-decoded exchange
    pub exchange_timeout: Option<Duration>,
    /// How often the idle loop checks for shutdown
    pub queue_poll: Duration,
    /// Read timeout applied to the link once it is open
    pub read_timeout: Duration,
    pub stream_mode: StreamMode,
    pub shutdown_policy: ShutdownPolicy,
    /// Squared movement above which a move event is fired
    pub move_threshold: f64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            frame_layout: FrameLayout::Plain,
            exchange_timeout: None,
            queue_poll: Duration::from_millis(50),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            stream_mode: StreamMode::Polled,
            shutdown_policy: ShutdownPolicy::Abandon,
            move_threshold: 0.1,
        }
    }
}

/// Cancels the streaming session in progress, if any
#[derive(Debug, Clone, Default)]
pub struct StreamControl(Arc<Mutex<Option<CancellationToken>>>);

impl StreamControl {
    /// Ask a running stream to stop after its current exchange.
    /// Returns false when no stream is active.
    pub fn stop(&self) -> bool {
        match self.0.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn begin(&self, parent: &CancellationToken) -> CancellationToken {
        let token = parent.child_token();
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        token
    }

    fn end(&self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

/// A decoded answer and how many malformed lines preceded it
#[derive(Debug, Clone, Copy, PartialEq)]
struct Exchange {
    frame: SensorFrame,
    retries: u32,
}

#[derive(Debug)]
enum ExchangeError {
    Cancelled,
    NoValidFrame { retries: u32 },
    Transport(ProtocolError),
}

impl From<ProtocolError> for ExchangeError {
    fn from(e: ProtocolError) -> Self {
        ExchangeError::Transport(e)
    }
}

impl From<io::Error> for ExchangeError {
    fn from(e: io::Error) -> Self {
        ExchangeError::Transport(e.into())
    }
}

/// The open link plus its line buffer
struct LinkSession {
    link: Box<dyn Link>,
    reader: LineReader,
    layout: FrameLayout,
    exchange_timeout: Option<Duration>,
}

impl LinkSession {
    /// Write one command and read until a line decodes
    fn exchange(
        &mut self,
        address: &str,
        opcode: Opcode,
        cancel: &CancellationToken,
    ) -> Result<Exchange, ExchangeError> {
        self.send(address, opcode)?;
        self.read_frame(cancel)
    }

    fn send(&mut self, address: &str, opcode: Opcode) -> Result<(), ExchangeError> {
        let command = Command::new(address, opcode);
        debug!(%command, "write");
        self.link.write_all(&command.to_bytes())?;
        self.link.flush()?;
        Ok(())
    }

    /// Read lines until one decodes, checking `cancel` between attempts
    fn read_frame(&mut self, cancel: &CancellationToken) -> Result<Exchange, ExchangeError> {
        let deadline = self.exchange_timeout.map(|t| Instant::now() + t);
        let mut retries = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(ExchangeError::Cancelled);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(ExchangeError::NoValidFrame { retries });
            }

            let Some(line) = self.reader.read_line(self.link.as_mut())? else {
                continue;
            };
            match decode_frame(&line, self.layout) {
                Ok(frame) => {
                    debug!(%line, retries, "frame");
                    return Ok(Exchange { frame, retries });
                }
                Err(e) => {
                    retries += 1;
                    debug!(%line, error = %e, "discarding malformed line");
                }
            }
        }
    }
}

/// The single owner of the serial link
pub struct SerialWorker {
    config: WorkerConfig,
    queue: Receiver<Request>,
    correlator: Arc<Correlator>,
    listeners: Arc<ListenerRegistry>,
    state: StateCell,
    shutdown: CancellationToken,
    streams: StreamControl,
    /// Token handed to exchanges; never fires under `ShutdownPolicy::Finish`
    exchange_cancel: CancellationToken,
    /// Last frame seen per wire address, reference for movement deltas
    last_frames: HashMap<String, SensorFrame>,
}

impl SerialWorker {
    pub fn new(
        config: WorkerConfig,
        queue: Receiver<Request>,
        correlator: Arc<Correlator>,
        listeners: Arc<ListenerRegistry>,
        shutdown: CancellationToken,
    ) -> Self {
        let exchange_cancel = match config.shutdown_policy {
            ShutdownPolicy::Abandon => shutdown.clone(),
            ShutdownPolicy::Finish => CancellationToken::new(),
        };
        Self {
            config,
            queue,
            correlator,
            listeners,
            state: StateCell::default(),
            shutdown,
            streams: StreamControl::default(),
            exchange_cancel,
            last_frames: HashMap::new(),
        }
    }

    pub fn state(&self) -> StateCell {
        self.state.clone()
    }

    pub fn stream_control(&self) -> StreamControl {
        self.streams.clone()
    }

    /// Run the worker on its own named thread
    pub fn spawn<F>(self, opener: F) -> io::Result<JoinHandle<()>>
    where
        F: FnOnce() -> Result<Box<dyn Link>, ProtocolError> + Send + 'static,
    {
        thread::Builder::new()
            .name("imu-serial-worker".to_string())
            .spawn(move || self.run(opener))
    }

    /// Open the link, then service requests until shutdown, queue closure or
    /// a transport fault.
    pub fn run<F>(mut self, opener: F)
    where
        F: FnOnce() -> Result<Box<dyn Link>, ProtocolError>,
    {
        self.state.set(WorkerState::Opening);
        let mut link = match opener() {
            Ok(link) => link,
            Err(e) => {
                error!(error = %e, "failed to open sensor link");
                self.state.set(WorkerState::Faulted);
                return;
            }
        };
        if let Err(e) = link.set_timeout(self.config.read_timeout) {
            error!(error = %e, "failed to set link read timeout");
            self.state.set(WorkerState::Faulted);
            return;
        }

        let mut session = LinkSession {
            link,
            reader: LineReader::new(),
            layout: self.config.frame_layout,
            exchange_timeout: self.config.exchange_timeout,
        };
        self.state.set(WorkerState::Running);
        info!("serial worker running");

        loop {
            if self.shutdown.is_cancelled() {
                info!("shutdown requested");
                break;
            }

            let request = match self.queue.recv_timeout(self.config.queue_poll) {
                Ok(request) => request,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    info!("request queue closed");
                    break;
                }
            };

            if let Err(e) = self.service(&mut session, request) {
                error!(error = %e, "sensor link failed, worker faulted");
                self.state.set(WorkerState::Faulted);
                return;
            }
        }

        self.state.set(WorkerState::Stopped);
        info!("serial worker stopped");
    }

    /// Execute one request and publish its response.
    ///
    /// Only transport errors escape; the request they interrupted stays
    /// unanswered and its caller times out.
    fn service(&mut self, session: &mut LinkSession, request: Request) -> Result<(), ProtocolError> {
        let Request { id, operation } = request;
        debug!(%id, service = operation.service_name(), "servicing request");

        let outcome = match self.execute(session, &operation) {
            Ok(outcome) => outcome,
            Err(ExchangeError::Transport(e)) => return Err(e),
            Err(ExchangeError::Cancelled) => {
                info!(%id, "request abandoned on shutdown");
                Outcome::Failure(FailureKind::Cancelled)
            }
            Err(ExchangeError::NoValidFrame { retries }) => {
                warn!(%id, retries, "no valid frame before exchange deadline");
                Outcome::Failure(FailureKind::NoValidFrame)
            }
        };

        match self.correlator.publish(id, Response::new(id, outcome)) {
            Ok(Delivery::Stored) => debug!(%id, "result published"),
            Ok(Delivery::Discarded) => debug!(%id, "result discarded, caller gone"),
            Err(e) => warn!(error = %e, "duplicate result"),
        }
        Ok(())
    }

    fn execute(
        &mut self,
        session: &mut LinkSession,
        operation: &Operation,
    ) -> Result<Outcome, ExchangeError> {
        let cancel = self.exchange_cancel.clone();
        match operation {
            Operation::GetEulerAngles { target } => {
                let exchange = session.exchange(&target.address, Opcode::Query, &cancel)?;
                let delta = self.movement(&target.address, exchange.frame);
                Ok(Outcome::Success {
                    readings: vec![delta],
                    decode_retries: exchange.retries,
                })
            }
            Operation::Calibrate { target } => {
                let exchange = session.exchange(&target.address, Opcode::Calibrate, &cancel)?;
                info!(node = %target.node, "calibration acknowledged");
                Ok(Outcome::Success {
                    readings: vec![],
                    decode_retries: exchange.retries,
                })
            }
            Operation::Tare { targets } => {
                let mut retries = 0;
                for target in targets {
                    let exchange = session.exchange(&target.address, Opcode::Tare, &cancel)?;
                    retries += exchange.retries;
                    // A tared sensor reads zero; forget the old reference
                    self.last_frames.remove(&target.address);
                    debug!(node = %target.node, "tare acknowledged");
                }
                Ok(Outcome::Success {
                    readings: vec![],
                    decode_retries: retries,
                })
            }
            Operation::StartStreaming { chain, cycles } => {
                let stop = self.streams.begin(&self.exchange_cancel);
                let result = match self.config.stream_mode {
                    StreamMode::Polled => self.stream_polled(session, chain, *cycles, &stop),
                    StreamMode::Continuous => {
                        self.stream_continuous(session, chain, *cycles, &stop)
                    }
                };
                self.streams.end();
                result
            }
            Operation::Unsupported { service } => {
                warn!(%service, "unsupported operation");
                Ok(Outcome::Failure(FailureKind::UnsupportedOperation(
                    service.clone(),
                )))
            }
        }
    }

    /// Delta against the last frame of `address`, which becomes the new
    /// reference. Fires a move event past the threshold.
    fn movement(&mut self, address: &str, frame: SensorFrame) -> SensorFrame {
        let reference = self
            .last_frames
            .insert(address.to_string(), frame)
            .unwrap_or_default();
        let delta = orientation_delta(frame, reference);

        if delta.sqr_magnitude() > self.config.move_threshold {
            let notification = Notification::new(MOVE_EVENT_KEY, DRIVER_NAME)
                .with_parameter("dx", delta.x)
                .with_parameter("dy", delta.y)
                .with_parameter("dz", delta.z);
            self.listeners.notify(&notification);
        }
        delta
    }

    fn stream_polled(
        &mut self,
        session: &mut LinkSession,
        chain: &[NodeAddress],
        cycles: u32,
        stop: &CancellationToken,
    ) -> Result<Outcome, ExchangeError> {
        let cancel = self.exchange_cancel.clone();
        let mut readings = Vec::new();
        let mut retries = 0;
        let mut completed = 0;

        // A stop request takes effect between exchanges so no answer is
        // left unread on the line
        'cycles: while completed < cycles {
            let mut frames = Vec::with_capacity(chain.len());
            for target in chain {
                if stop.is_cancelled() {
                    if cancel.is_cancelled() {
                        return Err(ExchangeError::Cancelled);
                    }
                    break 'cycles;
                }
                let exchange = session.exchange(&target.address, Opcode::Query, &cancel)?;
                retries += exchange.retries;
                frames.push(exchange.frame);
            }

            readings = if frames.len() >= 2 {
                frames
                    .windows(2)
                    .map(|pair| orientation_delta(pair[0], pair[1]))
                    .collect()
            } else {
                frames
                    .iter()
                    .zip(chain)
                    .map(|(frame, target)| self.movement(&target.address, *frame))
                    .collect()
            };
            completed += 1;
            self.emit_sample(completed, chain, &readings);
        }

        info!(completed, cycles, "streaming finished");
        Ok(Outcome::Success {
            readings,
            decode_retries: retries,
        })
    }

    fn stream_continuous(
        &mut self,
        session: &mut LinkSession,
        chain: &[NodeAddress],
        cycles: u32,
        stop: &CancellationToken,
    ) -> Result<Outcome, ExchangeError> {
        let Some(target) = chain.first() else {
            return Ok(Outcome::Success {
                readings: vec![],
                decode_retries: 0,
            });
        };

        session.send(&target.address, Opcode::StartContinuous)?;
        let mut readings = Vec::new();
        let mut retries = 0;
        let mut completed = 0;

        while completed < cycles {
            let exchange = match session.read_frame(stop) {
                Ok(exchange) => exchange,
                Err(ExchangeError::Cancelled) if !self.exchange_cancel.is_cancelled() => break,
                Err(e) => return Err(e),
            };
            retries += exchange.retries;
            readings = vec![self.movement(&target.address, exchange.frame)];
            completed += 1;
            self.emit_sample(completed, std::slice::from_ref(target), &readings);
        }

        // Any command takes the device out of free-running mode. Drop the
        // backlog, then consume the query's answer so the next request
        // starts on a quiet line.
        session.reader.clear();
        session.link.clear_input_buffer()?;
        let cancel = self.exchange_cancel.clone();
        session.exchange(&target.address, Opcode::Query, &cancel)?;

        info!(completed, cycles, "continuous streaming finished");
        Ok(Outcome::Success {
            readings,
            decode_retries: retries,
        })
    }

    /// Log one cycle and push it to listeners
    fn emit_sample(&self, cycle: u32, chain: &[NodeAddress], readings: &[SensorFrame]) {
        let mut notification = Notification::new(STREAM_EVENT_KEY, DRIVER_NAME)
            .with_parameter("cycle", f64::from(cycle));

        for (i, reading) in readings.iter().enumerate() {
            let label = match (chain.get(i), chain.get(i + 1)) {
                (Some(a), Some(b)) if readings.len() + 1 == chain.len() => {
                    format!("{}_{}", a.node, b.node)
                }
                (Some(a), _) => a.node.to_string(),
                _ => format!("reading{}", i),
            };
            info!(cycle, joint = %label, x = reading.x, y = reading.y, z = reading.z, "stream sample");
            notification = notification
                .with_parameter(format!("{}_x", label), reading.x)
                .with_parameter(format!("{}_y", label), reading.y)
                .with_parameter(format!("{}_z", label), reading.z);
        }
        self.listeners.notify(&notification);
    }
}
