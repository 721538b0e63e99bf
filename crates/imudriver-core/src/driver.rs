//! Caller-facing driver services
//!
//! Every service call is a synchronous submit-then-wait from the caller's
//! side. The caller never touches the link; it only sees its own response,
//! a timeout, or an explicit failure.

use serde::{Deserialize, Serialize};
use std::io;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::addressing::{AddressError, AddressMap, NodeName};
use crate::config::{ConfigError, DriverConfig};
use crate::listeners::{Endpoint, EventSink, ListenerRegistry, LoggingSink};
use crate::protocol::{
    open_link, AwaitError, Correlator, FailureKind, Link, Operation, Outcome, ProtocolError,
    Request, Response, SerialWorker, StateCell, StreamControl, WorkerState,
};

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("no result after {0:?}")]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Failed(FailureKind),

    #[error("request {0} is not pending")]
    UnknownRequest(Uuid),

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to start worker thread: {0}")]
    Spawn(#[from] io::Error),
}

impl From<AwaitError> for DriverError {
    fn from(e: AwaitError) -> Self {
        match e {
            AwaitError::Timeout(waited) => DriverError::Timeout(waited),
            AwaitError::UnknownRequest(id) => DriverError::UnknownRequest(id),
        }
    }
}

/// Relative Euler angles, as fractions of π
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EulerAngles {
    #[serde(rename = "ANGLE_X")]
    pub angle_x: f64,
    #[serde(rename = "ANGLE_Y")]
    pub angle_y: f64,
    #[serde(rename = "ANGLE_Z")]
    pub angle_z: f64,
}

/// Builds a [`Driver`] around a link opener
pub struct DriverBuilder {
    config: DriverConfig,
    sink: Arc<dyn EventSink>,
}

impl DriverBuilder {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            sink: Arc::new(LoggingSink),
        }
    }

    /// Where push notifications go
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Open the configured serial port on the worker thread
    pub fn start_serial(self) -> Result<Driver, DriverError> {
        let settings = self.config.link_settings();
        self.start(move || Ok(Box::new(open_link(&settings)?) as Box<dyn Link>))
    }

    /// Validate the configuration and start the worker with `opener`
    pub fn start<F>(self, opener: F) -> Result<Driver, DriverError>
    where
        F: FnOnce() -> Result<Box<dyn Link>, ProtocolError> + Send + 'static,
    {
        let addresses = self.config.validate()?;
        let correlator = Arc::new(Correlator::new());
        let listeners = Arc::new(ListenerRegistry::new(self.sink));
        let shutdown = CancellationToken::new();
        let (sender, queue) = mpsc::channel();

        let worker = SerialWorker::new(
            self.config.worker_config(),
            queue,
            Arc::clone(&correlator),
            Arc::clone(&listeners),
            shutdown.clone(),
        );
        let state = worker.state();
        let streams = worker.stream_control();
        let handle = worker.spawn(opener)?;

        info!(
            port = %self.config.port_name,
            topology = ?addresses.topology(),
            "IMU driver started"
        );

        Ok(Driver {
            config: self.config,
            addresses,
            sender,
            correlator,
            listeners,
            state,
            streams,
            shutdown,
            worker: Mutex::new(Some(handle)),
        })
    }
}

/// Handle shared by all callers; `Sync`, so it can sit behind an `Arc`
pub struct Driver {
    config: DriverConfig,
    addresses: AddressMap,
    sender: Sender<Request>,
    correlator: Arc<Correlator>,
    listeners: Arc<ListenerRegistry>,
    state: StateCell,
    streams: StreamControl,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Driver {
    pub fn builder(config: DriverConfig) -> DriverBuilder {
        DriverBuilder::new(config)
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn addresses(&self) -> &AddressMap {
        &self.addresses
    }

    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    /// Queue a request and return its id without waiting
    pub fn submit(&self, operation: Operation) -> Uuid {
        let request = Request::new(operation);
        let id = request.id;
        self.correlator.register(id);
        if self.sender.send(request).is_err() {
            // Worker is gone; the caller learns this by timing out
            warn!(%id, "worker not running, request will not be answered");
        }
        id
    }

    /// Wait for the response to `id`
    pub fn await_result(&self, id: Uuid, timeout: Option<Duration>) -> Result<Response, DriverError> {
        Ok(self.correlator.await_result(id, timeout)?)
    }

    /// Submit, wait, and turn failures into errors
    fn execute(&self, operation: Operation, timeout: Duration) -> Result<Vec<crate::SensorFrame>, DriverError> {
        let id = self.submit(operation);
        let response = self.await_result(id, Some(timeout))?;
        match response.outcome {
            Outcome::Success { readings, .. } => Ok(readings),
            Outcome::Failure(kind) => Err(DriverError::Failed(kind)),
        }
    }

    pub fn calibrate(&self) -> Result<(), DriverError> {
        let target = self.addresses.primary();
        self.execute(Operation::Calibrate { target }, self.config.request_timeout())?;
        Ok(())
    }

    /// Movement of the primary node since the previous query
    pub fn get_euler_angles(&self) -> Result<EulerAngles, DriverError> {
        self.get_euler_angles_of(self.addresses.topology().primary())
    }

    pub fn get_euler_angles_of(&self, node: NodeName) -> Result<EulerAngles, DriverError> {
        let target = self.addresses.resolve(node)?;
        let readings = self.execute(
            Operation::GetEulerAngles { target },
            self.config.request_timeout(),
        )?;
        let delta = readings.first().copied().unwrap_or_default();
        Ok(EulerAngles {
            angle_x: delta.x,
            angle_y: delta.y,
            angle_z: delta.z,
        })
    }

    /// Tare every configured node
    pub fn tare(&self) -> Result<(), DriverError> {
        let targets = self.addresses.tare_targets();
        self.execute(Operation::Tare { targets }, self.config.request_timeout())?;
        Ok(())
    }

    /// Run one streaming session; returns the last cycle's readings
    pub fn start_streaming(&self) -> Result<Vec<crate::SensorFrame>, DriverError> {
        let operation = Operation::StartStreaming {
            chain: self.addresses.chain(),
            cycles: self.config.stream_cycles,
        };
        self.execute(operation, self.config.stream_timeout())
    }

    /// Cut the running streaming session short. Returns false when none runs.
    pub fn stop_streaming(&self) -> bool {
        self.streams.stop()
    }

    /// Dispatch by middleware service name
    pub fn call(&self, service: &str) -> Result<Response, DriverError> {
        let (operation, timeout) = match service {
            "getEulerAngles" => (
                Operation::GetEulerAngles {
                    target: self.addresses.primary(),
                },
                self.config.request_timeout(),
            ),
            "calibrate" => (
                Operation::Calibrate {
                    target: self.addresses.primary(),
                },
                self.config.request_timeout(),
            ),
            "tare" => (
                Operation::Tare {
                    targets: self.addresses.tare_targets(),
                },
                self.config.request_timeout(),
            ),
            "startStreaming" => (
                Operation::StartStreaming {
                    chain: self.addresses.chain(),
                    cycles: self.config.stream_cycles,
                },
                self.config.stream_timeout(),
            ),
            other => (
                Operation::Unsupported {
                    service: other.to_string(),
                },
                self.config.request_timeout(),
            ),
        };
        let id = self.submit(operation);
        self.await_result(id, Some(timeout))
    }

    pub fn register_listener(&self, endpoint: Endpoint, device: impl Into<String>) -> bool {
        self.listeners.register_listener(endpoint, device)
    }

    pub fn unregister_listener(&self, endpoint: &Endpoint) -> bool {
        self.listeners.unregister_listener(endpoint)
    }

    /// Stop the worker and wait for its thread to exit
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("serial worker panicked");
            }
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.shutdown();
    }
}
