//! Requests queued for the worker and the responses it publishes

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::SensorFrame;
use crate::addressing::NodeAddress;

/// What the worker should do on the wire
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Query one node and report its movement since the previous query
    GetEulerAngles { target: NodeAddress },

    /// Start gyroscope calibration on one node
    Calibrate { target: NodeAddress },

    /// Tare every listed node; done only when all of them acknowledged
    Tare { targets: Vec<NodeAddress> },

    /// Poll the node chain for a bounded number of cycles
    StartStreaming { chain: Vec<NodeAddress>, cycles: u32 },

    /// A service name the driver does not implement
    Unsupported { service: String },
}

impl Operation {
    /// Service name as exposed to middleware callers
    pub fn service_name(&self) -> &str {
        match self {
            Operation::GetEulerAngles { .. } => "getEulerAngles",
            Operation::Calibrate { .. } => "calibrate",
            Operation::Tare { .. } => "tare",
            Operation::StartStreaming { .. } => "startStreaming",
            Operation::Unsupported { service } => service,
        }
    }
}

/// A queued request. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: Uuid,
    pub operation: Operation,
}

impl Request {
    pub fn new(operation: Operation) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation,
        }
    }
}

/// Why a request completed without a payload
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("request cancelled by shutdown")]
    Cancelled,

    #[error("no valid frame before the exchange deadline")]
    NoValidFrame,
}

/// Result of a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    Success {
        /// Zero or more readings, meaning depends on the operation
        readings: Vec<SensorFrame>,
        /// Malformed lines discarded while servicing the request
        decode_retries: u32,
    },
    Failure(FailureKind),
}

/// The worker's answer to one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub request_id: Uuid,
    pub outcome: Outcome,
}

impl Response {
    pub fn new(request_id: Uuid, outcome: Outcome) -> Self {
        Self {
            request_id,
            outcome,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }

    /// Readings of a successful response, empty for failures
    pub fn readings(&self) -> &[SensorFrame] {
        match &self.outcome {
            Outcome::Success { readings, .. } => readings,
            Outcome::Failure(_) => &[],
        }
    }
}
