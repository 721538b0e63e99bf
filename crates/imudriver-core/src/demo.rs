//! Demo Mode - simulated IMU chain
//!
//! An in-process stand-in for the sensor dongle. It implements [`Link`], so
//! the worker drives it exactly like a serial port: commands go in through
//! `write`, answer lines come back through `read`.
//!
//! Every node holds three angles (radians) that drift by a small random step
//! whenever they are sampled.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use std::f64::consts::PI;
use std::io::{self, Read, Write};
use std::thread;
use std::time::Duration;

use crate::protocol::{Command, FrameLayout, Link, Opcode};
use crate::vector::Vector3;

/// Lines that look like serial noise
const GARBAGE: [&str; 4] = ["", "@@#!", "0.12,", "nan,nan,nan"];

/// Simulated sensor chain answering the dongle protocol
pub struct SimulatedImu {
    /// Current angles per wire address
    nodes: HashMap<String, Vector3>,
    /// Partial command bytes
    inbound: Vec<u8>,
    /// Bytes waiting to be read
    outbound: VecDeque<u8>,
    /// Address in free-running mode, if any
    streaming: Option<String>,
    layout: FrameLayout,
    /// Probability of a noise line before each answer
    garbage_rate: f64,
    /// Largest per-sample change of one angle, radians
    drift: f64,
    /// How long an empty read blocks before timing out
    read_timeout: Duration,
    /// Frames served, used for the headed layout's sequence field
    sequence: u64,
    rng: StdRng,
}

impl SimulatedImu {
    /// A chain answering on `addresses`, all angles at zero
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            nodes: addresses
                .into_iter()
                .map(|a| (a.into(), Vector3::ZERO))
                .collect(),
            inbound: Vec::new(),
            outbound: VecDeque::new(),
            streaming: None,
            layout: FrameLayout::Plain,
            garbage_rate: 0.0,
            drift: 0.05,
            read_timeout: Duration::from_millis(5),
            sequence: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic noise and drift
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_garbage_rate(mut self, rate: f64) -> Self {
        self.garbage_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_drift(mut self, drift: f64) -> Self {
        self.drift = drift.abs();
        self
    }

    pub fn with_layout(mut self, layout: FrameLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Current angles of a node, in radians
    pub fn angles(&self, address: &str) -> Option<Vector3> {
        self.nodes.get(address).copied()
    }

    pub fn set_angles(&mut self, address: &str, angles: Vector3) {
        if let Some(node) = self.nodes.get_mut(address) {
            *node = angles;
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.is_some()
    }

    fn handle(&mut self, command: Command) {
        // Any command ends free-running mode
        self.streaming = None;

        if !self.nodes.contains_key(&command.address) {
            return;
        }
        match command.opcode {
            Opcode::Query | Opcode::Calibrate => self.answer(&command.address),
            Opcode::Tare => {
                self.set_angles(&command.address, Vector3::ZERO);
                self.answer(&command.address);
            }
            Opcode::StartContinuous => self.streaming = Some(command.address),
        }
    }

    /// Sample a node and queue its frame, possibly preceded by noise
    fn answer(&mut self, address: &str) {
        if self.garbage_rate > 0.0 && self.rng.gen_bool(self.garbage_rate) {
            let noise = GARBAGE[self.rng.gen_range(0..GARBAGE.len())];
            self.push_line(noise);
        }

        let drift = self.drift;
        let step = if drift > 0.0 {
            Vector3::new(
                self.rng.gen_range(-drift..=drift),
                self.rng.gen_range(-drift..=drift),
                self.rng.gen_range(-drift..=drift),
            )
        } else {
            Vector3::ZERO
        };
        let Some(angles) = self.nodes.get_mut(address) else {
            return;
        };
        *angles = wrap(*angles + step);
        let angles = *angles;

        self.sequence += 1;
        let line = match self.layout {
            FrameLayout::Plain => format!("{:.6},{:.6},{:.6}", angles.x, angles.y, angles.z),
            FrameLayout::Headed => format!(
                "{},{},0,{:.6},{:.6},{:.6}",
                self.sequence, address, angles.x, angles.y, angles.z
            ),
        };
        self.push_line(&line);
    }

    fn push_line(&mut self, line: &str) {
        self.outbound.extend(line.as_bytes());
        self.outbound.extend(b"\r\n");
    }
}

/// Keep every angle inside (-π, π]
fn wrap(v: Vector3) -> Vector3 {
    let wrap_one = |a: f64| {
        if a > PI {
            a - 2.0 * PI
        } else if a <= -PI {
            a + 2.0 * PI
        } else {
            a
        }
    };
    Vector3::new(wrap_one(v.x), wrap_one(v.y), wrap_one(v.z))
}

impl Read for SimulatedImu {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.outbound.is_empty() {
            if let Some(address) = self.streaming.clone() {
                self.answer(&address);
            }
        }
        if self.outbound.is_empty() {
            thread::sleep(self.read_timeout);
            return Err(io::ErrorKind::TimedOut.into());
        }

        let n = buf.len().min(self.outbound.len());
        for (slot, byte) in buf.iter_mut().zip(self.outbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimulatedImu {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inbound.extend_from_slice(buf);
        while let Some(pos) = self.inbound.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.inbound.drain(..=pos).collect();
            if let Some(command) = Command::parse(&String::from_utf8_lossy(&raw)) {
                self.handle(command);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Link for SimulatedImu {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.read_timeout = timeout;
        Ok(())
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.outbound.clear();
        Ok(())
    }
}
