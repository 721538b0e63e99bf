//! Request/response rendezvous between callers and the worker.
//!
//! Each submitted request gets a slot keyed by its id. The worker fills the
//! slot exactly once; the caller blocked in [`Correlator::await_result`] is
//! woken, takes the response and the slot disappears. A caller that gives up
//! removes its slot, so a late response finds nothing and is dropped.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use super::Response;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AwaitError {
    #[error("no result after {0:?}")]
    Timeout(Duration),

    #[error("request {0} is not pending")]
    UnknownRequest(Uuid),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("a result for request {0} was already published")]
    AlreadyPublished(Uuid),
}

/// What happened to a published response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Stored for the waiting caller
    Stored,
    /// Nobody waits for this id any more
    Discarded,
}

#[derive(Debug)]
enum Slot {
    Pending,
    Ready(Response),
}

#[derive(Debug, Default)]
pub struct Correlator {
    slots: Mutex<HashMap<Uuid, Slot>>,
    published: Condvar,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<Uuid, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a slot for `id`. Must happen before the request is queued.
    pub fn register(&self, id: Uuid) {
        self.slots().insert(id, Slot::Pending);
    }

    /// Store the response for `id` and wake waiters
    pub fn publish(&self, id: Uuid, response: Response) -> Result<Delivery, PublishError> {
        let mut slots = self.slots();
        match slots.get_mut(&id) {
            Some(Slot::Ready(_)) => return Err(PublishError::AlreadyPublished(id)),
            Some(slot) => *slot = Slot::Ready(response),
            None => {
                debug!(%id, "dropping result, caller no longer waiting");
                return Ok(Delivery::Discarded);
            }
        }
        drop(slots);
        self.published.notify_all();
        Ok(Delivery::Stored)
    }

    /// Block until the response for `id` is published, then remove it.
    ///
    /// With `timeout == None` this waits indefinitely. On timeout the slot is
    /// removed so a later publish is discarded.
    pub fn await_result(&self, id: Uuid, timeout: Option<Duration>) -> Result<Response, AwaitError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut slots = self.slots();
        loop {
            match slots.remove(&id) {
                None => return Err(AwaitError::UnknownRequest(id)),
                Some(Slot::Ready(response)) => return Ok(response),
                Some(pending) => {
                    slots.insert(id, pending);
                }
            }

            slots = match deadline {
                None => self
                    .published
                    .wait(slots)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        slots.remove(&id);
                        return Err(AwaitError::Timeout(timeout.unwrap_or_default()));
                    }
                    self.published
                        .wait_timeout(slots, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Take the response for `id` if it is already there
    pub fn try_take(&self, id: Uuid) -> Option<Response> {
        let mut slots = self.slots();
        match slots.remove(&id) {
            Some(Slot::Ready(response)) => Some(response),
            Some(pending) => {
                slots.insert(id, pending);
                None
            }
            None => None,
        }
    }

    /// Number of slots still open (pending or unread)
    pub fn open_slots(&self) -> usize {
        self.slots().len()
    }
}
