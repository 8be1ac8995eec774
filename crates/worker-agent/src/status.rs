//! Worker status state machine
//!
//! The status lives in one atomic cell. The job loop owns the only
//! [`StatusWriter`]; the heartbeat task holds cheap [`StatusReader`] clones.
//! Every accepted transition is also sent to the status reporter.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error};

use common::error::{Error, Result};
use common::WorkerStatus;

/// Creates a status cell starting at `initial`
///
/// The receiver yields every status the writer publishes, starting with
/// `initial`, and closes when the writer is dropped.
pub fn status_channel(initial: WorkerStatus) -> (StatusWriter, StatusReader, mpsc::UnboundedReceiver<WorkerStatus>) {
    let current = Arc::new(AtomicU8::new(initial.as_u8()));
    let (updates, receiver) = mpsc::unbounded_channel();
    let _ = updates.send(initial);

    let writer = StatusWriter {
        current: current.clone(),
        updates,
    };
    (writer, StatusReader { current }, receiver)
}

/// Read access to the current status
#[derive(Debug, Clone)]
pub struct StatusReader {
    current: Arc<AtomicU8>,
}

impl StatusReader {
    /// Current status
    pub fn get(&self) -> WorkerStatus {
        WorkerStatus::from_u8(self.current.load(Ordering::Acquire))
    }
}

/// The single writer of the worker status
#[derive(Debug)]
pub struct StatusWriter {
    current: Arc<AtomicU8>,
    updates: mpsc::UnboundedSender<WorkerStatus>,
}

impl StatusWriter {
    /// Current status
    pub fn get(&self) -> WorkerStatus {
        WorkerStatus::from_u8(self.current.load(Ordering::Acquire))
    }

    /// A reader sharing this status
    pub fn reader(&self) -> StatusReader {
        StatusReader {
            current: self.current.clone(),
        }
    }

    /// Moves to `next` if the state machine allows it
    pub fn transition(&mut self, next: WorkerStatus) -> Result<()> {
        let from = self.get();
        if !from.can_transition_to(next) {
            return Err(Error::InvalidTransition { from, to: next });
        }

        self.current.store(next.as_u8(), Ordering::Release);
        debug!(%from, to = %next, "Status transition");
        self.publish(next);
        Ok(())
    }

    /// Enters the terminal `faulty` status
    pub fn fault(&mut self) {
        if self.get() == WorkerStatus::Faulty {
            return;
        }
        self.current.store(WorkerStatus::Faulty.as_u8(), Ordering::Release);
        error!("Worker entered faulty status");
        self.publish(WorkerStatus::Faulty);
    }

    fn publish(&self, status: WorkerStatus) {
        // The reporter may already be gone during shutdown
        let _ = self.updates.send(status);
    }
}
