//! Run loop and per-message transaction controller.
//!
//! The consumer drives one message cycle at a time: claim a message inside
//! the queue's transactional scope, parse the envelope, execute the record,
//! then resolve the message with exactly one of commit or abort. Failure
//! classification decides which:
//! - malformed body: warn and commit (discarded, not retried)
//! - cancellation during parse or before execute: warn and abort (redelivered)
//! - queue infrastructure failure: warn and stop the loop
//! - any other executor error: log with the correlation id and commit anyway,
//!   so one poison message cannot wedge the queue (abort instead if
//!   redelivery is preferred)
//!
//! The store mutation and the queue commit are not atomic with each other; a
//! crash between them redelivers the message, which the executor's
//! natural-key existence check absorbs.

use std::time::Duration;

use log::{error, info, warn};

use crate::cancel::CancelFlag;
use crate::envelope;
use crate::error::{IntakeError, Result};
use crate::queue::MessageQueue;
use crate::store::EntityStore;
use crate::worker::Worker;

pub mod window;

pub use window::{Clock, RunWindow, SystemClock};

/// Terminal action taken for one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// Message permanently removed from the queue
    Committed,
    /// Message returned to the queue for redelivery
    Aborted,
    /// Receive timed out; no message was taken
    Skipped,
}

/// Why the run loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Cancellation flag observed between iterations
    Cancelled,
    /// Current hour fell outside the configured run window
    WindowClosed,
    /// Queue infrastructure failure
    QueueUnavailable,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Cancelled => write!(f, "cancelled"),
            StopReason::WindowClosed => write!(f, "run window closed"),
            StopReason::QueueUnavailable => write!(f, "queue unavailable"),
        }
    }
}

/// Single-threaded consumer owning the queue, the worker, and the gate.
pub struct Consumer<Q, S, C = SystemClock>
where
    Q: MessageQueue,
    S: EntityStore,
    C: Clock,
{
    queue: Q,
    worker: Worker<S>,
    cancel: CancelFlag,
    window: Option<RunWindow>,
    receive_timeout: Duration,
    clock: C,
}

impl<Q, S> Consumer<Q, S, SystemClock>
where
    Q: MessageQueue,
    S: EntityStore,
{
    /// Create a consumer using the wall clock for the run-window gate.
    pub fn new(queue: Q, worker: Worker<S>, cancel: CancelFlag, window: Option<RunWindow>, receive_timeout: Duration) -> Self {
        Self::with_clock(queue, worker, cancel, window, receive_timeout, SystemClock)
    }
}

impl<Q, S, C> Consumer<Q, S, C>
where
    Q: MessageQueue,
    S: EntityStore,
    C: Clock,
{
    /// Create a consumer with an injected clock.
    pub fn with_clock(
        queue: Q,
        worker: Worker<S>,
        cancel: CancelFlag,
        window: Option<RunWindow>,
        receive_timeout: Duration,
        clock: C,
    ) -> Self {
        Self {
            queue,
            worker,
            cancel,
            window,
            receive_timeout,
            clock,
        }
    }

    /// Run message cycles until cancellation, window exhaustion, or a fatal
    /// queue failure.
    pub async fn run(&mut self) -> Result<StopReason> {
        info!("Starting receive loop");

        loop {
            if self.cancel.is_cancelled() {
                info!("Cancellation requested, stopping receive loop");
                return Ok(StopReason::Cancelled);
            }

            if let Some(window) = self.window {
                let hour = self.clock.current_hour();
                if window.is_closed(hour) {
                    warn!("Run window closed at hour {}, stopping receive loop", hour);
                    return Ok(StopReason::WindowClosed);
                }
            }

            match self.process_one().await {
                Ok(_) => {}
                Err(e) if e.is_fatal_to_loop() => {
                    warn!("{}", e);
                    return Ok(StopReason::QueueUnavailable);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drive one full message cycle.
    ///
    /// Every received message is resolved with exactly one terminal action
    /// on every path through this method.
    pub async fn process_one(&mut self) -> Result<TransactionOutcome> {
        let Some(message) = self.queue.receive(self.receive_timeout).await? else {
            // Idle tick: nothing was claimed, nothing to resolve
            return Ok(TransactionOutcome::Skipped);
        };

        info!("{} {}: Received", message.id, message.label);

        let record = match envelope::extract(&message.body, &self.cancel) {
            Ok(Some(record)) => record,
            Ok(None) => {
                // Malformed input is discarded, not retried
                warn!("{} {}: Body could not be parsed", message.id, message.label);
                self.queue.commit(&message)?;
                return Ok(TransactionOutcome::Committed);
            }
            Err(IntakeError::Cancelled) => {
                warn!("{} {}: Cancelled during parse", message.id, message.label);
                self.queue.abort(&message)?;
                return Ok(TransactionOutcome::Aborted);
            }
            Err(e) => {
                error!("{} {}: {}", message.id, message.label, e);
                self.queue.commit(&message)?;
                return Ok(TransactionOutcome::Committed);
            }
        };

        // Last cooperative check point before the store mutation; the
        // executor itself is never interrupted mid-flight
        if self.cancel.is_cancelled() {
            warn!("{} {}: Cancelled before execute", message.id, message.label);
            self.queue.abort(&message)?;
            return Ok(TransactionOutcome::Aborted);
        }

        match self.worker.execute(&message.id, &record) {
            Ok(_) => {
                info!("{} {}: Complete", message.id, message.label);
                self.queue.commit(&message)?;
                Ok(TransactionOutcome::Committed)
            }
            Err(IntakeError::Cancelled) => {
                warn!("{} {}: Cancelled during execute", message.id, message.label);
                self.queue.abort(&message)?;
                Ok(TransactionOutcome::Aborted)
            }
            Err(e) => {
                error!("{} {}: {}", message.id, message.label, e);
                // Commit anyway; switch to abort to leave failed messages in the queue
                self.queue.commit(&message)?;
                Ok(TransactionOutcome::Committed)
            }
        }
    }
}
