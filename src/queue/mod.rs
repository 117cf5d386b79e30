//! Bounded-concurrency admission queue
//!
//! [`ExecutionQueue`] guarantees that at most `limit` tickets run at once
//! across every batch and standalone execution that shares it. Tickets that
//! cannot take a slot wait in strict FIFO order. The waiting list and the set
//! of running tickets sit behind one mutex; executor work always runs outside
//! it, in its own task.
//!
//! Slot release happens when the dispatched task's slot guard drops, so a
//! slot comes back whatever the outcome, including an executor panic. Each
//! release promotes exactly one waiter, the head of the list.

mod ticket;

pub use ticket::{TicketHandle, Ticket, TicketListener, TicketOutcome, TicketReport, TicketWork};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::metrics::DispatchMetrics;

/// Admission errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    /// The waiting list is at its bound
    #[error("execution queue is full ({max} tickets waiting)")]
    QueueFull {
        /// Configured bound
        max: usize,
    },

    /// The execution already holds a slot or a waiting position
    #[error("ticket {0} is already queued or running")]
    DuplicateTicket(Uuid),
}

/// Result of [`ExecutionQueue::cancel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelOutcome {
    /// Removed from the waiting list; it will never run
    Dequeued,
    /// Running; the executor was asked to stop
    Signalled,
    /// Not known to the queue (finished, or never admitted)
    NotFound,
}

/// Point-in-time view of the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Concurrency limit
    pub limit: usize,
    /// Tickets holding a slot
    pub running: usize,
    /// Tickets waiting for a slot
    pub waiting: usize,
    /// Bound on the waiting list, if any
    pub max_waiting: Option<usize>,
    /// Running execution ids
    pub running_ids: Vec<Uuid>,
    /// Waiting execution ids, head first
    pub waiting_ids: Vec<Uuid>,
}

struct Pending {
    ticket: Ticket,
    outcome_tx: oneshot::Sender<TicketOutcome>,
    enqueued_at: Instant,
}

#[derive(Default)]
struct QueueState {
    running: HashMap<Uuid, CancellationToken>,
    waiting: VecDeque<Pending>,
    waiting_ids: HashSet<Uuid>,
}

struct Shared {
    limit: usize,
    max_waiting: Option<usize>,
    state: Mutex<QueueState>,
}

impl Shared {
    /// Free the slot held by `execution_id` and promote the head waiter into it
    fn release(&self, execution_id: Uuid) -> Option<Pending> {
        let mut state = self.state.lock();
        if state.running.remove(&execution_id).is_some() {
            DispatchMetrics::slot_released();
        }
        if state.running.len() >= self.limit {
            return None;
        }

        let next = state.waiting.pop_front()?;
        let next_id = next.ticket.execution_id;
        state.waiting_ids.remove(&next_id);
        state.running.insert(next_id, next.ticket.cancel.clone());
        DispatchMetrics::ticket_left_waiting();
        Some(next)
    }
}

/// Releases the slot when the dispatched task ends, however it ends
struct SlotGuard {
    shared: Arc<Shared>,
    execution_id: Uuid,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let Some(next) = self.shared.release(self.execution_id) else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(run_ticket(self.shared.clone(), next));
            }
            Err(_) => abandon(&self.shared, next),
        }
    }
}

/// Give up on a promoted ticket that no runtime can run
///
/// The waiter learns of the failure through its handle. The listener is
/// async and cannot be reached from here, so the record keeps its status.
fn abandon(shared: &Shared, pending: Pending) {
    let Pending { ticket, outcome_tx, .. } = pending;
    warn!(
        execution_id = %ticket.execution_id,
        "No runtime available to dispatch promoted ticket"
    );
    shared.state.lock().running.remove(&ticket.execution_id);
    let _ = outcome_tx.send(TicketOutcome::Failed {
        error: "runtime shut down".to_string(),
        result: None,
    });
}

async fn run_ticket(shared: Arc<Shared>, pending: Pending) {
    let Pending {
        ticket,
        outcome_tx,
        enqueued_at,
    } = pending;
    let Ticket {
        execution_id,
        target_id,
        work,
        listener,
        cancel,
    } = ticket;

    let _slot = SlotGuard {
        shared,
        execution_id,
    };
    DispatchMetrics::slot_acquired(enqueued_at.elapsed());

    let started_at = Utc::now();
    debug!(execution_id = %execution_id, target = %target_id, "Ticket dispatched");
    if let Some(listener) = &listener {
        listener.on_started(execution_id, started_at).await;
    }

    // The work runs in its own task so a panicking executor becomes a failed outcome.
    let outcome = match tokio::spawn(async move { work(cancel).await }).await {
        Ok(result) => TicketOutcome::from_execution(result),
        Err(join_error) => {
            error!(
                execution_id = %execution_id,
                target = %target_id,
                error = %join_error,
                "Executor panicked"
            );
            TicketOutcome::Failed {
                error: format!("executor panicked: {}", join_error),
                result: None,
            }
        }
    };

    let report = TicketReport {
        execution_id,
        outcome,
        started_at,
        finished_at: Utc::now(),
    };
    debug!(
        execution_id = %execution_id,
        target = %target_id,
        outcome = report.outcome.label(),
        duration_ms = (report.finished_at - report.started_at).num_milliseconds(),
        "Ticket finished"
    );
    DispatchMetrics::record_outcome(report.outcome.label());

    if let Some(listener) = &listener {
        listener.on_finished(&report).await;
    }
    let _ = outcome_tx.send(report.outcome);
}

/// Concurrency-limited admission and dispatch engine
#[derive(Clone)]
pub struct ExecutionQueue {
    shared: Arc<Shared>,
}

impl ExecutionQueue {
    /// Create a queue running at most `limit` tickets at once
    ///
    /// `max_waiting` bounds the waiting list; `None` leaves it unbounded.
    pub fn new(limit: usize, max_waiting: Option<usize>) -> Self {
        Self {
            shared: Arc::new(Shared {
                limit: limit.max(1),
                max_waiting,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    /// Create a queue from configuration
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(config.concurrency_limit, config.max_queue_size)
    }

    /// Concurrency limit
    pub fn limit(&self) -> usize {
        self.shared.limit
    }

    /// Bound on the waiting list, `None` if unbounded
    pub fn max_waiting(&self) -> Option<usize> {
        self.shared.max_waiting
    }

    /// Admit a ticket without waiting for it to finish
    ///
    /// The ticket starts immediately if a slot is free, otherwise it joins the
    /// tail of the waiting list.
    pub fn enqueue(&self, ticket: Ticket) -> Result<TicketHandle, QueueError> {
        let execution_id = ticket.execution_id;
        let (outcome_tx, receiver) = oneshot::channel();
        let pending = Pending {
            ticket,
            outcome_tx,
            enqueued_at: Instant::now(),
        };

        let dispatch_now = {
            let mut state = self.shared.state.lock();
            if state.running.contains_key(&execution_id) || state.waiting_ids.contains(&execution_id)
            {
                return Err(QueueError::DuplicateTicket(execution_id));
            }

            if state.running.len() < self.shared.limit {
                state
                    .running
                    .insert(execution_id, pending.ticket.cancel.clone());
                Some(pending)
            } else {
                if let Some(max) = self.shared.max_waiting {
                    if state.waiting.len() >= max {
                        return Err(QueueError::QueueFull { max });
                    }
                }
                state.waiting.push_back(pending);
                state.waiting_ids.insert(execution_id);
                DispatchMetrics::ticket_waiting();
                debug!(
                    execution_id = %execution_id,
                    position = state.waiting.len(),
                    "All slots busy, ticket waiting"
                );
                None
            }
        };

        if let Some(pending) = dispatch_now {
            tokio::spawn(run_ticket(self.shared.clone(), pending));
        }

        Ok(TicketHandle {
            execution_id,
            receiver,
        })
    }

    /// Admit a ticket and wait for its terminal outcome
    pub async fn submit(&self, ticket: Ticket) -> Result<TicketOutcome, QueueError> {
        Ok(self.enqueue(ticket)?.wait().await)
    }

    /// Cancel a ticket
    ///
    /// A waiting ticket is removed without consuming a slot and resolves to
    /// [`TicketOutcome::Cancelled`]. A running ticket only has its
    /// cancellation token triggered; the executor decides what to do with it.
    pub fn cancel(&self, execution_id: Uuid) -> CancelOutcome {
        let (removed, running_token) = {
            let mut state = self.shared.state.lock();
            if let Some(token) = state.running.get(&execution_id) {
                (None, Some(token.clone()))
            } else if state.waiting_ids.remove(&execution_id) {
                let position = state
                    .waiting
                    .iter()
                    .position(|p| p.ticket.execution_id == execution_id);
                let removed = position.and_then(|index| state.waiting.remove(index));
                if removed.is_some() {
                    DispatchMetrics::ticket_left_waiting();
                }
                (removed, None)
            } else {
                (None, None)
            }
        };

        if let Some(token) = running_token {
            token.cancel();
            DispatchMetrics::record_cancellation("signalled");
            debug!(execution_id = %execution_id, "Cancellation signalled to running ticket");
            return CancelOutcome::Signalled;
        }

        match removed {
            Some(pending) => {
                let _ = pending.outcome_tx.send(TicketOutcome::Cancelled);
                DispatchMetrics::record_cancellation("dequeued");
                DispatchMetrics::record_outcome(TicketOutcome::Cancelled.label());
                debug!(execution_id = %execution_id, "Waiting ticket cancelled");
                CancelOutcome::Dequeued
            }
            None => CancelOutcome::NotFound,
        }
    }

    /// Snapshot of running and waiting tickets
    pub fn status(&self) -> QueueStatus {
        let state = self.shared.state.lock();
        QueueStatus {
            limit: self.shared.limit,
            running: state.running.len(),
            waiting: state.waiting.len(),
            max_waiting: self.shared.max_waiting,
            running_ids: state.running.keys().copied().collect(),
            waiting_ids: state
                .waiting
                .iter()
                .map(|p| p.ticket.execution_id)
                .collect(),
        }
    }

    /// How many more tickets can be admitted right now, `None` if unbounded
    pub fn remaining_capacity(&self) -> Option<usize> {
        let max = self.shared.max_waiting?;
        let state = self.shared.state.lock();
        let free_slots = self.shared.limit.saturating_sub(state.running.len());
        Some(free_slots + max.saturating_sub(state.waiting.len()))
    }

    /// Number of tickets holding a slot
    pub fn running_count(&self) -> usize {
        self.shared.state.lock().running.len()
    }

    /// Number of tickets waiting for a slot
    pub fn waiting_count(&self) -> usize {
        self.shared.state.lock().waiting.len()
    }
}

impl std::fmt::Debug for ExecutionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.status();
        f.debug_struct("ExecutionQueue")
            .field("limit", &status.limit)
            .field("running", &status.running)
            .field("waiting", &status.waiting)
            .field("max_waiting", &status.max_waiting)
            .finish()
    }
}
