//! Paced mutations.
//!
//! `PacedMutations` applies writes optimistically right away but controls
//! when they are persisted. Time is passed in explicitly: `mutate(now, ..)`
//! records writes and `poll(now)` commits whatever is due, so pacing is
//! deterministic and driven by whichever timer the host already has.

use crate::database::Database;
use crate::transaction::{MutationFn, Transaction, TransactionConfig, TransactionState};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};
use strand_core::{Result, Value};

/// When paced writes are committed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacedStrategy {
    /// Writes accumulate in one transaction, committed once no write has
    /// arrived for `wait`.
    Debounce { wait: Duration },
    /// At most one commit per `wait`.
    ///
    /// `leading` commits the first write of a window right away,
    /// `trailing` commits the writes collected during the window when it
    /// ends. Without `trailing`, collected writes wait for the next write
    /// after the window.
    Throttle {
        wait: Duration,
        leading: bool,
        trailing: bool,
    },
    /// Every write gets its own transaction; they commit one at a time, in
    /// order.
    Queue,
}

#[derive(Clone)]
pub struct PacedConfig {
    pub strategy: PacedStrategy,
    pub mutation_fn: MutationFn,
    pub metadata: Value,
}

impl PacedConfig {
    pub fn new(strategy: PacedStrategy, mutation_fn: MutationFn) -> Self {
        Self {
            strategy,
            mutation_fn,
            metadata: Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

impl fmt::Debug for PacedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacedConfig")
            .field("strategy", &self.strategy)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct PacedState {
    /// Transaction collecting writes (debounce and throttle)
    pending: Option<Transaction>,
    deadline: Option<Instant>,
    last_commit: Option<Instant>,
    queued: VecDeque<Transaction>,
    in_flight: Option<Transaction>,
}

/// Writes persisted on a debounce, throttle or queue schedule.
pub struct PacedMutations {
    db: Database,
    config: PacedConfig,
    state: RefCell<PacedState>,
}

impl PacedMutations {
    pub fn new(db: &Database, config: PacedConfig) -> Self {
        Self {
            db: db.clone(),
            config,
            state: RefCell::new(PacedState::default()),
        }
    }

    pub fn strategy(&self) -> PacedStrategy {
        self.config.strategy
    }

    fn transaction(&self) -> Transaction {
        self.db.transaction(
            TransactionConfig::new(self.config.mutation_fn.clone())
                .with_auto_commit(false)
                .with_metadata(self.config.metadata.clone()),
        )
    }

    /// Runs `f` inside the paced transaction and returns it.
    ///
    /// The writes are visible as soon as this returns; when they are
    /// persisted depends on the strategy.
    pub fn mutate<F>(&self, now: Instant, f: F) -> Result<Transaction>
    where
        F: FnOnce() -> Result<()>,
    {
        match self.config.strategy {
            PacedStrategy::Debounce { wait } => {
                let transaction = self.collecting();
                transaction.mutate(f)?;
                self.state.borrow_mut().deadline = Some(now + wait);
                Ok(transaction)
            }
            PacedStrategy::Throttle { wait, leading, trailing } => {
                let transaction = self.collecting();
                transaction.mutate(f)?;
                let last_commit = self.state.borrow().last_commit;
                let open = last_commit.map_or(true, |last| now >= last + wait);
                if open && (leading || !trailing) {
                    self.commit_pending(now);
                } else if trailing {
                    let mut state = self.state.borrow_mut();
                    if state.deadline.is_none() {
                        state.deadline = Some(match last_commit {
                            Some(last) if !open => last + wait,
                            _ => now + wait,
                        });
                    }
                }
                Ok(transaction)
            }
            PacedStrategy::Queue => {
                let transaction = self.transaction();
                transaction.mutate(f)?;
                self.state.borrow_mut().queued.push_back(transaction.clone());
                self.start_next();
                Ok(transaction)
            }
        }
    }

    fn collecting(&self) -> Transaction {
        let existing = self
            .state
            .borrow()
            .pending
            .clone()
            .filter(|t| t.state() == TransactionState::Pending);
        match existing {
            Some(transaction) => transaction,
            None => {
                let transaction = self.transaction();
                self.state.borrow_mut().pending = Some(transaction.clone());
                transaction
            }
        }
    }

    fn commit_pending(&self, now: Instant) -> Option<Transaction> {
        let transaction = {
            let mut state = self.state.borrow_mut();
            state.deadline = None;
            state.pending.take()
        }?;
        if transaction.state() != TransactionState::Pending {
            return None;
        }
        self.state.borrow_mut().last_commit = Some(now);
        tracing::debug!(transaction = transaction.id(), strategy = ?self.config.strategy, "paced commit");
        drop(transaction.commit());
        Some(transaction)
    }

    /// Starts the next queued transaction once the previous one settled.
    fn start_next(&self) -> Option<Transaction> {
        let mut state = self.state.borrow_mut();
        if state.in_flight.as_ref().is_some_and(|t| t.state().is_active()) {
            return None;
        }
        let next = state.queued.pop_front();
        state.in_flight = next.clone();
        drop(state);
        let next = next?;
        tracing::debug!(transaction = next.id(), "paced commit from queue");
        drop(next.commit());
        Some(next)
    }

    /// Commits whatever is due at `now` and returns the transactions that
    /// started committing.
    pub fn poll(&self, now: Instant) -> Vec<Transaction> {
        match self.config.strategy {
            PacedStrategy::Debounce { .. } | PacedStrategy::Throttle { .. } => {
                let due = self.state.borrow().deadline.is_some_and(|d| now >= d);
                if due {
                    self.commit_pending(now).into_iter().collect()
                } else {
                    Vec::new()
                }
            }
            PacedStrategy::Queue => self.start_next().into_iter().collect(),
        }
    }

    /// Commits the collected writes now, ignoring the schedule.
    pub fn flush(&self, now: Instant) -> Option<Transaction> {
        match self.config.strategy {
            PacedStrategy::Queue => self.start_next(),
            _ => self.commit_pending(now),
        }
    }

    /// When `poll` next has something to commit.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.state.borrow().deadline
    }

    /// Transactions waiting for their turn in the queue.
    pub fn queued(&self) -> usize {
        self.state.borrow().queued.len()
    }
}

impl fmt::Debug for PacedMutations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("PacedMutations")
            .field("strategy", &self.config.strategy)
            .field("deadline", &state.deadline)
            .field("queued", &state.queued.len())
            .finish()
    }
}
