//! Bidirectional stream budget of one connection.
//!
//! QUIC limits how many bidirectional streams a client may open with a
//! cumulative MAX_STREAMS limit that only ever grows. A request reserves a
//! slot before it opens its stream; the reservation is returned if the
//! request gives up before committing.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug)]
struct BudgetState {
    limit: u64,
    opened: u64,
    reserved: u64,
    /// Limit at which STREAMS_BLOCKED was last reported.
    blocked_at: Option<u64>,
}

impl BudgetState {
    fn available(&self) -> u64 {
        self.limit.saturating_sub(self.opened + self.reserved)
    }
}

#[derive(Debug)]
pub struct StreamBudget {
    state: Mutex<BudgetState>,
    changed: Notify,
}

impl StreamBudget {
    pub fn new(limit: u64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BudgetState {
                limit,
                opened: 0,
                reserved: 0,
                blocked_at: None,
            }),
            changed: Notify::new(),
        })
    }

    pub fn limit(&self) -> u64 {
        self.state.lock().limit
    }

    pub fn opened(&self) -> u64 {
        self.state.lock().opened
    }

    pub fn available(&self) -> u64 {
        self.state.lock().available()
    }

    /// Reserve a slot if one is free.
    pub fn try_reserve(self: &Arc<Self>) -> Option<StreamPermit> {
        let mut state = self.state.lock();
        if state.available() == 0 {
            return None;
        }
        state.reserved += 1;
        Some(StreamPermit {
            budget: Arc::clone(self),
            committed: false,
        })
    }

    /// Reserve a slot, waiting up to `wait` for one to be freed or for the
    /// peer to raise the limit. Dropping the returned future abandons the
    /// wait without holding any slot. A `wait` too large to form a deadline
    /// waits until a slot appears.
    pub async fn reserve(self: &Arc<Self>, wait: Duration) -> Option<StreamPermit> {
        let deadline = Instant::now().checked_add(wait);
        loop {
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            if let Some(permit) = self.try_reserve() {
                return Some(permit);
            }
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, changed).await.is_err() {
                        return None;
                    }
                }
                None => changed.await,
            }
        }
    }

    /// Apply a MAX_STREAMS update. Returns `true` if the limit grew.
    pub fn raise_limit(&self, limit: u64) -> bool {
        let mut state = self.state.lock();
        if limit <= state.limit {
            return false;
        }
        trace!(from = state.limit, to = limit, "stream limit raised");
        state.limit = limit;
        drop(state);
        self.changed.notify_waiters();
        true
    }

    /// Record that the budget was found exhausted. Returns the limit to
    /// report in STREAMS_BLOCKED the first time this happens for a given
    /// limit, `None` if already reported.
    pub fn mark_blocked(&self) -> Option<u64> {
        let mut state = self.state.lock();
        if state.blocked_at == Some(state.limit) {
            return None;
        }
        state.blocked_at = Some(state.limit);
        Some(state.limit)
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.reserved -= 1;
        drop(state);
        self.changed.notify_waiters();
    }

    fn commit(&self) {
        let mut state = self.state.lock();
        state.reserved -= 1;
        state.opened += 1;
    }
}

/// A reserved stream slot. Dropping it without [`commit`](Self::commit)
/// hands the slot back.
#[derive(Debug)]
pub struct StreamPermit {
    budget: Arc<StreamBudget>,
    committed: bool,
}

impl StreamPermit {
    /// Mark the slot as consumed by an opened stream.
    pub fn commit(mut self) {
        self.committed = true;
        self.budget.commit();
    }
}

impl Drop for StreamPermit {
    fn drop(&mut self) {
        if !self.committed {
            self.budget.release();
        }
    }
}
