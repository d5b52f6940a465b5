//! Server push bookkeeping for one connection (RFC 9114 Section 4.6).
//!
//! A connection has a single push ID space. The client grants a bound with
//! MAX_PUSH_ID; the server allocates IDs below it, promises them on request
//! streams and delivers each on at most one push stream. [`PushManager`]
//! keeps that state behind one lock so every exchange sharing the connection
//! sees the same view, and reports what happened through [`PushEvent`]s sent
//! to the exchanges that observed a promise.
//!
//! The grant is an exclusive bound: with a grant of `n`, push IDs `0..n` are
//! usable.
//!
//! A push that has been promised and then completed or cancelled is
//! released: its record is dropped and only its ID is remembered, so a push
//! stream reusing it is still rejected.

use std::collections::{BTreeSet, HashMap};

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, trace, warn};

use crate::error::{Error, ErrorCode};
use crate::frame::Frame;
use crate::StreamId;

/// Identifies one request/response exchange on the connection.
pub type ExchangeId = u64;

/// Push ID to use for a promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushIdRequest {
    /// Assign the next unused push ID.
    Allocate,
    /// Use this push ID (received from the peer, or re-promised).
    Id(u64),
}

/// Lifecycle of one push ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStatus {
    /// PUSH_PROMISE seen, no push stream yet.
    Promised,
    /// Push stream bound to the promise.
    Streaming,
    /// Push response fully received.
    Completed,
    /// Cancelled locally or by CANCEL_PUSH.
    Cancelled,
}

/// Result of [`PushManager::register_promise`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseOutcome {
    /// First promise for this push ID.
    New(u64),
    /// The push ID was already promised with identical headers.
    Additional(u64),
}

impl PromiseOutcome {
    pub fn push_id(&self) -> u64 {
        match self {
            PromiseOutcome::New(id) | PromiseOutcome::Additional(id) => *id,
        }
    }
}

/// Result of [`PushManager::register_push_stream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStreamOutcome {
    /// Bound to an existing promise; observers were notified.
    Delivered,
    /// No promise yet; delivered once the promise arrives.
    Held,
    /// The push was cancelled; the stream should be abandoned.
    Cancelled,
}

/// Notification delivered to an exchange that observed a promise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    /// A new push promise with its encoded field section.
    Promise { push_id: u64, headers: Bytes },
    /// A repeat of a promise this connection has already seen.
    AdditionalPromise { push_id: u64 },
    /// The push response arrives on `stream_id`.
    PushStream { push_id: u64, stream_id: StreamId },
    /// The push will not be delivered.
    Cancelled { push_id: u64 },
}

/// Violations detected by the push state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    #[error("push headers do not match with previous promise for {push_id}")]
    HeadersMismatch { push_id: u64 },

    #[error("pushId {push_id} already used on this connection")]
    AlreadyUsed { push_id: u64 },

    #[error("Max pushId exceeded ({push_id} >= {granted_max})")]
    GrantExceeded { push_id: u64, granted_max: u64 },

    #[error("GOAWAY id {id} greater than previous {previous}")]
    GoAwayIncreased { id: u64, previous: u64 },

    #[error("MAX_PUSH_ID reduced from {previous} to {value}")]
    MaxPushIdDecreased { value: u64, previous: u64 },

    #[error("connection closed")]
    Closed,
}

impl PushError {
    /// HTTP/3 error code the connection closes with.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            PushError::HeadersMismatch { .. } => ErrorCode::GeneralProtocolError,
            PushError::AlreadyUsed { .. }
            | PushError::GrantExceeded { .. }
            | PushError::GoAwayIncreased { .. }
            | PushError::MaxPushIdDecreased { .. } => ErrorCode::IdError,
            PushError::Closed => ErrorCode::NoError,
        }
    }
}

impl From<PushError> for Error {
    fn from(e: PushError) -> Self {
        match e {
            PushError::Closed => Error::ConnectionClosed {
                code: ErrorCode::NoError,
            },
            other => Error::protocol(other.error_code(), other.to_string()),
        }
    }
}

#[derive(Debug)]
struct PushRecord {
    /// `None` while only a push stream has been seen.
    headers: Option<Bytes>,
    status: PushStatus,
    observers: Vec<ExchangeId>,
    stream: Option<StreamId>,
}

impl PushRecord {
    fn empty() -> Self {
        Self {
            headers: None,
            status: PushStatus::Promised,
            observers: Vec::new(),
            stream: None,
        }
    }
}

/// Push IDs kept as a contiguous prefix plus the members above it.
#[derive(Debug, Default)]
struct PushIdSet {
    /// Every ID below this is a member.
    below: u64,
    above: BTreeSet<u64>,
}

impl PushIdSet {
    fn contains(&self, push_id: u64) -> bool {
        push_id < self.below || self.above.contains(&push_id)
    }

    fn insert(&mut self, push_id: u64) {
        if push_id < self.below {
            return;
        }
        self.above.insert(push_id);
        while self.above.remove(&self.below) {
            self.below += 1;
        }
    }
}

#[derive(Debug, Default)]
struct PushState {
    next_push_id: u64,
    highest_used: Option<u64>,
    granted_max: u64,
    /// Pushes still in flight.
    promises: HashMap<u64, PushRecord>,
    /// Pushes whose record was released.
    released: PushIdSet,
    /// Released pushes that were cancelled, with their push stream if one
    /// arrived.
    cancelled: HashMap<u64, Option<StreamId>>,
    subscribers: HashMap<ExchangeId, mpsc::UnboundedSender<PushEvent>>,
    last_goaway: Option<u64>,
    closed: bool,
}

impl PushState {
    fn check_grant(&self, push_id: u64) -> Result<(), PushError> {
        if push_id >= self.granted_max {
            return Err(PushError::GrantExceeded {
                push_id,
                granted_max: self.granted_max,
            });
        }
        Ok(())
    }

    fn mark_used(&mut self, push_id: u64) {
        self.highest_used = Some(self.highest_used.map_or(push_id, |h| h.max(push_id)));
        if push_id >= self.next_push_id {
            self.next_push_id = push_id + 1;
        }
    }

    fn send(&self, exchange: ExchangeId, event: PushEvent) {
        match self.subscribers.get(&exchange) {
            Some(tx) => {
                if tx.send(event).is_err() {
                    trace!(exchange, "push subscriber gone");
                }
            }
            None => trace!(exchange, ?event, "no push subscriber"),
        }
    }

    fn broadcast(&self, push_id: u64, event: PushEvent) {
        if let Some(record) = self.promises.get(&push_id) {
            for exchange in &record.observers {
                self.send(*exchange, event.clone());
            }
        }
    }

    fn release(&mut self, push_id: u64) {
        let Some(record) = self.promises.remove(&push_id) else {
            return;
        };
        if record.status == PushStatus::Cancelled {
            self.cancelled.insert(push_id, record.stream);
        }
        self.released.insert(push_id);
        trace!(push_id, status = ?record.status, "push record released");
    }

    fn released_status(&self, push_id: u64) -> Option<PushStatus> {
        if !self.released.contains(push_id) {
            return None;
        }
        if self.cancelled.contains_key(&push_id) {
            Some(PushStatus::Cancelled)
        } else {
            Some(PushStatus::Completed)
        }
    }
}

/// Connection-scoped push ID state.
///
/// Shared by every exchange on the connection; all operations take `&self`.
#[derive(Debug, Default)]
pub struct PushManager {
    state: Mutex<PushState>,
    grant_changed: Notify,
}

impl PushManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive push events for `exchange`. Replaces an earlier subscription.
    pub fn subscribe(&self, exchange: ExchangeId) -> mpsc::UnboundedReceiver<PushEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().subscribers.insert(exchange, tx);
        rx
    }

    pub fn unsubscribe(&self, exchange: ExchangeId) {
        self.state.lock().subscribers.remove(&exchange);
    }

    /// Current exclusive push ID bound.
    pub fn granted_max(&self) -> u64 {
        self.state.lock().granted_max
    }

    /// Highest push ID promised or claimed so far.
    pub fn highest_used(&self) -> Option<u64> {
        self.state.lock().highest_used
    }

    pub fn status(&self, push_id: u64) -> Option<PushStatus> {
        let state = self.state.lock();
        match state.promises.get(&push_id) {
            Some(record) => Some(record.status),
            None => state.released_status(push_id),
        }
    }

    /// Pushes still holding a record. Completed and cancelled pushes are
    /// released once their promise has been seen.
    pub fn tracked_pushes(&self) -> usize {
        self.state.lock().promises.len()
    }

    /// Check a push ID against the current grant.
    pub fn validate_against_grant(&self, push_id: u64) -> Result<(), PushError> {
        self.state.lock().check_grant(push_id)
    }

    /// Record a PUSH_PROMISE seen or sent on `exchange`'s request stream.
    ///
    /// A repeated promise must carry identical encoded headers and yields
    /// [`PromiseOutcome::Additional`]; its exchange receives
    /// [`PushEvent::AdditionalPromise`] rather than a second
    /// [`PushEvent::Promise`]. Repeating the promise of a released push is
    /// not compared against its headers; the exchange is told the push was
    /// cancelled since its response is gone.
    pub fn register_promise(
        &self,
        request: PushIdRequest,
        headers: Bytes,
        exchange: ExchangeId,
    ) -> Result<PromiseOutcome, PushError> {
        let mut state = self.state.lock();
        let push_id = match request {
            PushIdRequest::Allocate => state.next_push_id,
            PushIdRequest::Id(id) => id,
        };
        state.check_grant(push_id)?;

        if state.released.contains(push_id) {
            debug!(push_id, exchange, "promise for released push");
            state.send(exchange, PushEvent::AdditionalPromise { push_id });
            state.send(exchange, PushEvent::Cancelled { push_id });
            return Ok(PromiseOutcome::Additional(push_id));
        }

        if let Some(record) = state.promises.get_mut(&push_id) {
            if let Some(previous) = &record.headers {
                if *previous != headers {
                    warn!(push_id, "push promise headers differ from previous promise");
                    return Err(PushError::HeadersMismatch { push_id });
                }
                if !record.observers.contains(&exchange) {
                    record.observers.push(exchange);
                }
                debug!(push_id, exchange, "additional push promise");
                state.send(exchange, PushEvent::AdditionalPromise { push_id });
                return Ok(PromiseOutcome::Additional(push_id));
            }

            // The push stream arrived first; release it now.
            record.headers = Some(headers.clone());
            record.observers.push(exchange);
            if record.stream.is_some() && record.status == PushStatus::Promised {
                record.status = PushStatus::Streaming;
            }
            let stream = record.stream;
            let status = record.status;
            state.mark_used(push_id);
            debug!(push_id, exchange, "push promise for held push stream");
            state.send(exchange, PushEvent::Promise { push_id, headers });
            match (status, stream) {
                (PushStatus::Cancelled, _) => {
                    state.send(exchange, PushEvent::Cancelled { push_id })
                }
                (_, Some(stream_id)) => {
                    state.send(exchange, PushEvent::PushStream { push_id, stream_id })
                }
                _ => {}
            }
            if matches!(status, PushStatus::Cancelled | PushStatus::Completed) {
                state.release(push_id);
            }
            return Ok(PromiseOutcome::New(push_id));
        }

        state.mark_used(push_id);
        state.promises.insert(
            push_id,
            PushRecord {
                headers: Some(headers.clone()),
                status: PushStatus::Promised,
                observers: vec![exchange],
                stream: None,
            },
        );
        debug!(push_id, exchange, "push promise");
        state.send(exchange, PushEvent::Promise { push_id, headers });
        Ok(PromiseOutcome::New(push_id))
    }

    /// Bind a push stream to its push ID.
    ///
    /// Each push ID may be delivered on one push stream only.
    pub fn register_push_stream(
        &self,
        push_id: u64,
        stream_id: StreamId,
    ) -> Result<PushStreamOutcome, PushError> {
        let mut state = self.state.lock();
        state.check_grant(push_id)?;
        if state.released.contains(push_id) {
            return match state.cancelled.get_mut(&push_id) {
                Some(slot) if slot.is_none() => {
                    *slot = Some(stream_id);
                    debug!(push_id, stream_id = stream_id.0, "push stream for cancelled push");
                    Ok(PushStreamOutcome::Cancelled)
                }
                _ => {
                    warn!(push_id, stream_id = stream_id.0, "push ID reused by another push stream");
                    Err(PushError::AlreadyUsed { push_id })
                }
            };
        }
        if state
            .promises
            .get(&push_id)
            .is_some_and(|record| record.stream.is_some())
        {
            warn!(push_id, stream_id = stream_id.0, "push ID reused by another push stream");
            return Err(PushError::AlreadyUsed { push_id });
        }
        state.mark_used(push_id);

        let record = state
            .promises
            .entry(push_id)
            .or_insert_with(PushRecord::empty);
        record.stream = Some(stream_id);
        let outcome = if record.status == PushStatus::Cancelled {
            PushStreamOutcome::Cancelled
        } else if record.headers.is_none() {
            PushStreamOutcome::Held
        } else {
            record.status = PushStatus::Streaming;
            PushStreamOutcome::Delivered
        };
        debug!(push_id, stream_id = stream_id.0, ?outcome, "push stream");
        if outcome == PushStreamOutcome::Delivered {
            state.broadcast(push_id, PushEvent::PushStream { push_id, stream_id });
        }
        Ok(outcome)
    }

    /// Cancel a push for every exchange that observed it. Returns false if
    /// it was already finished or cancelled.
    pub fn cancel(&self, push_id: u64) -> bool {
        let mut state = self.state.lock();
        if state.released.contains(push_id) {
            return false;
        }
        let record = state
            .promises
            .entry(push_id)
            .or_insert_with(PushRecord::empty);
        if matches!(record.status, PushStatus::Cancelled | PushStatus::Completed) {
            return false;
        }
        record.status = PushStatus::Cancelled;
        let promised = record.headers.is_some();
        debug!(push_id, "push cancelled");
        state.broadcast(push_id, PushEvent::Cancelled { push_id });
        if promised {
            state.release(push_id);
        }
        true
    }

    /// Withdraw `exchange` from a push it observed. The push is cancelled
    /// only when no other exchange still observes it; returns true in that
    /// case.
    pub fn dismiss(&self, push_id: u64, exchange: ExchangeId) -> bool {
        let mut state = self.state.lock();
        let Some(record) = state.promises.get_mut(&push_id) else {
            return false;
        };
        let Some(index) = record.observers.iter().position(|e| *e == exchange) else {
            return false;
        };
        record.observers.remove(index);
        if !record.observers.is_empty()
            || matches!(record.status, PushStatus::Cancelled | PushStatus::Completed)
        {
            debug!(push_id, exchange, remaining = record.observers.len(), "push dismissed");
            return false;
        }
        record.status = PushStatus::Cancelled;
        debug!(push_id, exchange, "push dismissed by its last observer");
        state.release(push_id);
        true
    }

    /// Handle a CANCEL_PUSH frame from the peer.
    pub fn on_cancel_push(&self, push_id: u64) -> Result<(), PushError> {
        self.validate_against_grant(push_id)?;
        self.cancel(push_id);
        Ok(())
    }

    /// Mark a push response as fully received. Returns false for unknown,
    /// cancelled or already completed pushes.
    pub fn complete(&self, push_id: u64) -> bool {
        let mut state = self.state.lock();
        let Some(record) = state.promises.get_mut(&push_id) else {
            return false;
        };
        if matches!(record.status, PushStatus::Cancelled | PushStatus::Completed) {
            return false;
        }
        record.status = PushStatus::Completed;
        if record.headers.is_some() {
            state.release(push_id);
        }
        true
    }

    /// Check a received GOAWAY id. Successive ids must not increase.
    pub fn record_goaway(&self, id: u64) -> Result<(), PushError> {
        let mut state = self.state.lock();
        if let Some(previous) = state.last_goaway {
            if id > previous {
                warn!(id, previous, "GOAWAY id increased");
                return Err(PushError::GoAwayIncreased { id, previous });
            }
        }
        state.last_goaway = Some(id);
        Ok(())
    }

    /// Last GOAWAY id received, if any.
    pub fn last_goaway(&self) -> Option<u64> {
        self.state.lock().last_goaway
    }

    /// Client: raise the grant. Returns the MAX_PUSH_ID frame to send, or
    /// `None` if `bound` does not raise it.
    pub fn grant_max_push_id(&self, bound: u64) -> Option<Frame> {
        let mut state = self.state.lock();
        if bound <= state.granted_max {
            return None;
        }
        state.granted_max = bound;
        debug!(granted_max = bound, "push grant raised");
        Some(Frame::MaxPushId { push_id: bound })
    }

    /// Server: handle MAX_PUSH_ID from the client.
    pub fn on_max_push_id(&self, value: u64) -> Result<(), PushError> {
        {
            let mut state = self.state.lock();
            if value < state.granted_max {
                warn!(value, previous = state.granted_max, "MAX_PUSH_ID reduced");
                return Err(PushError::MaxPushIdDecreased {
                    value,
                    previous: state.granted_max,
                });
            }
            state.granted_max = value;
        }
        self.grant_changed.notify_waiters();
        Ok(())
    }

    /// Server: reserve the next push ID, waiting until the client's grant
    /// admits it.
    pub async fn allocate_push_id(&self) -> Result<u64, PushError> {
        loop {
            let notified = self.grant_changed.notified();
            {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(PushError::Closed);
                }
                if state.next_push_id < state.granted_max {
                    let push_id = state.next_push_id;
                    state.next_push_id += 1;
                    trace!(push_id, "push ID allocated");
                    return Ok(push_id);
                }
            }
            notified.await;
        }
    }

    /// Fail pending and future allocations.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.grant_changed.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with_grant(bound: u64) -> PushManager {
        let manager = PushManager::new();
        manager.grant_max_push_id(bound);
        manager
    }

    #[test]
    fn test_promise_then_additional() {
        let manager = manager_with_grant(10);
        let mut rx = manager.subscribe(1);
        let headers = Bytes::from_static(b"\x00\x00\xd1");

        let first = manager
            .register_promise(PushIdRequest::Id(3), headers.clone(), 1)
            .unwrap();
        assert_eq!(first, PromiseOutcome::New(3));
        let again = manager
            .register_promise(PushIdRequest::Id(3), headers.clone(), 1)
            .unwrap();
        assert_eq!(again, PromiseOutcome::Additional(3));

        assert_eq!(
            rx.try_recv().unwrap(),
            PushEvent::Promise {
                push_id: 3,
                headers
            }
        );
        assert_eq!(rx.try_recv().unwrap(), PushEvent::AdditionalPromise { push_id: 3 });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_header_mismatch_message() {
        let manager = manager_with_grant(10);
        manager
            .register_promise(PushIdRequest::Id(2), Bytes::from_static(b"a"), 1)
            .unwrap();
        let err = manager
            .register_promise(PushIdRequest::Id(2), Bytes::from_static(b"b"), 2)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "push headers do not match with previous promise for 2"
        );
        assert_eq!(err.error_code(), ErrorCode::GeneralProtocolError);
    }

    #[test]
    fn test_push_stream_used_once() {
        let manager = manager_with_grant(10);
        manager
            .register_promise(PushIdRequest::Id(0), Bytes::from_static(b"h"), 1)
            .unwrap();
        assert_eq!(
            manager.register_push_stream(0, StreamId(3)).unwrap(),
            PushStreamOutcome::Delivered
        );
        let err = manager.register_push_stream(0, StreamId(7)).unwrap_err();
        assert_eq!(err.to_string(), "pushId 0 already used on this connection");
        assert_eq!(err.error_code(), ErrorCode::IdError);
    }

    #[test]
    fn test_grant_is_exclusive() {
        let manager = manager_with_grant(5);
        assert!(manager.validate_against_grant(4).is_ok());
        let err = manager.validate_against_grant(5).unwrap_err();
        assert_eq!(err.to_string(), "Max pushId exceeded (5 >= 5)");
        assert_eq!(Error::from(err).code(), ErrorCode::IdError);
    }

    #[test]
    fn test_allocate_assigns_next_id() {
        let manager = manager_with_grant(10);
        let headers = Bytes::from_static(b"h");
        let a = manager
            .register_promise(PushIdRequest::Allocate, headers.clone(), 1)
            .unwrap();
        let b = manager
            .register_promise(PushIdRequest::Allocate, headers, 1)
            .unwrap();
        assert_eq!(a.push_id(), 0);
        assert_eq!(b.push_id(), 1);
        assert_eq!(manager.highest_used(), Some(1));
    }

    #[test]
    fn test_goaway_must_not_increase() {
        let manager = PushManager::new();
        manager.record_goaway(8).unwrap();
        manager.record_goaway(4).unwrap();
        manager.record_goaway(4).unwrap();
        let err = manager.record_goaway(5).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::IdError);
        assert_eq!(manager.last_goaway(), Some(4));
    }

    #[test]
    fn test_released_ids_compact() {
        let manager = manager_with_grant(1000);
        for push_id in 0..1000 {
            manager
                .register_promise(PushIdRequest::Allocate, Bytes::from_static(b"h"), 0)
                .unwrap();
            manager.register_push_stream(push_id, StreamId(3 + 4 * push_id)).unwrap();
            if push_id % 3 == 0 {
                assert!(manager.cancel(push_id));
            } else {
                assert!(manager.complete(push_id));
            }
        }

        let state = manager.state.lock();
        assert!(state.promises.is_empty());
        assert_eq!(state.released.below, 1000);
        assert!(state.released.above.is_empty());
        assert_eq!(state.cancelled.len(), 334);
    }

    #[test]
    fn test_id_set_out_of_order() {
        let mut set = PushIdSet::default();
        set.insert(2);
        set.insert(0);
        assert!(set.contains(0) && set.contains(2) && !set.contains(1));
        assert_eq!(set.below, 1);
        set.insert(1);
        assert_eq!(set.below, 3);
        assert!(set.above.is_empty());
    }

    #[test]
    fn test_grant_never_decreases() {
        let manager = PushManager::new();
        assert_eq!(
            manager.grant_max_push_id(4),
            Some(Frame::MaxPushId { push_id: 4 })
        );
        assert_eq!(manager.grant_max_push_id(2), None);
        assert_eq!(manager.granted_max(), 4);

        manager.on_max_push_id(6).unwrap();
        let err = manager.on_max_push_id(3).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::IdError);
    }
}
