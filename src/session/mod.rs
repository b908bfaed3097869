//! The rendezvous primitive pairing two clients under one session id.
//!
//! Protocol rules:
//! - The first request for a new session becomes Side A (handshake). Its
//!   utterance is discarded.
//! - The second request becomes Side B; its utterance completes A's
//!   handshake and is returned as A's response.
//! - Thereafter each request delivers its utterance to the peer and waits
//!   for the peer's next utterance in return.
//!
//! Each direction has a single-slot rendezvous: a pending waiter (a
//! `oneshot` sender the peer resolves) plus a one-deep inbox for an
//! utterance delivered while no receiver was suspended. A side never has
//! more than one request in flight, and a deposit into a full inbox is a
//! conflict.

mod manager;

pub use manager::{ManagerConfig, SessionInfo, SessionManager};

// std::sync::Mutex is correct here—lock is never held across .await points.
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::error::ProxyError;

/// Why a session was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Side B never arrived within the handshake budget.
    HandshakeTimeout,
    /// Idle longer than the session TTL.
    TtlExpired,
    /// Removed to admit a new session at capacity.
    Evicted,
    /// Closed through the admin surface.
    AdminClosed,
    /// Server shutting down.
    Shutdown,
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Created, no request seen yet.
    Empty,
    /// Side A suspended, waiting for Side B to arrive.
    AwaitingPeer,
    /// Both sides assigned.
    Active,
    /// Terminal. Never transitions out.
    Closed,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Empty => "empty",
            Lifecycle::AwaitingPeer => "awaiting_peer",
            Lifecycle::Active => "active",
            Lifecycle::Closed => "closed",
        }
    }
}

/// Participant slot. A is whichever client's request is accepted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    A,
    B,
}

/// What a suspended caller is woken with.
#[derive(Debug)]
enum Wake {
    Delivered(String),
    Closed(CloseReason),
}

/// Per-direction rendezvous state: deliveries destined *for* one side.
#[derive(Default, Debug)]
struct SideSlot {
    /// Sender half of the suspended receive, if one is in flight.
    waiter: Option<oneshot::Sender<Wake>>,
    /// One-deep buffer for an utterance delivered while nobody waited.
    inbox: Option<String>,
}

impl SideSlot {
    /// A waiter whose receiver has gone away (caller cancelled or timed
    /// out) no longer counts.
    fn drop_stale_waiter(&mut self) {
        if self.waiter.as_ref().is_some_and(|w| w.is_closed()) {
            self.waiter = None;
        }
    }
}

#[derive(Debug)]
struct Inner {
    lifecycle: Lifecycle,
    a_present: bool,
    b_present: bool,
    /// True while an `exchange` call assigned to that side has not yet
    /// returned. This is what makes a third concurrent request
    /// detectable: both flags set means both participant slots are busy.
    in_flight_a: bool,
    in_flight_b: bool,
    slot_a: SideSlot,
    slot_b: SideSlot,
    closed_reason: Option<CloseReason>,
    last_activity: Instant,
}

impl Inner {
    fn slot_mut(&mut self, side: Side) -> &mut SideSlot {
        match side {
            Side::A => &mut self.slot_a,
            Side::B => &mut self.slot_b,
        }
    }

    fn set_in_flight(&mut self, side: Side, value: bool) {
        match side {
            Side::A => self.in_flight_a = value,
            Side::B => self.in_flight_b = value,
        }
    }
}

/// Clears the caller's in-flight flag when its `exchange` returns or its
/// future is dropped (client disconnect). Also sweeps the waiter the
/// caller may have left behind.
struct InFlightGuard {
    inner: Arc<Mutex<Inner>>,
    side: Side,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        inner.set_in_flight(self.side, false);
        inner.slot_mut(self.side).drop_stale_waiter();
    }
}

/// Which budget governs a suspended receive.
#[derive(Clone, Copy, PartialEq, Eq)]
enum BudgetKind {
    Handshake,
    Turn,
}

/// Outcome of the locked half of an exchange.
enum TurnWait {
    /// The peer had already deposited; no suspension needed.
    Ready(String),
    /// Suspend on the receiver under the given budget.
    Wait(oneshot::Receiver<Wake>, BudgetKind, InFlightGuard),
}

/// One paired conversation.
#[derive(Debug)]
pub struct Session {
    id: String,
    handshake_budget: Duration,
    turn_budget: Duration,
    created_at: Instant,
    inner: Arc<Mutex<Inner>>,
}

impl Session {
    pub fn new(id: impl Into<String>, handshake_budget: Duration, turn_budget: Duration) -> Self {
        let now = Instant::now();
        Self {
            id: id.into(),
            handshake_budget,
            turn_budget,
            created_at: now,
            inner: Arc::new(Mutex::new(Inner {
                lifecycle: Lifecycle::Empty,
                a_present: false,
                b_present: false,
                in_flight_a: false,
                in_flight_b: false,
                slot_a: SideSlot::default(),
                slot_b: SideSlot::default(),
                closed_reason: None,
                last_activity: now,
            })),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// One atomic half-turn: deliver the caller's utterance to the peer
    /// side and wait for the peer's utterance to return as this request's
    /// response.
    ///
    /// The very first call on a new session is the handshake: the caller
    /// becomes Side A and its utterance is discarded. Dropping the
    /// returned future (client disconnect) detaches the waiter without
    /// corrupting queue state.
    pub async fn exchange(&self, utterance: &str) -> Result<String, ProxyError> {
        let (rx, kind, _guard) = match self.begin_turn(utterance)? {
            TurnWait::Ready(reply) => {
                self.touch();
                return Ok(reply);
            }
            TurnWait::Wait(rx, kind, guard) => (rx, kind, guard),
        };

        let budget = match kind {
            BudgetKind::Handshake => self.handshake_budget,
            BudgetKind::Turn => self.turn_budget,
        };

        match tokio::time::timeout(budget, rx).await {
            Ok(Ok(Wake::Delivered(reply))) => {
                self.touch();
                Ok(reply)
            }
            Ok(Ok(Wake::Closed(reason))) => Err(close_error(reason)),
            // Sender dropped without a wake: the session vanished mid-wait.
            Ok(Err(_)) => Err(ProxyError::gone(
                "session_closed",
                format!("session '{}' closed while waiting", self.id),
            )),
            Err(_elapsed) => self.on_wait_timeout(kind),
        }
    }

    /// Locked half of `exchange`: assign a side, deliver the utterance,
    /// and either pick up an already-buffered reply or register a waiter.
    fn begin_turn(&self, utterance: &str) -> Result<TurnWait, ProxyError> {
        let mut guard = self.inner.lock().expect("mutex poisoned");
        let inner = &mut *guard;

        if inner.lifecycle == Lifecycle::Closed {
            return Err(close_error(
                inner.closed_reason.unwrap_or(CloseReason::AdminClosed),
            ));
        }
        inner.last_activity = Instant::now();

        // First ever request: caller becomes A. The handshake ping is
        // consumed and discarded, never delivered to B.
        if !inner.a_present {
            let rx = register_waiter(&mut inner.slot_a, Side::A)?;
            inner.a_present = true;
            inner.in_flight_a = true;
            inner.lifecycle = Lifecycle::AwaitingPeer;
            debug!(session_id = %self.id, "side A assigned, awaiting peer");
            return Ok(TurnWait::Wait(
                rx,
                BudgetKind::Handshake,
                self.in_flight_guard(Side::A),
            ));
        }

        // Second unique request: caller becomes B. Its utterance completes
        // A's handshake.
        if !inner.b_present {
            deliver(&mut inner.slot_a, utterance)?;
            let rx = register_waiter(&mut inner.slot_b, Side::B)?;
            inner.b_present = true;
            inner.in_flight_b = true;
            inner.lifecycle = Lifecycle::Active;
            debug!(session_id = %self.id, "side B assigned, session active");
            return Ok(TurnWait::Wait(
                rx,
                BudgetKind::Turn,
                self.in_flight_guard(Side::B),
            ));
        }

        // Both sides assigned: recover the caller's identity, deliver,
        // then serve the receive leg.
        let side = identify_caller(inner)?;
        let (own, peer) = match side {
            Side::A => (&mut inner.slot_a, &mut inner.slot_b),
            Side::B => (&mut inner.slot_b, &mut inner.slot_a),
        };
        deliver(peer, utterance)?;
        if let Some(reply) = own.inbox.take() {
            return Ok(TurnWait::Ready(reply));
        }
        let rx = register_waiter(own, side)?;
        inner.set_in_flight(side, true);
        Ok(TurnWait::Wait(
            rx,
            BudgetKind::Turn,
            self.in_flight_guard(side),
        ))
    }

    fn in_flight_guard(&self, side: Side) -> InFlightGuard {
        InFlightGuard {
            inner: Arc::clone(&self.inner),
            side,
        }
    }

    /// Budget expired while suspended.
    ///
    /// A handshake timeout closes the whole session so the next request
    /// with this id starts fresh. A turn timeout fails only this caller;
    /// the session stays usable and any deposit the caller made earlier in
    /// the same call is not rescinded.
    fn on_wait_timeout(&self, kind: BudgetKind) -> Result<String, ProxyError> {
        if kind == BudgetKind::Handshake {
            self.close(CloseReason::HandshakeTimeout);
            return Err(ProxyError::handshake_timeout());
        }
        // The session is clearly alive even though this caller gave up.
        self.touch();
        Err(ProxyError::turn_timeout())
    }

    /// Idempotent. Wakes every suspended caller; they observe `timeout`
    /// (TTL/handshake) or `session_gone` (eviction, admin, shutdown).
    pub fn close(&self, reason: CloseReason) {
        let waiters = {
            let mut inner = self.inner.lock().expect("mutex poisoned");
            if inner.lifecycle == Lifecycle::Closed {
                return;
            }
            inner.lifecycle = Lifecycle::Closed;
            inner.closed_reason = Some(reason);
            inner.slot_a.inbox = None;
            inner.slot_b.inbox = None;
            [inner.slot_a.waiter.take(), inner.slot_b.waiter.take()]
        };
        debug!(session_id = %self.id, reason = ?reason, "session closed");
        for waiter in waiters.into_iter().flatten() {
            let _ = waiter.send(Wake::Closed(reason));
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.lock().expect("mutex poisoned").lifecycle
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle() == Lifecycle::Closed
    }

    /// Time since the last accepted request, delivery, or timeout.
    pub fn idle_for(&self) -> Duration {
        let last = self.inner.lock().expect("mutex poisoned").last_activity;
        last.elapsed()
    }

    pub fn is_idle_for(&self, duration: Duration) -> bool {
        self.idle_for() >= duration
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    fn touch(&self) {
        self.inner.lock().expect("mutex poisoned").last_activity = Instant::now();
    }
}

/// Deposit an utterance for one side: resolve its live waiter if it has
/// one, otherwise buffer. A full inbox means that side already has an
/// undelivered utterance queued, which violates the one-in-flight rule.
fn deliver(slot: &mut SideSlot, utterance: &str) -> Result<(), ProxyError> {
    slot.drop_stale_waiter();
    if let Some(waiter) = slot.waiter.take() {
        // If the receiver vanishes between the staleness sweep and this
        // send, the delivery is dropped with it: no live consumer remains.
        let _ = waiter.send(Wake::Delivered(utterance.to_string()));
        return Ok(());
    }
    if slot.inbox.is_none() {
        slot.inbox = Some(utterance.to_string());
        return Ok(());
    }
    Err(ProxyError::conflict(
        "peer already has an undelivered utterance queued",
    ))
}

/// Register a suspended receive for one side. At most one per side.
fn register_waiter(slot: &mut SideSlot, side: Side) -> Result<oneshot::Receiver<Wake>, ProxyError> {
    slot.drop_stale_waiter();
    if slot.waiter.is_some() {
        return Err(ProxyError::conflict(format!(
            "side {side:?} already has a request in flight",
        )));
    }
    let (tx, rx) = oneshot::channel();
    slot.waiter = Some(tx);
    Ok(rx)
}

/// Recover the caller's side once both sides exist.
///
/// A busy peer slot identifies the caller directly; both slots busy means
/// a third concurrent request. With neither side in flight, the caller is
/// the side whose outgoing inbox is free so its utterance can be
/// deposited; both inboxes full is again a third request.
fn identify_caller(inner: &mut Inner) -> Result<Side, ProxyError> {
    match (inner.in_flight_a, inner.in_flight_b) {
        (true, true) => Err(ProxyError::conflict(
            "both sides already have requests in flight",
        )),
        (false, true) => Ok(Side::A),
        (true, false) => Ok(Side::B),
        (false, false) => {
            if inner.slot_b.inbox.is_none() {
                Ok(Side::A)
            } else if inner.slot_a.inbox.is_none() {
                Ok(Side::B)
            } else {
                Err(ProxyError::conflict("both delivery queues are full"))
            }
        }
    }
}

fn close_error(reason: CloseReason) -> ProxyError {
    match reason {
        CloseReason::HandshakeTimeout => ProxyError::handshake_timeout(),
        CloseReason::TtlExpired => ProxyError::Timeout {
            code: "session_ttl_expired",
            message: "session expired while waiting".into(),
        },
        CloseReason::Evicted => ProxyError::gone("session_evicted", "session was evicted"),
        CloseReason::AdminClosed => ProxyError::gone("session_closed", "session was closed"),
        CloseReason::Shutdown => ProxyError::gone("server_shutdown", "server is shutting down"),
    }
}
