//! Turn-taking state machine for two-party conversation rooms.
//!
//! Arbitrates who holds the conversational "floor", keeps the floor reserved
//! for a short grace period after an utterance ends, and applies timed echo
//! lockouts after TTS playback so the speaker's own output doesn't re-enter
//! the pipeline as new speech.
//!
//! Grace periods are asymmetric: the room creator (role A) tends to produce
//! long, multi-part utterances with natural pauses, while the joiner (role B)
//! gives shorter replies, so A defaults to a longer pause allowance.
//!
//! Grace expiry is evaluated lazily on every public call; no timer task is
//! needed for correctness.

use std::time::{Duration, Instant};

use serde::Serialize;

/// The two fixed conversation roles: `A` is the room creator, `B` the joiner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    A,
    B,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::A => "a",
            Role::B => "b",
        }
    }

    pub fn other(self) -> Role {
        match self {
            Role::A => Role::B,
            Role::B => Role::A,
        }
    }

    fn index(self) -> usize {
        match self {
            Role::A => 0,
            Role::B => 1,
        }
    }
}

/// Observable state of the conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FloorState {
    Idle,
    ASpeaking,
    AProcessing,
    BSpeaking,
    BProcessing,
}

impl FloorState {
    fn speaking(role: Role) -> Self {
        match role {
            Role::A => FloorState::ASpeaking,
            Role::B => FloorState::BSpeaking,
        }
    }

    fn processing(role: Role) -> Self {
        match role {
            Role::A => FloorState::AProcessing,
            Role::B => FloorState::BProcessing,
        }
    }
}

/// Diagnostic snapshot for logging and the `/rooms` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct TurnStatus {
    pub state: FloorState,
    pub floor_holder: Option<Role>,
    pub a_locked: bool,
    pub b_locked: bool,
    pub a_lock_remaining_ms: u64,
    pub b_lock_remaining_ms: u64,
}

/// Floor arbitration and echo suppression for one room.
///
/// All operations are O(1); the room wraps this in a single mutex, which is
/// the only cross-participant synchronization in the system.
pub struct TurnController {
    lockout_buffer: Duration,
    grace: [Duration; 2],
    state: FloorState,
    floor_holder: Option<Role>,
    lockout: [Option<Instant>; 2],
    grace_expiry: Option<Instant>,
}

impl TurnController {
    pub fn new(lockout_buffer_ms: u64, grace_a_ms: u64, grace_b_ms: u64) -> Self {
        Self {
            lockout_buffer: Duration::from_millis(lockout_buffer_ms),
            grace: [
                Duration::from_millis(grace_a_ms),
                Duration::from_millis(grace_b_ms),
            ],
            state: FloorState::Idle,
            floor_holder: None,
            lockout: [None, None],
            grace_expiry: None,
        }
    }

    /// Releases the floor if the grace window has passed.
    fn check_grace(&mut self) {
        if self.floor_holder.is_some()
            && self
                .grace_expiry
                .is_some_and(|expiry| Instant::now() >= expiry)
        {
            self.floor_holder = None;
            self.grace_expiry = None;
            self.state = FloorState::Idle;
        }
    }

    /// True while `role`'s mic is echo-locked.
    pub fn is_locked(&self, role: Role) -> bool {
        self.lockout[role.index()].is_some_and(|until| Instant::now() < until)
    }

    /// True while `role` owns the floor (including its grace window).
    pub fn holds_floor(&mut self, role: Role) -> bool {
        self.check_grace();
        self.floor_holder == Some(role)
    }

    /// Called on `speech_start`. Grants or re-confirms the floor.
    ///
    /// Returns false when `role` is echo-locked or the other role holds the
    /// floor; the caller drops the event in that case.
    pub fn try_speech_start(&mut self, role: Role) -> bool {
        self.check_grace();

        if self.is_locked(role) {
            return false;
        }

        match self.floor_holder {
            None => {
                self.floor_holder = Some(role);
                self.grace_expiry = None;
                self.state = FloorState::speaking(role);
                true
            }
            Some(holder) if holder == role => {
                // Same speaker resumed within grace
                self.grace_expiry = None;
                self.state = FloorState::speaking(role);
                true
            }
            Some(_) => false,
        }
    }

    /// Called on `speech_end`. Starts the role's grace window.
    ///
    /// Returns false when `role` was not the active speaker (stale event).
    pub fn on_speech_end(&mut self, role: Role) -> bool {
        if self.floor_holder != Some(role) {
            return false;
        }
        self.state = FloorState::processing(role);
        self.grace_expiry = Some(Instant::now() + self.grace[role.index()]);
        true
    }

    /// Echo-locks `role`'s mic for the TTS duration plus the configured
    /// buffer. No-op on the current floor holder — the active speaker is
    /// never muted by their partner's playback.
    ///
    /// Returns the total applied lockout in milliseconds, or `None` when the
    /// lock was skipped.
    pub fn lock_user(&mut self, role: Role, tts_duration_ms: u64) -> Option<u64> {
        if self.floor_holder == Some(role) {
            return None;
        }
        let total = Duration::from_millis(tts_duration_ms) + self.lockout_buffer;
        self.lockout[role.index()] = Some(Instant::now() + total);
        Some(total.as_millis() as u64)
    }

    /// Barge-in: clears `role`'s lockout and hands them the floor
    /// immediately, so the VAD events already in flight for them are
    /// accepted and routed.
    pub fn on_interrupt(&mut self, role: Role) {
        self.lockout[role.index()] = None;
        self.floor_holder = Some(role);
        self.grace_expiry = None;
        self.state = FloorState::speaking(role);
    }

    pub fn status(&mut self) -> TurnStatus {
        self.check_grace();
        let now = Instant::now();
        let remaining = |slot: Option<Instant>| {
            slot.and_then(|until| until.checked_duration_since(now))
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0)
        };
        TurnStatus {
            state: self.state,
            floor_holder: self.floor_holder,
            a_locked: self.is_locked(Role::A),
            b_locked: self.is_locked(Role::B),
            a_lock_remaining_ms: remaining(self.lockout[0]),
            b_lock_remaining_ms: remaining(self.lockout[1]),
        }
    }
}
