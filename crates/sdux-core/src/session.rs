//! Session types for the logged-in desktop run.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a desktop session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle phase of a session.
///
/// Phases only move forward, except `Locked ↔ Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum SessionPhase {
    /// Shell is starting; connections are up, autostart is running
    Starting,
    /// Session is active and unlocked
    Active,
    /// Screen is locked
    Locked,
    /// Logout (or a fatal error) has begun tearing the session down
    EndingRequested,
    /// Session is over
    Ended,
}

impl SessionPhase {
    fn rank(self) -> u8 {
        match self {
            SessionPhase::Starting => 0,
            SessionPhase::Active | SessionPhase::Locked => 1,
            SessionPhase::EndingRequested => 2,
            SessionPhase::Ended => 3,
        }
    }

    /// Check whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        match (self, next) {
            (Active, Locked) | (Locked, Active) => true,
            (Starting, Locked) => false,
            _ => next.rank() > self.rank(),
        }
    }

    /// Whether teardown has started.
    pub fn is_ending(self) -> bool {
        matches!(self, SessionPhase::EndingRequested | SessionPhase::Ended)
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionPhase::Starting => "starting",
            SessionPhase::Active => "active",
            SessionPhase::Locked => "locked",
            SessionPhase::EndingRequested => "ending-requested",
            SessionPhase::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// One logged-in desktop run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Session {
    /// Session identifier
    pub id: SessionId,
    /// Current phase
    pub phase: SessionPhase,
    /// When the shell started
    pub started_at: DateTime<Utc>,
}

impl Session {
    /// Create a session in the `Starting` phase.
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            phase: SessionPhase::Starting,
            started_at: Utc::now(),
        }
    }

    /// Move to `next` if the transition is legal.
    ///
    /// Returns the previous phase on success. Re-entering the current phase is
    /// reported as `None` without changing anything.
    pub fn transition(&mut self, next: SessionPhase) -> Option<SessionPhase> {
        if self.phase == next || !self.phase.can_transition_to(next) {
            return None;
        }
        let previous = self.phase;
        self.phase = next;
        Some(previous)
    }
}
