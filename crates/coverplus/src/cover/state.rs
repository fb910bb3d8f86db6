use serde::Deserialize;
use serde::Serialize;
use tokio::time::Instant;

use super::motion::Travel;

/// Pipeline phase of a virtual cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    PreTilt,
    Moving,
    PostTilt,
}

/// Direction the virtual cover is currently being driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    Opening,
    Closing,
    #[default]
    Idle,
}

impl From<Travel> for Direction {
    fn from(travel: Travel) -> Self {
        match travel {
            Travel::Opening => Direction::Opening,
            Travel::Closing => Direction::Closing,
        }
    }
}

/// A requested position and/or tilt. `None` leaves that axis alone.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Target {
    pub position: Option<f64>,
    pub tilt: Option<f64>,
}

impl Target {
    pub fn new(position: Option<f64>, tilt: Option<f64>) -> Self {
        Self { position, tilt }
    }

    pub fn is_empty(&self) -> bool {
        self.position.is_none() && self.tilt.is_none()
    }
}

/// Authoritative in-memory model of one cover.
///
/// Only the orchestrator writes to it. `revision` is bumped on every
/// observable change so readers can tell snapshots apart.
#[derive(Debug, Clone)]
pub struct VirtualCoverState {
    pub position: f64,
    pub tilt: f64,
    pub is_moving: bool,
    pub direction: Direction,
    pub last_update: Instant,
    pub pending_target: Option<Target>,
    pub phase: Phase,
    pub revision: u64,
    /// Last hardware dispatch failure, cleared by the next accepted request.
    pub fault: Option<String>,
}

impl VirtualCoverState {
    pub fn new(position: f64, tilt: f64, now: Instant) -> Self {
        Self {
            position,
            tilt,
            is_moving: false,
            direction: Direction::Idle,
            last_update: now,
            pending_target: None,
            phase: Phase::Idle,
            revision: 0,
            fault: None,
        }
    }

    pub fn bump(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }
}

/// Read-only view handed to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverSnapshot {
    pub cover_id: String,
    pub name: String,
    pub real_entity_id: String,
    pub position: f64,
    pub tilt: f64,
    pub is_moving: bool,
    pub is_closed: bool,
    pub direction: Direction,
    pub phase: Phase,
    pub pending_target: Option<Target>,
    pub revision: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}

impl CoverSnapshot {
    /// Position rounded the way the cover reports it to users
    pub fn current_position(&self) -> u8 {
        self.position.round() as u8
    }
}
