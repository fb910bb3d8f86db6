//! Tilt/position orchestrator.
//!
//! Owns a cover's [`VirtualCoverState`] and turns requests into a sequence of
//! phases. The real motor is shared between slats and travel: driving it in a
//! direction first swings the slats to that side, then moves the cover. A
//! combined request therefore runs as
//!
//! ```text
//! PRE_TILT (slats to the travel side) -> MOVING -> POST_TILT (slats to target) -> IDLE
//! ```
//!
//! Nothing here sleeps or awaits. The scheduler calls [`Orchestrator::tick`]
//! with the current instant and gets back how long it may wait before the
//! next call.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::command::DispatchError;
use super::command::MotorCommand;
use super::command::MotorCommandSink;
use super::error::CoverError;
use super::motion::Axis;
use super::motion::Travel;
use super::state::CoverSnapshot;
use super::state::Direction;
use super::state::Phase;
use super::state::Target;
use super::state::VirtualCoverState;

/// Differences below this are treated as "already there".
const EPSILON: f64 = 1e-6;

/// How tilt is derived for requests that only name a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TiltPolicy {
    /// Tilt phases run only when a tilt is requested.
    #[default]
    Explicit,
    /// A position-only request implies slats at the travel side: closed when
    /// travelling down, open otherwise.
    FollowTravel,
}

/// Immutable per-cover parameters.
#[derive(Debug, Clone)]
pub struct CoverSettings {
    pub cover_id: String,
    pub name: String,
    pub real_entity_id: String,
    pub unique_id: String,
    pub position_axis: Axis,
    pub tilt_axis: Axis,
    pub tick_interval: Duration,
    pub tolerance: f64,
    pub tilt_policy: TiltPolicy,
    pub trace_ticks: bool,
}

/// When the scheduler should call [`Orchestrator::tick`] again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub next: Option<Duration>,
}

impl Tick {
    /// Nothing in flight; no tick needed until the next request.
    pub const IDLE: Tick = Tick { next: None };

    fn after(delay: Duration) -> Self {
        Tick { next: Some(delay) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AxisKind {
    Position,
    Tilt,
}

#[derive(Debug, Clone, Copy)]
struct Step {
    phase: Phase,
    axis: AxisKind,
    target: f64,
}

impl Step {
    fn new(phase: Phase, target: f64) -> Self {
        let axis = match phase {
            Phase::Moving => AxisKind::Position,
            _ => AxisKind::Tilt,
        };
        Self {
            phase,
            axis,
            target,
        }
    }
}

/// The phase currently driving the motor.
#[derive(Debug, Clone, Copy)]
struct PhaseRun {
    step: Step,
    from: f64,
    travel: Travel,
    started_at: Instant,
    duration: Duration,
}

impl PhaseRun {
    /// Keep an estimate between the phase's start value and its target.
    fn within_span(&self, value: f64) -> f64 {
        let (low, high) = if self.from <= self.step.target {
            (self.from, self.step.target)
        } else {
            (self.step.target, self.from)
        };
        value.clamp(low, high)
    }

    /// The phase is over once its nominal time has run out, the estimate is
    /// within `tolerance` of the target, or the estimate has gone past it.
    fn is_reached(&self, elapsed: Duration, estimate: f64, tolerance: f64) -> bool {
        let target = self.step.target;
        let crossed = self.travel.sign() * (estimate - target) >= 0.0;
        elapsed >= self.duration || (target - estimate).abs() <= tolerance || crossed
    }
}

/// Per-cover state machine.
pub struct Orchestrator<S> {
    settings: CoverSettings,
    state: VirtualCoverState,
    sink: S,
    /// Last command the real cover accepted. `None` until the first command
    /// and after a failed dispatch, when the real state is unknown.
    motor: Option<MotorCommand>,
    run: Option<PhaseRun>,
    steps: VecDeque<Step>,
}

impl<S: MotorCommandSink> Orchestrator<S> {
    pub fn new(settings: CoverSettings, sink: S, position: f64, tilt: f64, now: Instant) -> Self {
        info!(
            "[{}] virtual cover for {} (travel {:?}, tilt {:?}, policy {}) at position {:.1}, tilt {:.1}",
            settings.cover_id,
            settings.real_entity_id,
            settings.position_axis.full_travel(),
            settings.tilt_axis.full_travel(),
            settings.tilt_policy,
            position,
            tilt
        );
        Self {
            settings,
            state: VirtualCoverState::new(position, tilt, now),
            sink,
            motor: None,
            run: None,
            steps: VecDeque::new(),
        }
    }

    pub fn settings(&self) -> &CoverSettings {
        &self.settings
    }

    pub fn state(&self) -> &VirtualCoverState {
        &self.state
    }

    pub fn snapshot(&self) -> CoverSnapshot {
        CoverSnapshot {
            cover_id: self.settings.cover_id.clone(),
            name: self.settings.name.clone(),
            real_entity_id: self.settings.real_entity_id.clone(),
            position: self.state.position,
            tilt: self.state.tilt,
            is_moving: self.state.is_moving,
            is_closed: self.state.position.round() == 0.0,
            direction: self.state.direction,
            phase: self.state.phase,
            pending_target: self.state.pending_target,
            revision: self.state.revision,
            fault: self.state.fault.clone(),
        }
    }

    /// Drive the cover toward a position and/or tilt.
    ///
    /// Anything in flight is stopped and frozen at its current estimate first;
    /// the new plan starts from there.
    pub fn set_position_and_tilt(
        &mut self,
        now: Instant,
        position: Option<f64>,
        tilt: Option<f64>,
    ) -> Result<Tick, CoverError> {
        CoverError::check_range("position", position)?;
        CoverError::check_range("tilt", tilt)?;

        let target = Target::new(position, tilt);
        if target.is_empty() {
            debug!("[{}] empty request ignored", self.settings.cover_id);
            return Ok(self.schedule(now));
        }

        debug!(
            "[{}] request position={:?} tilt={:?}",
            self.settings.cover_id, position, tilt
        );

        if self.state.fault.take().is_some() {
            self.state.bump();
        }
        if let Err(e) = self.preempt(now) {
            return Ok(self.fail(now, e));
        }

        let target = self.apply_policy(target);
        self.steps = self.plan(&target);
        self.state.pending_target = Some(target);
        self.state.bump();

        Ok(self.advance(now))
    }

    pub fn set_position(&mut self, now: Instant, position: f64) -> Result<Tick, CoverError> {
        self.set_position_and_tilt(now, Some(position), None)
    }

    pub fn set_tilt(&mut self, now: Instant, tilt: f64) -> Result<Tick, CoverError> {
        self.set_position_and_tilt(now, None, Some(tilt))
    }

    /// Fully open, slats open.
    pub fn open(&mut self, now: Instant) -> Tick {
        self.set_position_and_tilt(now, Some(100.0), Some(100.0))
            .unwrap_or(Tick::IDLE)
    }

    /// Fully closed, slats closed.
    pub fn close(&mut self, now: Instant) -> Tick {
        self.set_position_and_tilt(now, Some(0.0), Some(0.0))
            .unwrap_or(Tick::IDLE)
    }

    /// Stop wherever the cover is. Safe to call any number of times.
    pub fn stop(&mut self, now: Instant) -> Tick {
        let was_running = self.run.is_some();
        if let Err(e) = self.preempt(now) {
            return self.fail(now, e);
        }
        let tick = self.finish(now);
        if was_running {
            info!(
                "[{}] stopped at position {:.1}, tilt {:.1}",
                self.settings.cover_id, self.state.position, self.state.tilt
            );
        }
        tick
    }

    /// Recompute the active axis from elapsed time and move the pipeline on
    /// once the phase target is reached.
    pub fn tick(&mut self, now: Instant) -> Tick {
        let Some(run) = self.run else {
            return Tick::IDLE;
        };

        let elapsed = now.saturating_duration_since(run.started_at);
        let estimate = self.axis(run.step.axis).estimate(elapsed, run.from, run.travel);
        let target = run.step.target;

        let reached = run.is_reached(elapsed, estimate, self.settings.tolerance);

        let before = self.axis_value(run.step.axis);
        let value = if reached { target } else { estimate };
        self.set_axis_value(run.step.axis, value);
        self.state.last_update = now;
        self.state.bump();

        if self.settings.trace_ticks {
            debug!(
                "[{}] tick {} {:?}: {:.3} -> {:.3} (target {:.3}, elapsed {:?} of {:?})",
                self.settings.cover_id,
                run.step.phase,
                run.step.axis,
                before,
                value,
                target,
                elapsed,
                run.duration
            );
        }

        if reached {
            debug!(
                "[{}] {} reached {:.1} after {:?}",
                self.settings.cover_id, run.step.phase, target, elapsed
            );
            self.run = None;
            return self.advance(now);
        }

        Tick::after((run.duration - elapsed).min(self.settings.tick_interval))
    }

    /// Time until the active phase needs attention, without changing anything.
    fn schedule(&self, now: Instant) -> Tick {
        match self.run {
            Some(run) => {
                let remaining = run
                    .duration
                    .saturating_sub(now.saturating_duration_since(run.started_at));
                Tick::after(remaining.min(self.settings.tick_interval))
            }
            None => Tick::IDLE,
        }
    }

    fn apply_policy(&self, target: Target) -> Target {
        match (self.settings.tilt_policy, target.position, target.tilt) {
            (TiltPolicy::FollowTravel, Some(position), None) => {
                let tilt = if position < self.state.position { 0.0 } else { 100.0 };
                debug!(
                    "[{}] tilt {:.0} implied by travel to {:.1}",
                    self.settings.cover_id, tilt, position
                );
                Target::new(Some(position), Some(tilt))
            }
            _ => target,
        }
    }

    fn plan(&self, target: &Target) -> VecDeque<Step> {
        let position_change = target
            .position
            .filter(|p| (p - self.state.position).abs() > EPSILON);

        let steps = match (position_change, target.tilt) {
            (None, None) => vec![],
            // Tilt only: the pre-tilt phase lands directly on the final tilt.
            (None, Some(tilt)) => vec![Step::new(Phase::PreTilt, tilt)],
            (Some(position), None) => vec![Step::new(Phase::Moving, position)],
            (Some(position), Some(tilt)) => {
                let extreme = Travel::toward(self.state.position, position).extreme();
                let mut steps = vec![
                    Step::new(Phase::PreTilt, extreme),
                    Step::new(Phase::Moving, position),
                ];
                if (tilt - extreme).abs() > EPSILON {
                    steps.push(Step::new(Phase::PostTilt, tilt));
                }
                steps
            }
        };

        debug!(
            "[{}] plan: {}",
            self.settings.cover_id,
            steps
                .iter()
                .map(|s| format!("{}({:.1})", s.phase, s.target))
                .collect::<Vec<_>>()
                .join(" -> ")
        );

        steps.into()
    }

    /// Start the next step that actually needs motion, or settle at idle.
    fn advance(&mut self, now: Instant) -> Tick {
        while let Some(step) = self.steps.pop_front() {
            let from = self.axis_value(step.axis);
            if (step.target - from).abs() <= EPSILON {
                debug!(
                    "[{}] {} skipped, already at {:.1}",
                    self.settings.cover_id, step.phase, from
                );
                continue;
            }

            let travel = Travel::toward(from, step.target);
            if let Err(e) = self.drive(travel) {
                return self.fail(now, e);
            }

            let duration = self.axis(step.axis).travel_time(step.target - from);
            self.run = Some(PhaseRun {
                step,
                from,
                travel,
                started_at: now,
                duration,
            });
            self.state.phase = step.phase;
            self.state.is_moving = true;
            self.state.direction = Direction::from(travel);
            self.state.last_update = now;
            self.state.bump();

            debug!(
                "[{}] {} {} from {:.1} to {:.1} over {:?}",
                self.settings.cover_id, step.phase, travel, from, step.target, duration
            );

            return Tick::after(duration.min(self.settings.tick_interval));
        }

        self.finish(now)
    }

    /// Freeze whatever phase is running at its current estimate and stop the
    /// motor. Does nothing when idle.
    fn preempt(&mut self, now: Instant) -> Result<(), DispatchError> {
        let Some(run) = self.run.take() else {
            return Ok(());
        };

        let elapsed = now.saturating_duration_since(run.started_at);
        let estimate = self.axis(run.step.axis).estimate(elapsed, run.from, run.travel);
        let frozen = run.within_span(estimate);
        self.set_axis_value(run.step.axis, frozen);

        debug!(
            "[{}] {} interrupted at {:.2} ({:?} into {:?})",
            self.settings.cover_id, run.step.phase, frozen, elapsed, run.duration
        );

        self.steps.clear();
        self.state.pending_target = None;
        self.state.phase = Phase::Idle;
        self.state.is_moving = false;
        self.state.direction = Direction::Idle;
        self.state.last_update = now;
        self.state.bump();

        self.halt()
    }

    /// Stop the motor and go idle.
    fn finish(&mut self, now: Instant) -> Tick {
        let was_active = self.state.is_moving || self.state.pending_target.is_some();
        self.run = None;
        self.steps.clear();

        if let Err(e) = self.halt() {
            return self.fail(now, e);
        }

        if was_active {
            self.state.phase = Phase::Idle;
            self.state.is_moving = false;
            self.state.direction = Direction::Idle;
            self.state.pending_target = None;
            self.state.last_update = now;
            self.state.bump();
            info!(
                "[{}] settled at position {:.1}, tilt {:.1}",
                self.settings.cover_id, self.state.position, self.state.tilt
            );
        }

        Tick::IDLE
    }

    /// Abandon the pipeline after the real cover did not get a command.
    ///
    /// The state stays frozen where it is: estimating motion for a command
    /// that never reached the hardware would drift from reality for good.
    fn fail(&mut self, now: Instant, error: DispatchError) -> Tick {
        warn!(
            "[{}] motor command failed, halting: {}",
            self.settings.cover_id, error
        );
        self.run = None;
        self.steps.clear();
        self.state.pending_target = None;
        self.state.phase = Phase::Idle;
        self.state.is_moving = false;
        self.state.direction = Direction::Idle;
        self.state.fault = Some(error.to_string());
        self.state.last_update = now;
        self.state.bump();
        Tick::IDLE
    }

    fn halt(&mut self) -> Result<(), DispatchError> {
        if self.motor == Some(MotorCommand::Stop) {
            return Ok(());
        }
        self.dispatch(MotorCommand::Stop)
    }

    /// Run the motor in `travel`, reusing the current command when it already
    /// points that way. Reversals stop first.
    fn drive(&mut self, travel: Travel) -> Result<(), DispatchError> {
        let command = match travel {
            Travel::Opening => MotorCommand::Open,
            Travel::Closing => MotorCommand::Close,
        };

        match self.motor {
            Some(current) if current == command => {
                debug!("[{}] motor keeps {}", self.settings.cover_id, command);
                Ok(())
            }
            Some(MotorCommand::Open) | Some(MotorCommand::Close) => {
                self.dispatch(MotorCommand::Stop)?;
                self.dispatch(command)
            }
            _ => self.dispatch(command),
        }
    }

    fn dispatch(&mut self, command: MotorCommand) -> Result<(), DispatchError> {
        debug!(
            "[{}] -> {} {}",
            self.settings.cover_id,
            self.sink.entity_id(),
            command
        );
        match self.sink.send(command) {
            Ok(()) => {
                self.motor = Some(command);
                Ok(())
            }
            Err(e) => {
                self.motor = None;
                Err(e)
            }
        }
    }

    fn axis(&self, kind: AxisKind) -> &Axis {
        match kind {
            AxisKind::Position => &self.settings.position_axis,
            AxisKind::Tilt => &self.settings.tilt_axis,
        }
    }

    fn axis_value(&self, kind: AxisKind) -> f64 {
        match kind {
            AxisKind::Position => self.state.position,
            AxisKind::Tilt => self.state.tilt,
        }
    }

    fn set_axis_value(&mut self, kind: AxisKind, value: f64) {
        let value = super::motion::clamp(value);
        match kind {
            AxisKind::Position => self.state.position = value,
            AxisKind::Tilt => self.state.tilt = value,
        }
    }
}
