//! Run state of the debuggee and the stack it is paused in.
//!
//! Every transition between running and paused bumps the [`Generation`]. Results
//! of asynchronous work that was started against an older generation (scope
//! fetches, evaluations, step acknowledgements) are discarded when they arrive.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    command::{CommandEnvelope, CommandId, Generation, PauseCommand},
    error::Rejection,
    protocol::PauseNotification,
    types::{Frame, FrameId, LoadedObject, MappedScopes, Scope, Value, Why},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepKind {
    Over,
    In,
    Out,
    Resume,
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Over => "step over",
            StepKind::In => "step in",
            StepKind::Out => "step out",
            StepKind::Resume => "resume",
        }
    }
}

/// The state the debuggee reported after a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum StepOutcome {
    Running,
    Paused { why: Why },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionPolicy {
    pub should_pause: bool,
    pub should_ignore_caught: bool,
}

/// Everything known about the stack while paused.
///
/// `selected_frame_id` is always the id of one of `frames`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseSnapshot {
    pub why: Why,
    pub frames: Vec<Frame>,
    pub selected_frame_id: FrameId,
    pub scopes: BTreeMap<FrameId, Scope>,
    pub mapped_scopes: BTreeMap<FrameId, MappedScopes>,
    pub loaded_objects: BTreeMap<String, LoadedObject>,
    pub generation: Generation,
}

impl PauseSnapshot {
    pub fn frame(&self, id: &FrameId) -> Option<&Frame> {
        self.frames.iter().find(|f| &f.id == id)
    }

    pub fn selected_frame(&self) -> Option<&Frame> {
        self.frame(&self.selected_frame_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "snapshot", rename_all = "camelCase")]
pub enum PauseState {
    #[default]
    Running,
    Paused(Box<PauseSnapshot>),
}

impl PauseState {
    pub fn is_paused(&self) -> bool {
        matches!(self, PauseState::Paused(_))
    }

    pub fn snapshot(&self) -> Option<&PauseSnapshot> {
        match self {
            PauseState::Paused(snapshot) => Some(snapshot),
            PauseState::Running => None,
        }
    }
}

/// What an evaluation is bound to: the pause snapshot and the frame selected in it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalContext {
    pub generation: Generation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_id: Option<FrameId>,
}

#[derive(Debug)]
struct InFlightStep {
    envelope: CommandEnvelope<StepKind, StepOutcome>,
    issued_at: Generation,
}

/// Result of handling a pause notification
#[derive(Debug)]
pub(crate) struct Paused {
    pub(crate) generation: Generation,
    pub(crate) why: Why,
    /// The step this pause completed, if one was in flight
    pub(crate) completed_step: Option<PauseCommand>,
}

#[derive(Debug, Default)]
pub struct PauseController {
    state: PauseState,
    generation: Generation,
    waiting_on_break: bool,
    pause_on_exceptions: ExceptionPolicy,
    in_flight: Option<InFlightStep>,
    can_rewind: bool,
    history_position: Option<u64>,
}

impl PauseController {
    pub fn state(&self) -> &PauseState {
        &self.state
    }

    pub fn snapshot(&self) -> Option<&PauseSnapshot> {
        self.state.snapshot()
    }

    pub fn is_paused(&self) -> bool {
        self.state.is_paused()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn selected_frame_id(&self) -> Option<&FrameId> {
        self.snapshot().map(|s| &s.selected_frame_id)
    }

    /// True after a break-on-next request was accepted and until the next pause
    pub fn is_waiting_on_break(&self) -> bool {
        self.waiting_on_break
    }

    pub fn pause_on_exceptions(&self) -> ExceptionPolicy {
        self.pause_on_exceptions
    }

    pub fn in_flight_step(&self) -> Option<&CommandEnvelope<StepKind, StepOutcome>> {
        self.in_flight.as_ref().map(|s| &s.envelope)
    }

    pub fn can_rewind(&self) -> bool {
        self.can_rewind
    }

    pub fn history_position(&self) -> Option<u64> {
        self.history_position
    }

    pub(crate) fn eval_context(&self) -> EvalContext {
        EvalContext {
            generation: self.generation,
            frame_id: self.selected_frame_id().cloned(),
        }
    }

    pub(crate) fn set_can_rewind(&mut self, can_rewind: bool) {
        self.can_rewind = can_rewind;
    }

    fn paused_mut(&mut self) -> Result<&mut PauseSnapshot, Rejection> {
        match &mut self.state {
            PauseState::Paused(snapshot) => Ok(snapshot),
            PauseState::Running => Err(Rejection::NotPaused),
        }
    }

    /// Replace the whole snapshot with the one described by `notification`.
    ///
    /// Returns `None` when the notification carries no frames: a paused state
    /// without a selectable frame cannot exist.
    #[tracing::instrument(skip(self, notification), level = "trace")]
    pub(crate) fn on_paused(&mut self, notification: PauseNotification) -> Option<Paused> {
        let PauseNotification {
            why,
            frames,
            selected_frame_id,
            scopes,
            loaded_objects,
        } = notification;

        let Some(top) = frames.first() else {
            tracing::warn!(?why, "ignoring pause notification without frames");
            return None;
        };
        let selected_frame_id = match selected_frame_id {
            Some(id) if frames.iter().any(|f| f.id == id) => id,
            Some(id) => {
                tracing::warn!(frame_id = %id, "selected frame not in stack, selecting top frame");
                top.id.clone()
            }
            None => top.id.clone(),
        };

        self.generation = self.generation.next();
        self.waiting_on_break = false;
        self.state = PauseState::Paused(Box::new(PauseSnapshot {
            why: why.clone(),
            frames,
            selected_frame_id,
            scopes,
            mapped_scopes: BTreeMap::new(),
            loaded_objects: loaded_objects
                .into_iter()
                .map(|o| (o.object_id.clone(), o))
                .collect(),
            generation: self.generation,
        }));
        tracing::debug!(generation = ?self.generation, ?why, "paused");

        let completed_step = self.in_flight.take().map(|mut step| {
            step.envelope
                .succeed(StepOutcome::Paused { why: why.clone() });
            PauseCommand::Step(step.envelope)
        });

        Some(Paused {
            generation: self.generation,
            why,
            completed_step,
        })
    }

    /// Transition to running, returning true if the debuggee was paused
    pub(crate) fn on_resumed(&mut self) -> bool {
        if !self.state.is_paused() {
            return false;
        }
        self.generation = self.generation.next();
        self.state = PauseState::Running;
        tracing::debug!(generation = ?self.generation, "running");
        true
    }

    /// Complete an in-flight resume once the debuggee reports it is running
    pub(crate) fn complete_resume(&mut self) -> Option<PauseCommand> {
        match &self.in_flight {
            Some(step) if step.envelope.payload == StepKind::Resume => {}
            _ => return None,
        }
        let mut step = self.in_flight.take()?;
        step.envelope.succeed(StepOutcome::Running);
        Some(PauseCommand::Step(step.envelope))
    }

    #[tracing::instrument(skip(self), level = "trace")]
    pub(crate) fn begin_step(
        &mut self,
        id: CommandId,
        kind: StepKind,
    ) -> Result<CommandEnvelope<StepKind, StepOutcome>, Rejection> {
        if !self.state.is_paused() {
            return Err(Rejection::NotPaused);
        }
        if let Some(step) = &self.in_flight {
            return Err(Rejection::StepInFlight(step.envelope.payload.name()));
        }
        let envelope = CommandEnvelope::pending(id, kind);
        self.in_flight = Some(InFlightStep {
            envelope: envelope.clone(),
            issued_at: self.generation,
        });
        Ok(envelope)
    }

    /// The debuggee accepted a step: leave the paused state.
    ///
    /// A resume is complete at this point. Other steps stay pending until the
    /// debuggee pauses again. An acknowledgement that arrives after the
    /// resulting pause was already delivered changes nothing.
    pub(crate) fn step_accepted(&mut self, id: CommandId) -> Option<PauseCommand> {
        let current = self
            .in_flight
            .as_ref()
            .filter(|s| s.envelope.id == id && s.issued_at == self.generation)?;
        let kind = current.envelope.payload;

        self.on_resumed();
        if kind == StepKind::Resume {
            return self.complete_resume();
        }
        // still in flight, re-key to the running generation
        if let Some(step) = self.in_flight.as_mut() {
            step.issued_at = self.generation;
        }
        None
    }

    pub(crate) fn step_failed(&mut self, id: CommandId, message: String) -> Option<PauseCommand> {
        if self.in_flight.as_ref().map(|s| s.envelope.id) != Some(id) {
            return None;
        }
        let mut step = self.in_flight.take()?;
        step.envelope.fail(message);
        Some(PauseCommand::Step(step.envelope))
    }

    /// Select a frame of the current stack, returning true if its scopes are not loaded
    #[tracing::instrument(skip(self), level = "trace")]
    pub(crate) fn select_frame(&mut self, frame_id: &FrameId) -> Result<bool, Rejection> {
        let snapshot = self.paused_mut()?;
        if snapshot.frame(frame_id).is_none() {
            return Err(Rejection::UnknownFrame(frame_id.clone()));
        }
        snapshot.selected_frame_id = frame_id.clone();
        Ok(!snapshot.scopes.contains_key(frame_id))
    }

    /// The selected frame, if its scopes did not come with the pause
    pub(crate) fn selected_frame_without_scopes(&self) -> Option<FrameId> {
        let snapshot = self.snapshot()?;
        if snapshot.scopes.contains_key(&snapshot.selected_frame_id) {
            return None;
        }
        Some(snapshot.selected_frame_id.clone())
    }

    /// Check that a scope fetch for `frame_id` can be issued
    pub(crate) fn require_frame(&self, frame_id: &FrameId) -> Result<Generation, Rejection> {
        let snapshot = self.snapshot().ok_or(Rejection::NotPaused)?;
        if snapshot.frame(frame_id).is_none() {
            return Err(Rejection::UnknownFrame(frame_id.clone()));
        }
        Ok(self.generation)
    }

    fn current_frame(
        &mut self,
        generation: Generation,
        frame_id: &FrameId,
    ) -> Option<&mut PauseSnapshot> {
        if generation != self.generation {
            return None;
        }
        match &mut self.state {
            PauseState::Paused(snapshot) if snapshot.frame(frame_id).is_some() => Some(snapshot),
            _ => None,
        }
    }

    /// Store fetched scopes, returning false if the frame was superseded
    pub(crate) fn apply_scopes(
        &mut self,
        generation: Generation,
        frame_id: &FrameId,
        scope: Scope,
    ) -> bool {
        match self.current_frame(generation, frame_id) {
            Some(snapshot) => {
                snapshot.scopes.insert(frame_id.clone(), scope);
                true
            }
            None => false,
        }
    }

    /// Store mapped scopes, returning false if the frame was superseded
    pub(crate) fn apply_mapped_scopes(
        &mut self,
        generation: Generation,
        frame_id: &FrameId,
        mapped: MappedScopes,
    ) -> bool {
        match self.current_frame(generation, frame_id) {
            Some(snapshot) => {
                snapshot.mapped_scopes.insert(frame_id.clone(), mapped);
                true
            }
            None => false,
        }
    }

    /// Replace frames with their source-mapped versions
    pub(crate) fn map_frames(&mut self, frames: Vec<Frame>) -> Result<(), Rejection> {
        let snapshot = self.paused_mut()?;
        let Some(top) = frames.first() else {
            tracing::warn!("ignoring empty mapped frames");
            return Ok(());
        };
        if !frames.iter().any(|f| f.id == snapshot.selected_frame_id) {
            snapshot.selected_frame_id = top.id.clone();
        }
        snapshot.frames = frames;
        Ok(())
    }

    pub(crate) fn set_popup_object_properties(
        &mut self,
        object_id: String,
        properties: BTreeMap<String, Value>,
    ) -> Result<(), Rejection> {
        let snapshot = self.paused_mut()?;
        snapshot
            .loaded_objects
            .entry(object_id.clone())
            .or_insert_with(|| LoadedObject {
                object_id,
                properties: BTreeMap::new(),
            })
            .properties
            .extend(properties);
        Ok(())
    }

    pub(crate) fn set_waiting_on_break(&mut self, waiting: bool) {
        self.waiting_on_break = waiting;
    }

    pub(crate) fn set_pause_on_exceptions(&mut self, policy: ExceptionPolicy) {
        self.pause_on_exceptions = policy;
    }

    /// Jump to a recorded point in the execution history
    pub(crate) fn travel_to(
        &mut self,
        position: u64,
        notification: PauseNotification,
    ) -> Option<Paused> {
        let paused = self.on_paused(notification)?;
        self.history_position = Some(position);
        Some(paused)
    }

    pub(crate) fn clear_history(&mut self) {
        self.history_position = None;
    }

    /// Forget the previous target, failing a step that can no longer complete
    pub(crate) fn reset(&mut self) -> Option<PauseCommand> {
        self.generation = self.generation.next();
        self.state = PauseState::Running;
        self.waiting_on_break = false;
        self.history_position = None;
        let mut step = self.in_flight.take()?;
        step.envelope.fail("navigated away from the paused target");
        Some(PauseCommand::Step(step.envelope))
    }
}
