//! Command envelopes: asynchronous debugger commands and their lifecycle.
//!
//! Every command the session issues to the debuggee is tracked by a
//! [`CommandEnvelope`] carrying the request payload and a [`Phase`]. A command
//! starts [`Phase::Pending`] and ends either [`Phase::Succeeded`] with a result
//! or [`Phase::Failed`] with a message. Commands that need no round trip are
//! created directly in their terminal phase.
//!
//! Commands are grouped into one sum type per subsystem so a new command shape
//! has to be handled by every consumer that matches on it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    breakpoints::{AddBreakpoint, AddBreakpointResult, Breakpoint, RemoveBreakpoint, ToggleBreakpoints},
    location::SourceId,
    pause::{ExceptionPolicy, StepKind, StepOutcome},
    symbols::{Preview, PreviewRequest, SymbolDeclarations},
    types::{FrameId, MappedScopes, Scope, Value},
};

/// Identity of one issued command
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(pub u64);

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic marker of the pause snapshot a result was computed against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Generation(pub u64);

impl Generation {
    pub(crate) fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "value", rename_all = "camelCase")]
pub enum Phase<R> {
    Pending,
    Succeeded(R),
    Failed(String),
}

impl<R> Phase<R> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Phase::Pending)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_pending()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope<P, R> {
    pub id: CommandId,
    pub payload: P,
    pub phase: Phase<R>,
}

impl<P, R> CommandEnvelope<P, R> {
    pub(crate) fn pending(id: CommandId, payload: P) -> Self {
        Self {
            id,
            payload,
            phase: Phase::Pending,
        }
    }

    pub fn result(&self) -> Option<&R> {
        match &self.phase {
            Phase::Succeeded(result) => Some(result),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.phase {
            Phase::Failed(message) => Some(message),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.phase.is_pending()
    }

    pub(crate) fn succeed(&mut self, result: R) {
        debug_assert!(self.is_pending(), "command {} completed twice", self.id);
        self.phase = Phase::Succeeded(result);
    }

    pub(crate) fn fail(&mut self, message: impl Into<String>) {
        debug_assert!(self.is_pending(), "command {} completed twice", self.id);
        self.phase = Phase::Failed(message.into());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BreakpointCommand {
    Add(CommandEnvelope<AddBreakpoint, AddBreakpointResult>),
    /// Uninstalls a breakpoint; with `disabled_only` it stays registered as disabled
    Remove(CommandEnvelope<RemoveBreakpoint, ()>),
    Enable(CommandEnvelope<Breakpoint, AddBreakpointResult>),
    ToggleAll(CommandEnvelope<ToggleBreakpoints, Vec<Breakpoint>>),
}

impl BreakpointCommand {
    pub fn id(&self) -> CommandId {
        match self {
            BreakpointCommand::Add(e) => e.id,
            BreakpointCommand::Remove(e) => e.id,
            BreakpointCommand::Enable(e) => e.id,
            BreakpointCommand::ToggleAll(e) => e.id,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            BreakpointCommand::Add(e) => e.error(),
            BreakpointCommand::Remove(e) => e.error(),
            BreakpointCommand::Enable(e) => e.error(),
            BreakpointCommand::ToggleAll(e) => e.error(),
        }
    }

    pub fn is_pending(&self) -> bool {
        match self {
            BreakpointCommand::Add(e) => e.is_pending(),
            BreakpointCommand::Remove(e) => e.is_pending(),
            BreakpointCommand::Enable(e) => e.is_pending(),
            BreakpointCommand::ToggleAll(e) => e.is_pending(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PauseCommand {
    Step(CommandEnvelope<StepKind, StepOutcome>),
    BreakOnNext(CommandEnvelope<bool, ()>),
    PauseOnExceptions(CommandEnvelope<ExceptionPolicy, ()>),
    AddScopes(CommandEnvelope<FrameId, Scope>),
    MapScopes(CommandEnvelope<FrameId, MappedScopes>),
}

/// Outcome of one input in a batch evaluation
pub type EvaluationOutcome = Result<Value, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExpressionCommand {
    Evaluate(CommandEnvelope<String, Value>),
    EvaluateAll(CommandEnvelope<Vec<String>, Vec<EvaluationOutcome>>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SymbolCommand {
    SetSymbols(CommandEnvelope<SourceId, SymbolDeclarations>),
    /// Evaluates a hovered expression in the selected frame
    SetPreview(CommandEnvelope<PreviewRequest, Preview>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SourceCommand {
    /// Payload is the source, result the new blackbox flag
    BlackBox(CommandEnvelope<SourceId, bool>),
}

/// Any tracked command, as published to subscribers when its phase changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "subsystem", content = "command", rename_all = "camelCase")]
pub enum Command {
    Breakpoint(BreakpointCommand),
    Pause(PauseCommand),
    Expression(ExpressionCommand),
    Symbol(SymbolCommand),
    Source(SourceCommand),
}

impl From<BreakpointCommand> for Command {
    fn from(value: BreakpointCommand) -> Self {
        Command::Breakpoint(value)
    }
}

impl From<PauseCommand> for Command {
    fn from(value: PauseCommand) -> Self {
        Command::Pause(value)
    }
}

impl From<ExpressionCommand> for Command {
    fn from(value: ExpressionCommand) -> Self {
        Command::Expression(value)
    }
}

impl From<SymbolCommand> for Command {
    fn from(value: SymbolCommand) -> Self {
        Command::Symbol(value)
    }
}

impl From<SourceCommand> for Command {
    fn from(value: SourceCommand) -> Self {
        Command::Source(value)
    }
}
