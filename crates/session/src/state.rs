use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    breakpoints::{Breakpoint, RemapWarning},
    command::{Command, CommandId, Generation},
    expressions::Expression,
    location::{Selection, Source, SourceId},
    pause::{ExceptionPolicy, PauseState},
    symbols::{AstLocation, Preview, SymbolDeclarations},
    types::{FrameId, Why},
};

/// Something observable changed in the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Event {
    #[serde(rename_all = "camelCase")]
    Connected { url: String, can_rewind: bool },
    Navigated { url: String },
    Paused { generation: Generation, why: Why },
    Resumed { generation: Generation },
    #[serde(rename_all = "camelCase")]
    FrameSelected { frame_id: FrameId },
    BreakpointsChanged,
    ExpressionsChanged,
    SourcesChanged,
    #[serde(rename_all = "camelCase")]
    SymbolsChanged { source_id: SourceId },
    /// Pause points, scope lines or source metadata arrived from analysis
    AnalysisUpdated,
    /// The hovered expression preview was requested, settled or cleared
    PreviewChanged,
    /// A command was issued or reached a terminal phase
    Command { command: Command },
    /// A result arrived for state that no longer exists and was dropped
    Superseded { command: CommandId },
    RemapWarning(RemapWarning),
    Travelled { position: u64 },
    HistoryCleared,
}

/// A consistent copy of everything a consumer can read from the session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub url: Option<String>,
    pub can_rewind: bool,
    pub sources: Vec<Source>,
    pub selection: Option<Selection>,
    pub breakpoints: Vec<Breakpoint>,
    pub pause: PauseState,
    pub waiting_on_break: bool,
    pub pause_on_exceptions: ExceptionPolicy,
    pub in_flight_step: Option<CommandId>,
    pub expressions: Vec<Expression>,
    pub expression_error: Option<String>,
    pub symbols: BTreeMap<SourceId, SymbolDeclarations>,
    pub out_of_scope_locations: Option<Vec<AstLocation>>,
    pub in_scope_lines: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<Preview>,
    pub history_position: Option<u64>,
    /// Requests still waiting for the debuggee
    pub outstanding_requests: usize,
    pub queued_breakpoint_commands: usize,
}

impl SessionView {
    /// Nothing is waiting on the debuggee
    pub fn is_idle(&self) -> bool {
        self.outstanding_requests == 0 && self.queued_breakpoint_commands == 0
    }

    pub fn breakpoint(&self, original_location: &crate::location::Location) -> Option<&Breakpoint> {
        self.breakpoints
            .iter()
            .find(|bp| &bp.original_location == original_location)
    }

    pub fn expression(&self, input: &str) -> Option<&Expression> {
        self.expressions.iter().find(|e| e.input == input)
    }
}
