//! Messages exchanged with the debuggee client.
//!
//! The session never talks to a transport directly. It emits [`Request`]s,
//! which a driver forwards to the debuggee and answers with a
//! [`ResponseBody`] (or an error) under the same [`RequestId`]. Anything the
//! debuggee reports on its own arrives as a [`Notification`].

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use crate::{
    breakpoints::Breakpoint,
    command::EvaluationOutcome,
    location::{Location, Source, SourceId, SourceMetadata},
    pause::{ExceptionPolicy, StepKind},
    symbols::{AstLocation, PausePoint, SymbolDeclarations},
    types::{Frame, FrameId, LoadedObject, MappedScopes, Scope, Why},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub body: RequestBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "arguments", rename_all = "camelCase")]
pub enum RequestBody {
    #[serde(rename_all = "camelCase")]
    SetBreakpoint {
        location: Location,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        log_value: Option<String>,
    },
    RemoveBreakpoint {
        location: Location,
    },
    #[serde(rename_all = "camelCase")]
    ToggleBreakpoints {
        locations: Vec<Location>,
        should_disable: bool,
    },
    Step(StepKind),
    BreakOnNext(bool),
    PauseOnExceptions(ExceptionPolicy),
    #[serde(rename_all = "camelCase")]
    Evaluate {
        inputs: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frame_id: Option<FrameId>,
    },
    #[serde(rename_all = "camelCase")]
    Scopes {
        frame_id: FrameId,
    },
    #[serde(rename_all = "camelCase")]
    MapScopes {
        frame_id: FrameId,
    },
    #[serde(rename_all = "camelCase")]
    Symbols {
        source_id: SourceId,
    },
    #[serde(rename_all = "camelCase")]
    BlackBox {
        source_id: SourceId,
        black_boxed: bool,
    },
}

impl RequestBody {
    pub fn name(&self) -> &'static str {
        match self {
            RequestBody::SetBreakpoint { .. } => "setBreakpoint",
            RequestBody::RemoveBreakpoint { .. } => "removeBreakpoint",
            RequestBody::ToggleBreakpoints { .. } => "toggleBreakpoints",
            RequestBody::Step(_) => "step",
            RequestBody::BreakOnNext(_) => "breakOnNext",
            RequestBody::PauseOnExceptions(_) => "pauseOnExceptions",
            RequestBody::Evaluate { .. } => "evaluate",
            RequestBody::Scopes { .. } => "scopes",
            RequestBody::MapScopes { .. } => "mapScopes",
            RequestBody::Symbols { .. } => "symbols",
            RequestBody::BlackBox { .. } => "blackBox",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "camelCase")]
pub enum ResponseBody {
    /// The request was accepted and carries no data
    Ack,
    #[serde(rename_all = "camelCase")]
    BreakpointSet {
        actual_location: Location,
    },
    /// One outcome per evaluated input, in request order
    Evaluated(Vec<EvaluationOutcome>),
    Scopes(Scope),
    MappedScopes(MappedScopes),
    Symbols(SymbolDeclarations),
}

impl ResponseBody {
    pub fn kind(&self) -> &'static str {
        match self {
            ResponseBody::Ack => "ack",
            ResponseBody::BreakpointSet { .. } => "breakpointSet",
            ResponseBody::Evaluated(_) => "evaluated",
            ResponseBody::Scopes(_) => "scopes",
            ResponseBody::MappedScopes(_) => "mappedScopes",
            ResponseBody::Symbols(_) => "symbols",
        }
    }
}

/// The full state reported when the debuggee pauses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseNotification {
    pub why: Why,
    pub frames: Vec<Frame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_frame_id: Option<FrameId>,
    /// Scopes of at least the top frame
    #[serde(default)]
    pub scopes: BTreeMap<FrameId, Scope>,
    #[serde(default)]
    pub loaded_objects: Vec<LoadedObject>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationMapping {
    pub from: Location,
    /// `None` when the old location has no counterpart in the reprocessed source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Location>,
}

/// Results pushed by the analysis worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Analysis {
    #[serde(rename_all = "camelCase")]
    PausePoints {
        source_id: SourceId,
        pause_points: Vec<PausePoint>,
    },
    OutOfScopeLocations {
        #[serde(default)]
        locations: Option<Vec<AstLocation>>,
    },
    InScopeLines {
        lines: Vec<u32>,
    },
    #[serde(rename_all = "camelCase")]
    SourceMetadata {
        source_id: SourceId,
        metadata: SourceMetadata,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Notification {
    /// A debuggee connection was established
    #[serde(rename_all = "camelCase")]
    Connected {
        url: String,
        #[serde(default)]
        can_rewind: bool,
    },
    /// The debuggee moved to a new target; its sources are replaced
    Navigated {
        url: String,
    },
    Paused(PauseNotification),
    Resumed,
    SourcesDiscovered {
        sources: Vec<Source>,
    },
    /// A source was reprocessed and old breakpoint locations moved
    #[serde(rename_all = "camelCase")]
    SourceReprocessed {
        source_id: SourceId,
        mappings: Vec<LocationMapping>,
    },
    /// The debuggee re-resolved a breakpoint previously found at `previous_location`
    #[serde(rename_all = "camelCase")]
    BreakpointSynced {
        previous_location: Location,
        #[serde(default)]
        breakpoint: Option<Breakpoint>,
    },
    TravelTo {
        position: u64,
        paused: PauseNotification,
        #[serde(default)]
        expressions: Vec<(String, EvaluationOutcome)>,
    },
    ClearHistory,
    Analysis(Analysis),
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Connected { .. } => "connected",
            Notification::Navigated { .. } => "navigated",
            Notification::Paused(_) => "paused",
            Notification::Resumed => "resumed",
            Notification::SourcesDiscovered { .. } => "sourcesDiscovered",
            Notification::SourceReprocessed { .. } => "sourceReprocessed",
            Notification::BreakpointSynced { .. } => "breakpointSynced",
            Notification::TravelTo { .. } => "travelTo",
            Notification::ClearHistory => "clearHistory",
            Notification::Analysis(_) => "analysis",
        }
    }
}
