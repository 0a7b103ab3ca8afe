//! Control plane of a source-level debugger client.
//!
//! A [`Session`] tracks breakpoints, the pause state of the debuggee, watch
//! expressions and per-source analysis results, and turns user operations into
//! requests for the debuggee. [`AsyncSession`] runs a session on a tokio task
//! against a [`DebuggeeClient`].
mod breakpoints;
mod command;
mod error;
mod expressions;
mod location;
mod pause;
mod pending_requests;
mod protocol;
mod session;
mod state;
mod symbols;
mod types;

// Async modules
mod async_event;
mod async_session;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use breakpoints::{
    AddBreakpoint, AddBreakpointResult, Breakpoint, BreakpointRegistry, RemapWarning,
    RemoveBreakpoint, ToggleBreakpoints,
};
pub use command::{
    BreakpointCommand, Command, CommandEnvelope, CommandId, EvaluationOutcome, ExpressionCommand,
    Generation, PauseCommand, Phase, SourceCommand, SymbolCommand,
};
pub use error::Rejection;
pub use expressions::{Expression, ExpressionEvaluator};
pub use location::{Location, Selection, Source, SourceId, SourceMetadata, Sources};
pub use pause::{
    EvalContext, ExceptionPolicy, PauseController, PauseSnapshot, PauseState, StepKind,
    StepOutcome,
};
pub use protocol::{
    Analysis, LocationMapping, Notification, PauseNotification, Request, RequestBody, RequestId,
    ResponseBody,
};
pub use session::Session;
pub use state::{Event, SessionView};
pub use symbols::{
    AstLocation, PausePoint, Position, Preview, PreviewRequest, SymbolDeclaration,
    SymbolDeclarations, SymbolSynchronizer,
};
pub use types::{Frame, FrameId, LoadedObject, MappedScopes, Scope, Value, Why};

// Export async types
pub use async_event::EventReceiver;
pub use async_session::{AsyncSession, DebuggeeClient};

pub use config::SessionConfig;
