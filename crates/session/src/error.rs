//! Synchronous rejections of session operations.

use crate::{
    location::{Location, SourceId},
    types::FrameId,
};

/// An operation that violates the session's invariants.
///
/// Rejections happen before anything is dispatched to the debuggee and leave
/// the session untouched. They indicate a caller bug rather than a transient
/// failure, so they are never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// The operation needs a paused debuggee.
    #[error("debuggee is not paused")]
    NotPaused,

    /// The frame is not part of the current stack.
    #[error("frame {0} is not in the current stack")]
    UnknownFrame(FrameId),

    /// The source has not been discovered for this target.
    #[error("source {0} is not known to this session")]
    UnknownSource(SourceId),

    /// No breakpoint was set at this original location.
    #[error("no breakpoint set at {0}")]
    UnknownBreakpoint(Location),

    /// No watch expression with this input.
    #[error("no expression with input {0:?}")]
    UnknownExpression(String),

    /// A stepping command is still waiting for the debuggee.
    #[error("a {0} command is already in flight")]
    StepInFlight(&'static str),

    /// The session is not connected to a debuggee.
    #[error("no active debugging session")]
    NoActiveSession,

    /// The background processor has shut down.
    #[error("session has shut down")]
    SessionClosed,
}
