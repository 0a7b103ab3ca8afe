//! Tracking outstanding debuggee requests.
//!
//! When the session issues a request it records what the response should be
//! applied to. When the response arrives, it is matched by request id and the
//! context is handed back to the session.

use std::collections::HashMap;

use crate::{
    command::{BreakpointCommand, CommandEnvelope, CommandId, EvaluationOutcome, Generation},
    location::{Location, SourceId},
    pause::{EvalContext, ExceptionPolicy},
    protocol::RequestId,
    types::{FrameId, MappedScopes, Scope, Value},
};

/// What a response continues
#[derive(Debug)]
pub(crate) enum PendingItem {
    Breakpoint(BreakpointCommand),
    /// Re-installing a breakpoint against a new target
    Reinstall { original_location: Location },
    Step(CommandId),
    BreakOnNext(CommandEnvelope<bool, ()>),
    PauseOnExceptions(CommandEnvelope<ExceptionPolicy, ()>),
    Scopes {
        envelope: CommandEnvelope<FrameId, Scope>,
        generation: Generation,
    },
    MapScopes {
        envelope: CommandEnvelope<FrameId, MappedScopes>,
        generation: Generation,
    },
    Evaluate {
        envelope: CommandEnvelope<String, Value>,
        context: EvalContext,
    },
    EvaluateAll {
        envelope: CommandEnvelope<Vec<String>, Vec<EvaluationOutcome>>,
        context: EvalContext,
    },
    Symbols {
        source_id: SourceId,
        command: CommandId,
    },
    Preview {
        command: CommandId,
        context: EvalContext,
    },
    BlackBox {
        envelope: CommandEnvelope<SourceId, bool>,
        black_boxed: bool,
    },
}

/// Tracker for outstanding requests
///
/// This structure maintains a map of request ids to pending items. When a
/// response arrives, it can be matched to the context that issued it.
#[derive(Debug, Default)]
pub(crate) struct PendingRequests {
    pending: HashMap<RequestId, PendingItem>,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    pub(crate) fn add(&mut self, id: RequestId, item: PendingItem) {
        self.pending.insert(id, item);
    }

    /// Returns the pending item if found, None otherwise
    pub(crate) fn take(&mut self, id: RequestId) -> Option<PendingItem> {
        self.pending.remove(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
