//! Static analysis results cached per source.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    command::{CommandEnvelope, CommandId, Phase, SymbolCommand},
    location::SourceId,
    types::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

/// A span in a source, as reported by the analysis worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AstLocation {
    pub start: Position,
    pub end: Position,
}

impl AstLocation {
    pub fn contains_line(&self, line: u32) -> bool {
        self.start.line <= line && line <= self.end.line
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolDeclaration {
    pub name: String,
    pub location: AstLocation,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolDeclarations {
    #[serde(default)]
    pub functions: Vec<SymbolDeclaration>,
    #[serde(default)]
    pub variables: Vec<SymbolDeclaration>,
    #[serde(default)]
    pub classes: Vec<SymbolDeclaration>,
}

/// A position the debuggee can stop at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PausePoint {
    pub location: Position,
    #[serde(default)]
    pub step_over: bool,
    #[serde(default)]
    pub break_point: bool,
}

/// An expression under the cursor to evaluate in the selected frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewRequest {
    pub expression: String,
    pub location: AstLocation,
}

/// The value shown for a hovered expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preview {
    pub expression: String,
    pub location: AstLocation,
    pub result: Value,
}

#[derive(Debug, Default)]
pub struct SymbolSynchronizer {
    symbols: BTreeMap<SourceId, CommandEnvelope<SourceId, SymbolDeclarations>>,
    pause_points: BTreeMap<SourceId, Vec<PausePoint>>,
    out_of_scope_locations: Option<Vec<AstLocation>>,
    in_scope_lines: Vec<u32>,
    preview: Option<CommandEnvelope<PreviewRequest, Preview>>,
}

impl SymbolSynchronizer {
    /// The symbol command for a source, in whatever phase it is in
    pub fn symbols(&self, source_id: &SourceId) -> Option<&CommandEnvelope<SourceId, SymbolDeclarations>> {
        self.symbols.get(source_id)
    }

    pub fn declarations(&self, source_id: &SourceId) -> Option<&SymbolDeclarations> {
        self.symbols.get(source_id).and_then(|e| e.result())
    }

    pub fn pause_points(&self, source_id: &SourceId) -> Option<&[PausePoint]> {
        self.pause_points.get(source_id).map(Vec::as_slice)
    }

    /// `None` means not computed, which is different from "nothing is out of scope"
    pub fn out_of_scope_locations(&self) -> Option<&[AstLocation]> {
        self.out_of_scope_locations.as_deref()
    }

    pub fn in_scope_lines(&self) -> &[u32] {
        &self.in_scope_lines
    }

    /// The latest preview command, in whatever phase it is in
    pub fn preview(&self) -> Option<&CommandEnvelope<PreviewRequest, Preview>> {
        self.preview.as_ref()
    }

    pub(crate) fn loaded(&self) -> impl Iterator<Item = (&SourceId, &SymbolDeclarations)> {
        self.symbols
            .iter()
            .filter_map(|(id, e)| e.result().map(|decls| (id, decls)))
    }

    /// Start loading symbols for a source.
    ///
    /// A source that is loading or loaded hands back its existing envelope and
    /// `false`; the caller only issues a request when this returns `true`.
    /// A failed load is retried.
    pub(crate) fn begin(
        &mut self,
        id: CommandId,
        source_id: &SourceId,
    ) -> (CommandEnvelope<SourceId, SymbolDeclarations>, bool) {
        if let Some(existing) = self.symbols.get(source_id) {
            if !matches!(existing.phase, Phase::Failed(_)) {
                return (existing.clone(), false);
            }
        }
        let envelope = CommandEnvelope::pending(id, source_id.clone());
        self.symbols.insert(source_id.clone(), envelope.clone());
        (envelope, true)
    }

    /// Finish the load issued as `command`, unless it was abandoned in the meantime
    pub(crate) fn complete(
        &mut self,
        source_id: &SourceId,
        command: CommandId,
        outcome: Result<SymbolDeclarations, String>,
    ) -> Option<SymbolCommand> {
        let envelope = self
            .symbols
            .get_mut(source_id)
            .filter(|e| e.id == command && e.is_pending())?;
        match outcome {
            Ok(declarations) => envelope.succeed(declarations),
            Err(message) => envelope.fail(message),
        }
        Some(SymbolCommand::SetSymbols(envelope.clone()))
    }

    /// Replace the current preview with a new pending one
    pub(crate) fn begin_preview(
        &mut self,
        id: CommandId,
        request: PreviewRequest,
    ) -> CommandEnvelope<PreviewRequest, Preview> {
        let envelope = CommandEnvelope::pending(id, request);
        self.preview = Some(envelope.clone());
        envelope
    }

    /// Finish the preview issued as `command`, unless it was replaced or cleared
    pub(crate) fn complete_preview(
        &mut self,
        command: CommandId,
        outcome: Result<Value, String>,
    ) -> Option<SymbolCommand> {
        let envelope = self
            .preview
            .as_mut()
            .filter(|e| e.id == command && e.is_pending())?;
        match outcome {
            Ok(result) => {
                let preview = Preview {
                    expression: envelope.payload.expression.clone(),
                    location: envelope.payload.location,
                    result,
                };
                envelope.succeed(preview);
            }
            Err(message) => envelope.fail(message),
        }
        Some(SymbolCommand::SetPreview(envelope.clone()))
    }

    /// Drop the preview, returning true if there was one
    pub(crate) fn clear_preview(&mut self) -> bool {
        self.preview.take().is_some()
    }

    pub(crate) fn set_pause_points(&mut self, source_id: SourceId, pause_points: Vec<PausePoint>) {
        self.pause_points.insert(source_id, pause_points);
    }

    pub(crate) fn set_out_of_scope_locations(&mut self, locations: Option<Vec<AstLocation>>) {
        self.out_of_scope_locations = locations;
    }

    pub(crate) fn set_in_scope_lines(&mut self, lines: Vec<u32>) {
        self.in_scope_lines = lines;
    }

    /// Drop everything computed for the previous target.
    ///
    /// Returns the loads that were still pending so they can be failed.
    pub(crate) fn clear(&mut self) -> Vec<SymbolCommand> {
        let abandoned = std::mem::take(&mut self.symbols)
            .into_values()
            .filter(|e| e.is_pending())
            .map(|mut e| {
                e.fail("navigated away before symbols were loaded");
                SymbolCommand::SetSymbols(e)
            })
            .collect();
        self.pause_points.clear();
        self.out_of_scope_locations = None;
        self.in_scope_lines.clear();
        self.preview = None;
        abandoned
    }
}
