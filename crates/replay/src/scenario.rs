use std::{
    collections::{BTreeMap, VecDeque},
    path::Path,
};

use eyre::WrapErr;
use serde::Deserialize;
use session::{
    AstLocation, Breakpoint, FrameId, Location, Notification, Rejection, ResponseBody, Session,
    SourceId, StepKind,
};

/// A recorded debugging session: what the debuggee answers, and what happens
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    /// Answers per request name, consumed in order
    #[serde(default)]
    pub responses: BTreeMap<String, VecDeque<Scripted>>,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading scenario {}", path.display()))?;
        serde_json::from_str(&contents)
            .wrap_err_with(|| format!("parsing scenario {}", path.display()))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Scripted {
    Ok(ResponseBody),
    Error(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Step {
    /// Something the debuggee reports
    Notify(Notification),
    #[serde(rename_all = "camelCase")]
    AddBreakpoint {
        location: Location,
        #[serde(default)]
        condition: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    AddLogPoint {
        location: Location,
        log_value: String,
    },
    RemoveBreakpoint {
        location: Location,
    },
    ToggleDisabled {
        location: Location,
    },
    EnableAll,
    DisableAll,
    Step(StepKind),
    #[serde(rename_all = "camelCase")]
    SelectFrame {
        frame_id: FrameId,
    },
    BreakOnNext(bool),
    #[serde(rename_all = "camelCase")]
    PauseOnExceptions {
        should_pause: bool,
        #[serde(default)]
        should_ignore_caught: bool,
    },
    AddExpression {
        input: String,
    },
    DeleteExpression {
        input: String,
    },
    EvaluateExpressions {
        inputs: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    SetSymbols {
        source_id: SourceId,
    },
    SetPreview {
        expression: String,
        location: AstLocation,
    },
    ClearSelection,
    #[serde(rename_all = "camelCase")]
    ToggleBlackBox {
        source_id: SourceId,
    },
    #[serde(rename_all = "camelCase")]
    SelectSource {
        url: String,
        #[serde(default)]
        line: Option<u32>,
    },
}

impl Step {
    /// Apply a user operation to the session.
    ///
    /// Returns `None` for notifications, which go through the notify path.
    pub fn apply(self, session: &mut Session) -> Option<Result<(), Rejection>> {
        let outcome = match self {
            Step::Notify(_) => return None,
            Step::AddBreakpoint {
                location,
                condition,
            } => session.add_breakpoint(location, condition).map(drop),
            Step::AddLogPoint {
                location,
                log_value,
            } => session.add_log_point(location, log_value).map(drop),
            Step::RemoveBreakpoint { location } => {
                let breakpoint = session
                    .breakpoints()
                    .get(&location)
                    .cloned()
                    .unwrap_or_else(|| Breakpoint::new(location));
                session.remove_breakpoint(&breakpoint);
                Ok(())
            }
            Step::ToggleDisabled { location } => match session.breakpoints().get(&location) {
                Some(breakpoint) => {
                    let breakpoint = breakpoint.clone();
                    session.toggle_disabled(&breakpoint).map(drop)
                }
                None => Err(Rejection::UnknownBreakpoint(location)),
            },
            Step::EnableAll => {
                session.enable_all();
                Ok(())
            }
            Step::DisableAll => {
                session.disable_all();
                Ok(())
            }
            Step::Step(kind) => session.step(kind).map(drop),
            Step::SelectFrame { frame_id } => session.select_frame(&frame_id),
            Step::BreakOnNext(enabled) => {
                session.set_break_on_next(enabled);
                Ok(())
            }
            Step::PauseOnExceptions {
                should_pause,
                should_ignore_caught,
            } => {
                session.set_pause_on_exceptions(should_pause, should_ignore_caught);
                Ok(())
            }
            Step::AddExpression { input } => session.add_expression(&input).map(drop),
            Step::DeleteExpression { input } => {
                session.delete_expression(&input);
                Ok(())
            }
            Step::EvaluateExpressions { inputs } => session.evaluate_expressions(inputs).map(drop),
            Step::SetSymbols { source_id } => session.set_symbols(&source_id).map(drop),
            Step::SetPreview {
                expression,
                location,
            } => session.set_preview(&expression, location).map(drop),
            Step::ClearSelection => {
                session.clear_selection();
                Ok(())
            }
            Step::ToggleBlackBox { source_id } => session.toggle_black_box(&source_id).map(drop),
            Step::SelectSource { url, line } => {
                session.select_source_url(url, line);
                Ok(())
            }
        };
        Some(outcome)
    }
}
