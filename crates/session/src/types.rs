use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use crate::location::Location;

/// Free-form value produced by the debuggee (evaluation results, bindings)
pub type Value = serde_json::Value;

/// Identity of one activation record in a paused stack
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameId(pub String);

impl FrameId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FrameId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub id: FrameId,
    pub display_name: String,
    pub location: Location,
}

impl Frame {
    pub fn new(id: impl Into<FrameId>, display_name: impl Into<String>, location: Location) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            location,
        }
    }
}

/// Variable bindings visible at a frame, innermost first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub bindings: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Box<Scope>>,
}

impl Scope {
    /// Look a binding up through the scope chain
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.bindings
            .get(name)
            .or_else(|| self.parent.as_deref().and_then(|p| p.lookup(name)))
    }
}

/// Scope of a frame together with the original (source-mapped) name of each binding
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappedScopes {
    pub scope: Scope,
    pub mappings: BTreeMap<String, Option<String>>,
}

/// Why the debuggee paused
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Why {
    Breakpoint {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<Location>,
    },
    Step,
    Exception {
        message: String,
    },
    /// Explicit break request or `debugger` statement
    Interrupted,
    Other {
        reason: String,
    },
}

/// Object whose properties were fetched while paused
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedObject {
    pub object_id: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}
