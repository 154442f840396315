//! Script metadata shown to admin surfaces.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One declared script parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ParamSpec {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub required: bool,
    /// Value filled in when the caller omits the parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl ParamSpec {
    /// An optional parameter without a default.
    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: false,
            default: None,
        }
    }

    /// A parameter the caller must supply.
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            required: true,
            ..Self::optional(name, description)
        }
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Public description of a registered script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ScriptInfo {
    pub name: String,
    pub label: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
}
