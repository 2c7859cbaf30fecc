use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declares a function the model may call.
///
/// `parameters` is a JSON Schema object describing the keyword arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSchema {
    /// Name the model uses to call the function.
    pub name: String,

    /// What the function does, for the model.
    pub description: String,

    /// JSON Schema of the arguments object.
    pub parameters: Value,
}

impl FunctionSchema {
    /// Create a new `FunctionSchema`.
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}
