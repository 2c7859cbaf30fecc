use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a message within a transcript.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System prompt; at most one, always first.
    System,

    /// User role.
    User,

    /// Assistant role.
    Assistant,

    /// Output of a function the assistant asked to call.
    Function,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Function => write!(f, "function"),
        }
    }
}

/// A function call declared by an assistant message.
///
/// `arguments` is the raw JSON text produced by the model; it is parsed only at
/// dispatch time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Name of the function to call.
    pub name: String,

    /// JSON-encoded arguments.
    pub arguments: String,
}

impl FunctionCall {
    /// Create a new `FunctionCall`.
    pub fn new(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// One message of a transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message.
    pub role: MessageRole,

    /// The text content of the message.
    pub content: String,

    /// Function call requested by an assistant message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,

    /// Function that produced a function-role message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    /// Create a new `Message` with the given role and content.
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            function_call: None,
            name: None,
        }
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Create an assistant message that declares a function call.
    pub fn function_call(call: FunctionCall) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: String::new(),
            function_call: Some(call),
            name: None,
        }
    }

    /// Create a function-role message carrying a function's output.
    pub fn function_result(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Function,
            content: content.into(),
            function_call: None,
            name: Some(name.into()),
        }
    }

    /// Returns true for the system message.
    pub fn is_system(&self) -> bool {
        self.role == MessageRole::System
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, to_value};

    #[test]
    fn plain_message_serialization() {
        let message = Message::user("hello");
        assert_eq!(
            to_value(&message).unwrap(),
            json!({"role": "user", "content": "hello"})
        );
    }

    #[test]
    fn function_messages_serialization() {
        let call = Message::function_call(FunctionCall::new("list_dir", r#"{"path": "."}"#));
        assert_eq!(
            to_value(&call).unwrap(),
            json!({
                "role": "assistant",
                "content": "",
                "function_call": {"name": "list_dir", "arguments": "{\"path\": \".\"}"}
            })
        );

        let result = Message::function_result("list_dir", "Cargo.toml\nsrc");
        assert_eq!(
            to_value(&result).unwrap(),
            json!({"role": "function", "content": "Cargo.toml\nsrc", "name": "list_dir"})
        );
    }

    #[test]
    fn deserialize_without_optional_fields() {
        let message: Message =
            serde_json::from_value(json!({"role": "system", "content": "You are Quill"})).unwrap();
        assert!(message.is_system());
        assert!(message.function_call.is_none());
        assert!(message.name.is_none());
    }
}
