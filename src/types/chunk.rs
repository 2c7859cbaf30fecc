use std::fmt;

/// Why a vendor stopped streaming a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// The model finished its turn.
    Stop,

    /// The response hit the token limit.
    Length,

    /// The model wants a function called before it continues.
    FunctionCall,

    /// Any reason this crate does not interpret.
    Other(String),
}

impl FinishReason {
    /// Normalizes an OpenAI-style `finish_reason`.
    pub fn from_openai(reason: &str) -> Self {
        match reason {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "tool_calls" | "function_call" => FinishReason::FunctionCall,
            other => FinishReason::Other(other.to_string()),
        }
    }

    /// Normalizes an Anthropic-style `stop_reason`.
    pub fn from_anthropic(reason: &str) -> Self {
        match reason {
            "end_turn" | "stop_sequence" => FinishReason::Stop,
            "max_tokens" => FinishReason::Length,
            "tool_use" => FinishReason::FunctionCall,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinishReason::Stop => write!(f, "stop"),
            FinishReason::Length => write!(f, "length"),
            FinishReason::FunctionCall => write!(f, "function_call"),
            FinishReason::Other(reason) => write!(f, "{reason}"),
        }
    }
}

/// A fragment of a function call streamed by the vendor.
///
/// Either half may be split over many chunks; consumers concatenate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionCallDelta {
    /// Fragment of the function name.
    pub name: Option<String>,

    /// Fragment of the JSON arguments.
    pub arguments: Option<String>,
}

/// The vendor-neutral unit of a streamed completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    /// Text to show the user; may be empty.
    pub text: String,

    /// Function call fragment, if the chunk carried one.
    pub function_call: Option<FunctionCallDelta>,

    /// Set on the chunk that ends the response.
    pub finish_reason: Option<FinishReason>,
}

impl Chunk {
    /// A chunk carrying only text.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// A chunk carrying a function call fragment.
    pub fn function_call(name: Option<String>, arguments: Option<String>) -> Self {
        Self {
            function_call: Some(FunctionCallDelta { name, arguments }),
            ..Self::default()
        }
    }

    /// A chunk that only reports why the response ended.
    pub fn finish(reason: FinishReason) -> Self {
        Self {
            finish_reason: Some(reason),
            ..Self::default()
        }
    }

    /// Adds a finish reason to this chunk.
    pub fn with_finish_reason(mut self, reason: FinishReason) -> Self {
        self.finish_reason = Some(reason);
        self
    }
}
