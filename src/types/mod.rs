// Public modules
pub mod chunk;
pub mod function_schema;
pub mod message;

// Re-exports
pub use chunk::{Chunk, FinishReason, FunctionCallDelta};
pub use function_schema::FunctionSchema;
pub use message::{FunctionCall, Message, MessageRole};
