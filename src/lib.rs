// Public modules
pub mod cache;
pub mod chat_store;
pub mod completion;
pub mod config;
pub mod error;
pub mod function;
pub mod handler;
pub mod interrupt;
pub mod markdown;
pub mod render;
pub mod role;
pub mod shell;
pub mod types;
pub mod vendor;

mod observability;
mod sse;

// Re-exports
pub use cache::{Cache, CachingStream, Fingerprint};
pub use chat_store::{ChatStore, EPHEMERAL_CHAT_ID};
pub use completion::{Completion, CompletionEngine};
pub use config::Config;
pub use error::{Error, Result};
pub use function::{Function, FunctionRegistry};
pub use handler::{ChatHandler, CompletionOptions, DefaultHandler, ReplHandler, ShellAction};
pub use interrupt::Interrupt;
pub use observability::register_biometrics;
pub use render::{MarkdownPrinter, Printed, Printer, TextPrinter, debug_panels, print_stream};
pub use role::{DefaultRole, SystemRole};
pub use shell::ShellEnv;
pub use types::*;
pub use vendor::{CompletionRequest, Vendor, VendorAdapter, VendorKind};
