//! Session handlers: the one-shot, chat and REPL invocation modes.
//!
//! Every mode funnels through [`exchange`], which builds the request, runs it
//! through the [`CompletionEngine`], prints the fragments and reports the
//! transcript the exchange produced.

mod chat;
mod default;
mod repl;

pub use chat::{ChatHandler, list_ids, show_messages};
pub use default::DefaultHandler;
pub use repl::{ReplAction, ReplHandler, ReplInput};

use std::io::{self, BufRead};

use rustyline::DefaultEditor;
use rustyline::config::Behavior;
use rustyline::error::ReadlineError;

use crate::completion::CompletionEngine;
use crate::error::{Error, Result};
use crate::interrupt::Interrupt;
use crate::render::{Printed, Printer, print_stream};
use crate::role::SystemRole;
use crate::types::Message;
use crate::vendor::{CompletionRequest, Vendor};

/// A line of piped input containing this ends the prompt.
///
/// Whatever follows stays unread, for the REPL when no terminal is attached.
pub const STDIN_EOF_MARKER: &str = "__quill__eof__";

const STDIN_SEPARATOR: &str = "#####";

/// Read piped input up to [`STDIN_EOF_MARKER`] or the end of the stream.
pub fn read_piped<R: BufRead>(reader: R) -> Result<String> {
    let mut piped = String::new();
    for line in reader.lines() {
        let line = line.map_err(|err| Error::io("failed to read stdin", err))?;
        if line.contains(STDIN_EOF_MARKER) {
            break;
        }
        piped.push_str(&line);
        piped.push('\n');
    }
    Ok(piped)
}

/// Put piped input ahead of the prompt, separated by a `#####` line.
pub fn compose_prompt(piped: &str, prompt: &str) -> String {
    if piped.is_empty() {
        prompt.to_string()
    } else if prompt.is_empty() {
        piped.to_string()
    } else {
        format!("{piped}\n\n{STDIN_SEPARATOR}\n\n{prompt}")
    }
}

/// A line editor on the controlling terminal, even when stdin was piped.
pub fn line_editor() -> Result<DefaultEditor> {
    let config = rustyline::Config::builder()
        .behavior(Behavior::PreferTerm)
        .build();
    DefaultEditor::with_config(config).map_err(readline_error)
}

pub(crate) fn readline_error(err: ReadlineError) -> Error {
    Error::io("failed to read input", io::Error::other(err.to_string()))
}

/// Per-invocation request options from the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    /// Consult and populate the response cache.
    pub caching: bool,
    /// Offer the registered functions to the model.
    pub functions: bool,
}

impl CompletionOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: 0.0,
            top_p: 1.0,
            caching: true,
            functions: true,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = top_p;
        self
    }

    pub fn with_caching(mut self, caching: bool) -> Self {
        self.caching = caching;
        self
    }

    pub fn with_functions(mut self, functions: bool) -> Self {
        self.functions = functions;
        self
    }
}

/// What to do with a generated shell command.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ShellAction {
    Execute,
    Describe,
    Abort,
}

impl ShellAction {
    pub const PROMPT: &'static str = "[E]xecute, [D]escribe, [A]bort";

    /// Parse an answer to [`ShellAction::PROMPT`]; an empty answer picks `default`.
    pub fn parse(answer: &str, default: ShellAction) -> Option<ShellAction> {
        match answer.trim().to_lowercase().as_str() {
            "" => Some(default),
            "e" | "y" | "execute" => Some(ShellAction::Execute),
            "d" | "describe" => Some(ShellAction::Describe),
            "a" | "n" | "abort" => Some(ShellAction::Abort),
            _ => None,
        }
    }
}

/// The outcome of one exchange.
#[derive(Debug, Clone)]
pub(crate) struct Exchange {
    pub printed: Printed,
    /// The transcript ending with the assistant's reply; absent when interrupted.
    pub messages: Option<Vec<Message>>,
}

/// Run `messages` through the engine and print the reply.
pub(crate) async fn exchange<V: Vendor + 'static>(
    engine: &CompletionEngine<V>,
    role: &SystemRole,
    messages: Vec<Message>,
    options: &CompletionOptions,
    printer: &mut dyn Printer,
    interrupt: &Interrupt,
) -> Result<Exchange> {
    let functions = (options.functions && !engine.functions().is_empty())
        .then(|| engine.functions().schemas());
    let request = CompletionRequest::new(&options.model, messages)
        .with_temperature(options.temperature)
        .with_top_p(options.top_p)
        .with_functions(functions);
    let requested = request.messages.clone();
    let mut completion = engine.complete(role, request, options.caching)?;
    let replay = completion.is_replay();
    let printed = print_stream(printer, &mut completion, interrupt).await?;
    if printed.interrupted {
        return Ok(Exchange {
            printed,
            messages: None,
        });
    }
    // A replay never talks to the vendor, so there are no function messages.
    let mut messages = if replay {
        requested
    } else {
        completion.transcript().await.unwrap_or(requested)
    };
    messages.push(Message::assistant(printed.text.clone()));
    Ok(Exchange {
        printed,
        messages: Some(messages),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_action_answers() {
        assert_eq!(
            ShellAction::parse("", ShellAction::Abort),
            Some(ShellAction::Abort)
        );
        assert_eq!(
            ShellAction::parse(" E ", ShellAction::Abort),
            Some(ShellAction::Execute)
        );
        assert_eq!(
            ShellAction::parse("d", ShellAction::Execute),
            Some(ShellAction::Describe)
        );
        assert_eq!(ShellAction::parse("maybe", ShellAction::Abort), None);
    }

    #[test]
    fn piped_input_stops_at_marker() {
        let input = "hello\nworld\n__quill__eof__\nprint hello\nexit()\n";
        let mut reader = io::Cursor::new(input);
        assert_eq!(read_piped(&mut reader).unwrap(), "hello\nworld\n");
        // The rest is left for interactive input.
        let rest: Vec<String> = (&mut reader).lines().map(|l| l.unwrap()).collect();
        assert_eq!(rest, vec!["print hello", "exit()"]);

        assert_eq!(read_piped(io::Cursor::new("diff\n")).unwrap(), "diff\n");
        assert_eq!(read_piped(io::Cursor::new("")).unwrap(), "");
    }

    #[test]
    fn piped_input_precedes_prompt() {
        assert_eq!(
            compose_prompt("diff\n", "write a message"),
            "diff\n\n\n#####\n\nwrite a message"
        );
        assert_eq!(compose_prompt("diff\n", ""), "diff\n");
        assert_eq!(compose_prompt("", "hello"), "hello");
    }

    #[test]
    fn options_builders() {
        let options = CompletionOptions::new("gpt-4o")
            .with_temperature(0.5)
            .with_top_p(0.9)
            .with_caching(false)
            .with_functions(false);
        assert_eq!(options.model, "gpt-4o");
        assert_eq!(options.temperature, 0.5);
        assert_eq!(options.top_p, 0.9);
        assert!(!options.caching);
        assert!(!options.functions);
    }
}
