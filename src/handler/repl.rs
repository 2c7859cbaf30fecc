use rustyline::error::ReadlineError;

use crate::error::Result;
use crate::render::Printer;
use crate::role::DefaultRole;
use crate::shell::{self, ShellEnv};
use crate::vendor::Vendor;

use super::{ChatHandler, CompletionOptions, DefaultHandler, line_editor, readline_error};

const PROMPT: &str = ">>> ";
const CONTINUATION_PROMPT: &str = "... ";
const MULTILINE_FENCE: &str = "\"\"\"";
const EXIT: &str = "exit()";

/// What a line typed at the REPL asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplAction {
    /// Nothing to do yet; a multi-line entry is open.
    Pending,
    /// An empty line.
    Skip,
    Submit(String),
    Exit,
    /// Run the last generated command.
    Execute,
    /// Describe the last generated command.
    Describe,
}

/// Line assembly for the REPL.
///
/// A line holding only `"""` opens a multi-line entry and the next such line
/// submits it.
#[derive(Debug, Default)]
pub struct ReplInput {
    multiline: Option<Vec<String>>,
}

impl ReplInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// The prompt to show for the next line.
    pub fn prompt(&self) -> &'static str {
        if self.multiline.is_some() {
            CONTINUATION_PROMPT
        } else {
            PROMPT
        }
    }

    /// Feed one line.  `shell` enables the `e` and `d` shortcuts.
    pub fn feed(&mut self, line: &str, shell: bool) -> ReplAction {
        let trimmed = line.trim();
        if let Some(lines) = self.multiline.as_mut() {
            if trimmed != MULTILINE_FENCE {
                lines.push(line.to_string());
                return ReplAction::Pending;
            }
            let prompt = self.multiline.take().unwrap_or_default().join("\n");
            return if prompt.trim().is_empty() {
                ReplAction::Skip
            } else {
                ReplAction::Submit(prompt)
            };
        }
        match trimmed {
            "" => ReplAction::Skip,
            MULTILINE_FENCE => {
                self.multiline = Some(Vec::new());
                ReplAction::Pending
            }
            EXIT => ReplAction::Exit,
            "e" if shell => ReplAction::Execute,
            "d" if shell => ReplAction::Describe,
            _ => ReplAction::Submit(line.to_string()),
        }
    }
}

/// An interactive loop over a chat.
pub struct ReplHandler<V: Vendor> {
    chat: ChatHandler<V>,
    env: ShellEnv,
}

impl<V: Vendor + 'static> ReplHandler<V> {
    pub fn new(chat: ChatHandler<V>, env: ShellEnv) -> Self {
        Self { chat, env }
    }

    pub fn chat(&self) -> &ChatHandler<V> {
        &self.chat
    }

    /// Read prompts until `exit()`, Ctrl-C or Ctrl-D.
    ///
    /// `initial` is sent before the first prompt is read.
    pub async fn run(
        &self,
        initial: Option<&str>,
        options: &CompletionOptions,
        printer: &mut dyn Printer,
    ) -> Result<()> {
        let mut editor = line_editor()?;
        let shell = self.chat.role().is_shell();
        println!("Entering REPL mode, press Ctrl+C to exit.");
        if shell {
            println!("Type \"e\" to execute the last command, \"d\" to describe it.");
        }

        let mut last = String::new();
        if let Some(initial) = initial {
            last = self.chat.handle(initial, options, printer).await?.text;
        }
        let mut input = ReplInput::new();
        loop {
            self.chat.interrupt().reset();
            let line = match editor.readline(input.prompt()) {
                Ok(line) => line,
                Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
                Err(err) => return Err(readline_error(err)),
            };
            match input.feed(&line, shell) {
                ReplAction::Pending | ReplAction::Skip => {}
                ReplAction::Exit => break,
                ReplAction::Execute => {
                    if !last.trim().is_empty() {
                        shell::run_interactive(last.trim()).await?;
                    }
                }
                ReplAction::Describe => {
                    if !last.trim().is_empty() {
                        let describe = DefaultHandler::new(
                            self.chat.engine().clone(),
                            DefaultRole::DescribeShell.role(&self.env),
                            self.chat.interrupt().clone(),
                        );
                        describe.handle(&last, options, printer).await?;
                    }
                }
                ReplAction::Submit(prompt) => {
                    let _ = editor.add_history_entry(prompt.as_str());
                    last = self.chat.handle(&prompt, options, printer).await?.text;
                }
            }
        }
        Ok(())
    }
}
