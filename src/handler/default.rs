use crate::completion::CompletionEngine;
use crate::error::Result;
use crate::interrupt::Interrupt;
use crate::render::{Printed, Printer};
use crate::role::SystemRole;
use crate::types::Message;
use crate::vendor::Vendor;

use super::{CompletionOptions, exchange};

/// One prompt, one reply, nothing remembered.
pub struct DefaultHandler<V: Vendor> {
    engine: CompletionEngine<V>,
    role: SystemRole,
    interrupt: Interrupt,
}

impl<V: Vendor + 'static> DefaultHandler<V> {
    pub fn new(engine: CompletionEngine<V>, role: SystemRole, interrupt: Interrupt) -> Self {
        Self {
            engine,
            role,
            interrupt,
        }
    }

    pub fn role(&self) -> &SystemRole {
        &self.role
    }

    /// The messages sent for `prompt`.
    pub fn messages(&self, prompt: &str) -> Vec<Message> {
        vec![Message::system(&self.role.role), Message::user(prompt)]
    }

    /// Complete `prompt` and print the reply.
    pub async fn handle(
        &self,
        prompt: &str,
        options: &CompletionOptions,
        printer: &mut dyn Printer,
    ) -> Result<Printed> {
        let messages = self.messages(prompt);
        let exchange = exchange(
            &self.engine,
            &self.role,
            messages,
            options,
            printer,
            &self.interrupt,
        )
        .await?;
        Ok(exchange.printed)
    }
}
