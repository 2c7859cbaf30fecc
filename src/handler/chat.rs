use std::io::Write;

use tracing::debug;

use crate::chat_store::{ChatStore, EPHEMERAL_CHAT_ID, EphemeralChat, validate_chat_id};
use crate::completion::CompletionEngine;
use crate::error::{Error, Result};
use crate::interrupt::Interrupt;
use crate::render::{Printed, Printer};
use crate::role::{DefaultRole, SystemRole};
use crate::types::{Message, MessageRole};
use crate::vendor::Vendor;

use super::{CompletionOptions, exchange};

/// A conversation persisted in the [`ChatStore`] across invocations.
pub struct ChatHandler<V: Vendor> {
    engine: CompletionEngine<V>,
    store: ChatStore,
    chat_id: String,
    role: SystemRole,
    interrupt: Interrupt,
    _ephemeral: Option<EphemeralChat>,
}

impl<V: Vendor + 'static> ChatHandler<V> {
    /// Open `chat_id` with `role`.
    ///
    /// An existing chat keeps the role it was started with: the default role
    /// adopts it and any other role is rejected.  The ephemeral chat always
    /// starts empty and is removed when the handler is dropped.
    pub fn new(
        engine: CompletionEngine<V>,
        store: ChatStore,
        chat_id: &str,
        role: SystemRole,
        interrupt: Interrupt,
    ) -> Result<Self> {
        validate_chat_id(chat_id)?;
        let mut ephemeral = None;
        let mut role = role;
        if chat_id == EPHEMERAL_CHAT_ID {
            store.remove(EPHEMERAL_CHAT_ID)?;
            ephemeral = Some(store.ephemeral());
        } else if let Some(stored) = stored_role(&store.read(chat_id)?) {
            if stored.name != role.name {
                if role.name != DefaultRole::Default.name() {
                    return Err(Error::validation(
                        format!(
                            "chat {chat_id:?} was started with role {:?}; cannot continue it as {:?}",
                            stored.name, role.name
                        ),
                        Some("role".to_string()),
                    ));
                }
                role = stored;
            }
        }
        Ok(Self {
            engine,
            store,
            chat_id: chat_id.to_string(),
            role,
            interrupt,
            _ephemeral: ephemeral,
        })
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// The role in effect, which may have been adopted from the stored chat.
    pub fn role(&self) -> &SystemRole {
        &self.role
    }

    pub fn engine(&self) -> &CompletionEngine<V> {
        &self.engine
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// The stored transcript.
    pub fn messages(&self) -> Result<Vec<Message>> {
        self.store.read(&self.chat_id)
    }

    /// Send `prompt` in this chat and print the reply.
    ///
    /// The transcript is rewritten only when the exchange completes.
    pub async fn handle(
        &self,
        prompt: &str,
        options: &CompletionOptions,
        printer: &mut dyn Printer,
    ) -> Result<Printed> {
        let mut messages = self.store.read(&self.chat_id)?;
        if messages.is_empty() {
            messages.push(Message::system(&self.role.role));
        }
        messages.push(Message::user(prompt));
        let exchange = exchange(
            &self.engine,
            &self.role,
            messages,
            options,
            printer,
            &self.interrupt,
        )
        .await?;
        match &exchange.messages {
            Some(messages) => {
                self.store.write(&self.chat_id, messages)?;
                debug!(chat_id = %self.chat_id, messages = messages.len(), "chat saved");
            }
            None => debug!(chat_id = %self.chat_id, "interrupted; chat left unchanged"),
        }
        Ok(exchange.printed)
    }
}

fn stored_role(messages: &[Message]) -> Option<SystemRole> {
    let first = messages.first().filter(|m| m.is_system())?;
    let name = SystemRole::name_from_message(&first.content)?;
    Some(SystemRole {
        name: name.to_string(),
        role: first.content.clone(),
    })
}

/// Write a stored transcript, one message per paragraph.
pub fn show_messages<W: Write>(store: &ChatStore, chat_id: &str, out: &mut W) -> Result<()> {
    if !store.exists(chat_id) {
        return Err(Error::validation(
            format!("chat {chat_id:?} not found"),
            Some("chat_id".to_string()),
        ));
    }
    let io_error = |err| Error::io("failed to write chat", err);
    for message in store.read(chat_id)? {
        match (&message.role, &message.function_call) {
            (MessageRole::Assistant, Some(call)) => {
                writeln!(out, "assistant: {}({})", call.name, call.arguments).map_err(io_error)?
            }
            (MessageRole::Function, _) => writeln!(
                out,
                "function {}: {}",
                message.name.as_deref().unwrap_or_default(),
                message.content
            )
            .map_err(io_error)?,
            (role, _) => writeln!(out, "{role}: {}", message.content).map_err(io_error)?,
        }
        writeln!(out).map_err(io_error)?;
    }
    Ok(())
}

/// The stored chat ids, oldest first.
pub fn list_ids(store: &ChatStore) -> Result<Vec<String>> {
    store.list()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::completion::tests::{ScriptedVendor, env};
    use crate::function::FunctionRegistry;
    use crate::render::TextPrinter;
    use crate::types::{Chunk, FinishReason};
    use std::sync::Arc;

    struct Fixture {
        cache_dir: tempfile::TempDir,
        chat_dir: tempfile::TempDir,
        vendor: Arc<ScriptedVendor>,
    }

    impl Fixture {
        fn new(responses: Vec<Vec<Chunk>>) -> Self {
            Self {
                cache_dir: tempfile::tempdir().unwrap(),
                chat_dir: tempfile::tempdir().unwrap(),
                vendor: ScriptedVendor::new(responses),
            }
        }

        fn store(&self) -> ChatStore {
            ChatStore::new(self.chat_dir.path(), 100)
        }

        fn handler(&self, chat_id: &str, role: SystemRole) -> Result<ChatHandler<ScriptedVendor>> {
            let engine = CompletionEngine::new(
                Arc::clone(&self.vendor),
                FunctionRegistry::with_builtins(),
                Cache::new(self.cache_dir.path(), 10),
            );
            ChatHandler::new(engine, self.store(), chat_id, role, Interrupt::new())
        }
    }

    fn printer() -> TextPrinter<Vec<u8>> {
        TextPrinter::new(Vec::new(), None, true)
    }

    #[tokio::test]
    async fn exchanges_accumulate() {
        let fixture = Fixture::new(vec![vec![Chunk::text("Hi")], vec![Chunk::text("Bye")]]);
        let role = DefaultRole::Default.role(&env());
        let options = CompletionOptions::new("gpt-4o").with_functions(false);
        let handler = fixture.handler("work", role.clone()).unwrap();
        handler.handle("hello", &options, &mut printer()).await.unwrap();
        handler.handle("goodbye", &options, &mut printer()).await.unwrap();

        let expected = vec![
            Message::system(&role.role),
            Message::user("hello"),
            Message::assistant("Hi"),
            Message::user("goodbye"),
            Message::assistant("Bye"),
        ];
        assert_eq!(fixture.store().read("work").unwrap(), expected);
        assert_eq!(fixture.vendor.requests()[1].messages, expected[..4].to_vec());
    }

    #[tokio::test]
    async fn function_messages_are_saved() {
        let listing = tempfile::tempdir().unwrap();
        std::fs::write(listing.path().join("a.txt"), "").unwrap();
        let arguments = serde_json::json!({"path": listing.path()}).to_string();
        let fixture = Fixture::new(vec![
            vec![
                Chunk::function_call(Some("list_dir".to_string()), Some(arguments.clone()))
                    .with_finish_reason(FinishReason::FunctionCall),
            ],
            vec![Chunk::text("One file.")],
        ]);
        let role = DefaultRole::Default.role(&env());
        let handler = fixture.handler("files", role).unwrap();
        let printed = handler
            .handle("what is here?", &CompletionOptions::new("gpt-4o"), &mut printer())
            .await
            .unwrap();
        assert_eq!(printed.text, "\nOne file.");

        let stored = fixture.store().read("files").unwrap();
        let roles: Vec<MessageRole> = stored.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                MessageRole::System,
                MessageRole::User,
                MessageRole::Assistant,
                MessageRole::Function,
                MessageRole::Assistant,
            ]
        );
        assert_eq!(stored[2].function_call.as_ref().unwrap().arguments, arguments);
        assert_eq!(stored[3].content, "a.txt");
        assert_eq!(stored[4].content, "\nOne file.");
    }

    #[tokio::test]
    async fn stored_role_is_adopted_or_enforced() {
        let fixture = Fixture::new(vec![vec![Chunk::text("ls")], vec![Chunk::text("ls -a")]]);
        let shell = DefaultRole::Shell.role(&env());
        let options = CompletionOptions::new("gpt-4o");
        fixture
            .handler("cmds", shell.clone())
            .unwrap()
            .handle("list files", &options, &mut printer())
            .await
            .unwrap();

        let adopted = fixture
            .handler("cmds", DefaultRole::Default.role(&env()))
            .unwrap();
        assert_eq!(adopted.role(), &shell);

        let err = fixture
            .handler("cmds", DefaultRole::Code.role(&env()))
            .err()
            .unwrap();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn failed_exchanges_write_nothing() {
        let fixture = Fixture::new(vec![]);
        fixture.vendor.push_failure(vec![
            Ok(Chunk::text("partial")),
            Err(Error::streaming("connection reset", None)),
        ]);
        let handler = fixture
            .handler("flaky", DefaultRole::Default.role(&env()))
            .unwrap();
        let result = handler
            .handle("hello", &CompletionOptions::new("gpt-4o"), &mut printer())
            .await;
        assert!(result.is_err());
        assert!(!fixture.store().exists("flaky"));
    }

    #[tokio::test]
    async fn ephemeral_chat_is_removed_on_drop() {
        let fixture = Fixture::new(vec![vec![Chunk::text("Hi")]]);
        fixture
            .store()
            .write(EPHEMERAL_CHAT_ID, &[Message::user("stale")])
            .unwrap();
        let handler = fixture
            .handler(EPHEMERAL_CHAT_ID, DefaultRole::Default.role(&env()))
            .unwrap();
        assert!(!fixture.store().exists(EPHEMERAL_CHAT_ID));
        handler
            .handle("hello", &CompletionOptions::new("gpt-4o"), &mut printer())
            .await
            .unwrap();
        assert_eq!(handler.messages().unwrap().len(), 3);
        drop(handler);
        assert!(!fixture.store().exists(EPHEMERAL_CHAT_ID));
    }

    #[test]
    fn show_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChatStore::new(dir.path(), 100);
        store
            .write(
                "notes",
                &[Message::system("You are Quill"), Message::user("hi")],
            )
            .unwrap();
        let mut out = Vec::new();
        show_messages(&store, "notes", &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "system: You are Quill\n\nuser: hi\n\n"
        );
        assert_eq!(list_ids(&store).unwrap(), vec!["notes".to_string()]);
        assert!(show_messages(&store, "missing", &mut Vec::new()).is_err());
    }
}
