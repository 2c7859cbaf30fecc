//! Persistent chat transcripts.
//!
//! Each chat id names one file under the chat directory holding the full
//! transcript as a pretty-printed JSON array.  Writes replace the whole file.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde_json::{from_reader, to_writer_pretty};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::observability::CHAT_WRITES;
use crate::types::{Message, MessageRole};

/// The chat id whose transcript lives only as long as its session.
pub const EPHEMERAL_CHAT_ID: &str = "temp";

/// A directory of chat transcripts.
#[derive(Debug, Clone)]
pub struct ChatStore {
    dir: PathBuf,
    max_messages: usize,
}

impl ChatStore {
    /// Create a store rooted at `dir` keeping at most `max_messages` per chat.
    pub fn new(dir: impl Into<PathBuf>, max_messages: usize) -> Self {
        Self {
            dir: dir.into(),
            max_messages: max_messages.max(1),
        }
    }

    /// Create the store the configuration describes.
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.chat_cache_path, config.chat_cache_length)
    }

    /// The chat directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, chat_id: &str) -> Result<PathBuf> {
        validate_chat_id(chat_id)?;
        Ok(self.dir.join(chat_id))
    }

    /// Returns true if a transcript is stored under `chat_id`.
    pub fn exists(&self, chat_id: &str) -> bool {
        self.path(chat_id).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Read a transcript; an unknown chat is empty.
    pub fn read(&self, chat_id: &str) -> Result<Vec<Message>> {
        let path = self.path(chat_id)?;
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(Error::io("failed to open chat transcript", err)),
        };
        from_reader(BufReader::new(file)).map_err(|err| {
            Error::serialization(
                format!("failed to parse chat transcript {chat_id}"),
                Some(Box::new(err)),
            )
        })
    }

    /// Replace a transcript, truncating it to the configured length.
    pub fn write(&self, chat_id: &str, messages: &[Message]) -> Result<()> {
        let path = self.path(chat_id)?;
        fs::create_dir_all(&self.dir)
            .map_err(|err| Error::io("failed to create chat directory", err))?;
        let messages = truncate(messages, self.max_messages);
        let file =
            File::create(&path).map_err(|err| Error::io("failed to create chat transcript", err))?;
        let mut writer = BufWriter::new(file);
        to_writer_pretty(&mut writer, &messages).map_err(|err| {
            Error::serialization("failed to serialize chat transcript", Some(Box::new(err)))
        })?;
        writer
            .flush()
            .map_err(|err| Error::io("failed to write chat transcript", err))?;
        CHAT_WRITES.click();
        debug!(chat_id, messages = messages.len(), "wrote chat transcript");
        Ok(())
    }

    /// Delete a transcript; deleting an unknown chat is not an error.
    pub fn remove(&self, chat_id: &str) -> Result<()> {
        let path = self.path(chat_id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::io("failed to remove chat transcript", err)),
        }
    }

    /// Known chat ids, oldest first, excluding the ephemeral chat.
    pub fn list(&self) -> Result<Vec<String>> {
        let dir = match fs::read_dir(&self.dir) {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(Error::io("failed to read chat directory", err)),
        };
        let mut chats = Vec::new();
        for entry in dir {
            let entry = entry.map_err(|err| Error::io("failed to read chat directory", err))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name == EPHEMERAL_CHAT_ID || validate_chat_id(&name).is_err() {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(UNIX_EPOCH);
            chats.push((modified, name));
        }
        chats.sort();
        Ok(chats.into_iter().map(|(_, name)| name).collect())
    }

    /// A guard that deletes the ephemeral transcript when dropped.
    pub fn ephemeral(&self) -> EphemeralChat {
        EphemeralChat {
            store: self.clone(),
        }
    }
}

/// Removes the [`EPHEMERAL_CHAT_ID`] transcript on drop.
#[derive(Debug)]
pub struct EphemeralChat {
    store: ChatStore,
}

impl EphemeralChat {
    /// The id the ephemeral transcript is stored under.
    pub fn id(&self) -> &'static str {
        EPHEMERAL_CHAT_ID
    }
}

impl Drop for EphemeralChat {
    fn drop(&mut self) {
        if let Err(err) = self.store.remove(EPHEMERAL_CHAT_ID) {
            warn!(error = %err, "could not remove ephemeral chat");
        }
    }
}

/// Chat ids become file names, so they must be a single path component.
pub fn validate_chat_id(chat_id: &str) -> Result<()> {
    let invalid = chat_id.is_empty()
        || chat_id == "."
        || chat_id == ".."
        || chat_id.contains('/')
        || chat_id.contains('\\')
        || chat_id.contains('\0');
    if invalid {
        return Err(Error::validation(
            format!("invalid chat id {chat_id:?}"),
            Some("chat_id".to_string()),
        ));
    }
    Ok(())
}

/// Keep a leading system message and the newest messages that fit.
///
/// The kept history always resumes at a user message, so replies and function
/// results whose prompt was cut off are dropped as well.
fn truncate(messages: &[Message], max_messages: usize) -> Vec<Message> {
    if messages.len() <= max_messages {
        return messages.to_vec();
    }
    let (system, rest) = match messages.first() {
        Some(first) if first.is_system() => (Some(first), &messages[1..]),
        _ => (None, messages),
    };
    let budget = max_messages.saturating_sub(usize::from(system.is_some()));
    let mut tail = &rest[rest.len().saturating_sub(budget)..];
    while let Some(first) = tail.first() {
        if first.role == MessageRole::User {
            break;
        }
        tail = &tail[1..];
    }
    system.into_iter().chain(tail).cloned().collect()
}
