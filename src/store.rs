//! Persisted panel state.
//!
//! Mirrors the extension's local storage keys: `chatHistory` (most recent
//! messages only), `selectedModel` and `selectedElement`.

use std::fs::OpenOptions;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StoreError;
use crate::types::{ChatMessage, PickedElement};

pub const MAX_PERSISTED_MESSAGES: usize = 50;

pub const STATE_FILE: &str = "state.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PersistedState {
    pub chat_history: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_element: Option<PickedElement>,
}

impl PersistedState {
    /// Build a state keeping only the newest [`MAX_PERSISTED_MESSAGES`].
    pub fn snapshot(
        history: &[ChatMessage],
        selected_model: Option<String>,
        selected_element: Option<PickedElement>,
    ) -> Self {
        let start = history.len().saturating_sub(MAX_PERSISTED_MESSAGES);
        Self {
            chat_history: history[start..].to_vec(),
            selected_model,
            selected_element,
        }
    }
}

pub trait StateStore {
    fn load(&self) -> Result<PersistedState, StoreError>;
    fn save(&self, state: &PersistedState) -> Result<(), StoreError>;
}

/// Pretty-printed JSON file on disk.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where an unreadable state file is moved so the next save cannot
    /// overwrite it.
    pub fn quarantine_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".corrupt");
        PathBuf::from(name)
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<PersistedState, StoreError> {
        if !self.path.exists() {
            return Ok(PersistedState::default());
        }
        let file = std::fs::File::open(&self.path)?;
        let reader = BufReader::new(file);
        match serde_json::from_reader(reader) {
            Ok(state) => Ok(state),
            Err(err) => {
                let aside = self.quarantine_path();
                std::fs::rename(&self.path, &aside)?;
                warn!(path = %aside.display(), error = %err, "Moved unreadable state file aside");
                Err(err.into())
            }
        }
    }

    fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;

        serde_json::to_writer_pretty(file, state)?;
        Ok(())
    }
}

/// In-memory store, for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<PersistedState>,
}

impl StateStore for MemoryStore {
    fn load(&self) -> Result<PersistedState, StoreError> {
        Ok(self
            .state
            .lock()
            .map(|state| state.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone()))
    }

    fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = state.clone();
        Ok(())
    }
}

/// `<local data dir>/page-chat/state.json`, falling back to the working directory.
pub fn default_state_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("page-chat").join(STATE_FILE))
        .unwrap_or_else(|| PathBuf::from(STATE_FILE))
}
