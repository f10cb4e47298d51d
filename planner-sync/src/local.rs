//! Device-local persistence of the application state and the client id.
//!
//! Loading never fails: absent or corrupt state falls back to the seed
//! (after migration for anything that parses).

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use planner_core::migrate::migrate_value;
use planner_core::model::AppState;

use crate::protocol::ClientId;

/// File holding the serialized [`AppState`].
pub const STATE_FILE_NAME: &str = "sga_presentation_os_v3.json";
/// File holding the device's client id.
pub const CLIENT_ID_FILE_NAME: &str = "sga_client_id_v1";

/// Local storage errors.
#[derive(Debug, Clone)]
pub enum LocalStoreError {
    Io(String),
    Serialization(String),
}

impl std::fmt::Display for LocalStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Serialization(e) => write!(f, "Serialization error: {e}"),
        }
    }
}

impl std::error::Error for LocalStoreError {}

impl From<std::io::Error> for LocalStoreError {
    fn from(e: std::io::Error) -> Self {
        LocalStoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for LocalStoreError {
    fn from(e: serde_json::Error) -> Self {
        LocalStoreError::Serialization(e.to_string())
    }
}

/// Local persistence adapter.
///
/// Implementors provide raw text access; typed load/save are derived.
pub trait LocalStore: Send + 'static {
    /// Stored state text, `None` when nothing was saved yet.
    fn load_raw(&self) -> Result<Option<String>, LocalStoreError>;
    fn save_raw(&self, json: &str) -> Result<(), LocalStoreError>;

    fn load_client_id(&self) -> Result<Option<String>, LocalStoreError>;
    fn save_client_id(&self, id: &str) -> Result<(), LocalStoreError>;

    /// Stored state after migration, or the seed.
    fn load(&self) -> AppState {
        match self.load_raw() {
            Ok(Some(text)) => match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(value) => migrate_value(&value),
                Err(e) => {
                    log::warn!("Stored state is not valid JSON ({e}); using seed");
                    AppState::seed()
                }
            },
            Ok(None) => AppState::seed(),
            Err(e) => {
                log::warn!("Cannot read stored state ({e}); using seed");
                AppState::seed()
            }
        }
    }

    fn save(&self, state: &AppState) -> Result<(), LocalStoreError> {
        let json = serde_json::to_string(state)?;
        self.save_raw(&json)
    }
}

/// The persisted client id, generating and saving one on first use.
pub fn resolve_client_id(store: &impl LocalStore) -> ClientId {
    match store.load_client_id() {
        Ok(Some(raw)) => {
            if let Some(id) = ClientId::parse(&raw) {
                return id;
            }
        }
        Ok(None) => {}
        Err(e) => log::warn!("Cannot read client id ({e}); generating a new one"),
    }

    let id = ClientId::generate();
    if let Err(e) = store.save_client_id(id.as_str()) {
        log::warn!("Cannot persist client id: {e}");
    }
    log::info!("Generated client id {id}");
    id
}

// ─── File store ──────────────────────────────────────────────────────

/// State and client id as two files in one directory.
///
/// Saves go through a temporary file and a rename, so a crash mid-save
/// leaves the previous state intact.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, LocalStoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE_NAME)
    }

    fn read_optional(path: &Path) -> Result<Option<String>, LocalStoreError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_atomic(path: &Path, contents: &str) -> Result<(), LocalStoreError> {
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl LocalStore for FileStore {
    fn load_raw(&self) -> Result<Option<String>, LocalStoreError> {
        Self::read_optional(&self.state_path())
    }

    fn save_raw(&self, json: &str) -> Result<(), LocalStoreError> {
        Self::write_atomic(&self.state_path(), json)
    }

    fn load_client_id(&self) -> Result<Option<String>, LocalStoreError> {
        Self::read_optional(&self.dir.join(CLIENT_ID_FILE_NAME))
    }

    fn save_client_id(&self, id: &str) -> Result<(), LocalStoreError> {
        Self::write_atomic(&self.dir.join(CLIENT_ID_FILE_NAME), id)
    }
}

// ─── Memory store ────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MemorySlots {
    state: Option<String>,
    client_id: Option<String>,
    saves: usize,
}

/// In-memory store; clones share the same slots.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slots: Arc<Mutex<MemorySlots>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated with raw state text.
    pub fn with_raw(text: impl Into<String>) -> Self {
        let store = Self::default();
        if let Ok(mut slots) = store.slots.lock() {
            slots.state = Some(text.into());
        }
        store
    }

    pub fn raw(&self) -> Option<String> {
        self.slots.lock().ok()?.state.clone()
    }

    /// Number of state saves so far.
    pub fn save_count(&self) -> usize {
        self.slots.lock().map(|s| s.saves).unwrap_or(0)
    }

    fn slots(&self) -> Result<std::sync::MutexGuard<'_, MemorySlots>, LocalStoreError> {
        self.slots
            .lock()
            .map_err(|_| LocalStoreError::Io("memory store poisoned".into()))
    }
}

impl LocalStore for MemoryStore {
    fn load_raw(&self) -> Result<Option<String>, LocalStoreError> {
        Ok(self.slots()?.state.clone())
    }

    fn save_raw(&self, json: &str) -> Result<(), LocalStoreError> {
        let mut slots = self.slots()?;
        slots.state = Some(json.to_string());
        slots.saves += 1;
        Ok(())
    }

    fn load_client_id(&self) -> Result<Option<String>, LocalStoreError> {
        Ok(self.slots()?.client_id.clone())
    }

    fn save_client_id(&self, id: &str) -> Result<(), LocalStoreError> {
        self.slots()?.client_id = Some(id.to_string());
        Ok(())
    }
}
