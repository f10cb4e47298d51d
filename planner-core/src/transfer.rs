//! Export and import of the whole application state as pretty JSON.
//!
//! Import runs through the same migration as locally loaded state, so a file
//! written by any older dashboard comes back with defaults filled in, line
//! totals recomputed and the selected event re-resolved.

use std::path::Path;

use crate::migrate::migrate_value;
use crate::model::AppState;
use crate::CoreError;

/// Default download name for exports.
pub const EXPORT_FILE_NAME: &str = "sga_state.json";

pub fn export_json(state: &AppState) -> Result<String, CoreError> {
    serde_json::to_string_pretty(state).map_err(|e| CoreError::Serialization(e.to_string()))
}

/// Parse and migrate. Only text that is not JSON at all is an error.
pub fn import_json(text: &str) -> Result<AppState, CoreError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| CoreError::Parse(e.to_string()))?;
    Ok(migrate_value(&value))
}

pub fn export_to_path(state: &AppState, path: impl AsRef<Path>) -> Result<(), CoreError> {
    let json = export_json(state)?;
    std::fs::write(path.as_ref(), json)?;
    log::info!("Exported state to {}", path.as_ref().display());
    Ok(())
}

pub fn import_from_path(path: impl AsRef<Path>) -> Result<AppState, CoreError> {
    let text = std::fs::read_to_string(path.as_ref())?;
    let state = import_json(&text)?;
    log::info!(
        "Imported {} event(s) from {}",
        state.document.events.len(),
        path.as_ref().display()
    );
    Ok(state)
}
