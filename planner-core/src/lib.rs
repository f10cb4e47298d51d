//! # planner-core — Event-planning document model
//!
//! The shared planning document (budget, events, calendar slots, PDF wall),
//! the per-device UI state that rides next to it, and everything that can
//! be computed from them without I/O.
//!
//! ## Architecture
//!
//! ```text
//!  edit surface ──► DocumentEdit / UiEdit ──► AppState
//!                                               │
//!                     ┌─────────────────────────┼──────────────────────┐
//!                     ▼                         ▼                      ▼
//!               budget::summarize      calendar::Placement     transfer::export_json
//!                                                                      │
//!  stored / imported JSON ──► migrate::migrate_value ◄─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`model`] — Document, Event, LineItem, PdfAttachment, UiState, AppState
//! - [`migrate`] — lenient loading and normalization
//! - [`edit`] — typed edit intents
//! - [`budget`] — spent / remaining arithmetic
//! - [`calendar`] — calendar window, drop hit-testing, timezone-qualified slots
//! - [`transfer`] — pretty JSON export and migrating import
//! - [`pdf_total`] — requested-amount extraction from PDF text

pub mod budget;
pub mod calendar;
pub mod edit;
pub mod id;
pub mod migrate;
pub mod model;
pub mod pdf_total;
pub mod transfer;

pub use budget::{format_money, summarize, BudgetSummary};
pub use calendar::{CalendarGrid, CalendarWindow, DragTracker, Placement};
pub use edit::{
    ChecklistPatch, DocumentEdit, EventPatch, LineItemPatch, NewEvent, PdfPatch, UiEdit,
};
pub use migrate::{migrate_document, migrate_value, normalize_document};
pub use model::{
    AppState, BookingTracker, ChecklistItem, Document, Event, EventCategory, EventStatus,
    LineItem, LineItemGroup, PdfAttachment, PdfWall, PurchaseTracker, SocialAsset,
    SocialStatus, SocialTracker, UiState,
};
pub use transfer::{export_json, import_json};

/// Errors from the few fallible operations in this crate (file I/O and
/// JSON that does not parse at all).
#[derive(Debug, Clone)]
pub enum CoreError {
    Parse(String),
    Serialization(String),
    Io(String),
}

impl std::fmt::Display for CoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "Parse error: {e}"),
            Self::Serialization(e) => write!(f, "Serialization error: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_display() {
        let err = CoreError::Parse("expected value".into());
        assert!(err.to_string().contains("Parse error"));
        let err: CoreError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, CoreError::Io(_)));
    }
}
