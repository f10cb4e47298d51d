//! Opaque identifiers for events, line items, checklist entries and PDFs.

use uuid::Uuid;

/// `prefix_` followed by 12 hex characters of a v4 UUID.
pub fn new_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &hex[..12])
}
