//! Lenient loading of stored, imported and legacy documents.
//!
//! Every path that turns untrusted JSON into an [`AppState`] goes through
//! [`migrate_value`]: local snapshots, imported files, and the seed itself.
//! Nothing here fails. Missing fields take defaults, numbers are coerced
//! (numeric strings parse, anything else becomes the default), line-item
//! totals are recomputed, and PDFs without a storage location are dropped.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::calendar::now_iso;
use crate::id::new_id;
use crate::model::{
    AppState, BookingTracker, ChecklistItem, Document, Event, EventCategory, EventStatus,
    LineItem, LineItemGroup, PdfAttachment, PdfWall, PurchaseTracker, SocialAsset,
    SocialStatus, SocialTracker, UiState, DEFAULT_PDF_MIME, SLIDE_COUNT,
};

fn coerce_f64(value: Option<&Value>) -> Option<f64> {
    let n = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Bool(b) => f64::from(u8::from(*b)),
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn coerce_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn coerce_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        _ => false,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

fn array<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Vec<Value>> {
    obj.get(key).and_then(Value::as_array)
}

/// Hands out ids, replacing missing or duplicate ones.
struct IdPool {
    prefix: &'static str,
    seen: HashSet<String>,
}

impl IdPool {
    fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            seen: HashSet::new(),
        }
    }

    fn claim(&mut self, candidate: Option<String>) -> String {
        let id = match non_empty(candidate) {
            Some(id) if !self.seen.contains(&id) => id,
            _ => new_id(self.prefix),
        };
        self.seen.insert(id.clone());
        id
    }
}

fn migrate_line_item(raw: &Value, ids: &mut IdPool) -> Option<LineItem> {
    let obj = raw.as_object()?;
    let group = coerce_string(obj.get("group"))
        .map(|g| LineItemGroup::from_label(&g))
        .unwrap_or_default();
    let name = coerce_string(obj.get("name")).unwrap_or_default();
    let unit = coerce_f64(obj.get("unit")).unwrap_or(0.0);
    let qty = coerce_f64(obj.get("qty")).unwrap_or(0.0);

    let mut item = LineItem::new(group, name, unit, qty);
    item.id = ids.claim(coerce_string(obj.get("id")));
    item.kind = coerce_string(obj.get("type")).unwrap_or_default();
    item.link = coerce_string(obj.get("link"));
    item.notes = coerce_string(obj.get("notes"));
    Some(item)
}

fn migrate_checklist_item(raw: &Value, ids: &mut IdPool) -> Option<ChecklistItem> {
    let obj = raw.as_object()?;
    Some(ChecklistItem {
        id: ids.claim(coerce_string(obj.get("id"))),
        label: coerce_string(obj.get("label")).unwrap_or_default(),
        done: coerce_bool(obj.get("done")),
        notes: coerce_string(obj.get("notes")),
    })
}

fn migrate_social(raw: Option<&Value>) -> SocialTracker {
    let Some(obj) = raw.and_then(Value::as_object) else {
        return SocialTracker {
            notes: Some(String::new()),
            ..SocialTracker::default()
        };
    };
    let assets = array(obj, "assets")
        .map(|assets| {
            assets
                .iter()
                .filter_map(|a| {
                    let a = a.as_object()?;
                    Some(SocialAsset {
                        id: coerce_string(a.get("id")).unwrap_or_else(|| new_id("asset")),
                        name: coerce_string(a.get("name")).unwrap_or_default(),
                        mime: coerce_string(a.get("mime")).unwrap_or_default(),
                        data_url: coerce_string(a.get("dataUrl"))?,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    SocialTracker {
        status: coerce_string(obj.get("status"))
            .map(|s| SocialStatus::from_label(&s))
            .unwrap_or_default(),
        notes: coerce_string(obj.get("notes")),
        assets,
    }
}

fn migrate_booking(raw: Option<&Value>) -> BookingTracker {
    let Some(obj) = raw.and_then(Value::as_object) else {
        return BookingTracker::default();
    };
    BookingTracker {
        booked: coerce_bool(obj.get("booked")),
        booked_by: coerce_string(obj.get("bookedBy")),
        booked_at: coerce_string(obj.get("bookedAt")),
        notes: coerce_string(obj.get("notes")),
    }
}

fn migrate_purchase(raw: Option<&Value>) -> PurchaseTracker {
    let Some(obj) = raw.and_then(Value::as_object) else {
        return PurchaseTracker::default();
    };
    PurchaseTracker {
        status_text: coerce_string(obj.get("statusText")),
        last_update_iso: coerce_string(obj.get("lastUpdateISO")),
    }
}

/// Whole-number count of at least one.
pub(crate) fn coerce_planned_count(value: f64) -> u32 {
    if !value.is_finite() || value < 1.0 {
        1
    } else {
        value.round().min(f64::from(u32::MAX)) as u32
    }
}

/// Finite and non-negative.
pub(crate) fn coerce_cost(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

fn migrate_event(raw: &Value, ids: &mut IdPool) -> Option<Event> {
    let obj = raw.as_object()?;
    let mut item_ids = IdPool::new("item");
    let mut checklist_ids = IdPool::new("chk");

    Some(Event {
        id: ids.claim(coerce_string(obj.get("id"))),
        title: coerce_string(obj.get("title")).unwrap_or_else(|| "New Event".to_string()),
        category: coerce_string(obj.get("category"))
            .map(|c| EventCategory::from_label(&c))
            .unwrap_or_default(),
        status: coerce_string(obj.get("status"))
            .map(|s| EventStatus::from_label(&s))
            .unwrap_or_default(),
        start: non_empty(coerce_string(obj.get("start"))),
        end: non_empty(coerce_string(obj.get("end"))),
        location: coerce_string(obj.get("location")),
        estimated_cost: coerce_cost(coerce_f64(obj.get("estimatedCost")).unwrap_or(0.0)),
        planned_count: coerce_planned_count(coerce_f64(obj.get("plannedCount")).unwrap_or(1.0)),
        booking: migrate_booking(obj.get("booking")),
        purchase: migrate_purchase(obj.get("purchase")),
        checklist: array(obj, "checklist")
            .map(|list| {
                list.iter()
                    .filter_map(|c| migrate_checklist_item(c, &mut checklist_ids))
                    .collect()
            })
            .unwrap_or_default(),
        social: migrate_social(obj.get("social")),
        items: array(obj, "items")
            .map(|list| {
                list.iter()
                    .filter_map(|it| migrate_line_item(it, &mut item_ids))
                    .collect()
            })
            .unwrap_or_default(),
        pdf_path: non_empty(coerce_string(obj.get("pdfPath"))),
    })
}

/// Keeps only cloud-shaped attachments: both `url` and `storagePath` must
/// be strings. Legacy inline PDFs are dropped and have to be re-uploaded.
fn migrate_pdf(raw: &Value, ids: &mut IdPool) -> Option<PdfAttachment> {
    let obj = raw.as_object()?;
    let url = obj.get("url")?.as_str()?.to_string();
    let storage_path = obj.get("storagePath")?.as_str()?.to_string();

    Some(PdfAttachment {
        id: ids.claim(coerce_string(obj.get("id"))),
        title: coerce_string(obj.get("title")).unwrap_or_default(),
        file_name: coerce_string(obj.get("fileName")).unwrap_or_default(),
        mime: Some(
            non_empty(coerce_string(obj.get("mime")))
                .unwrap_or_else(|| DEFAULT_PDF_MIME.to_string()),
        ),
        url,
        storage_path,
        extracted_total: coerce_f64(obj.get("extractedTotal")),
        manual_total: coerce_f64(obj.get("manualTotal")),
        added_at_iso: coerce_string(obj.get("addedAtISO")).unwrap_or_else(now_iso),
    })
}

/// Migrate the document fields of a stored state; UI fields are ignored.
pub fn migrate_document(raw: &Value) -> Document {
    let Some(obj) = raw.as_object() else {
        log::warn!("Stored document is not an object; using seed");
        return Document::seed();
    };
    let seed = Document::seed();

    let events = match array(obj, "events") {
        Some(list) => {
            let mut ids = IdPool::new("evt");
            list.iter().filter_map(|e| migrate_event(e, &mut ids)).collect()
        }
        None => seed.events,
    };

    let docs = match obj
        .get("pdfWall")
        .and_then(Value::as_object)
        .and_then(|wall| array(wall, "docs"))
    {
        Some(list) => {
            let mut ids = IdPool::new("pdf");
            let docs: Vec<PdfAttachment> =
                list.iter().filter_map(|d| migrate_pdf(d, &mut ids)).collect();
            if docs.len() < list.len() {
                log::info!(
                    "Dropped {} PDF attachment(s) without a storage location",
                    list.len() - docs.len()
                );
            }
            docs
        }
        None => seed.pdf_wall.docs,
    };

    Document {
        total_budget: coerce_f64(obj.get("totalBudget")).unwrap_or(seed.total_budget),
        walmart_card_balance: coerce_f64(obj.get("walmartCardBalance"))
            .unwrap_or(seed.walmart_card_balance),
        events,
        pdf_wall: PdfWall { docs },
    }
}

fn migrate_ui(raw: Option<&Value>, document: &Document) -> UiState {
    let mut ui = UiState::seed();
    if let Some(obj) = raw.and_then(Value::as_object) {
        if let Some(slide) = coerce_f64(obj.get("activeSlide")) {
            ui.set_active_slide(slide.round() as i64);
        }
        if let Some(selected) = obj.get("selectedEventId") {
            ui.selected_event_id = coerce_string(Some(selected));
        }
    }
    ui.active_slide = ui.active_slide.min(SLIDE_COUNT - 1);

    let resolves = ui
        .selected_event_id
        .as_deref()
        .is_some_and(|id| document.contains_event(id));
    if !resolves {
        ui.selected_event_id = document.first_event_id().map(str::to_string);
    }
    ui
}

/// Turn any JSON value into a valid [`AppState`].
pub fn migrate_value(raw: &Value) -> AppState {
    if !raw.is_object() {
        log::warn!("Stored state is not an object; using seed");
        return AppState::seed();
    }
    let document = migrate_document(raw);
    let ui = migrate_ui(raw.get("ui"), &document);
    AppState { document, ui }
}

/// Re-apply value invariants to a document that is already typed, e.g.
/// after a wholesale replace from an edit or a remote snapshot.
pub fn normalize_document(doc: &mut Document) {
    for event in &mut doc.events {
        event.estimated_cost = coerce_cost(event.estimated_cost);
        event.planned_count = event.planned_count.max(1);
        for item in &mut event.items {
            // setters recompute total from the current unit and qty
            let (unit, qty) = (item.unit(), item.qty());
            item.set_unit(unit);
            item.set_qty(qty);
        }
    }
    for pdf in &mut doc.pdf_wall.docs {
        if pdf.mime.as_deref().map_or(true, str::is_empty) {
            pdf.mime = Some(DEFAULT_PDF_MIME.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_non_object_falls_back_to_seed() {
        let state = migrate_value(&json!([1, 2, 3]));
        assert_eq!(state.document.events.len(), Document::seed().events.len());
        assert_eq!(state.ui.selected_event_id.as_deref(), Some("evt_velvet"));
    }

    #[test]
    fn test_missing_collections_use_seed() {
        let state = migrate_value(&json!({ "totalBudget": "9000" }));
        assert_eq!(state.document.total_budget, 9000.0);
        assert_eq!(state.document.walmart_card_balance, 1282.0);
        assert_eq!(state.document.events[0].id, "evt_velvet");
        assert_eq!(state.document.pdf_wall.docs.len(), 4);
    }

    #[test]
    fn test_event_defaults_and_coercion() {
        let state = migrate_value(&json!({
            "events": [{
                "id": "evt_a",
                "title": "Food Drive",
                "category": "Food Drive",
                "status": "Launched",
                "estimatedCost": "-40",
                "plannedCount": 0,
                "items": [{ "id": "it", "unit": "2.5", "qty": 4, "total": 1 }]
            }]
        }));

        let event = &state.document.events[0];
        assert_eq!(event.category, EventCategory::FoodDrive);
        assert_eq!(event.status, EventStatus::Planned);
        assert_eq!(event.estimated_cost, 0.0);
        assert_eq!(event.planned_count, 1);
        assert_eq!(event.items[0].total(), 10.0);
        assert_eq!(event.social.status, SocialStatus::NotStarted);
        assert!(!event.booking.booked);
        assert!(event.checklist.is_empty());
    }

    #[test]
    fn test_duplicate_and_missing_ids_are_replaced() {
        let state = migrate_value(&json!({
            "events": [
                { "id": "evt_same", "title": "A" },
                { "id": "evt_same", "title": "B" },
                { "title": "C" }
            ]
        }));
        let ids: HashSet<&str> = state.document.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(state.document.events[0].id, "evt_same");
    }

    #[test]
    fn test_legacy_pdfs_dropped() {
        let state = migrate_value(&json!({
            "events": [],
            "pdfWall": { "docs": [
                { "id": "p1", "title": "Inline", "dataUrl": "data:application/pdf;base64,AAAA" },
                { "id": "p2", "title": "Cloud", "url": "https://cdn/p2.pdf", "storagePath": "rooms/default/pdfs/p2/p2.pdf", "manualTotal": "125" }
            ]}
        }));
        let docs = &state.document.pdf_wall.docs;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "p2");
        assert_eq!(docs[0].mime.as_deref(), Some(DEFAULT_PDF_MIME));
        assert_eq!(docs[0].display_total(), 125.0);
    }

    #[test]
    fn test_dangling_selection_resolves_to_first_event() {
        let state = migrate_value(&json!({
            "events": [{ "id": "evt_1", "title": "One" }, { "id": "evt_2", "title": "Two" }],
            "ui": { "activeSlide": 9, "selectedEventId": "evt_deleted" }
        }));
        assert_eq!(state.ui.selected_event_id.as_deref(), Some("evt_1"));
        assert_eq!(state.ui.active_slide, SLIDE_COUNT - 1);
    }

    #[test]
    fn test_no_events_means_no_selection() {
        let state = migrate_value(&json!({ "events": [], "ui": { "selectedEventId": "evt_velvet" } }));
        assert!(state.ui.selected_event_id.is_none());
    }

    #[test]
    fn test_migration_is_idempotent() {
        let once = migrate_value(&json!({
            "events": [{ "title": "Untitled", "items": [{ "unit": 3, "qty": 3 }] }],
            "pdfWall": { "docs": [] }
        }));
        let again = migrate_value(&serde_json::to_value(&once).unwrap());
        assert_eq!(once, again);
    }

    #[test]
    fn test_normalize_document_restores_invariants() {
        let mut doc = Document::seed();
        doc.events[0].estimated_cost = -10.0;
        doc.events[0].planned_count = 0;
        doc.pdf_wall.docs[0].mime = None;
        normalize_document(&mut doc);
        assert_eq!(doc.events[0].estimated_cost, 0.0);
        assert_eq!(doc.events[0].planned_count, 1);
        assert_eq!(doc.pdf_wall.docs[0].mime.as_deref(), Some(DEFAULT_PDF_MIME));
    }
}
