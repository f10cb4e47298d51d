//! Edit intents produced by the edit surface.
//!
//! Widgets never touch the document directly. They describe a change as a
//! [`DocumentEdit`] (shared, synchronized) or a [`UiEdit`] (this device
//! only) and hand it to the reconciler, which applies it to its own copy.
//! Application never fails. Numbers are coerced and unknown targets are
//! ignored.

use crate::id::new_id;
use crate::migrate::{coerce_cost, coerce_planned_count};
use crate::model::{
    AppState, BookingTracker, ChecklistItem, Document, Event, EventCategory, EventStatus,
    LineItem, LineItemGroup, PdfAttachment, PurchaseTracker, SocialStatus, SocialTracker,
    UiState,
};

/// Template for [`DocumentEdit::AddEvent`]. Unset fields take the
/// "New Event" defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewEvent {
    pub id: Option<String>,
    pub title: Option<String>,
    pub category: Option<EventCategory>,
    pub status: Option<EventStatus>,
    pub estimated_cost: Option<f64>,
    pub planned_count: Option<f64>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub location: Option<String>,
    pub booking: Option<BookingTracker>,
    pub purchase: Option<PurchaseTracker>,
    pub social: Option<SocialTracker>,
    pub checklist: Vec<ChecklistItem>,
    pub items: Vec<LineItem>,
}

/// Starter checklist for events created from the calendar.
pub const DEFAULT_CHECKLIST: [&str; 4] = [
    "Book location",
    "Finalize supplies/items",
    "Poster ready",
    "First post scheduled",
];

impl NewEvent {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// Unscheduled event with the starter checklist, as created from the
    /// calendar's "new event" action.
    pub fn from_calendar(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            category: Some(EventCategory::Other),
            status: Some(EventStatus::Planned),
            estimated_cost: Some(0.0),
            planned_count: Some(1.0),
            location: Some("TBD".to_string()),
            booking: Some(BookingTracker::default()),
            purchase: Some(PurchaseTracker {
                status_text: Some("Planned — not submitted".to_string()),
                last_update_iso: Some(crate::calendar::now_iso()),
            }),
            social: Some(SocialTracker {
                status: SocialStatus::NotStarted,
                notes: Some(String::new()),
                assets: Vec::new(),
            }),
            checklist: DEFAULT_CHECKLIST.iter().map(|l| ChecklistItem::new(*l)).collect(),
            ..Self::default()
        }
    }

    fn into_event(self, doc: &Document) -> Event {
        let id = match self.id.filter(|id| !id.is_empty() && !doc.contains_event(id)) {
            Some(id) => id,
            None => new_id("evt"),
        };
        Event {
            id,
            title: self
                .title
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "New Event".to_string()),
            category: self.category.unwrap_or_default(),
            status: self.status.unwrap_or_default(),
            start: self.start,
            end: self.end,
            location: Some(
                self.location
                    .filter(|l| !l.is_empty())
                    .unwrap_or_else(|| "TBD".to_string()),
            ),
            estimated_cost: coerce_cost(self.estimated_cost.unwrap_or(0.0)),
            planned_count: coerce_planned_count(self.planned_count.unwrap_or(1.0)),
            booking: self.booking.unwrap_or_default(),
            purchase: self.purchase.unwrap_or_default(),
            checklist: self.checklist,
            social: self.social.unwrap_or_default(),
            items: self.items,
            pdf_path: None,
        }
    }
}

/// Partial update of an event. `None` leaves a field alone; for optional
/// fields `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventPatch {
    pub title: Option<String>,
    pub category: Option<EventCategory>,
    pub status: Option<EventStatus>,
    pub start: Option<Option<String>>,
    pub end: Option<Option<String>>,
    pub location: Option<Option<String>>,
    pub estimated_cost: Option<f64>,
    pub planned_count: Option<f64>,
    pub booking: Option<BookingTracker>,
    pub purchase: Option<PurchaseTracker>,
    pub social: Option<SocialTracker>,
    pub checklist: Option<Vec<ChecklistItem>>,
    pub items: Option<Vec<LineItem>>,
}

impl EventPatch {
    pub fn schedule(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: Some(Some(start.into())),
            end: Some(Some(end.into())),
            ..Self::default()
        }
    }

    pub fn unschedule() -> Self {
        Self {
            start: Some(None),
            end: Some(None),
            ..Self::default()
        }
    }

    fn apply_to(self, event: &mut Event) {
        if let Some(title) = self.title {
            event.title = title;
        }
        if let Some(category) = self.category {
            event.category = category;
        }
        if let Some(status) = self.status {
            event.status = status;
        }
        if let Some(start) = self.start {
            event.start = start.filter(|s| !s.is_empty());
        }
        if let Some(end) = self.end {
            event.end = end.filter(|s| !s.is_empty());
        }
        if let Some(location) = self.location {
            event.location = location;
        }
        if let Some(cost) = self.estimated_cost {
            event.estimated_cost = coerce_cost(cost);
        }
        if let Some(count) = self.planned_count {
            event.planned_count = coerce_planned_count(count);
        }
        if let Some(booking) = self.booking {
            event.booking = booking;
        }
        if let Some(purchase) = self.purchase {
            event.purchase = purchase;
        }
        if let Some(social) = self.social {
            event.social = social;
        }
        if let Some(checklist) = self.checklist {
            event.checklist = checklist;
        }
        if let Some(items) = self.items {
            event.items = items;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineItemPatch {
    pub group: Option<LineItemGroup>,
    pub kind: Option<String>,
    pub name: Option<String>,
    pub unit: Option<f64>,
    pub qty: Option<f64>,
    pub link: Option<Option<String>>,
    pub notes: Option<Option<String>>,
}

impl LineItemPatch {
    fn apply_to(self, item: &mut LineItem) {
        if let Some(group) = self.group {
            item.group = group;
        }
        if let Some(kind) = self.kind {
            item.kind = kind;
        }
        if let Some(name) = self.name {
            item.name = name;
        }
        if let Some(unit) = self.unit {
            item.set_unit(unit);
        }
        if let Some(qty) = self.qty {
            item.set_qty(qty);
        }
        if let Some(link) = self.link {
            item.link = link;
        }
        if let Some(notes) = self.notes {
            item.notes = notes;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChecklistPatch {
    pub label: Option<String>,
    pub done: Option<bool>,
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PdfPatch {
    pub title: Option<String>,
    pub extracted_total: Option<Option<f64>>,
    pub manual_total: Option<Option<f64>>,
}

/// A change to the shared document.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentEdit {
    SetTotalBudget(f64),
    SetCardBalance(f64),
    /// Inserts at the front and selects the new event.
    AddEvent(NewEvent),
    UpdateEvent { id: String, patch: EventPatch },
    RemoveEvent { id: String },
    AddLineItem { event_id: String, item: LineItem },
    UpdateLineItem { event_id: String, item_id: String, patch: LineItemPatch },
    RemoveLineItem { event_id: String, item_id: String },
    AddChecklistItem { event_id: String, label: String },
    UpdateChecklistItem { event_id: String, item_id: String, patch: ChecklistPatch },
    ToggleChecklistItem { event_id: String, item_id: String },
    RemoveChecklistItem { event_id: String, item_id: String },
    /// Inserts at the front of the PDF wall.
    AddPdf(PdfAttachment),
    UpdatePdf { id: String, patch: PdfPatch },
    RemovePdf { id: String },
    SetPdfDocs(Vec<PdfAttachment>),
}

impl DocumentEdit {
    /// Apply to `state`. Returns `false` when the target does not exist.
    pub fn apply(self, state: &mut AppState) -> bool {
        let doc = &mut state.document;
        match self {
            DocumentEdit::SetTotalBudget(amount) => {
                if amount.is_finite() {
                    doc.total_budget = amount;
                }
                true
            }
            DocumentEdit::SetCardBalance(amount) => {
                if amount.is_finite() {
                    doc.walmart_card_balance = amount;
                }
                true
            }
            DocumentEdit::AddEvent(template) => {
                let event = template.into_event(doc);
                state.ui.selected_event_id = Some(event.id.clone());
                doc.events.insert(0, event);
                true
            }
            DocumentEdit::UpdateEvent { id, patch } => {
                let Some(event) = doc.event_mut(&id) else {
                    log::debug!("Ignoring update for unknown event {id}");
                    return false;
                };
                patch.apply_to(event);
                if state.ui.selected_event_id.is_none() {
                    state.ui.selected_event_id = Some(id);
                }
                true
            }
            DocumentEdit::RemoveEvent { id } => {
                let before = doc.events.len();
                doc.events.retain(|e| e.id != id);
                if doc.events.len() == before {
                    return false;
                }
                if state.ui.selected_event_id.as_deref() == Some(id.as_str()) {
                    state.ui.selected_event_id = doc.first_event_id().map(str::to_string);
                }
                true
            }
            DocumentEdit::AddLineItem { event_id, mut item } => {
                let Some(event) = doc.event_mut(&event_id) else {
                    return false;
                };
                if item.id.is_empty() || event.line_item(&item.id).is_some() {
                    item.id = new_id("item");
                }
                event.items.push(item);
                true
            }
            DocumentEdit::UpdateLineItem { event_id, item_id, patch } => {
                match doc.event_mut(&event_id).and_then(|e| e.line_item_mut(&item_id)) {
                    Some(item) => {
                        patch.apply_to(item);
                        true
                    }
                    None => false,
                }
            }
            DocumentEdit::RemoveLineItem { event_id, item_id } => {
                let Some(event) = doc.event_mut(&event_id) else {
                    return false;
                };
                let before = event.items.len();
                event.items.retain(|it| it.id != item_id);
                event.items.len() != before
            }
            DocumentEdit::AddChecklistItem { event_id, label } => {
                let Some(event) = doc.event_mut(&event_id) else {
                    return false;
                };
                event.checklist.push(ChecklistItem::new(label));
                true
            }
            DocumentEdit::UpdateChecklistItem { event_id, item_id, patch } => {
                let item = doc
                    .event_mut(&event_id)
                    .and_then(|e| e.checklist.iter_mut().find(|c| c.id == item_id));
                let Some(item) = item else {
                    return false;
                };
                if let Some(label) = patch.label {
                    item.label = label;
                }
                if let Some(done) = patch.done {
                    item.done = done;
                }
                if let Some(notes) = patch.notes {
                    item.notes = notes;
                }
                true
            }
            DocumentEdit::ToggleChecklistItem { event_id, item_id } => {
                let item = doc
                    .event_mut(&event_id)
                    .and_then(|e| e.checklist.iter_mut().find(|c| c.id == item_id));
                match item {
                    Some(item) => {
                        item.done = !item.done;
                        true
                    }
                    None => false,
                }
            }
            DocumentEdit::RemoveChecklistItem { event_id, item_id } => {
                let Some(event) = doc.event_mut(&event_id) else {
                    return false;
                };
                let before = event.checklist.len();
                event.checklist.retain(|c| c.id != item_id);
                event.checklist.len() != before
            }
            DocumentEdit::AddPdf(mut pdf) => {
                if pdf.id.is_empty() || doc.pdf(&pdf.id).is_some() {
                    pdf.id = new_id("pdf");
                }
                doc.pdf_wall.docs.insert(0, pdf);
                true
            }
            DocumentEdit::UpdatePdf { id, patch } => {
                let Some(pdf) = doc.pdf_wall.docs.iter_mut().find(|d| d.id == id) else {
                    return false;
                };
                if let Some(title) = patch.title {
                    pdf.title = title;
                }
                if let Some(total) = patch.extracted_total {
                    pdf.extracted_total = total.filter(|t| t.is_finite());
                }
                if let Some(total) = patch.manual_total {
                    pdf.manual_total = total.filter(|t| t.is_finite());
                }
                true
            }
            DocumentEdit::RemovePdf { id } => {
                let before = doc.pdf_wall.docs.len();
                doc.pdf_wall.docs.retain(|d| d.id != id);
                doc.pdf_wall.docs.len() != before
            }
            DocumentEdit::SetPdfDocs(docs) => {
                doc.pdf_wall.docs = docs;
                true
            }
        }
    }
}

/// A change to this device's UI state only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEdit {
    SetActiveSlide(i64),
    /// Selecting an id that does not resolve is ignored.
    SelectEvent(Option<String>),
}

impl UiEdit {
    pub fn apply(self, ui: &mut UiState, doc: &Document) -> bool {
        match self {
            UiEdit::SetActiveSlide(index) => {
                ui.set_active_slide(index);
                true
            }
            UiEdit::SelectEvent(Some(id)) if !doc.contains_event(&id) => false,
            UiEdit::SelectEvent(id) => {
                ui.selected_event_id = id;
                true
            }
        }
    }
}
