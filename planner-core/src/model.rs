//! Shared planning document and per-device UI state.
//!
//! ```text
//! AppState
//! ├── Document                    (synchronized across clients)
//! │   ├── total_budget / walmart_card_balance
//! │   ├── events: [Event]          display order, newest first
//! │   │   ├── booking / purchase / social trackers
//! │   │   ├── checklist: [ChecklistItem]
//! │   │   └── items: [LineItem]    total == unit * qty
//! │   └── pdf_wall.docs: [PdfAttachment]
//! └── UiState                     (per device, never synchronized)
//! ```
//!
//! Field names serialize in camelCase so exported files stay readable by
//! older dashboards.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::calendar::now_iso;

/// Number of slides in the presentation deck.
pub const SLIDE_COUNT: u8 = 4;

/// Slide titles, indexed by `UiState::active_slide`.
pub const SLIDE_TITLES: [&str; SLIDE_COUNT as usize] =
    ["Overview", "Social", "Finance & Calendar", "Export"];

pub const DEFAULT_TOTAL_BUDGET: f64 = 15000.0;
pub const DEFAULT_CARD_BALANCE: f64 = 1282.0;
pub const DEFAULT_PDF_MIME: &str = "application/pdf";

/// Declares a string-labelled enum whose unknown labels fall back to a
/// default variant instead of failing deserialization.
macro_rules! labelled_enum {
    (
        $(#[$meta:meta])*
        $name:ident, fallback = $fallback:ident {
            $($variant:ident => $label:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            pub fn label(self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                }
            }

            /// Exact label match; anything else maps to the fallback variant.
            pub fn from_label(label: &str) -> Self {
                match label.trim() {
                    $($label => $name::$variant,)+
                    _ => $name::$fallback,
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::$fallback
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.label())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.label())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let label = String::deserialize(deserializer)?;
                Ok($name::from_label(&label))
            }
        }
    };
}

labelled_enum! {
    /// Kind of campus event.
    EventCategory, fallback = Other {
        VelvetCircle => "Velvet Circle",
        ServiceFair => "Service Fair",
        FoodDrive => "Food Drive",
        HennaClass => "Henna Class",
        CookingCompetition => "Cooking Competition",
        HpusGotTalent => "HPU’s Got Talent",
        GameShow => "Game Show",
        FlowerMaking => "Flower Making",
        StudentBusinessShowcase => "Student Run Business Showcase",
        HealthyLivingWeek => "Healthy Living Week",
        GoldenLuckyCoin => "Saint Patrick’s Golden Lucky Coin",
        SipAndPaint => "Sip & Paint",
        FormalDance => "Formal Dance",
        ClothingDrive => "Clothing Drive",
        LastToLeaveTheCircle => "Last to Leave the Circle",
        MocktailsAndNetworking => "Mocktails & Networking",
        PantherGames => "Panther Games",
        ColorRun => "Color Run",
        Other => "Other",
    }
}

labelled_enum! {
    /// Approval status. Any status may be set at any time.
    EventStatus, fallback = Planned {
        Planned => "Planned",
        Submitted => "Submitted",
        Approved => "Approved",
        Purchased => "Purchased",
    }
}

labelled_enum! {
    LineItemGroup, fallback = Other {
        Prizes => "Prizes",
        Catering => "Catering",
        Other => "Other",
    }
}

labelled_enum! {
    SocialStatus, fallback = NotStarted {
        NotStarted => "Not started",
        InProgress => "In progress",
        Posted => "Posted",
    }
}

/// A purchasable line on an event budget.
///
/// `total` is derived: there is no way to set it directly, and every
/// constructor, setter and deserialization recomputes it from `unit * qty`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "LineItemFields")]
pub struct LineItem {
    pub id: String,
    pub group: LineItemGroup,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    unit: f64,
    qty: f64,
    total: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Wire shape of a line item; any stored `total` is ignored.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LineItemFields {
    id: String,
    #[serde(default)]
    group: LineItemGroup,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    unit: f64,
    #[serde(default)]
    qty: f64,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

impl From<LineItemFields> for LineItem {
    fn from(fields: LineItemFields) -> Self {
        let mut item = LineItem::new(fields.group, fields.name, fields.unit, fields.qty);
        item.id = fields.id;
        item.kind = fields.kind;
        item.link = fields.link;
        item.notes = fields.notes;
        item
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

impl LineItem {
    pub fn new(group: LineItemGroup, name: impl Into<String>, unit: f64, qty: f64) -> Self {
        let unit = finite_or_zero(unit);
        let qty = finite_or_zero(qty);
        Self {
            id: crate::id::new_id("item"),
            group,
            kind: String::new(),
            name: name.into(),
            unit,
            qty,
            total: unit * qty,
            link: None,
            notes: None,
        }
    }

    pub fn unit(&self) -> f64 {
        self.unit
    }

    pub fn qty(&self) -> f64 {
        self.qty
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn set_unit(&mut self, unit: f64) {
        self.unit = finite_or_zero(unit);
        self.total = self.unit * self.qty;
    }

    pub fn set_qty(&mut self, qty: f64) {
        self.qty = finite_or_zero(qty);
        self.total = self.unit * self.qty;
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistItem {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl ChecklistItem {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: crate::id::new_id("chk"),
            label: label.into(),
            done: false,
            notes: None,
        }
    }
}

/// Image attached to an event's social post, kept inline as a data URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialAsset {
    pub id: String,
    pub name: String,
    pub mime: String,
    pub data_url: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialTracker {
    #[serde(default)]
    pub status: SocialStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub assets: Vec<SocialAsset>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingTracker {
    #[serde(default)]
    pub booked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booked_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booked_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseTracker {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(default, rename = "lastUpdateISO", skip_serializing_if = "Option::is_none")]
    pub last_update_iso: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub category: EventCategory,
    #[serde(default)]
    pub status: EventStatus,
    /// ISO-8601 with offset, e.g. `2026-01-21T18:00:00-05:00`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub estimated_cost: f64,
    #[serde(default = "default_planned_count")]
    pub planned_count: u32,
    #[serde(default)]
    pub booking: BookingTracker,
    #[serde(default)]
    pub purchase: PurchaseTracker,
    #[serde(default)]
    pub checklist: Vec<ChecklistItem>,
    #[serde(default)]
    pub social: SocialTracker,
    #[serde(default)]
    pub items: Vec<LineItem>,
    /// Legacy single-PDF link, carried through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_path: Option<String>,
}

fn default_planned_count() -> u32 {
    1
}

impl Event {
    pub fn is_scheduled(&self) -> bool {
        self.start.as_deref().is_some_and(|s| s.contains('T'))
    }

    pub fn line_item(&self, item_id: &str) -> Option<&LineItem> {
        self.items.iter().find(|it| it.id == item_id)
    }

    pub fn line_item_mut(&mut self, item_id: &str) -> Option<&mut LineItem> {
        self.items.iter_mut().find(|it| it.id == item_id)
    }
}

/// PDF stored in blob storage; the document only keeps its location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfAttachment {
    pub id: String,
    pub title: String,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    pub url: String,
    pub storage_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_total: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_total: Option<f64>,
    #[serde(rename = "addedAtISO")]
    pub added_at_iso: String,
}

impl PdfAttachment {
    /// Manual override, else the machine-parsed total, else zero.
    pub fn display_total(&self) -> f64 {
        self.manual_total.or(self.extracted_total).unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PdfWall {
    #[serde(default)]
    pub docs: Vec<PdfAttachment>,
}

/// The synchronized part of the application state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub total_budget: f64,
    pub walmart_card_balance: f64,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub pdf_wall: PdfWall,
}

impl Document {
    /// The built-in starting document for a fresh device or room.
    pub fn seed() -> Self {
        let now = now_iso();
        let seed_pdf = |id: &str, title: &str, file_name: &str| PdfAttachment {
            id: id.to_string(),
            title: title.to_string(),
            file_name: file_name.to_string(),
            mime: Some(DEFAULT_PDF_MIME.to_string()),
            url: format!("/pdfs/{file_name}"),
            storage_path: format!("/pdfs/{file_name}"),
            extracted_total: None,
            manual_total: None,
            added_at_iso: now.clone(),
        };

        Self {
            total_budget: DEFAULT_TOTAL_BUDGET,
            walmart_card_balance: DEFAULT_CARD_BALANCE,
            events: vec![Event {
                id: "evt_velvet".to_string(),
                title: "The Velvet Circle".to_string(),
                category: EventCategory::VelvetCircle,
                status: EventStatus::Submitted,
                start: Some("2026-01-21T18:00:00-05:00".to_string()),
                end: Some("2026-01-21T20:00:00-05:00".to_string()),
                location: Some("Panther Commons • 4th Floor Ballroom".to_string()),
                estimated_cost: 1282.0,
                planned_count: 1,
                booking: BookingTracker {
                    booked: true,
                    booked_by: Some(String::new()),
                    booked_at: Some(now.clone()),
                    notes: Some(String::new()),
                },
                purchase: PurchaseTracker {
                    status_text: Some("Submitted — awaiting Connor".to_string()),
                    last_update_iso: Some(now.clone()),
                },
                checklist: Vec::new(),
                social: SocialTracker {
                    status: SocialStatus::NotStarted,
                    notes: Some(String::new()),
                    assets: Vec::new(),
                },
                items: Vec::new(),
                pdf_path: None,
            }],
            pdf_wall: PdfWall {
                docs: vec![
                    seed_pdf("pdf_flowers_after_dark", "Flowers After Dark", "Flowers_After_Dark.pdf"),
                    seed_pdf(
                        "pdf_gilded_hour_mocktails",
                        "Gilded Hour — Mocktails — Charity Auction",
                        "Gilded_Hour__Mocktails__Charity_Auction.pdf",
                    ),
                    seed_pdf("pdf_last_to_leave_circle", "Last To Leave Circle", "Last_To_Leave_Circle.pdf"),
                    seed_pdf("pdf_panther_games", "Panther Games", "Panther_Games.pdf"),
                ],
            },
        }
    }

    pub fn event(&self, id: &str) -> Option<&Event> {
        self.events.iter().find(|e| e.id == id)
    }

    pub fn event_mut(&mut self, id: &str) -> Option<&mut Event> {
        self.events.iter_mut().find(|e| e.id == id)
    }

    pub fn contains_event(&self, id: &str) -> bool {
        self.events.iter().any(|e| e.id == id)
    }

    pub fn first_event_id(&self) -> Option<&str> {
        self.events.first().map(|e| e.id.as_str())
    }

    pub fn pdf(&self, id: &str) -> Option<&PdfAttachment> {
        self.pdf_wall.docs.iter().find(|d| d.id == id)
    }
}

/// Per-device presentation state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiState {
    #[serde(default)]
    pub active_slide: u8,
    #[serde(default)]
    pub selected_event_id: Option<String>,
}

impl UiState {
    pub fn seed() -> Self {
        Self {
            active_slide: 0,
            selected_event_id: Some("evt_velvet".to_string()),
        }
    }

    /// Clamp into the deck; negative indices land on the first slide.
    pub fn set_active_slide(&mut self, index: i64) {
        self.active_slide = index.clamp(0, i64::from(SLIDE_COUNT) - 1) as u8;
    }

    pub fn slide_title(&self) -> &'static str {
        SLIDE_TITLES[usize::from(self.active_slide.min(SLIDE_COUNT - 1))]
    }
}

/// Document plus UI state: what the edit surface renders and what is
/// persisted locally and exported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    #[serde(flatten)]
    pub document: Document,
    pub ui: UiState,
}

impl AppState {
    pub fn seed() -> Self {
        Self {
            document: Document::seed(),
            ui: UiState::seed(),
        }
    }

    pub fn new(document: Document, ui: UiState) -> Self {
        let mut state = Self { document, ui };
        state.resolve_selection();
        state
    }

    /// Point a dangling selection at the first event (or nothing).
    pub fn resolve_selection(&mut self) {
        let dangling = match &self.ui.selected_event_id {
            Some(id) => !self.document.contains_event(id),
            None => false,
        };
        if dangling {
            self.ui.selected_event_id = self.document.first_event_id().map(str::to_string);
        }
    }

    /// The selected event, falling back to the first event when the stored
    /// selection no longer resolves.
    pub fn selected_event(&self) -> Option<&Event> {
        self.ui
            .selected_event_id
            .as_deref()
            .and_then(|id| self.document.event(id))
            .or_else(|| self.document.events.first())
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::seed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_item_total_follows_unit_and_qty() {
        let mut item = LineItem::new(LineItemGroup::Prizes, "Gift cards", 25.0, 4.0);
        assert_eq!(item.total(), 100.0);

        item.set_qty(0.0);
        assert_eq!(item.total(), 0.0);

        item.set_unit(12.5);
        item.set_qty(3.0);
        assert_eq!(item.total(), 37.5);

        item.set_unit(f64::NAN);
        assert_eq!(item.unit(), 0.0);
        assert_eq!(item.total(), 0.0);
    }

    #[test]
    fn test_line_item_deserialize_ignores_stored_total() {
        let json = r#"{"id":"it_1","group":"Catering","type":"Food","name":"Pizza","unit":12,"qty":5,"total":9999}"#;
        let item: LineItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.total(), 60.0);
        assert_eq!(item.kind, "Food");
        assert_eq!(item.group, LineItemGroup::Catering);
    }

    #[test]
    fn test_line_item_omitted_unit_is_zero() {
        let json = r#"{"id":"it_2","name":"Napkins","qty":5}"#;
        let item: LineItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.unit(), 0.0);
        assert_eq!(item.total(), 0.0);
    }

    #[test]
    fn test_unknown_labels_fall_back() {
        assert_eq!(EventCategory::from_label("Bake Sale"), EventCategory::Other);
        assert_eq!(EventStatus::from_label("Cancelled"), EventStatus::Planned);
        assert_eq!(SocialStatus::from_label(""), SocialStatus::NotStarted);

        let status: EventStatus = serde_json::from_str("\"Approved\"").unwrap();
        assert_eq!(status, EventStatus::Approved);
        let category: EventCategory = serde_json::from_str("\"Sip & Paint\"").unwrap();
        assert_eq!(category, EventCategory::SipAndPaint);
    }

    #[test]
    fn test_category_labels_roundtrip() {
        assert_eq!(EventCategory::ALL.len(), 19);
        for category in EventCategory::ALL {
            assert_eq!(EventCategory::from_label(category.label()), *category);
        }
    }

    #[test]
    fn test_display_total_precedence() {
        let mut pdf = Document::seed().pdf_wall.docs[0].clone();
        assert_eq!(pdf.display_total(), 0.0);
        pdf.extracted_total = Some(420.5);
        assert_eq!(pdf.display_total(), 420.5);
        pdf.manual_total = Some(400.0);
        assert_eq!(pdf.display_total(), 400.0);
    }

    #[test]
    fn test_seed_shape() {
        let state = AppState::seed();
        assert_eq!(state.document.total_budget, 15000.0);
        assert_eq!(state.document.walmart_card_balance, 1282.0);
        assert_eq!(state.document.events.len(), 1);
        assert_eq!(state.document.pdf_wall.docs.len(), 4);
        assert_eq!(state.ui.selected_event_id.as_deref(), Some("evt_velvet"));
        assert!(state.document.events[0].is_scheduled());
    }

    #[test]
    fn test_selected_event_falls_back_to_first() {
        let mut state = AppState::seed();
        state.ui.selected_event_id = Some("evt_gone".to_string());
        assert_eq!(state.selected_event().map(|e| e.id.as_str()), Some("evt_velvet"));

        state.resolve_selection();
        assert_eq!(state.ui.selected_event_id.as_deref(), Some("evt_velvet"));

        state.document.events.clear();
        state.resolve_selection();
        assert!(state.ui.selected_event_id.is_none());
        assert!(state.selected_event().is_none());
    }

    #[test]
    fn test_active_slide_clamps() {
        let mut ui = UiState::default();
        ui.set_active_slide(7);
        assert_eq!(ui.active_slide, SLIDE_COUNT - 1);
        ui.set_active_slide(-2);
        assert_eq!(ui.active_slide, 0);
        assert_eq!(ui.slide_title(), "Overview");
    }

    #[test]
    fn test_app_state_serializes_flat() {
        let state = AppState::seed();
        let value = serde_json::to_value(&state).unwrap();
        assert!(value.get("totalBudget").is_some());
        assert!(value.get("pdfWall").is_some());
        assert_eq!(value["ui"]["selectedEventId"], "evt_velvet");
        assert_eq!(value["ui"]["activeSlide"], 0);
    }
}
