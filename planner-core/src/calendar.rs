//! Calendar window, drop hit-testing and drag-and-drop placement.
//!
//! ```text
//!   drag start ──► DragTracker (outside document state)
//!                      │
//!   drop (x, y) ──► CalendarGrid::day_at ──► Placement
//!                      │                       ├── DocumentEdit  start/end 18:00–20:00 ±HH:MM
//!                      │                       └── UiEdit        select dropped event
//!                      ▼
//!                tracker cleared
//! ```
//!
//! The dragged id lives in a [`DragTracker`] owned by the edit surface, not
//! in the rendered state, so a re-render mid-drag (e.g. a remote merge)
//! cannot lose it. On drop the transfer payload wins over the tracked id.

use chrono::{
    DateTime, Duration, FixedOffset, Local, NaiveDate, Offset, SecondsFormat, TimeZone, Utc,
};

use crate::edit::{DocumentEdit, EventPatch, UiEdit};
use crate::model::{Document, Event};

pub const DEFAULT_START_HOUR: u32 = 18;
pub const DEFAULT_END_HOUR: u32 = 20;
pub const DEFAULT_WINDOW_DAYS: u32 = 28;

/// Current UTC time as `2026-01-21T23:00:00.000Z`.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// This machine's current UTC offset.
pub fn local_offset() -> FixedOffset {
    Local::now().offset().fix()
}

/// `YYYY-MM-DDTHH:MM:SS±HH:MM`
pub fn format_with_offset(dt: &DateTime<FixedOffset>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%:z").to_string()
}

/// Local wall-clock time on `day` expressed with `offset`.
pub fn local_timestamp(day: NaiveDate, hour: u32, minute: u32, offset: FixedOffset) -> Option<String> {
    let naive = day.and_hms_opt(hour, minute, 0)?;
    let dt = offset.from_local_datetime(&naive).single()?;
    Some(format_with_offset(&dt))
}

/// The default evening slot on `day`.
pub fn default_slot(day: NaiveDate, offset: FixedOffset) -> Option<(String, String)> {
    Some((
        local_timestamp(day, DEFAULT_START_HOUR, 0, offset)?,
        local_timestamp(day, DEFAULT_END_HOUR, 0, offset)?,
    ))
}

/// Calendar day of an event's start, seen from `offset`.
pub fn event_day(event: &Event, offset: FixedOffset) -> Option<NaiveDate> {
    let start = event.start.as_deref()?;
    let parsed = DateTime::parse_from_rfc3339(start).ok()?;
    Some(parsed.with_timezone(&offset).date_naive())
}

pub fn events_on_day(doc: &Document, day: NaiveDate, offset: FixedOffset) -> Vec<&Event> {
    doc.events
        .iter()
        .filter(|e| e.is_scheduled() && event_day(e, offset) == Some(day))
        .collect()
}

pub fn unscheduled_events(doc: &Document) -> Vec<&Event> {
    doc.events.iter().filter(|e| e.start.is_none()).collect()
}

/// A run of consecutive days shown on the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarWindow {
    pub start: NaiveDate,
    pub days: u32,
}

impl Default for CalendarWindow {
    fn default() -> Self {
        Self {
            start: NaiveDate::from_ymd_opt(2026, 1, 18).unwrap_or_default(),
            days: DEFAULT_WINDOW_DAYS,
        }
    }
}

impl CalendarWindow {
    pub fn new(start: NaiveDate, days: u32) -> Self {
        Self { start, days }
    }

    /// Move the window by whole weeks (negative = back).
    pub fn shift_weeks(&mut self, weeks: i64) {
        if let Some(start) = self.start.checked_add_signed(Duration::days(7 * weeks)) {
            self.start = start;
        }
    }

    pub fn day(&self, index: u32) -> Option<NaiveDate> {
        if index >= self.days {
            return None;
        }
        self.start.checked_add_signed(Duration::days(i64::from(index)))
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        (0..self.days).filter_map(move |i| self.day(i))
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        let offset = (day - self.start).num_days();
        offset >= 0 && offset < i64::from(self.days)
    }
}

/// Pixel layout of the calendar: a grid of day cells, `columns` wide,
/// separated by `gap`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalendarGrid {
    pub window: CalendarWindow,
    pub columns: u32,
    pub origin_x: f64,
    pub origin_y: f64,
    pub cell_width: f64,
    pub cell_height: f64,
    pub gap: f64,
}

impl CalendarGrid {
    pub fn new(window: CalendarWindow, cell_width: f64, cell_height: f64) -> Self {
        Self {
            window,
            columns: 7,
            origin_x: 0.0,
            origin_y: 0.0,
            cell_width,
            cell_height,
            gap: 0.0,
        }
    }

    /// Map along one axis to a cell index, or `None` when the point falls
    /// before the origin or inside a gap.
    fn axis_index(pos: f64, origin: f64, size: f64, gap: f64) -> Option<u32> {
        let rel = pos - origin;
        if !rel.is_finite() || rel < 0.0 || size <= 0.0 {
            return None;
        }
        let stride = size + gap.max(0.0);
        let index = (rel / stride).floor();
        if rel - index * stride > size || index > f64::from(u32::MAX) {
            return None;
        }
        Some(index as u32)
    }

    /// The day under a drop point.
    pub fn day_at(&self, x: f64, y: f64) -> Option<NaiveDate> {
        let col = Self::axis_index(x, self.origin_x, self.cell_width, self.gap)?;
        let row = Self::axis_index(y, self.origin_y, self.cell_height, self.gap)?;
        if col >= self.columns {
            return None;
        }
        self.window.day(row.checked_mul(self.columns)?.checked_add(col)?)
    }
}

/// Result of dropping an event on a day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub event_id: String,
    pub day: NaiveDate,
    pub start: String,
    pub end: String,
}

impl Placement {
    pub fn new(event_id: impl Into<String>, day: NaiveDate, offset: FixedOffset) -> Option<Self> {
        let (start, end) = default_slot(day, offset)?;
        Some(Self {
            event_id: event_id.into(),
            day,
            start,
            end,
        })
    }

    pub fn edit(&self) -> DocumentEdit {
        DocumentEdit::UpdateEvent {
            id: self.event_id.clone(),
            patch: EventPatch::schedule(self.start.clone(), self.end.clone()),
        }
    }

    pub fn select(&self) -> UiEdit {
        UiEdit::SelectEvent(Some(self.event_id.clone()))
    }
}

/// Holds the id of the event being dragged.
#[derive(Debug, Default)]
pub struct DragTracker {
    dragging: Option<String>,
}

impl DragTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, event_id: impl Into<String>) {
        self.dragging = Some(event_id.into());
    }

    pub fn cancel(&mut self) {
        self.dragging = None;
    }

    pub fn dragging(&self) -> Option<&str> {
        self.dragging.as_deref()
    }

    /// Resolve the dropped id (payload first) and clear the tracker.
    pub fn take_drop(&mut self, payload: Option<&str>) -> Option<String> {
        let tracked = self.dragging.take();
        payload
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .or(tracked)
    }

    /// Complete a drop at `(x, y)`. The tracker is cleared even when the
    /// point misses the grid.
    pub fn drop_at(
        &mut self,
        grid: &CalendarGrid,
        x: f64,
        y: f64,
        payload: Option<&str>,
        offset: FixedOffset,
    ) -> Option<Placement> {
        let event_id = self.take_drop(payload)?;
        let day = grid.day_at(x, y)?;
        Placement::new(event_id, day, offset)
    }
}
