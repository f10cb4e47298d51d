//! The reconciler: one in-memory [`AppState`] fed by local edits, remote
//! envelopes and write completions.
//!
//! Merging is whole-document last-writer-wins ordered by the envelope's
//! `updatedAtMs`. The reconciler never touches the network itself; it hands
//! out [`WriteRequest`]s and is told how they ended.

use planner_core::edit::{DocumentEdit, UiEdit};
use planner_core::migrate::normalize_document;
use planner_core::model::{AppState, Document};

use crate::channel::{ChannelError, RemoteSignal, WriteMeta};
use crate::local::LocalStore;
use crate::protocol::{ClientId, Envelope};

use super::guard::{EchoGuard, GuardEvent, GuardState};

/// A change requested by the edit surface.
pub enum Patch {
    /// Replace the whole document
    Replace(Document),
    /// Derive the next document from the current one
    Update(Box<dyn FnOnce(&Document) -> Document + Send>),
    Edit(DocumentEdit),
    /// Slide or selection change; never synchronized
    Ui(UiEdit),
}

impl Patch {
    pub fn update(f: impl FnOnce(&Document) -> Document + Send + 'static) -> Self {
        Patch::Update(Box::new(f))
    }
}

impl From<DocumentEdit> for Patch {
    fn from(edit: DocumentEdit) -> Self {
        Patch::Edit(edit)
    }
}

impl From<UiEdit> for Patch {
    fn from(edit: UiEdit) -> Self {
        Patch::Ui(edit)
    }
}

impl std::fmt::Debug for Patch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Patch::Replace(_) => f.write_str("Replace(..)"),
            Patch::Update(_) => f.write_str("Update(..)"),
            Patch::Edit(edit) => f.debug_tuple("Edit").field(edit).finish(),
            Patch::Ui(edit) => f.debug_tuple("Ui").field(edit).finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    Unchanged,
    UiOnly,
    /// The document changed and needs a write-back
    DocumentChanged,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOutcome {
    /// At or below the watermark
    Stale,
    SelfEcho,
    Merged,
    /// Held until the local write settles
    Deferred,
    /// Empty room: write the local document
    Seed(WriteRequest),
    /// Empty room notification after the seed was sent
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Debounce,
    Hidden,
    Unload,
    Teardown,
}

impl std::fmt::Display for FlushReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            FlushReason::Debounce => "debounce",
            FlushReason::Hidden => "hidden",
            FlushReason::Unload => "unload",
            FlushReason::Teardown => "teardown",
        })
    }
}

/// Identifies a write when it settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteTicket {
    pub generation: u64,
    pub updated_at_ms: u64,
}

/// A document write the caller must send to the channel.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    pub document: Document,
    pub meta: WriteMeta,
    pub ticket: WriteTicket,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilerStats {
    pub local_edits: u64,
    pub ui_edits: u64,
    pub remote_merged: u64,
    pub remote_stale: u64,
    pub self_echoes: u64,
    pub remote_deferred: u64,
    pub seeds: u64,
    pub writes_started: u64,
    pub writes_failed: u64,
}

pub struct Reconciler<S: LocalStore> {
    state: AppState,
    client_id: ClientId,
    /// Highest envelope timestamp applied or acknowledged
    watermark: u64,
    guard: EchoGuard,
    dirty: bool,
    /// Bumped on every local document change
    generation: u64,
    /// Document as last written or merged
    last_synced: Option<Document>,
    last_write_ms: u64,
    writes_in_flight: usize,
    /// Generation a flush found already written while older writes were
    /// still in flight; the last of them settles the guard
    caught_up: Option<u64>,
    seeded: bool,
    deferred: Option<Envelope>,
    store: S,
    stats: ReconcilerStats,
}

impl<S: LocalStore> Reconciler<S> {
    /// Start from whatever `store` holds (or the seed).
    pub fn new(store: S, client_id: ClientId) -> Self {
        let state = store.load();
        Self::with_state(state, store, client_id)
    }

    pub fn with_state(state: AppState, store: S, client_id: ClientId) -> Self {
        Self {
            state,
            client_id,
            watermark: 0,
            guard: EchoGuard::new(),
            dirty: false,
            generation: 0,
            last_synced: None,
            last_write_ms: 0,
            writes_in_flight: 0,
            caught_up: None,
            seeded: false,
            deferred: None,
            store,
            stats: ReconcilerStats::default(),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    pub fn guard_state(&self) -> GuardState {
        self.guard.state()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn has_deferred(&self) -> bool {
        self.deferred.is_some()
    }

    pub fn stats(&self) -> &ReconcilerStats {
        &self.stats
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // ─── Local edits ──────────────────────────────────────────────────

    pub fn apply_local_edit(&mut self, patch: Patch) -> EditOutcome {
        let outcome = match patch {
            Patch::Ui(edit) => {
                if edit.apply(&mut self.state.ui, &self.state.document) {
                    self.stats.ui_edits += 1;
                    EditOutcome::UiOnly
                } else {
                    EditOutcome::Unchanged
                }
            }
            Patch::Replace(document) => self.replace_document(document),
            Patch::Update(f) => {
                let document = f(&self.state.document);
                self.replace_document(document)
            }
            Patch::Edit(edit) => {
                let before = self.state.document.clone();
                let ui_before = self.state.ui.clone();
                edit.apply(&mut self.state);
                if self.state.document != before {
                    self.mark_local_change();
                    EditOutcome::DocumentChanged
                } else if self.state.ui != ui_before {
                    self.stats.ui_edits += 1;
                    EditOutcome::UiOnly
                } else {
                    EditOutcome::Unchanged
                }
            }
        };

        if outcome != EditOutcome::Unchanged {
            self.persist();
        }
        outcome
    }

    fn replace_document(&mut self, mut document: Document) -> EditOutcome {
        normalize_document(&mut document);
        if document == self.state.document {
            return EditOutcome::Unchanged;
        }
        self.state.document = document;
        self.mark_local_change();
        EditOutcome::DocumentChanged
    }

    fn mark_local_change(&mut self) {
        self.dirty = true;
        self.generation += 1;
        self.guard.on(GuardEvent::LocalEdit);
        self.stats.local_edits += 1;
    }

    // ─── Remote signals ───────────────────────────────────────────────

    pub fn on_remote(&mut self, signal: RemoteSignal, now_ms: u64) -> RemoteOutcome {
        match signal {
            RemoteSignal::Missing if self.seeded => {
                log::debug!("Room still empty; seed already sent");
                RemoteOutcome::Ignored
            }
            RemoteSignal::Missing => {
                self.seeded = true;
                self.stats.seeds += 1;
                log::info!("Room has no document; seeding it from this device");
                RemoteOutcome::Seed(self.begin_write(now_ms))
            }
            RemoteSignal::Envelope(envelope) => self.on_envelope(envelope),
        }
    }

    fn on_envelope(&mut self, envelope: Envelope) -> RemoteOutcome {
        let ts = envelope.meta.updated_at_ms;
        if ts <= self.watermark {
            self.stats.remote_stale += 1;
            log::debug!("Dropping stale envelope ({ts} <= {})", self.watermark);
            return RemoteOutcome::Stale;
        }

        if envelope.meta.updated_by == self.client_id {
            self.watermark = ts;
            self.stats.self_echoes += 1;
            return RemoteOutcome::SelfEcho;
        }

        if self.guard.defers_remote() {
            let newer = self
                .deferred
                .as_ref()
                .map_or(true, |held| ts > held.meta.updated_at_ms);
            if newer {
                self.deferred = Some(envelope);
            }
            self.stats.remote_deferred += 1;
            log::debug!("Deferring envelope {ts} while a local edit is pending");
            return RemoteOutcome::Deferred;
        }

        self.merge(envelope);
        RemoteOutcome::Merged
    }

    /// Replace the document wholesale; UI state is kept as is.
    fn merge(&mut self, envelope: Envelope) {
        let Envelope {
            state: mut document,
            meta,
        } = envelope;
        normalize_document(&mut document);

        self.watermark = meta.updated_at_ms;
        self.last_synced = Some(document.clone());
        self.state.document = document;
        self.dirty = false;
        self.guard.on(GuardEvent::RemoteApplied);
        self.stats.remote_merged += 1;
        log::debug!(
            "Merged envelope {} from {}",
            meta.updated_at_ms,
            meta.updated_by
        );
        self.persist();
    }

    /// Next scheduling tick after a remote apply.
    pub fn release_guard(&mut self) {
        self.guard.on(GuardEvent::Release);
    }

    // ─── Write-back ───────────────────────────────────────────────────

    /// Produce a write for the current document, if one is due.
    pub fn flush(&mut self, reason: FlushReason, now_ms: u64) -> Option<WriteRequest> {
        if self.guard.suppresses_flush() {
            log::debug!("Skipping {reason} flush while a remote apply settles");
            return None;
        }

        let changed = self.dirty && self.last_synced.as_ref() != Some(&self.state.document);
        if !changed {
            self.dirty = false;
            // Nothing will settle for this generation; release deferred remotes now
            if self.guard.defers_remote() {
                if self.writes_in_flight == 0 {
                    self.settle_guard();
                } else {
                    self.caught_up = Some(self.generation);
                }
            }
            return None;
        }

        log::debug!("Flushing document ({reason})");
        Some(self.begin_write(now_ms))
    }

    fn begin_write(&mut self, now_ms: u64) -> WriteRequest {
        let deferred_ms = self
            .deferred
            .as_ref()
            .map_or(0, |held| held.meta.updated_at_ms);
        let updated_at_ms = now_ms
            .max(self.watermark.saturating_add(1))
            .max(deferred_ms.saturating_add(1))
            .max(self.last_write_ms.saturating_add(1));

        self.last_write_ms = updated_at_ms;
        self.dirty = false;
        self.last_synced = Some(self.state.document.clone());
        self.writes_in_flight += 1;
        self.stats.writes_started += 1;

        WriteRequest {
            document: self.state.document.clone(),
            meta: WriteMeta {
                client_id: self.client_id.clone(),
                updated_at_ms,
            },
            ticket: WriteTicket {
                generation: self.generation,
                updated_at_ms,
            },
        }
    }

    /// A write finished. Returns true when a deferred envelope got merged.
    pub fn write_settled(&mut self, ticket: WriteTicket, result: Result<(), ChannelError>) -> bool {
        self.writes_in_flight = self.writes_in_flight.saturating_sub(1);
        match result {
            Ok(()) => {
                self.watermark = self.watermark.max(ticket.updated_at_ms);
            }
            Err(e) => {
                self.stats.writes_failed += 1;
                log::error!("Remote write {} failed: {e}", ticket.updated_at_ms);
                self.dirty = true;
                self.last_synced = None;
            }
        }

        let current = ticket.generation == self.generation;
        let last_behind_flush =
            self.writes_in_flight == 0 && self.caught_up == Some(self.generation);
        if !current && !last_behind_flush {
            return false;
        }
        self.caught_up = None;
        self.settle_guard()
    }

    fn settle_guard(&mut self) -> bool {
        if self.guard.on(GuardEvent::WriteSettled) != GuardState::Idle {
            return false;
        }
        match self.deferred.take() {
            Some(envelope) if envelope.meta.updated_at_ms > self.watermark => {
                self.merge(envelope);
                true
            }
            Some(_) => {
                self.stats.remote_stale += 1;
                false
            }
            None => false,
        }
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.state) {
            log::warn!("Failed to persist local state: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::MemoryStore;
    use planner_core::edit::NewEvent;

    fn reconciler() -> Reconciler<MemoryStore> {
        Reconciler::with_state(AppState::seed(), MemoryStore::new(), ClientId::generate())
    }

    fn foreign(ts: u64, budget: f64) -> RemoteSignal {
        let mut doc = Document::seed();
        doc.total_budget = budget;
        RemoteSignal::Envelope(Envelope::new(doc, ClientId::parse("peer").unwrap(), ts))
    }

    #[test]
    fn test_merge_replaces_document_and_keeps_ui() {
        let mut r = reconciler();
        r.apply_local_edit(Patch::Ui(UiEdit::SetActiveSlide(2)));

        assert_eq!(r.on_remote(foreign(100, 500.0), 1), RemoteOutcome::Merged);
        assert_eq!(r.state().document.total_budget, 500.0);
        assert_eq!(r.state().ui.active_slide, 2);
        assert_eq!(r.watermark(), 100);
        assert_eq!(r.guard_state(), GuardState::ApplyingRemote);
    }

    #[test]
    fn test_redelivery_is_idempotent() {
        let mut r = reconciler();
        r.on_remote(foreign(100, 500.0), 1);
        r.release_guard();
        let after_first = r.state().clone();

        assert_eq!(r.on_remote(foreign(100, 999.0), 2), RemoteOutcome::Stale);
        assert_eq!(r.on_remote(foreign(50, 1.0), 3), RemoteOutcome::Stale);
        assert_eq!(r.state(), &after_first);
        assert_eq!(r.stats().remote_stale, 2);
    }

    #[test]
    fn test_self_echo_only_advances_watermark() {
        let mut r = reconciler();
        let mut doc = Document::seed();
        doc.total_budget = 1.0;
        let own = Envelope::new(doc, r.client_id().clone(), 300);

        assert_eq!(r.on_remote(RemoteSignal::Envelope(own), 1), RemoteOutcome::SelfEcho);
        assert_eq!(r.watermark(), 300);
        assert_eq!(r.state().document.total_budget, 15000.0);
    }

    #[test]
    fn test_missing_seeds_once() {
        let mut r = reconciler();
        match r.on_remote(RemoteSignal::Missing, 1000) {
            RemoteOutcome::Seed(req) => {
                assert_eq!(req.document, r.state().document);
                assert_eq!(req.meta.updated_at_ms, 1000);
                assert_eq!(&req.meta.client_id, r.client_id());
            }
            other => panic!("expected seed, got {other:?}"),
        }
        assert_eq!(r.on_remote(RemoteSignal::Missing, 2000), RemoteOutcome::Ignored);
        assert_eq!(r.stats().seeds, 1);
    }

    #[test]
    fn test_document_edit_marks_dirty_and_flushes_once() {
        let mut r = reconciler();
        let outcome = r.apply_local_edit(DocumentEdit::SetTotalBudget(9000.0).into());
        assert_eq!(outcome, EditOutcome::DocumentChanged);
        assert!(r.is_dirty());
        assert_eq!(r.guard_state(), GuardState::LocalPending);

        let req = r.flush(FlushReason::Debounce, 5000).unwrap();
        assert_eq!(req.document.total_budget, 9000.0);
        assert!(r.flush(FlushReason::Hidden, 5001).is_none());
        assert_eq!(r.store().save_count(), 1);
    }

    #[test]
    fn test_ui_edit_never_flushes() {
        let mut r = reconciler();
        assert_eq!(
            r.apply_local_edit(Patch::Ui(UiEdit::SetActiveSlide(3))),
            EditOutcome::UiOnly
        );
        assert!(r.flush(FlushReason::Debounce, 1).is_none());
        assert_eq!(r.guard_state(), GuardState::Idle);
        // persisted locally all the same
        assert_eq!(r.store().save_count(), 1);
    }

    #[test]
    fn test_noop_patch_is_unchanged() {
        let mut r = reconciler();
        let same = r.state().document.clone();
        assert_eq!(r.apply_local_edit(Patch::Replace(same)), EditOutcome::Unchanged);
        assert_eq!(
            r.apply_local_edit(DocumentEdit::RemoveEvent { id: "nope".into() }.into()),
            EditOutcome::Unchanged
        );
        assert!(!r.is_dirty());
        assert_eq!(r.store().save_count(), 0);
    }

    #[test]
    fn test_functional_update_patch() {
        let mut r = reconciler();
        let outcome = r.apply_local_edit(Patch::update(|doc| {
            let mut next = doc.clone();
            next.walmart_card_balance += 100.0;
            next
        }));
        assert_eq!(outcome, EditOutcome::DocumentChanged);
        assert_eq!(r.state().document.walmart_card_balance, 1382.0);
    }

    #[test]
    fn test_flush_suppressed_while_applying_remote() {
        let mut r = reconciler();
        r.on_remote(foreign(100, 500.0), 1);
        assert!(r.flush(FlushReason::Teardown, 2).is_none());

        r.release_guard();
        assert_eq!(r.guard_state(), GuardState::Idle);
        assert!(r.flush(FlushReason::Teardown, 3).is_none());
    }

    #[test]
    fn test_foreign_envelope_deferred_during_local_edit() {
        let mut r = reconciler();
        r.apply_local_edit(DocumentEdit::SetTotalBudget(7000.0).into());

        assert_eq!(r.on_remote(foreign(100, 500.0), 1), RemoteOutcome::Deferred);
        assert_eq!(r.on_remote(foreign(90, 400.0), 1), RemoteOutcome::Deferred);
        assert_eq!(r.state().document.total_budget, 7000.0);
        assert!(r.has_deferred());

        // our write is stamped after the deferred envelope
        let req = r.flush(FlushReason::Debounce, 50).unwrap();
        assert_eq!(req.meta.updated_at_ms, 101);

        // acknowledged write outranks the deferred envelope
        assert!(!r.write_settled(req.ticket, Ok(())));
        assert_eq!(r.guard_state(), GuardState::Idle);
        assert_eq!(r.state().document.total_budget, 7000.0);
        assert!(!r.has_deferred());
    }

    #[test]
    fn test_deferred_envelope_applied_after_failed_write() {
        let mut r = reconciler();
        r.apply_local_edit(DocumentEdit::SetTotalBudget(7000.0).into());
        r.on_remote(foreign(100, 500.0), 1);

        let req = r.flush(FlushReason::Debounce, 50).unwrap();
        assert!(r.write_settled(req.ticket, Err(ChannelError::Offline)));
        assert_eq!(r.state().document.total_budget, 500.0);
        assert_eq!(r.stats().writes_failed, 1);
    }

    #[test]
    fn test_failed_write_retried_on_next_flush() {
        let mut r = reconciler();
        r.apply_local_edit(DocumentEdit::SetCardBalance(10.0).into());
        let req = r.flush(FlushReason::Debounce, 10).unwrap();
        r.write_settled(req.ticket, Err(ChannelError::Disconnected));

        assert!(r.is_dirty());
        let retry = r.flush(FlushReason::Hidden, 20).unwrap();
        assert_eq!(retry.document.walmart_card_balance, 10.0);
        assert!(retry.meta.updated_at_ms > req.meta.updated_at_ms);
    }

    #[test]
    fn test_stale_generation_settle_keeps_guard() {
        let mut r = reconciler();
        r.apply_local_edit(DocumentEdit::SetTotalBudget(1.0).into());
        let first = r.flush(FlushReason::Debounce, 10).unwrap();
        r.apply_local_edit(DocumentEdit::SetTotalBudget(2.0).into());

        r.write_settled(first.ticket, Ok(()));
        assert_eq!(r.guard_state(), GuardState::LocalPending);

        let second = r.flush(FlushReason::Debounce, 20).unwrap();
        r.write_settled(second.ticket, Ok(()));
        assert_eq!(r.guard_state(), GuardState::Idle);
    }

    #[test]
    fn test_write_timestamp_never_behind_watermark() {
        let mut r = reconciler();
        r.on_remote(foreign(10_000, 500.0), 1);
        r.release_guard();
        r.apply_local_edit(DocumentEdit::SetTotalBudget(1.0).into());

        let req = r.flush(FlushReason::Debounce, 20).unwrap();
        assert_eq!(req.meta.updated_at_ms, 10_001);
    }

    #[test]
    fn test_reverted_edit_releases_deferred() {
        let mut r = reconciler();
        let original = r.state().document.total_budget;
        r.apply_local_edit(DocumentEdit::SetTotalBudget(1.0).into());
        r.on_remote(foreign(100, 500.0), 1);
        r.apply_local_edit(DocumentEdit::SetTotalBudget(original).into());

        // back to the document as loaded, but never synced: still a write
        let req = r.flush(FlushReason::Debounce, 5).unwrap();
        r.write_settled(req.ticket, Ok(()));
        assert_eq!(r.guard_state(), GuardState::Idle);
    }

    #[test]
    fn test_edit_reverted_during_write_still_settles() {
        let mut r = reconciler();
        r.apply_local_edit(DocumentEdit::SetTotalBudget(1.0).into());
        let first = r.flush(FlushReason::Debounce, 10).unwrap();
        r.apply_local_edit(DocumentEdit::SetTotalBudget(2.0).into());
        r.apply_local_edit(DocumentEdit::SetTotalBudget(1.0).into());

        // same document as the write in flight: nothing new to send
        assert!(r.flush(FlushReason::Debounce, 20).is_none());
        assert_eq!(r.guard_state(), GuardState::LocalPending);

        r.write_settled(first.ticket, Ok(()));
        assert_eq!(r.guard_state(), GuardState::Idle);

        assert_eq!(r.on_remote(foreign(10_000, 777.0), 30), RemoteOutcome::Merged);
        assert_eq!(r.state().document.total_budget, 777.0);
    }

    #[test]
    fn test_reverted_edit_applies_envelope_deferred_meanwhile() {
        let mut r = reconciler();
        r.apply_local_edit(DocumentEdit::SetTotalBudget(1.0).into());
        let first = r.flush(FlushReason::Debounce, 10).unwrap();
        r.apply_local_edit(DocumentEdit::SetTotalBudget(2.0).into());
        r.apply_local_edit(DocumentEdit::SetTotalBudget(1.0).into());
        assert!(r.flush(FlushReason::Debounce, 20).is_none());

        assert_eq!(r.on_remote(foreign(10_000, 777.0), 30), RemoteOutcome::Deferred);
        assert!(r.write_settled(first.ticket, Ok(())));
        assert_eq!(r.state().document.total_budget, 777.0);
    }

    #[test]
    fn test_add_event_selects_and_syncs() {
        let mut r = reconciler();
        r.apply_local_edit(DocumentEdit::AddEvent(NewEvent::titled("Bingo")).into());
        let selected = r.state().selected_event().unwrap();
        assert_eq!(selected.title, "Bingo");
        assert!(r.flush(FlushReason::Debounce, 1).is_some());
    }

    /// Foreign envelopes carry their timestamp as the budget.
    fn delivery(r: &Reconciler<MemoryStore>, ts: u64, own: bool) -> RemoteSignal {
        if own {
            let env = Envelope::new(r.state().document.clone(), r.client_id().clone(), ts);
            RemoteSignal::Envelope(env)
        } else {
            foreign(ts, ts as f64)
        }
    }

    fn orderings(items: &[(u64, bool)]) -> Vec<Vec<(u64, bool)>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut all = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let head = rest.remove(i);
            for mut tail in orderings(&rest) {
                tail.insert(0, head);
                all.push(tail);
            }
        }
        all
    }

    const DELIVERIES: [(u64, bool); 5] = [
        (100, false),
        (150, true),
        (200, false),
        (250, true),
        (300, false),
    ];

    #[test]
    fn test_any_delivery_order_converges_on_newest() {
        let all = orderings(&DELIVERIES);
        assert_eq!(all.len(), 120);

        for order in all {
            let mut r = reconciler();
            r.apply_local_edit(Patch::Ui(UiEdit::SetActiveSlide(2)));
            let ui_before = r.state().ui.clone();

            for (ts, own) in order.iter().copied() {
                let signal = delivery(&r, ts, own);
                r.on_remote(signal, 1);
                r.release_guard();
            }

            assert_eq!(r.state().document.total_budget, 300.0, "order {order:?}");
            assert_eq!(r.watermark(), 300, "order {order:?}");
            assert_eq!(r.state().ui, ui_before, "order {order:?}");
        }
    }

    #[test]
    fn test_any_delivery_order_during_local_edit() {
        for order in orderings(&DELIVERIES) {
            for write_ok in [true, false] {
                let mut r = reconciler();
                r.apply_local_edit(Patch::Ui(UiEdit::SetActiveSlide(2)));
                r.apply_local_edit(DocumentEdit::SetTotalBudget(42.0).into());
                let ui_before = r.state().ui.clone();

                for (ts, own) in order.iter().copied() {
                    let signal = delivery(&r, ts, own);
                    assert_ne!(r.on_remote(signal, 1), RemoteOutcome::Merged);
                }
                assert_eq!(r.state().document.total_budget, 42.0);

                let req = r.flush(FlushReason::Debounce, 50).unwrap();
                assert_eq!(req.meta.updated_at_ms, 301, "order {order:?}");
                let result = if write_ok {
                    Ok(())
                } else {
                    Err(ChannelError::Disconnected)
                };
                r.write_settled(req.ticket, result);

                let expected = if write_ok { 42.0 } else { 300.0 };
                assert_eq!(
                    r.state().document.total_budget,
                    expected,
                    "order {order:?}, write ok: {write_ok}"
                );
                assert_eq!(r.state().ui, ui_before, "order {order:?}");
                assert_ne!(r.guard_state(), GuardState::LocalPending);
            }
        }
    }

    #[test]
    fn test_new_loads_from_store() {
        let store = MemoryStore::new();
        let mut saved = AppState::seed();
        saved.document.total_budget = 321.0;
        store.save(&saved).unwrap();

        let r = Reconciler::new(store, ClientId::generate());
        assert_eq!(r.state().document.total_budget, 321.0);
    }
}
