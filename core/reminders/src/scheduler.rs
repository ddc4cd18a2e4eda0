use diary_schemas::{Clock, DiaryRecord, RecordId};
use diary_store::{StoreError, StoreHandle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::capability::{
    CapabilityError, DeliveryPreference, ReminderPayload, TimerCapability, TimerToken,
};

/// Position of one scheduling operation in the per-record issue order.
///
/// Taken when the operation is issued (before the storage write) and handed
/// back when the write completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    id: RecordId,
    seq: u64,
}

impl Ticket {
    pub fn record_id(&self) -> &RecordId {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReminderAction {
    Armed {
        token: TimerToken,
        fire_at_ms: i64,
        delivery: DeliveryPreference,
    },
    Cancelled {
        token: TimerToken,
    },
    /// A later-issued operation for the same record was already applied
    Stale,
    /// The timer capability refused; the reminder will not fire
    Failed {
        token: TimerToken,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RearmSummary {
    pub armed: usize,
    pub expired: usize,
    pub disabled: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
struct Sequence {
    issued: u64,
    applied: u64,
    /// Tickets handed out but not yet applied or abandoned
    outstanding: u64,
    /// The last applied operation withdrew the timer
    cancelled: bool,
}

impl Sequence {
    fn issue(&mut self, id: &RecordId) -> Ticket {
        self.issued += 1;
        self.outstanding += 1;
        Ticket {
            id: id.clone(),
            seq: self.issued,
        }
    }

    /// Nothing in flight and no timer left; a fresh entry behaves the same
    fn settled(&self) -> bool {
        self.outstanding == 0 && self.cancelled
    }
}

/// Derives timer state from `reminder_enabled` / `reminder_at` on every call;
/// the only state kept here is the per-record operation order.
pub struct ReminderScheduler {
    timer: Arc<dyn TimerCapability>,
    clock: Arc<dyn Clock>,
    sequences: Mutex<HashMap<RecordId, Sequence>>,
}

impl ReminderScheduler {
    pub fn new(timer: Arc<dyn TimerCapability>, clock: Arc<dyn Clock>) -> Self {
        Self {
            timer,
            clock,
            sequences: Mutex::new(HashMap::new()),
        }
    }

    fn sequences(&self) -> MutexGuard<'_, HashMap<RecordId, Sequence>> {
        self.sequences.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reserve the next position for an operation on `id`
    pub fn begin(&self, id: &RecordId) -> Ticket {
        self.begin_with(id, || ()).0
    }

    /// Reserve the next position for `id` and run `submit` under the same lock.
    ///
    /// `submit` should queue the matching storage write. Ticket order then equals
    /// storage order for every id, whichever write finishes first.
    pub fn begin_with<R, F>(&self, id: &RecordId, submit: F) -> (Ticket, R)
    where
        F: FnOnce() -> R,
    {
        let mut sequences = self.sequences();
        let ticket = sequences.entry(id.clone()).or_default().issue(id);
        (ticket, submit())
    }

    /// A ticket for every record this scheduler has seen, with `submit` run
    /// under the same lock. Used to withdraw all timers around a bulk delete.
    pub fn begin_all_with<R, F>(&self, submit: F) -> (Vec<Ticket>, R)
    where
        F: FnOnce() -> R,
    {
        let mut sequences = self.sequences();
        let tickets = sequences
            .iter_mut()
            .map(|(id, sequence)| sequence.issue(id))
            .collect();
        (tickets, submit())
    }

    /// Give back a ticket whose storage write failed; the timer is left alone
    pub fn abandon(&self, ticket: Ticket) {
        let mut sequences = self.sequences();
        if let Some(sequence) = sequences.get_mut(&ticket.id) {
            sequence.outstanding = sequence.outstanding.saturating_sub(1);
            if sequence.settled() {
                sequences.remove(&ticket.id);
            }
        }
    }

    /// Number of records with sequencing state still held
    pub fn tracked_count(&self) -> usize {
        self.sequences().len()
    }

    /// Apply `op` only if no later ticket for the same record has been applied.
    ///
    /// The lock is held across the timer call so effects land in applied order.
    fn apply<F>(&self, ticket: &Ticket, cancels: bool, op: F) -> ReminderAction
    where
        F: FnOnce() -> ReminderAction,
    {
        let mut sequences = self.sequences();
        let sequence = sequences.entry(ticket.id.clone()).or_default();
        sequence.outstanding = sequence.outstanding.saturating_sub(1);

        let action = if ticket.seq <= sequence.applied {
            debug!(
                "Dropping stale reminder update for {} (ticket {} <= applied {})",
                ticket.id, ticket.seq, sequence.applied
            );
            ReminderAction::Stale
        } else {
            sequence.applied = ticket.seq;
            sequence.cancelled = cancels;
            op()
        };

        if sequence.settled() {
            sequences.remove(&ticket.id);
        }
        action
    }

    /// Arm when the record's reminder is enabled and in the future, otherwise
    /// withdraw any registration for it.
    pub fn on_save(&self, ticket: Ticket, record: &DiaryRecord) -> ReminderAction {
        if ticket.id != record.id {
            warn!(
                "Ticket for {} used to save {}; treating as stale",
                ticket.id, record.id
            );
            self.abandon(ticket);
            return ReminderAction::Stale;
        }

        let now = self.clock.now_ms();
        self.apply(&ticket, false, || {
            if record.reminder_armable(now) {
                self.arm(
                    &record.id,
                    record.reminder_at,
                    ReminderPayload::from_record(record),
                )
            } else {
                if record.reminder_enabled {
                    info!(
                        "Reminder for {} is in the past ({} <= {}), not arming",
                        record.id, record.reminder_at, now
                    );
                }
                self.cancel(&record.id)
            }
        })
    }

    /// Always withdraw the registration, whatever the record looked like
    pub fn on_delete(&self, ticket: Ticket) -> ReminderAction {
        let id = ticket.id.clone();
        self.apply(&ticket, true, || self.cancel(&id))
    }

    pub fn save(&self, record: &DiaryRecord) -> ReminderAction {
        let ticket = self.begin(&record.id);
        self.on_save(ticket, record)
    }

    pub fn delete(&self, id: &RecordId) -> ReminderAction {
        let ticket = self.begin(id);
        self.on_delete(ticket)
    }

    /// Re-arm every still-future reminder; expired ones are dropped, never fired late
    pub fn on_app_start(&self, records: &[DiaryRecord]) -> RearmSummary {
        let now = self.clock.now_ms();
        let mut summary = RearmSummary::default();

        for record in records {
            if !record.reminder_enabled {
                summary.disabled += 1;
                continue;
            }
            if !record.reminder_armable(now) {
                debug!("Skipping expired reminder for {}", record.id);
                summary.expired += 1;
                continue;
            }

            match self.save(record) {
                ReminderAction::Armed { .. } => summary.armed += 1,
                ReminderAction::Failed { .. } => summary.failed += 1,
                ReminderAction::Cancelled { .. } | ReminderAction::Stale => {}
            }
        }

        info!(
            "Reminders restored: {} armed, {} expired, {} disabled, {} failed",
            summary.armed, summary.expired, summary.disabled, summary.failed
        );
        summary
    }

    /// Load every record from the store and re-arm pending reminders
    pub async fn restore_from(&self, store: &StoreHandle) -> Result<RearmSummary, StoreError> {
        let records = store.list_all().await?;
        info!("Restoring reminders from {} records", records.len());
        Ok(self.on_app_start(&records))
    }

    /// Register a one-shot wake-up for `id`. Not sequenced; prefer `on_save`.
    pub fn arm(&self, id: &RecordId, fire_at_ms: i64, payload: ReminderPayload) -> ReminderAction {
        let token = TimerToken::for_record(id);

        let delivery = if self.timer.can_schedule_exact() {
            DeliveryPreference::Exact
        } else {
            info!("Exact alarms unavailable, scheduling {} best-effort", id);
            DeliveryPreference::BestEffort
        };

        let result = match self.timer.register(token, fire_at_ms, delivery, payload.clone()) {
            Err(CapabilityError::ExactNotPermitted) if delivery == DeliveryPreference::Exact => {
                warn!(
                    "Exact alarm refused for {}, retrying with best-effort delivery",
                    id
                );
                self.timer
                    .register(token, fire_at_ms, DeliveryPreference::BestEffort, payload)
                    .map(|()| DeliveryPreference::BestEffort)
            }
            other => other.map(|()| delivery),
        };

        match result {
            Ok(delivery) => {
                info!(
                    "Reminder armed for {} at {} (token {}, {:?})",
                    id, fire_at_ms, token, delivery
                );
                ReminderAction::Armed {
                    token,
                    fire_at_ms,
                    delivery,
                }
            }
            Err(e) => {
                warn!("Failed to arm reminder for {} (token {}): {}", id, token, e);
                ReminderAction::Failed {
                    token,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Withdraw the registration for `id`. Not sequenced; prefer `on_delete`.
    pub fn cancel(&self, id: &RecordId) -> ReminderAction {
        let token = TimerToken::for_record(id);
        match self.timer.unregister(token) {
            Ok(()) => {
                debug!("Reminder cancelled for {} (token {})", id, token);
                ReminderAction::Cancelled { token }
            }
            Err(e) => {
                warn!("Failed to cancel reminder for {} (token {}): {}", id, token, e);
                ReminderAction::Failed {
                    token,
                    reason: e.to_string(),
                }
            }
        }
    }
}
