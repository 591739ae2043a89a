use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{Booking, BookingCancellation, BookingStatus, LedgerEntry, Seat};
use crate::policy::CancelPolicy;
use crate::store::{BookingStore, Changeset, CommitReceipt, StoreError};

#[derive(Default)]
struct State {
    bookings: HashMap<Uuid, Booking>,
    seats: HashMap<Uuid, Seat>,
    policies: HashMap<Uuid, CancelPolicy>,
    cancellations: Vec<BookingCancellation>,
    ledger: Vec<LedgerEntry>,
    next_sequence: i64,
}

/// In-process store. A commit validates the whole changeset against the
/// current state before applying any of it, all under one lock.
#[derive(Default)]
pub struct InMemoryBookingStore {
    state: Mutex<State>,
    fail_ledger_appends: AtomicBool,
}

impl InMemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every commit that appends ledger entries fail, to exercise rollback
    pub fn fail_ledger_appends(&self, fail: bool) {
        self.fail_ledger_appends.store(fail, Ordering::SeqCst);
    }

    pub async fn seat(&self, seat_id: Uuid) -> Option<Seat> {
        self.state.lock().await.seats.get(&seat_id).cloned()
    }

    pub async fn ledger_len(&self) -> usize {
        self.state.lock().await.ledger.len()
    }
}

fn check_versions(state: &State, bookings: &[Booking]) -> Result<(), StoreError> {
    for booking in bookings {
        match (state.bookings.get(&booking.id), booking.version) {
            (None, 0) => {}
            (Some(_), 0) => return Err(StoreError::VersionConflict(booking.id)),
            (None, _) => return Err(StoreError::NotFound(format!("booking {}", booking.id))),
            (Some(stored), version) if stored.version != version => {
                return Err(StoreError::VersionConflict(booking.id))
            }
            _ => {}
        }
    }
    Ok(())
}

/// Seats as they would look after the changeset's releases and claims
fn plan_seats(state: &State, changes: &Changeset) -> Result<HashMap<Uuid, Seat>, StoreError> {
    let mut touched: HashMap<Uuid, Seat> = HashMap::new();

    for seat_id in &changes.seat_releases {
        if let Some(seat) = state.seats.get(seat_id) {
            let mut seat = seat.clone();
            seat.is_available = true;
            touched.insert(*seat_id, seat);
        }
    }

    let mut conflicts = Vec::new();
    for claim in &changes.seat_claims {
        let current = touched.get(&claim.seat_id).or_else(|| state.seats.get(&claim.seat_id)).cloned();
        match current {
            Some(mut seat) if seat.trip_id == claim.trip_id && seat.is_available => {
                seat.is_available = false;
                touched.insert(claim.seat_id, seat);
            }
            _ => conflicts.push(claim.seat_id),
        }
    }

    if !conflicts.is_empty() {
        return Err(StoreError::SeatUnavailable(conflicts));
    }
    Ok(touched)
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn booking(&self, booking_id: Uuid) -> Result<Option<Booking>, StoreError> {
        Ok(self.state.lock().await.bookings.get(&booking_id).cloned())
    }

    async fn pending_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Uuid>, StoreError> {
        let state = self.state.lock().await;
        let mut due: Vec<&Booking> = state
            .bookings
            .values()
            .filter(|b| b.status == BookingStatus::Pending)
            .filter(|b| b.expires_at.map(|at| at <= now).unwrap_or(false))
            .collect();
        due.sort_by_key(|b| b.expires_at);
        Ok(due.into_iter().take(limit).map(|b| b.id).collect())
    }

    async fn seats_for_trip(&self, trip_id: Uuid) -> Result<Vec<Seat>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.seats.values().filter(|s| s.trip_id == trip_id).cloned().collect())
    }

    async fn seats(&self, seat_ids: &[Uuid]) -> Result<Vec<Seat>, StoreError> {
        let state = self.state.lock().await;
        Ok(seat_ids.iter().filter_map(|id| state.seats.get(id).cloned()).collect())
    }

    async fn insert_seats(&self, seats: &[Seat]) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        for seat in seats {
            state.seats.entry(seat.id).or_insert_with(|| seat.clone());
        }
        Ok(())
    }

    async fn cancel_policy(&self, policy_id: Uuid) -> Result<Option<CancelPolicy>, StoreError> {
        Ok(self.state.lock().await.policies.get(&policy_id).cloned())
    }

    async fn default_policies(&self, partner_id: Uuid) -> Result<Vec<CancelPolicy>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .policies
            .values()
            .filter(|p| p.is_active && p.is_default)
            .filter(|p| p.partner_id.is_none() || p.partner_id == Some(partner_id))
            .cloned()
            .collect())
    }

    async fn save_policy(&self, policy: &CancelPolicy) -> Result<(), StoreError> {
        self.state.lock().await.policies.insert(policy.id, policy.clone());
        Ok(())
    }

    async fn ledger_for_booking(&self, booking_id: Uuid) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.ledger.iter().filter(|e| e.booking_id == booking_id).cloned().collect())
    }

    async fn ledger_for_partner(
        &self,
        partner_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .ledger
            .iter()
            .filter(|e| e.partner_id == partner_id)
            .filter(|e| from.map(|f| e.created_at >= f).unwrap_or(true))
            .filter(|e| to.map(|t| e.created_at < t).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn cancellations(&self, booking_id: Uuid) -> Result<Vec<BookingCancellation>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .cancellations
            .iter()
            .filter(|c| c.booking_id == booking_id)
            .cloned()
            .collect())
    }

    async fn commit(&self, changes: Changeset) -> Result<CommitReceipt, StoreError> {
        let mut state = self.state.lock().await;

        check_versions(&state, &changes.bookings)?;
        let seats = plan_seats(&state, &changes)?;
        if !changes.ledger.is_empty() && self.fail_ledger_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("ledger append rejected".to_string()));
        }

        state.seats.extend(seats);

        let mut receipt = CommitReceipt::default();
        for mut booking in changes.bookings {
            booking.version += 1;
            receipt.versions.push((booking.id, booking.version));
            state.bookings.insert(booking.id, booking);
        }

        state.cancellations.extend(changes.cancellations);

        for mut entry in changes.ledger {
            state.next_sequence += 1;
            entry.sequence = state.next_sequence;
            receipt.ledger_sequences.push(entry.sequence);
            state.ledger.push(entry);
        }

        Ok(receipt)
    }
}
