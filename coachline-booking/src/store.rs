use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Booking, BookingCancellation, LedgerEntry, Seat};
use crate::policy::CancelPolicy;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Seats no longer available: {0:?}")]
    SeatUnavailable(Vec<Uuid>),

    #[error("Booking {0} was modified concurrently")]
    VersionConflict(Uuid),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Claim a seat only if it is still available on the given trip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeatClaim {
    pub seat_id: Uuid,
    pub trip_id: Uuid,
}

/// Everything one engine operation writes, committed all-or-nothing.
///
/// Each booking carries the version it was read at: version 0 inserts a new
/// booking, any other version must match the stored one and is bumped by one.
/// Seat releases are applied before seat claims.
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    pub bookings: Vec<Booking>,
    pub seat_releases: Vec<Uuid>,
    pub seat_claims: Vec<SeatClaim>,
    pub cancellations: Vec<BookingCancellation>,
    pub ledger: Vec<LedgerEntry>,
}

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_booking(&mut self, booking: Booking) -> &mut Self {
        self.bookings.push(booking);
        self
    }

    pub fn claim(&mut self, trip_id: Uuid, seat_ids: impl IntoIterator<Item = Uuid>) -> &mut Self {
        self.seat_claims
            .extend(seat_ids.into_iter().map(|seat_id| SeatClaim { seat_id, trip_id }));
        self
    }

    pub fn release(&mut self, seat_ids: impl IntoIterator<Item = Uuid>) -> &mut Self {
        self.seat_releases.extend(seat_ids);
        self
    }

    pub fn record_cancellation(&mut self, cancellation: BookingCancellation) -> &mut Self {
        self.cancellations.push(cancellation);
        self
    }

    pub fn append(&mut self, entries: impl IntoIterator<Item = LedgerEntry>) -> &mut Self {
        self.ledger.extend(entries);
        self
    }
}

/// What a successful commit assigned
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReceipt {
    /// New version of every booking in the changeset, in changeset order
    pub versions: Vec<(Uuid, i64)>,
    /// Sequence numbers given to the appended ledger entries, in order
    pub ledger_sequences: Vec<i64>,
}

impl CommitReceipt {
    pub fn version_of(&self, booking_id: Uuid) -> Option<i64> {
        self.versions.iter().find(|(id, _)| *id == booking_id).map(|(_, v)| *v)
    }
}

/// Persistence seam for the engine.
///
/// Reads may be served from any snapshot; every write goes through
/// `commit`, which must be atomic across all parts of the changeset.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn booking(&self, booking_id: Uuid) -> Result<Option<Booking>, StoreError>;

    /// Pending bookings whose hold lapsed at or before `now`, oldest first
    async fn pending_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Uuid>, StoreError>;

    async fn seats_for_trip(&self, trip_id: Uuid) -> Result<Vec<Seat>, StoreError>;

    async fn seats(&self, seat_ids: &[Uuid]) -> Result<Vec<Seat>, StoreError>;

    /// Register seats of a trip; existing seats are left untouched
    async fn insert_seats(&self, seats: &[Seat]) -> Result<(), StoreError>;

    async fn cancel_policy(&self, policy_id: Uuid) -> Result<Option<CancelPolicy>, StoreError>;

    /// Active default policies of the partner plus the platform-wide ones
    async fn default_policies(&self, partner_id: Uuid) -> Result<Vec<CancelPolicy>, StoreError>;

    async fn save_policy(&self, policy: &CancelPolicy) -> Result<(), StoreError>;

    async fn ledger_for_booking(&self, booking_id: Uuid) -> Result<Vec<LedgerEntry>, StoreError>;

    async fn ledger_for_partner(
        &self,
        partner_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<LedgerEntry>, StoreError>;

    async fn cancellations(&self, booking_id: Uuid) -> Result<Vec<BookingCancellation>, StoreError>;

    async fn commit(&self, changes: Changeset) -> Result<CommitReceipt, StoreError>;
}
