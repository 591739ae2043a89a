use chrono::{DateTime, Duration, Utc};
use coachline_core::{Actor, AuthDecision, Authorizer, Capability, PaymentRecord, TripDirectory, TripInfo};
use coachline_shared::models::events::{
    BookingCancelledEvent, BookingConfirmedEvent, BookingExpiredEvent, BookingPaidEvent,
    PassengersTransferredEvent,
};
use coachline_shared::{BookingEvent, Money};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{BookingError, BookingResult};
use crate::expiry::{ExpiryManager, SweepReport};
use crate::inventory::SeatInventory;
use crate::ledger::{LedgerRecorder, PartnerStatement};
use crate::lifecycle::BookingStateMachine;
use crate::locks::LockRegistry;
use crate::models::{Booking, BookingCancellation, BookingStatus, LedgerEntry, Passenger, Seat};
use crate::policy::{hours_before_departure, CancelPolicy, PolicyResolver, Resolution};
use crate::refund::{CancelScope, RefundCalculator, RefundQuote};
use crate::store::{BookingStore, Changeset, CommitReceipt};
use crate::transfer::TripTransfer;

/// Tunables the engine reads at construction
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// How long a pending booking keeps its seats
    pub booking_hold: Duration,
    /// Platform commission in basis points of the booking total
    pub commission_rate_bps: u32,
    /// Maximum bookings one sweep pass examines
    pub sweep_batch: usize,
    pub event_buffer: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            booking_hold: Duration::minutes(15),
            commission_rate_bps: 1000,
            sweep_batch: 100,
            event_buffer: 256,
        }
    }
}

/// Request to hold seats on a trip for a new booking
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub trip_id: Uuid,
    pub user_id: Uuid,
    /// Seat and passenger name, one per traveller
    pub passengers: Vec<(Uuid, String)>,
    pub total_price: Money,
    pub cancel_policy_id: Option<Uuid>,
}

/// Bookings written by a transfer
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub source: Booking,
    /// Present when only some passengers moved
    pub split: Option<Booking>,
}

/// Entry point for every lifecycle operation.
///
/// Each mutating call takes the locks it needs, validates, builds one
/// changeset and commits it. Events go out only after a successful commit.
pub struct BookingService {
    store: Arc<dyn BookingStore>,
    trips: Arc<dyn TripDirectory>,
    authorizer: Arc<dyn Authorizer>,
    locks: LockRegistry,
    events: broadcast::Sender<BookingEvent>,
    settings: EngineSettings,
}

impl BookingService {
    pub fn new(
        store: Arc<dyn BookingStore>,
        trips: Arc<dyn TripDirectory>,
        authorizer: Arc<dyn Authorizer>,
        settings: EngineSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(settings.event_buffer.max(1));
        Self {
            store,
            trips,
            authorizer,
            locks: LockRegistry::new(),
            events,
            settings,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BookingEvent> {
        self.events.subscribe()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Register the seat map of a trip
    pub async fn register_seats(&self, actor: &Actor, trip_id: Uuid, seats: Vec<Seat>) -> BookingResult<()> {
        let trip = self.trip(trip_id).await?;
        self.authorize(actor, Capability::ManageTrips, trip.partner_id).await?;
        if let Some(foreign) = seats.iter().find(|s| s.trip_id != trip_id) {
            return Err(BookingError::Validation(format!("seat {} belongs to another trip", foreign.id)));
        }

        self.store.insert_seats(&seats).await?;
        info!("Registered {} seats for trip {}", seats.len(), trip_id);
        Ok(())
    }

    /// Create or replace a cancellation policy. Platform-wide policies
    /// (no partner) need an actor that is not partner scoped.
    pub async fn save_policy(&self, actor: &Actor, policy: CancelPolicy) -> BookingResult<CancelPolicy> {
        self.authorize(actor, Capability::ManageRefunds, policy.partner_id.unwrap_or_else(Uuid::nil))
            .await?;
        policy.validate()?;

        self.store.save_policy(&policy).await?;
        info!("Saved cancellation policy {} ({})", policy.id, policy.name);
        Ok(policy)
    }

    /// Hold seats and open a pending booking
    pub async fn create_booking(&self, actor: &Actor, request: NewBooking) -> BookingResult<Booking> {
        let trip = self.trip(request.trip_id).await?;
        self.authorize(actor, Capability::ManageBookings, trip.partner_id).await?;

        if request.passengers.is_empty() {
            return Err(BookingError::Validation("a booking needs at least one passenger".to_string()));
        }
        if request.total_price.is_negative() {
            return Err(BookingError::Validation("total price cannot be negative".to_string()));
        }
        if let Some(policy_id) = request.cancel_policy_id {
            if self.store.cancel_policy(policy_id).await?.is_none() {
                return Err(BookingError::NotFound(format!("cancellation policy {}", policy_id)));
            }
        }

        let seat_ids: Vec<Uuid> = request.passengers.iter().map(|(seat, _)| *seat).collect();
        let _guard = self.locks.acquire(seat_ids.iter().copied()).await;

        let seats = self.store.seats(&seat_ids).await?;
        let held = SeatInventory::check_hold(trip.id, &seat_ids, &seats)?;
        let allocations = RefundCalculator::allocate(request.total_price, &SeatInventory::price_weights(&held));

        let now = Utc::now();
        let commission = request
            .total_price
            .mul_div_floor(i64::from(self.settings.commission_rate_bps), 10_000);
        let mut booking = Booking::new(
            trip.id,
            request.user_id,
            trip.partner_id,
            request.total_price,
            commission,
            Some(now + self.settings.booking_hold),
            now,
        );
        booking.cancel_policy_id = request.cancel_policy_id;
        for ((seat_id, name), price) in request.passengers.into_iter().zip(allocations) {
            booking
                .passengers
                .push(Passenger::new(booking.id, trip.id, seat_id, name, price));
        }

        let mut changes = Changeset::new();
        changes.claim(trip.id, seat_ids).put_booking(booking.clone());
        let receipt = self.commit(changes).await?;
        apply_version(&mut booking, &receipt);

        info!(
            "Booking {} created on trip {} with {} seats, total {}",
            booking.id,
            trip.id,
            booking.passengers.len(),
            booking.total_price
        );
        Ok(booking)
    }

    pub async fn confirm(&self, actor: &Actor, booking_id: Uuid) -> BookingResult<Booking> {
        let _guard = self.locks.acquire([booking_id]).await;
        let mut booking = self.load(booking_id).await?;
        self.authorize(actor, Capability::ManageBookings, booking.partner_id).await?;

        BookingStateMachine::confirm(&mut booking, Utc::now())?;

        let mut changes = Changeset::new();
        changes.put_booking(booking.clone());
        let receipt = self.commit(changes).await?;
        apply_version(&mut booking, &receipt);

        info!("Booking {} confirmed", booking.id);
        self.publish_confirmed(&booking);
        Ok(booking)
    }

    /// Record a settled payment and append the matching charge entries
    pub async fn mark_paid(&self, actor: &Actor, booking_id: Uuid, payment: PaymentRecord) -> BookingResult<Booking> {
        let _guard = self.locks.acquire([booking_id]).await;
        let mut booking = self.load(booking_id).await?;
        self.authorize(actor, Capability::ManagePayments, booking.partner_id).await?;

        let was_pending = booking.status == BookingStatus::Pending;
        let now = Utc::now();
        BookingStateMachine::mark_paid(&mut booking, &payment, now)?;

        let mut changes = Changeset::new();
        changes
            .put_booking(booking.clone())
            .append(LedgerRecorder::payment_entries(&booking, now));
        let receipt = self.commit(changes).await?;
        apply_version(&mut booking, &receipt);

        info!("Booking {} paid via {}: {}", booking.id, payment.method, booking.total_price);
        if was_pending {
            self.publish_confirmed(&booking);
        }
        self.publish(BookingEvent::Paid(BookingPaidEvent {
            booking_id: booking.id,
            partner_id: booking.partner_id,
            payment_method: payment.method.to_string(),
            total_price: booking.total_price,
            timestamp: now.timestamp(),
        }));
        Ok(booking)
    }

    pub async fn mark_payment_failed(&self, actor: &Actor, booking_id: Uuid) -> BookingResult<Booking> {
        let _guard = self.locks.acquire([booking_id]).await;
        let mut booking = self.load(booking_id).await?;
        self.authorize(actor, Capability::ManagePayments, booking.partner_id).await?;

        BookingStateMachine::mark_payment_failed(&mut booking, Utc::now())?;

        let mut changes = Changeset::new();
        changes.put_booking(booking.clone());
        let receipt = self.commit(changes).await?;
        apply_version(&mut booking, &receipt);

        warn!("Payment failed for booking {}", booking.id);
        Ok(booking)
    }

    /// Close a confirmed booking once its trip has run
    pub async fn complete(&self, actor: &Actor, booking_id: Uuid) -> BookingResult<Booking> {
        let _guard = self.locks.acquire([booking_id]).await;
        let mut booking = self.load(booking_id).await?;
        self.authorize(actor, Capability::ManageTrips, booking.partner_id).await?;

        BookingStateMachine::complete(&mut booking, Utc::now())?;

        let mut changes = Changeset::new();
        changes.put_booking(booking.clone());
        let receipt = self.commit(changes).await?;
        apply_version(&mut booking, &receipt);

        info!("Booking {} completed", booking.id);
        Ok(booking)
    }

    /// Expire one lapsed booking and release its seats. Returns false when it
    /// was already expired.
    pub async fn expire(&self, actor: &Actor, booking_id: Uuid, now: DateTime<Utc>) -> BookingResult<bool> {
        Ok(self.expire_one(actor, booking_id, now).await?.is_some())
    }

    async fn expire_one(&self, actor: &Actor, booking_id: Uuid, now: DateTime<Utc>) -> BookingResult<Option<usize>> {
        let _guard = self.locks.acquire([booking_id]).await;
        let booking = self.load(booking_id).await?;
        self.authorize(actor, Capability::ExpireBookings, booking.partner_id).await?;

        let plan = match ExpiryManager::plan(&booking, now)? {
            Some(plan) => plan,
            None => return Ok(None),
        };
        let released = plan.released_seats.clone();

        self.commit(plan.into_changeset()).await?;

        info!("Booking {} expired, released {} seats", booking_id, released.len());
        let count = released.len();
        self.publish(BookingEvent::Expired(BookingExpiredEvent {
            booking_id,
            released_seats: released,
            timestamp: now.timestamp(),
        }));
        Ok(Some(count))
    }

    /// One pass of the unattended expiry sweep. Losing a race to a confirm or
    /// payment is expected and counted as skipped.
    #[tracing::instrument(skip(self, actor))]
    pub async fn expire_due(&self, actor: &Actor, now: DateTime<Utc>) -> BookingResult<SweepReport> {
        let due = self.store.pending_due(now, self.settings.sweep_batch).await?;
        let mut report = SweepReport {
            examined: due.len(),
            ..SweepReport::default()
        };

        for booking_id in due {
            match self.expire_one(actor, booking_id, now).await {
                Ok(Some(released)) => {
                    report.expired += 1;
                    report.released_seats += released;
                }
                Ok(None) => report.skipped += 1,
                Err(
                    e @ (BookingError::AlreadyConfirmed(_)
                    | BookingError::AlreadyExpired(_)
                    | BookingError::InvalidTransition { .. }
                    | BookingError::StaleState(_)),
                ) => {
                    debug!("Skipping expiry of booking {}: {}", booking_id, e);
                    report.skipped += 1;
                }
                Err(e @ BookingError::Unauthorized(_)) => return Err(e),
                Err(e) => {
                    error!("Failed to expire booking {}: {}", booking_id, e);
                    report.failed += 1;
                }
            }
        }

        if !report.is_idle() {
            info!(
                "Expiry sweep: {} examined, {} expired, {} skipped, {} failed",
                report.examined, report.expired, report.skipped, report.failed
            );
        }
        Ok(report)
    }

    /// Compute what cancelling `scope` would refund right now. Writes nothing.
    pub async fn preview_cancellation(
        &self,
        actor: &Actor,
        booking_id: Uuid,
        scope: CancelScope,
    ) -> BookingResult<RefundQuote> {
        let booking = self.load(booking_id).await?;
        self.authorize(actor, Capability::ManageRefunds, booking.partner_id).await?;

        let now = Utc::now();
        let resolution = self.resolve(&booking, now).await?;
        RefundCalculator::preview(&booking, &scope, resolution, now)
    }

    /// Commit a previously previewed cancellation. Fails with `StaleState`
    /// if the booking changed or the refund would now differ.
    #[tracing::instrument(skip(self, actor, quote), fields(booking_id = %quote.booking_id))]
    pub async fn commit_cancellation(
        &self,
        actor: &Actor,
        quote: &RefundQuote,
        reason: &str,
    ) -> BookingResult<BookingCancellation> {
        let _guard = self.locks.acquire([quote.booking_id]).await;
        let mut booking = self.load(quote.booking_id).await?;
        self.authorize(actor, Capability::ManageRefunds, booking.partner_id).await?;

        if booking.version != quote.booking_version {
            warn!(
                "Cancellation of booking {} rejected: version {} previewed, now {}",
                booking.id, quote.booking_version, booking.version
            );
            return Err(BookingError::StaleState(booking.id));
        }

        let now = Utc::now();
        let resolution = self.resolve(&booking, now).await?;
        let fresh = RefundCalculator::preview(&booking, &quote.request, resolution, now)?;
        if fresh.refund_amount != quote.refund_amount || fresh.passenger_ids != quote.passenger_ids {
            warn!(
                "Cancellation of booking {} rejected: refund moved from {} to {}",
                booking.id, quote.refund_amount, fresh.refund_amount
            );
            return Err(BookingError::StaleState(booking.id));
        }

        let released: Vec<Uuid> = fresh
            .passenger_ids
            .iter()
            .filter_map(|id| booking.passenger(id))
            .map(|p| p.seat_id)
            .collect();
        let cancellation = RefundCalculator::apply(&mut booking, &fresh, reason, actor.id, now)?;

        let mut changes = Changeset::new();
        changes
            .release(released)
            .put_booking(booking.clone())
            .record_cancellation(cancellation.clone())
            .append(LedgerRecorder::cancellation_entries(&booking, &fresh, now));
        self.commit(changes).await?;

        info!(
            "Booking {} {} cancellation of {} passenger(s), refund {} (fee retained {})",
            booking.id,
            cancellation.scope.as_str(),
            cancellation.passenger_ids.len(),
            cancellation.refund_amount,
            cancellation.fee_retained
        );
        self.publish(BookingEvent::Cancelled(BookingCancelledEvent {
            booking_id: booking.id,
            cancellation_id: cancellation.id,
            partner_id: booking.partner_id,
            passenger_ids: cancellation.passenger_ids.clone(),
            partial: booking.status != BookingStatus::Cancelled,
            refund_amount: cancellation.refund_amount,
            timestamp: now.timestamp(),
        }));
        Ok(cancellation)
    }

    /// Move passengers to another trip of the same partner. A subset moves
    /// into a new booking; the whole booking moves in place.
    #[tracing::instrument(skip(self, actor, passenger_ids))]
    pub async fn transfer(
        &self,
        actor: &Actor,
        booking_id: Uuid,
        passenger_ids: &[Uuid],
        to_trip_id: Uuid,
    ) -> BookingResult<TransferOutcome> {
        let _guard = self.locks.acquire([booking_id]).await;
        let booking = self.load(booking_id).await?;
        self.authorize(actor, Capability::ManageTrips, booking.partner_id).await?;

        let destination = self.trip(to_trip_id).await?;
        let seats = self.store.seats_for_trip(destination.id).await?;
        let now = Utc::now();
        let plan = TripTransfer::plan(&booking, passenger_ids, &destination, &seats, now)?;

        let moved = plan.passenger_ids.clone();
        let target_id = plan.target_booking_id();
        let mut source = plan.source.clone();
        let mut split = plan.split.clone();

        let receipt = self.commit(plan.into_changeset(destination.id)).await?;
        apply_version(&mut source, &receipt);
        if let Some(split) = split.as_mut() {
            apply_version(split, &receipt);
        }

        info!(
            "Moved {} passenger(s) of booking {} from trip {} to trip {} (booking {})",
            moved.len(),
            booking.id,
            booking.trip_id,
            destination.id,
            target_id
        );
        self.publish(BookingEvent::Transferred(PassengersTransferredEvent {
            source_booking_id: booking.id,
            target_booking_id: target_id,
            from_trip_id: booking.trip_id,
            to_trip_id: destination.id,
            passenger_ids: moved,
            timestamp: now.timestamp(),
        }));
        Ok(TransferOutcome { source, split })
    }

    /// Append a manual correction entry
    pub async fn record_adjustment(
        &self,
        actor: &Actor,
        booking_id: Uuid,
        amount: Money,
        note: &str,
    ) -> BookingResult<LedgerEntry> {
        if amount == Money::ZERO {
            return Err(BookingError::Validation("adjustment amount cannot be zero".to_string()));
        }
        if note.trim().is_empty() {
            return Err(BookingError::Validation("adjustments need a note".to_string()));
        }

        let _guard = self.locks.acquire([booking_id]).await;
        let booking = self.load(booking_id).await?;
        self.authorize(actor, Capability::ManagePayments, booking.partner_id).await?;

        let mut entry = LedgerRecorder::adjustment(&booking, amount, note, Utc::now());
        let mut changes = Changeset::new();
        changes.append([entry.clone()]);
        let receipt = self.commit(changes).await?;
        if let Some(sequence) = receipt.ledger_sequences.first() {
            entry.sequence = *sequence;
        }

        info!("Adjustment of {} recorded on booking {} by {}", amount, booking_id, actor.id);
        Ok(entry)
    }

    pub async fn booking(&self, booking_id: Uuid) -> BookingResult<Booking> {
        self.load(booking_id).await
    }

    pub async fn cancellations(&self, booking_id: Uuid) -> BookingResult<Vec<BookingCancellation>> {
        Ok(self.store.cancellations(booking_id).await?)
    }

    /// Entries of one booking in `(created_at, sequence)` order with running balances
    pub async fn ledger(&self, booking_id: Uuid) -> BookingResult<Vec<(LedgerEntry, Money)>> {
        let entries = self.store.ledger_for_booking(booking_id).await?;
        Ok(LedgerRecorder::running_balances(&entries))
    }

    pub async fn balance(&self, booking_id: Uuid) -> BookingResult<Money> {
        let entries = self.store.ledger_for_booking(booking_id).await?;
        Ok(LedgerRecorder::balance(&entries))
    }

    pub async fn partner_statement(
        &self,
        actor: &Actor,
        partner_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> BookingResult<PartnerStatement> {
        self.authorize(actor, Capability::ManagePayments, partner_id).await?;
        let entries = self.store.ledger_for_partner(partner_id, from, to).await?;
        Ok(PartnerStatement::from_entries(partner_id, from, to, &entries))
    }

    async fn load(&self, booking_id: Uuid) -> BookingResult<Booking> {
        self.store
            .booking(booking_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("booking {}", booking_id)))
    }

    async fn trip(&self, trip_id: Uuid) -> BookingResult<TripInfo> {
        self.trips
            .trip(trip_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("trip {}", trip_id)))
    }

    async fn authorize(&self, actor: &Actor, capability: Capability, partner_id: Uuid) -> BookingResult<()> {
        match self.authorizer.authorize(actor, capability, partner_id).await {
            AuthDecision::Authorized => Ok(()),
            AuthDecision::Denied(reason) => Err(BookingError::Unauthorized(reason)),
        }
    }

    /// Governing policy and its resolution for the booking at `now`
    async fn resolve(&self, booking: &Booking, now: DateTime<Utc>) -> BookingResult<Resolution> {
        let trip = self.trip(booking.trip_id).await?;
        let override_policy = match booking.cancel_policy_id {
            Some(policy_id) => self.store.cancel_policy(policy_id).await?,
            None => None,
        };
        let defaults = self.store.default_policies(booking.partner_id).await?;

        let policy = PolicyResolver::select_policy(booking.id, booking.partner_id, override_policy, defaults)?;
        policy.validate()?;
        Ok(PolicyResolver::resolve(&policy, hours_before_departure(trip.departure_at, now)))
    }

    async fn commit(&self, changes: Changeset) -> BookingResult<CommitReceipt> {
        self.store.commit(changes).await.map_err(|e| {
            warn!("Commit rejected: {}", e);
            BookingError::from(e)
        })
    }

    fn publish_confirmed(&self, booking: &Booking) {
        self.publish(BookingEvent::Confirmed(BookingConfirmedEvent {
            booking_id: booking.id,
            trip_id: booking.trip_id,
            partner_id: booking.partner_id,
            timestamp: booking.updated_at.timestamp(),
        }));
    }

    fn publish(&self, event: BookingEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

fn apply_version(booking: &mut Booking, receipt: &CommitReceipt) {
    if let Some(version) = receipt.version_of(booking.id) {
        booking.version = version;
    }
}
