use chrono::{DateTime, Utc};
use coachline_core::TripInfo;
use coachline_shared::Money;
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::{BookingError, BookingResult};
use crate::inventory::SeatInventory;
use crate::ledger::LedgerRecorder;
use crate::models::{Booking, LedgerEntry, PassengerStatus, PaymentStatus, Seat};
use crate::refund::RefundCalculator;
use crate::store::Changeset;

/// Everything a transfer writes, ready to commit
#[derive(Debug, Clone)]
pub struct TransferPlan {
    pub source: Booking,
    /// New booking for a subset of passengers; None when the whole booking moves
    pub split: Option<Booking>,
    pub passenger_ids: Vec<Uuid>,
    pub claimed_seats: Vec<Uuid>,
    pub released_seats: Vec<Uuid>,
    pub ledger: Vec<LedgerEntry>,
}

impl TransferPlan {
    pub fn target_booking_id(&self) -> Uuid {
        self.split.as_ref().map(|b| b.id).unwrap_or(self.source.id)
    }

    pub fn into_changeset(self, to_trip: Uuid) -> Changeset {
        let mut changes = Changeset::new();
        changes
            .release(self.released_seats)
            .claim(to_trip, self.claimed_seats)
            .put_booking(self.source)
            .append(self.ledger);
        if let Some(split) = self.split {
            changes.put_booking(split);
        }
        changes
    }
}

/// Moves passengers of a booking onto another trip of the same partner.
pub struct TripTransfer;

impl TripTransfer {
    pub fn plan(
        booking: &Booking,
        passenger_ids: &[Uuid],
        destination: &TripInfo,
        destination_seats: &[Seat],
        now: DateTime<Utc>,
    ) -> BookingResult<TransferPlan> {
        if !booking.is_open() {
            return Err(BookingError::transition(booking.status, "TRANSFERRED"));
        }
        if destination.partner_id != booking.partner_id {
            return Err(BookingError::Validation(format!(
                "trip {} belongs to another partner",
                destination.id
            )));
        }
        if destination.id == booking.trip_id {
            return Err(BookingError::Validation("destination is the booking's current trip".to_string()));
        }
        if passenger_ids.is_empty() {
            return Err(BookingError::Validation("no passengers selected".to_string()));
        }

        let mut seen = HashSet::new();
        let moving: Vec<Uuid> = passenger_ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        for id in &moving {
            match booking.passenger(id) {
                Some(p) if p.status == PassengerStatus::Booked => {}
                Some(p) => {
                    return Err(BookingError::Validation(format!(
                        "passenger {} is {} and cannot be transferred",
                        id,
                        p.status.as_str()
                    )))
                }
                None => return Err(BookingError::NotFound(format!("passenger {}", id))),
            }
        }

        let new_seats = SeatInventory::pick_free(destination_seats, moving.len())?;
        let whole = moving.len() == booking.active_passengers().count();

        let mut source = booking.clone();
        let mut released = Vec::with_capacity(moving.len());
        for (passenger_id, seat) in moving.iter().zip(&new_seats) {
            if let Some(passenger) = source.passenger_mut(passenger_id) {
                released.push(passenger.seat_id);
                passenger.seat_id = seat.id;
                passenger.trip_id = destination.id;
            }
        }
        let claimed: Vec<Uuid> = new_seats.iter().map(|s| s.id).collect();

        if whole {
            source.trip_id = destination.id;
            source.touch(now);
            return Ok(TransferPlan {
                source,
                split: None,
                passenger_ids: moving,
                claimed_seats: claimed,
                released_seats: released,
                ledger: Vec::new(),
            });
        }

        let headcount = source.fee_base();
        let x_a = source.active_allocation();
        let allocation: Money = moving
            .iter()
            .filter_map(|id| source.passenger(id))
            .map(|p| p.allocated_price)
            .sum();
        let commission = RefundCalculator::share_of(source.original_commission, source.original_total, x_a, allocation);

        let mut split = Booking::new(
            destination.id,
            source.user_id,
            source.partner_id,
            allocation,
            commission,
            source.expires_at,
            now,
        );
        split.status = source.status;
        split.cancel_policy_id = source.cancel_policy_id;
        split.payment_method = source.payment_method;
        split.payment_reference = source.payment_reference.clone();
        split.paid_at = source.paid_at;
        // Both halves prorate the fee over the original headcount; a
        // per-booking fee stays with the source
        split.fee_headcount = headcount;
        split.fee_assessed = true;
        source.fee_headcount = headcount;
        split.payment_status = match source.payment_status {
            PaymentStatus::PartiallyRefunded => PaymentStatus::Paid,
            other => other,
        };

        let (moved, kept): (Vec<_>, Vec<_>) = source
            .passengers
            .drain(..)
            .partition(|p| moving.contains(&p.id));
        source.passengers = kept;
        split.passengers = moved
            .into_iter()
            .map(|mut p| {
                p.booking_id = split.id;
                p
            })
            .collect();

        source.total_price -= allocation;
        source.platform_commission -= commission;
        source.partner_revenue = source.total_price - source.platform_commission;
        source.touch(now);

        let ledger = if source.payment_status.holds_funds() {
            LedgerRecorder::transfer_entries(&source, &split, allocation, commission, now)
        } else {
            Vec::new()
        };

        Ok(TransferPlan {
            source,
            split: Some(split),
            passenger_ids: moving,
            claimed_seats: claimed,
            released_seats: released,
            ledger,
        })
    }
}
