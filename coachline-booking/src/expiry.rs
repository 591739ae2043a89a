use chrono::{DateTime, Utc};
use coachline_shared::Money;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BookingResult;
use crate::lifecycle::{BookingStateMachine, ExpireOutcome};
use crate::models::Booking;
use crate::store::Changeset;

/// Writes for expiring one booking: the booking itself plus its seat releases
#[derive(Debug, Clone)]
pub struct ExpiryPlan {
    pub booking: Booking,
    pub released_seats: Vec<Uuid>,
}

impl ExpiryPlan {
    pub fn into_changeset(self) -> Changeset {
        let mut changes = Changeset::new();
        changes.release(self.released_seats).put_booking(self.booking);
        changes
    }
}

/// Plans lapsed-hold expiry
pub struct ExpiryManager;

impl ExpiryManager {
    /// None when the booking had already been expired
    pub fn plan(booking: &Booking, now: DateTime<Utc>) -> BookingResult<Option<ExpiryPlan>> {
        let mut expired = booking.clone();
        match BookingStateMachine::expire(&mut expired, now)? {
            ExpireOutcome::Unchanged => Ok(None),
            ExpireOutcome::Expired => {
                let released_seats = expired.active_seat_ids();
                for passenger in expired.passengers.iter_mut().filter(|p| p.is_active()) {
                    passenger.expire(now);
                }
                expired.total_price = Money::ZERO;
                expired.platform_commission = Money::ZERO;
                expired.partner_revenue = Money::ZERO;
                Ok(Some(ExpiryPlan {
                    released_seats,
                    booking: expired,
                }))
            }
        }
    }
}

/// Outcome of one sweep pass
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub expired: usize,
    /// Lost the race to a confirm or payment, or already expired
    pub skipped: usize,
    pub failed: usize,
    pub released_seats: usize,
}

impl SweepReport {
    pub fn is_idle(&self) -> bool {
        self.examined == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookingStatus, Passenger};
    use crate::models::PassengerStatus;
    use chrono::Duration;

    fn lapsed_booking() -> Booking {
        let now = Utc::now();
        let mut booking = Booking::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Money::from_minor(200),
            Money::ZERO,
            Some(now - Duration::minutes(1)),
            now - Duration::minutes(16),
        );
        for name in ["A", "B"] {
            booking.passengers.push(Passenger::new(
                booking.id,
                booking.trip_id,
                Uuid::new_v4(),
                name.to_string(),
                Money::from_minor(100),
            ));
        }
        booking
    }

    #[test]
    fn test_expiry_releases_every_seat() {
        let booking = lapsed_booking();
        let plan = ExpiryManager::plan(&booking, Utc::now()).unwrap().unwrap();

        assert_eq!(plan.booking.status, BookingStatus::Expired);
        assert_eq!(plan.released_seats, booking.active_seat_ids());

        let changes = plan.into_changeset();
        assert_eq!(changes.seat_releases.len(), 2);
        assert_eq!(changes.bookings.len(), 1);
    }

    #[test]
    fn test_expiry_cancels_passengers_with_their_seats() {
        let booking = lapsed_booking();
        let now = Utc::now();
        let plan = ExpiryManager::plan(&booking, now).unwrap().unwrap();
        let expired = &plan.booking;

        assert!(expired
            .passengers
            .iter()
            .all(|p| p.status == PassengerStatus::Cancelled && p.cancelled_at == Some(now)));
        assert!(expired.passengers.iter().all(|p| p.cancellation_id.is_none()));
        assert_eq!(expired.active_passengers().count(), 0);
        assert_eq!(expired.total_price, expired.active_allocation());
        assert_eq!(expired.platform_commission + expired.partner_revenue, expired.total_price);
        assert_eq!(expired.original_total, Money::from_minor(200));
    }

    #[test]
    fn test_already_expired_plans_nothing() {
        let mut booking = lapsed_booking();
        booking.status = BookingStatus::Expired;
        assert!(ExpiryManager::plan(&booking, Utc::now()).unwrap().is_none());
    }

    #[test]
    fn test_confirmed_booking_is_not_expired() {
        let mut booking = lapsed_booking();
        booking.status = BookingStatus::Confirmed;
        assert!(ExpiryManager::plan(&booking, Utc::now()).is_err());
    }
}
