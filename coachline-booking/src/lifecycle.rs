use chrono::{DateTime, Utc};
use coachline_core::PaymentRecord;

use crate::error::{BookingError, BookingResult};
use crate::models::{Booking, BookingStatus, PaymentStatus};

/// Result of asking a booking to expire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireOutcome {
    Expired,
    /// Already expired by an earlier sweep; nothing to do
    Unchanged,
}

/// Canonical booking and payment status transitions.
///
/// Every function validates first and mutates only on success, so a rejected
/// call leaves the booking untouched.
pub struct BookingStateMachine;

impl BookingStateMachine {
    /// Transition: Pending → Confirmed
    pub fn confirm(booking: &mut Booking, now: DateTime<Utc>) -> BookingResult<()> {
        match booking.status {
            BookingStatus::Pending if Self::hold_lapsed(booking, now) => {
                return Err(BookingError::AlreadyExpired(booking.id))
            }
            BookingStatus::Pending => {}
            BookingStatus::Expired => return Err(BookingError::AlreadyExpired(booking.id)),
            BookingStatus::Confirmed => return Err(BookingError::AlreadyConfirmed(booking.id)),
            other => return Err(BookingError::transition(other, "CONFIRMED")),
        }

        booking.status = BookingStatus::Confirmed;
        booking.expires_at = None;
        booking.touch(now);
        Ok(())
    }

    /// Payment: Pending → Paid. Confirms a still-pending booking.
    pub fn mark_paid(booking: &mut Booking, payment: &PaymentRecord, now: DateTime<Utc>) -> BookingResult<()> {
        if booking.payment_status != PaymentStatus::Pending {
            return Err(BookingError::transition(booking.payment_status, "PAID"));
        }
        match booking.status {
            BookingStatus::Pending if Self::hold_lapsed(booking, now) => {
                return Err(BookingError::AlreadyExpired(booking.id))
            }
            BookingStatus::Pending | BookingStatus::Confirmed => {}
            BookingStatus::Expired => return Err(BookingError::AlreadyExpired(booking.id)),
            other => return Err(BookingError::transition(other, "PAID")),
        }
        payment.validate()?;

        booking.payment_status = PaymentStatus::Paid;
        booking.payment_method = Some(payment.method);
        booking.payment_reference = payment.reference.clone();
        booking.paid_at = Some(now);
        booking.fee_headcount = booking.fee_base();
        if booking.status == BookingStatus::Pending {
            booking.status = BookingStatus::Confirmed;
            booking.expires_at = None;
        }
        booking.touch(now);
        Ok(())
    }

    /// Payment: Pending → Failed. A paid booking can never fail.
    pub fn mark_payment_failed(booking: &mut Booking, now: DateTime<Utc>) -> BookingResult<()> {
        if booking.payment_status != PaymentStatus::Pending || !booking.is_open() {
            return Err(BookingError::transition(booking.payment_status, "FAILED"));
        }

        booking.payment_status = PaymentStatus::Failed;
        booking.touch(now);
        Ok(())
    }

    /// Transition: Pending → Expired, once `expires_at` has passed
    pub fn expire(booking: &mut Booking, now: DateTime<Utc>) -> BookingResult<ExpireOutcome> {
        match booking.status {
            BookingStatus::Expired => return Ok(ExpireOutcome::Unchanged),
            BookingStatus::Confirmed => return Err(BookingError::AlreadyConfirmed(booking.id)),
            BookingStatus::Pending if Self::hold_lapsed(booking, now) => {}
            other => return Err(BookingError::transition(other, "EXPIRED")),
        }

        booking.status = BookingStatus::Expired;
        booking.touch(now);
        Ok(ExpireOutcome::Expired)
    }

    /// Transition: Confirmed → Completed (the trip ran)
    pub fn complete(booking: &mut Booking, now: DateTime<Utc>) -> BookingResult<()> {
        if booking.status != BookingStatus::Confirmed {
            return Err(BookingError::transition(booking.status, "COMPLETED"));
        }

        booking.status = BookingStatus::Completed;
        booking.touch(now);
        Ok(())
    }

    /// Whether any cancellation may start on this booking
    pub fn ensure_cancellable(booking: &Booking) -> BookingResult<()> {
        if !booking.is_open() {
            return Err(BookingError::transition(booking.status, "CANCELLED"));
        }
        Ok(())
    }

    /// Transition: Pending | Confirmed → Cancelled
    pub fn cancel(booking: &mut Booking, now: DateTime<Utc>) -> BookingResult<()> {
        Self::ensure_cancellable(booking)?;

        booking.status = BookingStatus::Cancelled;
        booking.expires_at = None;
        booking.cancelled_at = Some(now);
        booking.touch(now);
        Ok(())
    }

    fn hold_lapsed(booking: &Booking, now: DateTime<Utc>) -> bool {
        booking.expires_at.map(|deadline| deadline <= now).unwrap_or(false)
    }
}
