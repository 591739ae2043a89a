use chrono::{DateTime, Utc};
use coachline_shared::Money;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::{BookingError, BookingResult};
use crate::lifecycle::BookingStateMachine;
use crate::models::{Booking, BookingCancellation, CancellationScope, PassengerStatus, PaymentStatus};
use crate::policy::{FeeProration, Resolution};

/// Which part of a booking a cancellation covers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum CancelScope {
    Whole,
    Passengers(Vec<Uuid>),
}

/// The amounts a cancellation would produce, computed without touching any
/// state. Carries the booking version it was computed against so the commit
/// can detect that someone else got there first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefundQuote {
    pub booking_id: Uuid,
    pub booking_version: i64,
    pub request: CancelScope,
    pub passenger_ids: Vec<Uuid>,
    pub scope: CancellationScope,
    pub resolution: Resolution,
    /// Whether money was collected; unpaid bookings refund nothing
    pub paid: bool,
    pub cancelled_allocation: Money,
    pub gross_refund: Money,
    /// Fee assessed by this cancellation. Whatever the refund could not
    /// cover is carried in `outstanding_fee_after`.
    pub cancellation_fee: Money,
    pub refund_amount: Money,
    /// Share of the platform commission that goes with the cancelled seats
    pub commission_share: Money,
    /// Part of the cancelled allocation kept by the partner
    pub fee_retained: Money,
    pub outstanding_fee_after: Money,
    pub computed_at: DateTime<Utc>,
}

pub struct RefundCalculator;

impl RefundCalculator {
    /// `max(0, total * pct / 100 - fee)`, floored to minor units
    pub fn full_refund(total: Money, refund_percentage: u8, cancellation_fee: Money) -> Money {
        (total.mul_div_floor(i64::from(refund_percentage), 100) - cancellation_fee).non_negative()
    }

    /// Split `total` over passengers in proportion to `weights` (equal weights
    /// for an equal split). Largest-remainder rounding, so the parts always
    /// sum to `total`; ties go to the earlier passenger.
    pub fn allocate(total: Money, weights: &[u32]) -> Vec<Money> {
        if weights.is_empty() {
            return Vec::new();
        }

        let weight_sum: i64 = weights.iter().map(|w| i64::from(*w)).sum();
        let effective: Vec<i64> = if weight_sum == 0 {
            vec![1; weights.len()]
        } else {
            weights.iter().map(|w| i64::from(*w)).collect()
        };
        let weight_sum: i64 = effective.iter().sum();

        let mut parts = Vec::with_capacity(effective.len());
        let mut remainders = Vec::with_capacity(effective.len());
        for (idx, w) in effective.iter().enumerate() {
            let exact = total.minor() as i128 * *w as i128;
            let base = exact.div_euclid(weight_sum as i128);
            parts.push(base as i64);
            remainders.push((exact.rem_euclid(weight_sum as i128), idx));
        }

        let mut leftover = total.minor() - parts.iter().sum::<i64>();
        remainders.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        for (_, idx) in remainders.iter().cycle() {
            if leftover <= 0 {
                break;
            }
            parts[*idx] += 1;
            leftover -= 1;
        }

        parts.into_iter().map(Money::from_minor).collect()
    }

    /// Fee attributable to `active` out of `headcount` passengers, floored so
    /// the shares of any split of the headcount add back up to `fee` within
    /// one minor unit per part
    fn fee_for(fee: Money, active: u32, headcount: u32) -> Money {
        if headcount == 0 {
            return Money::ZERO;
        }
        fee.mul_div_floor(i64::from(active), i64::from(headcount))
    }

    /// Part of `amount` that goes with cancelling `x_s` out of the active `x_a`,
    /// floored against the original total so the parts telescope exactly.
    pub(crate) fn share_of(amount: Money, original_total: Money, x_a: Money, x_s: Money) -> Money {
        if original_total.minor() <= 0 {
            return Money::ZERO;
        }
        let t0 = original_total.minor();
        amount.mul_div_floor(x_a.minor(), t0) - amount.mul_div_floor((x_a - x_s).minor(), t0)
    }

    /// Compute the outcome of cancelling `scope` under `resolution`. Pure.
    pub fn preview(
        booking: &Booking,
        scope: &CancelScope,
        resolution: Resolution,
        now: DateTime<Utc>,
    ) -> BookingResult<RefundQuote> {
        BookingStateMachine::ensure_cancellable(booking)?;

        let active: Vec<Uuid> = booking
            .active_passengers()
            .filter(|p| p.status == PassengerStatus::Booked)
            .map(|p| p.id)
            .collect();

        let passenger_ids: Vec<Uuid> = match scope {
            CancelScope::Whole => booking.active_passengers().map(|p| p.id).collect(),
            CancelScope::Passengers(ids) => {
                if ids.is_empty() {
                    return Err(BookingError::Validation("no passengers selected".to_string()));
                }
                let mut seen = HashSet::new();
                let mut picked = Vec::new();
                for id in ids {
                    if !seen.insert(*id) {
                        continue;
                    }
                    if !active.contains(id) {
                        return Err(BookingError::Validation(format!(
                            "passenger {} is not an active, not-checked-in passenger of booking {}",
                            id, booking.id
                        )));
                    }
                    picked.push(*id);
                }
                picked
            }
        };

        if passenger_ids.iter().any(|id| !active.contains(id)) {
            return Err(BookingError::Validation(format!(
                "booking {} has checked-in passengers and cannot be cancelled whole",
                booking.id
            )));
        }

        let remaining = booking.active_passengers().count() - passenger_ids.len();
        let scope_kind = if remaining == 0 {
            CancellationScope::Full
        } else {
            CancellationScope::Partial
        };

        let x_a = booking.active_allocation();
        let x_s: Money = passenger_ids
            .iter()
            .filter_map(|id| booking.passenger(id))
            .map(|p| p.allocated_price)
            .sum();
        let x_rest = x_a - x_s;
        let t0 = booking.original_total;
        let pct = resolution.refund_percentage;

        let commission_share = Self::share_of(booking.original_commission, t0, x_a, x_s);
        let paid = booking.payment_status.holds_funds();

        let gross_before = x_a.mul_div_floor(i64::from(pct), 100);
        let gross_after = x_rest.mul_div_floor(i64::from(pct), 100);
        let gross_refund = gross_before - gross_after;

        let n_active = booking.active_passengers().count() as u32;
        let n_rest = n_active - passenger_ids.len() as u32;

        // Refundable balance of the booking before and after this cancellation
        // is gross minus the fee attributable to who is still travelling minus
        // any fee carried from earlier cancellations. The refund is the drop.
        let (refund_amount, cancellation_fee, outstanding_fee_after) = if !paid {
            (Money::ZERO, Money::ZERO, booking.outstanding_fee)
        } else {
            let fee = resolution.cancellation_fee;
            let (fee_before, fee_after) = match resolution.fee_proration {
                FeeProration::PerPassenger => {
                    let headcount = booking.fee_base();
                    (
                        Self::fee_for(fee, n_active, headcount),
                        Self::fee_for(fee, n_rest, headcount),
                    )
                }
                FeeProration::PerBooking if booking.fee_assessed => (Money::ZERO, Money::ZERO),
                FeeProration::PerBooking => (fee, Money::ZERO),
            };
            let assessed = fee_before - fee_after;
            let carried = booking.outstanding_fee;
            let before = (gross_before - fee_before - carried).non_negative();
            let after = (gross_after - fee_after - carried).non_negative();

            if n_rest == 0 {
                (before, assessed, Money::ZERO)
            } else if after <= before {
                (before - after, assessed, carried)
            } else {
                // Fee beyond this refund stays with the booking
                (Money::ZERO, assessed, gross_after - fee_after - before)
            }
        };

        let fee_retained = if paid { x_s - refund_amount } else { Money::ZERO };

        Ok(RefundQuote {
            booking_id: booking.id,
            booking_version: booking.version,
            request: scope.clone(),
            passenger_ids,
            scope: scope_kind,
            resolution,
            paid,
            cancelled_allocation: x_s,
            gross_refund,
            cancellation_fee,
            refund_amount,
            commission_share,
            fee_retained,
            outstanding_fee_after,
            computed_at: now,
        })
    }

    /// Apply a quote to the booking and produce the immutable cancellation
    /// record. The caller must have re-validated the quote against the
    /// current booking under its lock.
    pub fn apply(
        booking: &mut Booking,
        quote: &RefundQuote,
        reason: &str,
        cancelled_by: Uuid,
        now: DateTime<Utc>,
    ) -> BookingResult<BookingCancellation> {
        if booking.version != quote.booking_version {
            return Err(BookingError::StaleState(booking.id));
        }

        let cancellation = BookingCancellation {
            id: Uuid::new_v4(),
            booking_id: booking.id,
            passenger_ids: quote.passenger_ids.clone(),
            scope: quote.scope,
            policy_id: quote.resolution.policy_id,
            rule_id: quote.resolution.rule_id,
            basis: quote.resolution.basis,
            refund_percentage: quote.resolution.refund_percentage,
            cancellation_fee: quote.cancellation_fee,
            refund_amount: quote.refund_amount,
            commission_reversed: if quote.paid { quote.commission_share } else { Money::ZERO },
            fee_retained: quote.fee_retained,
            hours_before_departure: quote.resolution.hours_before_departure,
            reason: reason.to_string(),
            cancelled_by,
            refund_method: if quote.paid { booking.payment_method } else { None },
            created_at: now,
        };

        let headcount = booking.fee_base();
        booking.fee_headcount = if quote.paid {
            headcount
        } else {
            headcount.saturating_sub(quote.passenger_ids.len() as u32)
        };
        if quote.paid && quote.resolution.fee_proration == FeeProration::PerBooking {
            booking.fee_assessed = true;
        }

        for passenger_id in &quote.passenger_ids {
            let passenger = booking
                .passenger_mut(passenger_id)
                .ok_or_else(|| BookingError::NotFound(format!("passenger {}", passenger_id)))?;
            passenger.cancel(cancellation.id, now);
        }

        booking.total_price -= quote.cancelled_allocation;
        booking.platform_commission -= quote.commission_share;
        booking.partner_revenue = booking.total_price - booking.platform_commission;
        booking.refunded_amount += quote.refund_amount;
        booking.outstanding_fee = quote.outstanding_fee_after;

        if quote.paid {
            booking.payment_status = match quote.scope {
                CancellationScope::Full => PaymentStatus::Refunded,
                CancellationScope::Partial => PaymentStatus::PartiallyRefunded,
            };
        }

        if quote.scope == CancellationScope::Full {
            BookingStateMachine::cancel(booking, now)?;
        }
        booking.touch(now);

        Ok(cancellation)
    }
}
