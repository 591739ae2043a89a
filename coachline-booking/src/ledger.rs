use chrono::{DateTime, Utc};
use coachline_shared::Money;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::models::{Booking, EntryType, LedgerEntry};
use crate::refund::RefundQuote;

/// Builds the ledger entries each money-moving operation appends, and folds
/// stored entries into balances. Entries are never updated or deleted; a
/// correction is a new adjustment entry.
pub struct LedgerRecorder;

impl LedgerRecorder {
    /// Charge on payment: the booking total credited, the platform's cut debited
    pub fn payment_entries(booking: &Booking, now: DateTime<Utc>) -> Vec<LedgerEntry> {
        let mut entries = vec![LedgerEntry::new(
            EntryType::Booking,
            booking.total_price,
            booking.id,
            booking.partner_id,
            now,
            format!(
                "payment via {}",
                booking.payment_method.map(|m| m.as_str()).unwrap_or("unknown")
            ),
        )];
        push_nonzero(
            &mut entries,
            EntryType::Commission,
            -booking.platform_commission,
            booking,
            now,
            "platform commission",
        );
        entries
    }

    /// Refund, commission reversal and retained fee for one cancellation.
    /// Unpaid bookings produce nothing.
    pub fn cancellation_entries(booking: &Booking, quote: &RefundQuote, now: DateTime<Utc>) -> Vec<LedgerEntry> {
        if !quote.paid {
            return Vec::new();
        }

        let mut entries = Vec::new();
        push_nonzero(
            &mut entries,
            EntryType::Refund,
            -quote.refund_amount,
            booking,
            now,
            &format!("refund of {} passenger(s)", quote.passenger_ids.len()),
        );
        push_nonzero(
            &mut entries,
            EntryType::Commission,
            quote.commission_share,
            booking,
            now,
            "commission reversal",
        );
        push_nonzero(
            &mut entries,
            EntryType::Adjustment,
            -quote.fee_retained,
            booking,
            now,
            "cancellation fee retained",
        );
        entries
    }

    /// Mirrored entries moving `allocation` and `commission` from `source`
    /// to the booking split off it by a transfer.
    pub fn transfer_entries(
        source: &Booking,
        target: &Booking,
        allocation: Money,
        commission: Money,
        now: DateTime<Utc>,
    ) -> Vec<LedgerEntry> {
        let mut entries = Vec::new();
        push_nonzero(
            &mut entries,
            EntryType::Adjustment,
            -allocation,
            source,
            now,
            &format!("transferred to booking {}", target.id),
        );
        push_nonzero(
            &mut entries,
            EntryType::Commission,
            commission,
            source,
            now,
            &format!("commission moved to booking {}", target.id),
        );
        push_nonzero(
            &mut entries,
            EntryType::Adjustment,
            allocation,
            target,
            now,
            &format!("transferred from booking {}", source.id),
        );
        push_nonzero(
            &mut entries,
            EntryType::Commission,
            -commission,
            target,
            now,
            &format!("commission moved from booking {}", source.id),
        );
        entries
    }

    /// Manual correction
    pub fn adjustment(booking: &Booking, amount: Money, note: &str, now: DateTime<Utc>) -> LedgerEntry {
        LedgerEntry::new(EntryType::Adjustment, amount, booking.id, booking.partner_id, now, note)
    }

    pub fn balance(entries: &[LedgerEntry]) -> Money {
        entries.iter().map(|e| e.amount).sum()
    }

    /// Entries in `(created_at, sequence)` order, each with the balance after it
    pub fn running_balances(entries: &[LedgerEntry]) -> Vec<(LedgerEntry, Money)> {
        let mut ordered = entries.to_vec();
        ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.sequence.cmp(&b.sequence)));

        let mut balance = Money::ZERO;
        ordered
            .into_iter()
            .map(|entry| {
                balance += entry.amount;
                (entry, balance)
            })
            .collect()
    }
}

fn push_nonzero(
    entries: &mut Vec<LedgerEntry>,
    entry_type: EntryType,
    amount: Money,
    booking: &Booking,
    now: DateTime<Utc>,
    note: &str,
) {
    if amount != Money::ZERO {
        entries.push(LedgerEntry::new(entry_type, amount, booking.id, booking.partner_id, now, note));
    }
}

/// Partner-facing summary of ledger activity over a period
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartnerStatement {
    pub partner_id: Uuid,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub bookings: Money,
    pub refunds: Money,
    pub commissions: Money,
    pub adjustments: Money,
    pub net: Money,
    pub entry_count: usize,
    pub booking_count: usize,
}

impl PartnerStatement {
    pub fn from_entries(
        partner_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        entries: &[LedgerEntry],
    ) -> Self {
        let mut statement = Self {
            partner_id,
            from,
            to,
            bookings: Money::ZERO,
            refunds: Money::ZERO,
            commissions: Money::ZERO,
            adjustments: Money::ZERO,
            net: Money::ZERO,
            entry_count: 0,
            booking_count: 0,
        };

        let mut booking_ids = HashSet::new();
        for entry in entries.iter().filter(|e| e.partner_id == partner_id) {
            match entry.entry_type {
                EntryType::Booking => statement.bookings += entry.amount,
                EntryType::Refund => statement.refunds += entry.amount,
                EntryType::Commission => statement.commissions += entry.amount,
                EntryType::Adjustment => statement.adjustments += entry.amount,
            }
            statement.net += entry.amount;
            statement.entry_count += 1;
            booking_ids.insert(entry.booking_id);
        }
        statement.booking_count = booking_ids.len();
        statement
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookingStatus, PaymentStatus};
    use chrono::Duration;

    fn paid_booking() -> Booking {
        let mut booking = Booking::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Money::from_minor(50000),
            Money::from_minor(5000),
            None,
            Utc::now(),
        );
        booking.status = BookingStatus::Confirmed;
        booking.payment_status = PaymentStatus::Paid;
        booking
    }

    #[test]
    fn test_payment_entries() {
        let booking = paid_booking();
        let entries = LedgerRecorder::payment_entries(&booking, Utc::now());

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].entry_type, EntryType::Booking);
        assert_eq!(entries[0].amount, Money::from_minor(50000));
        assert_eq!(entries[1].amount, Money::from_minor(-5000));
        assert_eq!(LedgerRecorder::balance(&entries), booking.partner_revenue);
    }

    #[test]
    fn test_transfer_entries_mirror() {
        let source = paid_booking();
        let target = paid_booking();
        let entries = LedgerRecorder::transfer_entries(
            &source,
            &target,
            Money::from_minor(100),
            Money::from_minor(10),
            Utc::now(),
        );

        assert_eq!(entries.len(), 4);
        assert_eq!(LedgerRecorder::balance(&entries), Money::ZERO);
        let source_sum: Money = entries.iter().filter(|e| e.booking_id == source.id).map(|e| e.amount).sum();
        assert_eq!(source_sum, Money::from_minor(-90));
    }

    #[test]
    fn test_running_balances_follow_time_then_sequence() {
        let booking = paid_booking();
        let now = Utc::now();
        let mut late = LedgerRecorder::adjustment(&booking, Money::from_minor(-5), "late", now + Duration::seconds(5));
        late.sequence = 1;
        let mut first = LedgerRecorder::adjustment(&booking, Money::from_minor(100), "first", now);
        first.sequence = 2;
        let mut second = LedgerRecorder::adjustment(&booking, Money::from_minor(-30), "second", now);
        second.sequence = 3;

        let balances = LedgerRecorder::running_balances(&[late, second, first]);
        let amounts: Vec<i64> = balances.iter().map(|(_, b)| b.minor()).collect();
        assert_eq!(amounts, vec![100, 70, 65]);
    }

    #[test]
    fn test_partner_statement_totals() {
        let booking = paid_booking();
        let mut entries = LedgerRecorder::payment_entries(&booking, Utc::now());
        entries.push(LedgerRecorder::adjustment(&booking, Money::from_minor(-250), "goodwill", Utc::now()));
        let mut foreign = paid_booking();
        foreign.partner_id = Uuid::new_v4();
        entries.extend(LedgerRecorder::payment_entries(&foreign, Utc::now()));

        let statement = PartnerStatement::from_entries(booking.partner_id, None, None, &entries);
        assert_eq!(statement.bookings, Money::from_minor(50000));
        assert_eq!(statement.commissions, Money::from_minor(-5000));
        assert_eq!(statement.adjustments, Money::from_minor(-250));
        assert_eq!(statement.net, Money::from_minor(44750));
        assert_eq!(statement.entry_count, 3);
        assert_eq!(statement.booking_count, 1);
    }
}
