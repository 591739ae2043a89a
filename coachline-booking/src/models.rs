use chrono::{DateTime, Utc};
use coachline_core::PaymentMethod;
use coachline_shared::{Masked, Money};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::policy::ResolutionBasis;

/// Booking status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
    Expired,
}

/// Payment status, orthogonal to the booking status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
    PartiallyRefunded,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PassengerStatus {
    Booked,
    CheckedIn,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Booking,
    Refund,
    Commission,
    Adjustment,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancellationScope {
    Full,
    Partial,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
            BookingStatus::Expired => "expired",
        }
    }
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::PartiallyRefunded => "partially_refunded",
        }
    }

    /// Money has been collected and not fully returned yet
    pub fn holds_funds(&self) -> bool {
        matches!(self, PaymentStatus::Paid | PaymentStatus::PartiallyRefunded)
    }
}

impl PassengerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassengerStatus::Booked => "booked",
            PassengerStatus::CheckedIn => "checked_in",
            PassengerStatus::Cancelled => "cancelled",
        }
    }
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Booking => "booking",
            EntryType::Refund => "refund",
            EntryType::Commission => "commission",
            EntryType::Adjustment => "adjustment",
        }
    }
}

impl CancellationScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancellationScope::Full => "full",
            CancellationScope::Partial => "partial",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            "completed" => Ok(BookingStatus::Completed),
            "expired" => Ok(BookingStatus::Expired),
            other => Err(format!("unknown booking status {}", other)),
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            "partially_refunded" => Ok(PaymentStatus::PartiallyRefunded),
            other => Err(format!("unknown payment status {}", other)),
        }
    }
}

impl FromStr for PassengerStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "booked" => Ok(PassengerStatus::Booked),
            "checked_in" => Ok(PassengerStatus::CheckedIn),
            "cancelled" => Ok(PassengerStatus::Cancelled),
            other => Err(format!("unknown passenger status {}", other)),
        }
    }
}

impl FromStr for EntryType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "booking" => Ok(EntryType::Booking),
            "refund" => Ok(EntryType::Refund),
            "commission" => Ok(EntryType::Commission),
            "adjustment" => Ok(EntryType::Adjustment),
            other => Err(format!("unknown ledger entry type {}", other)),
        }
    }
}

impl FromStr for CancellationScope {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(CancellationScope::Full),
            "partial" => Ok(CancellationScope::Partial),
            other => Err(format!("unknown cancellation scope {}", other)),
        }
    }
}

/// One reservation and the passengers it holds seats for.
///
/// Never deleted: every lifecycle operation moves it to another status.
/// `platform_commission + partner_revenue == total_price` holds after every
/// operation, and `total_price` is the sum of the active passengers'
/// allocated prices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub user_id: Uuid,
    pub partner_id: Uuid,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<PaymentMethod>,
    pub payment_reference: Option<Masked<String>>,
    pub total_price: Money,
    pub original_total: Money,
    pub platform_commission: Money,
    /// Commission as first booked; cancellations reverse shares of it
    pub original_commission: Money,
    pub partner_revenue: Money,
    pub refunded_amount: Money,
    /// Fee assessed but larger than the refunds it was charged against,
    /// absorbed by later refunds
    pub outstanding_fee: Money,
    /// Passengers a per-passenger fee is spread over. Survives splits and
    /// shrinks only when passengers drop out before payment; 0 until fixed.
    pub fee_headcount: u32,
    /// A per-booking fee has been charged against a paid cancellation
    pub fee_assessed: bool,
    pub cancel_policy_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
    pub passengers: Vec<Passenger>,
    /// Bumped by the store on every commit; 0 means not yet persisted
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Booking {
    pub fn new(
        trip_id: Uuid,
        user_id: Uuid,
        partner_id: Uuid,
        total_price: Money,
        platform_commission: Money,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            trip_id,
            user_id,
            partner_id,
            status: BookingStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_method: None,
            payment_reference: None,
            total_price,
            original_total: total_price,
            platform_commission,
            original_commission: platform_commission,
            partner_revenue: total_price - platform_commission,
            refunded_amount: Money::ZERO,
            outstanding_fee: Money::ZERO,
            fee_headcount: 0,
            fee_assessed: false,
            cancel_policy_id: None,
            expires_at,
            passengers: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
            paid_at: None,
            cancelled_at: None,
        }
    }

    pub fn active_passengers(&self) -> impl Iterator<Item = &Passenger> {
        self.passengers.iter().filter(|p| p.is_active())
    }

    /// Sum of the allocated prices of passengers who still travel
    pub fn active_allocation(&self) -> Money {
        self.active_passengers().map(|p| p.allocated_price).sum()
    }

    /// Headcount the cancellation fee is prorated over, never fewer than
    /// the passengers still active
    pub fn fee_base(&self) -> u32 {
        let active = self.active_passengers().count() as u32;
        self.fee_headcount.max(active)
    }

    pub fn active_seat_ids(&self) -> Vec<Uuid> {
        self.active_passengers().map(|p| p.seat_id).collect()
    }

    pub fn passenger(&self, passenger_id: &Uuid) -> Option<&Passenger> {
        self.passengers.iter().find(|p| p.id == *passenger_id)
    }

    pub fn passenger_mut(&mut self, passenger_id: &Uuid) -> Option<&mut Passenger> {
        self.passengers.iter_mut().find(|p| p.id == *passenger_id)
    }

    pub fn is_open(&self) -> bool {
        matches!(self.status, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

/// One seat occupant inside a booking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Passenger {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub trip_id: Uuid,
    pub seat_id: Uuid,
    pub full_name: String,
    pub allocated_price: Money,
    pub status: PassengerStatus,
    pub cancellation_id: Option<Uuid>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Passenger {
    pub fn new(booking_id: Uuid, trip_id: Uuid, seat_id: Uuid, full_name: String, allocated_price: Money) -> Self {
        Self {
            id: Uuid::new_v4(),
            booking_id,
            trip_id,
            seat_id,
            full_name,
            allocated_price,
            status: PassengerStatus::Booked,
            cancellation_id: None,
            cancelled_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status != PassengerStatus::Cancelled
    }

    /// Mark as cancelled (never delete)
    pub fn cancel(&mut self, cancellation_id: Uuid, now: DateTime<Utc>) {
        self.status = PassengerStatus::Cancelled;
        self.cancellation_id = Some(cancellation_id);
        self.cancelled_at = Some(now);
    }

    /// Drop out with the booking's lapsed hold; no cancellation record exists
    pub fn expire(&mut self, now: DateTime<Utc>) {
        self.status = PassengerStatus::Cancelled;
        self.cancelled_at = Some(now);
    }
}

/// A seat on a specific trip
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Seat {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub seat_number: String,
    pub is_available: bool,
    /// Price adjustment in basis points (10_000 = 1.0)
    pub price_factor_bps: Option<u32>,
}

impl Seat {
    pub fn new(trip_id: Uuid, seat_number: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            trip_id,
            seat_number: seat_number.into(),
            is_available: true,
            price_factor_bps: None,
        }
    }
}

/// Immutable accounting record of one monetary event on a booking.
/// Positive amounts credit the partner, negative amounts debit it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: Uuid,
    /// Assigned by the store at append time, strictly increasing
    pub sequence: i64,
    pub entry_type: EntryType,
    pub amount: Money,
    pub booking_id: Uuid,
    pub partner_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub note: Option<String>,
}

impl LedgerEntry {
    pub fn new(
        entry_type: EntryType,
        amount: Money,
        booking_id: Uuid,
        partner_id: Uuid,
        now: DateTime<Utc>,
        note: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            entry_type,
            amount,
            booking_id,
            partner_id,
            created_at: now,
            note: Some(note.into()),
        }
    }
}

/// The materialized result of one cancellation event, full or partial.
/// Written exactly once, never updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingCancellation {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub passenger_ids: Vec<Uuid>,
    pub scope: CancellationScope,
    pub policy_id: Uuid,
    pub rule_id: Option<Uuid>,
    pub basis: ResolutionBasis,
    pub refund_percentage: u8,
    pub cancellation_fee: Money,
    pub refund_amount: Money,
    pub commission_reversed: Money,
    pub fee_retained: Money,
    pub hours_before_departure: i64,
    pub reason: String,
    pub cancelled_by: Uuid,
    pub refund_method: Option<PaymentMethod>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statuses_serialize_as_stored_labels() {
        assert_eq!(serde_json::to_value(PaymentStatus::PartiallyRefunded).unwrap(), "partially_refunded");
        assert_eq!(serde_json::to_value(PassengerStatus::CheckedIn).unwrap(), "checked_in");
        for status in ["pending", "confirmed", "cancelled", "completed", "expired"] {
            let parsed: BookingStatus = status.parse().unwrap();
            assert_eq!(serde_json::to_value(parsed).unwrap(), status);
        }
    }

    #[test]
    fn test_new_booking_splits_commission_and_revenue() {
        let booking = Booking::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Money::from_minor(30000),
            Money::from_minor(3000),
            None,
            Utc::now(),
        );

        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.partner_revenue, Money::from_minor(27000));
        assert_eq!(booking.platform_commission + booking.partner_revenue, booking.total_price);
    }

    #[test]
    fn test_cancelled_passengers_leave_active_allocation() {
        let mut booking = Booking::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Money::from_minor(300),
            Money::ZERO,
            None,
            Utc::now(),
        );
        for name in ["A", "B", "C"] {
            let p = Passenger::new(booking.id, booking.trip_id, Uuid::new_v4(), name.to_string(), Money::from_minor(100));
            booking.passengers.push(p);
        }

        let first = booking.passengers[0].id;
        booking.passenger_mut(&first).unwrap().cancel(Uuid::new_v4(), Utc::now());

        assert_eq!(booking.active_allocation(), Money::from_minor(200));
        assert_eq!(booking.active_seat_ids().len(), 2);
        assert_eq!(booking.fee_base(), 2);

        booking.fee_headcount = 3;
        assert_eq!(booking.fee_base(), 3);
    }

    #[test]
    fn test_status_strings_round_trip() {
        assert_eq!("partially_refunded".parse::<PaymentStatus>().unwrap(), PaymentStatus::PartiallyRefunded);
        assert_eq!(BookingStatus::Expired.as_str().parse::<BookingStatus>().unwrap(), BookingStatus::Expired);
        assert!("archived".parse::<BookingStatus>().is_err());
    }
}
