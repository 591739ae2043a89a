use chrono::{DateTime, Utc};
use coachline_booking::{
    Booking, BookingCancellation, CancelPolicy, CancelPolicyRule, FeeProration, LedgerEntry, Passenger, Seat,
    StoreError,
};
use coachline_core::PaymentMethod;
use coachline_shared::{Masked, Money};
use std::fmt::Display;
use std::str::FromStr;
use uuid::Uuid;

// Internal structs for type-safe querying

#[derive(sqlx::FromRow)]
pub(crate) struct BookingRow {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub user_id: Uuid,
    pub partner_id: Uuid,
    pub status: String,
    pub payment_status: String,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
    pub total_price: i64,
    pub original_total: i64,
    pub platform_commission: i64,
    pub original_commission: i64,
    pub partner_revenue: i64,
    pub refunded_amount: i64,
    pub outstanding_fee: i64,
    pub fee_headcount: i32,
    pub fee_assessed: bool,
    pub cancel_policy_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct PassengerRow {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub trip_id: Uuid,
    pub seat_id: Uuid,
    pub full_name: String,
    pub allocated_price: i64,
    pub passenger_status: String,
    pub cancellation_id: Option<Uuid>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct SeatRow {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub seat_number: String,
    pub is_available: bool,
    pub price_factor_bps: Option<i32>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct PolicyRow {
    pub id: Uuid,
    pub partner_id: Option<Uuid>,
    pub name: String,
    pub refund_percentage: Option<i16>,
    pub days_before_trip: Option<i32>,
    pub priority: i32,
    pub is_default: bool,
    pub is_active: bool,
    pub fee_proration: Option<String>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct RuleRow {
    pub id: Uuid,
    pub policy_id: Uuid,
    pub min_hours_before_departure: Option<i64>,
    pub max_hours_before_departure: Option<i64>,
    pub refund_percentage: i16,
    pub cancellation_fee: i64,
    pub display_order: i32,
    pub is_active: bool,
}

#[derive(sqlx::FromRow)]
pub(crate) struct LedgerRow {
    pub ledger_id: Uuid,
    pub sequence: i64,
    pub entry_type: String,
    pub amount: i64,
    pub booking_id: Uuid,
    pub partner_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub note: Option<String>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct CancellationRow {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub passenger_ids: Vec<Uuid>,
    pub scope: String,
    pub policy_id: Uuid,
    pub rule_id: Option<Uuid>,
    pub basis: String,
    pub refund_percentage: i16,
    pub cancellation_fee: i64,
    pub refund_amount: i64,
    pub commission_reversed: i64,
    pub fee_retained: i64,
    pub hours_before_departure: i64,
    pub reason: String,
    pub cancelled_by: Uuid,
    pub refund_method: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Parse a stored enum label, reporting the column on failure
pub(crate) fn parse<T>(column: &str, raw: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse::<T>()
        .map_err(|e| StoreError::Backend(format!("bad value in {}: {}", column, e)))
}

fn narrow<T, U>(column: &str, raw: U) -> Result<T, StoreError>
where
    T: TryFrom<U>,
    U: Copy + Display,
{
    T::try_from(raw).map_err(|_| StoreError::Backend(format!("{} out of range in {}", raw, column)))
}

pub(crate) fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

impl PassengerRow {
    pub fn into_passenger(self) -> Result<Passenger, StoreError> {
        Ok(Passenger {
            id: self.id,
            booking_id: self.booking_id,
            trip_id: self.trip_id,
            seat_id: self.seat_id,
            full_name: self.full_name,
            allocated_price: Money::from_minor(self.allocated_price),
            status: parse("passengers.passenger_status", &self.passenger_status)?,
            cancellation_id: self.cancellation_id,
            cancelled_at: self.cancelled_at,
        })
    }
}

impl BookingRow {
    pub fn into_booking(self, passengers: Vec<PassengerRow>) -> Result<Booking, StoreError> {
        let payment_method = self
            .payment_method
            .as_deref()
            .map(|m| parse::<PaymentMethod>("bookings.payment_method", m))
            .transpose()?;

        Ok(Booking {
            id: self.id,
            trip_id: self.trip_id,
            user_id: self.user_id,
            partner_id: self.partner_id,
            status: parse("bookings.status", &self.status)?,
            payment_status: parse("bookings.payment_status", &self.payment_status)?,
            payment_method,
            payment_reference: self.payment_reference.map(Masked),
            total_price: Money::from_minor(self.total_price),
            original_total: Money::from_minor(self.original_total),
            platform_commission: Money::from_minor(self.platform_commission),
            original_commission: Money::from_minor(self.original_commission),
            partner_revenue: Money::from_minor(self.partner_revenue),
            refunded_amount: Money::from_minor(self.refunded_amount),
            outstanding_fee: Money::from_minor(self.outstanding_fee),
            fee_headcount: narrow("bookings.fee_headcount", self.fee_headcount)?,
            fee_assessed: self.fee_assessed,
            cancel_policy_id: self.cancel_policy_id,
            expires_at: self.expires_at,
            passengers: passengers
                .into_iter()
                .map(PassengerRow::into_passenger)
                .collect::<Result<_, _>>()?,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
            paid_at: self.paid_at,
            cancelled_at: self.cancelled_at,
        })
    }
}

impl SeatRow {
    pub fn into_seat(self) -> Result<Seat, StoreError> {
        Ok(Seat {
            id: self.id,
            trip_id: self.trip_id,
            seat_number: self.seat_number,
            is_available: self.is_available,
            price_factor_bps: self
                .price_factor_bps
                .map(|f| narrow("seats.price_factor_bps", f))
                .transpose()?,
        })
    }
}

impl RuleRow {
    pub fn to_rule(&self) -> Result<CancelPolicyRule, StoreError> {
        Ok(CancelPolicyRule {
            id: self.id,
            min_hours_before_departure: self.min_hours_before_departure,
            max_hours_before_departure: self.max_hours_before_departure,
            refund_percentage: narrow("cancel_policy_rules.refund_percentage", self.refund_percentage)?,
            cancellation_fee: Money::from_minor(self.cancellation_fee),
            display_order: self.display_order,
            is_active: self.is_active,
        })
    }
}

impl PolicyRow {
    /// `rules` may hold rules of other policies; only this policy's are kept
    pub fn into_policy(self, rules: &[RuleRow], default_proration: FeeProration) -> Result<CancelPolicy, StoreError> {
        let fee_proration = match self.fee_proration.as_deref() {
            Some(raw) => parse("cancel_policies.fee_proration", raw)?,
            None => default_proration,
        };

        let own = rules
            .iter()
            .filter(|r| r.policy_id == self.id)
            .map(RuleRow::to_rule)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CancelPolicy {
            id: self.id,
            partner_id: self.partner_id,
            name: self.name,
            refund_percentage: self
                .refund_percentage
                .map(|p| narrow("cancel_policies.refund_percentage", p))
                .transpose()?,
            days_before_trip: self
                .days_before_trip
                .map(|d| narrow("cancel_policies.days_before_trip", d))
                .transpose()?,
            priority: self.priority,
            is_default: self.is_default,
            is_active: self.is_active,
            fee_proration,
            rules: own,
        })
    }
}

impl LedgerRow {
    pub fn into_entry(self) -> Result<LedgerEntry, StoreError> {
        Ok(LedgerEntry {
            id: self.ledger_id,
            sequence: self.sequence,
            entry_type: parse("booking_ledger.entry_type", &self.entry_type)?,
            amount: Money::from_minor(self.amount),
            booking_id: self.booking_id,
            partner_id: self.partner_id,
            created_at: self.created_at,
            note: self.note,
        })
    }
}

impl CancellationRow {
    pub fn into_cancellation(self) -> Result<BookingCancellation, StoreError> {
        let refund_method = self
            .refund_method
            .as_deref()
            .map(|m| parse::<PaymentMethod>("booking_cancellations.refund_method", m))
            .transpose()?;

        Ok(BookingCancellation {
            id: self.id,
            booking_id: self.booking_id,
            passenger_ids: self.passenger_ids,
            scope: parse("booking_cancellations.scope", &self.scope)?,
            policy_id: self.policy_id,
            rule_id: self.rule_id,
            basis: parse("booking_cancellations.basis", &self.basis)?,
            refund_percentage: narrow("booking_cancellations.refund_percentage", self.refund_percentage)?,
            cancellation_fee: Money::from_minor(self.cancellation_fee),
            refund_amount: Money::from_minor(self.refund_amount),
            commission_reversed: Money::from_minor(self.commission_reversed),
            fee_retained: Money::from_minor(self.fee_retained),
            hours_before_departure: self.hours_before_departure,
            reason: self.reason,
            cancelled_by: self.cancelled_by,
            refund_method,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coachline_booking::{BookingStatus, EntryType, PassengerStatus, PaymentStatus};

    fn booking_row() -> BookingRow {
        let now = Utc::now();
        BookingRow {
            id: Uuid::new_v4(),
            trip_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            partner_id: Uuid::new_v4(),
            status: "confirmed".to_string(),
            payment_status: "partially_refunded".to_string(),
            payment_method: Some("stc_pay".to_string()),
            payment_reference: Some("STC-1".to_string()),
            total_price: 200,
            original_total: 300,
            platform_commission: 20,
            original_commission: 30,
            partner_revenue: 180,
            refunded_amount: 0,
            outstanding_fee: 0,
            fee_headcount: 3,
            fee_assessed: false,
            cancel_policy_id: None,
            expires_at: None,
            version: 3,
            created_at: now,
            updated_at: now,
            paid_at: Some(now),
            cancelled_at: None,
        }
    }

    #[test]
    fn test_booking_row_maps_enums_and_money() {
        let row = booking_row();
        let passenger = PassengerRow {
            id: Uuid::new_v4(),
            booking_id: row.id,
            trip_id: row.trip_id,
            seat_id: Uuid::new_v4(),
            full_name: "Noura".to_string(),
            allocated_price: 100,
            passenger_status: "checked_in".to_string(),
            cancellation_id: None,
            cancelled_at: None,
        };

        let booking = row.into_booking(vec![passenger]).unwrap();
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(booking.payment_status, PaymentStatus::PartiallyRefunded);
        assert_eq!(booking.payment_method, Some(PaymentMethod::StcPay));
        assert_eq!(booking.payment_reference.as_ref().map(|r| r.expose().as_str()), Some("STC-1"));
        assert_eq!(booking.total_price, Money::from_minor(200));
        assert_eq!(booking.passengers[0].status, PassengerStatus::CheckedIn);
        assert_eq!(booking.fee_headcount, 3);
        assert_eq!(booking.fee_base(), 3);
    }

    #[test]
    fn test_negative_fee_headcount_is_rejected() {
        let mut row = booking_row();
        row.fee_headcount = -1;
        assert!(matches!(row.into_booking(Vec::new()), Err(StoreError::Backend(_))));
    }

    #[test]
    fn test_unknown_status_is_a_backend_error() {
        let mut row = booking_row();
        row.status = "archived".to_string();
        assert!(matches!(row.into_booking(Vec::new()), Err(StoreError::Backend(_))));
    }

    #[test]
    fn test_policy_picks_its_rules_and_default_proration() {
        let policy = PolicyRow {
            id: Uuid::new_v4(),
            partner_id: None,
            name: "Platform".to_string(),
            refund_percentage: Some(80),
            days_before_trip: Some(2),
            priority: 0,
            is_default: true,
            is_active: true,
            fee_proration: None,
        };
        let rule = |policy_id| RuleRow {
            id: Uuid::new_v4(),
            policy_id,
            min_hours_before_departure: Some(24),
            max_hours_before_departure: None,
            refund_percentage: 75,
            cancellation_fee: 500,
            display_order: 1,
            is_active: true,
        };
        let rules = vec![rule(policy.id), rule(Uuid::new_v4())];

        let mapped = policy.into_policy(&rules, FeeProration::PerBooking).unwrap();
        assert_eq!(mapped.rules.len(), 1);
        assert_eq!(mapped.fee_proration, FeeProration::PerBooking);
        assert_eq!(mapped.refund_percentage, Some(80));
        assert_eq!(mapped.days_before_trip, Some(2));
    }

    #[test]
    fn test_out_of_range_percentage_rejected() {
        let rule = RuleRow {
            id: Uuid::new_v4(),
            policy_id: Uuid::new_v4(),
            min_hours_before_departure: None,
            max_hours_before_departure: None,
            refund_percentage: -5,
            cancellation_fee: 0,
            display_order: 1,
            is_active: true,
        };
        assert!(rule.to_rule().is_err());
    }

    #[test]
    fn test_ledger_row_maps() {
        let row = LedgerRow {
            ledger_id: Uuid::new_v4(),
            sequence: 7,
            entry_type: "commission".to_string(),
            amount: -100,
            booking_id: Uuid::new_v4(),
            partner_id: Uuid::new_v4(),
            created_at: Utc::now(),
            note: None,
        };
        let entry = row.into_entry().unwrap();
        assert_eq!(entry.entry_type, EntryType::Commission);
        assert_eq!(entry.amount, Money::from_minor(-100));
        assert_eq!(entry.sequence, 7);
    }
}
