use crate::money::Money;
use uuid::Uuid;

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct BookingConfirmedEvent {
    pub booking_id: Uuid,
    pub trip_id: Uuid,
    pub partner_id: Uuid,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct BookingPaidEvent {
    pub booking_id: Uuid,
    pub partner_id: Uuid,
    pub payment_method: String,
    pub total_price: Money,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct BookingCancelledEvent {
    pub booking_id: Uuid,
    pub cancellation_id: Uuid,
    pub partner_id: Uuid,
    pub passenger_ids: Vec<Uuid>,
    pub partial: bool,
    pub refund_amount: Money,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct PassengersTransferredEvent {
    pub source_booking_id: Uuid,
    pub target_booking_id: Uuid,
    pub from_trip_id: Uuid,
    pub to_trip_id: Uuid,
    pub passenger_ids: Vec<Uuid>,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct BookingExpiredEvent {
    pub booking_id: Uuid,
    pub released_seats: Vec<Uuid>,
    pub timestamp: i64,
}

/// Everything the engine announces after a successful commit.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BookingEvent {
    Confirmed(BookingConfirmedEvent),
    Paid(BookingPaidEvent),
    Cancelled(BookingCancelledEvent),
    Transferred(PassengersTransferredEvent),
    Expired(BookingExpiredEvent),
}

impl BookingEvent {
    pub fn booking_id(&self) -> Uuid {
        match self {
            BookingEvent::Confirmed(e) => e.booking_id,
            BookingEvent::Paid(e) => e.booking_id,
            BookingEvent::Cancelled(e) => e.booking_id,
            BookingEvent::Transferred(e) => e.source_booking_id,
            BookingEvent::Expired(e) => e.booking_id,
        }
    }

    /// Topic-style name, used as the log/dispatch key
    pub fn kind(&self) -> &'static str {
        match self {
            BookingEvent::Confirmed(_) => "booking.confirmed",
            BookingEvent::Paid(_) => "booking.paid",
            BookingEvent::Cancelled(_) => "booking.cancelled",
            BookingEvent::Transferred(_) => "booking.transferred",
            BookingEvent::Expired(_) => "booking.expired",
        }
    }
}
