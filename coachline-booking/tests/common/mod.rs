#![allow(dead_code)]

use chrono::{Duration, Utc};
use coachline_booking::{
    BookingService, CancelPolicy, CancelPolicyRule, EngineSettings, InMemoryBookingStore, NewBooking, Seat,
};
use coachline_core::{Actor, Capability, ScopedAuthorizer, StaticTripDirectory, TripInfo};
use coachline_booking::Booking;
use coachline_shared::Money;
use std::sync::Arc;
use uuid::Uuid;

pub struct Harness {
    pub service: Arc<BookingService>,
    pub store: Arc<InMemoryBookingStore>,
    pub trips: Arc<StaticTripDirectory>,
    pub partner_id: Uuid,
    pub admin: Actor,
    pub trip: TripInfo,
    pub seats: Vec<Seat>,
}

/// 72h+ 90% no fee, 24-72h 50% fee 20, under 24h 0% fee 50
pub fn standard_policy() -> CancelPolicy {
    CancelPolicy::new(
        None,
        "Standard",
        vec![
            CancelPolicyRule::new(Some(72), None, 90, Money::ZERO, 1),
            CancelPolicyRule::new(Some(24), Some(72), 50, Money::from_minor(20), 2),
            CancelPolicyRule::new(None, Some(24), 0, Money::from_minor(50), 3),
        ],
    )
}

impl Harness {
    /// Service over an in-memory store with one trip departing
    /// `departure_in` from now and the standard platform policy.
    pub async fn new(departure_in: Duration, seat_count: usize) -> Self {
        Self::build(departure_in, seat_count, true).await
    }

    pub async fn without_policies(departure_in: Duration, seat_count: usize) -> Self {
        Self::build(departure_in, seat_count, false).await
    }

    async fn build(departure_in: Duration, seat_count: usize, with_policy: bool) -> Self {
        let store = Arc::new(InMemoryBookingStore::new());
        let trips = Arc::new(StaticTripDirectory::new());
        let service = Arc::new(BookingService::new(
            store.clone(),
            trips.clone(),
            Arc::new(ScopedAuthorizer),
            EngineSettings::default(),
        ));

        let admin = Actor::admin(Uuid::new_v4());
        let partner_id = Uuid::new_v4();
        if with_policy {
            service.save_policy(&admin, standard_policy()).await.unwrap();
        }

        let mut harness = Self {
            service,
            store,
            trips,
            partner_id,
            admin,
            trip: TripInfo {
                id: Uuid::nil(),
                partner_id,
                departure_at: Utc::now(),
                capacity: 0,
            },
            seats: Vec::new(),
        };
        let (trip, seats) = harness.add_trip(departure_in, seat_count).await;
        harness.trip = trip;
        harness.seats = seats;
        harness
    }

    /// Another trip of the same partner
    pub async fn add_trip(&self, departure_in: Duration, seat_count: usize) -> (TripInfo, Vec<Seat>) {
        let trip = TripInfo {
            id: Uuid::new_v4(),
            partner_id: self.partner_id,
            departure_at: Utc::now() + departure_in + Duration::minutes(30),
            capacity: seat_count as u32,
        };
        self.trips.insert(trip.clone());

        let seats: Vec<Seat> = (1..=seat_count).map(|n| Seat::new(trip.id, n.to_string())).collect();
        self.service
            .register_seats(&self.admin, trip.id, seats.clone())
            .await
            .unwrap();
        (trip, seats)
    }

    pub fn staff(&self, capabilities: Vec<Capability>) -> Actor {
        Actor::partner_staff(Uuid::new_v4(), self.partner_id, capabilities)
    }

    /// Pending booking on the main trip over the first `count` seats
    pub async fn book(&self, count: usize, total: i64) -> Booking {
        self.book_seats(&self.seats[..count], total).await
    }

    pub async fn book_seats(&self, seats: &[Seat], total: i64) -> Booking {
        let request = NewBooking {
            trip_id: seats[0].trip_id,
            user_id: Uuid::new_v4(),
            passengers: seats
                .iter()
                .enumerate()
                .map(|(i, s)| (s.id, format!("Passenger {}", i + 1)))
                .collect(),
            total_price: Money::from_minor(total),
            cancel_policy_id: None,
        };
        self.service.create_booking(&self.admin, request).await.unwrap()
    }

    pub async fn seat_available(&self, seat_id: Uuid) -> bool {
        self.store.seat(seat_id).await.map(|s| s.is_available).unwrap_or(false)
    }
}
