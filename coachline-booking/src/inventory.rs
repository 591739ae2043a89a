use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::error::{BookingError, BookingResult};
use crate::models::Seat;

/// Basis points of a seat without its own price factor
pub const NEUTRAL_PRICE_FACTOR_BPS: u32 = 10_000;

/// Seat availability checks for one trip. Works on a snapshot of seats; the
/// store re-checks availability when the claim is committed.
pub struct SeatInventory;

impl SeatInventory {
    /// Validate a hold of `requested` seats on `trip_id`.
    ///
    /// Either every seat can be held or nothing is: the error lists each seat
    /// that is missing, on another trip or already taken.
    pub fn check_hold(trip_id: Uuid, requested: &[Uuid], seats: &[Seat]) -> BookingResult<Vec<Seat>> {
        if requested.is_empty() {
            return Err(BookingError::Validation("no seats requested".to_string()));
        }

        let mut seen = HashSet::new();
        if let Some(dup) = requested.iter().find(|id| !seen.insert(**id)) {
            return Err(BookingError::Validation(format!("seat {} requested twice", dup)));
        }

        let by_id: HashMap<Uuid, &Seat> = seats.iter().map(|s| (s.id, s)).collect();
        let mut conflicts = Vec::new();
        let mut held = Vec::with_capacity(requested.len());
        for seat_id in requested {
            match by_id.get(seat_id) {
                Some(seat) if seat.trip_id == trip_id && seat.is_available => held.push((*seat).clone()),
                _ => conflicts.push(*seat_id),
            }
        }

        if !conflicts.is_empty() {
            return Err(BookingError::SeatUnavailable(conflicts));
        }
        Ok(held)
    }

    pub fn free_count(seats: &[Seat]) -> usize {
        seats.iter().filter(|s| s.is_available).count()
    }

    /// Pick `count` free seats, lowest seat numbers first
    pub fn pick_free(seats: &[Seat], count: usize) -> BookingResult<Vec<Seat>> {
        let mut free: Vec<&Seat> = seats.iter().filter(|s| s.is_available).collect();
        if free.len() < count {
            return Err(BookingError::InsufficientCapacity {
                requested: count,
                available: free.len(),
            });
        }

        free.sort_by(|a, b| seat_order_key(&a.seat_number).cmp(&seat_order_key(&b.seat_number)));
        Ok(free.into_iter().take(count).cloned().collect())
    }

    /// Price weights for allocating a booking total across the given seats
    pub fn price_weights(seats: &[Seat]) -> Vec<u32> {
        seats
            .iter()
            .map(|s| s.price_factor_bps.unwrap_or(NEUTRAL_PRICE_FACTOR_BPS))
            .collect()
    }
}

/// "2A" sorts before "10A"
fn seat_order_key(number: &str) -> (u64, String) {
    let digits: String = number.chars().take_while(|c| c.is_ascii_digit()).collect();
    let numeric = digits.parse::<u64>().unwrap_or(u64::MAX);
    (numeric, number[digits.len()..].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trip_seats(trip_id: Uuid, numbers: &[&str]) -> Vec<Seat> {
        numbers.iter().map(|n| Seat::new(trip_id, *n)).collect()
    }

    #[test]
    fn test_hold_all_or_nothing() {
        let trip = Uuid::new_v4();
        let mut seats = trip_seats(trip, &["1", "2", "3"]);
        seats[1].is_available = false;
        let foreign = Seat::new(Uuid::new_v4(), "9");
        seats.push(foreign.clone());

        let ok = SeatInventory::check_hold(trip, &[seats[0].id, seats[2].id], &seats).unwrap();
        assert_eq!(ok.len(), 2);

        let err = SeatInventory::check_hold(trip, &[seats[0].id, seats[1].id, foreign.id], &seats).unwrap_err();
        match err {
            BookingError::SeatUnavailable(ids) => assert_eq!(ids, vec![seats[1].id, foreign.id]),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_seat_rejected() {
        let trip = Uuid::new_v4();
        let seats = trip_seats(trip, &["1"]);
        let result = SeatInventory::check_hold(trip, &[seats[0].id, seats[0].id], &seats);
        assert!(matches!(result, Err(BookingError::Validation(_))));
    }

    #[test]
    fn test_pick_free_uses_lowest_numbers() {
        let trip = Uuid::new_v4();
        let mut seats = trip_seats(trip, &["10A", "2A", "1B", "3C"]);
        seats[2].is_available = false;

        let picked = SeatInventory::pick_free(&seats, 2).unwrap();
        let numbers: Vec<&str> = picked.iter().map(|s| s.seat_number.as_str()).collect();
        assert_eq!(numbers, vec!["2A", "3C"]);
    }

    #[test]
    fn test_pick_free_insufficient() {
        let trip = Uuid::new_v4();
        let seats = trip_seats(trip, &["1", "2"]);
        let result = SeatInventory::pick_free(&seats, 3);
        assert!(matches!(
            result,
            Err(BookingError::InsufficientCapacity { requested: 3, available: 2 })
        ));
    }

    #[test]
    fn test_price_weights_default_to_neutral() {
        let trip = Uuid::new_v4();
        let mut seats = trip_seats(trip, &["1", "2"]);
        seats[1].price_factor_bps = Some(15_000);
        assert_eq!(SeatInventory::price_weights(&seats), vec![10_000, 15_000]);
    }
}
