mod common;

use chrono::{Duration, Utc};
use coachline_booking::{
    BookingError, BookingStatus, CancelScope, CancellationScope, EntryType, FeeProration, PassengerStatus,
    PaymentStatus, ResolutionBasis,
};
use coachline_core::{Capability, PaymentMethod, PaymentRecord};
use coachline_shared::{BookingEvent, Money};
use common::Harness;

#[tokio::test]
async fn test_full_cancellation_refund_and_ledger() {
    let h = Harness::new(Duration::hours(40), 4).await;
    let booking = h.book(1, 500).await;
    h.service.mark_paid(&h.admin, booking.id, PaymentRecord::cash()).await.unwrap();

    let quote = h
        .service
        .preview_cancellation(&h.admin, booking.id, CancelScope::Whole)
        .await
        .unwrap();
    assert_eq!(quote.resolution.refund_percentage, 50);
    assert_eq!(quote.resolution.cancellation_fee, Money::from_minor(20));
    assert_eq!(quote.resolution.basis, ResolutionBasis::Rule);
    assert_eq!(quote.refund_amount, Money::from_minor(230));

    let cancellation = h
        .service
        .commit_cancellation(&h.admin, &quote, "customer request")
        .await
        .unwrap();
    assert_eq!(cancellation.scope, CancellationScope::Full);
    assert_eq!(cancellation.refund_amount, Money::from_minor(230));
    assert_eq!(cancellation.refund_method, Some(PaymentMethod::Cash));

    let stored = h.service.booking(booking.id).await.unwrap();
    assert_eq!(stored.status, BookingStatus::Cancelled);
    assert_eq!(stored.payment_status, PaymentStatus::Refunded);
    assert_eq!(stored.refunded_amount, Money::from_minor(230));
    assert!(h.seat_available(h.seats[0].id).await);

    assert_eq!(h.service.balance(booking.id).await.unwrap(), Money::ZERO);
    let ledger = h.service.ledger(booking.id).await.unwrap();
    let refund = ledger.iter().find(|(e, _)| e.entry_type == EntryType::Refund).unwrap();
    assert_eq!(refund.0.amount, Money::from_minor(-230));
    assert_eq!(h.service.cancellations(booking.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_partial_cancellation_inside_last_day() {
    let h = Harness::new(Duration::hours(10), 4).await;
    let booking = h.book(3, 300).await;
    h.service.mark_paid(&h.admin, booking.id, PaymentRecord::cash()).await.unwrap();

    let leaving = booking.passengers[0].id;
    let quote = h
        .service
        .preview_cancellation(&h.admin, booking.id, CancelScope::Passengers(vec![leaving]))
        .await
        .unwrap();
    assert_eq!(quote.refund_amount, Money::ZERO);
    h.service.commit_cancellation(&h.admin, &quote, "one traveller dropped").await.unwrap();

    let stored = h.service.booking(booking.id).await.unwrap();
    assert_eq!(stored.status, BookingStatus::Confirmed);
    assert_eq!(stored.payment_status, PaymentStatus::PartiallyRefunded);
    assert_eq!(stored.total_price, Money::from_minor(200));
    assert_eq!(stored.active_passengers().count(), 2);
    assert_eq!(stored.platform_commission + stored.partner_revenue, stored.total_price);

    assert!(h.seat_available(h.seats[0].id).await);
    assert!(!h.seat_available(h.seats[1].id).await);
    assert!(!h.seat_available(h.seats[2].id).await);
}

#[tokio::test]
async fn test_per_booking_fee_applies_after_unpaid_partial_cancel() {
    let h = Harness::without_policies(Duration::hours(40), 4).await;
    let mut policy = common::standard_policy();
    policy.fee_proration = FeeProration::PerBooking;
    h.service.save_policy(&h.admin, policy).await.unwrap();

    let booking = h.book(3, 300).await;
    let leaving = booking.passengers[0].id;
    let quote = h
        .service
        .preview_cancellation(&h.admin, booking.id, CancelScope::Passengers(vec![leaving]))
        .await
        .unwrap();
    assert!(!quote.paid);
    h.service.commit_cancellation(&h.admin, &quote, "before paying").await.unwrap();

    let paid = h.service.mark_paid(&h.admin, booking.id, PaymentRecord::cash()).await.unwrap();
    assert_eq!(paid.total_price, Money::from_minor(200));
    assert_eq!(paid.fee_headcount, 2);

    let quote = h
        .service
        .preview_cancellation(&h.admin, booking.id, CancelScope::Whole)
        .await
        .unwrap();
    assert_eq!(quote.cancellation_fee, Money::from_minor(20));
    assert_eq!(quote.refund_amount, Money::from_minor(80));

    let cancellation = h.service.commit_cancellation(&h.admin, &quote, "trip dropped").await.unwrap();
    assert_eq!(cancellation.cancellation_fee, Money::from_minor(20));
    assert_eq!(h.service.balance(booking.id).await.unwrap(), Money::ZERO);
}

#[tokio::test]
async fn test_double_payment_appends_one_charge() {
    let h = Harness::new(Duration::days(5), 2).await;
    let booking = h.book(1, 1000).await;
    let payment = PaymentRecord::with_reference(PaymentMethod::StcPay, "STC-889");

    let paid = h.service.mark_paid(&h.admin, booking.id, payment.clone()).await.unwrap();
    assert_eq!(paid.status, BookingStatus::Confirmed);

    let again = h.service.mark_paid(&h.admin, booking.id, payment).await;
    assert!(matches!(again, Err(BookingError::InvalidTransition { .. })));

    let ledger = h.service.ledger(booking.id).await.unwrap();
    let charges = ledger.iter().filter(|(e, _)| e.entry_type == EntryType::Booking).count();
    assert_eq!(charges, 1);
    assert_eq!(h.service.balance(booking.id).await.unwrap(), paid.partner_revenue);
}

#[tokio::test]
async fn test_stale_preview_is_rejected() {
    let h = Harness::new(Duration::days(5), 4).await;
    let booking = h.book(2, 400).await;
    h.service.mark_paid(&h.admin, booking.id, PaymentRecord::cash()).await.unwrap();

    let whole = h
        .service
        .preview_cancellation(&h.admin, booking.id, CancelScope::Whole)
        .await
        .unwrap();

    let one = h
        .service
        .preview_cancellation(&h.admin, booking.id, CancelScope::Passengers(vec![booking.passengers[1].id]))
        .await
        .unwrap();
    h.service.commit_cancellation(&h.admin, &one, "first").await.unwrap();

    let result = h.service.commit_cancellation(&h.admin, &whole, "second").await;
    assert!(matches!(result, Err(BookingError::StaleState(id)) if id == booking.id));
    assert_eq!(h.service.cancellations(booking.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_ledger_failure_rolls_back_payment() {
    let h = Harness::new(Duration::days(5), 2).await;
    let booking = h.book(1, 1000).await;

    h.store.fail_ledger_appends(true);
    let result = h.service.mark_paid(&h.admin, booking.id, PaymentRecord::cash()).await;
    assert!(matches!(result, Err(BookingError::Store(_))));

    let stored = h.service.booking(booking.id).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
    assert_eq!(stored.status, BookingStatus::Pending);
    assert_eq!(stored.version, booking.version);
    assert_eq!(h.store.ledger_len().await, 0);

    h.store.fail_ledger_appends(false);
    h.service.mark_paid(&h.admin, booking.id, PaymentRecord::cash()).await.unwrap();
}

#[tokio::test]
async fn test_missing_policy_surfaces() {
    let h = Harness::without_policies(Duration::days(5), 2).await;
    let booking = h.book(1, 1000).await;

    let result = h.service.preview_cancellation(&h.admin, booking.id, CancelScope::Whole).await;
    assert!(matches!(result, Err(BookingError::PolicyNotFound(_))));
}

#[tokio::test]
async fn test_unpaid_cancellation_refunds_nothing() {
    let h = Harness::new(Duration::days(5), 2).await;
    let booking = h.book(2, 600).await;

    let quote = h
        .service
        .preview_cancellation(&h.admin, booking.id, CancelScope::Whole)
        .await
        .unwrap();
    assert_eq!(quote.refund_amount, Money::ZERO);
    h.service.commit_cancellation(&h.admin, &quote, "changed mind").await.unwrap();

    let stored = h.service.booking(booking.id).await.unwrap();
    assert_eq!(stored.status, BookingStatus::Cancelled);
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
    assert!(h.service.ledger(booking.id).await.unwrap().is_empty());
    assert!(h.seat_available(h.seats[0].id).await);
    assert!(h.seat_available(h.seats[1].id).await);
}

#[tokio::test]
async fn test_authorization_is_scoped() {
    let h = Harness::new(Duration::days(5), 2).await;
    let booking = h.book(1, 1000).await;

    let cashier = h.staff(vec![Capability::ManagePayments]);
    let result = h.service.preview_cancellation(&cashier, booking.id, CancelScope::Whole).await;
    assert!(matches!(result, Err(BookingError::Unauthorized(_))));

    let outsider = coachline_core::Actor::partner_staff(
        uuid::Uuid::new_v4(),
        uuid::Uuid::new_v4(),
        vec![Capability::ManagePayments],
    );
    let result = h.service.mark_paid(&outsider, booking.id, PaymentRecord::cash()).await;
    assert!(matches!(result, Err(BookingError::Unauthorized(_))));

    let system = coachline_core::Actor::system();
    let result = h.service.confirm(&system, booking.id).await;
    assert!(matches!(result, Err(BookingError::Unauthorized(_))));

    h.service.mark_paid(&cashier, booking.id, PaymentRecord::cash()).await.unwrap();
}

#[tokio::test]
async fn test_expiry_sweep_releases_seats_once() {
    let h = Harness::new(Duration::days(5), 3).await;
    let lapsed = h.book(2, 400).await;
    let kept = h.book_seats(&h.seats[2..3], 200).await;
    h.service.confirm(&h.admin, kept.id).await.unwrap();

    let system = coachline_core::Actor::system();
    let later = Utc::now() + Duration::hours(1);
    let report = h.service.expire_due(&system, later).await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(report.released_seats, 2);

    let stored = h.service.booking(lapsed.id).await.unwrap();
    assert_eq!(stored.status, BookingStatus::Expired);
    assert!(stored.passengers.iter().all(|p| p.status == PassengerStatus::Cancelled));
    assert!(h.seat_available(h.seats[0].id).await);
    assert!(!h.seat_available(h.seats[2].id).await);

    let again = h.service.expire_due(&system, later).await.unwrap();
    assert!(again.is_idle());
    assert!(!h.service.expire(&system, lapsed.id, later).await.unwrap());
}

#[tokio::test]
async fn test_expire_and_confirm_race_losers() {
    let h = Harness::new(Duration::days(5), 2).await;
    let system = coachline_core::Actor::system();
    let later = Utc::now() + Duration::hours(1);

    let confirmed = h.book(1, 100).await;
    h.service.confirm(&h.admin, confirmed.id).await.unwrap();
    let result = h.service.expire(&system, confirmed.id, later).await;
    assert!(matches!(result, Err(BookingError::AlreadyConfirmed(_))));

    let expired = h.book_seats(&h.seats[1..2], 100).await;
    assert!(h.service.expire(&system, expired.id, later).await.unwrap());
    let result = h.service.confirm(&h.admin, expired.id).await;
    assert!(matches!(result, Err(BookingError::AlreadyExpired(_))));
}

#[tokio::test]
async fn test_payment_failure_and_completion() {
    let h = Harness::new(Duration::days(5), 2).await;

    let failing = h.book(1, 100).await;
    let failed = h.service.mark_payment_failed(&h.admin, failing.id).await.unwrap();
    assert_eq!(failed.payment_status, PaymentStatus::Failed);
    assert!(h.service.mark_paid(&h.admin, failing.id, PaymentRecord::cash()).await.is_err());

    let travelling = h.book_seats(&h.seats[1..2], 100).await;
    assert!(h.service.complete(&h.admin, travelling.id).await.is_err());
    h.service.mark_paid(&h.admin, travelling.id, PaymentRecord::cash()).await.unwrap();
    let done = h.service.complete(&h.admin, travelling.id).await.unwrap();
    assert_eq!(done.status, BookingStatus::Completed);
    assert!(h.service.mark_payment_failed(&h.admin, travelling.id).await.is_err());
}

#[tokio::test]
async fn test_events_follow_commits() {
    let h = Harness::new(Duration::days(5), 2).await;
    let mut events = h.service.subscribe();
    let booking = h.book(1, 1000).await;

    h.service
        .mark_paid(&h.admin, booking.id, PaymentRecord::with_reference(PaymentMethod::Card, "CARD-42"))
        .await
        .unwrap();

    let first = events.recv().await.unwrap();
    assert!(matches!(first, BookingEvent::Confirmed(_)));
    match events.recv().await.unwrap() {
        BookingEvent::Paid(paid) => {
            assert_eq!(paid.booking_id, booking.id);
            assert_eq!(paid.payment_method, "card");
        }
        other => panic!("unexpected event {:?}", other),
    }

    h.store.fail_ledger_appends(true);
    let _ = h.service.record_adjustment(&h.admin, booking.id, Money::from_minor(5), "fix").await;
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_adjustments_and_partner_statement() {
    let h = Harness::new(Duration::days(5), 2).await;
    let booking = h.book(1, 1000).await;
    h.service.mark_paid(&h.admin, booking.id, PaymentRecord::cash()).await.unwrap();

    let entry = h
        .service
        .record_adjustment(&h.admin, booking.id, Money::from_minor(-25), "goodwill voucher")
        .await
        .unwrap();
    assert_eq!(entry.entry_type, EntryType::Adjustment);
    assert!(entry.sequence > 0);

    assert!(matches!(
        h.service.record_adjustment(&h.admin, booking.id, Money::ZERO, "noop").await,
        Err(BookingError::Validation(_))
    ));

    let statement = h
        .service
        .partner_statement(&h.admin, h.partner_id, None, None)
        .await
        .unwrap();
    assert_eq!(statement.bookings, Money::from_minor(1000));
    assert_eq!(statement.commissions, Money::from_minor(-100));
    assert_eq!(statement.adjustments, Money::from_minor(-25));
    assert_eq!(statement.net, Money::from_minor(875));
    assert_eq!(statement.booking_count, 1);
}
