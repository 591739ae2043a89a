use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coachline_booking::{
    Booking, BookingCancellation, BookingStore, CancelPolicy, Changeset, CommitReceipt, FeeProration, LedgerEntry,
    Seat, SeatClaim, StoreError,
};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::rows::{backend, BookingRow, CancellationRow, LedgerRow, PassengerRow, PolicyRow, RuleRow, SeatRow};

const BOOKING_COLUMNS: &str = "id, trip_id, user_id, partner_id, status, payment_status, payment_method, \
     payment_reference, total_price, original_total, platform_commission, original_commission, partner_revenue, \
     refunded_amount, outstanding_fee, fee_headcount, fee_assessed, cancel_policy_id, expires_at, version, \
     created_at, updated_at, paid_at, cancelled_at";

const PASSENGER_COLUMNS: &str =
    "id, booking_id, trip_id, seat_id, full_name, allocated_price, passenger_status, cancellation_id, cancelled_at";

const SEAT_COLUMNS: &str = "id, trip_id, seat_number, is_available, price_factor_bps";

const POLICY_COLUMNS: &str =
    "id, partner_id, name, refund_percentage, days_before_trip, priority, is_default, is_active, fee_proration";

const RULE_COLUMNS: &str = "id, policy_id, min_hours_before_departure, max_hours_before_departure, \
     refund_percentage, cancellation_fee, display_order, is_active";

const LEDGER_COLUMNS: &str = "ledger_id, sequence, entry_type, amount, booking_id, partner_id, created_at, note";

const CANCELLATION_COLUMNS: &str = "id, booking_id, passenger_ids, scope, policy_id, rule_id, basis, \
     refund_percentage, cancellation_fee, refund_amount, commission_reversed, fee_retained, hours_before_departure, \
     reason, cancelled_by, refund_method, created_at";

pub struct PgBookingStore {
    pool: PgPool,
    default_fee_proration: FeeProration,
}

impl PgBookingStore {
    pub fn new(pool: PgPool, default_fee_proration: FeeProration) -> Self {
        Self { pool, default_fee_proration }
    }

    async fn load_policies(&self, rows: Vec<PolicyRow>) -> Result<Vec<CancelPolicy>, StoreError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let rules: Vec<RuleRow> = sqlx::query_as(&format!(
            "SELECT {} FROM cancel_policy_rules WHERE policy_id = ANY($1) ORDER BY display_order",
            RULE_COLUMNS
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter()
            .map(|row| row.into_policy(&rules, self.default_fee_proration))
            .collect()
    }
}

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn booking(&self, booking_id: Uuid) -> Result<Option<Booking>, StoreError> {
        let row: Option<BookingRow> = sqlx::query_as(&format!("SELECT {} FROM bookings WHERE id = $1", BOOKING_COLUMNS))
            .bind(booking_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let passengers: Vec<PassengerRow> = sqlx::query_as(&format!(
            "SELECT {} FROM passengers WHERE booking_id = $1 ORDER BY position",
            PASSENGER_COLUMNS
        ))
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        row.into_booking(passengers).map(Some)
    }

    async fn pending_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Uuid>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM bookings WHERE status = 'pending' AND expires_at <= $1 ORDER BY expires_at LIMIT $2",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn seats_for_trip(&self, trip_id: Uuid) -> Result<Vec<Seat>, StoreError> {
        let rows: Vec<SeatRow> = sqlx::query_as(&format!("SELECT {} FROM seats WHERE trip_id = $1", SEAT_COLUMNS))
            .bind(trip_id)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        rows.into_iter().map(SeatRow::into_seat).collect()
    }

    async fn seats(&self, seat_ids: &[Uuid]) -> Result<Vec<Seat>, StoreError> {
        let rows: Vec<SeatRow> = sqlx::query_as(&format!("SELECT {} FROM seats WHERE id = ANY($1)", SEAT_COLUMNS))
            .bind(seat_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        rows.into_iter().map(SeatRow::into_seat).collect()
    }

    async fn insert_seats(&self, seats: &[Seat]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        for seat in seats {
            sqlx::query(
                r#"
                INSERT INTO seats (id, trip_id, seat_number, is_available, price_factor_bps)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(seat.id)
            .bind(seat.trip_id)
            .bind(&seat.seat_number)
            .bind(seat.is_available)
            .bind(seat.price_factor_bps.and_then(|f| i32::try_from(f).ok()))
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }
        tx.commit().await.map_err(backend)
    }

    async fn cancel_policy(&self, policy_id: Uuid) -> Result<Option<CancelPolicy>, StoreError> {
        let rows: Vec<PolicyRow> = sqlx::query_as(&format!("SELECT {} FROM cancel_policies WHERE id = $1", POLICY_COLUMNS))
            .bind(policy_id)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        Ok(self.load_policies(rows).await?.into_iter().next())
    }

    async fn default_policies(&self, partner_id: Uuid) -> Result<Vec<CancelPolicy>, StoreError> {
        let rows: Vec<PolicyRow> = sqlx::query_as(&format!(
            "SELECT {} FROM cancel_policies \
             WHERE is_active AND is_default AND (partner_id IS NULL OR partner_id = $1)",
            POLICY_COLUMNS
        ))
        .bind(partner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        self.load_policies(rows).await
    }

    async fn save_policy(&self, policy: &CancelPolicy) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query(
            r#"
            INSERT INTO cancel_policies
                (id, partner_id, name, refund_percentage, days_before_trip, priority, is_default, is_active, fee_proration)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                partner_id = EXCLUDED.partner_id,
                name = EXCLUDED.name,
                refund_percentage = EXCLUDED.refund_percentage,
                days_before_trip = EXCLUDED.days_before_trip,
                priority = EXCLUDED.priority,
                is_default = EXCLUDED.is_default,
                is_active = EXCLUDED.is_active,
                fee_proration = EXCLUDED.fee_proration,
                updated_at = NOW()
            "#,
        )
        .bind(policy.id)
        .bind(policy.partner_id)
        .bind(&policy.name)
        .bind(policy.refund_percentage.map(i16::from))
        .bind(policy.days_before_trip.and_then(|d| i32::try_from(d).ok()))
        .bind(policy.priority)
        .bind(policy.is_default)
        .bind(policy.is_active)
        .bind(policy.fee_proration.as_str())
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        // Rules are owned by the policy and replaced wholesale
        sqlx::query("DELETE FROM cancel_policy_rules WHERE policy_id = $1")
            .bind(policy.id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        for rule in &policy.rules {
            sqlx::query(
                r#"
                INSERT INTO cancel_policy_rules
                    (id, policy_id, min_hours_before_departure, max_hours_before_departure,
                     refund_percentage, cancellation_fee, display_order, is_active)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(rule.id)
            .bind(policy.id)
            .bind(rule.min_hours_before_departure)
            .bind(rule.max_hours_before_departure)
            .bind(i16::from(rule.refund_percentage))
            .bind(rule.cancellation_fee.minor())
            .bind(rule.display_order)
            .bind(rule.is_active)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)
    }

    async fn ledger_for_booking(&self, booking_id: Uuid) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows: Vec<LedgerRow> = sqlx::query_as(&format!(
            "SELECT {} FROM booking_ledger WHERE booking_id = $1 ORDER BY sequence",
            LEDGER_COLUMNS
        ))
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(LedgerRow::into_entry).collect()
    }

    async fn ledger_for_partner(
        &self,
        partner_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows: Vec<LedgerRow> = sqlx::query_as(&format!(
            "SELECT {} FROM booking_ledger \
             WHERE partner_id = $1 \
               AND ($2::timestamptz IS NULL OR created_at >= $2) \
               AND ($3::timestamptz IS NULL OR created_at < $3) \
             ORDER BY sequence",
            LEDGER_COLUMNS
        ))
        .bind(partner_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(LedgerRow::into_entry).collect()
    }

    async fn cancellations(&self, booking_id: Uuid) -> Result<Vec<BookingCancellation>, StoreError> {
        let rows: Vec<CancellationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM booking_cancellations WHERE booking_id = $1 ORDER BY created_at",
            CANCELLATION_COLUMNS
        ))
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(CancellationRow::into_cancellation).collect()
    }

    async fn commit(&self, changes: Changeset) -> Result<CommitReceipt, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let mut receipt = CommitReceipt::default();

        // Row locks in id order so two commits over the same bookings cannot deadlock
        let ids: Vec<Uuid> = changes.bookings.iter().map(|b| b.id).collect();
        if !ids.is_empty() {
            sqlx::query("SELECT id FROM bookings WHERE id = ANY($1) ORDER BY id FOR UPDATE")
                .bind(&ids)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        for booking in &changes.bookings {
            let version = write_booking(&mut tx, booking).await?;
            write_passengers(&mut tx, booking).await?;
            receipt.versions.push((booking.id, version));
        }

        if !changes.seat_releases.is_empty() {
            sqlx::query("UPDATE seats SET is_available = TRUE WHERE id = ANY($1)")
                .bind(&changes.seat_releases)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        claim_seats(&mut tx, &changes.seat_claims).await?;

        for cancellation in &changes.cancellations {
            write_cancellation(&mut tx, cancellation).await?;
        }

        for entry in &changes.ledger {
            let (sequence,): (i64,) = sqlx::query_as(
                r#"
                INSERT INTO booking_ledger (ledger_id, entry_type, amount, booking_id, partner_id, created_at, note)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING sequence
                "#,
            )
            .bind(entry.id)
            .bind(entry.entry_type.as_str())
            .bind(entry.amount.minor())
            .bind(entry.booking_id)
            .bind(entry.partner_id)
            .bind(entry.created_at)
            .bind(entry.note.as_deref())
            .fetch_one(&mut *tx)
            .await
            .map_err(backend)?;
            receipt.ledger_sequences.push(sequence);
        }

        tx.commit().await.map_err(backend)?;
        debug!(
            "Committed {} bookings, {} ledger entries",
            receipt.versions.len(),
            receipt.ledger_sequences.len()
        );
        Ok(receipt)
    }
}

/// Insert at version 0, otherwise a guarded update. Returns the stored version.
async fn write_booking(tx: &mut Transaction<'_, Postgres>, booking: &Booking) -> Result<i64, StoreError> {
    let payment_reference = booking.payment_reference.as_ref().map(|r| r.expose().as_str());
    let payment_method = booking.payment_method.map(|m| m.as_str());
    let fee_headcount = i32::try_from(booking.fee_headcount)
        .map_err(|_| StoreError::Backend(format!("fee headcount {} out of range", booking.fee_headcount)))?;

    if booking.version == 0 {
        let inserted = sqlx::query(
            r#"
            INSERT INTO bookings
                (id, trip_id, user_id, partner_id, status, payment_status, payment_method, payment_reference,
                 total_price, original_total, platform_commission, original_commission, partner_revenue,
                 refunded_amount, outstanding_fee, fee_headcount, fee_assessed, cancel_policy_id, expires_at, version,
                 created_at, updated_at, paid_at, cancelled_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, 1,
                    $20, $21, $22, $23)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(booking.id)
        .bind(booking.trip_id)
        .bind(booking.user_id)
        .bind(booking.partner_id)
        .bind(booking.status.as_str())
        .bind(booking.payment_status.as_str())
        .bind(payment_method)
        .bind(payment_reference)
        .bind(booking.total_price.minor())
        .bind(booking.original_total.minor())
        .bind(booking.platform_commission.minor())
        .bind(booking.original_commission.minor())
        .bind(booking.partner_revenue.minor())
        .bind(booking.refunded_amount.minor())
        .bind(booking.outstanding_fee.minor())
        .bind(fee_headcount)
        .bind(booking.fee_assessed)
        .bind(booking.cancel_policy_id)
        .bind(booking.expires_at)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .bind(booking.paid_at)
        .bind(booking.cancelled_at)
        .execute(&mut **tx)
        .await
        .map_err(backend)?;

        if inserted.rows_affected() == 0 {
            return Err(StoreError::VersionConflict(booking.id));
        }
        return Ok(1);
    }

    let updated: Option<(i64,)> = sqlx::query_as(
        r#"
        UPDATE bookings SET
            trip_id = $3, status = $4, payment_status = $5, payment_method = $6, payment_reference = $7,
            total_price = $8, platform_commission = $9, partner_revenue = $10, refunded_amount = $11,
            outstanding_fee = $12, fee_headcount = $13, fee_assessed = $14, expires_at = $15, updated_at = $16,
            paid_at = $17, cancelled_at = $18, version = version + 1
        WHERE id = $1 AND version = $2
        RETURNING version
        "#,
    )
    .bind(booking.id)
    .bind(booking.version)
    .bind(booking.trip_id)
    .bind(booking.status.as_str())
    .bind(booking.payment_status.as_str())
    .bind(payment_method)
    .bind(payment_reference)
    .bind(booking.total_price.minor())
    .bind(booking.platform_commission.minor())
    .bind(booking.partner_revenue.minor())
    .bind(booking.refunded_amount.minor())
    .bind(booking.outstanding_fee.minor())
    .bind(fee_headcount)
    .bind(booking.fee_assessed)
    .bind(booking.expires_at)
    .bind(booking.updated_at)
    .bind(booking.paid_at)
    .bind(booking.cancelled_at)
    .fetch_optional(&mut **tx)
    .await
    .map_err(backend)?;

    if let Some((version,)) = updated {
        return Ok(version);
    }

    let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM bookings WHERE id = $1")
        .bind(booking.id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(backend)?;

    match exists {
        Some(_) => Err(StoreError::VersionConflict(booking.id)),
        None => Err(StoreError::NotFound(format!("booking {}", booking.id))),
    }
}

async fn write_passengers(tx: &mut Transaction<'_, Postgres>, booking: &Booking) -> Result<(), StoreError> {
    for (position, passenger) in booking.passengers.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO passengers
                (id, booking_id, trip_id, seat_id, full_name, allocated_price, passenger_status,
                 cancellation_id, cancelled_at, position)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                booking_id = EXCLUDED.booking_id,
                trip_id = EXCLUDED.trip_id,
                seat_id = EXCLUDED.seat_id,
                allocated_price = EXCLUDED.allocated_price,
                passenger_status = EXCLUDED.passenger_status,
                cancellation_id = EXCLUDED.cancellation_id,
                cancelled_at = EXCLUDED.cancelled_at,
                position = EXCLUDED.position
            "#,
        )
        .bind(passenger.id)
        .bind(booking.id)
        .bind(passenger.trip_id)
        .bind(passenger.seat_id)
        .bind(&passenger.full_name)
        .bind(passenger.allocated_price.minor())
        .bind(passenger.status.as_str())
        .bind(passenger.cancellation_id)
        .bind(passenger.cancelled_at)
        .bind(i32::try_from(position).unwrap_or(i32::MAX))
        .execute(&mut **tx)
        .await
        .map_err(backend)?;
    }
    Ok(())
}

/// Take every claimed seat or fail the whole transaction
async fn claim_seats(tx: &mut Transaction<'_, Postgres>, claims: &[SeatClaim]) -> Result<(), StoreError> {
    let mut by_trip: BTreeMap<Uuid, Vec<Uuid>> = BTreeMap::new();
    for claim in claims {
        by_trip.entry(claim.trip_id).or_default().push(claim.seat_id);
    }

    let mut missing = Vec::new();
    for (trip_id, seat_ids) in by_trip {
        let taken: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE seats SET is_available = FALSE
            WHERE trip_id = $1 AND id = ANY($2) AND is_available
            RETURNING id
            "#,
        )
        .bind(trip_id)
        .bind(&seat_ids)
        .fetch_all(&mut **tx)
        .await
        .map_err(backend)?;

        missing.extend(seat_ids.into_iter().filter(|id| !taken.iter().any(|(t,)| t == id)));
    }

    if missing.is_empty() {
        Ok(())
    } else {
        missing.sort();
        warn!("Seat claim lost for {:?}", missing);
        Err(StoreError::SeatUnavailable(missing))
    }
}

async fn write_cancellation(
    tx: &mut Transaction<'_, Postgres>,
    cancellation: &BookingCancellation,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO booking_cancellations
            (id, booking_id, passenger_ids, scope, policy_id, rule_id, basis, refund_percentage,
             cancellation_fee, refund_amount, commission_reversed, fee_retained, hours_before_departure,
             reason, cancelled_by, refund_method, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        "#,
    )
    .bind(cancellation.id)
    .bind(cancellation.booking_id)
    .bind(&cancellation.passenger_ids)
    .bind(cancellation.scope.as_str())
    .bind(cancellation.policy_id)
    .bind(cancellation.rule_id)
    .bind(cancellation.basis.as_str())
    .bind(i16::from(cancellation.refund_percentage))
    .bind(cancellation.cancellation_fee.minor())
    .bind(cancellation.refund_amount.minor())
    .bind(cancellation.commission_reversed.minor())
    .bind(cancellation.fee_retained.minor())
    .bind(cancellation.hours_before_departure)
    .bind(&cancellation.reason)
    .bind(cancellation.cancelled_by)
    .bind(cancellation.refund_method.map(|m| m.as_str()))
    .bind(cancellation.created_at)
    .execute(&mut **tx)
    .await
    .map_err(backend)?;
    Ok(())
}
