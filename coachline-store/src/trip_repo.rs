use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coachline_core::{CoreError, CoreResult, TripDirectory, TripInfo};
use sqlx::PgPool;
use uuid::Uuid;

/// Trip data read from the shared `trips` table, which the scheduling side owns
pub struct PgTripDirectory {
    pub pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct TripRow {
    id: Uuid,
    partner_id: Uuid,
    departure_at: DateTime<Utc>,
    capacity: i32,
}

impl PgTripDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TripDirectory for PgTripDirectory {
    async fn trip(&self, trip_id: Uuid) -> CoreResult<Option<TripInfo>> {
        let row: Option<TripRow> =
            sqlx::query_as("SELECT id, partner_id, departure_at, capacity FROM trips WHERE id = $1")
                .bind(trip_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| CoreError::Unavailable(format!("trip lookup failed: {}", e)))?;

        row.map(|r| {
            Ok(TripInfo {
                id: r.id,
                partner_id: r.partner_id,
                departure_at: r.departure_at,
                capacity: u32::try_from(r.capacity)
                    .map_err(|_| CoreError::InternalError(format!("trip {} has negative capacity", r.id)))?,
            })
        })
        .transpose()
    }
}
