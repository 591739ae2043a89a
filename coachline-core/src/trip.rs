use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::{CoreError, CoreResult};

/// What the engine needs to know about a scheduled trip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TripInfo {
    pub id: Uuid,
    pub partner_id: Uuid,
    pub departure_at: DateTime<Utc>,
    pub capacity: u32,
}

/// Read-only access to trip/route data owned elsewhere
#[async_trait]
pub trait TripDirectory: Send + Sync {
    async fn trip(&self, trip_id: Uuid) -> CoreResult<Option<TripInfo>>;
}

/// Fixed set of trips, for tests and embedders that load schedules up front.
#[derive(Default)]
pub struct StaticTripDirectory {
    trips: RwLock<HashMap<Uuid, TripInfo>>,
}

impl StaticTripDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, trip: TripInfo) {
        if let Ok(mut trips) = self.trips.write() {
            trips.insert(trip.id, trip);
        }
    }
}

#[async_trait]
impl TripDirectory for StaticTripDirectory {
    async fn trip(&self, trip_id: Uuid) -> CoreResult<Option<TripInfo>> {
        let trips = self
            .trips
            .read()
            .map_err(|_| CoreError::InternalError("trip directory lock poisoned".to_string()))?;
        Ok(trips.get(&trip_id).cloned())
    }
}
