use chrono::{DateTime, Utc};
use coachline_booking::{BookingResult, BookingService, SweepReport};
use coachline_core::Actor;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// One pass over the lapsed holds, on behalf of the system actor
pub async fn sweep_once(service: &BookingService, now: DateTime<Utc>) -> BookingResult<SweepReport> {
    let report = service.expire_due(&Actor::system(), now).await?;
    if report.is_idle() {
        debug!("Expiry sweep found nothing to do");
    } else if report.failed > 0 {
        warn!("Expiry sweep left {} bookings unexpired after errors", report.failed);
    }
    Ok(report)
}

/// Sweep on a fixed interval forever. A failed pass is logged and retried on the next tick.
pub async fn run_sweeper(service: Arc<BookingService>, every: Duration) {
    info!("Expiry sweeper started, interval {:?}", every);
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if let Err(e) = sweep_once(&service, Utc::now()).await {
            error!("Expiry sweep failed: {}", e);
        }
    }
}
