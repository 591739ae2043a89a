use coachline_shared::BookingEvent;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

/// Forward engine events to the log until the service is dropped
pub async fn log_events(mut rx: broadcast::Receiver<BookingEvent>) -> usize {
    let mut seen = 0;
    loop {
        match rx.recv().await {
            Ok(event) => {
                seen += 1;
                let payload = serde_json::to_string(&event).unwrap_or_default();
                info!(kind = event.kind(), booking_id = %event.booking_id(), "{}", payload);
            }
            Err(RecvError::Lagged(missed)) => warn!("Event log fell behind, {} events dropped", missed),
            Err(RecvError::Closed) => break,
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use coachline_shared::models::events::BookingExpiredEvent;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_logger_drains_until_closed() {
        let (tx, rx) = broadcast::channel(8);
        let logger = tokio::spawn(log_events(rx));

        for _ in 0..3 {
            tx.send(BookingEvent::Expired(BookingExpiredEvent {
                booking_id: Uuid::new_v4(),
                released_seats: vec![],
                timestamp: 0,
            }))
            .unwrap();
        }
        drop(tx);

        assert_eq!(logger.await.unwrap(), 3);
    }
}
