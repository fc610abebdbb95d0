mod inbox;

pub use inbox::{Delivery, Inbox, MqttInbox};

use chrono::Utc;
use log::{debug, error, info};
use tokio_util::sync::CancellationToken;

use crate::db::Database;
use crate::error::{Error, Result};

/// Copies every broker delivery into the message store, untouched.
pub struct Listener {
    db: Database,
}

impl Listener {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store one delivery with the local receive time and return its row id.
    pub async fn store(&self, delivery: &Delivery) -> Result<i64> {
        let payload = String::from_utf8_lossy(&delivery.payload);
        debug!("Received message on {}: {}", delivery.topic, payload);

        self.db
            .append_message(&delivery.topic, &payload, Utc::now())
            .await
            .map_err(Error::Persistence)
    }

    /// Receive and store until the inbox ends, fails, or `cancel` fires.
    ///
    /// Returns how many messages were stored. Deliveries are handled one at a
    /// time in arrival order.
    pub async fn run<I: Inbox>(&self, inbox: &mut I, cancel: CancellationToken) -> Result<u64> {
        let mut stored = 0u64;

        loop {
            let delivery = tokio::select! {
                next = inbox.next_delivery() => next,
                _ = cancel.cancelled() => {
                    info!("Listener shutting down after {stored} message(s)");
                    return Ok(stored);
                }
            };

            match delivery {
                Ok(Some(delivery)) => {
                    self.store(&delivery).await?;
                    stored += 1;
                }
                Ok(None) => {
                    info!("Inbox closed after {stored} message(s)");
                    return Ok(stored);
                }
                Err(err) => {
                    error!("Listener stopped: {err}");
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;

    struct ScriptedInbox {
        deliveries: VecDeque<Result<Delivery>>,
    }

    #[async_trait]
    impl Inbox for ScriptedInbox {
        async fn next_delivery(&mut self) -> Result<Option<Delivery>> {
            self.deliveries.pop_front().transpose()
        }
    }

    fn delivery(topic: &str, payload: &[u8]) -> Result<Delivery> {
        Ok(Delivery {
            topic: topic.into(),
            payload: payload.to_vec(),
        })
    }

    #[tokio::test]
    async fn stores_payloads_verbatim() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("telemetry.db")).unwrap();
        let listener = Listener::new(db.clone());

        let mut inbox = ScriptedInbox {
            deliveries: VecDeque::from(vec![
                delivery("calibration/results", br#"{"amplitude": 0.5}"#),
                delivery("usrp/state", b"not json"),
                delivery("otac/round", &[0x66, 0x6f, 0xff]),
            ]),
        };

        let stored = listener
            .run(&mut inbox, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(stored, 3);

        let usrp = db.fetch_unprocessed("usrp/state").await.unwrap();
        assert_eq!(usrp[0].payload, "not json");

        let otac = db.fetch_unprocessed("otac/#").await.unwrap();
        assert_eq!(otac[0].payload, "fo\u{FFFD}");
    }

    #[tokio::test]
    async fn transport_failure_ends_the_loop() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("telemetry.db")).unwrap();
        let listener = Listener::new(db.clone());

        let mut inbox = ScriptedInbox {
            deliveries: VecDeque::from(vec![
                delivery("control/start", b"1"),
                Err(Error::Transport("connection reset".into())),
                delivery("control/stop", b"1"),
            ]),
        };

        let result = listener.run(&mut inbox, CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(db.count_messages().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_a_waiting_listener() {
        struct SilentInbox;

        #[async_trait]
        impl Inbox for SilentInbox {
            async fn next_delivery(&mut self) -> Result<Option<Delivery>> {
                std::future::pending().await
            }
        }

        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("telemetry.db")).unwrap();
        let listener = Listener::new(db);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let stored = listener.run(&mut SilentInbox, cancel).await.unwrap();
        assert_eq!(stored, 0);
    }
}
