use std::time::Duration;

use async_trait::async_trait;
use log::{error, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::settings::BrokerSettings;

/// A message the aggregator wants on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishEvent {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

/// Broker-side publishing seam.
#[async_trait]
pub trait Publish: Send {
    async fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> Result<()>;
}

/// QoS 1 publisher that waits for the broker's acknowledgement of every message.
pub struct MqttPublisher {
    client: AsyncClient,
    eventloop: EventLoop,
    ack_timeout: Duration,
}

impl MqttPublisher {
    pub fn connect(settings: &BrokerSettings) -> Self {
        let mut options = MqttOptions::new(
            settings.publisher_client_id.clone(),
            settings.host.clone(),
            settings.port,
        );
        options.set_keep_alive(settings.keep_alive());

        let (client, eventloop) = AsyncClient::new(options, 16);
        Self {
            client,
            eventloop,
            ack_timeout: settings.publish_timeout(),
        }
    }

    /// Drive the event loop until the broker acknowledges our next publish.
    async fn await_ack(&mut self, topic: &str) -> Result<()> {
        let mut pkid = None;
        loop {
            let event = self.eventloop.poll().await.map_err(|err| Error::Publish {
                topic: topic.to_string(),
                reason: err.to_string(),
            })?;

            match event {
                Event::Outgoing(Outgoing::Publish(id)) => pkid = Some(id),
                Event::Incoming(Packet::PubAck(ack)) if Some(ack.pkid) == pkid => return Ok(()),
                _ => {}
            }
        }
    }

    pub async fn close(mut self) {
        if let Err(err) = self.client.disconnect().await {
            warn!("Failed to request broker disconnect: {err}");
            return;
        }
        // Flush the DISCONNECT packet; the loop errors out once the socket closes.
        let drain = async {
            while let Ok(event) = self.eventloop.poll().await {
                if let Event::Outgoing(Outgoing::Disconnect) = event {
                    break;
                }
            }
        };
        let _ = tokio::time::timeout(self.ack_timeout, drain).await;
    }
}

#[async_trait]
impl Publish for MqttPublisher {
    async fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> Result<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload.as_bytes().to_vec())
            .await
            .map_err(|err| Error::Publish {
                topic: topic.to_string(),
                reason: err.to_string(),
            })?;

        match tokio::time::timeout(self.ack_timeout, self.await_ack(topic)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Publish {
                topic: topic.to_string(),
                reason: format!("no acknowledgement within {:?}", self.ack_timeout),
            }),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishSummary {
    pub sent: usize,
    pub failed: usize,
}

/// Pushes aggregation results to the broker, one independent publish per event.
pub struct ResultPublisher<P> {
    sink: P,
}

impl<P: Publish> ResultPublisher<P> {
    pub fn new(sink: P) -> Self {
        Self { sink }
    }

    /// Publish every event; a failure is logged and does not stop the rest.
    pub async fn publish_all(&mut self, events: &[PublishEvent]) -> PublishSummary {
        let mut summary = PublishSummary::default();
        for event in events {
            match self
                .sink
                .publish(&event.topic, &event.payload, event.retain)
                .await
            {
                Ok(()) => {
                    info!("Published calibration result to {}", event.topic);
                    summary.sent += 1;
                }
                Err(err) => {
                    error!("{err}");
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    pub fn into_inner(self) -> P {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingBroker {
        retained: Vec<(String, String)>,
        reject: Option<String>,
    }

    #[async_trait]
    impl Publish for RecordingBroker {
        async fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> Result<()> {
            if self.reject.as_deref() == Some(topic) {
                return Err(Error::Publish {
                    topic: topic.into(),
                    reason: "rc 4".into(),
                });
            }
            assert!(retain);
            self.retained.push((topic.into(), payload.into()));
            Ok(())
        }
    }

    fn event(topic: &str) -> PublishEvent {
        PublishEvent {
            topic: topic.into(),
            payload: "{}".into(),
            retain: true,
        }
    }

    #[tokio::test]
    async fn one_failure_does_not_block_the_rest() {
        let broker = RecordingBroker {
            reject: Some("calibration/ratio/32A/32C".into()),
            ..RecordingBroker::default()
        };
        let mut publisher = ResultPublisher::new(broker);

        let summary = publisher
            .publish_all(&[
                event("calibration/ratio/32A/32B"),
                event("calibration/ratio/32A/32C"),
                event("calibration/ratio/32A/32D"),
            ])
            .await;

        assert_eq!(summary, PublishSummary { sent: 2, failed: 1 });
        let broker = publisher.into_inner();
        let topics: Vec<_> = broker.retained.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(
            topics,
            vec!["calibration/ratio/32A/32B", "calibration/ratio/32A/32D"]
        );
    }

    #[tokio::test]
    async fn nothing_to_publish() {
        let mut publisher = ResultPublisher::new(RecordingBroker::default());
        assert_eq!(publisher.publish_all(&[]).await, PublishSummary::default());
    }
}
