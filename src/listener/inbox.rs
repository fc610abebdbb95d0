use async_trait::async_trait;
use log::{debug, info};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};

use crate::error::{Error, Result};
use crate::settings::BrokerSettings;

/// One message handed over by the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Source of broker deliveries, in per-connection order.
#[async_trait]
pub trait Inbox: Send {
    /// The next delivery, `None` once the source is exhausted.
    async fn next_delivery(&mut self) -> Result<Option<Delivery>>;
}

/// Subscription on the testbed broker.
///
/// A dropped connection ends the inbox with `Error::Transport`; restarting is
/// left to whoever supervises the process.
pub struct MqttInbox {
    // Dropping the client closes the request channel the event loop reads from.
    _client: AsyncClient,
    eventloop: EventLoop,
}

impl MqttInbox {
    pub async fn subscribe(settings: &BrokerSettings, filters: &[String]) -> Result<Self> {
        let mut options = MqttOptions::new(
            settings.listener_client_id.clone(),
            settings.host.clone(),
            settings.port,
        );
        options.set_keep_alive(settings.keep_alive());

        let (client, eventloop) = AsyncClient::new(options, filters.len().max(1) * 2);
        for filter in filters {
            client
                .subscribe(filter.as_str(), QoS::AtLeastOnce)
                .await
                .map_err(|err| Error::Transport(format!("subscribe {filter}: {err}")))?;
        }

        info!(
            "Subscribing to {} filter(s) on {}:{}",
            filters.len(),
            settings.host,
            settings.port
        );

        Ok(Self {
            _client: client,
            eventloop,
        })
    }
}

#[async_trait]
impl Inbox for MqttInbox {
    async fn next_delivery(&mut self) -> Result<Option<Delivery>> {
        loop {
            let event = self
                .eventloop
                .poll()
                .await
                .map_err(|err| Error::Transport(err.to_string()))?;

            match event {
                Event::Incoming(Packet::Publish(publish)) => {
                    return Ok(Some(Delivery {
                        topic: publish.topic,
                        payload: publish.payload.to_vec(),
                    }));
                }
                Event::Incoming(Packet::ConnAck(ack)) => {
                    info!("Connected to broker ({:?})", ack.code);
                }
                Event::Incoming(Packet::SubAck(ack)) => {
                    debug!("Subscription {} acknowledged", ack.pkid);
                }
                _ => {}
            }
        }
    }
}
