//! Pure routing of rumqttc events
//!
//! Translates raw event loop output into the handful of cases the client
//! acts on. Topic-level dispatch of application messages happens later, in
//! [`crate::router`].

use rumqttc::v5::mqttbytes::v5::SubscribeReasonCode;
use rumqttc::v5::Event;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => {
                use rumqttc::v5::mqttbytes::v5::Packet;
                match incoming {
                    Packet::ConnAck(connack) => EventRoute::ConnectionAcknowledged {
                        session_present: connack.session_present,
                    },
                    Packet::Publish(publish) => EventRoute::MessageReceived {
                        topic: String::from_utf8_lossy(&publish.topic).to_string(),
                        payload: publish.payload.to_vec(),
                    },
                    Packet::Disconnect(_) => EventRoute::Disconnected,
                    Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                        packet_id: suback.pkid,
                        refused: suback
                            .return_codes
                            .iter()
                            .copied()
                            .filter(|code| !matches!(code, SubscribeReasonCode::Success(_)))
                            .collect(),
                    },
                    other => EventRoute::InfrastructureEvent(format!("{other:?}")),
                }
            }
            Event::Outgoing(rumqttc::Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged { session_present: bool },
    /// Message received on subscribed topic
    MessageReceived { topic: String, payload: Vec<u8> },
    /// MQTT broker disconnected
    Disconnected,
    /// Broker answered a SUBSCRIBE; `refused` holds every non-success reason code
    SubscriptionConfirmed {
        packet_id: u16,
        refused: Vec<SubscribeReasonCode>,
    },
    /// Our own DISCONNECT left the client - the session is over
    DisconnectSent,
    /// Infrastructure event (PingResp, PubAck, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}
