//! MQTT client for the device session
//!
//! The client separates pure functions from I/O operations for testability.
//!
//! # Architecture
//!
//! - [`connection`] - Pure connection state management and configuration
//! - [`message_handler`] - Pure routing of rumqttc events
//! - [`session`] - Pure session state and retry decisions
//! - [`client`] - Impure I/O operations and coordination
//!
//! # Usage
//!
//! ```rust,no_run
//! use shadow_agent::config::MqttSection;
//! use shadow_agent::transport::mqtt::MqttClient;
//! use shadow_agent::transport::QoS;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let config = MqttSection {
//!     broker_url: "mqtt://localhost:1883".to_string(),
//!     ca_path: None,
//!     cert_path: None,
//!     key_path: None,
//!     username_env: None,
//!     password_env: None,
//!     keep_alive_secs: 6,
//!     clean_session: false,
//!     last_will: false,
//!     max_reconnect_attempts: None,
//! };
//!
//! let mut client = MqttClient::new("sensor-01", &config)?;
//! client.connect().await?;
//! client.subscribe("$shadow/sensor-01/update/delta", QoS::AtLeastOnce).await?;
//! client.wait_for_subscriptions(Duration::from_secs(2)).await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;
pub mod session;

pub use client::MqttClient;
pub use connection::{
    configure_mqtt_options, last_will_payload, ConnectionState, MqttError, ReconnectConfig,
};
pub use message_handler::{EventRoute, MessageHandler};
pub use session::{RetryPlan, SessionEvent};
