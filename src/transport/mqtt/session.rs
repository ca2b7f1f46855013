//! Session policy for the device connection
//!
//! Pure decisions the event loop task takes after every session event: which
//! [`ConnectionState`] follows, whether to wait and retry after a drop, and
//! when to give up. Giving up leaves the session `PermanentlyDisconnected`,
//! which the binary watches for to exit.

use super::connection::{ConnectionState, ReconnectConfig};
use std::time::Duration;
use tracing::{error, info, warn};

/// Slack on top of the whole backoff schedule before `connect` stops waiting
const CONNACK_GRACE: Duration = Duration::from_secs(30);

/// `connect` wait when retries are unlimited
const UNBOUNDED_CONNACK_WAIT: Duration = Duration::from_secs(60);

/// Something that happened to the session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The broker acknowledged the connection
    Established,
    /// The broker sent DISCONNECT
    BrokerClosed,
    /// Polling the event loop failed
    NetworkFailure(String),
    /// A retry was scheduled (1-based attempt)
    RetryScheduled(u32),
    /// No retries left
    GaveUp(String),
}

impl SessionEvent {
    /// State the session is in once this event happened
    pub fn into_state(self) -> ConnectionState {
        match self {
            SessionEvent::Established => {
                info!("Device session established");
                ConnectionState::Connected
            }
            SessionEvent::BrokerClosed => {
                warn!("Broker closed the device session");
                ConnectionState::Disconnected("Broker disconnected".to_string())
            }
            SessionEvent::NetworkFailure(reason) => {
                error!(reason = %reason, "Device session lost");
                ConnectionState::Disconnected(reason)
            }
            SessionEvent::RetryScheduled(attempt) => ConnectionState::Reconnecting(attempt),
            SessionEvent::GaveUp(reason) => {
                error!(reason = %reason, "Giving up on the device session");
                ConnectionState::PermanentlyDisconnected(reason)
            }
        }
    }
}

/// What to do after the session dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryPlan {
    /// Wait `delay`, then let the event loop reconnect
    Wait { attempt: u32, delay: Duration },
    /// The client is shutting down
    Stop,
    /// Every allowed attempt has been used
    GiveUp { attempts: u32 },
}

/// Plan the next retry given how many were already made
pub fn plan_retry(attempts_made: u32, config: &ReconnectConfig, shutting_down: bool) -> RetryPlan {
    if shutting_down {
        return RetryPlan::Stop;
    }

    match config.max_attempts {
        Some(max) if attempts_made >= max => RetryPlan::GiveUp {
            attempts: attempts_made,
        },
        _ => {
            let attempt = attempts_made + 1;
            RetryPlan::Wait {
                attempt,
                delay: Duration::from_millis(config.calculate_backoff_delay(attempt)),
            }
        }
    }
}

/// How long `connect` waits for the first ConnAck
pub fn connack_timeout(config: &ReconnectConfig) -> Duration {
    config
        .calculate_max_total_time()
        .map_or(UNBOUNDED_CONNACK_WAIT, |total_ms| {
            Duration::from_millis(total_ms) + CONNACK_GRACE
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limited(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            max_attempts: Some(max_attempts),
            backoff_pattern: vec![100, 200],
            sustained_delay: 500,
        }
    }

    #[test]
    fn test_retry_follows_backoff_pattern() {
        let config = ReconnectConfig::default();

        assert_eq!(
            plan_retry(0, &config, false),
            RetryPlan::Wait {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(
            plan_retry(9, &config, false),
            RetryPlan::Wait {
                attempt: 10,
                delay: Duration::from_secs(10)
            }
        );
    }

    #[test]
    fn test_shutdown_wins_over_retry() {
        assert_eq!(plan_retry(0, &limited(3), true), RetryPlan::Stop);
        assert_eq!(plan_retry(3, &limited(3), true), RetryPlan::Stop);
    }

    #[test]
    fn test_gives_up_after_last_allowed_attempt() {
        let config = limited(2);

        assert!(matches!(
            plan_retry(1, &config, false),
            RetryPlan::Wait { attempt: 2, .. }
        ));
        assert_eq!(
            plan_retry(2, &config, false),
            RetryPlan::GiveUp { attempts: 2 }
        );
    }

    #[test]
    fn test_connack_timeout() {
        assert_eq!(
            connack_timeout(&ReconnectConfig::default()),
            Duration::from_secs(60)
        );
        assert_eq!(
            connack_timeout(&limited(3)),
            Duration::from_millis(100 + 200 + 500) + Duration::from_secs(30)
        );
    }

    #[test]
    fn test_giving_up_is_permanent() {
        let state = SessionEvent::GaveUp("3 attempts".to_string()).into_state();
        assert_eq!(
            state,
            ConnectionState::PermanentlyDisconnected("3 attempts".to_string())
        );
        assert!(!state.accepts_traffic());
    }

    #[test]
    fn test_only_established_session_accepts_traffic() {
        let cases = [
            (SessionEvent::Established, true),
            (SessionEvent::BrokerClosed, false),
            (SessionEvent::NetworkFailure("reset".to_string()), false),
            (SessionEvent::RetryScheduled(2), false),
        ];

        for (event, expected) in cases {
            assert_eq!(
                event.clone().into_state().accepts_traffic(),
                expected,
                "{event:?}"
            );
        }
    }
}
