//! Stream topology and per-environment delivery profiles.
//!
//! Three streams partition the subject space without overlap:
//! `TRADING_EVENTS` holds orders, balance changes, and signals;
//! `TRADING_ERRORS` holds bot error reports; `SYSTEM_EVENTS` holds
//! heartbeats and other system subjects.

use std::time::Duration;

use super::{ConsumerSpec, StreamSpec};
use crate::config::Environment;
use crate::domain::events::subjects;

pub const TRADING_STREAM: &str = "TRADING_EVENTS";
pub const ERRORS_STREAM: &str = "TRADING_ERRORS";
pub const SYSTEM_STREAM: &str = "SYSTEM_EVENTS";

/// Delivery knobs that differ between development and production.
#[derive(Debug, Clone, Copy)]
pub struct BusProfile {
    pub max_deliver: i64,
    pub ack_wait: Duration,
    pub duplicate_window: Duration,
    pub trading_max_age: Duration,
    pub system_max_age: Duration,
}

impl BusProfile {
    pub fn for_environment(env: Environment) -> Self {
        match env {
            Environment::Development => BusProfile {
                max_deliver: 3,
                ack_wait: Duration::from_secs(30),
                duplicate_window: Duration::from_secs(120),
                trading_max_age: Duration::from_secs(24 * 3600),
                system_max_age: Duration::from_secs(3600),
            },
            Environment::Production => BusProfile {
                max_deliver: 5,
                ack_wait: Duration::from_secs(60),
                duplicate_window: Duration::from_secs(300),
                trading_max_age: Duration::from_secs(72 * 3600),
                system_max_age: Duration::from_secs(24 * 3600),
            },
        }
    }

    /// All streams this service owns, in creation order.
    pub fn streams(&self) -> Vec<StreamSpec> {
        vec![
            StreamSpec {
                name: TRADING_STREAM.to_string(),
                subjects: vec![
                    subjects::ORDERS_WILDCARD.to_string(),
                    subjects::BALANCE_WILDCARD.to_string(),
                    subjects::SIGNALS.to_string(),
                ],
                max_age: self.trading_max_age,
                duplicate_window: self.duplicate_window,
            },
            StreamSpec {
                name: ERRORS_STREAM.to_string(),
                subjects: vec![subjects::ERRORS.to_string()],
                max_age: self.trading_max_age,
                duplicate_window: self.duplicate_window,
            },
            StreamSpec {
                name: SYSTEM_STREAM.to_string(),
                subjects: vec![subjects::SYSTEM_WILDCARD.to_string()],
                max_age: self.system_max_age,
                duplicate_window: self.duplicate_window,
            },
        ]
    }

    fn consumer(&self, stream: &str, durable_prefix: &str, name: &str, filter: &str) -> ConsumerSpec {
        ConsumerSpec {
            stream: stream.to_string(),
            durable: format!("{}-{}", durable_prefix, name),
            filter_subject: filter.to_string(),
            max_deliver: self.max_deliver,
            ack_wait: self.ack_wait,
        }
    }

    pub fn orders_consumer(&self, durable_prefix: &str) -> ConsumerSpec {
        self.consumer(TRADING_STREAM, durable_prefix, "orders", subjects::ORDERS_WILDCARD)
    }

    pub fn balance_consumer(&self, durable_prefix: &str) -> ConsumerSpec {
        self.consumer(TRADING_STREAM, durable_prefix, "balance", subjects::BALANCE_WILDCARD)
    }

    pub fn signals_consumer(&self, durable_prefix: &str) -> ConsumerSpec {
        self.consumer(TRADING_STREAM, durable_prefix, "signals", subjects::SIGNALS)
    }

    pub fn errors_consumer(&self, durable_prefix: &str) -> ConsumerSpec {
        self.consumer(ERRORS_STREAM, durable_prefix, "errors", subjects::ERRORS)
    }

    pub fn system_consumer(&self, durable_prefix: &str) -> ConsumerSpec {
        self.consumer(SYSTEM_STREAM, durable_prefix, "system", subjects::SYSTEM_WILDCARD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_differ_by_environment() {
        let dev = BusProfile::for_environment(Environment::Development);
        let prod = BusProfile::for_environment(Environment::Production);
        assert_eq!(dev.max_deliver, 3);
        assert_eq!(prod.max_deliver, 5);
        assert!(dev.ack_wait < prod.ack_wait);
        assert!(dev.duplicate_window < prod.duplicate_window);
    }

    #[test]
    fn test_stream_subjects_do_not_overlap() {
        let profile = BusProfile::for_environment(Environment::Development);
        let streams = profile.streams();
        assert_eq!(streams.len(), 3);

        let all: Vec<&String> = streams.iter().flat_map(|s| s.subjects.iter()).collect();
        for (i, a) in all.iter().enumerate() {
            for b in all.iter().skip(i + 1) {
                assert_ne!(a, b, "subject {} bound to two streams", a);
            }
        }
        // trading.errors lives in its own stream, not the trading stream
        let trading = &streams[0];
        assert!(!trading
            .subjects
            .iter()
            .any(|s| s == crate::domain::events::subjects::ERRORS));
    }

    #[test]
    fn test_consumer_durable_names_carry_prefix() {
        let profile = BusProfile::for_environment(Environment::Development);
        let spec = profile.balance_consumer("ledger");
        assert_eq!(spec.durable, "ledger-balance");
        assert_eq!(spec.stream, TRADING_STREAM);
        assert_eq!(spec.max_deliver, 3);
    }
}
