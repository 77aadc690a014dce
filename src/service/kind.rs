use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use log::warn;

use crate::config::{Config, CONNECT_TIMEOUT_SECS, HTTP_REQUEST_TIMEOUT_SECS};
use crate::data::normalize_symbol;
use crate::drivers::PriceModel;
use crate::error::FeedError;

/// The fixed set of feeds the multiplexer knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceName {
    Exchange,
    Equities,
    Credits,
}

impl ServiceName {
    pub const ALL: [ServiceName; 3] = [ServiceName::Exchange, ServiceName::Equities, ServiceName::Credits];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceName::Exchange => "exchange",
            ServiceName::Equities => "equities",
            ServiceName::Credits => "credits",
        }
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceName {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exchange" => Ok(ServiceName::Exchange),
            "equities" => Ok(ServiceName::Equities),
            "credits" => Ok(ServiceName::Credits),
            _ => Err(FeedError::UnknownService(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    Streaming,
    Polled,
    Simulated,
}

#[derive(Debug, Clone)]
pub struct StreamingConfig {
    pub url: String,
    pub symbols: Vec<String>,
    pub connect_timeout: Duration,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

impl StreamingConfig {
    /// Combined-stream URL subscribing every symbol's 24h ticker at connect time.
    pub fn stream_url(&self) -> String {
        let streams = self
            .symbols
            .iter()
            .map(|s| format!("{}@ticker", s.to_ascii_lowercase()))
            .collect::<Vec<_>>()
            .join("/");
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}streams={}", self.url, separator, streams)
    }
}

#[derive(Debug, Clone)]
pub struct PolledConfig {
    /// Quote endpoint with a `{symbol}` placeholder.
    pub url_template: String,
    pub symbols: Vec<String>,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub fallback: PriceModel,
}

#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    pub tick_interval: Duration,
    pub model: PriceModel,
}

#[derive(Debug, Clone)]
pub enum DriverConfig {
    Streaming(StreamingConfig),
    Polled(PolledConfig),
    Simulated(SimulatedConfig),
}

/// Static tuning for one service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub name: ServiceName,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub driver: DriverConfig,
}

impl ServiceConfig {
    pub fn for_service(name: ServiceName, config: &Config) -> Self {
        match name {
            ServiceName::Exchange => Self {
                name,
                reconnect_delay: Duration::from_secs(5),
                max_reconnect_attempts: 5,
                driver: DriverConfig::Streaming(StreamingConfig {
                    url: config.exchange_ws_url.clone(),
                    symbols: normalized_symbols(&config.exchange_symbols),
                    connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
                    ping_interval: Duration::from_secs(30),
                    pong_timeout: Duration::from_secs(10),
                }),
            },
            ServiceName::Equities => Self {
                name,
                reconnect_delay: Duration::from_secs(10),
                max_reconnect_attempts: 3,
                driver: DriverConfig::Polled(PolledConfig {
                    url_template: config.equities_quote_url.clone(),
                    symbols: normalized_symbols(&config.equities_symbols),
                    poll_interval: Duration::from_secs(30),
                    request_timeout: Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS),
                    fallback: PriceModel::new(
                        base_prices(&[
                            ("AAPL", 190.0),
                            ("MSFT", 420.0),
                            ("GOOGL", 170.0),
                            ("AMZN", 180.0),
                            ("TSLA", 250.0),
                            ("NVDA", 120.0),
                            ("META", 500.0),
                        ]),
                        100.0,
                        0.01,
                    ),
                }),
            },
            ServiceName::Credits => Self {
                name,
                reconnect_delay: Duration::from_secs(5),
                max_reconnect_attempts: 3,
                driver: DriverConfig::Simulated(SimulatedConfig {
                    tick_interval: Duration::from_secs(5),
                    model: PriceModel::new(
                        base_prices(&[
                            ("EUA", 85.0),
                            ("UKA", 40.0),
                            ("CCA", 32.0),
                            ("RGGI", 15.0),
                            ("VCS", 4.5),
                            ("GS", 12.0),
                        ]),
                        25.0,
                        0.02,
                    ),
                }),
            },
        }
    }
}

/// Configured symbols in the same form callers look them up by.
fn normalized_symbols(symbols: &[String]) -> Vec<String> {
    symbols
        .iter()
        .filter_map(|symbol| match normalize_symbol(symbol) {
            Ok(symbol) => Some(symbol),
            Err(e) => {
                warn!("Skipping configured symbol: {}", e);
                None
            }
        })
        .collect()
}

fn base_prices(entries: &[(&str, f64)]) -> HashMap<String, f64> {
    entries.iter().map(|(s, p)| (s.to_string(), *p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::build_driver;

    #[test]
    fn test_service_name_parsing() {
        assert_eq!("exchange".parse::<ServiceName>().unwrap(), ServiceName::Exchange);
        assert_eq!(" Equities ".parse::<ServiceName>().unwrap(), ServiceName::Equities);
        assert!(matches!("bonds".parse::<ServiceName>(), Err(FeedError::UnknownService(_))));
    }

    #[test]
    fn test_every_service_has_a_distinct_driver() {
        let config = Config::default();
        let kinds: Vec<DriverKind> = ServiceName::ALL
            .iter()
            .map(|name| build_driver(&ServiceConfig::for_service(*name, &config)).kind())
            .collect();
        assert_eq!(kinds, vec![DriverKind::Streaming, DriverKind::Polled, DriverKind::Simulated]);
    }

    #[test]
    fn test_configured_symbols_are_normalized() {
        let mut config = Config::default();
        config.equities_symbols = vec!["aapl".to_string(), " brk.b ".to_string(), "bad symbol".to_string()];

        match ServiceConfig::for_service(ServiceName::Equities, &config).driver {
            DriverConfig::Polled(cfg) => assert_eq!(cfg.symbols, vec!["AAPL", "BRK.B"]),
            other => panic!("unexpected driver config {:?}", other),
        }
        match ServiceConfig::for_service(ServiceName::Exchange, &config).driver {
            DriverConfig::Streaming(cfg) => assert_eq!(cfg.symbols[0], "BTCUSDT"),
            other => panic!("unexpected driver config {:?}", other),
        }
    }

    #[test]
    fn test_stream_url_names_every_symbol() {
        let cfg = StreamingConfig {
            url: "wss://stream.example.com/stream".to_string(),
            symbols: vec!["BTCUSDT".to_string(), "ethusdt".to_string()],
            connect_timeout: Duration::from_secs(1),
            ping_interval: Duration::from_secs(1),
            pong_timeout: Duration::from_secs(1),
        };
        assert_eq!(
            cfg.stream_url(),
            "wss://stream.example.com/stream?streams=btcusdt@ticker/ethusdt@ticker"
        );
    }
}
