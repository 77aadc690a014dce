use std::env;
use log::{info, warn};

use crate::data::normalize_symbol;

// Server Configuration
pub const DEFAULT_API_BIND_ADDRESS: &str = "127.0.0.1:8080";
pub const STATS_INTERVAL_SECS: u64 = 60;

// Health Monitor Configuration
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 30;

// Upstream Configuration
pub const DEFAULT_EXCHANGE_WS_URL: &str = "wss://stream.binance.com:9443/stream";
pub const DEFAULT_EXCHANGE_SYMBOLS: &str = "btcusdt,ethusdt,bnbusdt,solusdt,xrpusdt";
pub const DEFAULT_EQUITIES_QUOTE_URL: &str =
    "https://query1.finance.yahoo.com/v8/finance/chart/{symbol}?interval=1d&range=1d";
pub const DEFAULT_EQUITIES_SYMBOLS: &str = "AAPL,MSFT,GOOGL,AMZN,TSLA,NVDA,META";

// Connection Configuration
pub const CONNECT_TIMEOUT_SECS: u64 = 10;
pub const HTTP_REQUEST_TIMEOUT_SECS: u64 = 10;

pub const SYMBOL_PLACEHOLDER: &str = "{symbol}";

#[derive(Debug, Clone)]
pub struct Config {
    pub api_bind_address: String,
    pub log_level: String,
    pub exchange_ws_url: String,
    pub exchange_symbols: Vec<String>,
    pub equities_quote_url: String,
    pub equities_symbols: Vec<String>,
    pub health_check_interval_secs: u64,
    pub auto_start: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_bind_address: DEFAULT_API_BIND_ADDRESS.to_string(),
            log_level: "info".to_string(),
            exchange_ws_url: DEFAULT_EXCHANGE_WS_URL.to_string(),
            exchange_symbols: parse_list(DEFAULT_EXCHANGE_SYMBOLS),
            equities_quote_url: DEFAULT_EQUITIES_QUOTE_URL.to_string(),
            equities_symbols: parse_list(DEFAULT_EQUITIES_SYMBOLS),
            health_check_interval_secs: DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
            auto_start: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_bind_address: env::var("API_BIND_ADDRESS")
                .unwrap_or(defaults.api_bind_address),
            log_level: env::var("RUST_LOG")
                .unwrap_or(defaults.log_level),
            exchange_ws_url: env::var("EXCHANGE_WS_URL")
                .unwrap_or(defaults.exchange_ws_url),
            exchange_symbols: env::var("EXCHANGE_SYMBOLS")
                .map(|v| parse_list(&v))
                .unwrap_or(defaults.exchange_symbols),
            equities_quote_url: env::var("EQUITIES_QUOTE_URL")
                .unwrap_or(defaults.equities_quote_url),
            equities_symbols: env::var("EQUITIES_SYMBOLS")
                .map(|v| parse_list(&v))
                .unwrap_or(defaults.equities_symbols),
            health_check_interval_secs: parse_env_or(
                "HEALTH_CHECK_INTERVAL_SECS",
                defaults.health_check_interval_secs,
            ),
            auto_start: env::var("AUTO_START_SERVICES")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(defaults.auto_start),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.exchange_ws_url.starts_with("ws://") || self.exchange_ws_url.starts_with("wss://")) {
            return Err(format!("EXCHANGE_WS_URL must be a ws:// or wss:// URL, got {}", self.exchange_ws_url));
        }

        if self.exchange_symbols.is_empty() {
            return Err("EXCHANGE_SYMBOLS must name at least one symbol".to_string());
        }

        if !self.equities_quote_url.contains(SYMBOL_PLACEHOLDER) {
            return Err(format!("EQUITIES_QUOTE_URL must contain the {} placeholder", SYMBOL_PLACEHOLDER));
        }

        if self.equities_symbols.is_empty() {
            return Err("EQUITIES_SYMBOLS must name at least one symbol".to_string());
        }

        for symbol in self.exchange_symbols.iter().chain(&self.equities_symbols) {
            normalize_symbol(symbol).map_err(|e| format!("configured symbol rejected: {}", e))?;
        }

        if self.health_check_interval_secs == 0 {
            return Err("HEALTH_CHECK_INTERVAL_SECS must be greater than 0".to_string());
        }

        Ok(())
    }

    pub fn log_config(&self) {
        info!("Feed multiplexer configuration:");
        info!("  API Bind Address: {}", self.api_bind_address);
        info!("  Log Level: {}", self.log_level);
        info!("  Exchange WS URL: {} ({} symbols)", self.exchange_ws_url, self.exchange_symbols.len());
        info!("  Equities Quote URL: {} ({} symbols)", self.equities_quote_url, self.equities_symbols.len());
        info!("  Health Check Interval: {}s", self.health_check_interval_secs);
        info!("  Auto Start: {}", self.auto_start);
    }
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} is not valid ({:?}), using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
