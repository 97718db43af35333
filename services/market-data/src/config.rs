//! Configuration for the market-data feed
//!
//! Every component takes a small config struct whose `Default` carries the
//! production constants. [`FeedConfig::from_env`] layers environment
//! overrides on top.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;
use types::market::Symbol;

/// Upstream broker gateway session.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: i32,
    pub paper: bool,
    /// Interval of the reconnect loop.
    pub reconnect_interval: Duration,
    /// Tick cadence of the in-process simulated broker.
    pub simulated_tick_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4002,
            client_id: 77,
            paper: true,
            reconnect_interval: Duration::from_secs(15),
            simulated_tick_interval: Duration::from_secs(1),
        }
    }
}

/// Outbound subscription pacing.
#[derive(Debug, Clone)]
pub struct PacerConfig {
    /// At most one subscribe call per interval.
    pub drain_interval: Duration,
    /// First synthetic ticker id handed out.
    pub first_ticker_id: u32,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            drain_interval: Duration::from_millis(150),
            first_ticker_id: 1000,
        }
    }
}

/// Downstream fan-out.
#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Port the subscriber WebSocket and control surface listen on.
    pub port: u16,
    /// Bounded outbound queue per subscriber; overflow disconnects.
    pub queue_capacity: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            port: 8083,
            queue_capacity: 1000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub interval: Duration,
    /// Key of the DHI record in the health-index store.
    pub stream: String,
    /// Service name stamped on system-health snapshots.
    pub service: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            stream: "broker.market_data".to_string(),
            service: "market-data".to_string(),
        }
    }
}

/// Resilient query path.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub breaker_threshold: u32,
    pub breaker_cooldown: Duration,
    pub max_in_flight: usize,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    /// Deadline of one primary-path attempt.
    pub primary_timeout: Duration,
    /// Base of the retry backoff; doubled per attempt and capped.
    pub retry_backoff: Duration,
    pub retry_backoff_cap: Duration,
    /// Row limit of the reduced-scope fallback read.
    pub reduced_limit: usize,
    /// How far back the latest-by-symbol read looks.
    pub lookback: Duration,
    /// Rows to fetch per requested symbol in the latest read.
    pub rows_per_symbol: usize,
    /// Used when a request names no valid symbol.
    pub default_symbols: Vec<Symbol>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            breaker_threshold: 3,
            breaker_cooldown: Duration::from_secs(30),
            max_in_flight: 3,
            cache_ttl: Duration::from_secs(60),
            cache_max_entries: 10_000,
            primary_timeout: Duration::from_secs(8),
            retry_backoff: Duration::from_secs(1),
            retry_backoff_cap: Duration::from_secs(2),
            reduced_limit: 20,
            lookback: Duration::from_secs(24 * 60 * 60),
            rows_per_symbol: 5,
            default_symbols: parse_symbol_list("AAPL,GOOGL,MSFT,AMZN,TSLA"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FreshnessConfig {
    /// Data younger than this is fresh.
    pub max_age: Duration,
    /// How long one freshness verdict is reused.
    pub cache_for: Duration,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(10 * 60),
            cache_for: Duration::from_secs(30),
        }
    }
}

/// One HTTP quote provider slot in the cascade.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: Option<String>,
    /// Symbols per batch.
    pub batch_size: usize,
    /// Pause between batches.
    pub inter_batch_delay: Duration,
    pub request_timeout: Duration,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key: None,
            batch_size: 10,
            inter_batch_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Circuit guarding each HTTP provider stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderBreakerConfig {
    /// Consecutive failed batches that open the circuit.
    pub threshold: u32,
    /// How long an open provider is skipped before one trial batch.
    pub cooldown: Duration,
}

impl Default for ProviderBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CascadeConfig {
    /// Ordered provider slots; the deterministic generator runs after them.
    pub providers: Vec<ProviderConfig>,
    /// Keep the deterministic generator as the terminal stage.
    pub terminal_fallback: bool,
    /// Bound on the sync-job audit write.
    pub audit_timeout: Duration,
    /// Period of the scheduled watch-list sync; off when `None`.
    pub sync_interval: Option<Duration>,
    pub provider_breaker: ProviderBreakerConfig,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            terminal_fallback: true,
            audit_timeout: Duration::from_secs(5),
            sync_interval: None,
            provider_breaker: ProviderBreakerConfig::default(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub broker: BrokerConfig,
    pub watch_list: Vec<Symbol>,
    pub pacer: PacerConfig,
    pub fanout: FanoutConfig,
    pub heartbeat: HeartbeatConfig,
    pub health: HealthConfig,
    pub query: QueryConfig,
    pub freshness: FreshnessConfig,
    pub cascade: CascadeConfig,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            watch_list: parse_symbol_list("AAPL,MSFT,SPY"),
            pacer: PacerConfig::default(),
            fanout: FanoutConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            health: HealthConfig::default(),
            query: QueryConfig::default(),
            freshness: FreshnessConfig::default(),
            cascade: CascadeConfig::default(),
        }
    }
}

/// Provider slots in cascade order.
const PROVIDER_SLOTS: [&str; 4] = ["PRIMARY", "SECONDARY", "TERTIARY", "LEGACY"];

impl FeedConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("BROKER_GATEWAY_HOST") {
            config.broker.host = host;
        }
        override_parsed(&lookup, "BROKER_GATEWAY_PORT", &mut config.broker.port);
        override_parsed(&lookup, "BROKER_CLIENT_ID", &mut config.broker.client_id);
        override_parsed(&lookup, "BROKER_PAPER", &mut config.broker.paper);
        override_parsed(&lookup, "QUOTES_WS_PORT", &mut config.fanout.port);
        override_parsed(&lookup, "CASCADE_TERMINAL_FALLBACK", &mut config.cascade.terminal_fallback);

        let mut tick_ms = config.broker.simulated_tick_interval.as_millis() as u64;
        override_parsed(&lookup, "BROKER_SIM_TICK_MS", &mut tick_ms);
        config.broker.simulated_tick_interval = Duration::from_millis(tick_ms.max(1));

        override_parsed(&lookup, "PROVIDER_BREAKER_THRESHOLD", &mut config.cascade.provider_breaker.threshold);
        let mut cooldown_secs = config.cascade.provider_breaker.cooldown.as_secs();
        override_parsed(&lookup, "PROVIDER_BREAKER_COOLDOWN_SECS", &mut cooldown_secs);
        config.cascade.provider_breaker.cooldown = Duration::from_secs(cooldown_secs);

        let mut sync_secs = 0u64;
        override_parsed(&lookup, "SYNC_INTERVAL_SECS", &mut sync_secs);
        config.cascade.sync_interval = (sync_secs > 0).then(|| Duration::from_secs(sync_secs));

        if let Some(list) = lookup("SUBSCRIBE_SYMBOLS") {
            config.watch_list = parse_symbol_list(&list);
        }

        for slot in PROVIDER_SLOTS {
            let Some(url) = lookup(&format!("{slot}_PROVIDER_URL")) else {
                continue;
            };
            let mut provider = ProviderConfig::new(slot.to_ascii_lowercase(), url);
            provider.api_key = lookup(&format!("{slot}_PROVIDER_KEY"));
            override_parsed(&lookup, &format!("{slot}_PROVIDER_BATCH"), &mut provider.batch_size);
            let mut delay_ms = provider.inter_batch_delay.as_millis() as u64;
            override_parsed(&lookup, &format!("{slot}_PROVIDER_DELAY_MS"), &mut delay_ms);
            provider.inter_batch_delay = Duration::from_millis(delay_ms);
            provider.batch_size = provider.batch_size.max(1);
            config.cascade.providers.push(provider);
        }

        config
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(_) => warn!(key, value = %raw, "Ignoring unparseable config value"),
    }
}

/// Parse a comma-separated symbol list, skipping invalid entries.
pub fn parse_symbol_list(raw: &str) -> Vec<Symbol> {
    let mut symbols: Vec<Symbol> = Vec::new();
    for part in raw.split(',').filter(|s| !s.trim().is_empty()) {
        match Symbol::parse(part) {
            Ok(symbol) if !symbols.contains(&symbol) => symbols.push(symbol),
            Ok(_) => {}
            Err(err) => warn!(entry = part, %err, "Skipping invalid symbol"),
        }
    }
    symbols
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = FeedConfig::default();
        assert_eq!(config.broker.port, 4002);
        assert_eq!(config.pacer.drain_interval, Duration::from_millis(150));
        assert_eq!(config.heartbeat.interval, Duration::from_secs(20));
        assert_eq!(config.health.interval, Duration::from_secs(60));
        assert_eq!(config.query.breaker_threshold, 3);
        assert_eq!(config.query.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.watch_list.len(), 3);
        assert!(config.cascade.terminal_fallback);
        assert!(config.cascade.sync_interval.is_none());
        assert_eq!(config.cascade.provider_breaker.threshold, 3);
        assert_eq!(config.cascade.provider_breaker.cooldown, Duration::from_secs(60));
    }

    #[test]
    fn test_env_overrides() {
        let config = FeedConfig::from_lookup(lookup_from(&[
            ("BROKER_GATEWAY_HOST", "10.0.0.5"),
            ("BROKER_GATEWAY_PORT", "7497"),
            ("BROKER_PAPER", "false"),
            ("SUBSCRIBE_SYMBOLS", "nvda, eur.usd,,NVDA"),
            ("PRIMARY_PROVIDER_URL", "https://quotes.example.com/api/v1"),
            ("PRIMARY_PROVIDER_KEY", "secret"),
            ("TERTIARY_PROVIDER_URL", "https://backup.example.com"),
            ("TERTIARY_PROVIDER_BATCH", "5"),
            ("TERTIARY_PROVIDER_DELAY_MS", "2000"),
            ("SYNC_INTERVAL_SECS", "300"),
            ("PROVIDER_BREAKER_THRESHOLD", "5"),
            ("PROVIDER_BREAKER_COOLDOWN_SECS", "120"),
        ]));

        assert_eq!(config.broker.host, "10.0.0.5");
        assert_eq!(config.broker.port, 7497);
        assert!(!config.broker.paper);
        let symbols: Vec<&str> = config.watch_list.iter().map(Symbol::as_str).collect();
        assert_eq!(symbols, vec!["NVDA", "EUR.USD"]);

        assert_eq!(config.cascade.providers.len(), 2);
        assert_eq!(config.cascade.providers[0].name, "primary");
        assert_eq!(config.cascade.providers[0].api_key.as_deref(), Some("secret"));
        assert_eq!(config.cascade.providers[1].name, "tertiary");
        assert_eq!(config.cascade.providers[1].batch_size, 5);
        assert_eq!(config.cascade.providers[1].inter_batch_delay, Duration::from_secs(2));
        assert_eq!(config.cascade.sync_interval, Some(Duration::from_secs(300)));
        assert_eq!(
            config.cascade.provider_breaker,
            ProviderBreakerConfig { threshold: 5, cooldown: Duration::from_secs(120) }
        );
    }

    #[test]
    fn test_bad_values_keep_defaults() {
        let config = FeedConfig::from_lookup(lookup_from(&[
            ("BROKER_GATEWAY_PORT", "not-a-port"),
            ("CASCADE_TERMINAL_FALLBACK", "maybe"),
        ]));
        assert_eq!(config.broker.port, 4002);
        assert!(config.cascade.terminal_fallback);
    }
}
