use std::fmt;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use super::location::ReceiverLocation;

/// Default address of the local Beast producer.
pub const DEFAULT_FEED_HOST: &str = "127.0.0.1";
/// Default Beast output port of dump1090-style decoders.
pub const DEFAULT_FEED_PORT: u16 = 30005;
/// Default FlightAirMap collection endpoint.
pub const DEFAULT_ZFAM_ADDR: &str = "https://input.flightairmap.fr";
/// Default FlightAirMap collection port.
pub const DEFAULT_ZFAM_PORT: u16 = 1001;
/// Tick period of the relay loop.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 900;
/// How often the engine flushes its aggregate into the sink.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 200;
/// Upper bound on a single HTTP exchange.
pub const DEFAULT_DELIVERY_TIMEOUT_SECS: u64 = 10;
/// Consecutive transport failures tolerated before the delivery path is declared lost.
pub const DEFAULT_MAX_DELIVERY_FAILURES: u32 = 10;
/// Default absolute maximum range for position decoding, in nautical miles.
pub const DEFAULT_MAX_RANGE_NM: f64 = 300.0;
/// Metres per nautical mile.
pub const METRES_PER_NM: f64 = 1852.0;

/// Settings that cannot produce a working relay.
#[derive(Debug, Error, PartialEq)]
pub enum SettingsError {
    /// Username or password was not given.
    #[error("missing {0}: both --net-zfam-user and --net-zfam-pass are required")]
    MissingCredential(&'static str),

    /// Username is empty or contains ':'.
    #[error("malformed username '{0}': it must not be empty or contain ':'")]
    MalformedUsername(String),

    /// The collection URL does not parse or cannot take a port.
    #[error("invalid collection URL '{addr}': {reason}")]
    InvalidEndpoint {
        /// URL as given.
        addr: String,
        /// Why it was refused.
        reason: String,
    },

    /// An interval, budget or range was zero.
    #[error("{name} must be greater than zero")]
    ZeroValue {
        /// Which setting.
        name: &'static str,
    },
}

/// HTTP Basic credentials for the collection endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Builds credentials from the optional CLI values, rejecting missing or
    /// unusable ones.
    pub fn new(username: Option<String>, password: Option<String>) -> Result<Self, SettingsError> {
        let username = username.ok_or(SettingsError::MissingCredential("username"))?;
        let password = password.ok_or(SettingsError::MissingCredential("password"))?;

        // Basic auth joins the pair with ':', so the user part cannot carry one.
        if username.is_empty() || username.contains(':') {
            return Err(SettingsError::MalformedUsername(username));
        }

        Ok(Self { username, password })
    }

    /// User part of the Basic credentials.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Password part of the Basic credentials.
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"*****")
            .finish()
    }
}

/// Host and port of the local Beast producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEndpoint {
    /// Address or hostname.
    pub host: String,
    /// TCP port, 30005 by default.
    pub port: u16,
}

impl fmt::Display for FeedEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl Default for FeedEndpoint {
    fn default() -> Self {
        Self {
            host: DEFAULT_FEED_HOST.to_string(),
            port: DEFAULT_FEED_PORT,
        }
    }
}

/// # Relay Settings
///
/// Everything the relay needs, fixed for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Local Beast producer.
    pub feed: FeedEndpoint,
    /// Collection endpoint, port already applied.
    pub endpoint: Url,
    /// Basic credentials sent with every request.
    pub credentials: Credentials,
    /// Receiver reference position, possibly unset.
    pub location: ReceiverLocation,
    /// Maximum position-decoding range in metres.
    pub max_range_m: f64,
    /// Mirror each flushed aggregate to standard output instead of discarding it.
    pub mirror_stdout: bool,
    /// Period of the tick loop.
    pub tick_interval: Duration,
    /// Minimum spacing between aggregate flushes.
    pub flush_interval: Duration,
    /// Bound on each HTTP request.
    pub delivery_timeout: Duration,
    /// Consecutive transport failures before the delivery path counts as lost.
    pub max_delivery_failures: u32,
}

impl RelaySettings {
    /// Creates settings with the default cadences and budgets.
    pub fn new(feed: FeedEndpoint, endpoint: Url, credentials: Credentials) -> Self {
        Self {
            feed,
            endpoint,
            credentials,
            location: ReceiverLocation::unset(),
            max_range_m: DEFAULT_MAX_RANGE_NM * METRES_PER_NM,
            mirror_stdout: false,
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            delivery_timeout: Duration::from_secs(DEFAULT_DELIVERY_TIMEOUT_SECS),
            max_delivery_failures: DEFAULT_MAX_DELIVERY_FAILURES,
        }
    }

    /// Combines the collection address and port into one URL.
    ///
    /// A bare host is taken as plain HTTP, the same way curl treats a
    /// scheme-less address.
    pub fn endpoint_url(addr: &str, port: u16) -> Result<Url, SettingsError> {
        let invalid = |reason: String| SettingsError::InvalidEndpoint {
            addr: addr.to_string(),
            reason,
        };

        let with_scheme = if addr.contains("://") {
            addr.to_string()
        } else {
            format!("http://{}", addr)
        };

        let mut url = Url::parse(&with_scheme).map_err(|e| invalid(e.to_string()))?;
        if url.host_str().is_none() {
            return Err(invalid("no host".to_string()));
        }
        url.set_port(Some(port))
            .map_err(|_| invalid("port cannot be set".to_string()))?;
        Ok(url)
    }

    /// Rejects zero cadences and budgets, which would spin or never deliver.
    pub fn check(&self) -> Result<(), SettingsError> {
        if self.tick_interval.is_zero() {
            return Err(SettingsError::ZeroValue { name: "tick interval" });
        }
        if self.flush_interval.is_zero() {
            return Err(SettingsError::ZeroValue { name: "flush interval" });
        }
        if self.delivery_timeout.is_zero() {
            return Err(SettingsError::ZeroValue { name: "delivery timeout" });
        }
        if self.max_delivery_failures == 0 {
            return Err(SettingsError::ZeroValue { name: "max delivery failures" });
        }
        Ok(())
    }

    /// Maximum range in nautical miles, for display.
    pub fn max_range_nm(&self) -> f64 {
        self.max_range_m / METRES_PER_NM
    }
}
