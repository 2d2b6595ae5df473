use clap::Parser;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use lib_famup::configs::settings::{
    DEFAULT_DELIVERY_TIMEOUT_SECS, DEFAULT_FEED_HOST, DEFAULT_FEED_PORT, DEFAULT_FLUSH_INTERVAL_MS,
    DEFAULT_MAX_DELIVERY_FAILURES, DEFAULT_MAX_RANGE_NM, DEFAULT_TICK_INTERVAL_MS, DEFAULT_ZFAM_ADDR,
    DEFAULT_ZFAM_PORT, METRES_PER_NM,
};
use lib_famup::{Credentials, FeedEndpoint, ReceiverLocation, RelaySettings, SettingsError};

const DEFAULT_CONFIG_FILE: &str = "famup.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(name = "famup", about = "Relays a local Beast feed to a FlightAirMap collection endpoint", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "FAMUP_NET_BO_IPADDR", help = "IP address to connect to for Beast data (default: 127.0.0.1).")]
    pub net_bo_ipaddr: Option<String>,

    #[clap(long, env = "FAMUP_NET_BO_PORT", help = "Port to connect to for Beast data (default: 30005).")]
    pub net_bo_port: Option<u16>,

    #[clap(long, env = "FAMUP_NET_ZFAM_ADDR", help = "FlightAirMap collection URL.")]
    pub net_zfam_addr: Option<String>,

    #[clap(long, env = "FAMUP_NET_ZFAM_PORT", help = "FlightAirMap collection port (default: 1001).")]
    pub net_zfam_port: Option<u16>,

    #[clap(long, env = "FAMUP_NET_ZFAM_USER", help = "FlightAirMap username.")]
    pub net_zfam_user: Option<String>,

    #[clap(long, env = "FAMUP_NET_ZFAM_PASS", hide_env_values = true, help = "FlightAirMap password.")]
    pub net_zfam_pass: Option<String>,

    #[clap(long, env = "FAMUP_LAT", allow_negative_numbers = true, help = "Reference/receiver latitude.")]
    pub lat: Option<f64>,

    #[clap(long, env = "FAMUP_LON", allow_negative_numbers = true, help = "Reference/receiver longitude.")]
    pub lon: Option<f64>,

    #[clap(long, env = "FAMUP_MAX_RANGE", help = "Absolute maximum range for position decoding, in nm (default: 300).")]
    pub max_range: Option<f64>,

    #[clap(long, help = "Write every flushed aggregate to stdout.")]
    #[serde(default)]
    pub stdout: bool,

    #[clap(long, env = "FAMUP_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "FAMUP_LOG_DIR", help = "Directory for log files; stderr only when unset.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "FAMUP_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "FAMUP_TICK_INTERVAL_MS", help = "Milliseconds between relay ticks.")]
    pub tick_interval_ms: Option<u64>,

    #[clap(long, env = "FAMUP_FLUSH_INTERVAL_MS", help = "Minimum milliseconds between aggregate flushes.")]
    pub flush_interval_ms: Option<u64>,

    #[clap(long, env = "FAMUP_DELIVERY_TIMEOUT_SECS", help = "Timeout in seconds for each HTTP request.")]
    pub delivery_timeout_secs: Option<u64>,

    #[clap(long, env = "FAMUP_MAX_DELIVERY_FAILURES", help = "Consecutive transport failures before the delivery path counts as lost.")]
    pub max_delivery_failures: Option<u32>,
}

/// What happened to the config file; reported once logging is up.
#[derive(Debug, Clone, PartialEq)]
pub enum FileStatus {
    Loaded(PathBuf),
    Missing(PathBuf),
    Unusable { path: PathBuf, reason: String },
}

impl FileStatus {
    pub fn log(&self) {
        match self {
            FileStatus::Loaded(path) => log::info!("Loaded config file {}", path.display()),
            FileStatus::Missing(path) => log::info!(
                "Config file not found at {}. Using defaults and environment/CLI variables.",
                path.display()
            ),
            FileStatus::Unusable { path, reason } => log::warn!(
                "Failed to use config file {}: {}. Falling back to other sources.",
                path.display(),
                reason
            ),
        }
    }
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            net_bo_ipaddr: other.net_bo_ipaddr.or(self.net_bo_ipaddr),
            net_bo_port: other.net_bo_port.or(self.net_bo_port),
            net_zfam_addr: other.net_zfam_addr.or(self.net_zfam_addr),
            net_zfam_port: other.net_zfam_port.or(self.net_zfam_port),
            net_zfam_user: other.net_zfam_user.or(self.net_zfam_user),
            net_zfam_pass: other.net_zfam_pass.or(self.net_zfam_pass),
            lat: other.lat.or(self.lat),
            lon: other.lon.or(self.lon),
            max_range: other.max_range.or(self.max_range),
            stdout: other.stdout || self.stdout,
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            tick_interval_ms: other.tick_interval_ms.or(self.tick_interval_ms),
            flush_interval_ms: other.flush_interval_ms.or(self.flush_interval_ms),
            delivery_timeout_secs: other.delivery_timeout_secs.or(self.delivery_timeout_secs),
            max_delivery_failures: other.max_delivery_failures.or(self.max_delivery_failures),
        }
    }

    fn defaults() -> Config {
        Config {
            net_bo_ipaddr: Some(DEFAULT_FEED_HOST.to_string()),
            net_bo_port: Some(DEFAULT_FEED_PORT),
            net_zfam_addr: Some(DEFAULT_ZFAM_ADDR.to_string()),
            net_zfam_port: Some(DEFAULT_ZFAM_PORT),
            max_range: Some(DEFAULT_MAX_RANGE_NM),
            log_level: Some("info".to_string()),
            tick_interval_ms: Some(DEFAULT_TICK_INTERVAL_MS),
            flush_interval_ms: Some(DEFAULT_FLUSH_INTERVAL_MS),
            delivery_timeout_secs: Some(DEFAULT_DELIVERY_TIMEOUT_SECS),
            max_delivery_failures: Some(DEFAULT_MAX_DELIVERY_FAILURES),
            ..Default::default()
        }
    }

    /// Validates the merged values into the immutable relay settings.
    pub fn to_settings(&self) -> Result<RelaySettings, SettingsError> {
        let feed = FeedEndpoint {
            host: self.net_bo_ipaddr.clone().unwrap_or_else(|| DEFAULT_FEED_HOST.to_string()),
            port: self.net_bo_port.unwrap_or(DEFAULT_FEED_PORT),
        };
        let endpoint = RelaySettings::endpoint_url(
            self.net_zfam_addr.as_deref().unwrap_or(DEFAULT_ZFAM_ADDR),
            self.net_zfam_port.unwrap_or(DEFAULT_ZFAM_PORT),
        )?;
        let credentials = Credentials::new(self.net_zfam_user.clone(), self.net_zfam_pass.clone())?;

        let max_range = self.max_range.unwrap_or(DEFAULT_MAX_RANGE_NM);
        if !(max_range > 0.0) {
            return Err(SettingsError::ZeroValue { name: "max range" });
        }

        let mut settings = RelaySettings::new(feed, endpoint, credentials);
        if self.lat.is_some() || self.lon.is_some() {
            settings.location = ReceiverLocation::validate(self.lat.unwrap_or(0.0), self.lon.unwrap_or(0.0));
        }
        settings.max_range_m = max_range * METRES_PER_NM;
        settings.mirror_stdout = self.stdout;
        settings.tick_interval = Duration::from_millis(self.tick_interval_ms.unwrap_or(DEFAULT_TICK_INTERVAL_MS));
        settings.flush_interval = Duration::from_millis(self.flush_interval_ms.unwrap_or(DEFAULT_FLUSH_INTERVAL_MS));
        settings.delivery_timeout =
            Duration::from_secs(self.delivery_timeout_secs.unwrap_or(DEFAULT_DELIVERY_TIMEOUT_SECS));
        settings.max_delivery_failures = self.max_delivery_failures.unwrap_or(DEFAULT_MAX_DELIVERY_FAILURES);
        settings.check()?;
        Ok(settings)
    }
}

/// Defaults, then the JSON config file, then environment and CLI arguments.
pub fn load_config<I, T>(args: I) -> Result<(Config, FileStatus), clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    // CLI and env are parsed first so --config-path can point at the file.
    let cli_args = Config::try_parse_from(args)?;

    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();

    let status = if config_file_path.exists() {
        match fs::read_to_string(&config_file_path) {
            Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
                Ok(file_config) => {
                    current_config = current_config.merge(file_config);
                    FileStatus::Loaded(config_file_path)
                }
                Err(e) => FileStatus::Unusable {
                    path: config_file_path,
                    reason: e.to_string(),
                },
            },
            Err(e) => FileStatus::Unusable {
                path: config_file_path,
                reason: e.to_string(),
            },
        }
    } else {
        FileStatus::Missing(config_file_path)
    };

    current_config = current_config.merge(cli_args);
    Ok((current_config, status))
}
