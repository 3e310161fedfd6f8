use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: false,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "restcache".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Timeouts applied to network calls.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct Timeouts {
    /// The timeout for establishing a connection.
    #[serde(with = "humantime_serde")]
    pub connect: Duration,
    /// The timeout of a single call when the request does not set one.
    #[serde(with = "humantime_serde")]
    pub call: Duration,
    /// Upper bound on how long a caller blocks when no blocking policy is configured.
    #[serde(with = "humantime_serde")]
    pub max_block: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(1),
            call: Duration::from_secs(30),
            max_block: Duration::from_secs(3600),
        }
    }
}

/// The client configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory of the on-disk cache.
    pub cache_dir: PathBuf,

    /// Name of the directory below [`cache_dir`](Self::cache_dir) used by the HTTP transport.
    pub transport_root: String,

    /// Logging configuration.
    pub logging: Logging,

    /// Metrics configuration.
    pub metrics: Metrics,

    /// DSN to report internal errors to.
    pub sentry_dsn: Option<Dsn>,

    /// Network timeouts.
    pub timeouts: Timeouts,

    /// URLs longer than this are rejected with `400 Bad Request` unless a request disables the
    /// check.
    pub max_url_length: usize,

    /// The `User-Agent` sent when a request does not specify one.
    pub user_agent: String,

    /// Minimum time a successful response is considered fresh.
    #[serde(with = "humantime_serde")]
    pub min_cache_period: Duration,

    /// Time an error response is considered fresh.
    #[serde(with = "humantime_serde")]
    pub error_cache_period: Duration,

    /// Maximum number of network calls running at the same time.
    pub max_concurrent_calls: usize,
}

/// Default value for the "cache_dir" configuration.
fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(env::temp_dir)
        .join("restcache")
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cache_dir: default_cache_dir(),
            transport_root: "rest".into(),
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
            timeouts: Timeouts::default(),
            max_url_length: 2000,
            user_agent: concat!("restcache/", env!("CARGO_PKG_VERSION")).into(),
            min_cache_period: Duration::ZERO,
            error_cache_period: Duration::ZERO,
            max_concurrent_calls: 64,
        }
    }
}

impl Config {
    /// Return the directory holding the records and bodies of the given transport root.
    pub fn transport_dir(&self, root: &str) -> PathBuf {
        self.cache_dir.join(root)
    }

    /// Return the directory used for temporary files.
    pub fn tmp_dir(&self) -> PathBuf {
        self.cache_dir.join("tmp")
    }

    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
