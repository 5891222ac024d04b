//! This module controls configuration parsing from the end user, providing a
//! convenience mechanism for the rest of the program. Crashes are most likely
//! to originate from this code, intentionally.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

/// Errors produced by [`Config`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The config file could not be opened or read.
    #[error("unable to read config file {path}: {source}")]
    Io {
        /// Path that failed to open.
        path: String,
        /// Underlying IO failure.
        #[source]
        source: std::io::Error,
    },
    /// One or more lines in the config file failed to parse.
    ///
    /// Matches the reference implementation's `process_config_line`
    /// semantics: every bad line is reported, and parsing of the file
    /// continues to the end before failing.
    #[error("config file had {} invalid line(s):\n{}", .0.len(), .0.join("\n"))]
    InvalidLines(Vec<String>),
    /// A required key was never set.
    #[error("missing required config key: {0}")]
    MissingKey(&'static str),
}

/// Log verbosity threshold, matching the reference tool's `0..4` integer
/// scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Most verbose.
    Trace,
    /// Debug-level detail.
    Debug,
    /// Informational.
    Info,
    /// Warnings.
    Warn,
    /// Only errors.
    Error,
}

impl LogLevel {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Trace,
            1 => LogLevel::Debug,
            2 => LogLevel::Info,
            3 => LogLevel::Warn,
            _ => LogLevel::Error,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(name)
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// A `host:data_port:health_port` downstream specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downstream {
    /// Hostname or literal IPv4 address of the downstream pool.
    pub host: String,
    /// UDP port metrics are forwarded to.
    pub data_port: u16,
    /// TCP port health probes connect to.
    pub health_port: u16,
}

impl Downstream {
    /// If `host` is a literal IPv4 address, no DNS resolution is needed;
    /// [`resolver::Resolver`](crate::resolver::Resolver) is never started in
    /// that case and a single static entry is injected at startup instead.
    #[must_use]
    pub fn literal_addr(&self) -> Option<Ipv4Addr> {
        Ipv4Addr::from_str(&self.host).ok()
    }
}

impl FromStr for Downstream {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let host = parts.next().filter(|s| !s.is_empty());
        let data_port = parts.next();
        let health_port = parts.next();
        match (host, data_port, health_port) {
            (Some(host), Some(dp), Some(hp)) => {
                let data_port = dp
                    .parse()
                    .map_err(|_| format!("invalid data port in downstream spec: {s}"))?;
                let health_port = hp
                    .parse()
                    .map_err(|_| format!("invalid health port in downstream spec: {s}"))?;
                Ok(Downstream {
                    host: host.to_string(),
                    data_port,
                    health_port,
                })
            }
            _ => Err(format!(
                "downstream must be host:data_port:health_port, got: {s}"
            )),
        }
    }
}

/// Main configuration struct for this program.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// UDP port this relay listens on for inbound statsd traffic.
    pub data_port: u16,
    /// The downstream pool metrics are forwarded to.
    pub downstream: Downstream,
    /// Period for timer-driven flush of the aggregation window.
    pub flush_interval: Duration,
    /// Cadence of the background DNS resolver.
    pub dns_refresh_interval: Duration,
    /// Cadence of the per-host TCP health probe.
    pub health_check_interval: Duration,
    /// Log verbosity threshold.
    pub log_level: LogLevel,
}

fn default_dns_refresh_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_health_check_interval() -> Duration {
    Duration::from_millis(1_000)
}

fn default_log_level() -> LogLevel {
    LogLevel::Trace // matches DEFAULT_LOG_LEVEL = 0 in the reference daemon
}

/// Parse the `key=value` config file format described in the external
/// interface contract. Blank lines and lines starting with `#` are ignored.
///
/// Per the reference implementation's `process_config_line`, an invalid or
/// unknown line does not abort parsing: every bad line is collected and the
/// whole file is still read, with a single `Err` reported at the end.
pub fn parse(contents: &str) -> Result<Config, Error> {
    let mut data_port: Option<u16> = None;
    let mut downstream: Option<Downstream> = None;
    let mut flush_interval: Option<Duration> = None;
    let mut dns_refresh_interval = default_dns_refresh_interval();
    let mut health_check_interval = default_health_check_interval();
    let mut log_level = default_log_level();

    let mut failures = Vec::new();

    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            failures.push(format!("bad line in config \"{raw_line}\""));
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        match key {
            "data_port" => match value.parse() {
                Ok(p) => data_port = Some(p),
                Err(_) => failures.push(format!("invalid data_port \"{value}\"")),
            },
            "downstream" => match value.parse::<Downstream>() {
                Ok(d) => downstream = Some(d),
                Err(e) => failures.push(e),
            },
            "downstream_flush_interval" => match value.parse::<f64>() {
                Ok(secs) if secs.is_finite() && secs >= 0.0 => {
                    flush_interval = Some(Duration::from_secs_f64(secs));
                }
                _ => failures.push(format!("invalid downstream_flush_interval \"{value}\"")),
            },
            "dns_refresh_interval" => match value.parse::<u64>() {
                Ok(secs) => dns_refresh_interval = Duration::from_secs(secs),
                Err(_) => failures.push(format!("invalid dns_refresh_interval \"{value}\"")),
            },
            "downstream_health_check_interval" => match value.parse::<f64>() {
                Ok(secs) if secs.is_finite() && secs >= 0.0 => {
                    health_check_interval = Duration::from_secs_f64(secs);
                }
                _ => failures.push(format!(
                    "invalid downstream_health_check_interval \"{value}\""
                )),
            },
            "log_level" => match value.parse::<u8>() {
                Ok(v) => log_level = LogLevel::from_u8(v),
                Err(_) => failures.push(format!("invalid log_level \"{value}\"")),
            },
            other => failures.push(format!("unknown parameter \"{other}\"")),
        }
    }

    if !failures.is_empty() {
        return Err(Error::InvalidLines(failures));
    }

    let data_port = data_port.ok_or(Error::MissingKey("data_port"))?;
    let downstream = downstream.ok_or(Error::MissingKey("downstream"))?;
    let flush_interval = flush_interval.ok_or(Error::MissingKey("downstream_flush_interval"))?;

    Ok(Config {
        data_port,
        downstream,
        flush_interval,
        dns_refresh_interval,
        health_check_interval,
        log_level,
    })
}

/// Load and parse a config file from disk.
///
/// # Errors
///
/// Returns an error if the file cannot be read or if it fails to parse per
/// [`parse`].
pub fn load(path: &std::path::Path) -> Result<Config, Error> {
    let contents = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_parses_minimal() {
        let contents = "\
data_port=8125
downstream=collector.internal:8126:8127
downstream_flush_interval=10
";
        let config = parse(contents).expect("should parse");
        assert_eq!(config.data_port, 8125);
        assert_eq!(config.downstream.host, "collector.internal");
        assert_eq!(config.downstream.data_port, 8126);
        assert_eq!(config.downstream.health_port, 8127);
        assert_eq!(config.flush_interval, Duration::from_secs(10));
        assert_eq!(config.dns_refresh_interval, default_dns_refresh_interval());
        assert_eq!(config.log_level, LogLevel::Trace);
    }

    #[test]
    fn blank_lines_and_comments_are_ignored() {
        let contents = "\
# a comment

data_port=8125
downstream=127.0.0.1:8126:8127
downstream_flush_interval=1.5
";
        let config = parse(contents).expect("should parse");
        assert_eq!(config.data_port, 8125);
        assert_eq!(config.flush_interval, Duration::from_secs_f64(1.5));
    }

    #[test]
    fn literal_ipv4_downstream_is_detected() {
        let d = Downstream {
            host: "10.0.0.1".to_string(),
            data_port: 1,
            health_port: 2,
        };
        assert_eq!(d.literal_addr(), Some(Ipv4Addr::new(10, 0, 0, 1)));

        let d = Downstream {
            host: "collector.internal".to_string(),
            data_port: 1,
            health_port: 2,
        };
        assert_eq!(d.literal_addr(), None);
    }

    #[test]
    fn all_failures_are_reported_together() {
        let contents = "\
data_port=not_a_number
unknown_key=1
downstream=missing-ports
";
        let err = parse(contents).expect_err("should fail");
        match err {
            Error::InvalidLines(lines) => assert_eq!(lines.len(), 3),
            other => panic!("expected InvalidLines, got {other:?}"),
        }
    }

    #[test]
    fn missing_required_key_is_reported() {
        let contents = "log_level=1\n";
        let err = parse(contents).expect_err("should fail");
        assert!(matches!(err, Error::MissingKey("data_port")));
    }

    #[test]
    fn load_reads_and_parses_a_real_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().expect("create temp config file");
        write!(
            file,
            "data_port=8125\ndownstream=127.0.0.1:8126:8127\ndownstream_flush_interval=2\n"
        )
        .expect("write temp config file");

        let config = load(file.path()).expect("should load");
        assert_eq!(config.data_port, 8125);
        assert_eq!(config.flush_interval, Duration::from_secs(2));
    }

    #[test]
    fn load_reports_io_error_for_missing_file() {
        let err = load(std::path::Path::new("/nonexistent/path/to/config"))
            .expect_err("should fail to read");
        assert!(matches!(err, Error::Io { .. }));
    }
}
