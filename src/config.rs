//! Configuration assembly: CLI flags merged with environment variables.
//!
//! Mirrors the split the teacher crate draws between its `clap`-derived `Cli`
//! (the user-facing flags) and `Settings` (the fully resolved configuration
//! consumed by the rest of the program).

use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("--{flag} must be {requirement}, got {value}")]
    Invalid {
        flag: &'static str,
        requirement: &'static str,
        value: String,
    },
    #[error("missing required environment variable {0}")]
    MissingEnv(&'static str),
    #[error("invalid value for environment variable {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Command-line surface, as spec'd: long flags with single-char aliases.
#[derive(Parser, Debug)]
#[command(name = "rowpump")]
#[command(about = "Drain a Postgres source through a durable work queue and parallel HTTP fan-out")]
#[command(version)]
pub struct Cli {
    /// Number of consumer workers
    #[arg(short = 'c', long, default_value_t = 4)]
    pub consumers: u32,

    /// Producer page size
    #[arg(short = 'b', long, default_value_t = 100)]
    pub batch_size: u32,

    /// Max rows to enqueue (0 = unbounded)
    #[arg(short = 'l', long, default_value_t = 0)]
    pub limit: u64,

    /// Pipeline wall-clock seconds before draining (0 = unbounded)
    #[arg(short = 't', long, default_value_t = 0)]
    pub max_duration: u64,

    /// Path to the work queue database file
    #[arg(long, env = "QUEUE_PATH", default_value = "./work_queue.sqlite3")]
    pub queue_path: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// PostgreSQL connection settings for the upstream row source.
#[derive(Debug, Clone)]
pub struct PgSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub table: String,
    pub use_tls: bool,
}

impl PgSettings {
    fn from_env() -> Result<Self> {
        let host = env_or_default("PG_HOST", "localhost");
        let port = env_or_default("PG_PORT", "5432")
            .parse()
            .map_err(|_| ConfigError::InvalidEnv {
                name: "PG_PORT",
                value: env_or_default("PG_PORT", "5432"),
            })?;
        let user = std::env::var("PG_USER").map_err(|_| ConfigError::MissingEnv("PG_USER"))?;
        let password =
            std::env::var("PG_PASSWORD").map_err(|_| ConfigError::MissingEnv("PG_PASSWORD"))?;
        let database =
            std::env::var("PG_DATABASE").map_err(|_| ConfigError::MissingEnv("PG_DATABASE"))?;
        let table = env_or_default("PG_TABLE", "source_rows");
        let use_tls = env_or_default("PG_SSLMODE", "disable") != "disable";

        Ok(Self {
            host,
            port,
            user,
            password,
            database,
            table,
            use_tls,
        })
    }

    pub fn connection_string(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={}",
            self.host, self.port, self.user, self.password, self.database
        )
    }
}

/// The fully resolved configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub consumers: u32,
    pub batch_size: u32,
    pub limit: u64,
    pub max_duration_secs: u64,
    pub queue_path: PathBuf,
    pub verbose: bool,
    pub httpbin_url: String,
    pub mock_cpu_load: bool,
    pub pg: PgSettings,
}

impl Settings {
    /// Build settings from parsed CLI flags plus the process environment,
    /// validating every numeric flag and required environment variable.
    pub fn load(cli: Cli) -> Result<Self> {
        if cli.consumers < 1 {
            return Err(ConfigError::Invalid {
                flag: "consumers",
                requirement: ">= 1",
                value: cli.consumers.to_string(),
            });
        }
        if cli.batch_size < 1 {
            return Err(ConfigError::Invalid {
                flag: "batch-size",
                requirement: ">= 1",
                value: cli.batch_size.to_string(),
            });
        }

        let httpbin_url = std::env::var("HTTPBIN_URL")
            .unwrap_or_else(|_| "https://httpbin.org".to_string())
            .trim_end_matches('/')
            .to_string();

        let mock_cpu_load = env_or_default("MOCK_CPU_LOAD", "false") == "true";

        Ok(Self {
            consumers: cli.consumers,
            batch_size: cli.batch_size,
            limit: cli.limit,
            max_duration_secs: cli.max_duration,
            queue_path: cli.queue_path,
            verbose: cli.verbose,
            httpbin_url,
            mock_cpu_load,
            pg: PgSettings::from_env()?,
        })
    }
}

/// Resolve the log level the spec names (`LOG_LEVEL`) to a `tracing`
/// EnvFilter directive, falling back to `RUST_LOG` and then a verbosity-based
/// default.
pub fn log_filter(verbose: bool) -> String {
    if let Ok(level) = std::env::var("LOG_LEVEL") {
        return format!("rowpump={}", normalize_level(&level));
    }
    if verbose {
        "rowpump=debug".to_string()
    } else {
        "rowpump=info".to_string()
    }
}

fn normalize_level(level: &str) -> &str {
    match level.to_lowercase().as_str() {
        "debug" => "debug",
        "warn" => "warn",
        "error" | "fatal" => "error",
        _ => "info",
    }
}

fn env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(consumers: u32, batch_size: u32) -> Cli {
        Cli {
            consumers,
            batch_size,
            limit: 0,
            max_duration: 0,
            queue_path: PathBuf::from("./work_queue.sqlite3"),
            verbose: false,
        }
    }

    #[test]
    fn rejects_zero_consumers() {
        let err = Settings::load(cli(0, 10)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { flag: "consumers", .. }));
    }

    #[test]
    fn rejects_zero_batch_size() {
        let err = Settings::load(cli(4, 0)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { flag: "batch-size", .. }));
    }

    #[test]
    fn log_filter_prefers_log_level_env() {
        std::env::set_var("LOG_LEVEL", "debug");
        assert_eq!(log_filter(false), "rowpump=debug");
        std::env::remove_var("LOG_LEVEL");
    }
}
