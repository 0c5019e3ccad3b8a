//! Configuration management for the endpoint manager
//!
//! Sources, lowest to highest precedence: an optional YAML/TOML file, the
//! process environment and command-line overrides. Environment variable names
//! are lower-cased by the `config` crate, so every key below is lower-case.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use config::{Config, ConfigBuilder, Environment, builder::DefaultState};
use pgendpoint_common::{DEFAULT_PG_PORT, EndpointManagerError, Result};
use pgendpoint_core::healthcheck::{Credentials, ProbeSettings, RetryPolicy};
use pgendpoint_core::reconciler::ReconcilerSettings;
use pgendpoint_core::verifier::{DEFAULT_POOL_SIZE, DEFAULT_PROBE_SLACK, VerifierSettings};

use crate::startup::logging::{LogFormat, LoggingConfig};

pub const DEFAULT_CONFIG_FILE: &str = "conf/endpoint-manager.yml";
pub const DEFAULT_CHART_NAME: &str = "postgres-external";
pub const DEFAULT_NAMESPACE: &str = "default";
pub const SERVICE_ACCOUNT_NAMESPACE_FILE: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

pub const DEFAULT_PG_USER: &str = "repmgr";
pub const DEFAULT_PG_PASSWORD: &str = "securepassword";
pub const DEFAULT_PG_DATABASE: &str = "repmgr";

const DEFAULT_PG_CONNECT_TIMEOUT_SECS: f64 = 5.0;
const DEFAULT_TCP_CONNECT_TIMEOUT_SECS: f64 = 1.0;

/// Command line arguments
#[derive(Debug, Default, Parser)]
#[command(name = "pgendpoint-manager", version, about)]
pub struct Cli {
    /// Optional configuration file
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,
    /// Comma-separated candidate nodes, overrides PG_NODES
    #[arg(long = "nodes")]
    pub nodes: Option<String>,
    /// Namespace of the Endpoints objects, overrides NAMESPACE
    #[arg(short = 'n', long = "namespace")]
    pub namespace: Option<String>,
    /// Log the payloads instead of writing them
    #[arg(long = "dry-run")]
    pub dry_run: bool,
}

/// Application configuration loaded from file, environment and CLI
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    /// Build the layered configuration for `cli`
    pub fn load(cli: &Cli) -> Result<Self> {
        Self::load_with_environment(cli, Environment::default())
    }

    /// Environment values stay strings here; the typed accessors convert on
    /// read so credentials such as `PGPASSWORD=007` pass through unchanged.
    pub fn load_with_environment(cli: &Cli, environment: Environment) -> Result<Self> {
        let builder = Config::builder()
            .add_source(config::File::from(cli.config.as_path()).required(false))
            .add_source(environment);

        let config = Self::apply_overrides(builder, cli)
            .map_err(config_error)?
            .build()
            .map_err(config_error)?;

        Ok(Self { config })
    }

    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    fn apply_overrides(
        mut builder: ConfigBuilder<DefaultState>,
        cli: &Cli,
    ) -> std::result::Result<ConfigBuilder<DefaultState>, config::ConfigError> {
        if let Some(nodes) = &cli.nodes {
            builder = builder.set_override("pg_nodes", nodes.as_str())?;
        }
        if let Some(namespace) = &cli.namespace {
            builder = builder.set_override("namespace", namespace.as_str())?;
        }
        if cli.dry_run {
            builder = builder.set_override("dry_run", true)?;
        }
        Ok(builder)
    }

    fn non_empty_string(&self, key: &str) -> Option<String> {
        self.config
            .get_string(key)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn seconds(&self, key: &str, default: f64) -> Duration {
        let secs = self.config.get_float(key).unwrap_or(default);
        Duration::try_from_secs_f64(secs).unwrap_or_else(|_| Duration::from_secs_f64(default))
    }

    fn millis(&self, key: &str, default: u64) -> Duration {
        let ms = self
            .config
            .get_int(key)
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(default);
        Duration::from_millis(ms)
    }

    // ========================================================================
    // Kubernetes
    // ========================================================================

    /// `namespace`, then `default_namespace`, then the in-cluster service
    /// account file, then `default`
    pub fn namespace(&self) -> String {
        self.namespace_with(Path::new(SERVICE_ACCOUNT_NAMESPACE_FILE))
    }

    pub fn namespace_with(&self, service_account_file: &Path) -> String {
        self.non_empty_string("namespace")
            .or_else(|| self.non_empty_string("default_namespace"))
            .or_else(|| {
                std::fs::read_to_string(service_account_file)
                    .ok()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
            })
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
    }

    pub fn chart_name(&self) -> String {
        self.non_empty_string("chart_name")
            .or_else(|| self.non_empty_string("helm_release"))
            .unwrap_or_else(|| DEFAULT_CHART_NAME.to_string())
    }

    pub fn rw_service(&self) -> String {
        self.non_empty_string("rw_service")
            .unwrap_or_else(|| format!("{}-rw", self.chart_name()))
    }

    pub fn ro_service(&self) -> String {
        self.non_empty_string("ro_service")
            .unwrap_or_else(|| format!("{}-ro", self.chart_name()))
    }

    pub fn dry_run(&self) -> bool {
        self.config.get_bool("dry_run").unwrap_or(false)
    }

    // ========================================================================
    // PostgreSQL
    // ========================================================================

    pub fn pg_nodes(&self) -> String {
        self.config.get_string("pg_nodes").unwrap_or_default()
    }

    pub fn pg_user(&self) -> String {
        self.non_empty_string("pguser")
            .unwrap_or_else(|| DEFAULT_PG_USER.to_string())
    }

    pub fn pg_password(&self) -> String {
        self.config
            .get_string("pgpassword")
            .unwrap_or_else(|_| DEFAULT_PG_PASSWORD.to_string())
    }

    pub fn pg_database(&self) -> String {
        self.non_empty_string("pgdatabase")
            .unwrap_or_else(|| DEFAULT_PG_DATABASE.to_string())
    }

    pub fn pg_ssl_mode(&self) -> Option<String> {
        self.non_empty_string("pgsslmode")
    }

    /// `pgport`, then `pg_port`
    pub fn pg_port(&self) -> u16 {
        self.config
            .get_int("pgport")
            .or_else(|_| self.config.get_int("pg_port"))
            .ok()
            .and_then(|v| u16::try_from(v).ok())
            .filter(|v| *v != 0)
            .unwrap_or(DEFAULT_PG_PORT)
    }

    pub fn pg_connect_timeout(&self) -> Duration {
        self.seconds("pgconnect_timeout", DEFAULT_PG_CONNECT_TIMEOUT_SECS)
    }

    // ========================================================================
    // Probing
    // ========================================================================

    pub fn tcp_connect_timeout(&self) -> Duration {
        self.seconds("tcp_connect_timeout", DEFAULT_TCP_CONNECT_TIMEOUT_SECS)
    }

    pub fn max_workers(&self) -> usize {
        self.config
            .get_int("max_workers")
            .ok()
            .and_then(|v| usize::try_from(v).ok())
            .unwrap_or(DEFAULT_POOL_SIZE)
            .max(1)
    }

    pub fn probe_retry_attempts(&self) -> u32 {
        self.config
            .get_int("probe_retry_attempts")
            .ok()
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(3)
            .max(1)
    }

    pub fn probe_retry_delay(&self) -> Duration {
        self.millis("probe_retry_delay_ms", 200)
    }

    pub fn probe_retry_jitter(&self) -> Duration {
        self.millis("probe_retry_jitter_ms", 100)
    }

    pub fn probe_slack(&self) -> Duration {
        self.seconds("probe_slack_secs", DEFAULT_PROBE_SLACK.as_secs_f64())
    }

    // ========================================================================
    // Logging
    // ========================================================================

    pub fn log_level(&self) -> String {
        self.non_empty_string("log_level")
            .unwrap_or_else(|| "info".to_string())
    }

    pub fn log_format(&self) -> LogFormat {
        self.non_empty_string("log_format")
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }

    pub fn log_dir(&self) -> Option<PathBuf> {
        self.non_empty_string("log_dir").map(PathBuf::from)
    }

    // ========================================================================
    // Projections consumed by the engine
    // ========================================================================

    pub fn credentials(&self) -> Credentials {
        Credentials {
            user: Some(self.pg_user()),
            password: Some(self.pg_password()),
            database: Some(self.pg_database()),
            ssl_mode: self.pg_ssl_mode(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.probe_retry_attempts(),
            base_delay: self.probe_retry_delay(),
            max_jitter: self.probe_retry_jitter(),
        }
    }

    pub fn probe_settings(&self) -> ProbeSettings {
        ProbeSettings {
            port: self.pg_port(),
            tcp_connect_timeout: self.tcp_connect_timeout(),
            query_timeout: self.pg_connect_timeout(),
            credentials: self.credentials(),
            retry: self.retry_policy(),
        }
    }

    pub fn verifier_settings(&self, probe: &ProbeSettings) -> VerifierSettings {
        VerifierSettings::from_probe_settings(probe, self.max_workers(), self.probe_slack())
    }

    pub fn reconciler_settings(&self) -> ReconcilerSettings {
        ReconcilerSettings {
            rw_service: self.rw_service(),
            ro_service: self.ro_service(),
            pg_nodes: self.pg_nodes(),
        }
    }

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.log_level(),
            format: self.log_format(),
            log_dir: self.log_dir(),
            ..LoggingConfig::default()
        }
    }
}

fn config_error(e: config::ConfigError) -> EndpointManagerError {
    EndpointManagerError::Config(e.to_string())
}
