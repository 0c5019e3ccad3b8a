//! Recovery-state checker
//!
//! Asks a PostgreSQL node whether it is running in recovery mode. `true`
//! means standby, `false` means primary.

use std::fmt::{Debug, Formatter};
use std::time::Duration;

use pgendpoint_common::{EndpointManagerError, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DbBackend, Statement};
use tracing::debug;
use url::Url;

/// Query issued against every node
pub const RECOVERY_QUERY: &str = "SELECT pg_is_in_recovery() AS in_recovery";

/// `application_name` reported to PostgreSQL
pub const APPLICATION_NAME: &str = "pgendpoint-manager";

/// Connection credentials and options, passed through to the driver as-is
#[derive(Clone, Default)]
pub struct Credentials {
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub ssl_mode: Option<String>,
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "******"))
            .field("database", &self.database)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Database probe contract
#[async_trait::async_trait]
pub trait RecoveryChecker: Send + Sync {
    /// `Ok(Some(true))` in recovery, `Ok(Some(false))` not in recovery,
    /// `Ok(None)` when the server gave no usable answer. Connection and
    /// protocol errors are returned as `Err`.
    async fn is_in_recovery(
        &self,
        host: &str,
        port: u16,
        credentials: &Credentials,
    ) -> Result<Option<bool>>;
}

/// sea-orm backed checker using a single short-lived connection per call
pub struct PostgresRecoveryChecker {
    connect_timeout: Duration,
}

impl PostgresRecoveryChecker {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Build a `postgres://` URL with percent-encoded credentials
    pub fn connection_url(host: &str, port: u16, credentials: &Credentials) -> Result<String> {
        let host = if host.contains(':') && !host.starts_with('[') {
            format!("[{}]", host)
        } else {
            host.to_string()
        };

        let invalid = |what: &str| {
            EndpointManagerError::Config(format!("invalid {} for node '{}'", what, host))
        };

        let mut url = Url::parse(&format!("postgres://{}:{}", host, port))
            .map_err(|e| EndpointManagerError::Config(format!("invalid node address '{}': {}", host, e)))?;

        if let Some(user) = credentials.user.as_deref().filter(|u| !u.is_empty()) {
            url.set_username(user).map_err(|_| invalid("user"))?;
        }
        if let Some(password) = credentials.password.as_deref().filter(|p| !p.is_empty()) {
            url.set_password(Some(password))
                .map_err(|_| invalid("password"))?;
        }
        if let Some(database) = credentials.database.as_deref().filter(|d| !d.is_empty()) {
            url.set_path(database);
        }

        {
            let mut query = url.query_pairs_mut();
            if let Some(ssl_mode) = credentials.ssl_mode.as_deref().filter(|s| !s.is_empty()) {
                query.append_pair("sslmode", ssl_mode);
            }
            query.append_pair("application_name", APPLICATION_NAME);
        }

        Ok(url.into())
    }

    async fn query_recovery(&self, url: String) -> Result<Option<bool>> {
        let mut options = ConnectOptions::new(url);
        options
            .max_connections(1)
            .min_connections(0)
            .connect_timeout(self.connect_timeout)
            .acquire_timeout(self.connect_timeout)
            .sqlx_logging(false);

        let db = Database::connect(options)
            .await
            .map_err(|e| EndpointManagerError::Database(e.to_string()))?;

        let result = db
            .query_one(Statement::from_string(DbBackend::Postgres, RECOVERY_QUERY))
            .await;

        if let Err(e) = db.close().await {
            debug!("Failed to close probe connection: {}", e);
        }

        let row = result.map_err(|e| EndpointManagerError::Database(e.to_string()))?;
        match row {
            Some(row) => row
                .try_get::<Option<bool>>("", "in_recovery")
                .map_err(|e| EndpointManagerError::Database(e.to_string())),
            None => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl RecoveryChecker for PostgresRecoveryChecker {
    async fn is_in_recovery(
        &self,
        host: &str,
        port: u16,
        credentials: &Credentials,
    ) -> Result<Option<bool>> {
        let url = Self::connection_url(host, port, credentials)?;

        match tokio::time::timeout(self.connect_timeout, self.query_recovery(url)).await {
            Ok(result) => result,
            Err(_) => Err(EndpointManagerError::Database(format!(
                "recovery query timed out after {:?}",
                self.connect_timeout
            ))),
        }
    }
}
