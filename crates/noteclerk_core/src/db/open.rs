//! Pool bootstrap for PostgreSQL.
//!
//! # Responsibility
//! - Build connection options from `DbSettings`.
//! - Open, ping and schema-check the backend before handing out a pool.
//!
//! # Invariants
//! - Returned pools answered a ping and have all four note tables.

use super::schema::ensure_schema;
use super::{DbError, DbResult};
use crate::config::{Config, DbSettings};
use crate::logging::sanitize_for_log;
use log::{error, info};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use sqlx::Connection;
use std::str::FromStr;
use std::time::{Duration, Instant};

const MAX_POOL_CONNECTIONS: u32 = 10;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Validates `settings` and converts them into connection options.
///
/// Never performs network I/O.
pub fn connect_options(settings: &DbSettings) -> DbResult<PgConnectOptions> {
    let missing = settings.missing_fields();
    if !missing.is_empty() {
        return Err(DbError::InvalidConfig(format!(
            "empty required fields: {}",
            missing.join(", ")
        )));
    }

    let port = settings.port.trim().parse::<u16>().map_err(|_| {
        DbError::InvalidConfig(format!("port `{}` is not a valid TCP port", settings.port))
    })?;
    let ssl_mode = PgSslMode::from_str(settings.ssl_mode.trim()).map_err(|_| {
        DbError::InvalidConfig(format!(
            "ssl mode `{}` is not one of disable|allow|prefer|require|verify-ca|verify-full",
            settings.ssl_mode
        ))
    })?;

    Ok(PgConnectOptions::new()
        .host(settings.host.trim())
        .port(port)
        .username(settings.user.trim())
        .password(&settings.password)
        .database(settings.name.trim())
        .ssl_mode(ssl_mode))
}

/// Opens a connection pool, pings the backend and ensures the schema.
///
/// # Side effects
/// - Creates missing note tables.
/// - Emits `db_open` logging events with duration and status.
pub async fn open_pool(config: &Config) -> DbResult<PgPool> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start");

    match bootstrap(config).await {
        Ok(pool) => {
            info!(
                "event=db_open module=db status=ok duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(pool)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error duration_ms={} error_code={} error={}",
                started_at.elapsed().as_millis(),
                err.code(),
                sanitize_for_log(&err.to_string())
            );
            Err(err)
        }
    }
}

async fn bootstrap(config: &Config) -> DbResult<PgPool> {
    let options = connect_options(&config.db_settings())?;
    let pool = PgPoolOptions::new()
        .max_connections(MAX_POOL_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_lazy_with(options);

    {
        let mut conn = pool.acquire().await.map_err(DbError::Connect)?;
        conn.ping().await.map_err(DbError::Ping)?;
    }

    ensure_schema(&pool).await?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::{connect_options, open_pool};
    use crate::config::{Config, DbSettings};
    use crate::db::DbError;

    fn settings() -> DbSettings {
        DbSettings {
            user: "clerk".to_string(),
            password: "s3cret".to_string(),
            host: "localhost".to_string(),
            name: "noteclerk".to_string(),
            ssl_mode: "disable".to_string(),
            port: "5432".to_string(),
        }
    }

    #[test]
    fn connect_options_accepts_complete_settings() {
        let options = connect_options(&settings()).unwrap();
        assert_eq!(options.get_host(), "localhost");
        assert_eq!(options.get_port(), 5432);
        assert_eq!(options.get_database(), Some("noteclerk"));
    }

    #[test]
    fn connect_options_rejects_blank_fields() {
        let mut incomplete = settings();
        incomplete.host.clear();
        let err = connect_options(&incomplete).unwrap_err();
        assert!(matches!(err, DbError::InvalidConfig(ref msg) if msg.contains("DbIp")));
    }

    #[test]
    fn connect_options_rejects_bad_port_and_ssl_mode() {
        let mut bad_port = settings();
        bad_port.port = "post".to_string();
        assert!(matches!(
            connect_options(&bad_port),
            Err(DbError::InvalidConfig(_))
        ));

        let mut bad_ssl = settings();
        bad_ssl.ssl_mode = "sometimes".to_string();
        assert!(matches!(
            connect_options(&bad_ssl),
            Err(DbError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn open_pool_with_empty_config_fails_before_network() {
        let err = open_pool(&Config::default()).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidConfig(_)));
        assert_eq!(err.code(), "db_invalid_config");
    }
}
