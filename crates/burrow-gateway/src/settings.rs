//! Deployment settings store
//!
//! The control port of the job service lives in a deployment settings table.
//! It is read once, at construction, over a short-lived connection whose
//! parameters come from the environment.

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use sqlx::{Connection, PgConnection};

use burrow_core::error::SettingsError;
use burrow_core::traits::SettingsProvider;

const DEFAULT_DB_PORT: u16 = 5432;

const SETTING_QUERY: &str = r#"SELECT "Value" FROM build_deploymentsetting WHERE "Key" = $1"#;

/// Connection parameters for the settings database
#[derive(Clone)]
pub struct PostgresSettingsProvider {
    host: String,
    port: u16,
    user: String,
    password: String,
    database: String,
}

impl std::fmt::Debug for PostgresSettingsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresSettingsProvider")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl PostgresSettingsProvider {
    /// Build from `DB_HOST` (optionally `host:port`), `DB_USER`, `DB_PASS`
    /// and `DB_NAME`.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let var = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or(SettingsError::MissingEnv(name))
        };

        let (host, port) = split_host_port(&var("DB_HOST")?)?;

        Ok(Self {
            host,
            port,
            user: var("DB_USER")?,
            password: var("DB_PASS")?,
            database: var("DB_NAME")?,
        })
    }

    fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
            .ssl_mode(PgSslMode::Disable)
    }
}

/// Split `host`, `host:port`, `[v6]` or `[v6]:port`. A bare address with
/// several colons is taken as an IPv6 host on the default port.
fn split_host_port(raw: &str) -> Result<(String, u16), SettingsError> {
    let invalid = || SettingsError::Store(format!("Invalid DB_HOST: {}", raw));
    let parse_port = |port: &str| -> Result<u16, SettingsError> {
        port.parse()
            .map_err(|_| SettingsError::Store(format!("Invalid DB_HOST port: {}", port)))
    };

    if let Some(rest) = raw.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        return match tail {
            "" => Ok((host.to_string(), DEFAULT_DB_PORT)),
            _ => {
                let port = tail.strip_prefix(':').ok_or_else(invalid)?;
                Ok((host.to_string(), parse_port(port)?))
            }
        };
    }

    match raw.split_once(':') {
        Some((host, port)) if !port.contains(':') => Ok((host.to_string(), parse_port(port)?)),
        _ => Ok((raw.to_string(), DEFAULT_DB_PORT)),
    }
}

#[async_trait]
impl SettingsProvider for PostgresSettingsProvider {
    async fn resolve(&self, key: &str) -> Result<String, SettingsError> {
        tracing::debug!("Looking up setting {} in {}@{}", key, self.database, self.host);

        let mut conn = PgConnection::connect_with(&self.connect_options())
            .await
            .map_err(|e| SettingsError::Store(e.to_string()))?;

        let value = sqlx::query_scalar::<_, String>(SETTING_QUERY)
            .bind(key)
            .fetch_optional(&mut conn)
            .await
            .map_err(|e| SettingsError::Store(e.to_string()));

        if let Err(e) = conn.close().await {
            tracing::debug!("Failed to close settings connection: {}", e);
        }

        match value? {
            Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
            _ => Err(SettingsError::NotFound(key.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_from_env_with_port() {
        let provider = PostgresSettingsProvider::from_lookup(env(&[
            ("DB_HOST", "db.internal:6543"),
            ("DB_USER", "burrow"),
            ("DB_PASS", "hunter2"),
            ("DB_NAME", "deploy"),
        ]))
        .unwrap();

        assert_eq!(provider.host, "db.internal");
        assert_eq!(provider.port, 6543);
        assert!(!format!("{:?}", provider).contains("hunter2"));
    }

    #[test]
    fn test_from_env_default_port() {
        let provider = PostgresSettingsProvider::from_lookup(env(&[
            ("DB_HOST", "db.internal"),
            ("DB_USER", "burrow"),
            ("DB_PASS", "pw"),
            ("DB_NAME", "deploy"),
        ]))
        .unwrap();
        assert_eq!(provider.port, DEFAULT_DB_PORT);
    }

    #[test]
    fn test_from_env_missing_variable() {
        let err = PostgresSettingsProvider::from_lookup(env(&[
            ("DB_HOST", "db.internal"),
            ("DB_USER", "burrow"),
            ("DB_NAME", "deploy"),
        ]))
        .unwrap_err();
        assert!(matches!(err, SettingsError::MissingEnv("DB_PASS")));
    }

    #[test]
    fn test_split_host_port_ipv6() {
        assert_eq!(
            split_host_port("[::1]:6543").unwrap(),
            ("::1".to_string(), 6543)
        );
        assert_eq!(
            split_host_port("[fd00::5]").unwrap(),
            ("fd00::5".to_string(), DEFAULT_DB_PORT)
        );
        assert_eq!(
            split_host_port("::1").unwrap(),
            ("::1".to_string(), DEFAULT_DB_PORT)
        );
        assert_eq!(
            split_host_port("10.0.0.3:5433").unwrap(),
            ("10.0.0.3".to_string(), 5433)
        );
    }

    #[test]
    fn test_split_host_port_rejects_malformed() {
        assert!(split_host_port("[::1").is_err());
        assert!(split_host_port("[::1]6543").is_err());
        assert!(split_host_port("[]:6543").is_err());
        assert!(split_host_port("db.internal:pg").is_err());
    }
}
