use std::net::SocketAddr;

use anyhow::{bail, Context};
use argon2::Params;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub ttl_minutes: i64,
}

/// Argon2 cost parameters. Raising them slows every register/login.
#[derive(Debug, Clone)]
pub struct PasswordConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

#[derive(Debug, Clone)]
pub enum StoreConfig {
    Postgres {
        database_url: String,
        max_connections: u32,
    },
    Memory,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub addr: SocketAddr,
    pub store: StoreConfig,
    pub jwt: JwtConfig,
    pub password: PasswordConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key/value source. Missing `JWT_SECRET` is fatal.
    pub fn from_lookup<F>(get: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret = get("JWT_SECRET")
            .filter(|s| !s.trim().is_empty())
            .context("JWT_SECRET must be set")?;
        let jwt = JwtConfig {
            secret,
            ttl_minutes: parse_or(&get, "JWT_TTL_MINUTES", 60 * 24)?,
        };
        if jwt.ttl_minutes <= 0 {
            bail!("JWT_TTL_MINUTES must be positive");
        }

        let store = match get("STORE_BACKEND")
            .unwrap_or_else(|| "postgres".into())
            .to_ascii_lowercase()
            .as_str()
        {
            "postgres" | "pg" => StoreConfig::Postgres {
                database_url: get("DATABASE_URL")
                    .context("DATABASE_URL must be set for the postgres store")?,
                max_connections: parse_or(&get, "DATABASE_MAX_CONNECTIONS", 10)?,
            },
            "memory" => StoreConfig::Memory,
            other => bail!("unknown STORE_BACKEND: {other}"),
        };

        let defaults = PasswordConfig::default();
        let password = PasswordConfig {
            memory_kib: parse_or(&get, "PASSWORD_MEMORY_KIB", defaults.memory_kib)?,
            iterations: parse_or(&get, "PASSWORD_ITERATIONS", defaults.iterations)?,
            parallelism: parse_or(&get, "PASSWORD_PARALLELISM", defaults.parallelism)?,
        };

        let addr: SocketAddr = format!(
            "{}:{}",
            get("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            get("APP_PORT").unwrap_or_else(|| "8080".into())
        )
        .parse()
        .context("APP_HOST/APP_PORT do not form a socket address")?;

        Ok(Self {
            addr,
            store,
            jwt,
            password,
        })
    }
}

fn parse_or<F, T>(get: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .ok()
            .with_context(|| format!("{key} is not a valid number: {raw}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn missing_secret_is_fatal() {
        let err = load(&[("STORE_BACKEND", "memory")]).unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn blank_secret_is_fatal() {
        assert!(load(&[("JWT_SECRET", "   "), ("STORE_BACKEND", "memory")]).is_err());
    }

    #[test]
    fn defaults_apply() {
        let cfg = load(&[
            ("JWT_SECRET", "s3cret"),
            ("DATABASE_URL", "postgres://localhost/users"),
        ])
        .expect("config should load");
        assert_eq!(cfg.jwt.ttl_minutes, 1440);
        assert_eq!(cfg.addr.port(), 8080);
        assert_eq!(cfg.password.iterations, Params::DEFAULT_T_COST);
        match cfg.store {
            StoreConfig::Postgres {
                database_url,
                max_connections,
            } => {
                assert_eq!(database_url, "postgres://localhost/users");
                assert_eq!(max_connections, 10);
            }
            StoreConfig::Memory => panic!("expected postgres store"),
        }
    }

    #[test]
    fn postgres_requires_database_url() {
        let err = load(&[("JWT_SECRET", "s3cret")]).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn memory_store_and_overrides() {
        let cfg = load(&[
            ("JWT_SECRET", "s3cret"),
            ("STORE_BACKEND", "memory"),
            ("JWT_TTL_MINUTES", "30"),
            ("PASSWORD_ITERATIONS", "4"),
            ("APP_PORT", "9000"),
        ])
        .expect("config should load");
        assert!(matches!(cfg.store, StoreConfig::Memory));
        assert_eq!(cfg.jwt.ttl_minutes, 30);
        assert_eq!(cfg.password.iterations, 4);
        assert_eq!(cfg.addr.port(), 9000);
    }

    #[test]
    fn rejects_garbage_numbers() {
        let err = load(&[
            ("JWT_SECRET", "s3cret"),
            ("STORE_BACKEND", "memory"),
            ("JWT_TTL_MINUTES", "soon"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("JWT_TTL_MINUTES"));
    }
}
