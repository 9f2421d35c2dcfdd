use crate::auth::{
    jwt::JwtKeys,
    memory::MemoryUserStore,
    password::PasswordService,
    repo::{PgUserStore, UserStore},
};
use crate::config::{AppConfig, StoreConfig};
use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub passwords: PasswordService,
    pub keys: JwtKeys,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let users: Arc<dyn UserStore> = match &config.store {
            StoreConfig::Postgres {
                database_url,
                max_connections,
            } => {
                let db = PgPoolOptions::new()
                    .max_connections(*max_connections)
                    .connect(database_url)
                    .await
                    .context("connect to database")?;

                sqlx::migrate!("./migrations")
                    .run(&db)
                    .await
                    .context("run migrations")?;
                Arc::new(PgUserStore::new(db))
            }
            StoreConfig::Memory => {
                tracing::warn!("using in-memory user store; users are lost on restart");
                Arc::new(MemoryUserStore::new())
            }
        };

        Self::from_parts(config, users)
    }

    /// Builds signing and hashing from config so bad secrets fail at startup.
    pub fn from_parts(config: AppConfig, users: Arc<dyn UserStore>) -> anyhow::Result<Self> {
        let keys = JwtKeys::new(&config.jwt).context("jwt config")?;
        let passwords = PasswordService::new(&config.password).context("password config")?;
        Ok(Self {
            config: Arc::new(config),
            users,
            passwords,
            keys,
        })
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        let config = AppConfig {
            addr: ([127, 0, 0, 1], 0).into(),
            store: StoreConfig::Memory,
            jwt: crate::config::JwtConfig {
                secret: "test".into(),
                ttl_minutes: 60 * 24,
            },
            password: crate::config::PasswordConfig {
                memory_kib: 64,
                iterations: 1,
                parallelism: 1,
            },
        };
        Self::from_parts(config, Arc::new(MemoryUserStore::new())).expect("fake state")
    }
}
