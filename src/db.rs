use crate::config::AppConfig;
use migrations::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use std::time::Duration;
use tracing::info;

/// Type alias for a database connection pool.
pub type DbPool = DatabaseConnection;

/// Connection pool settings.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

impl DbConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            url: config.database_url.clone(),
            max_connections: config.db_max_connections,
            min_connections: config.db_min_connections,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

/// Establishes a connection pool to the database.
pub async fn establish_connection(config: &DbConfig) -> Result<DbPool, DbErr> {
    let mut options = ConnectOptions::new(config.url.clone());
    options
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(false);

    let pool = Database::connect(options).await?;
    info!(url = %config.url, "database connection established");
    Ok(pool)
}

/// Connects using the application configuration, running migrations when
/// `auto_migrate` is set.
pub async fn establish_connection_from_app_config(config: &AppConfig) -> Result<DbPool, DbErr> {
    let pool = establish_connection(&DbConfig::from_app_config(config)).await?;

    if config.auto_migrate {
        info!("running pending migrations");
        Migrator::up(&pool, None).await?;
    }

    Ok(pool)
}
