//! Async Postgres connection pool.

use diesel_async::pooled_connection::deadpool::{Object, Pool};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;

use crate::error::AdminError;

pub type DbPool = Pool<AsyncPgConnection>;
pub type DbConnection = Object<AsyncPgConnection>;

/// Build a pool; connections are opened lazily on first use.
pub fn build_pool(database_url: &str, max_connections: usize) -> Result<DbPool, AdminError> {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    Pool::builder(manager)
        .max_size(max_connections.max(1))
        .build()
        .map_err(|e| AdminError::Config(format!("diesel pool: {e}")))
}

pub async fn connection(pool: &DbPool) -> Result<DbConnection, AdminError> {
    pool.get().await.map_err(|e| {
        tracing::warn!(error = %e, "Failed to acquire database connection");
        AdminError::Pool(e.to_string())
    })
}
