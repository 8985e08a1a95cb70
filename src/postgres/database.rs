// ABOUTME: Minimal database boundary used by the restore engine
// ABOUTME: Implemented for tokio-postgres clients and for in-memory test doubles

use crate::error::DbError;
use std::future::Future;
use tokio_postgres::Client;

/// The two round-trips the restore engine needs from a connection.
pub trait Database: Send + Sync {
    /// Cheap liveness check.
    fn ping(&self) -> impl Future<Output = Result<(), DbError>> + Send;

    /// Execute statement text as-is. The text may contain several commands.
    fn exec(&self, sql: &str) -> impl Future<Output = Result<(), DbError>> + Send;
}

impl Database for Client {
    async fn ping(&self) -> Result<(), DbError> {
        self.simple_query("SELECT 1").await?;
        Ok(())
    }

    async fn exec(&self, sql: &str) -> Result<(), DbError> {
        // batch_execute uses the simple query protocol, so multi-command
        // statements and dump-style text run unchanged
        self.batch_execute(sql).await?;
        Ok(())
    }
}
