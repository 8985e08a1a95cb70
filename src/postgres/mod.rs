// ABOUTME: PostgreSQL target module
// ABOUTME: Exports the database boundary and connection management

pub mod connection;
pub mod database;

pub use connection::{connect, connect_with_retry};
pub use database::Database;
