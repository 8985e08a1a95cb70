// ABOUTME: Library module for sql-dump-restorer
// ABOUTME: Exports the restore engine for use in the binary and tests

pub mod commands;
pub mod config;
pub mod error;
pub mod postgres;
pub mod progress;
pub mod restore;
pub mod utils;
