// ABOUTME: Command implementations
// ABOUTME: Exports the restore command

pub mod restore;

pub use restore::{restore, RestoreRequest};
