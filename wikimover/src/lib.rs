pub mod api;
pub mod config;
pub mod migrate;

pub use api::DriveApi;
pub use config::MigrationConfig;
pub use migrate::{MigrationError, MigrationReport, Migrator, RunContext, Tree};
