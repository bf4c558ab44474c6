//! # Database Operations
//!
//! PostgreSQL connection management and schema migrations for the task
//! documents and the shared dataset.
//!
//! ## Key Components
//!
//! - [`connection`] - Pool construction from [`crate::config::DatabaseConfig`]
//! - [`migrations`] - Embedded schema migrations with advisory locking
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use pipeline_core::config::DatabaseConfig;
//! use pipeline_core::database::{DatabaseConnection, DatabaseMigrations};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = DatabaseConnection::new(&DatabaseConfig::default()).await?;
//! DatabaseMigrations::run_all(db.pool()).await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod migrations;

pub use connection::DatabaseConnection;
pub use migrations::DatabaseMigrations;
