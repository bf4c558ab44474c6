//! # Database Migration System
//!
//! Schema migrations compiled into the binary from the `migrations/` directory
//! and applied in version order. Each applied version is recorded in
//! `pipeline_schema_migrations`.
//!
//! ## Concurrency Control
//!
//! Several workers may start at once against the same database. A session
//! advisory lock serializes them so only one applies outstanding migrations:
//!
//! ```sql
//! SELECT pg_advisory_lock(7305231146027514)
//! ```

use sqlx::{PgPool, Row};
use std::collections::HashSet;
use tracing::info;

/// A single embedded database migration
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Version timestamp (YYYYMMDDHHMMSS format)
    pub version: &'static str,
    /// Human-readable migration name
    pub name: &'static str,
    pub sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "20240601000000",
        name: "create pipeline tasks",
        sql: include_str!("../../migrations/20240601000000_create_pipeline_tasks.sql"),
    },
    Migration {
        version: "20240601000100",
        name: "create dataset records",
        sql: include_str!("../../migrations/20240601000100_create_dataset_records.sql"),
    },
];

const LOCK_KEY: i64 = 7_305_231_146_027_514;

/// Applies schema migrations with concurrency safety.
pub struct DatabaseMigrations;

impl DatabaseMigrations {
    /// Embedded migrations in application order
    pub fn all() -> &'static [Migration] {
        MIGRATIONS
    }

    /// Run all outstanding migrations
    pub async fn run_all(pool: &PgPool) -> Result<(), sqlx::Error> {
        // Advisory locks are per session, so hold one connection throughout
        let mut conn = pool.acquire().await?;
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        let result = Self::run_outstanding_migrations(&mut conn).await;

        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        result
    }

    async fn run_outstanding_migrations(
        conn: &mut sqlx::PgConnection,
    ) -> Result<(), sqlx::Error> {
        Self::ensure_migration_table(conn).await?;
        let applied = Self::get_applied_migrations(conn).await?;

        for migration in MIGRATIONS {
            if applied.contains(migration.version) {
                continue;
            }
            info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            sqlx::raw_sql(migration.sql).execute(&mut *conn).await?;
            sqlx::query("INSERT INTO pipeline_schema_migrations (version) VALUES ($1)")
                .bind(migration.version)
                .execute(&mut *conn)
                .await?;
        }

        Ok(())
    }

    /// Ensure migration tracking table exists
    async fn ensure_migration_table(conn: &mut sqlx::PgConnection) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS pipeline_schema_migrations (
                version VARCHAR(14) PRIMARY KEY,
                applied_at TIMESTAMPTZ DEFAULT NOW()
            )
        "#,
        )
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn get_applied_migrations(
        conn: &mut sqlx::PgConnection,
    ) -> Result<HashSet<String>, sqlx::Error> {
        let rows = sqlx::query("SELECT version FROM pipeline_schema_migrations")
            .fetch_all(&mut *conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("version"))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_ordered_and_unique() {
        let versions: Vec<_> = DatabaseMigrations::all().iter().map(|m| m.version).collect();
        let mut sorted = versions.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(versions, sorted);
        assert!(versions.iter().all(|v| v.len() == 14));
    }

    #[test]
    fn test_schema_is_idempotent_ddl() {
        for migration in DatabaseMigrations::all() {
            assert!(migration.sql.contains("IF NOT EXISTS"), "{}", migration.name);
        }
    }
}
