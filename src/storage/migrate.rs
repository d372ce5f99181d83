//! Idempotent schema migrations.
//!
//! Ordered `*.sql` files from the migrations directory are applied in
//! filename order; a `schema_migrations(filename PK, applied_at)` ledger
//! records completed files. Each unseen file runs inside its own transaction
//! together with its ledger insertion, so a failed migration leaves nothing
//! half-applied and re-running never needs manual cleanup.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use sqlx::PgPool;
use tracing::info;

use crate::error::PrismResult;

#[derive(Debug, Clone)]
pub struct Migration {
    pub filename: String,
    pub sql: String,
}

pub fn load_migrations(dir: &Path) -> PrismResult<Vec<Migration>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "sql"))
        .collect();
    files.sort();

    let mut migrations = Vec::with_capacity(files.len());
    for path in files {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        migrations.push(Migration {
            filename,
            sql: std::fs::read_to_string(&path)?,
        });
    }
    Ok(migrations)
}

pub async fn run_migrations(pool: &PgPool, migrations_dir: &Path) -> PrismResult<usize> {
    let migrations = load_migrations(migrations_dir)?;
    if migrations.is_empty() {
        return Ok(0);
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
          filename text PRIMARY KEY,
          applied_at timestamptz NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    let applied: HashSet<String> =
        sqlx::query_scalar::<_, String>("SELECT filename FROM schema_migrations")
            .fetch_all(pool)
            .await?
            .into_iter()
            .collect();

    let mut count = 0usize;
    for migration in migrations {
        if applied.contains(&migration.filename) {
            continue;
        }
        let mut tx = pool.begin().await?;
        sqlx::raw_sql(&migration.sql).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO schema_migrations (filename) VALUES ($1)")
            .bind(&migration.filename)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!(filename = %migration.filename, "applied migration");
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_load_in_filename_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("002_later.sql"), "SELECT 2;").unwrap();
        std::fs::write(dir.path().join("001_first.sql"), "SELECT 1;").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let migrations = load_migrations(dir.path()).unwrap();
        let names: Vec<&str> = migrations.iter().map(|m| m.filename.as_str()).collect();
        assert_eq!(names, vec!["001_first.sql", "002_later.sql"]);
    }
}
