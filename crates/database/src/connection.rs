use crate::error::DbError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

/// Opens (creating if needed) the SQLite audit ledger at `database_url`.
///
/// Foreign keys are enforced, so deleting a run cascades to everything it owns.
/// WAL mode lets concurrent runs append to the ledger while others read it.
pub async fn connect(database_url: &str) -> Result<SqlitePool, DbError> {
    if database_url.trim().is_empty() {
        return Err(DbError::ConnectionConfigError("database_url must not be empty.".to_string()));
    }

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Applies the embedded migrations, bringing the ledger schema up to date.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
