use crate::infrastructure::error::InfraError;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

pub fn initialize_database(path: &Path) -> Result<(), InfraError> {
    let connection = Connection::open(path)?;
    connection.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

pub(crate) async fn with_connection<F, T>(db_path: &Path, task: F) -> Result<T, InfraError>
where
    F: FnOnce(&mut Connection) -> Result<T, InfraError> + Send + 'static,
    T: Send + 'static,
{
    let db_path: PathBuf = db_path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut connection = Connection::open(&db_path)?;
        connection.busy_timeout(std::time::Duration::from_secs(5))?;
        task(&mut connection)
    })
    .await
    .map_err(|error| InfraError::Io(std::io::Error::other(format!("database task failed: {error}"))))?
}

/// Fixed-width UTC timestamps so stored values sort lexicographically.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(value: &str, field_name: &str) -> Result<DateTime<Utc>, InfraError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| InfraError::InvalidInput(format!("invalid {field_name} '{value}': {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_database_is_idempotent() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("focusdo.sqlite");

        initialize_database(&path).expect("first init");
        initialize_database(&path).expect("second init");

        let connection = Connection::open(&path).expect("open");
        let tables: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('todos', 'sessions', 'settings', 'kv_store')",
                [],
                |row| row.get(0),
            )
            .expect("count tables");
        assert_eq!(tables, 4);
    }
}
