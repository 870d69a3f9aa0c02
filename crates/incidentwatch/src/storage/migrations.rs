//! Schema versioning for the ledger database.
//!
//! The version lives in the `metadata` table. Each migration step brings an
//! older file forward by one version.

use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use crate::error::{Error, Result};

use super::schema::SCHEMA_STATEMENTS;

/// The current schema version.
pub const CURRENT_VERSION: i32 = 1;

/// Key used to store the schema version in the metadata table.
const VERSION_KEY: &str = "schema_version";

/// Create missing tables and run pending migrations.
///
/// # Errors
///
/// Returns an error if schema creation or migration fails.
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    for statement in SCHEMA_STATEMENTS {
        conn.execute(statement, [])?;
    }

    let version = get_schema_version(conn)?;
    if version < CURRENT_VERSION {
        run_migrations(conn, version)?;
    }

    Ok(())
}

/// Read the stored schema version, 0 for a fresh file.
fn get_schema_version(conn: &Connection) -> Result<i32> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            [VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    stored.map_or(Ok(0), |value| {
        value.parse().map_err(|_| Error::DatabaseMigration {
            message: format!("invalid schema version: {value}"),
        })
    })
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        (VERSION_KEY, version.to_string()),
    )?;
    Ok(())
}

fn run_migrations(conn: &Connection, from_version: i32) -> Result<()> {
    for version in (from_version + 1)..=CURRENT_VERSION {
        debug!(version, "Applying ledger migration");
        run_migration(conn, version)?;
    }
    set_schema_version(conn, CURRENT_VERSION)
}

fn run_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        _ => Err(Error::DatabaseMigration {
            message: format!("unknown migration version: {version}"),
        }),
    }
}

/// Version 1 is the table set in `SCHEMA_STATEMENTS`.
fn migrate_v1(conn: &Connection) -> Result<()> {
    set_schema_version(conn, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_objects(conn: &Connection, kind: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = ?1 ORDER BY name")
            .unwrap();
        let names = stmt
            .query_map([kind], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<String>, _>>()
            .unwrap();
        names
    }

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_fresh_database_gets_ledger_tables() {
        let conn = fresh();
        let tables = sqlite_objects(&conn, "table");
        assert!(tables.contains(&"articles".to_string()));
        assert!(tables.contains(&"metadata".to_string()));

        let indexes = sqlite_objects(&conn, "index");
        assert!(indexes.contains(&"idx_articles_checked_at".to_string()));
        assert!(indexes.contains(&"idx_articles_outcome".to_string()));
    }

    #[test]
    fn test_fresh_database_is_current() {
        assert_eq!(get_schema_version(&fresh()).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_reopening_keeps_version_and_rows() {
        let conn = fresh();
        conn.execute(
            "INSERT INTO articles (url, url_hash, feed, title, outcome, checked_at)
             VALUES ('https://taz.de/!1/', 'h1', 'taz', 't', 'accepted', '2024-12-23T10:00:00Z')",
            [],
        )
        .unwrap();

        initialize_schema(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_VERSION);
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_missing_version_reads_as_zero() {
        let conn = Connection::open_in_memory().unwrap();
        for statement in SCHEMA_STATEMENTS {
            conn.execute(statement, []).unwrap();
        }
        assert_eq!(get_schema_version(&conn).unwrap(), 0);

        run_migrations(&conn, 0).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_garbled_version_is_migration_error() {
        let conn = fresh();
        conn.execute("UPDATE metadata SET value = 'one' WHERE key = ?1", [VERSION_KEY])
            .unwrap();

        let err = get_schema_version(&conn).unwrap_err();
        assert!(matches!(err, Error::DatabaseMigration { .. }));
        assert!(err.to_string().contains("one"));
    }

    #[test]
    fn test_unknown_migration_step() {
        let err = run_migration(&fresh(), CURRENT_VERSION + 1).unwrap_err();
        assert!(err.to_string().contains("unknown migration version"));
    }
}
