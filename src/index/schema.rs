use rusqlite::{params, Connection, OptionalExtension, Result};
use tracing::{debug, info};

/// SQLite schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Drop and recreate every index relation.
///
/// The index is never patched in place: each build starts from empty tables,
/// so rows from a previous build can never leak into the current one.
pub fn recreate_schema(conn: &Connection) -> Result<()> {
    info!("Recreating index schema v{}", SCHEMA_VERSION);

    conn.execute_batch(
        "DROP TABLE IF EXISTS symbols;
         DROP TABLE IF EXISTS modules;
         DROP TABLE IF EXISTS imports;
         DROP TABLE IF EXISTS index_meta;",
    )?;

    create_v1_schema(conn)
}

/// Create v1 schema
fn create_v1_schema(conn: &Connection) -> Result<()> {
    // Modules table - one row per parsed file
    conn.execute(
        "CREATE TABLE modules (
            repo TEXT NOT NULL,
            module_name TEXT NOT NULL,
            file_path TEXT NOT NULL,
            content_hash TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX idx_modules_repo_name ON modules(repo, module_name)",
        [],
    )?;

    conn.execute(
        "CREATE UNIQUE INDEX idx_modules_repo_file ON modules(repo, file_path)",
        [],
    )?;

    // Symbols table - functions, async functions and classes
    conn.execute(
        "CREATE TABLE symbols (
            repo TEXT NOT NULL,
            file_path TEXT NOT NULL,
            symbol TEXT NOT NULL,
            kind TEXT NOT NULL,
            lineno INTEGER NOT NULL,
            docstring TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;

    conn.execute("CREATE INDEX idx_symbols_file ON symbols(repo, file_path)", [])?;

    // Raw import edges, as written in source
    conn.execute(
        "CREATE TABLE imports (
            repo TEXT NOT NULL,
            file_path TEXT NOT NULL,
            imported_module TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute("CREATE INDEX idx_imports_file ON imports(repo, file_path)", [])?;

    // Build metadata
    conn.execute(
        "CREATE TABLE index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "INSERT INTO index_meta (key, value) VALUES ('schema_version', ?1)",
        params![SCHEMA_VERSION.to_string()],
    )?;

    debug!("Schema v{} created", SCHEMA_VERSION);
    Ok(())
}

/// Read the schema version of an existing index, if it has one.
pub fn stored_version(conn: &Connection) -> Result<Option<i32>> {
    let has_meta: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'index_meta'",
        [],
        |row| row.get(0),
    )?;
    if !has_meta {
        return Ok(None);
    }

    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM index_meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    Ok(version.and_then(|v| v.parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recreate_drops_previous_rows() {
        let conn = Connection::open_in_memory().unwrap();
        recreate_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO modules VALUES ('r', 'a', 'a.py', 'h')",
            [],
        )
        .unwrap();

        recreate_schema(&conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM modules", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_stored_version() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(stored_version(&conn).unwrap(), None);

        recreate_schema(&conn).unwrap();
        assert_eq!(stored_version(&conn).unwrap(), Some(SCHEMA_VERSION));
    }
}
