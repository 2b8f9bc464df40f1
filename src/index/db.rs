use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::schema::{recreate_schema, stored_version, SCHEMA_VERSION};
use super::{ModuleRecord, RawImport, RepoFile, Repository, SymbolHit, SymbolKind, SymbolRecord};
use crate::errors::{PilotError, Result};

/// Type alias for connection pool
pub type ConnectionPool = Pool<SqliteConnectionManager>;

/// Handle on one index file.
///
/// Created by the caller for a single workflow run and passed explicitly to
/// the builder and the query functions.
#[derive(Clone)]
pub struct IndexDatabase {
    pool: ConnectionPool,
    db_path: PathBuf,
}

impl IndexDatabase {
    /// Create or open a database file for building
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        info!("Opening index at: {}", db_path.display());

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(&db_path);
        let pool = Pool::builder().max_size(4).build(manager)?;

        Ok(Self { pool, db_path })
    }

    /// Open an index that a previous build produced, for querying only
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref();
        if !path.exists() {
            return Err(PilotError::IndexNotBuilt(path.display().to_string()));
        }

        let db = Self::new(path)?;
        let conn = db.get_conn()?;
        let version = stored_version(&conn)?;
        drop(conn);
        if version != Some(SCHEMA_VERSION) {
            return Err(PilotError::IndexNotBuilt(format!(
                "{} has schema version {:?}, expected {}",
                path.display(),
                version,
                SCHEMA_VERSION
            )));
        }

        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Drop every relation, then fill the fresh tables inside one transaction.
    ///
    /// If `fill` fails the transaction is rolled back and the previous build
    /// is left untouched.
    pub fn rebuild<T, F>(&self, repositories: &[Repository], fill: F) -> Result<T>
    where
        F: FnOnce(&IndexWriter<'_>) -> Result<T>,
    {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        recreate_schema(&tx)?;

        let output = {
            let writer = IndexWriter { tx: &tx };
            fill(&writer)?
        };

        let repos: Vec<&str> = repositories.iter().map(|r| r.name.as_str()).collect();
        tx.execute(
            "INSERT INTO index_meta (key, value) VALUES ('built_at', ?1)",
            params![chrono::Utc::now().to_rfc3339()],
        )?;
        tx.execute(
            "INSERT INTO index_meta (key, value) VALUES ('repositories', ?1)",
            params![serde_json::to_string(&repos)?],
        )?;
        tx.commit()?;

        Ok(output)
    }

    /// Search symbols by case-insensitive substring of name, path or docstring
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SymbolHit>> {
        let conn = self.get_conn()?;
        let pattern = format!("%{}%", escape_like(query));

        let mut stmt = conn.prepare(
            r"SELECT repo, file_path, symbol, kind, lineno FROM symbols
              WHERE symbol LIKE ?1 ESCAPE '\'
                 OR file_path LIKE ?1 ESCAPE '\'
                 OR docstring LIKE ?1 ESCAPE '\'
              ORDER BY rowid
              LIMIT ?2",
        )?;

        let hits = stmt
            .query_map(params![pattern, limit as i64], |row| {
                Ok(SymbolHit {
                    repo: row.get(0)?,
                    file_path: row.get(1)?,
                    symbol: row.get(2)?,
                    kind: kind_from_row(row, 3)?,
                    line: row.get::<_, i64>(4)? as usize,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        debug!("Search '{}' returned {} hits", query, hits.len());
        Ok(hits)
    }

    /// Raw import strings of a file, in insertion order
    pub fn imports_of(&self, file: &RepoFile) -> Result<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT imported_module FROM imports
             WHERE repo = ?1 AND file_path = ?2
             ORDER BY rowid",
        )?;

        let imports = stmt
            .query_map(params![file.repo, file.path], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        Ok(imports)
    }

    /// Module row for a file, if the file was indexed
    pub fn module_for(&self, file: &RepoFile) -> Result<Option<ModuleRecord>> {
        let conn = self.get_conn()?;
        let module = conn
            .query_row(
                "SELECT repo, module_name, file_path, content_hash FROM modules
                 WHERE repo = ?1 AND file_path = ?2",
                params![file.repo, file.path],
                row_to_module,
            )
            .optional()?;

        Ok(module)
    }

    /// Modules in `repo` named `module` or nested under it, in insertion order
    pub fn modules_matching(&self, repo: &str, module: &str) -> Result<Vec<ModuleRecord>> {
        let conn = self.get_conn()?;
        let prefix = format!("{}.", module);

        let mut stmt = conn.prepare(
            "SELECT repo, module_name, file_path, content_hash FROM modules
             WHERE repo = ?1
               AND (module_name = ?2 OR substr(module_name, 1, length(?3)) = ?3)
             ORDER BY rowid",
        )?;

        let modules = stmt
            .query_map(params![repo, module, prefix], row_to_module)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(modules)
    }

    /// Every module row, in insertion order
    pub fn modules(&self) -> Result<Vec<ModuleRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT repo, module_name, file_path, content_hash FROM modules ORDER BY rowid",
        )?;

        let modules = stmt
            .query_map([], row_to_module)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(modules)
    }

    /// Symbols declared in a file, in insertion order
    pub fn symbols_in(&self, file: &RepoFile) -> Result<Vec<SymbolRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT repo, file_path, symbol, kind, lineno, docstring FROM symbols
             WHERE repo = ?1 AND file_path = ?2
             ORDER BY rowid",
        )?;

        let symbols = stmt
            .query_map(params![file.repo, file.path], |row| {
                Ok(SymbolRecord {
                    file: RepoFile::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
                    name: row.get(2)?,
                    kind: kind_from_row(row, 3)?,
                    line: row.get::<_, i64>(4)? as usize,
                    docstring: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(symbols)
    }

    /// Get index statistics
    pub fn get_stats(&self) -> Result<IndexStats> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            "SELECT m.repo,
                    COUNT(*),
                    (SELECT COUNT(*) FROM symbols s WHERE s.repo = m.repo),
                    (SELECT COUNT(*) FROM imports i WHERE i.repo = m.repo)
             FROM modules m
             GROUP BY m.repo
             ORDER BY m.repo",
        )?;
        let repositories = stmt
            .query_map([], |row| {
                Ok(RepoStats {
                    name: row.get(0)?,
                    modules: row.get::<_, i64>(1)? as usize,
                    symbols: row.get::<_, i64>(2)? as usize,
                    imports: row.get::<_, i64>(3)? as usize,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT kind, COUNT(*) as count FROM symbols GROUP BY kind ORDER BY count DESC, kind",
        )?;
        let symbols_by_kind = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let built_at = meta_value(&conn, "built_at")?;

        Ok(IndexStats {
            repositories,
            symbols_by_kind,
            built_at,
        })
    }
}

/// Inserts rows into a freshly recreated index
pub struct IndexWriter<'a> {
    tx: &'a Connection,
}

impl IndexWriter<'_> {
    pub fn insert_module(&self, module: &ModuleRecord) -> Result<()> {
        debug!("Inserting module: {} ({})", module.module_name, module.file);
        self.tx.execute(
            "INSERT INTO modules (repo, module_name, file_path, content_hash) VALUES (?1, ?2, ?3, ?4)",
            params![
                module.file.repo,
                module.module_name,
                module.file.path,
                module.content_hash,
            ],
        )?;
        Ok(())
    }

    pub fn insert_symbol(&self, symbol: &SymbolRecord) -> Result<()> {
        self.tx.execute(
            "INSERT INTO symbols (repo, file_path, symbol, kind, lineno, docstring)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                symbol.file.repo,
                symbol.file.path,
                symbol.name,
                symbol.kind.as_str(),
                symbol.line as i64,
                symbol.docstring,
            ],
        )?;
        Ok(())
    }

    pub fn insert_import(&self, import: &RawImport) -> Result<()> {
        self.tx.execute(
            "INSERT INTO imports (repo, file_path, imported_module) VALUES (?1, ?2, ?3)",
            params![import.file.repo, import.file.path, import.imported_module],
        )?;
        Ok(())
    }
}

/// Index statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub repositories: Vec<RepoStats>,
    pub symbols_by_kind: Vec<(String, usize)>,
    pub built_at: Option<String>,
}

impl IndexStats {
    pub fn total_modules(&self) -> usize {
        self.repositories.iter().map(|r| r.modules).sum()
    }

    pub fn total_symbols(&self) -> usize {
        self.repositories.iter().map(|r| r.symbols).sum()
    }

    pub fn total_imports(&self) -> usize {
        self.repositories.iter().map(|r| r.imports).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoStats {
    pub name: String,
    pub modules: usize,
    pub symbols: usize,
    pub imports: usize,
}

fn meta_value(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM index_meta WHERE key = ?1",
            [key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

/// Convert database row to ModuleRecord
fn row_to_module(row: &Row) -> rusqlite::Result<ModuleRecord> {
    Ok(ModuleRecord {
        file: RepoFile::new(row.get::<_, String>(0)?, row.get::<_, String>(2)?),
        module_name: row.get(1)?,
        content_hash: row.get(3)?,
    })
}

fn kind_from_row(row: &Row, idx: usize) -> rusqlite::Result<SymbolKind> {
    let raw: String = row.get(idx)?;
    SymbolKind::from_str(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown symbol kind: {}", raw).into(),
        )
    })
}

/// Escape LIKE wildcards so the query is matched literally
fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for ch in query.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn seed(db: &IndexDatabase) {
        let repos = vec![Repository::new("meridian", "/tmp/meridian")];
        db.rebuild(&repos, |w| {
            let file = RepoFile::new("meridian", "pkg/util_mod.py");
            w.insert_module(&ModuleRecord {
                file: file.clone(),
                module_name: "pkg.util_mod".to_string(),
                content_hash: "abc".to_string(),
            })?;
            w.insert_symbol(&SymbolRecord {
                file: file.clone(),
                name: "LoadConfig".to_string(),
                kind: SymbolKind::Class,
                line: 3,
                docstring: "Reads settings from disk.".to_string(),
            })?;
            w.insert_symbol(&SymbolRecord {
                file: file.clone(),
                name: "fetch".to_string(),
                kind: SymbolKind::AsyncFunction,
                line: 10,
                docstring: String::new(),
            })?;
            w.insert_import(&RawImport {
                file,
                imported_module: "..shared".to_string(),
            })?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_create_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("index.sqlite");

        let db = IndexDatabase::new(&db_path).unwrap();
        seed(&db);
        assert!(db_path.exists());
    }

    #[test]
    fn test_open_requires_build() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("index.sqlite");
        assert!(matches!(
            IndexDatabase::open(&db_path),
            Err(PilotError::IndexNotBuilt(_))
        ));

        seed(&IndexDatabase::new(&db_path).unwrap());
        assert!(IndexDatabase::open(&db_path).is_ok());
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let dir = tempdir().unwrap();
        let db = IndexDatabase::new(dir.path().join("index.sqlite")).unwrap();
        seed(&db);

        let hits = db.search("loadconfig", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].symbol, "LoadConfig");
        assert_eq!(hits[0].kind, SymbolKind::Class);
        assert_eq!(hits[0].line, 3);

        // docstring and path matches
        assert_eq!(db.search("SETTINGS", 10).unwrap().len(), 1);
        assert_eq!(db.search("util_mod", 10).unwrap().len(), 2);
        assert_eq!(db.search("util_mod", 1).unwrap().len(), 1);
    }

    #[test]
    fn test_search_escapes_wildcards() {
        let dir = tempdir().unwrap();
        let db = IndexDatabase::new(dir.path().join("index.sqlite")).unwrap();
        seed(&db);

        assert!(db.search("%", 10).unwrap().is_empty());
        assert!(db.search("util%mod", 10).unwrap().is_empty());
    }

    #[test]
    fn test_modules_matching_prefix() {
        let dir = tempdir().unwrap();
        let db = IndexDatabase::new(dir.path().join("index.sqlite")).unwrap();
        seed(&db);

        assert_eq!(db.modules_matching("meridian", "pkg").unwrap().len(), 1);
        assert_eq!(db.modules_matching("meridian", "pkg.util_mod").unwrap().len(), 1);
        // a prefix that is not a whole segment does not match
        assert!(db.modules_matching("meridian", "pkg.util").unwrap().is_empty());
        assert!(db.modules_matching("other", "pkg").unwrap().is_empty());
    }

    #[test]
    fn test_stats() {
        let dir = tempdir().unwrap();
        let db = IndexDatabase::new(dir.path().join("index.sqlite")).unwrap();
        seed(&db);

        let stats = db.get_stats().unwrap();
        assert_eq!(stats.total_modules(), 1);
        assert_eq!(stats.total_symbols(), 2);
        assert_eq!(stats.total_imports(), 1);
        assert!(stats.built_at.is_some());
    }

    #[test]
    fn test_failed_rebuild_keeps_previous_index() {
        let dir = tempdir().unwrap();
        let db = IndexDatabase::new(dir.path().join("index.sqlite")).unwrap();
        seed(&db);

        let result: Result<()> = db.rebuild(&[], |_| Err(PilotError::Config("boom".to_string())));
        assert!(result.is_err());
        assert_eq!(db.modules().unwrap().len(), 1);
    }
}
