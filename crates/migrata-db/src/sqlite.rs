use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use migrata_common::{Error, Result};
use migrata_config::DatabaseConfig;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, params_from_iter};
use tracing::{debug, info, warn};

use crate::executor::{Executor, Row, Value};

const REMOTE_SCHEMES: &[&str] = &["libsql://", "http://", "https://", "ws://", "wss://"];

/// Where a database URL points once its scheme has been stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Endpoint {
    Memory,
    File(PathBuf),
}

fn resolve_endpoint(url: &str) -> Result<Endpoint> {
    let url = url.trim();
    if url.is_empty() {
        return Err(Error::Config("database url is not configured".into()));
    }
    if let Some(scheme) = REMOTE_SCHEMES.iter().find(|s| url.starts_with(*s)) {
        return Err(Error::Config(format!(
            "remote endpoints ({scheme}) are not supported by the sqlite executor: {url}"
        )));
    }

    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .or_else(|| url.strip_prefix("file:"))
        .unwrap_or(url);

    if let Some((_, query)) = path.split_once('?') {
        return Err(Error::Config(format!(
            "query parameters ({query}) are not supported for local endpoints: {url}"
        )));
    }

    match path {
        ":memory:" | "" => Ok(Endpoint::Memory),
        p => Ok(Endpoint::File(PathBuf::from(p))),
    }
}

/// [`Executor`] backed by a local SQLite database.
pub struct SqliteExecutor {
    conn: Mutex<Connection>,
}

impl SqliteExecutor {
    /// Build an executor from the three database settings. A missing URL is
    /// reported here rather than when the configuration is loaded.
    pub fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| Error::Config("database url is not configured".into()))?;

        if config.auth_token.is_some() {
            warn!("auth token is ignored for local sqlite endpoint {url}");
        }

        let conn = match resolve_endpoint(url)? {
            Endpoint::Memory => Connection::open_in_memory().map_err(|e| {
                Error::Database(format!("failed to open in-memory database: {e}"))
            })?,
            Endpoint::File(path) => {
                info!("opening database at {}", path.display());
                open_file(&path)?
            }
        };

        if let Some(key) = config.encryption_key.as_deref() {
            apply_encryption_key(&conn, key)?;
        }

        Self::with_connection(conn)
    }

    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening database at {}", db_path.display());
        Self::with_connection(open_file(db_path)?)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("sqlite executor lock poisoned".into()))
    }
}

fn open_file(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Connection::open(path).map_err(|e| {
        Error::Database(format!("failed to open database {}: {e}", path.display()))
    })
}

fn apply_encryption_key(conn: &Connection, key: &str) -> Result<()> {
    conn.pragma_update(None, "key", key)
        .map_err(|e| Error::Database(format!("failed to set encryption key: {e}")))?;

    // Plain SQLite silently accepts `PRAGMA key`; only SQLCipher answers this.
    conn.query_row("PRAGMA cipher_version", [], |row| row.get::<_, String>(0))
        .map_err(|_| {
            Error::Config(
                "an encryption key was supplied but sqlite was built without SQLCipher".into(),
            )
        })?;
    Ok(())
}

/// Map a driver error, keeping "no such table" distinguishable from every
/// other failure.
fn map_err(context: &str, e: rusqlite::Error) -> Error {
    if let rusqlite::Error::SqliteFailure(_, Some(msg)) = &e {
        if let Some(table) = msg.strip_prefix("no such table: ") {
            return Error::MissingTable(table.to_string());
        }
    }
    Error::Database(format!("{context}: {e}"))
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(v) => SqlValue::Integer(*v),
        Value::Real(v) => SqlValue::Real(*v),
        Value::Text(v) => SqlValue::Text(v.clone()),
        Value::Blob(v) => SqlValue::Blob(v.clone()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Integer(v),
        ValueRef::Real(v) => Value::Real(v),
        ValueRef::Text(v) => Value::Text(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => Value::Blob(v.to_vec()),
    }
}

#[async_trait]
impl Executor for SqliteExecutor {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        debug!("execute: {sql}");
        let conn = self.connection()?;
        let affected = conn
            .execute(sql, params_from_iter(params.iter().map(to_sql)))
            .map_err(|e| map_err("failed to execute statement", e))?;
        Ok(affected as u64)
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        debug!("query: {sql}");
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| map_err("failed to prepare query", e))?;
        let columns = stmt.column_count();

        let rows = stmt
            .query_map(params_from_iter(params.iter().map(to_sql)), |row| {
                let mut cells = Vec::with_capacity(columns);
                for idx in 0..columns {
                    cells.push(from_sql(row.get_ref(idx)?));
                }
                Ok(Row(cells))
            })
            .map_err(|e| map_err("failed to run query", e))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| map_err("failed to read row", e))?);
        }
        Ok(out)
    }

    async fn execute_batch(&self, sql: &str) -> Result<()> {
        debug!("execute batch ({} bytes)", sql.len());
        let conn = self.connection()?;
        conn.execute_batch(sql)
            .map_err(|e| map_err("failed to execute batch", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_config(url: Option<&str>) -> DatabaseConfig {
        DatabaseConfig {
            url: url.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn resolves_local_endpoints() {
        assert_eq!(resolve_endpoint(":memory:").unwrap(), Endpoint::Memory);
        assert_eq!(resolve_endpoint("sqlite::memory:").unwrap(), Endpoint::Memory);
        assert_eq!(
            resolve_endpoint("file:data/app.db").unwrap(),
            Endpoint::File(PathBuf::from("data/app.db"))
        );
        assert_eq!(
            resolve_endpoint("sqlite:///tmp/app.db").unwrap(),
            Endpoint::File(PathBuf::from("/tmp/app.db"))
        );
        assert_eq!(
            resolve_endpoint("app.db").unwrap(),
            Endpoint::File(PathBuf::from("app.db"))
        );
    }

    #[test]
    fn rejects_remote_and_missing_endpoints() {
        let err = resolve_endpoint("libsql://db.example.com").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("remote endpoints"));

        let err = SqliteExecutor::connect(&db_config(None)).err().unwrap();
        assert!(err.to_string().contains("database url is not configured"));
    }

    #[test]
    fn rejects_query_strings_on_local_endpoints() {
        for url in ["file:app.db?mode=ro", "sqlite::memory:?cache=shared", "app.db?"] {
            let err = resolve_endpoint(url).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{url} gave {err}");
            assert!(err.to_string().contains("query parameters"));
        }

        let err = SqliteExecutor::connect(&db_config(Some("file:app.db?mode=ro")))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
        assert!(!Path::new("app.db?mode=ro").exists());
        assert!(err.to_string().contains("database url is not configured"));
    }

    #[test]
    fn encryption_key_requires_sqlcipher() {
        let config = DatabaseConfig {
            url: Some(":memory:".into()),
            auth_token: None,
            encryption_key: Some("secret".into()),
        };
        let err = SqliteExecutor::connect(&config).err().unwrap();
        assert!(matches!(err, Error::Config(_)), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn execute_and_query_round_trip() {
        let db = SqliteExecutor::connect(&db_config(Some(":memory:"))).unwrap();
        db.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT NOT NULL);")
            .await
            .unwrap();

        let affected = db
            .execute("INSERT INTO t (name) VALUES (?1)", &["users".into()])
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let rows = db
            .query("SELECT id, name FROM t WHERE name = ?1", &["users".into()])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_i64(0).unwrap(), 1);
        assert_eq!(rows[0].get_str(1).unwrap(), "users");
    }

    #[tokio::test]
    async fn missing_table_is_reported_distinctly() {
        let db = SqliteExecutor::in_memory().unwrap();
        let err = db.query("SELECT id FROM nowhere", &[]).await.unwrap_err();
        match err {
            Error::MissingTable(table) => assert_eq!(table, "nowhere"),
            other => panic!("expected MissingTable, got {other}"),
        }

        let err = db.execute_batch("SELEC broken").await.unwrap_err();
        assert!(matches!(err, Error::Database(_)));
    }

    #[tokio::test]
    async fn open_creates_parent_directories() {
        let root = std::env::temp_dir().join(format!(
            "migrata-sqlite-test-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let path = root.join("nested").join("app.db");
        let db = SqliteExecutor::open(&path).unwrap();
        db.execute_batch("CREATE TABLE t (id INTEGER);").await.unwrap();
        assert!(path.exists());
        drop(db);
        let _ = std::fs::remove_dir_all(&root);
    }
}
