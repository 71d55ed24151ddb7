use std::collections::BTreeSet;
use std::sync::Arc;

use migrata_common::{Error, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::executor::{Executor, Value};

/// Table used when the configuration does not name one.
pub const DEFAULT_LEDGER_TABLE: &str = "_migrations";

/// One applied migration unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerRecord {
    pub id: i64,
    pub filename: String,
    pub collection: i64,
}

/// Persisted record of applied units, grouped into numbered batches
/// ("collections").
///
/// The ledger does not check that a recorded unit still exists locally.
pub struct Ledger {
    db: Arc<dyn Executor>,
    table: String,
}

impl Ledger {
    pub fn new(db: Arc<dyn Executor>, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_table_name(&table)?;
        Ok(Self { db, table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the ledger table if, and only if, the probe reports it absent.
    pub async fn ensure_schema(&self) -> Result<()> {
        let probe = format!("SELECT id FROM {} LIMIT 1", self.table);
        match self.db.query(&probe, &[]).await {
            Ok(_) => Ok(()),
            Err(Error::MissingTable(_)) => {
                info!("creating migration ledger table {}", self.table);
                self.db
                    .execute_batch(&format!(
                        "CREATE TABLE {} (
                            id INTEGER PRIMARY KEY AUTOINCREMENT,
                            filename TEXT NOT NULL,
                            collection INTEGER NOT NULL
                        );",
                        self.table
                    ))
                    .await
            }
            Err(e) => Err(Error::SchemaProbe(e.to_string())),
        }
    }

    /// Every unit identifier ever recorded, regardless of batch.
    pub async fn recorded_identifiers(&self) -> Result<BTreeSet<String>> {
        let rows = self
            .db
            .query(&format!("SELECT filename FROM {}", self.table), &[])
            .await?;
        rows.iter()
            .map(|row| row.get_str(0).map(str::to_string))
            .collect()
    }

    pub async fn next_batch_number(&self) -> Result<i64> {
        Ok(self.latest_batch_number().await?.unwrap_or(0) + 1)
    }

    /// Highest batch number in the ledger, `None` when it is empty.
    pub async fn latest_batch_number(&self) -> Result<Option<i64>> {
        let rows = self
            .db
            .query(&format!("SELECT MAX(collection) FROM {}", self.table), &[])
            .await?;
        match rows.first() {
            Some(row) => row.get_opt_i64(0),
            None => Ok(None),
        }
    }

    /// Members of the latest batch, descending by identifier.
    pub async fn latest_batch_members(&self) -> Result<Vec<LedgerRecord>> {
        let Some(batch) = self.latest_batch_number().await? else {
            return Ok(Vec::new());
        };
        let mut members = self
            .query_records(
                &format!(
                    "SELECT id, filename, collection FROM {} WHERE collection = ?1",
                    self.table
                ),
                &[Value::Integer(batch)],
            )
            .await?;
        // Byte-wise ordering, independent of the database collation.
        members.sort_by(|a, b| b.filename.cmp(&a.filename));
        Ok(members)
    }

    /// All records, ascending by batch then identifier.
    pub async fn records(&self) -> Result<Vec<LedgerRecord>> {
        let mut records = self
            .query_records(
                &format!("SELECT id, filename, collection FROM {}", self.table),
                &[],
            )
            .await?;
        records.sort_by(|a, b| {
            a.collection
                .cmp(&b.collection)
                .then_with(|| a.filename.cmp(&b.filename))
        });
        Ok(records)
    }

    pub async fn insert(&self, filename: &str, collection: i64) -> Result<()> {
        debug!("recording {filename} in batch {collection}");
        self.db
            .execute(
                &format!(
                    "INSERT INTO {} (filename, collection) VALUES (?1, ?2)",
                    self.table
                ),
                &[filename.into(), Value::Integer(collection)],
            )
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        debug!("removing ledger record {id}");
        self.db
            .execute(
                &format!("DELETE FROM {} WHERE id = ?1", self.table),
                &[Value::Integer(id)],
            )
            .await?;
        Ok(())
    }

    async fn query_records(&self, sql: &str, params: &[Value]) -> Result<Vec<LedgerRecord>> {
        let rows = self.db.query(sql, params).await?;
        rows.iter()
            .map(|row| {
                Ok(LedgerRecord {
                    id: row.get_i64(0)?,
                    filename: row.get_str(1)?.to_string(),
                    collection: row.get_i64(2)?,
                })
            })
            .collect()
    }
}

/// The table name is interpolated into SQL, so it must be a bare identifier.
fn validate_table_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::Config(format!(
            "ledger table name {name:?} must match [A-Za-z_][A-Za-z0-9_]*"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteExecutor;
    use async_trait::async_trait;

    use crate::executor::Row;

    async fn ledger() -> Ledger {
        let db: Arc<dyn Executor> = Arc::new(SqliteExecutor::in_memory().unwrap());
        let ledger = Ledger::new(db, DEFAULT_LEDGER_TABLE).unwrap();
        ledger.ensure_schema().await.unwrap();
        ledger
    }

    #[tokio::test]
    async fn empty_ledger_starts_at_batch_one() {
        let ledger = ledger().await;
        assert_eq!(ledger.latest_batch_number().await.unwrap(), None);
        assert_eq!(ledger.next_batch_number().await.unwrap(), 1);
        assert!(ledger.recorded_identifiers().await.unwrap().is_empty());
        assert!(ledger.latest_batch_members().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ensure_schema_is_idempotent() {
        let ledger = ledger().await;
        ledger.insert("a.sql", 1).await.unwrap();
        ledger.ensure_schema().await.unwrap();
        assert_eq!(ledger.records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn batches_are_numbered_from_the_maximum() {
        let ledger = ledger().await;
        ledger.insert("a.sql", 1).await.unwrap();
        ledger.insert("b.sql", 1).await.unwrap();
        ledger.insert("c.sql", 2).await.unwrap();

        assert_eq!(ledger.latest_batch_number().await.unwrap(), Some(2));
        assert_eq!(ledger.next_batch_number().await.unwrap(), 3);

        let recorded = ledger.recorded_identifiers().await.unwrap();
        assert_eq!(
            recorded.into_iter().collect::<Vec<_>>(),
            vec!["a.sql", "b.sql", "c.sql"]
        );
    }

    #[tokio::test]
    async fn latest_batch_members_are_descending() {
        let ledger = ledger().await;
        ledger.insert("20240101000000-a.sql", 1).await.unwrap();
        ledger.insert("20240101000002-c.sql", 2).await.unwrap();
        ledger.insert("20240101000001-b.sql", 2).await.unwrap();
        ledger.insert("20240101000003-d.sql", 2).await.unwrap();

        let members: Vec<_> = ledger
            .latest_batch_members()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.filename)
            .collect();
        assert_eq!(
            members,
            vec![
                "20240101000003-d.sql",
                "20240101000002-c.sql",
                "20240101000001-b.sql"
            ]
        );
    }

    #[tokio::test]
    async fn delete_removes_a_single_record() {
        let ledger = ledger().await;
        ledger.insert("a.sql", 1).await.unwrap();
        ledger.insert("b.sql", 1).await.unwrap();

        let members = ledger.latest_batch_members().await.unwrap();
        ledger.delete(members[0].id).await.unwrap();

        let remaining = ledger.records().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].filename, "a.sql");
    }

    #[test]
    fn rejects_unsafe_table_names() {
        let db: Arc<dyn Executor> = Arc::new(SqliteExecutor::in_memory().unwrap());
        assert!(Ledger::new(Arc::clone(&db), "_migrations").is_ok());
        assert!(Ledger::new(Arc::clone(&db), "schema_v2").is_ok());
        assert!(Ledger::new(Arc::clone(&db), "").is_err());
        assert!(Ledger::new(Arc::clone(&db), "1table").is_err());
        assert!(Ledger::new(db, "t; DROP TABLE users").is_err());
    }

    /// Executor whose every call fails with the configured error.
    struct FailingExecutor(fn() -> Error);

    #[async_trait]
    impl Executor for FailingExecutor {
        async fn execute(&self, _sql: &str, _params: &[Value]) -> Result<u64> {
            Err((self.0)())
        }
        async fn query(&self, _sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
            Err((self.0)())
        }
        async fn execute_batch(&self, _sql: &str) -> Result<()> {
            Err((self.0)())
        }
    }

    #[tokio::test]
    async fn probe_failures_other_than_missing_table_are_fatal() {
        let db: Arc<dyn Executor> = Arc::new(FailingExecutor(|| {
            Error::Database("database is locked".into())
        }));
        let ledger = Ledger::new(db, DEFAULT_LEDGER_TABLE).unwrap();
        let err = ledger.ensure_schema().await.unwrap_err();
        match err {
            Error::SchemaProbe(msg) => assert!(msg.contains("database is locked")),
            other => panic!("expected SchemaProbe, got {other}"),
        }
    }
}
