use async_trait::async_trait;
use migrata_common::{Error, Result};

/// A driver-neutral statement parameter or result cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One result row, cells in select-list order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row(pub Vec<Value>);

impl Row {
    pub fn get(&self, idx: usize) -> Result<&Value> {
        self.0
            .get(idx)
            .ok_or_else(|| Error::Database(format!("column index {idx} out of range")))
    }

    pub fn get_i64(&self, idx: usize) -> Result<i64> {
        match self.get(idx)? {
            Value::Integer(v) => Ok(*v),
            other => Err(Error::Database(format!(
                "column {idx}: expected integer, got {other:?}"
            ))),
        }
    }

    /// Integer cell that may be NULL, as produced by aggregates over empty tables.
    pub fn get_opt_i64(&self, idx: usize) -> Result<Option<i64>> {
        match self.get(idx)? {
            Value::Null => Ok(None),
            Value::Integer(v) => Ok(Some(*v)),
            other => Err(Error::Database(format!(
                "column {idx}: expected integer or null, got {other:?}"
            ))),
        }
    }

    pub fn get_str(&self, idx: usize) -> Result<&str> {
        match self.get(idx)? {
            Value::Text(v) => Ok(v),
            other => Err(Error::Database(format!(
                "column {idx}: expected text, got {other:?}"
            ))),
        }
    }
}

/// Opaque executor of parameterized statements.
///
/// The ledger and every migration unit talk to the database only through this
/// trait, so an executor is constructed once and handed to each of them.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run a single statement, returning the number of affected rows.
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Run a single statement and collect every row it returns.
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Run several `;`-separated statements without parameters.
    async fn execute_batch(&self, sql: &str) -> Result<()>;
}
