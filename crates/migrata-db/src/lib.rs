pub mod executor;
pub mod ledger;
pub mod sqlite;

pub use executor::{Executor, Row, Value};
pub use ledger::{DEFAULT_LEDGER_TABLE, Ledger, LedgerRecord};
pub use sqlite::SqliteExecutor;
