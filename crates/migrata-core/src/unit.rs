use async_trait::async_trait;
use migrata_common::{Direction, Error, Result};
use migrata_db::Executor;
use tracing::debug;

/// Marks the start of the SQL run by `apply`.
pub const APPLY_MARKER: &str = "-- migrate:apply";
/// Marks the start of the SQL run by `revert`.
pub const REVERT_MARKER: &str = "-- migrate:revert";

/// Body written by `create`: both operations present and empty.
pub const UNIT_TEMPLATE: &str = "-- migrate:apply\n\n-- migrate:revert\n\n";

/// One versioned schema change with paired apply and revert operations.
#[async_trait]
pub trait MigrationUnit: Send + Sync {
    fn identifier(&self) -> &str;

    async fn apply(&self, db: &dyn Executor) -> Result<()>;

    async fn revert(&self, db: &dyn Executor) -> Result<()>;
}

/// A unit whose operations are plain SQL scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlUnit {
    identifier: String,
    apply_sql: String,
    revert_sql: String,
}

impl SqlUnit {
    pub fn new(
        identifier: impl Into<String>,
        apply_sql: impl Into<String>,
        revert_sql: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            apply_sql: apply_sql.into(),
            revert_sql: revert_sql.into(),
        }
    }

    /// Split a unit file into its apply and revert sections.
    ///
    /// Text before the first marker is ignored. Each marker must appear
    /// exactly once.
    pub fn parse(identifier: &str, source: &str) -> Result<Self> {
        let mut apply: Option<String> = None;
        let mut revert: Option<String> = None;
        let mut current: Option<Direction> = None;

        for line in source.lines() {
            let marker = match line.trim() {
                APPLY_MARKER => Some(Direction::Apply),
                REVERT_MARKER => Some(Direction::Revert),
                _ => None,
            };

            if let Some(direction) = marker {
                let slot = match direction {
                    Direction::Apply => &mut apply,
                    Direction::Revert => &mut revert,
                };
                if slot.is_some() {
                    return Err(Error::Load {
                        identifier: identifier.to_string(),
                        reason: format!("duplicate {direction} section"),
                    });
                }
                *slot = Some(String::new());
                current = Some(direction);
                continue;
            }

            let section = match current {
                Some(Direction::Apply) => apply.as_mut(),
                Some(Direction::Revert) => revert.as_mut(),
                None => None,
            };
            if let Some(section) = section {
                section.push_str(line);
                section.push('\n');
            }
        }

        let missing = |operation| Error::MissingExport {
            identifier: identifier.to_string(),
            operation,
        };
        let apply_sql = apply.ok_or_else(|| missing(Direction::Apply))?;
        let revert_sql = revert.ok_or_else(|| missing(Direction::Revert))?;

        Ok(Self {
            identifier: identifier.to_string(),
            apply_sql,
            revert_sql,
        })
    }

    pub fn sql(&self, direction: Direction) -> &str {
        match direction {
            Direction::Apply => &self.apply_sql,
            Direction::Revert => &self.revert_sql,
        }
    }

    async fn run(&self, db: &dyn Executor, direction: Direction) -> Result<()> {
        let sql = self.sql(direction);
        if sql.trim().is_empty() {
            debug!("{} has an empty {direction} section", self.identifier);
            return Ok(());
        }
        db.execute_batch(sql).await
    }
}

#[async_trait]
impl MigrationUnit for SqlUnit {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn apply(&self, db: &dyn Executor) -> Result<()> {
        self.run(db, Direction::Apply).await
    }

    async fn revert(&self, db: &dyn Executor) -> Result<()> {
        self.run(db, Direction::Revert).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migrata_db::SqliteExecutor;

    const USERS: &str = "\
-- users table
-- migrate:apply
CREATE TABLE users (id INTEGER PRIMARY KEY);
CREATE INDEX idx_users ON users(id);

-- migrate:revert
DROP TABLE users;
";

    #[test]
    fn parses_both_sections() {
        let unit = SqlUnit::parse("20240101000000-users.sql", USERS).unwrap();
        assert_eq!(unit.identifier(), "20240101000000-users.sql");
        assert_eq!(
            unit.sql(Direction::Apply),
            "CREATE TABLE users (id INTEGER PRIMARY KEY);\nCREATE INDEX idx_users ON users(id);\n\n"
        );
        assert_eq!(unit.sql(Direction::Revert), "DROP TABLE users;\n");
    }

    #[test]
    fn template_parses_to_empty_operations() {
        let unit = SqlUnit::parse("t.sql", UNIT_TEMPLATE).unwrap();
        assert!(unit.sql(Direction::Apply).trim().is_empty());
        assert!(unit.sql(Direction::Revert).trim().is_empty());
    }

    #[test]
    fn missing_sections_name_the_operation() {
        let err = SqlUnit::parse("a.sql", "-- migrate:apply\nSELECT 1;\n").unwrap_err();
        match err {
            Error::MissingExport { identifier, operation } => {
                assert_eq!(identifier, "a.sql");
                assert_eq!(operation, Direction::Revert);
            }
            other => panic!("expected MissingExport, got {other}"),
        }

        let err = SqlUnit::parse("b.sql", "-- migrate:revert\n").unwrap_err();
        assert!(matches!(
            err,
            Error::MissingExport {
                operation: Direction::Apply,
                ..
            }
        ));
    }

    #[test]
    fn duplicate_sections_fail_to_load() {
        let source = "-- migrate:apply\n-- migrate:revert\n-- migrate:apply\n";
        let err = SqlUnit::parse("c.sql", source).unwrap_err();
        assert!(matches!(err, Error::Load { .. }), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn apply_and_revert_run_their_sections() {
        let db = SqliteExecutor::in_memory().unwrap();
        let unit = SqlUnit::parse("users.sql", USERS).unwrap();

        unit.apply(&db).await.unwrap();
        let rows = db
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'users'",
                &[],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        unit.revert(&db).await.unwrap();
        let rows = db
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'users'",
                &[],
            )
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn empty_sections_are_no_ops() {
        let db = SqliteExecutor::in_memory().unwrap();
        let unit = SqlUnit::new("noop", "  \n", "");
        unit.apply(&db).await.unwrap();
        unit.revert(&db).await.unwrap();
    }
}
