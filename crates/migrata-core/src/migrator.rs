use std::collections::BTreeMap;
use std::sync::Arc;

use migrata_common::{Direction, Error, Result};
use migrata_db::{Executor, Ledger};
use serde::Serialize;
use tracing::info;

use crate::store::UnitSource;

/// Outcome of [`Migrator::apply_pending`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    /// Batch the units were recorded under, `None` if nothing was pending.
    pub batch: Option<i64>,
    pub applied: Vec<String>,
}

/// Outcome of [`Migrator::revert_latest_batch`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RevertReport {
    /// Batch that was reverted, `None` if the ledger was empty.
    pub batch: Option<i64>,
    pub reverted: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
    Applied,
    Pending,
    /// Recorded in the ledger but absent locally.
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitStatus {
    pub identifier: String,
    pub batch: Option<i64>,
    pub state: UnitState,
}

/// Applies pending units as one new batch and reverts the latest batch.
///
/// Units run strictly one after another. A failing unit stops the run and
/// leaves the ledger entries of earlier units in place.
pub struct Migrator {
    db: Arc<dyn Executor>,
    units: Arc<dyn UnitSource>,
    ledger: Ledger,
}

impl Migrator {
    pub fn new(db: Arc<dyn Executor>, units: Arc<dyn UnitSource>, ledger: Ledger) -> Self {
        Self { db, units, ledger }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    async fn prepare(&self) -> Result<()> {
        self.units.prepare().await?;
        self.ledger.ensure_schema().await
    }

    /// Local identifiers absent from the ledger, ascending.
    pub async fn pending(&self) -> Result<Vec<String>> {
        self.prepare().await?;
        self.unrecorded().await
    }

    async fn unrecorded(&self) -> Result<Vec<String>> {
        let recorded = self.ledger.recorded_identifiers().await?;
        let local = self.units.list().await?;
        Ok(local
            .into_iter()
            .filter(|id| !recorded.contains(id))
            .collect())
    }

    pub async fn apply_pending(&self) -> Result<ApplyReport> {
        self.prepare().await?;
        let batch = self.ledger.next_batch_number().await?;
        let pending = self.unrecorded().await?;

        if pending.is_empty() {
            info!("nothing to apply");
            return Ok(ApplyReport::default());
        }

        info!("applying {} migration(s) as batch {batch}", pending.len());
        let mut applied = Vec::with_capacity(pending.len());
        for identifier in pending {
            let unit = self.units.load(&identifier).await?;
            unit.apply(self.db.as_ref())
                .await
                .map_err(|e| Error::operation(&identifier, Direction::Apply, e))?;
            self.ledger.insert(&identifier, batch).await?;
            info!("applied {identifier}");
            applied.push(identifier);
        }

        Ok(ApplyReport {
            batch: Some(batch),
            applied,
        })
    }

    pub async fn revert_latest_batch(&self) -> Result<RevertReport> {
        self.prepare().await?;
        let Some(batch) = self.ledger.latest_batch_number().await? else {
            info!("nothing to revert");
            return Ok(RevertReport::default());
        };

        let members = self.ledger.latest_batch_members().await?;
        info!("reverting {} migration(s) from batch {batch}", members.len());
        let mut reverted = Vec::with_capacity(members.len());
        for record in members {
            // Recorded units missing locally are a load error, never skipped.
            let unit = self.units.load(&record.filename).await?;
            unit.revert(self.db.as_ref())
                .await
                .map_err(|e| Error::operation(&record.filename, Direction::Revert, e))?;
            self.ledger.delete(record.id).await?;
            info!("reverted {}", record.filename);
            reverted.push(record.filename);
        }

        Ok(RevertReport {
            batch: Some(batch),
            reverted,
        })
    }

    /// Every local unit with its batch, plus recorded units missing locally.
    pub async fn status(&self) -> Result<Vec<UnitStatus>> {
        self.prepare().await?;
        let mut recorded: BTreeMap<String, i64> = self
            .ledger
            .records()
            .await?
            .into_iter()
            .map(|r| (r.filename, r.collection))
            .collect();

        let mut statuses: Vec<UnitStatus> = self
            .units
            .list()
            .await?
            .into_iter()
            .map(|identifier| match recorded.remove(&identifier) {
                Some(batch) => UnitStatus {
                    identifier,
                    batch: Some(batch),
                    state: UnitState::Applied,
                },
                None => UnitStatus {
                    identifier,
                    batch: None,
                    state: UnitState::Pending,
                },
            })
            .collect();

        statuses.extend(recorded.into_iter().map(|(identifier, batch)| UnitStatus {
            identifier,
            batch: Some(batch),
            state: UnitState::Missing,
        }));
        statuses.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        Ok(statuses)
    }
}
