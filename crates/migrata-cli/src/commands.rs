use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use migrata_config::MigrataConfig;
use migrata_core::{MigrationDir, Migrator, UnitState};
use migrata_db::{Executor, Ledger, SqliteExecutor};
use tracing::info;

fn migrator(config: &MigrataConfig) -> Result<Migrator> {
    let db: Arc<dyn Executor> = Arc::new(
        SqliteExecutor::connect(&config.database).context("failed to open database")?,
    );
    let ledger = Ledger::new(Arc::clone(&db), config.migrations.table.clone())?;
    let units = Arc::new(MigrationDir::new(config.migrations.dir.clone()));
    Ok(Migrator::new(db, units, ledger))
}

pub async fn create(config: &MigrataConfig, name: &str) -> Result<()> {
    let dir = MigrationDir::new(config.migrations.dir.clone());
    let filename = dir
        .create(name, Utc::now())
        .await
        .with_context(|| format!("failed to create migration {name:?}"))?;
    println!("{filename}");
    Ok(())
}

pub async fn apply(config: &MigrataConfig) -> Result<()> {
    let report = migrator(config)?
        .apply_pending()
        .await
        .context("apply aborted")?;
    if let Some(batch) = report.batch {
        info!("batch {batch} complete: {} applied", report.applied.len());
    }
    Ok(())
}

pub async fn revert(config: &MigrataConfig) -> Result<()> {
    let report = migrator(config)?
        .revert_latest_batch()
        .await
        .context("revert aborted")?;
    if let Some(batch) = report.batch {
        info!("batch {batch} reverted: {} removed", report.reverted.len());
    }
    Ok(())
}

pub async fn status(config: &MigrataConfig, json: bool) -> Result<()> {
    let statuses = migrator(config)?.status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    if statuses.is_empty() {
        println!("no migrations in {}", config.migrations.dir.display());
        return Ok(());
    }
    for s in &statuses {
        let batch = s
            .batch
            .map(|b| format!("batch {b}"))
            .unwrap_or_else(|| "-".to_string());
        let state = match s.state {
            UnitState::Applied => "applied",
            UnitState::Pending => "pending",
            UnitState::Missing => "missing",
        };
        println!("{state:<8} {batch:<10} {}", s.identifier);
    }
    Ok(())
}
