use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use migrata_common::{Error, Result};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::identifier::allocate;
use crate::slug::normalize;
use crate::unit::{MigrationUnit, SqlUnit, UNIT_TEMPLATE};

/// Extension of unit files in a [`MigrationDir`].
pub const UNIT_EXTENSION: &str = "sql";

/// Where migration units come from.
///
/// Identifiers returned by `list` are exactly the strings recorded in the
/// ledger, so both sides must agree on them byte for byte.
#[async_trait]
pub trait UnitSource: Send + Sync {
    /// Make sure the backing storage exists. Called before every run.
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// All local unit identifiers, ascending by byte-wise comparison.
    async fn list(&self) -> Result<Vec<String>>;

    async fn load(&self, identifier: &str) -> Result<Arc<dyn MigrationUnit>>;

    async fn exists(&self, identifier: &str) -> Result<bool>;
}

/// A directory with one `<identifier>.sql` file per unit.
pub struct MigrationDir {
    dir: PathBuf,
}

impl MigrationDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Write a new unit from the blank template and return its file name.
    pub async fn create(&self, raw_name: &str, now: DateTime<Utc>) -> Result<String> {
        let slug = normalize(raw_name)?;
        let existing: BTreeSet<String> = self
            .list()
            .await?
            .into_iter()
            .map(|filename| strip_extension(&filename).to_string())
            .collect();
        let identifier = allocate(&slug, now, &existing)?;
        let filename = format!("{identifier}.{UNIT_EXTENSION}");

        let path = self.dir.join(&filename);
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::DuplicateIdentifier(identifier));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(UNIT_TEMPLATE.as_bytes()).await?;
        file.flush().await?;

        info!("created migration {}", path.display());
        Ok(filename)
    }
}

fn strip_extension(filename: &str) -> &str {
    filename
        .strip_suffix(UNIT_EXTENSION)
        .and_then(|f| f.strip_suffix('.'))
        .unwrap_or(filename)
}

fn is_unit_file(filename: &str) -> bool {
    !filename.starts_with('.') && strip_extension(filename).len() < filename.len()
}

#[async_trait]
impl UnitSource for MigrationDir {
    async fn prepare(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("failed to create {}: {e}", self.dir.display()),
            ))
        })
    }

    async fn list(&self) -> Result<Vec<String>> {
        self.prepare().await?;

        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut identifiers = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            // Follows symlinks so listing agrees with `load` and `exists`.
            let is_file = match tokio::fs::metadata(entry.path()).await {
                Ok(meta) => meta.is_file(),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!("skipping dangling link {}", entry.path().display());
                    false
                }
                Err(e) => return Err(e.into()),
            };
            if !is_file {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                debug!("skipping non UTF-8 file name in {}", self.dir.display());
                continue;
            };
            if is_unit_file(&name) {
                identifiers.push(name);
            }
        }
        identifiers.sort();
        Ok(identifiers)
    }

    async fn load(&self, identifier: &str) -> Result<Arc<dyn MigrationUnit>> {
        let path = self.dir.join(identifier);
        let source = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::Load {
                identifier: identifier.to_string(),
                reason: format!("failed to read {}: {e}", path.display()),
            })?;
        Ok(Arc::new(SqlUnit::parse(identifier, &source)?))
    }

    async fn exists(&self, identifier: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.dir.join(identifier)).await?)
    }
}

/// Units compiled into the binary, keyed by identifier.
#[derive(Default)]
pub struct UnitRegistry {
    units: BTreeMap<String, Arc<dyn MigrationUnit>>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, unit: impl MigrationUnit + 'static) -> Result<()> {
        let identifier = unit.identifier().to_string();
        if self.units.contains_key(&identifier) {
            return Err(Error::DuplicateIdentifier(identifier));
        }
        self.units.insert(identifier, Arc::new(unit));
        Ok(())
    }

    /// Chainable form of [`UnitRegistry::register`].
    pub fn with(mut self, unit: impl MigrationUnit + 'static) -> Result<Self> {
        self.register(unit)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

#[async_trait]
impl UnitSource for UnitRegistry {
    async fn list(&self) -> Result<Vec<String>> {
        // BTreeMap keys are already in byte-wise order.
        Ok(self.units.keys().cloned().collect())
    }

    async fn load(&self, identifier: &str) -> Result<Arc<dyn MigrationUnit>> {
        self.units
            .get(identifier)
            .cloned()
            .ok_or_else(|| Error::Load {
                identifier: identifier.to_string(),
                reason: "not present in the unit registry".to_string(),
            })
    }

    async fn exists(&self, identifier: &str) -> Result<bool> {
        Ok(self.units.contains_key(identifier))
    }
}
