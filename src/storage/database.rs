//! SQLite-backed reference store

use rusqlite::{Connection, OpenFlags, Row};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use super::{ReferenceRecord, ReferenceStore, StoreError};
use crate::analysis::normalize::TextNormalizer;
use crate::config::StoreSettings;

/// Read-only SQLite reference store.
///
/// A connection is opened for each query and dropped before the call
/// returns, whether the query succeeded, matched nothing or failed.
pub struct SqliteStore {
    path: PathBuf,
    table: String,
    busy_timeout: Duration,
    normalizer: TextNormalizer,
}

impl SqliteStore {
    /// Create a store for the configured database. No connection is made yet.
    pub fn new(settings: &StoreSettings, normalizer: TextNormalizer) -> Result<Self, StoreError> {
        if !is_valid_table_name(&settings.table) {
            return Err(StoreError::Query(format!(
                "invalid table name '{}'",
                settings.table
            )));
        }

        Ok(Self {
            path: settings.path.clone(),
            table: settings.table.clone(),
            busy_timeout: Duration::from_millis(settings.busy_timeout_ms),
            normalizer,
        })
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| StoreError::Unavailable(format!("{}: {}", self.path.display(), e)))?;

        conn.busy_timeout(self.busy_timeout)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(conn)
    }

    /// Run a record query, skipping rows that cannot be adapted
    fn query_records(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<ReferenceRecord>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let rows = stmt
            .query_map(params, |row| Ok(read_columns(row)))
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut records = Vec::new();
        let mut skipped = 0usize;
        for (index, row) in rows.enumerate() {
            let columns = row.map_err(|e| StoreError::Query(e.to_string()))?;
            match columns.and_then(|c| self.adapt(c)) {
                Some(record) => records.push(record),
                None => {
                    skipped += 1;
                    warn!("Skipping malformed record at row {} of '{}'", index, self.table);
                }
            }
        }

        debug!(
            "Loaded {} records from '{}' ({} skipped)",
            records.len(),
            self.table,
            skipped
        );
        Ok(records)
    }

    fn adapt(&self, (plate, province, owner): (String, String, String)) -> Option<ReferenceRecord> {
        let identifier = self.normalizer.normalize(&plate);
        if identifier.is_empty() {
            return None;
        }
        let region = self.normalizer.normalize(&province);
        Some(ReferenceRecord::new(identifier, region, owner.trim()))
    }
}

impl ReferenceStore for SqliteStore {
    fn all_records(&self) -> Result<Vec<ReferenceRecord>, StoreError> {
        let sql = format!(
            "SELECT plate_number, province, owner_name FROM {} ORDER BY rowid",
            self.table
        );
        self.query_records(&sql, &[])
    }
}

/// Read the three record columns as text; `None` when any is NULL or not text
fn read_columns(row: &Row<'_>) -> Option<(String, String, String)> {
    let plate = row.get::<_, String>(0).ok()?;
    let province = row.get::<_, String>(1).ok()?;
    let owner = row.get::<_, String>(2).ok()?;
    Some((plate, province, owner))
}

fn is_valid_table_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}
