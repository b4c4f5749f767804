//! SQLite verification history
//!
//! One append-only table. A unique index over the verification content
//! makes inserts idempotent: re-verifying the same pair with the same
//! outcome is not a new event worth a row.

use anyhow::{Context, Result};
use chrono::Local;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Verdict stored with each history record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerifyResult {
    Pass,
    Fail,
}

impl VerifyResult {
    /// Stable text form used in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyResult::Pass => "Pass",
            VerifyResult::Fail => "Fail",
        }
    }

    fn from_db(value: &str) -> Self {
        if value == "Pass" {
            VerifyResult::Pass
        } else {
            VerifyResult::Fail
        }
    }
}

impl std::fmt::Display for VerifyResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completed verification cycle; never mutated after creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Local wall-clock time, `%Y-%m-%d %H:%M:%S`
    pub timestamp: String,
    /// Source image or saved snapshot path ("" when none was kept)
    pub image_path: String,
    /// Text read from the label region
    pub sign_text: String,
    /// Text read from the spray-print region
    pub print_text: String,
    /// Normalized similarity in [0, 1]
    pub similarity: f64,
    /// Pass/fail verdict
    pub result: VerifyResult,
}

impl HistoryRecord {
    /// Create a record stamped with the current local time
    pub fn new(
        image_path: impl Into<String>,
        sign_text: impl Into<String>,
        print_text: impl Into<String>,
        similarity: f64,
        result: VerifyResult,
    ) -> Self {
        Self {
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            image_path: image_path.into(),
            sign_text: sign_text.into(),
            print_text: print_text.into(),
            similarity,
            result,
        }
    }
}

/// Verification history database
pub struct HistoryStore {
    conn: Connection,
}

impl HistoryStore {
    /// Open or create the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open history database at {:?}", path))?;
        let store = Self { conn };
        store.init_schema()?;
        info!("History database ready at {:?}", path);
        Ok(store)
    }

    /// Open an in-memory database (tests, dry runs)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS history (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    timestamp TEXT NOT NULL,
                    image_path TEXT NOT NULL,
                    sign_text TEXT,
                    print_text TEXT,
                    similarity REAL,
                    result TEXT
                );
                CREATE UNIQUE INDEX IF NOT EXISTS idx_history_content_unique
                    ON history (sign_text, print_text, similarity, result);",
            )
            .context("failed to initialize history schema")
    }

    /// Insert a record unless an identical verification is already stored
    ///
    /// Returns whether a row was actually written; a duplicate is not an
    /// error.
    pub fn insert_if_absent(&self, record: &HistoryRecord) -> Result<bool> {
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO history
                    (timestamp, image_path, sign_text, print_text, similarity, result)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.timestamp,
                    record.image_path,
                    record.sign_text,
                    record.print_text,
                    record.similarity,
                    record.result.as_str(),
                ],
            )
            .context("failed to insert history record")?;
        Ok(inserted > 0)
    }

    /// Whether a verification with this exact content is already stored
    pub fn exists(
        &self,
        sign_text: &str,
        print_text: &str,
        similarity: f64,
        result: VerifyResult,
    ) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM history
                 WHERE sign_text = ?1 AND print_text = ?2
                   AND similarity = ?3 AND result = ?4
                 LIMIT 1",
                params![sign_text, print_text, similarity, result.as_str()],
                |_| Ok(()),
            )
            .map(|_| true)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(false),
                other => Err(other),
            })
            .context("failed to query history")?;
        Ok(found)
    }

    /// All records, newest first
    pub fn all_records(&self) -> Result<Vec<HistoryRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT timestamp, image_path, sign_text, print_text, similarity, result
             FROM history ORDER BY timestamp DESC, id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(HistoryRecord {
                timestamp: row.get(0)?,
                image_path: row.get(1)?,
                sign_text: row.get(2)?,
                print_text: row.get(3)?,
                similarity: row.get(4)?,
                result: VerifyResult::from_db(&row.get::<_, String>(5)?),
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}
