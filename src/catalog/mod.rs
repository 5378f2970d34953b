// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Catalog of organized PLR files, so later scans recognise them

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::classifier::{ClassificationResult, QualityRating};
use crate::organize::OrganizeAction;
use crate::{CuratorError, Result};

/// Catalog database (thread-safe wrapper)
#[derive(Clone)]
pub struct Catalog {
    conn: Arc<Mutex<Connection>>,
}

/// An organized file and the detection metadata that placed it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
    pub file_hash: String,
    pub niche: Option<String>,
    pub sub_niche: Option<String>,
    pub license_type: String,
    pub content_type: String,
    pub quality_rating: QualityRating,
    pub confidence: f64,
    pub tags: BTreeSet<String>,
    pub action: OrganizeAction,
    pub organized_at: DateTime<Utc>,
}

impl CatalogEntry {
    pub fn new(
        result: &ClassificationResult,
        destination: &Path,
        file_hash: String,
        action: OrganizeAction,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_path: result.file_path.clone(),
            destination_path: destination.to_path_buf(),
            file_hash,
            niche: result.niche.clone(),
            sub_niche: result.sub_niche.clone(),
            license_type: result.license_type.clone(),
            content_type: result.content_type.clone(),
            quality_rating: result.quality_rating,
            confidence: result.confidence,
            tags: result.tags.clone(),
            action,
            organized_at: Utc::now(),
        }
    }
}

/// Catalog statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub file_count: i64,
    pub niche_count: i64,
    pub niches: Vec<(String, i64)>,
}

const SELECT_COLUMNS: &str = "id, source_path, destination_path, file_hash, niche, sub_niche, \
     license_type, content_type, quality, confidence, tags, action, organized_at";

impl Catalog {
    /// Open or create the catalog
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let catalog = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        catalog.initialize()?;
        Ok(catalog)
    }

    /// Open an in-memory catalog (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let catalog = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        catalog.initialize()?;
        Ok(catalog)
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CuratorError::Persistence("Catalog lock poisoned".to_string()))
    }

    /// Initialize database schema
    fn initialize(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS organized_files (
                id TEXT PRIMARY KEY,
                source_path TEXT NOT NULL,
                destination_path TEXT NOT NULL,
                file_hash TEXT NOT NULL,
                niche TEXT,
                sub_niche TEXT,
                license_type TEXT NOT NULL DEFAULT '',
                content_type TEXT NOT NULL DEFAULT '',
                quality TEXT NOT NULL DEFAULT 'C',
                confidence REAL DEFAULT 0.0,
                tags TEXT NOT NULL DEFAULT '[]',
                action TEXT NOT NULL,
                organized_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_organized_hash ON organized_files(file_hash);
            CREATE INDEX IF NOT EXISTS idx_organized_destination ON organized_files(destination_path);
            CREATE INDEX IF NOT EXISTS idx_organized_niche ON organized_files(niche);
        "#,
        )?;
        Ok(())
    }

    /// Record an organized file
    pub fn record(&self, entry: &CatalogEntry) -> Result<()> {
        let conn = self.lock_conn()?;
        let tags = serde_json::to_string(&entry.tags)?;

        conn.execute(
            r#"INSERT INTO organized_files
               (id, source_path, destination_path, file_hash, niche, sub_niche, license_type,
                content_type, quality, confidence, tags, action, organized_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"#,
            params![
                entry.id,
                entry.source_path.to_string_lossy(),
                entry.destination_path.to_string_lossy(),
                entry.file_hash,
                entry.niche,
                entry.sub_niche,
                entry.license_type,
                entry.content_type,
                entry.quality_rating.to_string(),
                entry.confidence,
                tags,
                entry.action.to_string(),
                entry.organized_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Whether content with this hash was already organized
    pub fn contains_hash(&self, hash: &str) -> Result<bool> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM organized_files WHERE file_hash = ?1",
            params![hash],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Whether a path is the organized location of a catalogued file
    pub fn contains_destination(&self, path: &Path) -> Result<bool> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM organized_files WHERE destination_path = ?1",
            params![path.to_string_lossy()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Get catalog statistics
    pub fn stats(&self) -> Result<CatalogStats> {
        let conn = self.lock_conn()?;
        let file_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM organized_files", [], |row| row.get(0))?;

        let mut stmt = conn.prepare(
            r#"SELECT COALESCE(niche, 'Uncategorized') AS n, COUNT(*) AS cnt
               FROM organized_files GROUP BY n ORDER BY cnt DESC, n ASC"#,
        )?;
        let niches = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(CatalogStats {
            file_count,
            niche_count: niches.len() as i64,
            niches,
        })
    }

    /// Entries under a niche, newest first
    pub fn by_niche(&self, niche: &str, limit: usize) -> Result<Vec<CatalogEntry>> {
        self.query(
            &format!(
                "SELECT {} FROM organized_files WHERE niche = ?1 ORDER BY organized_at DESC LIMIT ?2",
                SELECT_COLUMNS
            ),
            params![niche, limit as i64],
        )
    }

    /// Search paths, niches and tags
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<CatalogEntry>> {
        let pattern = format!("%{}%", query);
        self.query(
            &format!(
                r#"SELECT {} FROM organized_files
                   WHERE destination_path LIKE ?1 OR source_path LIKE ?1
                      OR niche LIKE ?1 OR sub_niche LIKE ?1 OR tags LIKE ?1
                   ORDER BY organized_at DESC LIMIT ?2"#,
                SELECT_COLUMNS
            ),
            params![pattern, limit as i64],
        )
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<CatalogEntry>> {
        self.query(
            &format!(
                "SELECT {} FROM organized_files ORDER BY organized_at DESC LIMIT ?1",
                SELECT_COLUMNS
            ),
            params![limit as i64],
        )
    }

    fn query(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<CatalogEntry>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(sql)?;
        let entries = stmt
            .query_map(params, entry_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<CatalogEntry> {
    let quality: String = row.get(8)?;
    let tags: String = row.get(10)?;
    let action: String = row.get(11)?;
    let organized_at: String = row.get(12)?;

    Ok(CatalogEntry {
        id: row.get(0)?,
        source_path: PathBuf::from(row.get::<_, String>(1)?),
        destination_path: PathBuf::from(row.get::<_, String>(2)?),
        file_hash: row.get(3)?,
        niche: row.get(4)?,
        sub_niche: row.get(5)?,
        license_type: row.get(6)?,
        content_type: row.get(7)?,
        quality_rating: quality.parse().unwrap_or_default(),
        confidence: row.get(9)?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        action: action.parse().unwrap_or_default(),
        organized_at: DateTime::parse_from_rfc3339(&organized_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

/// Content hash used to recognise already-organized files
pub fn calculate_file_hash(path: &Path) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut file = std::fs::File::open(path)?;
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn result(path: &str, niche: Option<&str>) -> ClassificationResult {
        ClassificationResult {
            file_path: PathBuf::from(path),
            is_plr: true,
            confidence: 0.92,
            content_type: "ebook".to_string(),
            niche: niche.map(String::from),
            sub_niche: None,
            license_type: "PLR".to_string(),
            quality_rating: QualityRating::A,
            tags: ["keto".to_string()].into_iter().collect(),
            reason: String::new(),
        }
    }

    #[test]
    fn test_record_and_lookup() {
        let catalog = Catalog::in_memory().unwrap();
        let entry = CatalogEntry::new(
            &result("/in/keto.pdf", Some("Health")),
            Path::new("/lib/Health/keto.pdf"),
            "abc123".to_string(),
            OrganizeAction::Move,
        );
        catalog.record(&entry).unwrap();

        assert!(catalog.contains_hash("abc123").unwrap());
        assert!(!catalog.contains_hash("zzz").unwrap());
        assert!(catalog.contains_destination(Path::new("/lib/Health/keto.pdf")).unwrap());
        assert!(!catalog.contains_destination(Path::new("/in/keto.pdf")).unwrap());

        let found = catalog.by_niche("Health", 10).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].action, OrganizeAction::Move);
        assert_eq!(found[0].quality_rating, QualityRating::A);
        assert!(found[0].tags.contains("keto"));
    }

    #[test]
    fn test_stats_and_search() {
        let catalog = Catalog::in_memory().unwrap();
        for (path, niche) in [("/in/a.pdf", Some("Health")), ("/in/b.pdf", Some("Health")), ("/in/c.pdf", None)] {
            let dest = PathBuf::from("/lib").join(Path::new(path).file_name().unwrap());
            let entry = CatalogEntry::new(&result(path, niche), &dest, path.to_string(), OrganizeAction::Copy);
            catalog.record(&entry).unwrap();
        }

        let stats = catalog.stats().unwrap();
        assert_eq!(stats.file_count, 3);
        assert_eq!(stats.niche_count, 2);
        assert_eq!(stats.niches[0], ("Health".to_string(), 2));

        assert_eq!(catalog.search("c.pdf", 10).unwrap().len(), 1);
        assert_eq!(catalog.search("keto", 10).unwrap().len(), 3);
        assert_eq!(catalog.recent(2).unwrap().len(), 2);
    }

    #[test]
    fn test_hash_is_content_based() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.pdf");
        let b = dir.path().join("b.pdf");
        std::fs::write(&a, "same bytes").unwrap();
        std::fs::write(&b, "same bytes").unwrap();
        assert_eq!(calculate_file_hash(&a).unwrap(), calculate_file_hash(&b).unwrap());
    }
}
