//! SQL migration runner.
//!
//! Migrations are plain SQL files named `m{YYYYMMDDHHMMSS}_{name}.sql`,
//! applied in version order, each inside its own transaction. Applied
//! versions and their content checksums are recorded in the
//! `pitcrew_migrations` state table; a sentinel row doubles as a
//! cross-process lock so only one instance runs migrations at startup.

use crate::error::WorkshopError;
use crate::executor::{ClientExecutor, Executor};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const LOCK_VERSION: i64 = -1;
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

static FILENAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^m(\d{14})_(.+)\.sql$").expect("migration filename regex"));

#[derive(Debug)]
pub enum MigrationError {
    /// File name does not match `m{YYYYMMDDHHMMSS}_{name}.sql`
    InvalidFilename(String),
    /// An applied migration's file content changed after the fact
    ChecksumMismatch {
        version: i64,
        stored: String,
        current: String,
    },
    /// Could not acquire the migration lock in time
    LockTimeout(String),
    Io(String),
    Database(WorkshopError),
}

impl fmt::Display for MigrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationError::InvalidFilename(name) => write!(
                f,
                "migration file '{name}' does not match m{{YYYYMMDDHHMMSS}}_{{name}}.sql"
            ),
            MigrationError::ChecksumMismatch {
                version,
                stored,
                current,
            } => write!(
                f,
                "checksum mismatch for migration {version}: stored={stored}, current={current}"
            ),
            MigrationError::LockTimeout(msg) => write!(f, "migration lock timeout: {msg}"),
            MigrationError::Io(msg) => write!(f, "migration io error: {msg}"),
            MigrationError::Database(err) => write!(f, "migration database error: {err}"),
        }
    }
}

impl std::error::Error for MigrationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MigrationError::Database(err) => Some(err),
            _ => None,
        }
    }
}

impl From<WorkshopError> for MigrationError {
    fn from(err: WorkshopError) -> Self {
        MigrationError::Database(err)
    }
}

/// A discovered migration file
#[derive(Debug, Clone)]
pub struct MigrationFile {
    pub path: PathBuf,
    /// Timestamp version, `YYYYMMDDHHMMSS`
    pub version: i64,
    pub name: String,
    /// SHA-256 of the file content, hex
    pub checksum: String,
}

impl MigrationFile {
    /// Parse a migration file name into its version and name parts
    pub fn parse_filename(filename: &str) -> Result<(i64, String), MigrationError> {
        let caps = FILENAME_RE
            .captures(filename)
            .ok_or_else(|| MigrationError::InvalidFilename(filename.to_string()))?;
        let version = caps[1]
            .parse::<i64>()
            .map_err(|_| MigrationError::InvalidFilename(filename.to_string()))?;
        Ok((version, caps[2].to_string()))
    }
}

/// SHA-256 of migration content, hex-encoded
pub fn content_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Scan a directory for migration files, sorted by version ascending.
///
/// Non-SQL files are skipped; an SQL file that does not match the naming
/// pattern is an error rather than silently ignored.
pub fn discover_migrations(dir: &Path) -> Result<Vec<MigrationFile>, MigrationError> {
    let entries =
        fs::read_dir(dir).map_err(|e| MigrationError::Io(format!("{}: {e}", dir.display())))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| MigrationError::Io(e.to_string()))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("sql") {
            continue;
        }
        let filename = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => continue,
        };
        let (version, name) = MigrationFile::parse_filename(filename)?;
        let content = fs::read_to_string(&path)
            .map_err(|e| MigrationError::Io(format!("{}: {e}", path.display())))?;
        files.push(MigrationFile {
            path,
            version,
            name,
            checksum: content_checksum(&content),
        });
    }

    files.sort_by_key(|f| f.version);
    Ok(files)
}

fn initialize_state_table(db: &ClientExecutor) -> Result<(), MigrationError> {
    db.execute(
        "CREATE TABLE IF NOT EXISTS pitcrew_migrations ( \
             version BIGINT PRIMARY KEY, \
             name VARCHAR(255) NOT NULL, \
             checksum VARCHAR(64) NOT NULL, \
             applied_at TIMESTAMPTZ NOT NULL DEFAULT now(), \
             execution_time_ms INTEGER, \
             success BOOLEAN NOT NULL DEFAULT true \
         )",
        &[],
    )?;
    Ok(())
}

/// Acquire the migration lock by inserting the sentinel row.
///
/// The PRIMARY KEY constraint makes the insert atomic across processes;
/// losers poll until the holder deletes the row or the timeout passes.
fn acquire_lock(db: &ClientExecutor, timeout: Duration) -> Result<(), MigrationError> {
    let start = Instant::now();
    loop {
        if start.elapsed() >= timeout {
            return Err(MigrationError::LockTimeout(format!(
                "could not acquire migration lock within {}s; another instance may be \
                 migrating, or a stale lock row (version = {LOCK_VERSION}) needs removal",
                timeout.as_secs()
            )));
        }

        let inserted = db.execute(
            "INSERT INTO pitcrew_migrations (version, name, checksum, applied_at, success) \
             VALUES ($1, 'LOCK', 'lock', now(), true) \
             ON CONFLICT (version) DO NOTHING",
            &[&LOCK_VERSION],
        )?;
        if inserted > 0 {
            return Ok(());
        }

        std::thread::sleep(LOCK_POLL_INTERVAL);
    }
}

fn release_lock(db: &ClientExecutor) {
    if let Err(e) = db.execute(
        "DELETE FROM pitcrew_migrations WHERE version = $1",
        &[&LOCK_VERSION],
    ) {
        log::error!("failed to release migration lock: {e}");
    }
}

fn applied_checksums(db: &ClientExecutor) -> Result<HashMap<i64, String>, MigrationError> {
    let rows = db.query_all(
        "SELECT version, checksum FROM pitcrew_migrations WHERE version > 0 ORDER BY version",
        &[],
    )?;
    Ok(rows
        .iter()
        .map(|row| (row.get("version"), row.get("checksum")))
        .collect())
}

/// Verify that every already-applied migration's file still hashes to the
/// checksum recorded when it was applied.
pub fn validate_checksums(
    db: &ClientExecutor,
    files: &[MigrationFile],
) -> Result<(), MigrationError> {
    let applied = applied_checksums(db)?;
    for file in files {
        if let Some(stored) = applied.get(&file.version) {
            if *stored != file.checksum {
                return Err(MigrationError::ChecksumMismatch {
                    version: file.version,
                    stored: stored.clone(),
                    current: file.checksum.clone(),
                });
            }
        }
    }
    Ok(())
}

fn apply_one(db: &ClientExecutor, file: &MigrationFile) -> Result<(), MigrationError> {
    let content = fs::read_to_string(&file.path)
        .map_err(|e| MigrationError::Io(format!("{}: {e}", file.path.display())))?;

    let started = Instant::now();
    let tx = db.begin()?;
    let result = tx
        .batch_execute(&content)
        .and_then(|_| {
            let elapsed_ms = i32::try_from(started.elapsed().as_millis()).unwrap_or(i32::MAX);
            tx.execute(
                "INSERT INTO pitcrew_migrations (version, name, checksum, applied_at, execution_time_ms, success) \
                 VALUES ($1, $2, $3, now(), $4, true)",
                &[&file.version, &file.name, &file.checksum, &elapsed_ms],
            )
            .map(|_| ())
        });

    match result {
        Ok(()) => {
            tx.commit()?;
            log::info!(
                "applied migration {} ({}) in {}ms",
                file.version,
                file.name,
                started.elapsed().as_millis()
            );
            Ok(())
        }
        Err(err) => {
            if let Err(rb) = tx.rollback() {
                log::warn!("rollback failed after migration {}: {rb}", file.version);
            }
            Err(MigrationError::Database(err))
        }
    }
}

fn apply_pending(db: &ClientExecutor, files: &[MigrationFile]) -> Result<usize, MigrationError> {
    let applied = applied_checksums(db)?;
    let mut count = 0;
    for file in files {
        if applied.contains_key(&file.version) {
            continue;
        }
        apply_one(db, file)?;
        count += 1;
    }
    Ok(count)
}

/// Run migrations at application startup.
///
/// Creates the state table, takes the cross-process lock, validates the
/// checksums of everything already applied, then applies pending migrations
/// in version order. Fails fast: if any step errors the application should
/// not come up.
pub fn startup_migrations(
    db: &ClientExecutor,
    migrations_dir: impl AsRef<Path>,
    lock_timeout: Option<Duration>,
) -> Result<usize, MigrationError> {
    let files = discover_migrations(migrations_dir.as_ref())?;
    initialize_state_table(db)?;
    acquire_lock(db, lock_timeout.unwrap_or(DEFAULT_LOCK_TIMEOUT))?;

    let result = validate_checksums(db, &files).and_then(|_| apply_pending(db, &files));
    release_lock(db);

    match &result {
        Ok(0) => log::debug!("no pending migrations"),
        Ok(n) => log::info!("applied {n} migration(s) on startup"),
        Err(e) => log::error!("startup migrations failed: {e}"),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filename() {
        let (version, name) =
            MigrationFile::parse_filename("m20260101000000_workshop_schema.sql").unwrap();
        assert_eq!(version, 20260101000000);
        assert_eq!(name, "workshop_schema");
    }

    #[test]
    fn test_parse_filename_rejects_bad_names() {
        assert!(MigrationFile::parse_filename("workshop_schema.sql").is_err());
        assert!(MigrationFile::parse_filename("m2026_short_version.sql").is_err());
        assert!(MigrationFile::parse_filename("m20260101000000_schema.rs").is_err());
        assert!(MigrationFile::parse_filename("m20260101000000_.sql").is_err());
    }

    #[test]
    fn test_checksum_is_stable_and_content_sensitive() {
        let a = content_checksum("create table t (id int);");
        let b = content_checksum("create table t (id int);");
        let c = content_checksum("create table t (id bigint);");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_lock_version_is_below_any_real_version() {
        let (version, _) = MigrationFile::parse_filename("m00000000000001_x.sql").unwrap();
        assert!(LOCK_VERSION < version);
    }
}
