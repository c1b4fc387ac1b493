//! Audit log persistence
//!
//! The log is append-only. The only in-place changes are the one-way
//! anonymization transition and archival of records older than the
//! retention window.

use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::audit::{AuditFilter, AuditLogRecord, SortOrder};
use crate::error::{AuditError, AuditResult};

use super::file_io::{append_lines, read_lines, write_lines_atomic};

/// Which records an anonymization pass applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnonymizeTarget {
    /// Every record about the entity with this id
    Entity(String),
    /// Every record written by this actor
    Actor(String),
}

impl AnonymizeTarget {
    fn matches(&self, record: &AuditLogRecord) -> bool {
        match self {
            AnonymizeTarget::Entity(id) => record.entity_id == *id,
            AnonymizeTarget::Actor(id) => record.actor_id.as_deref() == Some(id.as_str()),
        }
    }
}

/// Outcome of an archival pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveReport {
    pub archived: usize,
    pub remaining: usize,
    /// Where archived records were written, if any were
    pub archive_path: Option<PathBuf>,
}

/// Persistent, append-only store of audit log records
pub trait AuditLogStore: Send + Sync + fmt::Debug {
    /// Persist several records in one write
    fn insert_many(&self, records: &[AuditLogRecord]) -> AuditResult<()>;

    /// Persist a single record
    fn insert_one(&self, record: &AuditLogRecord) -> AuditResult<()>;

    /// Records matching the filter, ordered per the filter
    fn query(&self, filter: &AuditFilter, limit: Option<usize>) -> AuditResult<Vec<AuditLogRecord>>;

    /// Number of records matching the filter
    fn count(&self, filter: &AuditFilter) -> AuditResult<usize>;

    /// The newest `window` matching records, oldest first, together with
    /// the total number of matches. Both come from the same read.
    fn recent_window(
        &self,
        filter: &AuditFilter,
        window: usize,
    ) -> AuditResult<(Vec<AuditLogRecord>, usize)>;

    /// Anonymize matching records, returning how many changed
    fn anonymize(&self, target: &AnonymizeTarget) -> AuditResult<usize>;

    /// Move records stamped before `cutoff` out of the live log
    fn archive_before(&self, cutoff: DateTime<Utc>) -> AuditResult<ArchiveReport>;
}

fn lock_err<E: fmt::Display>(e: E) -> AuditError {
    AuditError::Storage(format!("Failed to acquire audit log lock: {}", e))
}

fn window_of(
    records: &[AuditLogRecord],
    filter: &AuditFilter,
    window: usize,
) -> (Vec<AuditLogRecord>, usize) {
    let total = records.iter().filter(|r| filter.matches(r)).count();
    let mut recent = filter
        .clone()
        .order(SortOrder::NewestFirst)
        .apply(records.iter(), Some(window));
    recent.reverse();
    (recent, total)
}

/// JSON-lines audit log on disk
///
/// Each record is one line. A mutex serializes appends and rewrites within
/// the process.
pub struct JsonlAuditLogStore {
    log_path: PathBuf,
    archive_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditLogStore {
    pub fn new(log_path: PathBuf, archive_dir: PathBuf) -> Self {
        Self {
            log_path,
            archive_dir,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.log_path
    }

    pub fn exists(&self) -> bool {
        self.log_path.exists()
    }

    fn read_all(&self) -> AuditResult<Vec<AuditLogRecord>> {
        read_lines(&self.log_path)
    }

    fn archive_file_name(now: DateTime<Utc>) -> String {
        format!("audit-archive-{}.jsonl", now.format("%Y%m%d-%H%M%S-%3f"))
    }
}

impl fmt::Debug for JsonlAuditLogStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonlAuditLogStore")
            .field("log_path", &self.log_path)
            .finish()
    }
}

impl AuditLogStore for JsonlAuditLogStore {
    fn insert_many(&self, records: &[AuditLogRecord]) -> AuditResult<()> {
        let _guard = self.write_lock.lock().map_err(lock_err)?;
        append_lines(&self.log_path, records).map_err(|e| {
            AuditError::Persistence(format!("Failed to write {} audit records: {}", records.len(), e))
        })?;
        debug!(batch = records.len(), "Appended audit records");
        Ok(())
    }

    fn insert_one(&self, record: &AuditLogRecord) -> AuditResult<()> {
        let _guard = self.write_lock.lock().map_err(lock_err)?;
        append_lines(&self.log_path, std::slice::from_ref(record)).map_err(|e| {
            AuditError::Persistence(format!("Failed to write audit record {}: {}", record.id, e))
        })
    }

    fn query(&self, filter: &AuditFilter, limit: Option<usize>) -> AuditResult<Vec<AuditLogRecord>> {
        let _guard = self.write_lock.lock().map_err(lock_err)?;
        let records = self.read_all()?;
        Ok(filter.apply(records.iter(), limit))
    }

    fn count(&self, filter: &AuditFilter) -> AuditResult<usize> {
        let _guard = self.write_lock.lock().map_err(lock_err)?;
        Ok(self.read_all()?.iter().filter(|r| filter.matches(r)).count())
    }

    fn recent_window(
        &self,
        filter: &AuditFilter,
        window: usize,
    ) -> AuditResult<(Vec<AuditLogRecord>, usize)> {
        let _guard = self.write_lock.lock().map_err(lock_err)?;
        Ok(window_of(&self.read_all()?, filter, window))
    }

    fn anonymize(&self, target: &AnonymizeTarget) -> AuditResult<usize> {
        let _guard = self.write_lock.lock().map_err(lock_err)?;
        let mut records = self.read_all()?;

        let changed = records
            .iter_mut()
            .filter(|r| target.matches(r))
            .map(|r| r.anonymize())
            .filter(|changed| *changed)
            .count();

        if changed > 0 {
            write_lines_atomic(&self.log_path, &records)
                .map_err(|e| AuditError::Persistence(format!("Failed to rewrite audit log: {}", e)))?;
            info!(records = changed, target = ?target, "Anonymized audit records");
        }

        Ok(changed)
    }

    fn archive_before(&self, cutoff: DateTime<Utc>) -> AuditResult<ArchiveReport> {
        let _guard = self.write_lock.lock().map_err(lock_err)?;
        let (old, keep): (Vec<_>, Vec<_>) = self
            .read_all()?
            .into_iter()
            .partition(|r| r.timestamp < cutoff);

        if old.is_empty() {
            return Ok(ArchiveReport {
                archived: 0,
                remaining: keep.len(),
                archive_path: None,
            });
        }

        // Archive first so a failed rewrite never loses records
        let archive_path = self.archive_dir.join(Self::archive_file_name(Utc::now()));
        write_lines_atomic(&archive_path, &old)
            .map_err(|e| AuditError::Persistence(format!("Failed to write archive: {}", e)))?;
        write_lines_atomic(&self.log_path, &keep)
            .map_err(|e| AuditError::Persistence(format!("Failed to rewrite audit log: {}", e)))?;

        info!(
            archived = old.len(),
            remaining = keep.len(),
            path = %archive_path.display(),
            "Archived audit records"
        );

        Ok(ArchiveReport {
            archived: old.len(),
            remaining: keep.len(),
            archive_path: Some(archive_path),
        })
    }
}

/// In-memory audit log for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryAuditLogStore {
    records: Mutex<Vec<AuditLogRecord>>,
    archived: Mutex<Vec<AuditLogRecord>>,
}

impl MemoryAuditLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record in insertion order
    pub fn all(&self) -> AuditResult<Vec<AuditLogRecord>> {
        Ok(self.records.lock().map_err(lock_err)?.clone())
    }

    /// Records moved out by archival
    pub fn archived(&self) -> AuditResult<Vec<AuditLogRecord>> {
        Ok(self.archived.lock().map_err(lock_err)?.clone())
    }
}

impl AuditLogStore for MemoryAuditLogStore {
    fn insert_many(&self, records: &[AuditLogRecord]) -> AuditResult<()> {
        self.records
            .lock()
            .map_err(lock_err)?
            .extend_from_slice(records);
        Ok(())
    }

    fn insert_one(&self, record: &AuditLogRecord) -> AuditResult<()> {
        self.records.lock().map_err(lock_err)?.push(record.clone());
        Ok(())
    }

    fn query(&self, filter: &AuditFilter, limit: Option<usize>) -> AuditResult<Vec<AuditLogRecord>> {
        let records = self.records.lock().map_err(lock_err)?;
        Ok(filter.apply(records.iter(), limit))
    }

    fn count(&self, filter: &AuditFilter) -> AuditResult<usize> {
        let records = self.records.lock().map_err(lock_err)?;
        Ok(records.iter().filter(|r| filter.matches(r)).count())
    }

    fn recent_window(
        &self,
        filter: &AuditFilter,
        window: usize,
    ) -> AuditResult<(Vec<AuditLogRecord>, usize)> {
        let records = self.records.lock().map_err(lock_err)?;
        Ok(window_of(&records, filter, window))
    }

    fn anonymize(&self, target: &AnonymizeTarget) -> AuditResult<usize> {
        let mut records = self.records.lock().map_err(lock_err)?;
        Ok(records
            .iter_mut()
            .filter(|r| target.matches(r))
            .map(|r| r.anonymize())
            .filter(|changed| *changed)
            .count())
    }

    fn archive_before(&self, cutoff: DateTime<Utc>) -> AuditResult<ArchiveReport> {
        let mut records = self.records.lock().map_err(lock_err)?;
        let (old, keep): (Vec<_>, Vec<_>) =
            records.drain(..).partition(|r| r.timestamp < cutoff);
        *records = keep;

        let archived = old.len();
        self.archived.lock().map_err(lock_err)?.extend(old);

        Ok(ArchiveReport {
            archived,
            remaining: records.len(),
            archive_path: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{compute_diff, AuditEntry};
    use crate::models::{ActorContext, AuditAction, EntityState, EntityType};
    use chrono::Duration;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_store() -> (JsonlAuditLogStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonlAuditLogStore::new(
            temp_dir.path().join("audit").join("audit.log"),
            temp_dir.path().join("audit").join("archive"),
        );
        (store, temp_dir)
    }

    fn record(id: &str, actor: &str, at: DateTime<Utc>) -> AuditLogRecord {
        let after = EntityState::from_value(json!({"name": id})).unwrap();
        let entry = AuditEntry::create(EntityType::Member, id, after);
        let diff = compute_diff(entry.before.as_ref(), entry.after.as_ref(), entry.action);
        let actor = ActorContext::new(actor, format!("{}@example.com", actor), "admin")
            .with_request(Some("10.1.1.1".into()), None);
        AuditLogRecord::from_entry(entry, diff, &actor, at)
    }

    #[test]
    fn test_insert_and_query() {
        let (store, _temp) = create_test_store();
        let now = Utc::now();

        store.insert_one(&record("m-1", "u-1", now)).unwrap();
        store
            .insert_many(&[record("m-2", "u-1", now), record("m-1", "u-2", now)])
            .unwrap();

        assert!(store.exists());
        assert_eq!(store.count(&AuditFilter::new()).unwrap(), 3);

        let history = store
            .query(&AuditFilter::for_entity(EntityType::Member, "m-1"), None)
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].actor_id.as_deref(), Some("u-2"));
    }

    #[test]
    fn test_recent_window_with_total() {
        let (store, _temp) = create_test_store();
        let t0 = Utc::now();
        for (i, id) in ["m-1", "m-2", "m-1", "m-1"].iter().enumerate() {
            store
                .insert_one(&record(id, &format!("u-{}", i), t0 + Duration::seconds(i as i64)))
                .unwrap();
        }

        let (window, total) = store
            .recent_window(&AuditFilter::for_entity(EntityType::Member, "m-1"), 2)
            .unwrap();
        assert_eq!(total, 3);
        // Newest two, oldest first
        let actors: Vec<_> = window.iter().map(|r| r.actor_id.clone().unwrap()).collect();
        assert_eq!(actors, vec!["u-2", "u-3"]);
    }

    #[test]
    fn test_empty_log() {
        let (store, _temp) = create_test_store();
        assert!(!store.exists());
        assert_eq!(store.count(&AuditFilter::new()).unwrap(), 0);
        assert!(store.query(&AuditFilter::new(), Some(10)).unwrap().is_empty());
    }

    #[test]
    fn test_survives_restart() {
        let (store, temp) = create_test_store();
        store.insert_one(&record("m-1", "u-1", Utc::now())).unwrap();

        let reopened = JsonlAuditLogStore::new(
            temp.path().join("audit").join("audit.log"),
            temp.path().join("audit").join("archive"),
        );
        let records = reopened.query(&AuditFilter::new(), None).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, AuditAction::Create);
    }

    #[test]
    fn test_anonymize_entity_keeps_diff() {
        let (store, _temp) = create_test_store();
        let now = Utc::now();
        store
            .insert_many(&[record("m-1", "u-1", now), record("m-2", "u-1", now)])
            .unwrap();

        let changed = store.anonymize(&AnonymizeTarget::Entity("m-1".into())).unwrap();
        assert_eq!(changed, 1);
        assert_eq!(store.anonymize(&AnonymizeTarget::Entity("m-1".into())).unwrap(), 0);

        let all = store.query(&AuditFilter::new(), None).unwrap();
        let m1 = all.iter().find(|r| r.entity_id == "m-1").unwrap();
        assert!(m1.is_anonymized);
        assert!(m1.actor_id.is_none());
        assert!(m1.ip_address.is_none());
        assert!(m1.change_diff.is_some());

        let m2 = all.iter().find(|r| r.entity_id == "m-2").unwrap();
        assert!(!m2.is_anonymized);
    }

    #[test]
    fn test_anonymize_actor() {
        let store = MemoryAuditLogStore::new();
        let now = Utc::now();
        store
            .insert_many(&[record("m-1", "u-1", now), record("m-2", "u-2", now), record("m-3", "u-1", now)])
            .unwrap();

        assert_eq!(store.anonymize(&AnonymizeTarget::Actor("u-1".into())).unwrap(), 2);
        assert_eq!(store.count(&AuditFilter::new().actor_id("u-1")).unwrap(), 0);
        assert_eq!(store.count(&AuditFilter::new().actor_id("u-2")).unwrap(), 1);
    }

    #[test]
    fn test_archive_moves_old_records() {
        let (store, temp) = create_test_store();
        let now = Utc::now();
        store
            .insert_many(&[
                record("m-1", "u", now - Duration::days(120)),
                record("m-2", "u", now - Duration::days(100)),
                record("m-3", "u", now - Duration::days(5)),
            ])
            .unwrap();

        let report = store.archive_before(now - Duration::days(90)).unwrap();
        assert_eq!(report.archived, 2);
        assert_eq!(report.remaining, 1);

        let archive_path = report.archive_path.unwrap();
        assert!(archive_path.starts_with(temp.path().join("audit").join("archive")));
        let archived: Vec<AuditLogRecord> = read_lines(&archive_path).unwrap();
        assert_eq!(archived.len(), 2);

        assert_eq!(store.count(&AuditFilter::new()).unwrap(), 1);
    }

    #[test]
    fn test_archive_nothing_to_do() {
        let (store, _temp) = create_test_store();
        store.insert_one(&record("m-1", "u", Utc::now())).unwrap();

        let report = store.archive_before(Utc::now() - Duration::days(90)).unwrap();
        assert_eq!(report.archived, 0);
        assert_eq!(report.remaining, 1);
        assert!(report.archive_path.is_none());
    }

    #[test]
    fn test_memory_archive() {
        let store = MemoryAuditLogStore::new();
        let now = Utc::now();
        store
            .insert_many(&[record("old", "u", now - Duration::days(91)), record("new", "u", now)])
            .unwrap();

        let report = store.archive_before(now - Duration::days(90)).unwrap();
        assert_eq!((report.archived, report.remaining), (1, 1));
        assert_eq!(store.archived().unwrap()[0].entity_id, "old");
        assert_eq!(store.all().unwrap()[0].entity_id, "new");
    }
}
