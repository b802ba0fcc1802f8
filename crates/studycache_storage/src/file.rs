//! Durable store backed by an append-only log.

use crate::backend::{CompactionStats, PersistentStore};
use crate::error::{StorageError, StorageResult};
use crate::frame::{self, FrameRead, HEADER_SIZE};
use crate::record::{Record, WriteBatch, WriteOp};
use crate::tables::Tables;
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Name of the log file inside the store directory.
pub const LOG_FILE: &str = "store.log";

/// Name of the lock file inside the store directory.
pub const LOCK_FILE: &str = "store.lock";

const COMPACT_TMP_FILE: &str = "store.log.compact";

/// Tuning knobs for [`FileStore`].
#[derive(Debug, Clone)]
pub struct FileStoreOptions {
    /// Call `sync_data` after every commit.
    pub sync_on_commit: bool,
    /// Compact automatically once this many rows have been superseded since
    /// the last compaction. `None` disables automatic compaction.
    pub compact_threshold: Option<usize>,
}

impl Default for FileStoreOptions {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
            compact_threshold: Some(4096),
        }
    }
}

impl FileStoreOptions {
    /// Sets whether commits are synced to disk before returning.
    #[must_use]
    pub fn with_sync_on_commit(mut self, sync: bool) -> Self {
        self.sync_on_commit = sync;
        self
    }

    /// Sets the automatic compaction threshold.
    #[must_use]
    pub fn with_compact_threshold(mut self, threshold: Option<usize>) -> Self {
        self.compact_threshold = threshold;
        self
    }
}

#[derive(Debug)]
struct LogState {
    file: File,
    size: u64,
    superseded: usize,
    /// Set when a partial append could not be undone.
    failed: Option<String>,
}

/// A durable store.
///
/// Committed batches are appended to `store.log` as checksummed frames and
/// the in-memory tables are rebuilt by replaying the log on open. Data
/// survives process restarts.
///
/// # Recovery
///
/// - A torn or checksum-failing tail (crash mid-write) is truncated and logged
/// - A frame whose checksum matches but whose payload cannot be decoded is
///   skipped and logged; replay continues with the next frame
///
/// # Durability
///
/// With `sync_on_commit` (the default) every commit calls `sync_data` before
/// returning, so an enqueued action is on disk before any network attempt.
///
/// # Example
///
/// ```no_run
/// use studycache_storage::{FileStore, PersistentStore, Record};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("offline-data")).unwrap();
/// store.put("t", Record::new("k", b"v".to_vec())).unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    options: FileStoreOptions,
    log: Mutex<LogState>,
    tables: RwLock<Tables>,
    _lock_file: File,
}

impl FileStore {
    /// Opens or creates a store in `dir` with default options.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, another process
    /// holds the store, or the log header is invalid.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        Self::open_with_options(dir, FileStoreOptions::default())
    }

    /// Opens or creates a store in `dir`.
    ///
    /// # Errors
    ///
    /// See [`FileStore::open`].
    pub fn open_with_options(dir: &Path, options: FileStoreOptions) -> StorageResult<Self> {
        std::fs::create_dir_all(dir)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(dir.display().to_string()));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOG_FILE))?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        if buf.is_empty() {
            file.write_all(&frame::header())?;
            file.sync_all()?;
            buf.extend_from_slice(&frame::header());
        } else {
            frame::check_header(&buf)?;
        }

        let (tables, valid_len, superseded) = replay(&buf);
        if (valid_len as usize) < buf.len() {
            warn!(
                dir = %dir.display(),
                dropped_bytes = buf.len() - valid_len as usize,
                "truncating damaged log tail"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::End(0))?;

        debug!(
            dir = %dir.display(),
            rows = tables.row_count(),
            bytes = valid_len,
            "opened file store"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            options,
            log: Mutex::new(LogState {
                file,
                size: valid_len,
                superseded,
                failed: None,
            }),
            tables: RwLock::new(tables),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Returns the current log size in bytes.
    #[must_use]
    pub fn log_size(&self) -> u64 {
        self.log.lock().size
    }

    /// Rewrites the live rows into a fresh log while the log lock is held.
    fn compact_locked(&self, log: &mut LogState) -> StorageResult<CompactionStats> {
        let bytes_before = log.size;
        let live = self.tables.read().live_ops();
        let live_rows = live.len();

        let tmp_path = self.dir.join(COMPACT_TMP_FILE);
        let mut tmp = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        tmp.write_all(&frame::header())?;
        let mut size = HEADER_SIZE as u64;

        // Chunked so no single frame grows past the frame limit
        for chunk in live.chunks(512) {
            let mut batch = WriteBatch::new();
            for op in chunk {
                if let WriteOp::Put { table, record } = op {
                    batch.push_put(table.clone(), record.clone());
                }
            }
            let bytes = frame::encode(&batch)?;
            tmp.write_all(&bytes)?;
            size += bytes.len() as u64;
        }
        tmp.sync_all()?;
        drop(tmp);

        std::fs::rename(&tmp_path, self.dir.join(LOG_FILE))?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(self.dir.join(LOG_FILE))?;
        file.seek(SeekFrom::End(0))?;

        log.file = file;
        log.size = size;
        log.superseded = 0;
        // The rewritten log no longer carries a torn tail
        log.failed = None;

        info!(
            dir = %self.dir.display(),
            bytes_before,
            bytes_after = size,
            live_rows,
            "compacted store log"
        );

        Ok(CompactionStats {
            bytes_before,
            bytes_after: size,
            live_rows,
        })
    }
}

fn rollback(file: &mut File, offset: u64) -> std::io::Result<()> {
    file.set_len(offset)?;
    file.seek(SeekFrom::End(0))?;
    Ok(())
}

fn append_frame(file: &mut File, bytes: &[u8], sync: bool) -> std::io::Result<()> {
    file.write_all(bytes)?;
    if sync {
        file.sync_data()
    } else {
        file.flush()
    }
}

/// Replays a log buffer. Returns the rebuilt tables, the length of the valid
/// prefix, and the number of superseded rows seen.
fn replay(buf: &[u8]) -> (Tables, u64, usize) {
    let mut tables = Tables::new();
    let mut superseded = 0;
    let mut offset = HEADER_SIZE;

    loop {
        match frame::read_at(buf, offset) {
            FrameRead::Batch { batch, next } => {
                superseded += tables.apply(batch.ops());
                offset = next;
            }
            FrameRead::Undecodable { next, reason } => {
                warn!(offset, %reason, "skipping undecodable log frame");
                offset = next;
            }
            FrameRead::Damaged { reason } => {
                warn!(offset, %reason, "damaged log frame");
                break;
            }
            FrameRead::End => break,
        }
    }

    (tables, offset as u64, superseded)
}

impl PersistentStore for FileStore {
    fn get(&self, table: &str, key: &str) -> StorageResult<Option<Record>> {
        Ok(self.tables.read().get(table, key))
    }

    fn scan(&self, table: &str) -> StorageResult<Vec<Record>> {
        Ok(self.tables.read().scan(table))
    }

    fn query(&self, table: &str, index: &str, value: &str) -> StorageResult<Vec<Record>> {
        Ok(self.tables.read().query(table, index, value))
    }

    fn commit(&self, batch: WriteBatch) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let bytes = frame::encode(&batch)?;

        // The log lock is held until the tables are updated, so log order and
        // apply order are the same.
        let mut log = self.log.lock();
        if let Some(reason) = &log.failed {
            return Err(StorageError::Failed(reason.clone()));
        }
        let offset = log.size;
        if let Err(e) = append_frame(&mut log.file, &bytes, self.options.sync_on_commit) {
            // Roll back a partial append so the next frame starts clean
            if let Err(rollback) = rollback(&mut log.file, offset) {
                error!(
                    dir = %self.dir.display(),
                    error = %rollback,
                    "could not roll back partial append, refusing further writes"
                );
                log.failed = Some(format!("rollback after failed append: {rollback}"));
            }
            return Err(StorageError::Io(e));
        }
        log.size += bytes.len() as u64;

        log.superseded += self.tables.write().apply(batch.ops());

        // The batch is durable at this point; compaction is housekeeping
        if let Some(threshold) = self.options.compact_threshold {
            if log.superseded >= threshold {
                if let Err(e) = self.compact_locked(&mut log) {
                    warn!(dir = %self.dir.display(), error = %e, "automatic compaction failed");
                }
            }
        }
        Ok(())
    }

    fn len(&self, table: &str) -> StorageResult<usize> {
        Ok(self.tables.read().len(table))
    }

    fn tables(&self) -> StorageResult<Vec<String>> {
        Ok(self.tables.read().names())
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn compact(&self) -> StorageResult<CompactionStats> {
        let mut log = self.log.lock();
        self.compact_locked(&mut log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn owned(key: &str, owner: &str) -> Record {
        Record::new(key, key.as_bytes().to_vec()).with_index("owner", owner)
    }

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.log_size(), HEADER_SIZE as u64);
        assert!(dir.path().join(LOG_FILE).exists());
        assert!(store.is_durable());
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store
                .commit(
                    WriteBatch::new()
                        .put("t", owned("a", "u1"))
                        .put("t", owned("b", "u1"))
                        .put("t", owned("c", "u2")),
                )
                .unwrap();
            store.delete("t", "b").unwrap();
        }

        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.len("t").unwrap(), 2);
        assert!(store.get("t", "b").unwrap().is_none());
        assert_eq!(store.query("t", "owner", "u1").unwrap().len(), 1);
        assert_eq!(store.query("t", "owner", "u2").unwrap().len(), 1);
    }

    #[test]
    fn file_second_open_is_locked() {
        let dir = tempdir().unwrap();
        let _store = FileStore::open(dir.path()).unwrap();
        let second = FileStore::open(dir.path());
        assert!(matches!(second, Err(StorageError::Locked(_))));
    }

    #[test]
    fn file_torn_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let good_size;
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.put("t", owned("a", "u1")).unwrap();
            good_size = store.log_size();
        }

        // Simulate a crash halfway through the next frame
        {
            let frame = frame::encode(&WriteBatch::new().put("t", owned("b", "u1"))).unwrap();
            let mut file = OpenOptions::new()
                .append(true)
                .open(dir.path().join(LOG_FILE))
                .unwrap();
            file.write_all(&frame[..frame.len() / 2]).unwrap();
        }

        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.log_size(), good_size);
        assert!(store.get("t", "a").unwrap().is_some());
        assert!(store.get("t", "b").unwrap().is_none());

        // The store keeps working after recovery
        store.put("t", owned("c", "u1")).unwrap();
        drop(store);
        let store = FileStore::open(dir.path()).unwrap();
        assert!(store.get("t", "c").unwrap().is_some());
    }

    #[test]
    fn file_bad_header_is_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(LOG_FILE), b"not a studycache log").unwrap();
        let result = FileStore::open(dir.path());
        assert!(matches!(result, Err(StorageError::Corrupted(_))));
    }

    #[test]
    fn file_compact_keeps_live_rows() {
        let dir = tempdir().unwrap();
        let store = FileStore::open_with_options(
            dir.path(),
            FileStoreOptions::default().with_compact_threshold(None),
        )
        .unwrap();

        for i in 0..50 {
            store
                .put("t", Record::new("hot", vec![i]).with_index("owner", "u1"))
                .unwrap();
        }
        store.put("t", owned("cold", "u2")).unwrap();

        let stats = store.compact().unwrap();
        assert_eq!(stats.live_rows, 2);
        assert!(stats.bytes_after < stats.bytes_before);

        drop(store);
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.get("t", "hot").unwrap().unwrap().value, vec![49]);
        assert_eq!(store.query("t", "owner", "u2").unwrap().len(), 1);
    }

    #[test]
    fn file_failed_auto_compaction_keeps_commit() {
        let dir = tempdir().unwrap();
        // A directory in the way makes every compaction attempt fail
        std::fs::create_dir(dir.path().join(COMPACT_TMP_FILE)).unwrap();
        {
            let store = FileStore::open_with_options(
                dir.path(),
                FileStoreOptions::default().with_compact_threshold(Some(1)),
            )
            .unwrap();
            store.put("t", Record::new("k", vec![1])).unwrap();
            store.put("t", Record::new("k", vec![2])).unwrap();
            store.put("t", Record::new("j", vec![3])).unwrap();
            assert_eq!(store.get("t", "k").unwrap().unwrap().value, vec![2]);
        }

        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.get("t", "k").unwrap().unwrap().value, vec![2]);
        assert_eq!(store.get("t", "j").unwrap().unwrap().value, vec![3]);
    }

    #[test]
    fn file_failed_rollback_refuses_writes_until_compacted() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.put("t", owned("a", "u1")).unwrap();
        store.log.lock().failed = Some("rollback failed".into());

        let result = store.put("t", owned("b", "u1"));
        assert!(matches!(result, Err(StorageError::Failed(_))));
        assert!(store.get("t", "b").unwrap().is_none());

        store.compact().unwrap();
        store.put("t", owned("b", "u1")).unwrap();
        drop(store);
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.len("t").unwrap(), 2);
    }

    #[test]
    fn rollback_truncates_partial_frame() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial");
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        file.write_all(b"goodtorn").unwrap();
        rollback(&mut file, 4).unwrap();
        file.write_all(b"next").unwrap();
        drop(file);
        assert_eq!(std::fs::read(&path).unwrap(), b"goodnext");
    }

    #[test]
    fn file_auto_compaction() {
        let dir = tempdir().unwrap();
        let store = FileStore::open_with_options(
            dir.path(),
            FileStoreOptions::default()
                .with_sync_on_commit(false)
                .with_compact_threshold(Some(10)),
        )
        .unwrap();

        for i in 0..25u8 {
            store.put("t", Record::new("k", vec![i])).unwrap();
        }
        // Two compactions ran; only a handful of frames remain
        let one_frame = frame::encode(&WriteBatch::new().put("t", Record::new("k", vec![0])))
            .unwrap()
            .len() as u64;
        assert!(store.log_size() < HEADER_SIZE as u64 + one_frame * 10);
        assert_eq!(store.get("t", "k").unwrap().unwrap().value, vec![24]);
    }
}
