use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, MutexGuard};

use crate::core::{CacheError, CacheResult, ShapeKey};
use crate::index::hierarchy::{InsertOutcome, ShapeHierarchy};
use crate::storage::snapshot::SnapshotStore;

/// 在线索引：读无锁，写串行
///
/// ## 契约
/// - 读者通过 ArcSwap 拿到不可变的已发布版本：只会看到插入前或完整提交后的状态。
/// - 写者必须持有 [`IndexWriter`]（全局互斥），check-then-commit 期间不会与其它写者交错。
/// - 新版本先落盘快照、再发布；快照失败则不发布，并把索引标记为 poisoned，
///   之后所有写入都被拒绝（磁盘镜像已不可信）。
pub struct LiveIndex {
    published: ArcSwap<ShapeHierarchy>,
    writer: Mutex<()>,
    snapshot: SnapshotStore,
    poisoned: AtomicBool,
}

impl LiveIndex {
    pub fn new(initial: ShapeHierarchy, snapshot: SnapshotStore) -> Self {
        Self {
            published: ArcSwap::from_pointee(initial),
            writer: Mutex::new(()),
            snapshot,
            poisoned: AtomicBool::new(false),
        }
    }

    /// 从快照恢复；缺失/损坏即失败（`init` 时缺失则建空索引）
    pub fn open(snapshot: SnapshotStore, init: bool) -> anyhow::Result<Self> {
        let initial = snapshot.load_or_init(init)?;
        Ok(Self::new(initial, snapshot))
    }

    pub fn snapshot_store(&self) -> &SnapshotStore {
        &self.snapshot
    }

    /// 当前已发布版本
    pub fn current(&self) -> Arc<ShapeHierarchy> {
        self.published.load_full()
    }

    pub fn lookup(&self, key: &ShapeKey) -> Option<String> {
        self.published.load().lookup(key).map(str::to_owned)
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// 获取写锁（阻塞）
    pub fn writer(&self) -> IndexWriter<'_> {
        IndexWriter {
            index: self,
            _guard: self.writer.lock(),
        }
    }
}

/// 持有全局写锁期间的写句柄
pub struct IndexWriter<'a> {
    index: &'a LiveIndex,
    _guard: MutexGuard<'a, ()>,
}

impl<'a> IndexWriter<'a> {
    /// poisoned 后拒绝一切写入
    pub fn ensure_writable(&self) -> CacheResult<()> {
        if self.index.is_poisoned() {
            return Err(CacheError::PersistFailure(anyhow::anyhow!(
                "index is poisoned by an earlier persist failure"
            )));
        }
        Ok(())
    }

    pub fn lookup(&self, key: &ShapeKey) -> Option<String> {
        self.index.lookup(key)
    }

    /// 插入并全量持久化。
    ///
    /// 已存在返回 `AlreadyExists`，不修改、不落盘。
    pub fn insert(&mut self, key: &ShapeKey, blob_path: String) -> CacheResult<InsertOutcome> {
        self.ensure_writable()?;

        let current = self.index.published.load_full();
        if current.contains(key) {
            return Ok(InsertOutcome::AlreadyExists);
        }

        let mut next = ShapeHierarchy::clone(&current);
        next.insert(key, blob_path);

        if let Err(e) = self.index.snapshot.write_atomic(&next) {
            self.index.poisoned.store(true, Ordering::Release);
            tracing::error!(
                "Snapshot persist failed for {}, index poisoned: {:#}",
                key,
                e
            );
            return Err(CacheError::PersistFailure(e));
        }

        self.index.published.store(Arc::new(next));
        Ok(InsertOutcome::Inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn unique_tmp_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("shape-cache-live-{}-{}", tag, nanos))
    }

    fn key(s: &str) -> ShapeKey {
        ShapeKey::new("us-east", "v1", s).unwrap()
    }

    #[test]
    fn insert_persists_full_snapshot() {
        let dir = unique_tmp_dir("persist");
        let idx = LiveIndex::open(SnapshotStore::new(dir.join("shapes.json")), true).unwrap();

        {
            let mut w = idx.writer();
            assert_eq!(
                w.insert(&key("circle"), "a".into()).unwrap(),
                InsertOutcome::Inserted
            );
            assert_eq!(
                w.insert(&key("square"), "b".into()).unwrap(),
                InsertOutcome::Inserted
            );
            assert_eq!(
                w.insert(&key("circle"), "c".into()).unwrap(),
                InsertOutcome::AlreadyExists
            );
        }
        assert_eq!(idx.lookup(&key("circle")).as_deref(), Some("a"));

        // 重新打开：快照与内存一致
        let reopened = LiveIndex::open(SnapshotStore::new(dir.join("shapes.json")), false).unwrap();
        assert_eq!(*reopened.current(), *idx.current());
    }

    #[test]
    fn readers_keep_their_version_across_commit() {
        let dir = unique_tmp_dir("readers");
        let idx = LiveIndex::open(SnapshotStore::new(dir.join("shapes.json")), true).unwrap();

        let before = idx.current();
        idx.writer().insert(&key("circle"), "a".into()).unwrap();
        assert!(before.lookup(&key("circle")).is_none());
        assert!(idx.current().lookup(&key("circle")).is_some());
    }

    #[test]
    fn persist_failure_poisons_and_does_not_publish() {
        let dir = unique_tmp_dir("poison");
        std::fs::create_dir_all(&dir).unwrap();
        // 父路径是普通文件：create_dir_all 必然失败
        let blocker = dir.join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let idx = LiveIndex::new(
            ShapeHierarchy::new(),
            SnapshotStore::new(blocker.join("shapes.json")),
        );

        let err = idx.writer().insert(&key("circle"), "a".into()).unwrap_err();
        assert!(err.is_fatal());
        assert!(idx.is_poisoned());
        assert!(idx.lookup(&key("circle")).is_none());

        let err = idx.writer().insert(&key("square"), "b".into()).unwrap_err();
        assert!(matches!(err, CacheError::PersistFailure(_)));
    }
}
