use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::core::{CacheError, CacheResult, ShapeKey};
use crate::index::{InsertOutcome, LiveIndex, ShapeHierarchy};
use crate::stats::{CacheCounters, CacheStats};
use crate::storage::blob::{canonical_lossy, sanitize_filename};
use crate::storage::{BlobStore, SnapshotStore, SweepReport};

/// 一次上传：原始文件名 + 内容
#[derive(Clone, Debug)]
pub struct Upload {
    pub filename: String,
    pub content: Vec<u8>,
}

/// 索引 + blob 存储的组合：insert / retrieve 协议
///
/// 以 `Arc<ShapeCache>` 形式注入 handler，不依赖任何全局状态。
pub struct ShapeCache {
    index: LiveIndex,
    blobs: BlobStore,
    max_upload_bytes: u64,
    counters: CacheCounters,
}

impl ShapeCache {
    pub fn new(index: LiveIndex, blobs: BlobStore, max_upload_bytes: u64) -> Self {
        Self {
            index,
            blobs,
            max_upload_bytes,
            counters: CacheCounters::default(),
        }
    }

    /// 按配置打开：快照加载失败直接返回错误（调用方应终止启动）
    pub fn open(cfg: &Config) -> anyhow::Result<Arc<Self>> {
        let snapshot = SnapshotStore::new(cfg.index_path.clone());
        let index = LiveIndex::open(snapshot, cfg.init_index)?;
        let blobs = BlobStore::open(cfg.cache_dir.clone())?;
        Ok(Arc::new(Self::new(index, blobs, cfg.max_upload_bytes)))
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    pub fn lookup(&self, key: &ShapeKey) -> Option<String> {
        self.index.lookup(key)
    }

    /// 当前完整索引（`GET /all`）
    pub fn index(&self) -> Arc<ShapeHierarchy> {
        self.index.current()
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.report(&self.index.current())
    }

    pub fn is_poisoned(&self) -> bool {
        self.index.is_poisoned()
    }

    /// 在进入 insert 之前就被拒绝的上传（传输层校验失败）
    pub fn record_rejected(&self) {
        self.counters.record_rejected();
    }

    /// lookup → read；未索引或 blob 丢失都是 NotFound
    pub fn retrieve(&self, key: &ShapeKey) -> CacheResult<Vec<u8>> {
        let path = self
            .index
            .lookup(key)
            .ok_or_else(|| CacheError::NotFound(key.to_string()))?;
        self.blobs.read(Path::new(&path))
    }

    /// 写入协议：
    /// 1) 校验大小（无副作用）
    /// 2) 写锁内 check existing
    /// 3) reserve 目录
    /// 4) 写 blob
    /// 5) 提交索引 + 6) 全量快照
    ///
    /// 成功返回写入字节数。
    pub fn insert(&self, key: &ShapeKey, upload: Upload) -> CacheResult<u64> {
        let result = self.insert_inner(key, upload);
        match &result {
            Ok(n) => self.counters.record_insert(*n),
            Err(e) if !e.is_fatal() => self.counters.record_rejected(),
            Err(_) => {}
        }
        result
    }

    fn insert_inner(&self, key: &ShapeKey, upload: Upload) -> CacheResult<u64> {
        let size = upload.content.len() as u64;
        if size > self.max_upload_bytes {
            return Err(CacheError::TooBig {
                size,
                limit: self.max_upload_bytes,
            });
        }
        let filename = sanitize_filename(&upload.filename).ok_or_else(|| {
            CacheError::InvalidUpload(format!("unusable filename {:?}", upload.filename))
        })?;

        let mut writer = self.index.writer();
        writer.ensure_writable()?;

        if let Some(existing) = writer.lookup(key) {
            tracing::warn!("{} already bound to {:?}", key, existing);
            return Err(CacheError::AlreadyExists(key.to_string()));
        }

        let dir = self.blobs.reserve(&key.region, &key.version)?;
        let blob_path = self.blobs.write(&dir, &filename, &upload.content).map_err(|e| {
            tracing::error!("{}: {}", key, e);
            e
        })?;

        match writer.insert(key, blob_path.to_string_lossy().into_owned())? {
            InsertOutcome::Inserted => {
                tracing::info!("stored {} -> {:?} ({} bytes)", key, blob_path, size);
                Ok(size)
            }
            // 写锁内已确认不存在，这里只是兜底
            InsertOutcome::AlreadyExists => {
                tracing::warn!("{} bound concurrently, blob {:?} orphaned", key, blob_path);
                Err(CacheError::AlreadyExists(key.to_string()))
            }
        }
    }

    /// 找出/清理未被索引引用的 blob。
    /// 快照文件（及其 tmp）若位于 blob 根目录下也视为引用。
    pub fn sweep_orphans(&self, remove: bool) -> anyhow::Result<SweepReport> {
        let _writer = self.index.writer();
        let current = self.index.current();

        let snapshot = self.index.snapshot_store();
        let mut keep: HashSet<PathBuf> = [snapshot.path().to_path_buf(), snapshot.tmp_path()]
            .iter()
            .filter_map(|p| canonical_lossy(p))
            .collect();

        let mut missing = 0usize;
        for (region, version, shape, path) in current.iter() {
            match canonical_lossy(Path::new(path)).filter(|p| p.exists()) {
                Some(p) => {
                    keep.insert(p);
                }
                None => {
                    missing += 1;
                    tracing::warn!(
                        "/{}/{}/{} points at missing blob {:?}",
                        region,
                        version,
                        shape,
                        path
                    );
                }
            }
        }

        // 有条目找不到 blob（如换了工作目录），此时的 orphan 判定不可信，只报告不删除
        let remove = if remove && missing > 0 {
            tracing::warn!(
                "Orphan sweep: {} indexed blobs missing, skipping removal",
                missing
            );
            false
        } else {
            remove
        };

        let report = self.blobs.sweep_orphans(&keep, remove)?;
        tracing::info!(
            "Orphan sweep: scanned={} orphans={} removed={} missing={}",
            report.scanned,
            report.orphans.len(),
            report.removed,
            missing
        );
        Ok(report)
    }
}
