use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::index::ShapeHierarchy;

/// 原子快照存储（atomic replacement）
///
/// 落盘流程：
/// 1) 序列化完整索引（全量重写，非增量）
/// 2) 写 `<path>.tmp`
/// 3) fsync(tmpfile)
/// 4) rename(tmp, target) — 原子替换（POSIX 保证）
/// 5) fsync(dir) — 确保目录项更新落盘
///
/// 任何一步崩溃，target 要么是旧快照，要么是新快照，不会是截断的半成品。
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// 加载快照；文件缺失或内容损坏都是错误（进程无法在没有合法索引的情况下启动）
    pub fn load(&self) -> anyhow::Result<ShapeHierarchy> {
        let data = std::fs::read(&self.path)
            .with_context(|| format!("read index snapshot {:?}", self.path))?;
        let index = ShapeHierarchy::load(&data)
            .with_context(|| format!("parse index snapshot {:?}", self.path))?;
        tracing::info!(
            "Snapshot loaded: {:?}, {} shapes, {} bytes",
            self.path,
            index.shape_count(),
            data.len()
        );
        Ok(index)
    }

    /// `init` 为 true 时，快照缺失则写一个空索引；否则同 [`load`](Self::load)
    pub fn load_or_init(&self, init: bool) -> anyhow::Result<ShapeHierarchy> {
        if init && !self.path.exists() {
            tracing::info!("Snapshot {:?} missing, initializing empty index", self.path);
            let empty = ShapeHierarchy::new();
            self.write_atomic(&empty)?;
            return Ok(empty);
        }
        self.load()
    }

    pub fn write_atomic(&self, index: &ShapeHierarchy) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create snapshot dir {:?}", parent))?;
            }
        }

        let body = index.dump().context("serialize index snapshot")?;
        let tmp_path = self.tmp_path();

        let mut file = std::fs::File::create(&tmp_path)
            .with_context(|| format!("create {:?}", tmp_path))?;
        file.write_all(&body)?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("rename {:?} -> {:?}", tmp_path, self.path))?;

        if let Some(parent) = self.path.parent() {
            let dir = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            if let Ok(dir) = std::fs::File::open(dir) {
                let _ = dir.sync_all();
            }
        }

        tracing::debug!(
            "Snapshot written: {} shapes, {} bytes",
            index.shape_count(),
            body.len()
        );
        Ok(())
    }
}
