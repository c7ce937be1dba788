use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::core::{CacheError, CacheResult};

/// 同名文件冲突时最多尝试的后缀数量（`<stem>-<n>.<ext>`）
const MAX_NAME_ATTEMPTS: u32 = 1024;

/// 文件系统 blob 存储：`<root>/<region>/<version>/<filename>`
///
/// - blob 一旦写入，服务路径上永不覆盖/删除（`create_new`）
/// - 唯一的删除路径是启动时的 orphan sweep，且只针对未被索引引用的文件
pub struct BlobStore {
    root: PathBuf,
}

/// `reserve` 返回的目录句柄
#[derive(Clone, Debug)]
pub struct ReservedDir {
    path: PathBuf,
}

impl ReservedDir {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub orphans: Vec<PathBuf>,
    pub removed: usize,
}

impl BlobStore {
    pub fn open(root: PathBuf) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// 确保 `<root>/<region>/<version>` 存在（幂等）
    pub fn reserve(&self, region: &str, version: &str) -> CacheResult<ReservedDir> {
        let path = self.root.join(region).join(version);
        std::fs::create_dir_all(&path).map_err(|source| CacheError::WriteFailure {
            path: path.clone(),
            source,
        })?;
        Ok(ReservedDir { path })
    }

    /// 新建文件并完整写入 `content`，返回落盘路径。
    ///
    /// 目标名已存在时不覆盖，改用 `<stem>-<n>.<ext>`。
    /// 写入中途失败会留下部分文件（不清理，由 orphan sweep 兜底）。
    pub fn write(
        &self,
        dir: &ReservedDir,
        filename: &str,
        content: &[u8],
    ) -> CacheResult<PathBuf> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let path = dir.path.join(candidate_name(filename, attempt));
            let opened = OpenOptions::new().write(true).create_new(true).open(&path);
            let mut file = match opened {
                Ok(f) => f,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(CacheError::WriteFailure { path, source }),
            };
            if let Err(source) = file.write_all(content).and_then(|_| file.sync_all()) {
                return Err(CacheError::WriteFailure { path, source });
            }
            if attempt > 0 {
                tracing::debug!("blob name {:?} taken, stored as {:?}", filename, path);
            }
            return Ok(path);
        }
        Err(CacheError::WriteFailure {
            path: dir.path.join(filename),
            source: std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "no free blob name",
            ),
        })
    }

    pub fn read(&self, path: &Path) -> CacheResult<Vec<u8>> {
        std::fs::read(path).map_err(|e| {
            tracing::warn!("indexed blob {:?} unreadable: {}", path, e);
            CacheError::NotFound(path.display().to_string())
        })
    }

    /// 扫描 root 下所有普通文件；不在 `keep`（规范化路径）中的即 orphan。
    /// `remove` 为 true 时删除 orphan。
    pub fn sweep_orphans(
        &self,
        keep: &HashSet<PathBuf>,
        remove: bool,
    ) -> anyhow::Result<SweepReport> {
        let root = self.root.canonicalize()?;
        let mut report = SweepReport::default();

        let mut stack = vec![root];
        while let Some(dir) = stack.pop() {
            let rd = match std::fs::read_dir(&dir) {
                Ok(rd) => rd,
                Err(e) => {
                    tracing::debug!("orphan sweep: skip unreadable dir {:?}: {}", dir, e);
                    continue;
                }
            };
            for ent in rd {
                let Ok(ent) = ent else { continue };
                let Ok(ft) = ent.file_type() else { continue };
                let p = ent.path();
                if ft.is_dir() {
                    stack.push(p);
                    continue;
                }
                if !ft.is_file() {
                    continue;
                }
                report.scanned += 1;
                if keep.contains(&p) {
                    continue;
                }
                tracing::warn!("orphaned blob: {:?}", p);
                if remove {
                    match std::fs::remove_file(&p) {
                        Ok(()) => report.removed += 1,
                        Err(e) => tracing::warn!("failed to remove orphan {:?}: {}", p, e),
                    }
                }
                report.orphans.push(p);
            }
        }
        report.orphans.sort();
        Ok(report)
    }
}

/// 只保留上传文件名的最后一段，拒绝空名与 `.` / `..`
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let last = raw.rsplit(|c| c == '/' || c == '\\').next()?.trim();
    if last.is_empty() || last == "." || last == ".." || last.contains('\0') {
        return None;
    }
    Some(last.to_string())
}

/// 规范化路径；文件不存在时规范化父目录后拼回文件名
pub fn canonical_lossy(path: &Path) -> Option<PathBuf> {
    if let Ok(p) = path.canonicalize() {
        return Some(p);
    }
    let name = path.file_name()?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    Some(parent.canonicalize().ok()?.join(name))
}

fn candidate_name(filename: &str, attempt: u32) -> String {
    if attempt == 0 {
        return filename.to_string();
    }
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}-{attempt}.{ext}"),
        _ => format!("{filename}-{attempt}"),
    }
}
