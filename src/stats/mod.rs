use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::index::ShapeHierarchy;

/// 运行期计数器（进程内累计，不持久化）
#[derive(Debug, Default)]
pub struct CacheCounters {
    inserts: AtomicU64,
    rejected: AtomicU64,
    blob_bytes_written: AtomicU64,
}

impl CacheCounters {
    pub fn record_insert(&self, bytes: u64) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
        self.blob_bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report(&self, index: &ShapeHierarchy) -> CacheStats {
        CacheStats {
            regions: index.region_count(),
            versions: index.version_count(),
            shapes: index.shape_count(),
            inserts: self.inserts.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            blob_bytes_written: self.blob_bytes_written.load(Ordering::Relaxed),
        }
    }
}

/// `GET /status` 的响应体
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub regions: usize,
    pub versions: usize,
    pub shapes: usize,
    /// 本进程成功写入次数
    pub inserts: u64,
    /// 被拒绝的写入（已存在/过大/非法上传）
    pub rejected: u64,
    pub blob_bytes_written: u64,
}

fn human_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "regions={} versions={} shapes={} inserts={} rejected={} written={}",
            self.regions,
            self.versions,
            self.shapes,
            self.inserts,
            self.rejected,
            human_bytes(self.blob_bytes_written)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ShapeKey;

    #[test]
    fn report_counts_levels_and_counters() {
        let mut h = ShapeHierarchy::new();
        h.insert(&ShapeKey::new("r1", "v1", "a").unwrap(), "p".into());
        h.insert(&ShapeKey::new("r1", "v2", "a").unwrap(), "p".into());

        let c = CacheCounters::default();
        c.record_insert(1536);
        c.record_rejected();

        let s = c.report(&h);
        assert_eq!(s.regions, 1);
        assert_eq!(s.versions, 2);
        assert_eq!(s.shapes, 2);
        assert_eq!(s.inserts, 1);
        assert_eq!(s.rejected, 1);
        assert!(s.to_string().ends_with("written=1.50 KB"));
    }
}
