use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::ShapeKey;

pub type ShapeLevel = BTreeMap<String, String>;
pub type VersionLevel = BTreeMap<String, ShapeLevel>;

/// 三级有序索引：region → version → shape → blob path
///
/// 序列化形态即快照文件/`GET /all` 的 JSON：
/// `{"<region>": {"<version>": {"<shape>": "<blobPath>"}}}`。
/// BTreeMap 保证 dump 输出稳定（层内顺序无语义）。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShapeHierarchy {
    regions: BTreeMap<String, VersionLevel>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

impl ShapeHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// 纯读：无副作用、永不失败
    pub fn lookup(&self, key: &ShapeKey) -> Option<&str> {
        self.regions
            .get(&key.region)?
            .get(&key.version)?
            .get(&key.shape)
            .map(String::as_str)
    }

    pub fn contains(&self, key: &ShapeKey) -> bool {
        self.lookup(key).is_some()
    }

    /// 叶子一旦写入不可变：已存在则不做任何修改
    pub fn insert(&mut self, key: &ShapeKey, blob_path: String) -> InsertOutcome {
        if self.contains(key) {
            return InsertOutcome::AlreadyExists;
        }
        self.regions
            .entry(key.region.clone())
            .or_default()
            .entry(key.version.clone())
            .or_default()
            .insert(key.shape.clone(), blob_path);
        InsertOutcome::Inserted
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn version_count(&self) -> usize {
        self.regions.values().map(|v| v.len()).sum()
    }

    pub fn shape_count(&self) -> usize {
        self.regions
            .values()
            .flat_map(|v| v.values())
            .map(|s| s.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// 遍历所有 (key 三元组, blob path)
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &str, &str)> + '_ {
        self.regions.iter().flat_map(|(region, versions)| {
            versions.iter().flat_map(move |(version, shapes)| {
                shapes.iter().map(move |(shape, path)| {
                    (
                        region.as_str(),
                        version.as_str(),
                        shape.as_str(),
                        path.as_str(),
                    )
                })
            })
        })
    }

    pub fn dump(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn load(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}
