use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

/// 默认上传上限：20 MiB
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 20 * 1024 * 1024;

/// 服务配置
///
/// 来源优先级：CLI 参数 > TOML 文件 > 默认值。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub listen: SocketAddr,
    /// 索引快照文件
    pub index_path: PathBuf,
    /// blob 根目录
    pub cache_dir: PathBuf,
    pub max_upload_bytes: u64,
    /// 快照缺失时创建空索引，而不是启动失败
    pub init_index: bool,
    /// 启动时删除未被索引引用的 blob（否则只告警）
    pub sweep_orphans: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 9004)),
            index_path: PathBuf::from("./shapes.json"),
            cache_dir: PathBuf::from("./cache"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            init_index: false,
            sweep_orphans: false,
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let cfg: Config = toml::from_str(s).context("parse config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {:?}", path))?;
        Self::from_toml_str(&raw).with_context(|| format!("config {:?}", path))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_upload_bytes == 0 {
            anyhow::bail!("max_upload_bytes must be > 0");
        }
        if self.index_path.as_os_str().is_empty() {
            anyhow::bail!("index_path must not be empty");
        }
        if self.cache_dir.as_os_str().is_empty() {
            anyhow::bail!("cache_dir must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_legacy_layout() {
        let c = Config::default();
        assert_eq!(c.listen.port(), 9004);
        assert_eq!(c.index_path, PathBuf::from("./shapes.json"));
        assert_eq!(c.cache_dir, PathBuf::from("./cache"));
        assert_eq!(c.max_upload_bytes, 20 * 1024 * 1024);
        assert!(!c.init_index);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = Config::from_toml_str(
            r#"
            listen = "127.0.0.1:8080"
            cache_dir = "/var/lib/shapes"
            sweep_orphans = true
            "#,
        )
        .unwrap();
        assert_eq!(c.listen, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(c.cache_dir, PathBuf::from("/var/lib/shapes"));
        assert!(c.sweep_orphans);
        assert_eq!(c.index_path, Config::default().index_path);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Config::from_toml_str("max_upload_bytes = 0").is_err());
        assert!(Config::from_toml_str("bogus = 1").is_err());
        assert!(Config::from_toml_str("listen = \"nope\"").is_err());
    }
}
