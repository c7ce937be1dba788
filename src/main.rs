use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use shape_cache::{Config, ShapeCache, ShapeServer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "shape-cache", version, about = "region/version/shape blob index server")]
struct Cli {
    /// TOML 配置文件
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    listen: Option<SocketAddr>,

    /// 索引快照路径
    #[arg(long = "index")]
    index_path: Option<PathBuf>,

    /// blob 根目录
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    #[arg(long)]
    max_upload_bytes: Option<u64>,

    /// 快照不存在时创建空索引
    #[arg(long)]
    init: bool,

    /// 启动时删除未被引用的 blob
    #[arg(long)]
    sweep_orphans: bool,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<Config> {
        let mut cfg = match &self.config {
            Some(p) => Config::load(p)?,
            None => Config::default(),
        };
        if let Some(v) = self.listen {
            cfg.listen = v;
        }
        if let Some(v) = self.index_path {
            cfg.index_path = v;
        }
        if let Some(v) = self.cache_dir {
            cfg.cache_dir = v;
        }
        if let Some(v) = self.max_upload_bytes {
            cfg.max_upload_bytes = v;
        }
        cfg.init_index |= self.init;
        cfg.sweep_orphans |= self.sweep_orphans;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = Cli::parse().into_config()?;
    info!("Starting shape-cache: {:?}", cfg);

    // 索引无法加载则拒绝启动
    let cache = ShapeCache::open(&cfg).context("open shape index")?;
    cache.sweep_orphans(cfg.sweep_orphans)?;
    info!("Index ready: {}", cache.stats());

    ShapeServer::new(cache).run(cfg.listen).await?;
    info!("Bye");
    Ok(())
}
