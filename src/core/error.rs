use std::path::PathBuf;

use thiserror::Error;

/// 核心层错误分类；每个变体对应一个固定的对外错误码
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("malformed key path: {0:?}")]
    MalformedKey(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("upload too big: {size} > {limit} bytes")]
    TooBig { size: u64, limit: u64 },

    #[error("invalid upload: {0}")]
    InvalidUpload(String),

    #[error("cannot write blob {path:?}: {source}")]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 快照落盘失败：不可恢复，进程必须停止接受写入
    #[error("index snapshot persist failed: {0:#}")]
    PersistFailure(anyhow::Error),
}

impl CacheError {
    /// 对外错误码（HTTP body 直接使用）
    pub fn code(&self) -> &'static str {
        match self {
            CacheError::MalformedKey(_) | CacheError::NotFound(_) => "NOT_FOUND",
            CacheError::AlreadyExists(_) => "FILE_ALREADY_EXISTS",
            CacheError::TooBig { .. } => "FILE_TOO_BIG",
            CacheError::InvalidUpload(_) => "INVALID_FILE",
            CacheError::WriteFailure { .. } => "CANT_WRITE_FILE",
            CacheError::PersistFailure(_) => "CANT_PERSIST_INDEX",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, CacheError::PersistFailure(_))
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
