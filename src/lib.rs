#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod config;
pub mod core;
pub mod http;
pub mod index;
pub mod stats;
pub mod storage;

pub use crate::config::Config;
pub use crate::core::{CacheError, ShapeCache, ShapeKey, Upload};
pub use crate::http::ShapeServer;
