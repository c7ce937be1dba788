pub mod cache;
pub mod error;
pub mod key;

pub use cache::{ShapeCache, Upload};
pub use error::{CacheError, CacheResult};
pub use key::ShapeKey;
