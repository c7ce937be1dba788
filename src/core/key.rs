use std::fmt;

use crate::core::error::CacheError;

/// 三级键：region → version → shape
///
/// 从 URL 路径 `/<region>/<version>/<shape>` 解析而来。
/// region / version 会作为目录名落盘，因此拒绝 `.` / `..` 这类会逃逸 store-root 的段。
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeKey {
    pub region: String,
    pub version: String,
    pub shape: String,
}

impl ShapeKey {
    pub fn new(
        region: impl Into<String>,
        version: impl Into<String>,
        shape: impl Into<String>,
    ) -> Result<Self, CacheError> {
        let key = Self {
            region: region.into(),
            version: version.into(),
            shape: shape.into(),
        };
        for seg in [&key.region, &key.version, &key.shape] {
            if !segment_ok(seg) {
                return Err(CacheError::MalformedKey(key.to_string()));
            }
        }
        Ok(key)
    }

    /// 解析请求路径；前导 `/` 可有可无，但必须恰好三段且每段非空。
    pub fn parse_path(path: &str) -> Result<Self, CacheError> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let parts: Vec<&str> = trimmed.split('/').collect();
        match parts.as_slice() {
            [region, version, shape] => Self::new(*region, *version, *shape),
            _ => Err(CacheError::MalformedKey(path.to_string())),
        }
    }
}

fn segment_ok(seg: &str) -> bool {
    !seg.is_empty()
        && seg != "."
        && seg != ".."
        && !seg.contains(|c: char| matches!(c, '/' | '\\' | '\0'))
}

impl fmt::Display for ShapeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}/{}", self.region, self.version, self.shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_three_segments() {
        let k = ShapeKey::parse_path("/us-east/v1/circle").unwrap();
        assert_eq!(k.region, "us-east");
        assert_eq!(k.version, "v1");
        assert_eq!(k.shape, "circle");
        assert_eq!(k.to_string(), "/us-east/v1/circle");

        // axum 的 wildcard 捕获不带前导 '/'
        assert_eq!(ShapeKey::parse_path("us-east/v1/circle").unwrap(), k);
    }

    #[test]
    fn wrong_segment_count_is_malformed() {
        for p in ["/bad/path", "/a/b/c/d", "/", "", "/a/b/c/"] {
            assert!(
                matches!(ShapeKey::parse_path(p), Err(CacheError::MalformedKey(_))),
                "{p:?} should be malformed"
            );
        }
    }

    #[test]
    fn empty_or_traversal_segments_are_malformed() {
        for p in ["/a//c", "//b/c", "/../v1/x", "/r/./x"] {
            assert!(ShapeKey::parse_path(p).is_err(), "{p:?}");
        }
        assert!(ShapeKey::new("r", "v", "a\\b").is_err());
    }
}
