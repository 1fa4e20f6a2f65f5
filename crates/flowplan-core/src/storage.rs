//! Storage-adapter contract the planner and engines call into.
//!
//! The optimizer core never reads or writes data. It only needs to resolve
//! locations (to detect a store feeding a later load) and to hand schemas and
//! locations to whatever adapter the execution layer plugs in.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::Schema;

/// Size information an adapter may report for a location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStatistics {
    pub num_records: Option<u64>,
    pub size_bytes: Option<u64>,
}

/// Turns user-written locations into canonical absolute ones.
pub trait LocationResolver {
    fn relative_to_absolute_path(&self, location: &str, current_dir: &str) -> Result<String>;
}

/// Load/store adapter contract.
pub trait StorageAdapter: LocationResolver {
    /// Point the adapter at the (already absolute) location it will read or write.
    fn set_location(&mut self, location: &str) -> Result<()>;

    /// Reject a declared schema the format cannot honour.
    fn check_schema(&self, schema: &Schema) -> Result<()>;

    fn statistics(&self, location: &str) -> Result<Option<ResourceStatistics>>;

    /// Remove partial output after a failed job.
    fn cleanup_on_failure(&self, location: &str) -> Result<()>;
}

/// Path-style resolution: scheme-qualified locations (`s3://..`, `file:///..`)
/// are kept, absolute paths are normalized, relative paths are joined onto
/// the current directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathResolver;

impl LocationResolver for PathResolver {
    fn relative_to_absolute_path(&self, location: &str, current_dir: &str) -> Result<String> {
        let location = location.trim();
        if location.is_empty() {
            return Err(Error::Plan("empty location".into()));
        }
        if let Some((scheme, rest)) = location.split_once("://") {
            if scheme == "file" {
                return normalize_path(rest);
            }
            return Ok(location.trim_end_matches('/').to_string());
        }
        if location.starts_with('/') {
            return normalize_path(location);
        }
        if !current_dir.starts_with('/') {
            return Err(Error::Plan(format!(
                "cannot resolve '{location}' against non-absolute directory '{current_dir}'"
            )));
        }
        normalize_path(&format!("{}/{}", current_dir.trim_end_matches('/'), location))
    }
}

fn normalize_path(path: &str) -> Result<String> {
    let mut parts: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(Error::Plan(format!("path '{path}' escapes the root")));
                }
            }
            s => parts.push(s),
        }
    }
    Ok(format!("/{}", parts.join("/")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_join_current_dir() {
        let r = PathResolver;
        assert_eq!(
            r.relative_to_absolute_path("out/a", "/home/u/").unwrap(),
            "/home/u/out/a"
        );
        assert_eq!(
            r.relative_to_absolute_path("./x/../y", "/data").unwrap(),
            "/data/y"
        );
    }

    #[test]
    fn schemes_and_absolute_paths() {
        let r = PathResolver;
        assert_eq!(
            r.relative_to_absolute_path("file:///tmp//a/", "/ignored").unwrap(),
            "/tmp/a"
        );
        assert_eq!(
            r.relative_to_absolute_path("s3://bucket/key/", "/ignored").unwrap(),
            "s3://bucket/key"
        );
        assert!(r.relative_to_absolute_path("/../x", "/").is_err());
        assert!(r.relative_to_absolute_path("x", "rel").is_err());
    }
}
