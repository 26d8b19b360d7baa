//! Simple repository API models.
//!
//! Field names follow the JSON form of the simple repository API
//! (PEP 691 / PEP 700), so these types serialize straight into responses.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// API version reported in the `meta` block (PEP 700).
pub const API_VERSION: &str = "1.1";

/// Hash name to hex digest, e.g. `{"sha256": "..."}`.
pub type Hashes = BTreeMap<String, String>;

/// Build a hash map holding a single SHA-256 digest.
pub fn sha256_hashes(digest: impl Into<String>) -> Hashes {
    let mut hashes = Hashes::new();
    hashes.insert("sha256".to_string(), digest.into());
    hashes
}

/// Response metadata block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Meta {
    pub api_version: String,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
        }
    }
}

/// Yank status of a file (PEP 592): either a flag or a reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Yanked {
    Flag(bool),
    Reason(String),
}

/// One distribution file as served to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FileDescriptor {
    pub filename: String,
    /// File size in bytes
    pub size: u64,
    /// Path relative to the content-addressable store root
    pub url: String,
    pub hashes: Hashes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_python: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yanked: Option<Yanked>,
    /// Hashes of the extracted core metadata file (PEP 658 / PEP 714)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_metadata: Option<Hashes>,
    /// RFC 3339 timestamp, UTC, second precision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_time: Option<String>,
}

impl FileDescriptor {
    /// SHA-256 digest, if present.
    pub fn sha256(&self) -> Option<&str> {
        self.hashes.get("sha256").map(String::as_str)
    }
}

/// Entry of the project list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectName {
    pub name: String,
}

/// Project index, `/simple/`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectList {
    #[serde(default)]
    pub meta: Meta,
    pub projects: Vec<ProjectName>,
}

impl ProjectList {
    pub fn names(&self) -> Vec<&str> {
        self.projects.iter().map(|p| p.name.as_str()).collect()
    }
}

/// Project detail, `/simple/<project>/`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDetail {
    #[serde(default)]
    pub meta: Meta,
    pub name: String,
    pub versions: Vec<String>,
    pub files: Vec<FileDescriptor>,
}

/// Aggregate counts over the whole index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub distributions: u64,
    pub projects: u64,
    pub sub_indexes: u64,
}

/// Counts for a single sub-index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubIndexStats {
    pub sub_index: String,
    pub distributions: u64,
    pub projects: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> FileDescriptor {
        FileDescriptor {
            filename: "pkga-1.0-py3-none-any.whl".to_string(),
            size: 42,
            url: "ab/pkga-1.0-py3-none-any.whl".to_string(),
            hashes: sha256_hashes("ab12"),
            requires_python: Some(">=3.8".to_string()),
            yanked: None,
            core_metadata: Some(sha256_hashes("cd34")),
            upload_time: Some("2024-01-02T03:04:05Z".to_string()),
        }
    }

    #[test]
    fn test_descriptor_json_field_names() {
        let json = serde_json::to_string(&descriptor()).unwrap();
        assert!(json.contains("\"requires-python\":\">=3.8\""));
        assert!(json.contains("\"core-metadata\":{\"sha256\":\"cd34\"}"));
        assert!(json.contains("\"upload-time\":\"2024-01-02T03:04:05Z\""));
        assert!(!json.contains("yanked"));
    }

    #[test]
    fn test_descriptor_msgpack_named_roundtrip() {
        let mut file = descriptor();
        file.requires_python = None;
        file.yanked = Some(Yanked::Reason("broken".to_string()));

        let bytes = rmp_serde::to_vec_named(&file).unwrap();
        let decoded: FileDescriptor = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded, file);
    }

    #[test]
    fn test_yanked_flag_serializes_as_bool() {
        let mut file = descriptor();
        file.yanked = Some(Yanked::Flag(true));
        let json = serde_json::to_string(&file).unwrap();
        assert!(json.contains("\"yanked\":true"));
    }

    #[test]
    fn test_meta_default_api_version() {
        let list = ProjectList::default();
        let json = serde_json::to_string(&list).unwrap();
        assert!(json.contains("\"api-version\":\"1.1\""));
    }
}
