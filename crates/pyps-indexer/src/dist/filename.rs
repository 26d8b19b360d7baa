//! Distribution filename parsing.
//!
//! Wheels: `{name}-{version}(-{build})?-{python}-{abi}-{platform}.whl`
//! Source distributions: `{name}-{version}.tar.gz`

use super::normalize::{is_valid_name, parse_version};

pub const WHEEL_SUFFIX: &str = ".whl";
pub const SDIST_SUFFIX: &str = ".tar.gz";

/// Archive format recognized from a filename suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionKind {
    Wheel,
    Sdist,
}

impl DistributionKind {
    /// Detect the archive format, `None` for anything that is not a distribution.
    pub fn detect(filename: &str) -> Option<Self> {
        if filename.ends_with(WHEEL_SUFFIX) {
            Some(Self::Wheel)
        } else if filename.ends_with(SDIST_SUFFIX) {
            Some(Self::Sdist)
        } else {
            None
        }
    }
}

/// Components of a wheel filename, as written in the filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WheelFilename {
    pub name: String,
    pub version: String,
    pub build: Option<String>,
    pub python: String,
    pub abi: String,
    pub platform: String,
}

impl WheelFilename {
    pub fn parse(filename: &str) -> Result<Self, String> {
        let stem = filename
            .strip_suffix(WHEEL_SUFFIX)
            .ok_or_else(|| format!("not a wheel filename: {filename}"))?;

        let parts: Vec<&str> = stem.split('-').collect();
        let (name, version, build, tags) = match parts.as_slice() {
            [name, version, python, abi, platform] => (name, version, None, [python, abi, platform]),
            [name, version, build, python, abi, platform] => {
                (name, version, Some(*build), [python, abi, platform])
            }
            _ => {
                return Err(format!(
                    "wrong number of parts in wheel filename: {filename}"
                ))
            }
        };

        if !is_valid_name(name) {
            return Err(format!("invalid project name in wheel filename: {filename}"));
        }
        if parse_version(version).is_none() {
            return Err(format!("invalid version in wheel filename: {filename}"));
        }
        if let Some(build) = build {
            if !build.starts_with(|c: char| c.is_ascii_digit()) {
                return Err(format!("invalid build number in wheel filename: {filename}"));
            }
        }
        if tags.iter().any(|t| t.is_empty()) {
            return Err(format!("empty compatibility tag in wheel filename: {filename}"));
        }

        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
            build: build.map(str::to_string),
            python: tags[0].to_string(),
            abi: tags[1].to_string(),
            platform: tags[2].to_string(),
        })
    }

    /// Archive member holding the core metadata.
    pub fn metadata_member(&self) -> String {
        format!("{}-{}.dist-info/METADATA", self.name, self.version)
    }
}

/// Components of a source distribution filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdistFilename {
    pub name: String,
    pub version: String,
}

impl SdistFilename {
    pub fn parse(filename: &str) -> Result<Self, String> {
        let stem = filename
            .strip_suffix(SDIST_SUFFIX)
            .ok_or_else(|| format!("not a source distribution filename: {filename}"))?;

        let (name, version) = stem
            .rsplit_once('-')
            .ok_or_else(|| format!("missing version in sdist filename: {filename}"))?;

        if !is_valid_name(name) {
            return Err(format!("invalid project name in sdist filename: {filename}"));
        }
        if parse_version(version).is_none() {
            return Err(format!("invalid version in sdist filename: {filename}"));
        }

        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
        })
    }

    /// Archive member holding the package info.
    pub fn metadata_member(&self) -> String {
        format!("{}-{}/PKG-INFO", self.name, self.version)
    }
}
