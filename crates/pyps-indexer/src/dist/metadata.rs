//! Core metadata header parsing.
//!
//! `METADATA` and `PKG-INFO` use RFC 822 style headers. Only the header
//! block is read; the description body after the first blank line is ignored.

/// Fields of interest from a core metadata document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoreMetadata {
    pub name: Option<String>,
    pub version: Option<String>,
    pub requires_python: Option<String>,
}

impl CoreMetadata {
    /// Parse the header block of a metadata document.
    pub fn parse(content: &[u8]) -> Self {
        let text = String::from_utf8_lossy(content);
        let mut metadata = Self::default();

        for (key, value) in headers(&text) {
            let slot = if key.eq_ignore_ascii_case("name") {
                &mut metadata.name
            } else if key.eq_ignore_ascii_case("version") {
                &mut metadata.version
            } else if key.eq_ignore_ascii_case("requires-python") {
                &mut metadata.requires_python
            } else {
                continue;
            };
            if slot.is_none() && !value.is_empty() {
                *slot = Some(value);
            }
        }

        metadata
    }
}

/// Unfold the header block into `(key, value)` pairs.
fn headers(text: &str) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            break;
        }
        if line.starts_with([' ', '\t']) {
            // continuation of the previous header
            if let Some((_, value)) = out.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            out.push((key.trim().to_string(), value.trim().to_string()));
        }
    }

    out
}
