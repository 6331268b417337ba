//! Audio objects discovered in Cloud Storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Maximum length of an Insights conversation id
const MAX_CONVERSATION_ID_LEN: usize = 64;

/// Hex characters of the URI digest appended to conversation ids
const DIGEST_SUFFIX_LEN: usize = 16;

/// A single audio object in a bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioReference {
    /// Bucket name (without gs://)
    pub bucket: String,

    /// Full object name, including any folder prefix
    pub object: String,

    /// Object size in bytes (if reported)
    pub size: Option<u64>,

    /// Content type (if reported)
    pub content_type: Option<String>,

    /// Object creation time (if reported)
    pub created: Option<DateTime<Utc>>,
}

impl AudioReference {
    pub fn new(bucket: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            object: object.into(),
            size: None,
            content_type: None,
            created: None,
        }
    }

    /// gs:// URI of the object
    pub fn uri(&self) -> String {
        format!("gs://{}/{}", self.bucket, self.object)
    }

    /// Last path component of the object name
    pub fn file_name(&self) -> &str {
        self.object.rsplit('/').next().unwrap_or(&self.object)
    }

    /// File name without its extension
    pub fn stem(&self) -> &str {
        let name = self.file_name();
        match name.rfind('.') {
            Some(idx) if idx > 0 => &name[..idx],
            _ => name,
        }
    }

    /// Deterministic conversation id for this object.
    ///
    /// Lowercase stem restricted to `[a-z0-9-]`, followed by a digest of the
    /// full URI so that equal stems in different folders do not collide.
    pub fn conversation_id(&self) -> String {
        let digest = hex::encode(Sha256::digest(self.uri().as_bytes()));
        let suffix = &digest[..DIGEST_SUFFIX_LEN];

        let mut stem: String = self
            .stem()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect();

        // Collapse runs of '-' and trim them from the ends
        while stem.contains("--") {
            stem = stem.replace("--", "-");
        }
        let stem = stem.trim_matches('-');

        let max_stem = MAX_CONVERSATION_ID_LEN - DIGEST_SUFFIX_LEN - 1;
        let stem: String = stem.chars().take(max_stem).collect();
        let stem = stem.trim_end_matches('-');

        if stem.is_empty() {
            suffix.to_string()
        } else {
            format!("{}-{}", stem, suffix)
        }
    }
}
