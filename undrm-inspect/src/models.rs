//! Domain types for the inspect pipeline
//!
//! Key material and decrypted plaintext are wrapped in [`zeroize::Zeroizing`]
//! so their bytes are overwritten when the owner drops them, on every exit
//! path. Neither type implements `Debug`-printing of its contents, `Clone`,
//! or `Serialize`; the buffers cannot accidentally leave the request scope.

use undrm_common::audit::DRM_TYPE_V2;
use undrm_common::{Error, Result};
use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

/// Bucket + key pair identifying the encrypted source object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocator {
    pub bucket: String,
    pub key: String,
}

/// Immutable per-request identity, owned by the orchestrator
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Generated once per request, keys the audit record
    pub event_id: Uuid,
    pub tenant_id: String,
    pub item_id: String,
    pub source: SourceLocator,
    /// Purpose string recorded in the audit trail
    pub reason: String,
    pub use_full_toc_analysis: bool,
}

impl RequestContext {
    pub fn new(
        tenant_id: &str,
        item_id: &str,
        source: SourceLocator,
        reason: &str,
        use_full_toc_analysis: bool,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            item_id: item_id.to_string(),
            source,
            reason: reason.to_string(),
            use_full_toc_analysis,
        }
    }
}

/// Resolved decryption key material
///
/// Owned exclusively by the decryption call; the 32-byte key is zeroized
/// when this value drops, which the orchestrator arranges to happen
/// immediately after decryption on every exit path.
pub struct KeyMaterial {
    key: Zeroizing<[u8; 32]>,
    pub drm_type: String,
    /// `None` when the resolver backend does not track grant identifiers
    pub grant_id: Option<String>,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key", &"<redacted>")
            .field("drm_type", &self.drm_type)
            .field("grant_id", &self.grant_id)
            .finish()
    }
}

impl KeyMaterial {
    /// Decode base64 key material as stored by the license backends.
    ///
    /// Decoded material must be at least 32 bytes; only the first 32 are
    /// used (AES-256). Anything shorter is unusable key material.
    pub fn from_base64(encoded: &str, grant_id: Option<String>) -> Result<Self> {
        let mut decoded = Zeroizing::new(
            BASE64
                .decode(encoded.trim())
                .map_err(|e| Error::Decryption(format!("Invalid base64 license key: {}", e)))?,
        );
        if decoded.len() < 32 {
            return Err(Error::Decryption(
                "License key material must be at least 32 bytes".to_string(),
            ));
        }
        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(&decoded[..32]);
        decoded.zeroize();
        Ok(Self {
            key,
            drm_type: DRM_TYPE_V2.to_string(),
            grant_id,
        })
    }

    /// The normalized 32-byte AES key
    pub fn aes_key(&self) -> &[u8; 32] {
        &self.key
    }
}

/// Decrypted container bytes, request-scoped
///
/// The buffer is overwritten on drop. [`DecryptedContent::wipe`] exposes the
/// clearing step explicitly so tests can observe it before release.
pub struct DecryptedContent {
    bytes: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for DecryptedContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptedContent")
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .finish()
    }
}

impl DecryptedContent {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Overwrite the buffer in place. Dropping has the same effect; this
    /// exists so the release is observable where needed.
    pub fn wipe(&mut self) {
        self.bytes.zeroize();
    }
}

/// One declared file inside the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub id: String,
    /// Archive-rooted, normalized path
    pub href: String,
    pub media_type: String,
    /// Space-separated OPF properties (e.g. "nav"), empty when absent
    pub properties: String,
}

/// One flattened table-of-contents entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub label: String,
    /// Archive-rooted, normalized path (no anchor)
    pub href: String,
    /// In-file fragment, without the leading '#'
    pub anchor: Option<String>,
    /// Position in the flattened reading order, starting at 1
    pub order: usize,
    /// Nesting depth, starting at 1
    pub depth: usize,
}

/// Character count of one spine text file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTextStat {
    pub path: String,
    pub chars: usize,
}

/// Parsed container structure: manifest, reading order, flattened TOC
#[derive(Debug, Clone)]
pub struct ContainerManifest {
    pub items: Vec<ManifestItem>,
    /// Reading order as archive-rooted hrefs, already validated against
    /// the manifest
    pub spine: Vec<String>,
    pub toc: Vec<TocEntry>,
    /// Character counts for spine text files (front-matter files excluded)
    pub text_stats: Vec<FileTextStat>,
}

impl ContainerManifest {
    /// Whether an archive-rooted href names a manifest item
    pub fn contains_href(&self, href: &str) -> bool {
        self.items.iter().any(|item| item.href == href)
    }
}

/// Order-preserving subsequence of the TOC chosen for inference
#[derive(Debug, Clone)]
pub struct SampledToc {
    pub entries: Vec<TocEntry>,
    /// True when the reduction path was taken
    pub reduced: bool,
}

/// Final answer: where the book's narrative content begins
#[derive(Debug, Clone, PartialEq)]
pub struct StartPointResult {
    /// Archive-rooted href of the starting file
    pub start_file: String,
    pub anchor: Option<String>,
    /// In [0.0, 1.0]
    pub confidence: f64,
    pub rationale: String,
}
