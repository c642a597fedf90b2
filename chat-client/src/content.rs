//! Content store for profile images.
//!
//! Registration uploads the image and stores the returned reference on the
//! ledger. When no store is available, or the upload fails, the image is
//! embedded in the reference itself as a `data:` URL.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Content store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentError {
    /// The store could not be reached.
    #[error("content store unavailable: {0}")]
    Unavailable(String),

    /// The store refused the upload.
    #[error("upload rejected: {0}")]
    Rejected(String),
}

/// Somewhere to put image bytes and get back a reference.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Upload `bytes`, returning a reference the ledger can store.
    async fn upload(&self, bytes: &[u8]) -> Result<String, ContentError>;
}

/// MIME type of an image, from its magic bytes.
pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, ..] => "image/png",
        [0xff, 0xd8, 0xff, ..] => "image/jpeg",
        [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Embed `bytes` as a `data:<mime>;base64,` reference.
pub fn inline_reference(bytes: &[u8]) -> String {
    format!("data:{};base64,{}", sniff_mime(bytes), STANDARD.encode(bytes))
}

/// In-memory content store, content-addressed by SHA-256.
#[derive(Debug, Default)]
pub struct MockContentStore {
    inner: Arc<Mutex<MockContentStoreInner>>,
}

#[derive(Debug, Default)]
struct MockContentStoreInner {
    objects: HashMap<String, Vec<u8>>,
    fail_next_upload: Option<ContentError>,
    uploads: usize,
}

impl MockContentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockContentStoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cause the next upload to fail with `error`.
    pub fn fail_next_upload(&self, error: ContentError) {
        self.lock().fail_next_upload = Some(error);
    }

    /// Bytes stored under `reference`.
    pub fn fetch(&self, reference: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(reference).cloned()
    }

    /// Number of upload attempts.
    pub fn upload_count(&self) -> usize {
        self.lock().uploads
    }
}

impl Clone for MockContentStore {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl ContentStore for MockContentStore {
    async fn upload(&self, bytes: &[u8]) -> Result<String, ContentError> {
        let mut inner = self.lock();
        inner.uploads += 1;

        if let Some(error) = inner.fail_next_upload.take() {
            return Err(error);
        }

        let reference = format!("ipfs://{}", hex::encode(Sha256::digest(bytes)));
        inner.objects.insert(reference.clone(), bytes.to_vec());
        Ok(reference)
    }
}
