//! DRM decryption seam
//!
//! The actual CENC decryptor is supplied by the deployment; the proxy only
//! needs a call surface for it. The bundled default rejects keyed segments
//! so a misconfigured instance fails loudly instead of serving bytes a
//! player cannot use.

use bytes::Bytes;
use thiserror::Error;

/// Decrypt failure
#[derive(Error, Debug)]
pub enum DecryptError {
    #[error("no decrypter configured for keyed segment (key_id {key_id})")]
    Unsupported { key_id: String },

    #[error("decrypt failed: {0}")]
    Failed(String),
}

/// Decrypt collaborator. Given the initialization segment, the media
/// segment, and the content key, returns playable clear bytes.
pub trait SegmentDecrypter: Send + Sync {
    fn decrypt(
        &self,
        init: &[u8],
        media: &[u8],
        key_id: &str,
        key: &str,
    ) -> Result<Bytes, DecryptError>;
}

/// Default decrypter: refuses every keyed segment.
pub struct UnsupportedDecrypter;

impl SegmentDecrypter for UnsupportedDecrypter {
    fn decrypt(
        &self,
        _init: &[u8],
        _media: &[u8],
        key_id: &str,
        _key: &str,
    ) -> Result<Bytes, DecryptError> {
        Err(DecryptError::Unsupported {
            key_id: key_id.to_string(),
        })
    }
}
