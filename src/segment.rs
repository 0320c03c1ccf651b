//! Segment assembly
//!
//! A playable segment is the initialization payload followed by the media
//! payload. Keyed content goes through the decrypt collaborator instead;
//! decrypt wall time is logged because it dominates segment latency.

use bytes::{BufMut, Bytes, BytesMut};
use std::time::Instant;
use tracing::info;

use crate::drm::SegmentDecrypter;
use crate::error::Result;

/// Assemble a segment, decrypting when both key parts are present.
pub fn assemble(
    decrypter: &dyn SegmentDecrypter,
    init: &Bytes,
    media: &Bytes,
    mime_type: &str,
    key_id: Option<&str>,
    key: Option<&str>,
) -> Result<Bytes> {
    match (key_id, key) {
        (Some(key_id), Some(key)) if !key_id.is_empty() && !key.is_empty() => {
            let started = Instant::now();
            let clear = decrypter.decrypt(init, media, key_id, key)?;
            info!(
                mime_type,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "decrypted segment"
            );
            Ok(clear)
        }
        _ => {
            let mut out = BytesMut::with_capacity(init.len() + media.len());
            out.put_slice(init);
            out.put_slice(media);
            Ok(out.freeze())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drm::{DecryptError, UnsupportedDecrypter};

    struct EchoDecrypter;

    impl SegmentDecrypter for EchoDecrypter {
        fn decrypt(
            &self,
            init: &[u8],
            media: &[u8],
            _key_id: &str,
            _key: &str,
        ) -> std::result::Result<Bytes, DecryptError> {
            let mut out = Vec::from(b"clear:".as_slice());
            out.extend_from_slice(init);
            out.extend_from_slice(media);
            Ok(Bytes::from(out))
        }
    }

    #[test]
    fn test_assemble_concatenates_without_keys() {
        let out = assemble(
            &UnsupportedDecrypter,
            &Bytes::from("init"),
            &Bytes::from("media"),
            "video/mp4",
            None,
            None,
        )
        .unwrap();
        assert_eq!(out, Bytes::from("initmedia"));
    }

    #[test]
    fn test_assemble_treats_empty_keys_as_clear() {
        let out = assemble(
            &UnsupportedDecrypter,
            &Bytes::from("i"),
            &Bytes::from("m"),
            "video/mp4",
            Some(""),
            Some("key"),
        )
        .unwrap();
        assert_eq!(out, Bytes::from("im"));
    }

    #[test]
    fn test_assemble_decrypts_with_keys() {
        let out = assemble(
            &EchoDecrypter,
            &Bytes::from("i"),
            &Bytes::from("m"),
            "video/mp4",
            Some("kid"),
            Some("key"),
        )
        .unwrap();
        assert_eq!(out, Bytes::from("clear:im"));
    }

    #[test]
    fn test_assemble_propagates_decrypt_failure() {
        let err = assemble(
            &UnsupportedDecrypter,
            &Bytes::from("i"),
            &Bytes::from("m"),
            "video/mp4",
            Some("kid"),
            Some("key"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("decrypt"));
    }
}
