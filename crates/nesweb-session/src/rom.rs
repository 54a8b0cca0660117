use std::{fmt, path::Path, sync::Arc};

use sha1::{Digest, Sha1};

use crate::error::SessionError;

/// Default number of leading ROM bytes fed into the identity hash.
pub const DEFAULT_HASH_PREFIX: usize = 64 * 1024;

/// Near-unique identity of a ROM used to namespace save slots:
/// `{filename}:{byteLength}:{hash}`.
///
/// `:` and control characters in the file name become `_`, so the three
/// fields always split cleanly.
///
/// The hash is the first 4 bytes of SHA-1 over a bounded prefix of the
/// image. It is not an integrity check; two different images can collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RomKey(String);

impl RomKey {
    pub fn compute(filename: &str, bytes: &[u8], hash_prefix: usize) -> Self {
        let prefix = &bytes[..bytes.len().min(hash_prefix)];
        let digest = Sha1::digest(prefix);
        let name: String = filename
            .chars()
            .map(|c| if c == ':' || c.is_control() { '_' } else { c })
            .collect();
        Self(format!(
            "{name}:{}:{}",
            bytes.len(),
            hex::encode(&digest[..4])
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable ROM bytes retained for the whole session so the engine can be
/// cold-booted again on reset or state load.
#[derive(Debug, Clone)]
pub struct RomImage {
    name: String,
    bytes: Arc<[u8]>,
    key: RomKey,
}

impl RomImage {
    /// Accepts non-empty `bytes` if `filename` carries one of `extensions`
    /// (case-insensitive, without the dot). The content itself is the
    /// engine's business.
    pub fn new(
        bytes: &[u8],
        filename: &str,
        extensions: &[String],
        hash_prefix: usize,
    ) -> Result<Self, SessionError> {
        let recognized = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)));

        if !recognized {
            let expected = extensions
                .iter()
                .map(|ext| format!(".{ext}"))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(SessionError::InvalidRomFormat {
                filename: filename.to_string(),
                reason: format!("expected {expected}"),
            });
        }
        if bytes.is_empty() {
            return Err(SessionError::InvalidRomFormat {
                filename: filename.to_string(),
                reason: "file is empty".to_string(),
            });
        }

        Ok(Self {
            name: filename.to_string(),
            bytes: Arc::from(bytes),
            key: RomKey::compute(filename, bytes, hash_prefix),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn key(&self) -> &RomKey {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nes() -> Vec<String> {
        vec!["nes".to_string()]
    }

    #[test]
    fn key_has_name_length_and_short_hash() {
        let rom = RomImage::new(&[1, 2, 3], "game.nes", &nes(), DEFAULT_HASH_PREFIX).unwrap();
        let key = rom.key().as_str();

        let parts: Vec<&str> = key.split(':').collect();
        assert_eq!(parts[0], "game.nes");
        assert_eq!(parts[1], "3");
        assert_eq!(parts[2].len(), 8);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn same_content_and_name_give_same_key() {
        let bytes = vec![0xAB; 4096];
        let a = RomKey::compute("a.nes", &bytes, DEFAULT_HASH_PREFIX);
        let b = RomKey::compute("a.nes", &bytes.clone(), DEFAULT_HASH_PREFIX);
        assert_eq!(a, b);

        let renamed = RomKey::compute("b.nes", &bytes, DEFAULT_HASH_PREFIX);
        assert_ne!(a, renamed);
    }

    #[test]
    fn only_the_prefix_is_hashed() {
        let mut a = vec![0u8; 32];
        let mut b = vec![0u8; 32];
        a[20] = 1;
        b[20] = 2;
        assert_eq!(RomKey::compute("x.nes", &a, 16), RomKey::compute("x.nes", &b, 16));
        assert_ne!(RomKey::compute("x.nes", &a, 32), RomKey::compute("x.nes", &b, 32));
    }

    #[test]
    fn separators_in_the_name_are_replaced() {
        let key = RomKey::compute("a:b\tc.nes", &[1, 2], DEFAULT_HASH_PREFIX);
        let parts: Vec<&str> = key.as_str().split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "a_b_c.nes");
        assert_eq!(parts[1], "2");
    }

    #[test]
    fn empty_image_is_rejected() {
        let err = RomImage::new(&[], "game.nes", &nes(), DEFAULT_HASH_PREFIX).unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidRomFormat { ref reason, .. } if reason == "file is empty"
        ));
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        assert!(RomImage::new(&[0], "GAME.NES", &nes(), DEFAULT_HASH_PREFIX).is_ok());

        for bad in ["game.zip", "game", "nes", "game.nes.bak"] {
            let err = RomImage::new(&[0], bad, &nes(), DEFAULT_HASH_PREFIX).unwrap_err();
            assert!(
                matches!(err, SessionError::InvalidRomFormat { .. }),
                "{bad} should be rejected"
            );
        }
    }
}
