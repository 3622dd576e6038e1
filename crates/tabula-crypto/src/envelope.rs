//! Encrypted credential envelope formats
//!
//! The versioned envelope is self-describing:
//!
//! ```text
//! $v2:k1$<hex salt>.<hex iv>.<hex auth tag>.<base64 ciphertext>
//! ```
//!
//! Records written before the version scheme existed are a bare base64
//! blob with no prefix and no visible segments (salt, IV and tag are
//! packed positionally inside the decoded bytes). Detection is by the
//! fixed prefix alone: no prefix means legacy. Decoding never guesses.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tabula_core::{AccessError, Result};

/// Fixed prefix of the versioned format
pub const V2_PREFIX: &str = "$v2:k1$";

/// Salt length in bytes (all formats)
pub const SALT_LEN: usize = 16;
/// AES-GCM nonce length in bytes
pub const IV_LEN: usize = 12;
/// AES-GCM authentication tag length in bytes
pub const TAG_LEN: usize = 16;

/// A parsed encrypted credential
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Versioned format with explicit segments
    V2 {
        salt: Vec<u8>,
        iv: Vec<u8>,
        tag: Vec<u8>,
        ciphertext: Vec<u8>,
    },
    /// Pre-versioning blob: `salt ‖ iv ‖ tag ‖ ciphertext`, base64 encoded
    Legacy { packed: Vec<u8> },
}

impl Envelope {
    /// Parse either wire format. Structural problems (wrong segment
    /// count, bad encodings, truncated blobs) are format errors,
    /// distinguishable from decryption failures.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.strip_prefix(V2_PREFIX) {
            Some(body) => Self::parse_v2(body),
            None => Self::parse_legacy(raw),
        }
    }

    fn parse_v2(body: &str) -> Result<Self> {
        let segments: Vec<&str> = body.split('.').collect();
        if segments.len() != 4 {
            return Err(AccessError::InvalidCredentialsFormat(format!(
                "expected 4 envelope segments, found {}",
                segments.len()
            )));
        }

        let salt = hex::decode(segments[0]).map_err(|_| bad_segment("salt"))?;
        let iv = hex::decode(segments[1]).map_err(|_| bad_segment("iv"))?;
        let tag = hex::decode(segments[2]).map_err(|_| bad_segment("auth tag"))?;
        let ciphertext = BASE64
            .decode(segments[3])
            .map_err(|_| bad_segment("ciphertext"))?;

        if salt.len() != SALT_LEN || iv.len() != IV_LEN || tag.len() != TAG_LEN {
            return Err(AccessError::InvalidCredentialsFormat(
                "envelope segment has wrong length".to_string(),
            ));
        }

        Ok(Envelope::V2 {
            salt,
            iv,
            tag,
            ciphertext,
        })
    }

    fn parse_legacy(raw: &str) -> Result<Self> {
        let packed = BASE64.decode(raw).map_err(|_| {
            AccessError::InvalidCredentialsFormat("legacy blob is not valid base64".to_string())
        })?;
        if packed.len() < SALT_LEN + IV_LEN + TAG_LEN {
            return Err(AccessError::InvalidCredentialsFormat(
                "legacy blob is too short".to_string(),
            ));
        }
        Ok(Envelope::Legacy { packed })
    }

    /// Serialize. Only the versioned format is ever written; re-encoding
    /// a legacy value is a logic error.
    pub fn encode(&self) -> String {
        match self {
            Envelope::V2 {
                salt,
                iv,
                tag,
                ciphertext,
            } => format!(
                "{}{}.{}.{}.{}",
                V2_PREFIX,
                hex::encode(salt),
                hex::encode(iv),
                hex::encode(tag),
                BASE64.encode(ciphertext)
            ),
            Envelope::Legacy { .. } => {
                unreachable!("legacy envelopes are read-only; the encoder emits v2 only")
            }
        }
    }
}

fn bad_segment(name: &str) -> AccessError {
    AccessError::InvalidCredentialsFormat(format!("envelope {} segment is not decodable", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v2_round_trip() {
        let env = Envelope::V2 {
            salt: vec![1u8; SALT_LEN],
            iv: vec![2u8; IV_LEN],
            tag: vec![3u8; TAG_LEN],
            ciphertext: b"sealed".to_vec(),
        };
        let encoded = env.encode();
        assert!(encoded.starts_with(V2_PREFIX));
        assert_eq!(Envelope::parse(&encoded).unwrap(), env);
    }

    #[test]
    fn wrong_segment_count_is_format_error() {
        let raw = format!("{}aabb.ccdd.eeff", V2_PREFIX);
        let err = Envelope::parse(&raw).unwrap_err();
        assert!(matches!(err, AccessError::InvalidCredentialsFormat(_)));
    }

    #[test]
    fn prefix_free_string_parses_as_legacy() {
        let packed = vec![7u8; SALT_LEN + IV_LEN + TAG_LEN + 10];
        let raw = BASE64.encode(&packed);
        match Envelope::parse(&raw).unwrap() {
            Envelope::Legacy { packed: decoded } => assert_eq!(decoded, packed),
            other => panic!("expected legacy, got {:?}", other),
        }
    }

    #[test]
    fn short_legacy_blob_is_format_error() {
        let raw = BASE64.encode([0u8; 8]);
        assert!(matches!(
            Envelope::parse(&raw),
            Err(AccessError::InvalidCredentialsFormat(_))
        ));
    }
}
