//! Credential encryption, password hashing and token generation
//!
//! Keys are derived per call: PBKDF2-HMAC-SHA256 over the secret (the
//! process private key, or a caller-supplied master password) and a fresh
//! random salt, so identical plaintext never produces identical
//! ciphertext. The cipher is AES-256-GCM; a tampered ciphertext or wrong
//! key fails authentication instead of returning garbage.

use std::num::NonZeroU32;

use ring::aead::{AES_256_GCM, Aad, LessSafeKey, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use ring::{hmac, pbkdf2};
use tabula_core::{AccessError, Result};

use crate::envelope::{Envelope, IV_LEN, SALT_LEN, TAG_LEN};

const KEY_LEN: usize = 32;
const PBKDF2_ITERATIONS: u32 = 100_000;

/// Self-describing password hash prefix
const PASSWORD_HASH_SCHEME: &str = "pbkdf2";

/// Credential codec bound to a process-wide private key.
///
/// Records flagged for master encryption use the caller's master password
/// through `encrypt_with_master`/`decrypt_with_master` instead of the
/// process key; the envelope format is identical.
pub struct Codec {
    process_key: String,
    rng: SystemRandom,
}

impl Codec {
    pub fn new(process_key: impl Into<String>) -> Self {
        Self {
            process_key: process_key.into(),
            rng: SystemRandom::new(),
        }
    }

    /// Encrypt with the process key. Always emits the versioned format.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        self.encrypt_with_secret(plaintext, &self.process_key)
    }

    /// Decrypt either envelope format with the process key.
    pub fn decrypt(&self, raw: &str) -> Result<String> {
        self.decrypt_with_secret(raw, &self.process_key)
    }

    /// Encrypt with a caller-supplied master password.
    pub fn encrypt_with_master(&self, plaintext: &str, master_password: &str) -> Result<String> {
        self.encrypt_with_secret(plaintext, master_password)
    }

    /// Decrypt with a caller-supplied master password.
    pub fn decrypt_with_master(&self, raw: &str, master_password: &str) -> Result<String> {
        self.decrypt_with_secret(raw, master_password)
    }

    fn encrypt_with_secret(&self, plaintext: &str, secret: &str) -> Result<String> {
        let mut salt = vec![0u8; SALT_LEN];
        let mut iv = vec![0u8; IV_LEN];
        self.rng
            .fill(&mut salt)
            .map_err(|_| AccessError::Internal("system CSPRNG unavailable".to_string()))?;
        self.rng
            .fill(&mut iv)
            .map_err(|_| AccessError::Internal("system CSPRNG unavailable".to_string()))?;

        let key = derive_key(secret, &salt);
        let sealing = aead_key(&key)?;

        let nonce = Nonce::try_assume_unique_for_key(&iv)
            .map_err(|_| AccessError::Internal("bad nonce length".to_string()))?;
        let mut in_out = plaintext.as_bytes().to_vec();
        let tag = sealing
            .seal_in_place_separate_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| AccessError::Internal("encryption failed".to_string()))?;

        Ok(Envelope::V2 {
            salt,
            iv,
            tag: tag.as_ref().to_vec(),
            ciphertext: in_out,
        }
        .encode())
    }

    fn decrypt_with_secret(&self, raw: &str, secret: &str) -> Result<String> {
        match Envelope::parse(raw)? {
            Envelope::V2 {
                salt,
                iv,
                tag,
                ciphertext,
            } => open(secret, &salt, &iv, &tag, &ciphertext),
            Envelope::Legacy { packed } => {
                // positionally packed: salt ‖ iv ‖ tag ‖ ciphertext
                let (salt, rest) = packed.split_at(SALT_LEN);
                let (iv, rest) = rest.split_at(IV_LEN);
                let (tag, ciphertext) = rest.split_at(TAG_LEN);
                open(secret, salt, iv, tag, ciphertext)
            }
        }
    }

    /// HMAC-SHA256 over `data` with the process key, hex encoded.
    pub fn sign(&self, data: &str) -> String {
        let key = hmac::Key::new(hmac::HMAC_SHA256, self.process_key.as_bytes());
        let tag = hmac::sign(&key, data.as_bytes());
        hex::encode(tag.as_ref())
    }

    /// `len` random bytes from the system CSPRNG, hex encoded.
    pub fn random_token(&self, len: usize) -> Result<String> {
        let mut bytes = vec![0u8; len];
        self.rng
            .fill(&mut bytes)
            .map_err(|_| AccessError::Internal("system CSPRNG unavailable".to_string()))?;
        Ok(hex::encode(bytes))
    }
}

fn derive_key(secret: &str, salt: &[u8]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        NonZeroU32::new(PBKDF2_ITERATIONS).expect("iterations is non-zero"),
        salt,
        secret.as_bytes(),
        &mut key,
    );
    key
}

fn aead_key(key: &[u8; KEY_LEN]) -> Result<LessSafeKey> {
    let unbound = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| AccessError::Internal("bad AEAD key length".to_string()))?;
    Ok(LessSafeKey::new(unbound))
}

fn open(secret: &str, salt: &[u8], iv: &[u8], tag: &[u8], ciphertext: &[u8]) -> Result<String> {
    let key = derive_key(secret, salt);
    let opening = aead_key(&key)?;
    let nonce =
        Nonce::try_assume_unique_for_key(iv).map_err(|_| AccessError::DecryptionFailed)?;

    let mut in_out = Vec::with_capacity(ciphertext.len() + tag.len());
    in_out.extend_from_slice(ciphertext);
    in_out.extend_from_slice(tag);

    let plaintext = opening
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| AccessError::DecryptionFailed)?;

    String::from_utf8(plaintext.to_vec()).map_err(|_| AccessError::DecryptionFailed)
}

/// Hash a password with a random salt and self-describing parameters:
/// `pbkdf2$<iterations>$<hex salt>$<hex digest>`.
///
/// Hashing the empty password returns the empty string; connections
/// without passwords are stored as-is by design.
pub fn hash_password(password: &str) -> Result<String> {
    if password.is_empty() {
        return Ok(String::new());
    }

    let rng = SystemRandom::new();
    let mut salt = [0u8; SALT_LEN];
    rng.fill(&mut salt)
        .map_err(|_| AccessError::Internal("system CSPRNG unavailable".to_string()))?;

    let mut digest = [0u8; KEY_LEN];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        NonZeroU32::new(PBKDF2_ITERATIONS).expect("iterations is non-zero"),
        &salt,
        password.as_bytes(),
        &mut digest,
    );

    Ok(format!(
        "{}${}${}${}",
        PASSWORD_HASH_SCHEME,
        PBKDF2_ITERATIONS,
        hex::encode(salt),
        hex::encode(digest)
    ))
}

/// Verify a password against a stored hash, recovering the parameters
/// from the hash itself. Unknown schemes and malformed hashes verify
/// false rather than erroring.
pub fn verify_password(password: &str, stored: &str) -> bool {
    if password.is_empty() || stored.is_empty() {
        return false;
    }

    let mut parts = stored.split('$');
    let (Some(scheme), Some(iters), Some(salt_hex), Some(digest_hex), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };
    if scheme != PASSWORD_HASH_SCHEME {
        return false;
    }
    let Ok(iterations) = iters.parse::<u32>() else {
        return false;
    };
    let Some(iterations) = NonZeroU32::new(iterations) else {
        return false;
    };
    let (Ok(salt), Ok(digest)) = (hex::decode(salt_hex), hex::decode(digest_hex)) else {
        return false;
    };

    pbkdf2::verify(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        &salt,
        password.as_bytes(),
        &digest,
    )
    .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::V2_PREFIX;
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use pretty_assertions::assert_eq;

    fn codec() -> Codec {
        Codec::new("process-private-key")
    }

    /// Fabricate a pre-versioning blob the way the old writer packed it.
    fn encrypt_legacy(plaintext: &str, secret: &str) -> String {
        let rng = SystemRandom::new();
        let mut salt = vec![0u8; SALT_LEN];
        let mut iv = vec![0u8; IV_LEN];
        rng.fill(&mut salt).unwrap();
        rng.fill(&mut iv).unwrap();

        let key = derive_key(secret, &salt);
        let sealing = aead_key(&key).unwrap();
        let nonce = Nonce::try_assume_unique_for_key(&iv).unwrap();
        let mut in_out = plaintext.as_bytes().to_vec();
        let tag = sealing
            .seal_in_place_separate_tag(nonce, Aad::empty(), &mut in_out)
            .unwrap();

        let mut packed = salt;
        packed.extend_from_slice(&iv);
        packed.extend_from_slice(tag.as_ref());
        packed.extend_from_slice(&in_out);
        BASE64.encode(packed)
    }

    #[test]
    fn round_trip_process_key() {
        let c = codec();
        for plaintext in ["", "hunter2", "påsswörd ✓ 密码", &"x".repeat(16 * 1024)] {
            let sealed = c.encrypt(plaintext).unwrap();
            assert!(sealed.starts_with(V2_PREFIX));
            assert_eq!(c.decrypt(&sealed).unwrap(), plaintext);
        }
    }

    #[test]
    fn round_trip_master_password() {
        let c = codec();
        let sealed = c.encrypt_with_master("db-password", "master-pw").unwrap();
        assert_eq!(
            c.decrypt_with_master(&sealed, "master-pw").unwrap(),
            "db-password"
        );
    }

    #[test]
    fn encryption_is_randomized() {
        let c = codec();
        let a = c.encrypt("same plaintext").unwrap();
        let b = c.encrypt("same plaintext").unwrap();
        assert_ne!(a, b);
        assert_eq!(c.decrypt(&a).unwrap(), c.decrypt(&b).unwrap());
    }

    #[test]
    fn wrong_master_password_fails() {
        let c = codec();
        let sealed = c.encrypt_with_master("secret", "right").unwrap();
        assert!(matches!(
            c.decrypt_with_master(&sealed, "wrong"),
            Err(AccessError::DecryptionFailed)
        ));
    }

    #[test]
    fn tampered_envelope_fails_closed() {
        let c = codec();
        let sealed = c.encrypt("payload").unwrap();
        let mut tampered = sealed.clone();
        // flip the trailing ciphertext character
        let last = tampered.pop().expect("sealed envelope is never empty");
        tampered.push(if last == 'A' { 'B' } else { 'A' });
        let result = c.decrypt(&tampered);
        assert!(
            matches!(
                result,
                Err(AccessError::DecryptionFailed | AccessError::InvalidCredentialsFormat(_))
            ),
            "tampering must not yield plaintext"
        );
    }

    #[test]
    fn legacy_blob_decrypts_through_same_entry_point() {
        let c = codec();
        let legacy = encrypt_legacy("pre-versioning secret", "process-private-key");
        assert!(!legacy.starts_with(V2_PREFIX));
        assert_eq!(c.decrypt(&legacy).unwrap(), "pre-versioning secret");

        // re-encrypting always yields the versioned format
        let reencrypted = c.encrypt("pre-versioning secret").unwrap();
        assert!(reencrypted.starts_with(V2_PREFIX));
    }

    #[test]
    fn malformed_envelope_is_distinguishable() {
        let c = codec();
        let err = c
            .decrypt(&format!("{}only.two.segments", V2_PREFIX))
            .unwrap_err();
        assert!(matches!(err, AccessError::InvalidCredentialsFormat(_)));
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("pbkdf2$"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
    }

    #[test]
    fn empty_password_hashes_to_empty() {
        assert_eq!(hash_password("").unwrap(), "");
        assert!(!verify_password("", ""));
        assert!(!verify_password("x", ""));
    }

    #[test]
    fn hash_is_salted() {
        let a = hash_password("pw").unwrap();
        let b = hash_password("pw").unwrap();
        assert_ne!(a, b);
        assert!(verify_password("pw", &a));
        assert!(verify_password("pw", &b));
    }

    #[test]
    fn hmac_is_deterministic_and_keyed() {
        let c = codec();
        assert_eq!(c.sign("data"), c.sign("data"));
        assert_ne!(c.sign("data"), Codec::new("other-key").sign("data"));
        assert_eq!(c.sign("data").len(), 64);
    }

    #[test]
    fn random_tokens_are_unique_hex() {
        let c = codec();
        let a = c.random_token(16).unwrap();
        let b = c.random_token(16).unwrap();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }
}
